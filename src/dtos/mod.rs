pub mod dispute_dtos;
pub mod payment_dtos;
pub mod stint_dtos;
