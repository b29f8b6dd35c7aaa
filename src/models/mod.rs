pub mod application;
pub mod caller;
pub mod dispute;
pub mod notification;
pub mod payment_intent;
pub mod payout;
pub mod stint;
