pub mod applications;
pub mod clock;
pub mod disputes;
pub mod fee_calculator;
pub mod flutterwave_service;
pub mod gateway;
pub mod locks;
pub mod marketplace;
pub mod mpesa_service;
pub mod notifier;
pub mod payment_intents;
pub mod resolution;
pub mod stint_machine;
pub mod sweeper;
pub mod time_tracking;

pub use marketplace::Marketplace;
