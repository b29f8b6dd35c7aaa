// services/sweeper.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::services::marketplace::Marketplace;

/// Background housekeeping: expires abandoned payment intents and settles
/// review windows that have elapsed. Request handlers do both lazily too;
/// this only keeps untouched records from lingering.
pub fn spawn_sweeper(market: Arc<Marketplace>) -> JoinHandle<()> {
    let every = Duration::from_secs(market.policy().sweep_interval_secs.max(1));
    info!("🧹 Sweeper running every {:?}", every);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match market.expire_stale_intents().await {
                Ok(0) => {}
                Ok(expired) => info!(expired, "expired stale payment intents"),
                Err(e) => error!("intent sweep failed: {}", e),
            }
            if let Err(e) = market.settle_elapsed().await {
                error!("settlement sweep failed: {}", e);
            }
        }
    })
}
