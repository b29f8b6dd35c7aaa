// services/resolution.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::Result;
use crate::models::payment_intent::PaymentIntent;
use crate::services::marketplace::Marketplace;

/// Waits until an intent resolves or the deadline passes, whichever comes
/// first, and returns the intent as last seen. Implementations may poll,
/// long-poll or listen for webhooks; callers cannot tell the difference.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn await_resolution(&self, intent_id: &str, deadline: DateTime<Utc>) -> Result<PaymentIntent>;
}

/// Fixed-interval polling. Each round refreshes the intent from the gateway,
/// so a success landing after the payer's prompt has timed out is still
/// picked up while the intent itself is live.
pub struct PollingResolver {
    market: Arc<Marketplace>,
    interval: Duration,
}

impl PollingResolver {
    pub fn new(market: Arc<Marketplace>) -> Self {
        let interval = market.policy().poll_interval();
        PollingResolver { market, interval }
    }
}

#[async_trait]
impl IntentResolver for PollingResolver {
    async fn await_resolution(&self, intent_id: &str, deadline: DateTime<Utc>) -> Result<PaymentIntent> {
        loop {
            let intent = self.market.refresh_intent_by_id(intent_id).await?;
            if intent.status.is_terminal() {
                return Ok(intent);
            }
            let stop_at = deadline.min(intent.expires_at);
            if self.market.now() >= stop_at {
                debug!(intent_id = %intent.id, "stopped waiting with intent still {}", intent.status);
                return Ok(intent);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
