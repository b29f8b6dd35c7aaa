// services/notifier.rs
use async_trait::async_trait;
use mongodb::{Collection, Database};
use std::sync::Arc;
use tracing::warn;

use crate::models::notification::Notification;

/// Sink for user-facing notifications. Delivery is somebody else's job; we
/// only hand records over.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Fire-and-forget: the caller's state transition never waits on, or fails
/// because of, notification delivery.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        if let Err(e) = notifier.deliver(&notification).await {
            warn!(
                user_id = %notification.user_id,
                kind = ?notification.notification_type,
                "notification delivery failed: {:#}",
                e
            );
        }
    });
}

/// Writes notifications into the `notifications` collection, where the
/// delivery workers pick them up.
pub struct MongoNotifier {
    collection: Collection<Notification>,
}

impl MongoNotifier {
    pub fn new(db: &Database) -> Self {
        MongoNotifier {
            collection: db.collection("notifications"),
        }
    }
}

#[async_trait]
impl Notifier for MongoNotifier {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.collection.insert_one(notification).await?;
        Ok(())
    }
}
