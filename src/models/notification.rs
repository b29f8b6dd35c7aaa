use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApplicationReceived,
    ApplicationAccepted,
    ApplicationRejected,
    PaymentReceived,
    PaymentFailed,
    StintCancelled,
    ClockedIn,
    StintCompleted,
    DisputeOpened,
    DisputeResolved,
    PayoutSent,
    PayoutFailed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub notification_type: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: &str,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            notification_type: kind,
            title: title.into(),
            body: body.into(),
            data,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}
