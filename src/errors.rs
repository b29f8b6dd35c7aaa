// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::models::application::ApplicationStatus;
use crate::models::payment_intent::{FailureKind, IntentStatus};
use crate::models::stint::StintStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate key error")]
    DuplicateKey,

    #[error("Professional already has an active application ({application_id}) on this stint")]
    DuplicateApplication { application_id: String },

    #[error("Stint is not open (current status: {status})")]
    StintNotOpen { status: StintStatus },

    #[error("Stint is already assigned to application {application_id}")]
    StintAlreadyAssigned { application_id: String },

    #[error("Application is not pending (current status: {status})")]
    ApplicationNotPending { status: ApplicationStatus },

    #[error("Payment intent {intent_id} is already active for this application")]
    IntentAlreadyActive { intent_id: String },

    #[error("Payment intent is already {status}")]
    IntentAlreadyTerminal { status: IntentStatus },

    #[error("Payment intent {intent_id} has expired")]
    IntentExpired { intent_id: String },

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment failed: {reason}")]
    PaymentFailed { kind: FailureKind, reason: String },

    #[error("Invalid stint transition from {from} to {attempted}")]
    InvalidStintTransition {
        from: StintStatus,
        attempted: StintStatus,
    },

    #[error("Invalid {entity} transition from {from} to {attempted}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        attempted: String,
    },

    #[error("Dispute window closed at {closed_at}")]
    DisputeWindowClosed { closed_at: DateTime<Utc> },

    #[error("Review window is open until {closes_at}")]
    ReviewWindowOpen { closes_at: DateTime<Utc> },

    #[error("Payout funds are frozen by an open dispute")]
    FundsFrozen,

    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("Authentication error")]
    AuthError,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Service error: {0}")]
    ServiceError(String),
}

impl AppError {
    /// Stable machine-readable code, part of the public API contract.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MongoDB(_) => "DATABASE_ERROR",
            AppError::InvalidAmount(_) => "INVALID_AMOUNT",
            AppError::InvalidPhoneNumber(_) => "INVALID_PHONE_NUMBER",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::DuplicateKey => "DUPLICATE_KEY",
            AppError::DuplicateApplication { .. } => "DUPLICATE_APPLICATION",
            AppError::StintNotOpen { .. } => "STINT_NOT_OPEN",
            AppError::StintAlreadyAssigned { .. } => "STINT_ALREADY_ASSIGNED",
            AppError::ApplicationNotPending { .. } => "APPLICATION_NOT_PENDING",
            AppError::IntentAlreadyActive { .. } => "INTENT_ALREADY_ACTIVE",
            AppError::IntentAlreadyTerminal { .. } => "INTENT_ALREADY_TERMINAL",
            AppError::IntentExpired { .. } => "INTENT_EXPIRED",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::PaymentFailed { kind, .. } => match kind {
                FailureKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
                FailureKind::UserCancelledPin => "USER_CANCELLED_PIN",
                FailureKind::Timeout => "PAYMENT_TIMEOUT",
                FailureKind::Declined => "PAYMENT_DECLINED",
            },
            AppError::InvalidStintTransition { .. } => "INVALID_STINT_TRANSITION",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::DisputeWindowClosed { .. } => "DISPUTE_WINDOW_CLOSED",
            AppError::ReviewWindowOpen { .. } => "REVIEW_WINDOW_OPEN",
            AppError::FundsFrozen => "FUNDS_FROZEN",
            AppError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            AppError::AuthError => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::ExternalApi(_) => "EXTERNAL_API_ERROR",
            AppError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            AppError::ServiceError(_) => "SERVICE_ERROR",
        }
    }

    /// Whether the caller may simply repeat the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::GatewayUnavailable(_)
                | AppError::ConcurrentModification { .. }
                | AppError::MongoDB(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidAmount(_)
            | AppError::InvalidPhoneNumber(_)
            | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::DuplicateKey
            | AppError::DuplicateApplication { .. }
            | AppError::StintNotOpen { .. }
            | AppError::StintAlreadyAssigned { .. }
            | AppError::ApplicationNotPending { .. }
            | AppError::IntentAlreadyActive { .. }
            | AppError::IntentAlreadyTerminal { .. }
            | AppError::InvalidStintTransition { .. }
            | AppError::InvalidTransition { .. }
            | AppError::DisputeWindowClosed { .. }
            | AppError::ReviewWindowOpen { .. }
            | AppError::FundsFrozen
            | AppError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            AppError::IntentExpired { .. } => StatusCode::GONE,
            AppError::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalApi(_) => StatusCode::BAD_GATEWAY,
            AppError::AuthError => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::MongoDB(_)
            | AppError::ConfigurationError(_)
            | AppError::ServiceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Current state surfaced on conflicts so clients can reconcile their view.
    fn details(&self) -> serde_json::Value {
        match self {
            AppError::StintNotOpen { status } => json!({ "stint_status": status }),
            AppError::StintAlreadyAssigned { application_id } => {
                json!({ "assigned_application_id": application_id })
            }
            AppError::ApplicationNotPending { status } => json!({ "application_status": status }),
            AppError::DuplicateApplication { application_id } => {
                json!({ "application_id": application_id })
            }
            AppError::IntentAlreadyActive { intent_id } => json!({ "intent_id": intent_id }),
            AppError::IntentAlreadyTerminal { status } => json!({ "intent_status": status }),
            AppError::IntentExpired { intent_id } => json!({ "intent_id": intent_id }),
            AppError::InvalidStintTransition { from, attempted } => {
                json!({ "current": from, "attempted": attempted })
            }
            AppError::InvalidTransition { from, attempted, .. } => {
                json!({ "current": from, "attempted": attempted })
            }
            AppError::DisputeWindowClosed { closed_at } => json!({ "closed_at": closed_at }),
            AppError::ReviewWindowOpen { closes_at } => json!({ "closes_at": closes_at }),
            _ => serde_json::Value::Null,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs.
        let message = match &self {
            AppError::MongoDB(_) => "Database error".to_string(),
            AppError::ConfigurationError(_) => "Configuration error".to_string(),
            AppError::ServiceError(_) => "Service error".to_string(),
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": message,
            "retryable": self.is_retryable(),
            "details": self.details(),
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AppError::GatewayUnavailable(format!("HTTP request failed: {}", err))
        } else {
            AppError::ExternalApi(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        AppError::ServiceError(format!("BSON serialization failed: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::GatewayUnavailable("gateway call timed out".to_string())
    }
}

// Helper conversion functions
impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn external_api(msg: impl Into<String>) -> Self {
        AppError::ExternalApi(msg.into())
    }

    pub fn gateway_unavailable(msg: impl Into<String>) -> Self {
        AppError::GatewayUnavailable(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }

    pub fn service(msg: impl Into<String>) -> Self {
        AppError::ServiceError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
