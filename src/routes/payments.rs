use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{callbacks, payments};
use crate::state::AppState;

/// Reachable without a bearer token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/fees", get(payments::quote_fees))
        .route("/mpesa/callback", post(callbacks::mpesa_callback))
        .route("/mpesa/b2c/result", post(callbacks::b2c_result_callback))
        .route("/mpesa/b2c/timeout", post(callbacks::b2c_timeout_callback))
        .route("/flutterwave/webhook", post(callbacks::flutterwave_webhook))
}

/// Payment intents, mounted under `/api/payments/intents`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(payments::create_intent))
        .route("/:id", get(payments::get_intent))
        .route("/:id/mpesa", post(payments::initiate_mpesa))
        .route("/:id/card", post(payments::initiate_card))
        .route("/:id/cancel", post(payments::cancel_intent))
        .route("/:id/await", post(payments::await_intent))
        .route("/:id/reconcile", post(payments::reconcile_intent))
}
