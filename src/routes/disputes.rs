use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{admin, disputes};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(disputes::get_dispute))
        .route("/:id/review", post(disputes::review_dispute))
        .route("/:id/escalate", post(disputes::escalate_dispute))
        .route("/:id/resolve", post(disputes::resolve_dispute))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/settle", post(admin::settle_elapsed))
        .route("/intents/expire", post(admin::expire_intents))
}
