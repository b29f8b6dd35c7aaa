use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::applications;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:id/quote", get(applications::quote_application))
        .route("/:id/accept", post(applications::accept_application))
        .route("/:id/reject", post(applications::reject_application))
        .route("/:id/withdraw", post(applications::withdraw_application))
}
