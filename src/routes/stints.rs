use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{applications, disputes, stints};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(stints::create_stint).get(stints::list_stints))
        .route("/:id", get(stints::get_stint))
        .route("/:id/cancel", post(stints::cancel_stint))

        // Applications posted against a stint
        .route(
            "/:id/applications",
            post(applications::apply).get(applications::list_applications),
        )

        // Shift attendance
        .route("/:id/clock-in", post(stints::clock_in))
        .route("/:id/clock-out", post(stints::clock_out))

        // Review window
        .route(
            "/:id/disputes",
            post(disputes::open_dispute).get(disputes::list_disputes),
        )
        .route("/:id/payout", get(disputes::get_payout))
        .route("/:id/payout/compute", post(disputes::compute_payout))
        .route("/:id/payout/release", post(disputes::release_payout))
        .route("/:id/payout/retry", post(disputes::retry_payout))
}
