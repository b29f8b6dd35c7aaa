use axum::{http::Method, middleware::from_fn_with_state, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::health;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub mod applications;
pub mod disputes;
pub mod payments;
pub mod stints;

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    let protected = Router::new()
        .nest("/api/stints", stints::routes())
        .nest("/api/applications", applications::routes())
        .nest("/api/payments/intents", payments::routes())
        .nest("/api/disputes", disputes::routes())
        .nest("/api/admin", disputes::admin_routes())
        .route_layer(from_fn_with_state(app_state.clone(), auth_middleware));

    Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_check))
        .route("/api/health", get(health::api_health_check))
        .nest("/api/payments", payments::public_routes())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}
