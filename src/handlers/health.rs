use axum::{extract::State, response::Json};
use mongodb::bson::doc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn root_handler() -> &'static str {
    "🚀 Stint Marketplace API"
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    // Null when the router was built without a Mongo handle.
    let database = match &state.db {
        Some(db) => Some(match db.run_command(doc! { "ping": 1 }).await {
            Ok(_) => "connected",
            Err(_) => "disconnected",
        }),
        None => None,
    };

    Json(json!({
        "status": "healthy",
        "database": database,
        "card_payments": state.flutterwave.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
