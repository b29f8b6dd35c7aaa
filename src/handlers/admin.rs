// Manual triggers for the housekeeping the sweeper runs on a timer.
use axum::{extract::State, response::Json, Extension};
use serde_json::{json, Value};

use crate::{errors::Result, models::caller::Caller, state::AppState};

pub async fn settle_elapsed(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Value>> {
    caller.require_admin()?;
    let report = state.market.settle_elapsed().await?;
    Ok(Json(json!({
        "success": true,
        "paid_out": report.paid_out,
        "awaiting_result": report.awaiting_result,
        "failed": report.failed,
    })))
}

pub async fn expire_intents(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Value>> {
    caller.require_admin()?;
    let expired = state.market.expire_stale_intents().await?;
    Ok(Json(json!({ "success": true, "expired": expired })))
}
