use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    dtos::dispute_dtos::{OpenDisputeRequest, ResolveDisputeRequest},
    errors::Result,
    models::caller::Caller,
    state::AppState,
};

pub async fn open_dispute(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
    Json(payload): Json<OpenDisputeRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    payload.validate()?;
    let dispute = state
        .market
        .open_dispute(&caller, &stint_id, payload.into())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "dispute": dispute })),
    ))
}

pub async fn list_disputes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
) -> Result<Json<Value>> {
    let disputes = state.market.list_disputes(&caller, &stint_id).await?;
    Ok(Json(json!({
        "success": true,
        "count": disputes.len(),
        "disputes": disputes,
    })))
}

pub async fn get_dispute(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let dispute = state.market.get_dispute(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "dispute": dispute })))
}

pub async fn review_dispute(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let dispute = state.market.review_dispute(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "dispute": dispute })))
}

pub async fn escalate_dispute(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let dispute = state.market.escalate_dispute(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "dispute": dispute })))
}

pub async fn resolve_dispute(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(payload): Json<ResolveDisputeRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;
    let resolution = state
        .market
        .resolve_dispute(&caller, &id, payload.outcome, payload.note)
        .await?;
    Ok(Json(json!({
        "success": true,
        "dispute": resolution.dispute,
        "stint": resolution.stint,
        "payout": resolution.payout,
    })))
}

pub async fn get_payout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
) -> Result<Json<Value>> {
    let payout = state.market.get_payout(&caller, &stint_id).await?;
    Ok(Json(json!({ "success": true, "payout": payout })))
}

/// Materialises the payout from the locked fees if it does not exist yet.
pub async fn compute_payout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
) -> Result<Json<Value>> {
    let payout = state.market.compute_payout(&caller, &stint_id).await?;
    Ok(Json(json!({ "success": true, "payout": payout })))
}

pub async fn release_payout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
) -> Result<Json<Value>> {
    let payout = state.market.release_payout(&caller, &stint_id).await?;
    Ok(Json(json!({ "success": true, "payout": payout })))
}

pub async fn retry_payout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
) -> Result<Json<Value>> {
    let payout = state.market.retry_payout(&caller, &stint_id).await?;
    Ok(Json(json!({ "success": true, "payout": payout })))
}
