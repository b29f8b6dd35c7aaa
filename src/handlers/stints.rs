use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::{
    dtos::stint_dtos::{CancelStintRequest, ClockEventRequest, CreateStintRequest, StintListQuery},
    errors::Result,
    models::caller::Caller,
    services::stint_machine::StintQuery,
    state::AppState,
};

pub async fn create_stint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<CreateStintRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    payload.validate()?;
    let stint = state.market.post_stint(&caller, payload.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "stint": stint })),
    ))
}

pub async fn list_stints(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<StintListQuery>,
) -> Result<Json<Value>> {
    let stints = state
        .market
        .list_stints(
            &caller,
            StintQuery {
                status: query.status,
                mine: query.mine,
            },
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "count": stints.len(),
        "stints": stints,
    })))
}

pub async fn get_stint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let stint = state.market.get_stint(&id).await?;
    Ok(Json(json!({ "success": true, "stint": stint })))
}

pub async fn cancel_stint(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(payload): Json<CancelStintRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;
    let stint = state.market.cancel_stint(&caller, &id, &payload.reason).await?;
    Ok(Json(json!({
        "success": true,
        "stint": stint,
        "refund_amount": stint.refund_amount,
    })))
}

pub async fn clock_in(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    payload: Option<Json<ClockEventRequest>>,
) -> Result<Json<Value>> {
    let location = payload.and_then(|Json(body)| body.location);
    let stint = state.market.clock_in(&caller, &id, location).await?;
    info!("⏱️ Clock-in recorded for stint {}", id);
    Ok(Json(json!({
        "success": true,
        "stint": stint,
        "timing": stint.clock_in_timing,
    })))
}

pub async fn clock_out(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    payload: Option<Json<ClockEventRequest>>,
) -> Result<Json<Value>> {
    let location = payload.and_then(|Json(body)| body.location);
    let stint = state.market.clock_out(&caller, &id, location).await?;
    info!("⏱️ Clock-out recorded for stint {}", id);
    Ok(Json(json!({
        "success": true,
        "stint": stint,
        "elapsed_minutes": stint.elapsed_minutes,
    })))
}
