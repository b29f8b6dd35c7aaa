use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::{
    dtos::stint_dtos::{ApplyRequest, RejectApplicationRequest},
    errors::Result,
    models::caller::Caller,
    state::AppState,
};

pub async fn apply(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
    payload: Option<Json<ApplyRequest>>,
) -> Result<(StatusCode, Json<Value>)> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate()?;
    let application = state.market.apply(&caller, &stint_id, payload.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "application": application })),
    ))
}

pub async fn list_applications(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stint_id): Path<String>,
) -> Result<Json<Value>> {
    let applications = state.market.list_applications(&caller, &stint_id).await?;
    Ok(Json(json!({
        "success": true,
        "count": applications.len(),
        "applications": applications,
    })))
}

pub async fn accept_application(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let acceptance = state.market.accept(&caller, &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Application accepted; complete payment to confirm the booking",
        "application": acceptance.application,
        "stint": acceptance.stint,
        "fees": acceptance.fees,
    })))
}

pub async fn reject_application(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    payload: Option<Json<RejectApplicationRequest>>,
) -> Result<Json<Value>> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate()?;
    let application = state.market.reject(&caller, &id, payload.reason).await?;
    Ok(Json(json!({ "success": true, "application": application })))
}

pub async fn withdraw_application(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let application = state.market.withdraw(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "application": application })))
}

pub async fn quote_application(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let fees = state.market.quote_application(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "fees": fees })))
}
