use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Duration;
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::{
    dtos::payment_dtos::{
        AwaitIntentRequest, CardPaymentRequest, CreateIntentRequest, FeeQuery,
        MpesaPaymentRequest,
    },
    errors::Result,
    models::caller::Caller,
    services::resolution::{IntentResolver, PollingResolver},
    state::AppState,
};

const MAX_AWAIT_SECS: u64 = 30;

/// Public fee preview.
pub async fn quote_fees(
    State(state): State<AppState>,
    Query(query): Query<FeeQuery>,
) -> Result<Json<Value>> {
    let currency = query.currency.as_deref().unwrap_or("KES");
    let fees = state.market.quote(query.amount, currency)?;
    Ok(Json(json!({ "success": true, "fees": fees })))
}

pub async fn create_intent(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    payload.validate()?;
    let intent = state.market.create_intent(&caller, payload.into()).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "intent": intent })),
    ))
}

pub async fn get_intent(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let intent = state.market.get_intent(&caller, &id).await?;
    let now = state.market.now();
    Ok(Json(json!({
        "success": true,
        "intent": intent,
        "seconds_remaining": intent.seconds_remaining(now),
        "poll_interval_secs": state.market.policy().poll_interval_secs,
    })))
}

pub async fn initiate_mpesa(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(payload): Json<MpesaPaymentRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;
    let prompt = state
        .market
        .initiate_mpesa(&caller, &id, &payload.phone_number)
        .await?;
    info!("📱 STK push sent for intent {}", id);
    Ok(Json(json!({
        "success": true,
        "intent": prompt.intent,
        "customer_message": prompt.customer_message,
        "countdown_secs": prompt.countdown_secs,
        "poll_interval_secs": prompt.poll_interval_secs,
    })))
}

pub async fn initiate_card(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(payload): Json<CardPaymentRequest>,
) -> Result<Json<Value>> {
    payload.validate()?;
    let intent = state
        .market
        .initiate_card(&caller, &id, payload.email.as_deref(), &payload.redirect_url)
        .await?;
    Ok(Json(json!({
        "success": true,
        "checkout_url": intent.checkout_url,
        "intent": intent,
    })))
}

pub async fn cancel_intent(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let intent = state.market.cancel_intent(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "intent": intent })))
}

/// Holds the request open until the intent resolves or the timeout passes.
pub async fn await_intent(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    payload: Option<Json<AwaitIntentRequest>>,
) -> Result<Json<Value>> {
    let Json(payload) = payload.unwrap_or_default();
    // Authorises the caller before waiting.
    state.market.get_intent(&caller, &id).await?;

    let wait = payload.timeout_secs.unwrap_or(MAX_AWAIT_SECS).min(MAX_AWAIT_SECS);
    let deadline = state.market.now() + Duration::seconds(wait as i64);
    let intent = PollingResolver::new(state.market.clone())
        .await_resolution(&id, deadline)
        .await?;
    Ok(Json(json!({
        "success": true,
        "resolved": intent.status.is_terminal(),
        "intent": intent,
    })))
}

pub async fn reconcile_intent(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let report = state.market.reconcile_intent(&caller, &id).await?;
    Ok(Json(json!({
        "success": true,
        "intent": report.intent,
        "stint": report.stint,
    })))
}
