// Gateway callbacks. These routes carry no bearer token.
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    dtos::payment_dtos::{B2CCallback, MpesaCallback},
    services::flutterwave_service::WebhookPayload,
    state::AppState,
};

pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<MpesaCallback>,
) -> impl IntoResponse {
    let callback = payload.body.stk_callback;
    info!(
        "📨 M-Pesa callback for {} (merchant request {}): {} {}",
        callback.checkout_request_id,
        callback.merchant_request_id,
        callback.result_code,
        callback.result_desc
    );

    let receipt = callback.receipt_number();
    if let Err(e) = state
        .market
        .handle_mpesa_callback(
            &callback.checkout_request_id,
            callback.result_code,
            &callback.result_desc,
            receipt,
        )
        .await
    {
        // Daraja does not redeliver on error; polling and reconciliation pick this up.
        error!(
            "❌ Failed to apply M-Pesa callback {}: {}",
            callback.checkout_request_id, e
        );
    }

    // Always acknowledge to M-Pesa
    Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Accepted"
    }))
}

pub async fn b2c_result_callback(
    State(state): State<AppState>,
    Json(callback): Json<B2CCallback>,
) -> impl IntoResponse {
    let result = callback.result;
    info!(
        "📨 B2C result for {} (originator {}): {} {}",
        result.conversation_id, result.originator_conversation_id, result.result_code, result.result_desc
    );

    if let Err(e) = state
        .market
        .handle_b2c_result(
            &result.conversation_id,
            result.result_code,
            &result.result_desc,
            result.transaction_id,
        )
        .await
    {
        error!("❌ Failed to apply B2C result {}: {}", result.conversation_id, e);
    }

    Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Accepted"
    }))
}

pub async fn b2c_timeout_callback(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let conversation_id = payload
        .pointer("/Result/ConversationID")
        .and_then(Value::as_str)
        .unwrap_or_default();
    warn!("⏱️ B2C queue timeout for {:?}", conversation_id);

    if !conversation_id.is_empty() {
        if let Err(e) = state.market.handle_b2c_timeout(conversation_id).await {
            error!("❌ Failed to apply B2C timeout {}: {}", conversation_id, e);
        }
    }

    Json(json!({
        "ResultCode": 0,
        "ResultDesc": "Accepted"
    }))
}

pub async fn flutterwave_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> impl IntoResponse {
    let Some(flutterwave) = &state.flutterwave else {
        warn!("card webhook received but card payments are not configured");
        return StatusCode::NOT_FOUND;
    };
    let verif_hash = headers.get("verif-hash").and_then(|h| h.to_str().ok());
    if !flutterwave.verify_webhook(verif_hash) {
        warn!("card webhook with a bad signature for {}", payload.data.tx_ref);
        return StatusCode::UNAUTHORIZED;
    }

    info!(
        "💳 Card webhook {:?} for {} ({:?})",
        payload.event, payload.data.tx_ref, payload.data.status
    );
    match state.market.handle_card_webhook(&payload.data.tx_ref).await {
        Ok(intent) => {
            info!("Card intent {} is {}", intent.id, intent.status);
            StatusCode::OK
        }
        Err(e) => {
            error!("❌ Failed to apply card webhook {}: {}", payload.data.tx_ref, e);
            // A non-2xx makes the processor redeliver.
            if e.is_retryable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            }
        }
    }
}
