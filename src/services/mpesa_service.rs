// services/mpesa_service.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};
use crate::models::payment_intent::FailureKind;
use crate::services::gateway::GatewayStatus;

/// Daraja's answer to an STK query while the customer is still on the PIN prompt.
const STILL_PROCESSING: &str = "500.001.1001";

// C2B Structs
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Serialize)]
pub struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StkQueryResponse {
    #[serde(rename = "ResultCode")]
    pub result_code: Option<String>,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
}

// B2C Structs
#[derive(Debug, Serialize)]
pub struct B2CRequest {
    #[serde(rename = "InitiatorName")]
    pub initiator_name: String,
    #[serde(rename = "SecurityCredential")]
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "Remarks")]
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "Occasion")]
    pub occasion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct B2CResponse {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
}

/// Normalises a Kenyan mobile number to the 2547XXXXXXXX / 2541XXXXXXXX form.
///
/// Accepts the local format (07XXXXXXXX, 01XXXXXXXX) and the international
/// one with or without `+`. Anything shorter than ten digits is refused.
pub fn normalize_msisdn(phone: &str) -> Result<String> {
    let digits: String = phone
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();

    let invalid = || AppError::InvalidPhoneNumber(format!("'{}' is not a valid mobile number", phone));

    if digits.len() < 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if digits.len() == 10 && (digits.starts_with("07") || digits.starts_with("01")) {
        return Ok(format!("254{}", &digits[1..]));
    }
    if digits.len() == 12 && (digits.starts_with("2547") || digits.starts_with("2541")) {
        return Ok(digits);
    }
    Err(invalid())
}

/// Maps an STK result code to the intent outcome.
pub fn classify_result_code(code: i64, description: &str) -> GatewayStatus {
    let failed = |kind| GatewayStatus::Failed {
        kind,
        reason: description.to_string(),
    };
    match code {
        0 => GatewayStatus::Succeeded { receipt: None },
        1 => failed(FailureKind::InsufficientFunds),
        1032 => failed(FailureKind::UserCancelledPin),
        1037 => failed(FailureKind::Timeout),
        _ => failed(FailureKind::Declined),
    }
}

pub struct MpesaService {
    config: MpesaConfig,
    client: Client,
    cached_token: RwLock<Option<(String, DateTime<Utc>)>>,
}

impl MpesaService {
    pub fn new(config: MpesaConfig, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(MpesaService {
            config,
            client,
            cached_token: RwLock::new(None),
        })
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        );
        base64.encode(password_string)
    }

    async fn ensure_success(response: Response, leg: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("{} failed: {} - {}", leg, status, body);
        if status.is_server_error() {
            Err(AppError::gateway_unavailable(format!("{} failed: {}", leg, status)))
        } else {
            Err(AppError::external_api(format!("{} rejected: {}", leg, status)))
        }
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let response = self
            .client
            .get(&self.config.urls().auth)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;
        let response = Self::ensure_success(response, "M-Pesa auth").await?;
        let auth_response: AuthResponse = response.json().await?;

        let lifetime = auth_response.expires_in.parse::<i64>().unwrap_or(3599);
        {
            let mut cached = self.cached_token.write().await;
            *cached = Some((
                auth_response.access_token.clone(),
                Utc::now() + Duration::seconds(lifetime),
            ));
        }

        Ok(auth_response.access_token)
    }

    // C2B: Customer to Business
    pub async fn initiate_stk_push(
        &self,
        msisdn: &str,
        amount: i64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        info!("C2B: STK push for {} - KSh {}", msisdn, amount);

        if amount <= 0 {
            return Err(AppError::InvalidAmount("Amount must be greater than 0".to_string()));
        }

        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let stk_request = StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: msisdn.to_string(),
            party_b: self.config.short_code.clone(),
            phone_number: msisdn.to_string(),
            callback_url: self.config.callback_url.clone(),
            // Daraja caps the reference at 12 characters.
            account_reference: account_reference.chars().take(12).collect(),
            transaction_desc: transaction_desc.to_string(),
        };

        let response = self
            .client
            .post(&self.config.urls().stk_push)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&stk_request)
            .send()
            .await?;
        let response = Self::ensure_success(response, "C2B").await?;

        let stk_response: StkPushResponse = response.json().await?;
        if stk_response.response_code != "0" {
            return Err(AppError::external_api(format!(
                "STK push refused: {}",
                stk_response.response_description
            )));
        }
        info!("C2B initiated: {}", stk_response.checkout_request_id);
        Ok(stk_response)
    }

    pub async fn query_stk_status(&self, checkout_request_id: &str) -> Result<GatewayStatus> {
        let access_token = self.get_access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let query = StkQueryRequest {
            business_short_code: self.config.short_code.clone(),
            password: self.generate_password(&timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(&self.config.urls().stk_query)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&query)
            .send()
            .await?;

        let status = response.status();
        let body: StkQueryResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_server_error() => {
                return Err(AppError::gateway_unavailable(format!("STK query failed: {}", e)))
            }
            Err(e) => return Err(e.into()),
        };

        if body.error_code.as_deref() == Some(STILL_PROCESSING) {
            return Ok(GatewayStatus::Pending);
        }
        if let Some(code) = body.error_code {
            warn!("STK query error {}: {:?}", code, body.error_message);
            return Err(AppError::gateway_unavailable(format!("STK query error {}", code)));
        }

        match body.result_code.as_deref().map(str::parse::<i64>) {
            Some(Ok(code)) => Ok(classify_result_code(
                code,
                body.result_desc.as_deref().unwrap_or_default(),
            )),
            _ => Ok(GatewayStatus::Pending),
        }
    }

    // B2C: Business to Customer
    pub async fn send_b2c_payment(
        &self,
        msisdn: &str,
        amount: i64,
        command_id: &str,
        remarks: &str,
        occasion: Option<&str>,
    ) -> Result<B2CResponse> {
        info!("B2C: Sending to {} - KSh {}", msisdn, amount);

        if amount <= 0 {
            return Err(AppError::InvalidAmount("Amount must be greater than 0".to_string()));
        }

        let access_token = self.get_access_token().await?;

        let b2c_request = B2CRequest {
            initiator_name: self.config.initiator_name.clone(),
            security_credential: self.config.security_credential.clone(),
            command_id: command_id.to_string(),
            amount: amount.to_string(),
            party_a: self.config.short_code.clone(),
            party_b: msisdn.to_string(),
            remarks: remarks.to_string(),
            queue_timeout_url: self.config.b2c_queue_timeout_url.clone(),
            result_url: self.config.b2c_result_url.clone(),
            occasion: occasion.map(|s| s.to_string()),
        };

        let response = self
            .client
            .post(&self.config.urls().b2c)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&b2c_request)
            .send()
            .await?;
        let response = Self::ensure_success(response, "B2C").await?;

        let b2c_response: B2CResponse = response.json().await?;
        info!("B2C initiated: {}", b2c_response.conversation_id);
        Ok(b2c_response)
    }
}
