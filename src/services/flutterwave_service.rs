// services/flutterwave_service.rs
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::FlutterwaveConfig;
use crate::errors::{AppError, Result};
use crate::models::payment_intent::FailureKind;
use crate::services::gateway::GatewayStatus;

#[derive(Debug, Serialize)]
pub struct PaymentLinkRequest<'a> {
    pub tx_ref: &'a str,
    pub amount: i64,
    pub currency: &'a str,
    pub redirect_url: &'a str,
    pub customer: Customer<'a>,
    pub customizations: Customizations<'a>,
}

#[derive(Debug, Serialize)]
pub struct Customer<'a> {
    pub email: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Customizations<'a> {
    pub title: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct FlutterwaveEnvelope<T> {
    pub status: String,
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentLink {
    pub link: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifiedTransaction {
    pub id: i64,
    pub tx_ref: String,
    pub flw_ref: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub processor_response: Option<String>,
}

/// Body of a Flutterwave webhook. Only the reference is trusted; the outcome
/// is always re-read through the verify endpoint.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub event: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub tx_ref: String,
    pub status: Option<String>,
}

pub struct FlutterwaveService {
    config: FlutterwaveConfig,
    client: Client,
}

impl FlutterwaveService {
    pub fn new(config: FlutterwaveConfig, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(FlutterwaveService { config, client })
    }

    /// Flutterwave signs webhooks by echoing the configured secret hash.
    pub fn verify_webhook(&self, verif_hash: Option<&str>) -> bool {
        verif_hash == Some(self.config.webhook_hash.as_str())
    }

    pub async fn create_payment_link(
        &self,
        tx_ref: &str,
        amount: i64,
        currency: &str,
        email: &str,
        redirect_url: &str,
    ) -> Result<String> {
        info!("Card: creating payment link for {} - {} {}", tx_ref, currency, amount);

        let request = PaymentLinkRequest {
            tx_ref,
            amount,
            currency,
            redirect_url,
            customer: Customer { email },
            customizations: Customizations {
                title: "Stint booking",
            },
        };

        let response = self
            .client
            .post(format!("{}/payments", self.config.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.secret_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Payment link request failed: {} - {}", status, body);
            return Err(if status.is_server_error() {
                AppError::gateway_unavailable(format!("card processor returned {}", status))
            } else {
                AppError::external_api(format!("card processor rejected the request: {}", status))
            });
        }

        let envelope: FlutterwaveEnvelope<PaymentLink> = response.json().await?;
        match envelope.data {
            Some(data) if envelope.status == "success" => Ok(data.link),
            _ => Err(AppError::external_api(
                envelope
                    .message
                    .unwrap_or_else(|| "payment link was not issued".to_string()),
            )),
        }
    }

    pub async fn verify_by_reference(
        &self,
        tx_ref: &str,
        expected_amount: i64,
        expected_currency: &str,
    ) -> Result<GatewayStatus> {
        let response = self
            .client
            .get(format!("{}/transactions/verify_by_reference", self.config.base_url))
            .query(&[("tx_ref", tx_ref)])
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.secret_key))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // No charge attempt yet; the customer has not finished checkout.
            return Ok(GatewayStatus::Pending);
        }
        if status.is_server_error() {
            return Err(AppError::gateway_unavailable(format!(
                "card verify returned {}",
                status
            )));
        }

        let envelope: FlutterwaveEnvelope<VerifiedTransaction> = response.json().await?;
        let Some(tx) = envelope.data else {
            return Ok(GatewayStatus::Pending);
        };
        Ok(interpret_transaction(&tx, expected_amount, expected_currency))
    }
}

fn interpret_transaction(
    tx: &VerifiedTransaction,
    expected_amount: i64,
    expected_currency: &str,
) -> GatewayStatus {
    match tx.status.as_str() {
        "successful" => {
            if tx.amount < expected_amount as f64 || tx.currency != expected_currency {
                warn!(
                    tx_ref = %tx.tx_ref,
                    "card charge of {} {} does not cover {} {}",
                    tx.currency, tx.amount, expected_currency, expected_amount
                );
                return GatewayStatus::Failed {
                    kind: FailureKind::Declined,
                    reason: "charged amount does not match the booking total".to_string(),
                };
            }
            GatewayStatus::Succeeded {
                receipt: tx.flw_ref.clone().or_else(|| Some(tx.id.to_string())),
            }
        }
        "failed" => {
            let reason = tx
                .processor_response
                .clone()
                .unwrap_or_else(|| "card payment failed".to_string());
            let kind = if reason.to_lowercase().contains("insufficient") {
                FailureKind::InsufficientFunds
            } else {
                FailureKind::Declined
            };
            GatewayStatus::Failed { kind, reason }
        }
        _ => GatewayStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(status: &str, amount: f64) -> VerifiedTransaction {
        VerifiedTransaction {
            id: 42,
            tx_ref: "pi_1".into(),
            flw_ref: Some("FLW-1".into()),
            amount,
            currency: "KES".into(),
            status: status.into(),
            processor_response: Some("Insufficient funds".into()),
        }
    }

    #[test]
    fn successful_charge_for_the_full_total_succeeds() {
        assert_eq!(
            interpret_transaction(&tx("successful", 5750.0), 5750, "KES"),
            GatewayStatus::Succeeded {
                receipt: Some("FLW-1".into())
            }
        );
    }

    #[test]
    fn underpaid_charge_is_not_accepted() {
        assert!(matches!(
            interpret_transaction(&tx("successful", 100.0), 5750, "KES"),
            GatewayStatus::Failed { .. }
        ));
    }

    #[test]
    fn failed_charge_carries_the_processor_reason() {
        assert_eq!(
            interpret_transaction(&tx("failed", 5750.0), 5750, "KES"),
            GatewayStatus::Failed {
                kind: FailureKind::InsufficientFunds,
                reason: "Insufficient funds".into()
            }
        );
        assert_eq!(
            interpret_transaction(&tx("pending", 5750.0), 5750, "KES"),
            GatewayStatus::Pending
        );
    }
}
