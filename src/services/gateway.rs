// services/gateway.rs
use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::{AppError, Result};
use crate::models::payment_intent::{FailureKind, PaymentIntent, PaymentMethod};
use crate::models::payout::Payout;
use crate::services::flutterwave_service::FlutterwaveService;
use crate::services::mpesa_service::MpesaService;

/// What the gateway currently says about a payment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayStatus {
    Pending,
    Succeeded { receipt: Option<String> },
    Failed { kind: FailureKind, reason: String },
}

#[derive(Debug, Clone)]
pub struct MpesaInitiation {
    pub checkout_request_id: String,
    pub customer_message: String,
}

#[derive(Debug, Clone)]
pub struct CardInitiation {
    pub reference: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone)]
pub struct Disbursement {
    pub reference: String,
    /// False when the processor only queued the transfer and reports the
    /// outcome later through a result callback.
    pub settled: bool,
}

/// Payment processor as seen by the core. Every call is untrusted and may be
/// slow; callers bound them with a timeout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_mpesa(&self, intent: &PaymentIntent, msisdn: &str) -> Result<MpesaInitiation>;

    async fn initiate_card(
        &self,
        intent: &PaymentIntent,
        email: &str,
        redirect_url: &str,
    ) -> Result<CardInitiation>;

    async fn query_status(&self, intent: &PaymentIntent) -> Result<GatewayStatus>;

    /// Neither Daraja nor hosted card links support revoking a request, so
    /// the default only records the intent locally.
    async fn cancel(&self, intent: &PaymentIntent) -> Result<()> {
        tracing::debug!(intent_id = %intent.id, "gateway cancel is a local-only operation");
        Ok(())
    }

    async fn disburse(&self, payout: &Payout) -> Result<Disbursement>;
}

/// Routes each call to the configured leg for the intent's method.
#[derive(Clone, Default)]
pub struct CompositeGateway {
    mpesa: Option<Arc<MpesaService>>,
    card: Option<Arc<FlutterwaveService>>,
}

impl CompositeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mpesa(mut self, mpesa: Arc<MpesaService>) -> Self {
        self.mpesa = Some(mpesa);
        self
    }

    pub fn with_card(mut self, card: Arc<FlutterwaveService>) -> Self {
        self.card = Some(card);
        self
    }

    fn mpesa(&self) -> Result<&MpesaService> {
        self.mpesa
            .as_deref()
            .ok_or_else(|| AppError::gateway_unavailable("M-Pesa payments are not configured"))
    }

    fn card(&self) -> Result<&FlutterwaveService> {
        self.card
            .as_deref()
            .ok_or_else(|| AppError::gateway_unavailable("card payments are not configured"))
    }
}

#[async_trait]
impl PaymentGateway for CompositeGateway {
    async fn initiate_mpesa(&self, intent: &PaymentIntent, msisdn: &str) -> Result<MpesaInitiation> {
        let response = self
            .mpesa()?
            .initiate_stk_push(msisdn, intent.amount, &intent.id, "Stint booking")
            .await?;
        Ok(MpesaInitiation {
            checkout_request_id: response.checkout_request_id,
            customer_message: response.customer_message,
        })
    }

    async fn initiate_card(
        &self,
        intent: &PaymentIntent,
        email: &str,
        redirect_url: &str,
    ) -> Result<CardInitiation> {
        let checkout_url = self
            .card()?
            .create_payment_link(&intent.id, intent.amount, &intent.currency, email, redirect_url)
            .await?;
        Ok(CardInitiation {
            reference: intent.id.clone(),
            checkout_url,
        })
    }

    async fn query_status(&self, intent: &PaymentIntent) -> Result<GatewayStatus> {
        match intent.method {
            Some(PaymentMethod::Mpesa) => match &intent.gateway_ref {
                Some(checkout_request_id) => self.mpesa()?.query_stk_status(checkout_request_id).await,
                None => Ok(GatewayStatus::Pending),
            },
            Some(PaymentMethod::Card) => match &intent.flutterwave_ref {
                Some(tx_ref) => {
                    self.card()?
                        .verify_by_reference(tx_ref, intent.amount, &intent.currency)
                        .await
                }
                None => Ok(GatewayStatus::Pending),
            },
            None => Ok(GatewayStatus::Pending),
        }
    }

    async fn disburse(&self, payout: &Payout) -> Result<Disbursement> {
        let destination = payout.destination.as_deref().ok_or_else(|| {
            AppError::invalid_data("payout has no M-Pesa destination; settle it manually")
        })?;
        let response = self
            .mpesa()?
            .send_b2c_payment(
                destination,
                payout.net_amount,
                "BusinessPayment",
                &format!("Stint {} payout", payout.stint_id),
                None,
            )
            .await?;
        // Daraja answers B2C asynchronously on the result URL.
        Ok(Disbursement {
            reference: response.conversation_id,
            settled: false,
        })
    }
}
