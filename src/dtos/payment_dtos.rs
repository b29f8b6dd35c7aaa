use serde::Deserialize;
use validator::Validate;

use crate::services::payment_intents::CreateIntent;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateIntentRequest {
    #[validate(length(min = 1))]
    pub stint_id: String,
    #[validate(length(min = 1))]
    pub application_id: String,
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
}

impl From<CreateIntentRequest> for CreateIntent {
    fn from(req: CreateIntentRequest) -> Self {
        CreateIntent {
            stint_id: req.stint_id,
            application_id: req.application_id,
            amount: req.amount,
            currency: req.currency,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct MpesaPaymentRequest {
    #[validate(length(min = 10, max = 16, message = "Phone number must be 10-16 characters"))]
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CardPaymentRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(url)]
    pub redirect_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AwaitIntentRequest {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FeeQuery {
    pub amount: f64,
    pub currency: Option<String>,
}

// Daraja STK callback
#[derive(Debug, Deserialize)]
pub struct MpesaCallback {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i64,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    pub fn receipt_number(&self) -> Option<String> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == "MpesaReceiptNumber")?
            .value
            .as_ref()?
            .as_str()
            .map(str::to_string)
    }
}

// Daraja B2C result, posted to MPESA_B2C_RESULT_URL
#[derive(Debug, Deserialize)]
pub struct B2CCallback {
    #[serde(rename = "Result")]
    pub result: B2CResult,
}

#[derive(Debug, Deserialize)]
pub struct B2CResult {
    #[serde(rename = "ResultType", default)]
    pub result_type: i64,

    #[serde(rename = "ResultCode")]
    pub result_code: i64,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: String,

    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: String,

    #[serde(rename = "ConversationID")]
    pub conversation_id: String,

    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
}
