use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use validator::Validate;

use crate::models::application::NewApplication;
use crate::models::stint::{GeoPoint, NewStint, StintStatus};

fn default_currency() -> String {
    "KES".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStintRequest {
    #[validate(length(min = 2, max = 100, message = "Role must be 2-100 characters"))]
    pub role: String,
    pub shift_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[validate(length(min = 2, max = 100, message = "City must be 2-100 characters"))]
    pub city: String,
    #[validate(range(min = 1.0, message = "Offered rate must be positive"))]
    pub offered_rate: f64,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
}

impl From<CreateStintRequest> for NewStint {
    fn from(req: CreateStintRequest) -> Self {
        NewStint {
            role: req.role.trim().to_string(),
            shift_date: req.shift_date,
            start_time: req.start_time,
            end_time: req.end_time,
            city: req.city.trim().to_string(),
            offered_rate: req.offered_rate,
            currency: req.currency,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StintListQuery {
    pub status: Option<StintStatus>,
    #[serde(default)]
    pub mine: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelStintRequest {
    #[validate(length(min = 3, max = 500, message = "Reason must be 3-500 characters"))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ApplyRequest {
    #[validate(length(max = 100))]
    pub professional_name: Option<String>,
    pub bid_amount: Option<f64>,
    #[validate(length(max = 1000, message = "Message must be at most 1000 characters"))]
    pub message: Option<String>,
    pub payout_phone: Option<String>,
}

impl From<ApplyRequest> for NewApplication {
    fn from(req: ApplyRequest) -> Self {
        NewApplication {
            professional_name: req.professional_name.unwrap_or_default(),
            bid_amount: req.bid_amount,
            message: req.message,
            payout_phone: req.payout_phone,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RejectApplicationRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Clock-in/out body. The whole body, or just the location, may be absent.
#[derive(Debug, Default, Deserialize)]
pub struct ClockEventRequest {
    pub location: Option<GeoPoint>,
}
