// services/fee_calculator.rs
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

pub const DEFAULT_BOOKING_FEE_RATE: f64 = 0.15;
pub const DEFAULT_PLATFORM_FEE_RATE: f64 = 0.05;

/// Largest shift amount accepted. Leaves headroom for the booking fee so the
/// employer total always fits in an `i64`.
pub const MAX_SHIFT_AMOUNT: f64 = (i64::MAX / 4) as f64;

/// Fee percentages applied to a shift amount.
///
/// The booking fee is charged to the employer on top of the shift amount; the
/// platform fee is deducted from what the professional receives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub booking_fee_rate: f64,
    pub platform_fee_rate: f64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy {
            booking_fee_rate: DEFAULT_BOOKING_FEE_RATE,
            platform_fee_rate: DEFAULT_PLATFORM_FEE_RATE,
        }
    }
}

/// Amounts in whole currency units. Locked onto a stint when it is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub shift_amount: i64,
    pub booking_fee: i64,
    pub total_amount: i64,
    pub platform_fee: i64,
    pub professional_payout: i64,
    pub currency: String,
}

impl FeePolicy {
    pub fn new(booking_fee_rate: f64, platform_fee_rate: f64) -> Result<Self> {
        for (name, rate) in [
            ("booking fee rate", booking_fee_rate),
            ("platform fee rate", platform_fee_rate),
        ] {
            if !rate.is_finite() || !(0.0..1.0).contains(&rate) {
                return Err(AppError::configuration(format!(
                    "{} must be in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        Ok(FeePolicy {
            booking_fee_rate,
            platform_fee_rate,
        })
    }

    pub fn calculate(&self, amount: f64, currency: &str) -> Result<FeeBreakdown> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(AppError::InvalidAmount(format!(
                "amount must be a finite, non-negative number (got {})",
                amount
            )));
        }
        if amount > MAX_SHIFT_AMOUNT {
            return Err(AppError::InvalidAmount(format!(
                "amount {} exceeds the maximum of {}",
                amount, MAX_SHIFT_AMOUNT
            )));
        }
        let currency = currency.trim();
        if currency.is_empty() {
            return Err(AppError::invalid_data("currency is required"));
        }

        let shift_amount = amount.round() as i64;
        let booking_fee = (amount * self.booking_fee_rate).round() as i64;
        let platform_fee = (amount * self.platform_fee_rate).round() as i64;

        let overflow = || AppError::InvalidAmount(format!("amount {} is too large", amount));
        let total_amount = shift_amount.checked_add(booking_fee).ok_or_else(overflow)?;
        let professional_payout = shift_amount.checked_sub(platform_fee).ok_or_else(overflow)?;

        Ok(FeeBreakdown {
            shift_amount,
            booking_fee,
            total_amount,
            platform_fee,
            professional_payout,
            currency: currency.to_uppercase(),
        })
    }
}

/// Fee split under the default policy.
pub fn calculate_fees(amount: f64, currency: &str) -> Result<FeeBreakdown> {
    FeePolicy::default().calculate(amount, currency)
}
