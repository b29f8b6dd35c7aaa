// config.rs
use chrono::Duration;
use std::env;
use std::str::FromStr;

use crate::errors::{AppError, Result};
use crate::services::fee_calculator::{FeePolicy, DEFAULT_BOOKING_FEE_RATE, DEFAULT_PLATFORM_FEE_RATE};

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub b2c_result_url: String,
    pub b2c_queue_timeout_url: String,
    pub initiator_name: String,
    pub security_credential: String,
    pub environment: String,
}

pub struct MpesaUrls {
    pub auth: String,
    pub stk_push: String,
    pub stk_query: String,
    pub b2c: String,
}

impl MpesaConfig {
    fn from_env() -> Result<Option<Self>> {
        // The whole leg is optional; once a key is present the rest is required.
        if env::var("MPESA_CONSUMER_KEY").is_err() {
            return Ok(None);
        }

        Ok(Some(MpesaConfig {
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            short_code: required("MPESA_SHORT_CODE")?,
            passkey: required("MPESA_PASSKEY")?,
            callback_url: required("MPESA_CALLBACK_URL")?,
            b2c_result_url: required("MPESA_B2C_RESULT_URL")?,
            b2c_queue_timeout_url: required("MPESA_B2C_QUEUE_TIMEOUT_URL")?,
            initiator_name: required("MPESA_INITIATOR_NAME")?,
            security_credential: required("MPESA_SECURITY_CREDENTIAL")?,
            environment: env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
        }))
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn urls(&self) -> MpesaUrls {
        let base_url = if self.is_production() {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        };

        MpesaUrls {
            auth: format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url),
            stk_push: format!("{}/mpesa/stkpush/v1/processrequest", base_url),
            stk_query: format!("{}/mpesa/stkpushquery/v1/query", base_url),
            b2c: format!("{}/mpesa/b2c/v1/paymentrequest", base_url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    pub webhook_hash: String,
    pub base_url: String,
}

impl FlutterwaveConfig {
    fn from_env() -> Result<Option<Self>> {
        let secret_key = match env::var("FLUTTERWAVE_SECRET_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => return Ok(None),
        };
        Ok(Some(FlutterwaveConfig {
            secret_key,
            webhook_hash: required("FLUTTERWAVE_WEBHOOK_HASH")?,
            base_url: env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
        }))
    }
}

/// Marketplace policy knobs. Everything time-related is in whole units to keep
/// the environment readable.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub fees: FeePolicy,
    pub intent_ttl_minutes: i64,
    pub dispute_window_hours: i64,
    pub clock_in_grace_minutes: i64,
    pub poll_interval_secs: u64,
    pub mpesa_countdown_secs: u64,
    pub gateway_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            fees: FeePolicy::default(),
            intent_ttl_minutes: 15,
            dispute_window_hours: 24,
            clock_in_grace_minutes: 15,
            poll_interval_secs: 3,
            mpesa_countdown_secs: 120,
            gateway_timeout_secs: 10,
            sweep_interval_secs: 60,
        }
    }
}

impl PolicyConfig {
    fn from_env() -> Result<Self> {
        let defaults = PolicyConfig::default();
        Ok(PolicyConfig {
            fees: FeePolicy::new(
                parsed("BOOKING_FEE_RATE", DEFAULT_BOOKING_FEE_RATE)?,
                parsed("PLATFORM_FEE_RATE", DEFAULT_PLATFORM_FEE_RATE)?,
            )?,
            intent_ttl_minutes: parsed("INTENT_TTL_MINUTES", defaults.intent_ttl_minutes)?,
            dispute_window_hours: parsed("DISPUTE_WINDOW_HOURS", defaults.dispute_window_hours)?,
            clock_in_grace_minutes: parsed(
                "CLOCK_IN_GRACE_MINUTES",
                defaults.clock_in_grace_minutes,
            )?,
            poll_interval_secs: parsed("POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            mpesa_countdown_secs: parsed("MPESA_COUNTDOWN_SECS", defaults.mpesa_countdown_secs)?,
            gateway_timeout_secs: parsed("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout_secs)?,
            sweep_interval_secs: parsed("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
        })
    }

    pub fn intent_ttl(&self) -> Duration {
        Duration::minutes(self.intent_ttl_minutes)
    }

    pub fn dispute_window(&self) -> Duration {
        Duration::hours(self.dispute_window_hours)
    }

    pub fn clock_in_grace(&self) -> Duration {
        Duration::minutes(self.clock_in_grace_minutes)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub policy: PolicyConfig,
    pub mpesa: Option<MpesaConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = AppConfig {
            database_url: required("DATABASE_URL")?,
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "stintdb".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parsed("PORT", 10000)?,
            policy: PolicyConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
            flutterwave: FlutterwaveConfig::from_env()?,
        };

        tracing::info!(
            mpesa = config.mpesa.as_ref().map(|m| m.environment.as_str()).unwrap_or("disabled"),
            card = config.flutterwave.is_some(),
            booking_fee_rate = config.policy.fees.booking_fee_rate,
            platform_fee_rate = config.policy.fees.platform_fee_rate,
            "configuration loaded"
        );

        Ok(config)
    }

    pub fn get_config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "database_name": self.database_name,
            "mpesa_environment": self.mpesa.as_ref().map(|m| m.environment.clone()),
            "card_payments": self.flutterwave.is_some(),
            "booking_fee_rate": self.policy.fees.booking_fee_rate,
            "platform_fee_rate": self.policy.fees.platform_fee_rate,
            "intent_ttl_minutes": self.policy.intent_ttl_minutes,
            "dispute_window_hours": self.policy.dispute_window_hours,
            "port": self.port,
            "host": self.host,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| AppError::configuration(format!("{} must be set", key)))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::configuration(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}
