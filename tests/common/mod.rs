#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stint_api::config::PolicyConfig;
use stint_api::database::MemoryStore;
use stint_api::errors::{AppError, Result};
use stint_api::models::{
    application::{Application, NewApplication},
    caller::{Caller, Role},
    notification::{Notification, NotificationKind},
    payment_intent::{FailureKind, PaymentIntent},
    payout::Payout,
    stint::{NewStint, Stint},
};
use stint_api::services::{
    clock::ManualClock,
    gateway::{CardInitiation, Disbursement, GatewayStatus, MpesaInitiation, PaymentGateway},
    notifier::Notifier,
    payment_intents::CreateIntent,
    Marketplace,
};

pub const PHONE: &str = "0712345678";

/// Gateway whose answers the test decides.
#[derive(Default)]
pub struct ScriptedGateway {
    status: Mutex<Option<GatewayStatus>>,
    pub unavailable: AtomicBool,
    pub fail_disbursement: AtomicBool,
    /// Answer B2C like Daraja: accepted now, settled by a later result.
    pub queue_disbursements: AtomicBool,
    pub stk_pushes: AtomicUsize,
    pub queries: AtomicUsize,
    pub disbursed: Mutex<Vec<(String, i64)>>,
}

impl ScriptedGateway {
    /// What `query_status` reports from now on. `None` means still pending.
    pub fn respond_with(&self, status: Option<GatewayStatus>) {
        *self.status.lock().unwrap() = status;
    }

    pub fn succeed(&self, receipt: &str) {
        self.respond_with(Some(GatewayStatus::Succeeded {
            receipt: Some(receipt.to_string()),
        }));
    }

    pub fn fail(&self, kind: FailureKind) {
        self.respond_with(Some(GatewayStatus::Failed {
            kind,
            reason: format!("{:?}", kind),
        }));
    }

    pub fn disbursements(&self) -> Vec<(String, i64)> {
        self.disbursed.lock().unwrap().clone()
    }
}

pub fn checkout_id(intent: &PaymentIntent) -> String {
    format!("ws_CO_{}", intent.id)
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate_mpesa(&self, intent: &PaymentIntent, _msisdn: &str) -> Result<MpesaInitiation> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::gateway_unavailable("daraja is down"));
        }
        self.stk_pushes.fetch_add(1, Ordering::SeqCst);
        Ok(MpesaInitiation {
            checkout_request_id: checkout_id(intent),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }

    async fn initiate_card(
        &self,
        intent: &PaymentIntent,
        _email: &str,
        _redirect_url: &str,
    ) -> Result<CardInitiation> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::gateway_unavailable("card processor is down"));
        }
        Ok(CardInitiation {
            reference: intent.id.clone(),
            checkout_url: format!("https://checkout.test/pay/{}", intent.id),
        })
    }

    async fn query_status(&self, _intent: &PaymentIntent) -> Result<GatewayStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::gateway_unavailable("daraja is down"));
        }
        Ok(self.status.lock().unwrap().clone().unwrap_or(GatewayStatus::Pending))
    }

    async fn disburse(&self, payout: &Payout) -> Result<Disbursement> {
        if self.fail_disbursement.load(Ordering::SeqCst) {
            return Err(AppError::external_api("B2C request rejected"));
        }
        self.disbursed
            .lock()
            .unwrap()
            .push((payout.professional_id.clone(), payout.net_amount));
        Ok(Disbursement {
            reference: format!("B2C-{}", payout.stint_id),
            settled: !self.queue_disbursements.load(Ordering::SeqCst),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds_for(&self, user_id: &str) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.notification_type)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub market: Arc<Marketplace>,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub employer: Caller,
    pub professional: Caller,
    pub rival: Caller,
    pub admin: Caller,
}

/// 06:00 UTC on the shift day; the shift starts at 08:00.
pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
}

pub fn shift_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(start_of_day()));
        let policy = PolicyConfig {
            poll_interval_secs: 0,
            gateway_timeout_secs: 2,
            ..PolicyConfig::default()
        };
        let market = Arc::new(Marketplace::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            clock.clone(),
            policy,
        ));

        Harness {
            market,
            store,
            gateway,
            notifier,
            clock,
            employer: Caller::new("emp-1", Role::Employer).with_email("hr@clinic.test"),
            professional: Caller::new("pro-1", Role::Professional).with_name("Amina"),
            rival: Caller::new("pro-2", Role::Professional).with_name("Brian"),
            admin: Caller::new("admin-1", Role::Admin),
        }
    }

    pub fn new_stint(rate: f64) -> NewStint {
        NewStint {
            role: "Nurse".to_string(),
            shift_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            city: "Nairobi".to_string(),
            offered_rate: rate,
            currency: "KES".to_string(),
        }
    }

    pub async fn post_stint(&self, rate: f64) -> Stint {
        self.market
            .post_stint(&self.employer, Self::new_stint(rate))
            .await
            .unwrap()
    }

    pub async fn apply(&self, stint: &Stint, who: &Caller, bid: Option<f64>) -> Application {
        self.market
            .apply(
                who,
                &stint.id,
                NewApplication {
                    bid_amount: bid,
                    payout_phone: Some(PHONE.to_string()),
                    ..NewApplication::default()
                },
            )
            .await
            .unwrap()
    }

    /// Accepts the application and opens a payment intent for the quoted total.
    pub async fn start_payment(&self, application: &Application) -> PaymentIntent {
        let acceptance = self.market.accept(&self.employer, &application.id).await.unwrap();
        self.market
            .create_intent(
                &self.employer,
                CreateIntent {
                    stint_id: application.stint_id.clone(),
                    application_id: application.id.clone(),
                    amount: acceptance.fees.total_amount,
                    currency: acceptance.fees.currency,
                },
            )
            .await
            .unwrap()
    }

    /// Drives a stint through application and M-Pesa payment to `confirmed`.
    pub async fn book(&self, rate: f64) -> (Stint, Application, PaymentIntent) {
        let stint = self.post_stint(rate).await;
        let application = self.apply(&stint, &self.professional, None).await;
        let intent = self.start_payment(&application).await;
        self.market
            .initiate_mpesa(&self.employer, &intent.id, PHONE)
            .await
            .unwrap();
        self.gateway.succeed("QKX1234ABC");
        let intent = self.market.get_intent(&self.employer, &intent.id).await.unwrap();
        let stint = self.market.get_stint(&stint.id).await.unwrap();
        (stint, application, intent)
    }

    /// Booked, clocked in at shift start and out eight hours later.
    pub async fn complete(&self, rate: f64) -> Stint {
        let (stint, _, _) = self.book(rate).await;
        self.clock.set(shift_start());
        self.market
            .clock_in(&self.professional, &stint.id, None)
            .await
            .unwrap();
        self.clock.advance(chrono::Duration::hours(8));
        self.market
            .clock_out(&self.professional, &stint.id, None)
            .await
            .unwrap()
    }

    pub async fn application(&self, id: &str) -> Application {
        use stint_api::database::MarketStore;
        self.store.get_application(id).await.unwrap().unwrap()
    }

    pub async fn intent(&self, id: &str) -> PaymentIntent {
        use stint_api::database::MarketStore;
        self.store.get_intent(id).await.unwrap().unwrap()
    }

    pub async fn payout(&self, stint_id: &str) -> Option<Payout> {
        use stint_api::database::MarketStore;
        self.store.payout_for_stint(stint_id).await.unwrap()
    }

    /// Lets spawned notification tasks run.
    pub async fn drain_notifications(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
