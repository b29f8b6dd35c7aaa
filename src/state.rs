use mongodb::Database;
use std::sync::Arc;

use crate::services::flutterwave_service::FlutterwaveService;
use crate::services::marketplace::Marketplace;

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
    pub jwt_secret: Arc<str>,
    pub db: Option<Database>,
    pub flutterwave: Option<Arc<FlutterwaveService>>,
}

impl AppState {
    pub fn new(market: Arc<Marketplace>, jwt_secret: &str) -> Self {
        AppState {
            market,
            jwt_secret: Arc::from(jwt_secret),
            db: None,
            flutterwave: None,
        }
    }

    pub fn with_db(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_flutterwave(mut self, flutterwave: Arc<FlutterwaveService>) -> Self {
        self.flutterwave = Some(flutterwave);
        self
    }
}
