use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    Collection, Database,
};

use crate::database::repository::{MarketStore, Record, StintFilter};
use crate::errors::{AppError, Result};
use crate::models::{
    application::Application,
    dispute::Dispute,
    payment_intent::{IntentStatus, PaymentIntent},
    payout::Payout,
    stint::Stint,
};

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        MongoStore { db }
    }

    fn collection<T: Record>(&self) -> Collection<T> {
        self.db.collection(T::COLLECTION)
    }

    async fn insert<T: Record>(&self, record: &T) -> Result<()> {
        self.collection::<T>()
            .insert_one(record)
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_by_id<T: Record>(&self, id: &str) -> Result<Option<T>> {
        Ok(self.collection::<T>().find_one(doc! { "_id": id }).await?)
    }

    async fn find_one_where<T: Record>(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.collection::<T>().find_one(filter).await?)
    }

    async fn find_many<T: Record>(&self, filter: Document) -> Result<Vec<T>> {
        let cursor = self.collection::<T>().find(filter).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Conditional replace keyed on `_id` and the version the caller loaded.
    async fn replace<T: Record>(&self, record: &mut T) -> Result<()> {
        let expected = record.version();
        record.set_version(expected + 1);

        let filter = doc! { "_id": record.id(), "version": expected };
        let result = self.collection::<T>().replace_one(filter, &*record).await;

        match result {
            Ok(outcome) if outcome.matched_count == 1 => Ok(()),
            Ok(_) => {
                record.set_version(expected);
                Err(AppError::ConcurrentModification {
                    entity: T::ENTITY,
                    id: record.id().to_string(),
                })
            }
            Err(e) => {
                record.set_version(expected);
                Err(map_write_error(e))
            }
        }
    }
}

fn map_write_error(err: mongodb::error::Error) -> AppError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == DUPLICATE_KEY_CODE {
            return AppError::DuplicateKey;
        }
    }
    AppError::MongoDB(err)
}

#[async_trait]
impl MarketStore for MongoStore {
    async fn insert_stint(&self, stint: &Stint) -> Result<()> {
        self.insert(stint).await
    }

    async fn get_stint(&self, id: &str) -> Result<Option<Stint>> {
        self.find_by_id(id).await
    }

    async fn list_stints(&self, filter: &StintFilter) -> Result<Vec<Stint>> {
        let mut query = doc! {};
        if let Some(employer_id) = &filter.employer_id {
            query.insert("employer_id", employer_id);
        }
        if let Some(status) = filter.status {
            query.insert("status", status.as_str());
        }

        let mut stints: Vec<Stint> = self.find_many(query).await?;
        stints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stints)
    }

    async fn save_stint(&self, stint: &mut Stint) -> Result<()> {
        self.replace(stint).await
    }

    async fn insert_application(&self, application: &Application) -> Result<()> {
        self.insert(application).await
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        self.find_by_id(id).await
    }

    async fn applications_for_stint(&self, stint_id: &str) -> Result<Vec<Application>> {
        let mut applications: Vec<Application> =
            self.find_many(doc! { "stint_id": stint_id }).await?;
        applications.sort_by(|a, b| a.applied_at.cmp(&b.applied_at));
        Ok(applications)
    }

    async fn save_application(&self, application: &mut Application) -> Result<()> {
        self.replace(application).await
    }

    async fn insert_intent(&self, intent: &PaymentIntent) -> Result<()> {
        self.insert(intent).await
    }

    async fn get_intent(&self, id: &str) -> Result<Option<PaymentIntent>> {
        self.find_by_id(id).await
    }

    async fn intent_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<PaymentIntent>> {
        self.find_one_where(doc! { "gateway_ref": gateway_ref }).await
    }

    async fn intents_for_stint(&self, stint_id: &str) -> Result<Vec<PaymentIntent>> {
        self.find_many(doc! { "stint_id": stint_id }).await
    }

    async fn active_intents(&self) -> Result<Vec<PaymentIntent>> {
        let active: Vec<&str> = IntentStatus::ACTIVE.iter().map(|s| s.as_str()).collect();
        self.find_many(doc! { "status": { "$in": active } }).await
    }

    async fn save_intent(&self, intent: &mut PaymentIntent) -> Result<()> {
        self.replace(intent).await
    }

    async fn insert_dispute(&self, dispute: &Dispute) -> Result<()> {
        self.insert(dispute).await
    }

    async fn get_dispute(&self, id: &str) -> Result<Option<Dispute>> {
        self.find_by_id(id).await
    }

    async fn disputes_for_stint(&self, stint_id: &str) -> Result<Vec<Dispute>> {
        self.find_many(doc! { "stint_id": stint_id }).await
    }

    async fn save_dispute(&self, dispute: &mut Dispute) -> Result<()> {
        self.replace(dispute).await
    }

    async fn insert_payout(&self, payout: &Payout) -> Result<()> {
        self.insert(payout).await
    }

    async fn payout_for_stint(&self, stint_id: &str) -> Result<Option<Payout>> {
        self.find_one_where(doc! { "stint_id": stint_id }).await
    }

    async fn payout_by_gateway_ref(&self, gateway_ref: &str) -> Result<Option<Payout>> {
        self.find_one_where(doc! { "gateway_ref": gateway_ref }).await
    }

    async fn save_payout(&self, payout: &mut Payout) -> Result<()> {
        self.replace(payout).await
    }
}
