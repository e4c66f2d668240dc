//! Farmer Record Store contract.
//!
//! The engine only talks to persistence through [`FarmerStore`], so the
//! degree-day logic can be exercised against an in-memory store in tests.
//! [`PgStore`] is the production implementation over `sqlx::PgPool`.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    AdvanceBatch, Alert, AlertOutcome, DailyValue, Farmer, GddLog, NewAlert, NewFarmer,
    SoilMoistureLog,
};
use super::queries;
use crate::errors::StoreError;

#[async_trait]
pub trait FarmerStore: Send + Sync {
    /// Insert a farmer. Fails with `DuplicateIdentity` if the username or phone is taken.
    async fn insert_farmer(&self, new: &NewFarmer) -> Result<Farmer, StoreError>;

    async fn get_farmer(&self, id: Uuid) -> Result<Option<Farmer>, StoreError>;

    async fn list_farmer_ids(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Apply an advance batch atomically: progress fields, log upserts and
    /// alert enqueues either all land or none do. Fails with `Conflict` if
    /// `last_processed_date` no longer matches `batch.expected_last_processed`.
    async fn commit_advance(&self, batch: &AdvanceBatch) -> Result<(), StoreError>;

    /// Upsert one moisture reading and, in the same transaction, enqueue its
    /// alert if given.
    async fn record_moisture(
        &self,
        farmer: &Farmer,
        reading: DailyValue,
        alert: Option<&NewAlert>,
    ) -> Result<(), StoreError>;

    /// Enqueue standalone alerts (registration messages).
    async fn enqueue_alerts(&self, farmer: &Farmer, alerts: &[NewAlert]) -> Result<(), StoreError>;

    async fn pending_alerts(&self, farmer_id: Uuid) -> Result<Vec<Alert>, StoreError>;

    async fn mark_alert(&self, alert_id: Uuid, outcome: &AlertOutcome) -> Result<(), StoreError>;

    async fn gdd_logs(&self, farmer_id: Uuid) -> Result<Vec<GddLog>, StoreError>;

    async fn moisture_logs(&self, farmer_id: Uuid) -> Result<Vec<SoilMoistureLog>, StoreError>;
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map a unique violation on `farmers` to `DuplicateIdentity`, naming the field.
fn map_insert_error(err: sqlx::Error, new: &NewFarmer) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let what = match db_err.constraint() {
                Some("farmers_phone_key") => format!("phone '{}'", new.phone),
                _ => format!("username '{}'", new.username),
            };
            return StoreError::DuplicateIdentity(what);
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl FarmerStore for PgStore {
    async fn insert_farmer(&self, new: &NewFarmer) -> Result<Farmer, StoreError> {
        queries::insert_farmer(&self.pool, new)
            .await
            .map_err(|e| map_insert_error(e, new))
    }

    async fn get_farmer(&self, id: Uuid) -> Result<Option<Farmer>, StoreError> {
        Ok(queries::get_farmer(&self.pool, id).await?)
    }

    async fn list_farmer_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(queries::list_farmer_ids(&self.pool).await?)
    }

    async fn commit_advance(&self, batch: &AdvanceBatch) -> Result<(), StoreError> {
        // Dropping `tx` on any early return rolls the whole batch back.
        let mut tx = self.pool.begin().await?;

        let updated = queries::update_farmer_progress(
            &mut *tx,
            batch.farmer_id,
            batch.expected_last_processed,
            batch.gdd_accumulated,
            batch.current_stage_index,
            batch.last_processed_date,
        )
        .await?;
        if updated == 0 {
            return Err(StoreError::Conflict(batch.farmer_id));
        }

        for entry in &batch.gdd_logs {
            queries::upsert_gdd_log(&mut *tx, batch.farmer_id, *entry).await?;
        }
        for entry in &batch.moisture_logs {
            queries::upsert_moisture_log(&mut *tx, batch.farmer_id, *entry).await?;
        }
        for alert in &batch.alerts {
            queries::insert_alert_if_absent(&mut *tx, batch.farmer_id, &batch.phone, alert).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_moisture(
        &self,
        farmer: &Farmer,
        reading: DailyValue,
        alert: Option<&NewAlert>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        queries::upsert_moisture_log(&mut *tx, farmer.id, reading).await?;
        if let Some(alert) = alert {
            queries::insert_alert_if_absent(&mut *tx, farmer.id, &farmer.phone, alert).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn enqueue_alerts(&self, farmer: &Farmer, alerts: &[NewAlert]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for alert in alerts {
            queries::insert_alert_if_absent(&mut *tx, farmer.id, &farmer.phone, alert).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn pending_alerts(&self, farmer_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        Ok(queries::get_pending_alerts(&self.pool, farmer_id).await?)
    }

    async fn mark_alert(&self, alert_id: Uuid, outcome: &AlertOutcome) -> Result<(), StoreError> {
        let (status, error) = match outcome {
            AlertOutcome::Sent => ("sent", None),
            AlertOutcome::Failed(reason) => ("failed", Some(reason.as_str())),
        };
        Ok(queries::set_alert_status(&self.pool, alert_id, status, error).await?)
    }

    async fn gdd_logs(&self, farmer_id: Uuid) -> Result<Vec<GddLog>, StoreError> {
        Ok(queries::get_gdd_logs(&self.pool, farmer_id).await?)
    }

    async fn moisture_logs(&self, farmer_id: Uuid) -> Result<Vec<SoilMoistureLog>, StoreError> {
        Ok(queries::get_moisture_logs(&self.pool, farmer_id).await?)
    }
}
