//! In-memory `FarmerStore` used by the engine and scheduler tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use super::models::{
    AdvanceBatch, Alert, AlertOutcome, DailyValue, Farmer, GddLog, NewAlert, NewFarmer,
    SoilMoistureLog,
};
use super::store::FarmerStore;
use crate::errors::StoreError;

#[derive(Default)]
struct Inner {
    farmers: Vec<Farmer>,
    gdd: BTreeMap<(Uuid, NaiveDate), f64>,
    moisture: BTreeMap<(Uuid, NaiveDate), f64>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// When set, the next `commit_advance` fails as a database error would.
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert a farmer with explicit progress, bypassing registration.
    pub fn seed_farmer(&self, farmer: Farmer) {
        self.inner.lock().unwrap().farmers.push(farmer);
    }

    /// Overwrite `last_processed_date` behind the engine's back.
    pub fn set_last_processed(&self, farmer_id: Uuid, date: Option<NaiveDate>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(f) = inner.farmers.iter_mut().find(|f| f.id == farmer_id) {
            f.last_processed_date = date;
        }
    }

    pub fn alerts(&self, farmer_id: Uuid) -> Vec<Alert> {
        let inner = self.inner.lock().unwrap();
        inner
            .alerts
            .iter()
            .filter(|a| a.farmer_id == farmer_id)
            .cloned()
            .collect()
    }

    fn enqueue(inner: &mut Inner, farmer_id: Uuid, phone: &str, alert: &NewAlert) {
        let exists = inner
            .alerts
            .iter()
            .any(|a| a.farmer_id == farmer_id && a.alert_key == alert.key);
        if exists {
            return;
        }
        inner.alerts.push(Alert {
            id: Uuid::new_v4(),
            farmer_id,
            alert_key: alert.key.clone(),
            phone: phone.to_string(),
            message: alert.message.clone(),
            status: "pending".to_string(),
            error: None,
            created_at: Utc::now(),
            sent_at: None,
        });
    }
}

#[async_trait]
impl FarmerStore for MemoryStore {
    async fn insert_farmer(&self, new: &NewFarmer) -> Result<Farmer, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.farmers.iter().any(|f| f.username == new.username) {
            return Err(StoreError::DuplicateIdentity(format!(
                "username '{}'",
                new.username
            )));
        }
        if inner.farmers.iter().any(|f| f.phone == new.phone) {
            return Err(StoreError::DuplicateIdentity(format!("phone '{}'", new.phone)));
        }
        let now = Utc::now();
        let farmer = Farmer {
            id: Uuid::new_v4(),
            username: new.username.clone(),
            phone: new.phone.clone(),
            planting_date: new.planting_date,
            latitude: new.latitude,
            longitude: new.longitude,
            gdd_accumulated: 0.0,
            current_stage_index: 0,
            registration_date: new.registration_date,
            last_processed_date: None,
            created_at: now,
            updated_at: now,
        };
        inner.farmers.push(farmer.clone());
        Ok(farmer)
    }

    async fn get_farmer(&self, id: Uuid) -> Result<Option<Farmer>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.farmers.iter().find(|f| f.id == id).cloned())
    }

    async fn list_farmer_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.farmers.iter().map(|f| f.id).collect())
    }

    async fn commit_advance(&self, batch: &AdvanceBatch) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut inner = self.inner.lock().unwrap();
        let farmer = inner
            .farmers
            .iter_mut()
            .find(|f| f.id == batch.farmer_id)
            .filter(|f| f.last_processed_date == batch.expected_last_processed)
            .ok_or(StoreError::Conflict(batch.farmer_id))?;
        farmer.gdd_accumulated = batch.gdd_accumulated;
        farmer.current_stage_index = batch.current_stage_index;
        farmer.last_processed_date = batch.last_processed_date;
        farmer.updated_at = Utc::now();

        for entry in &batch.gdd_logs {
            inner.gdd.insert((batch.farmer_id, entry.date), entry.value);
        }
        for entry in &batch.moisture_logs {
            inner.moisture.insert((batch.farmer_id, entry.date), entry.value);
        }
        for alert in &batch.alerts {
            Self::enqueue(&mut inner, batch.farmer_id, &batch.phone, alert);
        }
        Ok(())
    }

    async fn record_moisture(
        &self,
        farmer: &Farmer,
        reading: DailyValue,
        alert: Option<&NewAlert>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.moisture.insert((farmer.id, reading.date), reading.value);
        if let Some(alert) = alert {
            Self::enqueue(&mut inner, farmer.id, &farmer.phone, alert);
        }
        Ok(())
    }

    async fn enqueue_alerts(&self, farmer: &Farmer, alerts: &[NewAlert]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for alert in alerts {
            Self::enqueue(&mut inner, farmer.id, &farmer.phone, alert);
        }
        Ok(())
    }

    async fn pending_alerts(&self, farmer_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .alerts
            .iter()
            .filter(|a| a.farmer_id == farmer_id && a.status == "pending")
            .cloned()
            .collect())
    }

    async fn mark_alert(&self, alert_id: Uuid, outcome: &AlertOutcome) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            match outcome {
                AlertOutcome::Sent => {
                    alert.status = "sent".to_string();
                    alert.sent_at = Some(Utc::now());
                }
                AlertOutcome::Failed(reason) => {
                    alert.status = "failed".to_string();
                    alert.error = Some(reason.clone());
                }
            }
        }
        Ok(())
    }

    async fn gdd_logs(&self, farmer_id: Uuid) -> Result<Vec<GddLog>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .gdd
            .iter()
            .filter(|((id, _), _)| *id == farmer_id)
            .map(|((id, date), gdd)| GddLog {
                farmer_id: *id,
                date: *date,
                gdd: *gdd,
            })
            .collect())
    }

    async fn moisture_logs(&self, farmer_id: Uuid) -> Result<Vec<SoilMoistureLog>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .moisture
            .iter()
            .filter(|((id, _), _)| *id == farmer_id)
            .map(|((id, date), moisture)| SoilMoistureLog {
                farmer_id: *id,
                date: *date,
                moisture: *moisture,
            })
            .collect())
    }
}
