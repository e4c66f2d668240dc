//! Degree-day accumulator and crop-stage engine.
//!
//! For each farmer, `advance` walks day by day from the day after
//! `last_processed_date` (or from `planting_date`) up to yesterday, since
//! today's extremes are not final yet. It adds up GDD, moves the
//! crop stage forward and queues alerts. The whole walk is committed as one
//! batch, and the queued alerts are only dispatched after the commit succeeds.
//!
//! Failure policy:
//! - Climate data unavailable (missing, error, or timeout) → the day is
//!   skipped with zero GDD. A skipped day does not move `last_processed_date`,
//!   so a gap at the end of the range is retried next run and a gap followed
//!   by a processed day is forfeited.
//! - Commit failure → nothing from the run is persisted, the next run
//!   restarts from the same cursor.
//! - SMS failure → logged and recorded on the outbox row, never propagated.

use chrono::NaiveDate;
use futures::{stream, Future, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::{
    AdvanceBatch, AlertOutcome, DailyValue, Farmer, GddLog, NewAlert, NewFarmer, SoilMoistureLog,
};
use crate::db::store::FarmerStore;
use crate::errors::{ClimateError, EngineError};
use crate::helpers::{dec_to_f64, f64_to_coord, fmt_date};
use crate::services::climate::ClimateSource;
use crate::services::sms::NotificationSink;
use crate::services::stages::{
    calculate_gdd, stage_at, stage_message, stages_crossed, CropStage, CROP_STAGES,
    LAST_STAGE_INDEX, SOIL_MOISTURE_THRESHOLD,
};

const REGISTRATION_MESSAGE: &str =
    "Registration complete! Monitoring has started for optimal crop growth. Stay tuned for updates.";

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on each climate fetch and SMS send.
    pub call_timeout: Duration,
    /// Farmers processed in parallel during a run.
    pub concurrency: usize,
}

/// Which farmers a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    All,
    Farmer(Uuid),
}

/// Registration input as received from the presentation layer.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub phone: String,
    pub planting_date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
}

/// What one `advance` call did for a farmer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvanceOutcome {
    pub days_processed: u32,
    pub days_skipped: u32,
    pub gdd_added: f64,
    /// Stage indices entered on this run, in order.
    pub stages_entered: Vec<usize>,
    pub last_processed_date: Option<NaiveDate>,
    pub alerts_queued: usize,
}

/// Aggregate result of a run over one or more farmers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct RunSummary {
    /// Farmers the run attempted
    pub farmers_total: usize,
    /// Farmers processed without error
    pub farmers_succeeded: usize,
    /// Farmers whose processing failed and will be retried next run
    pub farmers_failed: usize,
    /// Days (catch-up) or readings (moisture refresh) recorded
    pub days_processed: u64,
    /// Alerts written to the outbox
    pub alerts_queued: usize,
}

/// A farmer together with their current and next stage.
#[derive(Debug, Clone)]
pub struct FarmerOverview {
    pub farmer: Farmer,
    pub stage: &'static CropStage,
    pub next_stage: Option<&'static CropStage>,
}

/// Per-farmer async locks so two runs never advance the same farmer at once.
#[derive(Debug, Clone, Default)]
pub struct FarmerLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FarmerLocks {
    pub async fn acquire(&self, farmer_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(farmer_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// The degree-day engine. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn FarmerStore>,
    climate: Arc<dyn ClimateSource>,
    notifier: Arc<dyn NotificationSink>,
    locks: FarmerLocks,
    settings: EngineSettings,
}

pub(crate) fn moisture_alert_key(date: NaiveDate) -> String {
    format!("moisture:{}", fmt_date(date))
}

pub(crate) fn stage_alert_key(index: usize) -> String {
    format!("stage:{}", index)
}

fn low_moisture_message(date: NaiveDate, moisture: f64) -> String {
    format!(
        "Alert: Soil moisture (0-7 cm) is low ({:.2} m³/m³) on {}. Consider irrigation.",
        moisture,
        fmt_date(date)
    )
}

fn critical_moisture_message(date: NaiveDate, moisture: f64) -> String {
    format!(
        "Alert: Soil moisture (0-7 cm) is critically low ({:.2} m³/m³) on {}. Immediate irrigation is required.",
        moisture,
        fmt_date(date)
    )
}

fn validate_registration(reg: &Registration) -> Result<(), EngineError> {
    if reg.username.trim().is_empty() {
        return Err(EngineError::InvalidInput("username must not be empty".to_string()));
    }
    if reg.phone.trim().is_empty() {
        return Err(EngineError::InvalidInput("phone must not be empty".to_string()));
    }
    if !reg.latitude.is_finite() || !(-90.0..=90.0).contains(&reg.latitude) {
        return Err(EngineError::InvalidInput(format!(
            "latitude {} is outside [-90, 90]",
            reg.latitude
        )));
    }
    if !reg.longitude.is_finite() || !(-180.0..=180.0).contains(&reg.longitude) {
        return Err(EngineError::InvalidInput(format!(
            "longitude {} is outside [-180, 180]",
            reg.longitude
        )));
    }
    Ok(())
}

impl Engine {
    pub fn new(
        store: Arc<dyn FarmerStore>,
        climate: Arc<dyn ClimateSource>,
        notifier: Arc<dyn NotificationSink>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            climate,
            notifier,
            locks: FarmerLocks::default(),
            settings,
        }
    }

    async fn load(&self, farmer_id: Uuid) -> Result<Farmer, EngineError> {
        self.store
            .get_farmer(farmer_id)
            .await?
            .ok_or(EngineError::FarmerNotFound(farmer_id))
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Bring one farmer's progress up to yesterday.
    pub async fn advance(
        &self,
        farmer_id: Uuid,
        today: NaiveDate,
    ) -> Result<AdvanceOutcome, EngineError> {
        let _guard = self.locks.acquire(farmer_id).await;
        let farmer = self.load(farmer_id).await?;

        let (batch, outcome) = self.plan_advance(&farmer, today).await;
        if let Some(batch) = batch {
            self.store.commit_advance(&batch).await?;
            tracing::info!(
                farmer_id = %farmer.id,
                days = outcome.days_processed,
                skipped = outcome.days_skipped,
                gdd_added = outcome.gdd_added,
                gdd_total = batch.gdd_accumulated,
                stage = batch.current_stage_index,
                "Advanced farmer"
            );
        }

        self.dispatch_pending(&farmer).await;
        Ok(outcome)
    }

    /// Walk the unprocessed days and build the batch to commit. Performs
    /// climate I/O but no writes.
    async fn plan_advance(
        &self,
        farmer: &Farmer,
        today: NaiveDate,
    ) -> (Option<AdvanceBatch>, AdvanceOutcome) {
        let mut outcome = AdvanceOutcome {
            last_processed_date: farmer.last_processed_date,
            ..Default::default()
        };

        let Some(yesterday) = today.pred_opt() else {
            return (None, outcome);
        };
        let start = match farmer.last_processed_date {
            Some(done) => done.succ_opt(),
            None => Some(farmer.planting_date),
        };
        let Some(start) = start.filter(|d| *d <= yesterday) else {
            return (None, outcome);
        };

        let lat = dec_to_f64(farmer.latitude);
        let lon = dec_to_f64(farmer.longitude);
        let mut gdd_total = farmer.gdd_accumulated;
        let mut stage = usize::try_from(farmer.current_stage_index)
            .unwrap_or(0)
            .min(LAST_STAGE_INDEX);
        let mut gdd_logs = Vec::new();
        let mut moisture_logs = Vec::new();
        let mut alerts = Vec::new();

        for day in start.iter_days().take_while(|d| *d <= yesterday) {
            let temperature = self
                .bounded(
                    "temperature",
                    farmer.id,
                    day,
                    self.climate.daily_temperature(lat, lon, day),
                )
                .await;
            let Some(temperature) = temperature else {
                outcome.days_skipped += 1;
                continue;
            };

            let gdd_today = calculate_gdd(temperature.max_c, temperature.min_c);
            gdd_total += gdd_today;
            gdd_logs.push(DailyValue {
                date: day,
                value: gdd_today,
            });

            let moisture = self
                .bounded(
                    "soil moisture",
                    farmer.id,
                    day,
                    self.climate.soil_moisture(lat, lon, day),
                )
                .await;
            if let Some(moisture) = moisture {
                moisture_logs.push(DailyValue {
                    date: day,
                    value: moisture,
                });
                if moisture < SOIL_MOISTURE_THRESHOLD {
                    alerts.push(NewAlert {
                        key: moisture_alert_key(day),
                        message: low_moisture_message(day, moisture),
                    });
                }
            }

            for idx in stages_crossed(stage, gdd_total) {
                tracing::debug!(
                    farmer_id = %farmer.id,
                    date = %day,
                    stage = CROP_STAGES[idx].name,
                    gdd_total,
                    "Stage threshold crossed"
                );
                alerts.push(NewAlert {
                    key: stage_alert_key(idx),
                    message: stage_message(&CROP_STAGES[idx]),
                });
                outcome.stages_entered.push(idx);
                stage = idx;
            }

            outcome.days_processed += 1;
            outcome.gdd_added += gdd_today;
            outcome.last_processed_date = Some(day);
        }

        if outcome.days_processed == 0 {
            return (None, outcome);
        }

        outcome.alerts_queued = alerts.len();
        let batch = AdvanceBatch {
            farmer_id: farmer.id,
            phone: farmer.phone.clone(),
            expected_last_processed: farmer.last_processed_date,
            gdd_accumulated: gdd_total,
            current_stage_index: stage as i32,
            last_processed_date: outcome.last_processed_date,
            gdd_logs,
            moisture_logs,
            alerts,
        };
        (Some(batch), outcome)
    }

    /// Fetch and log today's soil moisture only, independent of GDD progress.
    pub async fn refresh_moisture_only(
        &self,
        farmer_id: Uuid,
        today: NaiveDate,
    ) -> Result<Option<f64>, EngineError> {
        let _guard = self.locks.acquire(farmer_id).await;
        let farmer = self.load(farmer_id).await?;

        let lat = dec_to_f64(farmer.latitude);
        let lon = dec_to_f64(farmer.longitude);
        let reading = self
            .bounded(
                "soil moisture",
                farmer.id,
                today,
                self.climate.soil_moisture(lat, lon, today),
            )
            .await;

        if let Some(moisture) = reading {
            let alert = (moisture < SOIL_MOISTURE_THRESHOLD).then(|| NewAlert {
                key: moisture_alert_key(today),
                message: critical_moisture_message(today, moisture),
            });
            self.store
                .record_moisture(
                    &farmer,
                    DailyValue {
                        date: today,
                        value: moisture,
                    },
                    alert.as_ref(),
                )
                .await?;
            tracing::debug!(farmer_id = %farmer.id, date = %today, moisture, "Recorded soil moisture");
        }

        self.dispatch_pending(&farmer).await;
        Ok(reading)
    }

    /// Run `advance` for the target farmers, up to `concurrency` at a time.
    pub async fn run_catch_up(
        &self,
        target: RunTarget,
        today: NaiveDate,
    ) -> Result<RunSummary, EngineError> {
        let ids = self.resolve_target(target).await?;
        let engine = self;
        let results: Vec<(Uuid, Result<AdvanceOutcome, EngineError>)> = stream::iter(ids)
            .map(move |id| async move { (id, engine.advance(id, today).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut summary = RunSummary {
            farmers_total: results.len(),
            ..Default::default()
        };
        for (id, result) in results {
            match result {
                Ok(outcome) => {
                    summary.farmers_succeeded += 1;
                    summary.days_processed += u64::from(outcome.days_processed);
                    summary.alerts_queued += outcome.alerts_queued;
                }
                Err(e) => {
                    summary.farmers_failed += 1;
                    tracing::error!(farmer_id = %id, error = %e, "GDD catch-up failed for farmer");
                }
            }
        }
        Ok(summary)
    }

    /// Run `refresh_moisture_only` for the target farmers.
    pub async fn run_moisture_refresh(
        &self,
        target: RunTarget,
        today: NaiveDate,
    ) -> Result<RunSummary, EngineError> {
        let ids = self.resolve_target(target).await?;
        let engine = self;
        let results: Vec<(Uuid, Result<Option<f64>, EngineError>)> = stream::iter(ids)
            .map(move |id| async move { (id, engine.refresh_moisture_only(id, today).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let mut summary = RunSummary {
            farmers_total: results.len(),
            ..Default::default()
        };
        for (id, result) in results {
            match result {
                Ok(reading) => {
                    summary.farmers_succeeded += 1;
                    if let Some(moisture) = reading {
                        summary.days_processed += 1;
                        if moisture < SOIL_MOISTURE_THRESHOLD {
                            summary.alerts_queued += 1;
                        }
                    }
                }
                Err(e) => {
                    summary.farmers_failed += 1;
                    tracing::error!(farmer_id = %id, error = %e, "Moisture refresh failed for farmer");
                }
            }
        }
        Ok(summary)
    }

    async fn resolve_target(&self, target: RunTarget) -> Result<Vec<Uuid>, EngineError> {
        match target {
            RunTarget::All => Ok(self.store.list_farmer_ids().await?),
            RunTarget::Farmer(id) => {
                self.load(id).await?;
                Ok(vec![id])
            }
        }
    }

    /// Register a farmer, backfill their history synchronously and send the
    /// welcome messages.
    pub async fn register_farmer(
        &self,
        registration: Registration,
        today: NaiveDate,
    ) -> Result<Farmer, EngineError> {
        validate_registration(&registration)?;

        let farmer = self
            .store
            .insert_farmer(&NewFarmer {
                username: registration.username.trim().to_string(),
                phone: registration.phone.trim().to_string(),
                planting_date: registration.planting_date,
                latitude: f64_to_coord(registration.latitude),
                longitude: f64_to_coord(registration.longitude),
                registration_date: today,
            })
            .await?;
        tracing::info!(farmer_id = %farmer.id, username = %farmer.username, "Registered farmer");

        // Registration stands even if the backfill fails; the scheduler retries it.
        if let Err(e) = self.refresh_moisture_only(farmer.id, today).await {
            tracing::warn!(farmer_id = %farmer.id, error = %e, "Initial moisture refresh failed");
        }
        if let Err(e) = self.advance(farmer.id, today).await {
            tracing::warn!(farmer_id = %farmer.id, error = %e, "Initial GDD backfill failed");
        }

        let _guard = self.locks.acquire(farmer.id).await;
        let farmer = self.load(farmer.id).await?;
        let latest_moisture = self
            .store
            .moisture_logs(farmer.id)
            .await?
            .last()
            .map(|m| format!("{:.2}", m.moisture))
            .unwrap_or_else(|| "N/A".to_string());

        let welcome = [
            NewAlert {
                key: "registration".to_string(),
                message: REGISTRATION_MESSAGE.to_string(),
            },
            NewAlert {
                key: "registration-summary".to_string(),
                message: format!(
                    "AGDD: {:.1}, Soil Moisture: {}. Stay updated for optimal crop growth!",
                    farmer.gdd_accumulated, latest_moisture
                ),
            },
        ];
        self.store.enqueue_alerts(&farmer, &welcome).await?;
        self.dispatch_pending(&farmer).await;

        Ok(farmer)
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub async fn farmer_overview(&self, farmer_id: Uuid) -> Result<FarmerOverview, EngineError> {
        let farmer = self.load(farmer_id).await?;
        let stage = stage_at(farmer.current_stage_index);
        let next_stage = usize::try_from(farmer.current_stage_index)
            .ok()
            .and_then(|i| CROP_STAGES.get(i + 1));
        Ok(FarmerOverview {
            farmer,
            stage,
            next_stage,
        })
    }

    pub async fn gdd_series(&self, farmer_id: Uuid) -> Result<Vec<GddLog>, EngineError> {
        self.load(farmer_id).await?;
        Ok(self.store.gdd_logs(farmer_id).await?)
    }

    pub async fn moisture_series(
        &self,
        farmer_id: Uuid,
    ) -> Result<Vec<SoilMoistureLog>, EngineError> {
        self.load(farmer_id).await?;
        Ok(self.store.moisture_logs(farmer_id).await?)
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    /// Run a climate call under the configured timeout. Every failure mode
    /// collapses to `None` (data unavailable for that day).
    async fn bounded<T, F>(
        &self,
        what: &'static str,
        farmer_id: Uuid,
        day: NaiveDate,
        fetch: F,
    ) -> Option<T>
    where
        F: Future<Output = Result<Option<T>, ClimateError>>,
    {
        let result = match tokio::time::timeout(self.settings.call_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(ClimateError::Timeout(self.settings.call_timeout.as_secs())),
        };
        match result {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                tracing::debug!(farmer_id = %farmer_id, date = %day, "No {} data available", what);
                None
            }
            Err(e) => {
                tracing::warn!(farmer_id = %farmer_id, date = %day, error = %e, "Failed to fetch {}", what);
                None
            }
        }
    }

    /// Send every pending alert for a farmer and record the outcome. The
    /// caller must hold the farmer's lock.
    async fn dispatch_pending(&self, farmer: &Farmer) {
        let pending = match self.store.pending_alerts(farmer.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(farmer_id = %farmer.id, error = %e, "Could not load pending alerts");
                return;
            }
        };

        for alert in pending {
            let send = self.notifier.send(&alert.phone, &alert.message);
            let outcome = match tokio::time::timeout(self.settings.call_timeout, send).await {
                Ok(Ok(())) => AlertOutcome::Sent,
                Ok(Err(e)) => AlertOutcome::Failed(e.to_string()),
                Err(_) => AlertOutcome::Failed("sms send timed out".to_string()),
            };
            match &outcome {
                AlertOutcome::Sent => {
                    tracing::info!(farmer_id = %farmer.id, alert = %alert.alert_key, "Alert sent")
                }
                AlertOutcome::Failed(reason) => tracing::warn!(
                    farmer_id = %farmer.id,
                    alert = %alert.alert_key,
                    error = %reason,
                    "Alert not delivered"
                ),
            }
            if let Err(e) = self.store.mark_alert(alert.id, &outcome).await {
                tracing::warn!(farmer_id = %farmer.id, alert = %alert.alert_key, error = %e, "Could not record alert outcome");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
