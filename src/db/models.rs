use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// A registered farmer and their derived crop progress.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Farmer {
    pub id: Uuid,
    pub username: String,
    pub phone: String,
    pub planting_date: NaiveDate,
    pub latitude: Decimal,
    pub longitude: Decimal,
    /// Cumulative GDD since planting. Never decreases.
    pub gdd_accumulated: f64,
    /// Index into `CROP_STAGES`. Never decreases.
    pub current_stage_index: i32,
    pub registration_date: NaiveDate,
    /// Last calendar day whose GDD was committed. `None` before first processing.
    pub last_processed_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated registration input.
#[derive(Debug, Clone)]
pub struct NewFarmer {
    pub username: String,
    pub phone: String,
    pub planting_date: NaiveDate,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub registration_date: NaiveDate,
}

/// Incremental (not cumulative) GDD for one farmer-day.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct GddLog {
    pub farmer_id: Uuid,
    pub date: NaiveDate,
    pub gdd: f64,
}

/// Daily mean soil moisture (m³/m³) for one farmer-day.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SoilMoistureLog {
    pub farmer_id: Uuid,
    pub date: NaiveDate,
    pub moisture: f64,
}

/// A single dated value headed for one of the time-series tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyValue {
    pub date: NaiveDate,
    pub value: f64,
}

/// Outbox row for one SMS.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some only read in tests
pub struct Alert {
    pub id: Uuid,
    pub farmer_id: Uuid,
    pub alert_key: String,
    pub phone: String,
    pub message: String,
    /// "pending", "sent" or "failed"
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// An alert to enqueue. `(farmer_id, key)` is unique; re-enqueueing is a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub key: String,
    pub message: String,
}

/// Delivery result recorded against an outbox row.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Sent,
    Failed(String),
}

/// Everything one `advance` call wants to persist for a farmer, applied in a
/// single transaction.
#[derive(Debug, Clone)]
pub struct AdvanceBatch {
    pub farmer_id: Uuid,
    pub phone: String,
    /// `last_processed_date` as read at the start of the run. The commit is
    /// rejected if the stored value no longer matches.
    pub expected_last_processed: Option<NaiveDate>,
    pub gdd_accumulated: f64,
    pub current_stage_index: i32,
    pub last_processed_date: Option<NaiveDate>,
    pub gdd_logs: Vec<DailyValue>,
    pub moisture_logs: Vec<DailyValue>,
    pub alerts: Vec<NewAlert>,
}
