use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::models::{Alert, DailyValue, Farmer, GddLog, NewAlert, NewFarmer, SoilMoistureLog};

const FARMER_COLUMNS: &str = "id, username, phone, planting_date, latitude, longitude,
    gdd_accumulated, current_stage_index, registration_date, last_processed_date,
    created_at, updated_at";

/// Insert a new farmer. Unique violations on username/phone surface as
/// `sqlx::Error::Database`; the store layer maps them.
pub async fn insert_farmer(pool: &PgPool, new: &NewFarmer) -> Result<Farmer, sqlx::Error> {
    sqlx::query_as::<_, Farmer>(&format!(
        "INSERT INTO farmers (
            id, username, phone, planting_date, latitude, longitude,
            gdd_accumulated, current_stage_index, registration_date, last_processed_date,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, NULL, NOW(), NOW())
        RETURNING {}",
        FARMER_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(&new.username)
    .bind(&new.phone)
    .bind(new.planting_date)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(new.registration_date)
    .fetch_one(pool)
    .await
}

/// Number of registered farmers.
pub async fn count_farmers(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM farmers")
        .fetch_one(pool)
        .await
}

/// Get a single farmer by ID.
pub async fn get_farmer(pool: &PgPool, id: Uuid) -> Result<Option<Farmer>, sqlx::Error> {
    sqlx::query_as::<_, Farmer>(&format!("SELECT {} FROM farmers WHERE id = $1", FARMER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// All farmer IDs, oldest registration first.
pub async fn list_farmer_ids(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM farmers ORDER BY created_at, id")
        .fetch_all(pool)
        .await
}

/// Write a farmer's progress fields, but only if `last_processed_date` still
/// equals `expected`. Returns the number of rows updated (0 or 1).
pub async fn update_farmer_progress(
    conn: &mut PgConnection,
    farmer_id: Uuid,
    expected: Option<NaiveDate>,
    gdd_accumulated: f64,
    current_stage_index: i32,
    last_processed_date: Option<NaiveDate>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE farmers
         SET gdd_accumulated = $2,
             current_stage_index = $3,
             last_processed_date = $4,
             updated_at = NOW()
         WHERE id = $1
           AND last_processed_date IS NOT DISTINCT FROM $5::date",
    )
    .bind(farmer_id)
    .bind(gdd_accumulated)
    .bind(current_stage_index)
    .bind(last_processed_date)
    .bind(expected)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Upsert one GDD log entry keyed by (farmer, date).
pub async fn upsert_gdd_log(
    conn: &mut PgConnection,
    farmer_id: Uuid,
    entry: DailyValue,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO gdd_logs (farmer_id, date, gdd, created_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (farmer_id, date) DO UPDATE SET gdd = EXCLUDED.gdd",
    )
    .bind(farmer_id)
    .bind(entry.date)
    .bind(entry.value)
    .execute(conn)
    .await?;
    Ok(())
}

/// Upsert one soil moisture log entry keyed by (farmer, date).
pub async fn upsert_moisture_log(
    conn: &mut PgConnection,
    farmer_id: Uuid,
    entry: DailyValue,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO soil_moisture_logs (farmer_id, date, moisture, created_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (farmer_id, date) DO UPDATE SET moisture = EXCLUDED.moisture",
    )
    .bind(farmer_id)
    .bind(entry.date)
    .bind(entry.value)
    .execute(conn)
    .await?;
    Ok(())
}

/// Enqueue an alert unless one with the same key already exists for the farmer.
/// Returns `true` if a new row was written.
pub async fn insert_alert_if_absent(
    conn: &mut PgConnection,
    farmer_id: Uuid,
    phone: &str,
    alert: &NewAlert,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO alerts (id, farmer_id, alert_key, phone, message, status, created_at)
         VALUES ($1, $2, $3, $4, $5, 'pending', clock_timestamp())
         ON CONFLICT (farmer_id, alert_key) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(farmer_id)
    .bind(&alert.key)
    .bind(phone)
    .bind(&alert.message)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Pending alerts for a farmer, in the order they were enqueued.
pub async fn get_pending_alerts(pool: &PgPool, farmer_id: Uuid) -> Result<Vec<Alert>, sqlx::Error> {
    sqlx::query_as::<_, Alert>(
        "SELECT id, farmer_id, alert_key, phone, message, status, error, created_at, sent_at
         FROM alerts
         WHERE farmer_id = $1 AND status = 'pending'
         ORDER BY created_at, alert_key",
    )
    .bind(farmer_id)
    .fetch_all(pool)
    .await
}

/// Record the delivery outcome of an alert.
pub async fn set_alert_status(
    pool: &PgPool,
    alert_id: Uuid,
    status: &str,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE alerts
         SET status = $2,
             error = $3,
             sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END
         WHERE id = $1",
    )
    .bind(alert_id)
    .bind(status)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// GDD log for a farmer ordered by date.
pub async fn get_gdd_logs(pool: &PgPool, farmer_id: Uuid) -> Result<Vec<GddLog>, sqlx::Error> {
    sqlx::query_as::<_, GddLog>(
        "SELECT farmer_id, date, gdd FROM gdd_logs WHERE farmer_id = $1 ORDER BY date",
    )
    .bind(farmer_id)
    .fetch_all(pool)
    .await
}

/// Soil moisture log for a farmer ordered by date.
pub async fn get_moisture_logs(
    pool: &PgPool,
    farmer_id: Uuid,
) -> Result<Vec<SoilMoistureLog>, sqlx::Error> {
    sqlx::query_as::<_, SoilMoistureLog>(
        "SELECT farmer_id, date, moisture FROM soil_moisture_logs
         WHERE farmer_id = $1
         ORDER BY date",
    )
    .bind(farmer_id)
    .fetch_all(pool)
    .await
}
