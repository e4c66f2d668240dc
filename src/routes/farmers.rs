use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, ErrorResponse};
use crate::helpers::dec_to_f64;
use crate::services::engine::{Engine, FarmerOverview, Registration};
use crate::services::stages::CropStage;

/// Request body for POST /api/v1/farmers.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterFarmerRequest {
    /// Unique login name
    pub username: String,
    /// Unique phone number SMS alerts are sent to (e.g. "94771234567")
    pub phone: String,
    /// Sowing date, YYYY-MM-DD
    pub planting_date: NaiveDate,
    /// Field latitude (WGS84, decimal degrees)
    pub latitude: f64,
    /// Field longitude (WGS84, decimal degrees)
    pub longitude: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StageInfo {
    /// Position in the stage sequence (0 = Germination)
    pub index: usize,
    pub name: String,
    /// Cumulative GDD at which this stage begins
    pub threshold: f64,
    pub advice: String,
}

impl StageInfo {
    fn new(index: usize, stage: &CropStage) -> Self {
        Self {
            index,
            name: stage.name.to_string(),
            threshold: stage.threshold,
            advice: stage.advice.to_string(),
        }
    }
}

/// Response type for farmer registration and lookup.
#[derive(Debug, Serialize, ToSchema)]
pub struct FarmerResponse {
    pub id: Uuid,
    pub username: String,
    pub phone: String,
    pub planting_date: NaiveDate,
    pub registration_date: NaiveDate,
    pub latitude: f64,
    pub longitude: f64,
    /// Growing degree-days accumulated since planting
    pub gdd_accumulated: f64,
    pub current_stage: StageInfo,
    /// Absent once the crop has reached maturity
    pub next_stage: Option<StageInfo>,
    /// Last day included in `gdd_accumulated`
    pub last_processed_date: Option<NaiveDate>,
}

impl From<FarmerOverview> for FarmerResponse {
    fn from(o: FarmerOverview) -> Self {
        let index = usize::try_from(o.farmer.current_stage_index).unwrap_or(0);
        Self {
            id: o.farmer.id,
            username: o.farmer.username,
            phone: o.farmer.phone,
            planting_date: o.farmer.planting_date,
            registration_date: o.farmer.registration_date,
            latitude: dec_to_f64(o.farmer.latitude),
            longitude: dec_to_f64(o.farmer.longitude),
            gdd_accumulated: o.farmer.gdd_accumulated,
            current_stage: StageInfo::new(index, o.stage),
            next_stage: o.next_stage.map(|s| StageInfo::new(index + 1, s)),
            last_processed_date: o.farmer.last_processed_date,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MoisturePoint {
    pub date: NaiveDate,
    /// Daily mean volumetric soil moisture, 0-7 cm (m³/m³)
    pub moisture: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GddPoint {
    pub date: NaiveDate,
    /// GDD earned on that day (not cumulative)
    pub gdd: f64,
}

/// Response type for GET /api/v1/farmers/:id/chart-data.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChartDataResponse {
    pub moisture_data: Vec<MoisturePoint>,
    pub gdd_data: Vec<GddPoint>,
}

/// Register a farmer.
///
/// Backfills GDD from the planting date up to yesterday before responding,
/// then sends the registration SMS and a summary SMS.
#[utoipa::path(
    post,
    path = "/api/v1/farmers",
    tag = "Farmers",
    request_body = RegisterFarmerRequest,
    responses(
        (status = 201, description = "Farmer registered and backfilled", body = FarmerResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 409, description = "Username or phone already registered", body = ErrorResponse),
    )
)]
pub async fn register_farmer(
    State(engine): State<Engine>,
    Json(req): Json<RegisterFarmerRequest>,
) -> Result<(StatusCode, Json<FarmerResponse>), AppError> {
    let registration = Registration {
        username: req.username,
        phone: req.phone,
        planting_date: req.planting_date,
        latitude: req.latitude,
        longitude: req.longitude,
    };
    let farmer = engine
        .register_farmer(registration, Utc::now().date_naive())
        .await?;
    let overview = engine.farmer_overview(farmer.id).await?;
    Ok((StatusCode::CREATED, Json(overview.into())))
}

/// Get a farmer with their current and next crop stage.
#[utoipa::path(
    get,
    path = "/api/v1/farmers/{id}",
    tag = "Farmers",
    params(
        ("id" = Uuid, Path, description = "Farmer UUID"),
    ),
    responses(
        (status = 200, description = "Farmer overview", body = FarmerResponse),
        (status = 404, description = "Farmer not found", body = ErrorResponse),
    )
)]
pub async fn get_farmer(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<FarmerResponse>, AppError> {
    let overview = engine.farmer_overview(id).await?;
    Ok(Json(overview.into()))
}

/// Get the daily soil moisture and GDD series for charting, ordered by date.
#[utoipa::path(
    get,
    path = "/api/v1/farmers/{id}/chart-data",
    tag = "Farmers",
    params(
        ("id" = Uuid, Path, description = "Farmer UUID"),
    ),
    responses(
        (status = 200, description = "Daily series", body = ChartDataResponse),
        (status = 404, description = "Farmer not found", body = ErrorResponse),
    )
)]
pub async fn get_chart_data(
    State(engine): State<Engine>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChartDataResponse>, AppError> {
    let moisture = engine.moisture_series(id).await?;
    let gdd = engine.gdd_series(id).await?;

    Ok(Json(ChartDataResponse {
        moisture_data: moisture
            .into_iter()
            .map(|m| MoisturePoint {
                date: m.date,
                moisture: m.moisture,
            })
            .collect(),
        gdd_data: gdd
            .into_iter()
            .map(|g| GddPoint {
                date: g.date,
                gdd: g.gdd,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::services::engine::tests::{build_engine, RecordingSink, ScriptedClimate};
    use axum::response::IntoResponse;
    use chrono::Days;
    use std::sync::Arc;

    fn request(username: &str, phone: &str, days_ago: u64) -> RegisterFarmerRequest {
        RegisterFarmerRequest {
            username: username.to_string(),
            phone: phone.to_string(),
            planting_date: Utc::now()
                .date_naive()
                .checked_sub_days(Days::new(days_ago))
                .unwrap(),
            latitude: 7.2525,
            longitude: 80.5913,
        }
    }

    fn engine() -> Engine {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        build_engine(&store, ScriptedClimate::constant(30.0, 20.0, 0.3), &sink).0
    }

    #[tokio::test]
    async fn test_register_returns_created_overview() {
        let engine = engine();
        let (status, Json(body)) = register_farmer(
            State(engine.clone()),
            Json(request("kamal", "94771234567", 30)),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.gdd_accumulated, 450.0);
        assert_eq!(body.current_stage.name, "Maximum Tillering");
        assert_eq!(body.current_stage.index, 1);
        assert_eq!(body.next_stage.as_ref().map(|s| s.threshold), Some(1100.0));
        assert!((body.latitude - 7.2525).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_register_duplicate_is_conflict() {
        let engine = engine();
        register_farmer(State(engine.clone()), Json(request("kamal", "94771234567", 1)))
            .await
            .unwrap();

        let err = register_farmer(State(engine), Json(request("kamal", "94770000000", 1)))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_farmer_is_not_found() {
        let err = get_farmer(State(engine()), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chart_data_is_ordered_by_date() {
        let engine = engine();
        let (_, Json(farmer)) =
            register_farmer(State(engine.clone()), Json(request("nimal", "94779876543", 10)))
                .await
                .unwrap();

        let Json(chart) = get_chart_data(State(engine), Path(farmer.id)).await.unwrap();

        assert_eq!(chart.gdd_data.len(), 10);
        assert!(chart.gdd_data.windows(2).all(|w| w[0].date < w[1].date));
        // Ten backfilled days plus today's reading from the moisture refresh.
        assert_eq!(chart.moisture_data.len(), 11);
        assert!(chart.moisture_data.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(chart.moisture_data.last().unwrap().date, Utc::now().date_naive());
    }
}
