use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when the database answers, "degraded" otherwise
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the database is reachable
    pub database: bool,
    /// Number of registered farmers, absent when the database is unreachable
    pub farmers_registered: Option<i64>,
}

impl HealthResponse {
    fn from_farmer_count(count: Option<i64>) -> Self {
        let database = count.is_some();
        Self {
            status: if database { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
            farmers_registered: count,
        }
    }
}

/// Health check endpoint.
///
/// Counting farmers doubles as the connectivity probe. An unreachable
/// database still answers 200 with status "degraded".
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health_check(State(pool): State<PgPool>) -> Json<HealthResponse> {
    let count = match crate::db::queries::count_farmers(&pool).await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!("Health check: database unreachable: {}", e);
            None
        }
    };
    Json(HealthResponse::from_farmer_count(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_database_is_ok() {
        let health = HealthResponse::from_farmer_count(Some(12));
        assert_eq!(health.status, "ok");
        assert!(health.database);
        assert_eq!(health.farmers_registered, Some(12));
    }

    #[test]
    fn test_unreachable_database_is_degraded() {
        let health = HealthResponse::from_farmer_count(None);
        assert_eq!(health.status, "degraded");
        assert!(!health.database);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
