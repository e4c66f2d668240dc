use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

/// Climate source failures. The engine treats every variant as
/// "data unavailable for this day".
#[derive(Debug, thiserror::Error)]
pub enum ClimateError {
    #[error("climate request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("climate source returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("climate response could not be decoded: {0}")]
    Decode(String),

    #[error("climate request timed out after {0}s")]
    Timeout(u64),
}

/// SMS delivery failures. Never fatal to the caller.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("sms transport failed: {0}")]
    Transport(String),

    #[error("sms provider rejected message: HTTP {0}")]
    Rejected(reqwest::StatusCode),

    #[error("daily SMS quota of {0} exhausted")]
    QuotaExceeded(u32),
}

/// Record store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} is already registered")]
    DuplicateIdentity(String),

    /// The farmer's `last_processed_date` moved under us; the batch was not applied.
    #[error("farmer {0} was advanced concurrently")]
    Conflict(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors surfaced by the degree-day engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("farmer {0} not found")]
    FarmerNotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateIdentity(what) => {
                AppError::Conflict(format!("{} is already registered", what))
            }
            StoreError::Conflict(id) => AppError::Conflict(format!(
                "farmer {} is being processed by another run, retry shortly",
                id
            )),
            StoreError::Database(e) => AppError::DatabaseError(e),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::FarmerNotFound(id) => AppError::NotFound(format!("Farmer {} not found", id)),
            EngineError::InvalidInput(msg) => AppError::BadRequest(msg),
            EngineError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_identity_maps_to_conflict() {
        let err: AppError = StoreError::DuplicateIdentity("username 'kamal'".to_string()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_missing_farmer_maps_to_not_found() {
        let err: AppError = EngineError::FarmerNotFound(Uuid::nil()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_input_maps_to_bad_request() {
        let err: AppError = EngineError::InvalidInput("latitude out of range".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
