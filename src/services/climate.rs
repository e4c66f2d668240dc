//! Climate data source: daily temperature extremes and soil moisture.
//!
//! [`OpenMeteoClient`] talks to the Open-Meteo archive API for past days and
//! the forecast API for the current day.
//! See: https://open-meteo.com/en/docs/historical-weather-api

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::errors::ClimateError;

/// Hourly soil moisture variable averaged into the daily value.
const SOIL_MOISTURE_VARIABLE: &str = "soil_moisture_0_to_7cm";

/// Daily air temperature extremes at 2 m, in °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyTemperature {
    pub max_c: f64,
    pub min_c: f64,
}

/// Contract for anything that can supply daily climate data.
///
/// `Ok(None)` means the source has no value for that day (including any
/// future date). That is an expected outcome rather than an error.
#[async_trait]
pub trait ClimateSource: Send + Sync {
    async fn daily_temperature(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Option<DailyTemperature>, ClimateError>;

    /// Mean soil moisture fraction (m³/m³) over the valid hourly samples of `date`.
    async fn soil_moisture(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Option<f64>, ClimateError>;
}

/// Client for the Open-Meteo archive and forecast APIs.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    archive_url: String,
    forecast_url: String,
    timeout_secs: u64,
}

// --- Open-Meteo JSON response types ---

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    soil_moisture_0_to_7cm: Vec<Option<f64>>,
}

/// Which Open-Meteo API serves a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Archive,
    Forecast,
}

/// Past days come from the archive, today from the forecast API, and future
/// days are never requested.
fn endpoint_for(date: NaiveDate, today: NaiveDate) -> Option<Endpoint> {
    if date < today {
        Some(Endpoint::Archive)
    } else if date == today {
        Some(Endpoint::Forecast)
    } else {
        None
    }
}

/// Mean of the non-null samples, or `None` if there are none.
pub(crate) fn mean_of_valid(samples: &[Option<f64>]) -> Option<f64> {
    let valid: Vec<f64> = samples.iter().flatten().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

impl OpenMeteoClient {
    pub fn new(archive_url: &str, forecast_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            archive_url: archive_url.to_string(),
            forecast_url: forecast_url.to_string(),
            timeout_secs,
        }
    }

    /// Issue a single-day request and decode the body.
    async fn fetch_day<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        lat: f64,
        lon: f64,
        date: NaiveDate,
        variable: (&str, &str),
    ) -> Result<T, ClimateError> {
        let base = match endpoint {
            Endpoint::Archive => &self.archive_url,
            Endpoint::Forecast => &self.forecast_url,
        };
        let day = date.format("%Y-%m-%d").to_string();
        let lat_str = format!("{:.4}", lat);
        let lon_str = format!("{:.4}", lon);

        let response = self
            .client
            .get(base)
            .query(&[
                ("latitude", lat_str.as_str()),
                ("longitude", lon_str.as_str()),
                ("start_date", day.as_str()),
                ("end_date", day.as_str()),
                variable,
                ("timezone", "auto"),
            ])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        if !response.status().is_success() {
            return Err(ClimateError::Status(response.status()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClimateError::Decode(e.to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> ClimateError {
        if err.is_timeout() {
            ClimateError::Timeout(self.timeout_secs)
        } else {
            ClimateError::Http(err)
        }
    }
}

#[async_trait]
impl ClimateSource for OpenMeteoClient {
    async fn daily_temperature(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Option<DailyTemperature>, ClimateError> {
        let Some(endpoint) = endpoint_for(date, Utc::now().date_naive()) else {
            tracing::debug!("Open-Meteo: refusing temperature fetch for future date {}", date);
            return Ok(None);
        };

        let body: DailyResponse = self
            .fetch_day(
                endpoint,
                lat,
                lon,
                date,
                ("daily", "temperature_2m_max,temperature_2m_min"),
            )
            .await?;

        let Some(daily) = body.daily else {
            return Ok(None);
        };
        let max = daily.temperature_2m_max.first().copied().flatten();
        let min = daily.temperature_2m_min.first().copied().flatten();

        Ok(match (max, min) {
            (Some(max_c), Some(min_c)) => Some(DailyTemperature { max_c, min_c }),
            _ => None,
        })
    }

    async fn soil_moisture(
        &self,
        lat: f64,
        lon: f64,
        date: NaiveDate,
    ) -> Result<Option<f64>, ClimateError> {
        let Some(endpoint) = endpoint_for(date, Utc::now().date_naive()) else {
            tracing::debug!("Open-Meteo: refusing moisture fetch for future date {}", date);
            return Ok(None);
        };

        let body: HourlyResponse = self
            .fetch_day(endpoint, lat, lon, date, ("hourly", SOIL_MOISTURE_VARIABLE))
            .await?;

        Ok(body
            .hourly
            .and_then(|h| mean_of_valid(&h.soil_moisture_0_to_7cm)))
    }
}
