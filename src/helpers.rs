//! Shared helpers for coordinate (Decimal ↔ f64) and date formatting.
//!
//! Coordinates are stored as `NUMERIC(9,6)`, so f64 inputs are rounded to
//! 6 decimal places (~0.1 m) before they reach the database. Non-finite
//! inputs are rejected by the caller's validation, but still map to
//! `Decimal::ZERO` here rather than panicking.

use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Decimal places persisted for latitude/longitude.
const COORD_SCALE: u32 = 6;

/// Convert an f64 coordinate to Decimal, rounded to 6 decimal places.
pub(crate) fn f64_to_coord(v: f64) -> Decimal {
    if !v.is_finite() {
        tracing::warn!("f64_to_coord received non-finite value {}, defaulting to 0", v);
        return Decimal::ZERO;
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp(COORD_SCALE))
        .unwrap_or_default()
}

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Format a calendar date as `YYYY-MM-DD`.
pub(crate) fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}
