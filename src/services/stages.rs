//! Crop stage reference data and the degree-day arithmetic behind it.
//!
//! Stages are ordered by strictly increasing cumulative-GDD threshold. A
//! farmer starts at index 0 ("Germination") and can only move forward; index
//! `LAST_STAGE_INDEX` ("Maturity") is terminal.

/// Base temperature (°C) below which no crop development is counted.
pub const BASE_TEMP_C: f64 = 10.0;

/// Soil moisture fraction (m³/m³, 0-7 cm) below which an alert is sent.
pub const SOIL_MOISTURE_THRESHOLD: f64 = 0.1;

/// A crop development stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropStage {
    /// Stage name (e.g. "Flowering")
    pub name: &'static str,
    /// Cumulative GDD at which the crop enters this stage
    pub threshold: f64,
    /// Agronomic advice sent when the stage is entered
    pub advice: &'static str,
}

pub const CROP_STAGES: [CropStage; 5] = [
    CropStage {
        name: "Germination",
        threshold: 20.0,
        advice: "Ensure proper seedling care—maintain moisture, temperature (20–35°C), and good soil contact for uniform germination.",
    },
    CropStage {
        name: "Maximum Tillering",
        threshold: 450.0,
        advice: "Apply nitrogen fertilizer to boost tiller growth; ensure adequate water supply and weed control to maximize yield potential.",
    },
    CropStage {
        name: "Panicle Initiation",
        threshold: 1100.0,
        advice: "Increase potassium and phosphorus fertilization; maintain consistent water levels to support panicle development.",
    },
    CropStage {
        name: "Flowering",
        threshold: 1600.0,
        advice: "Avoid water stress; monitor pests/diseases closely and apply protective sprays if needed to safeguard grain setting.",
    },
    CropStage {
        name: "Maturity",
        threshold: 2500.0,
        advice: "Reduce irrigation gradually; harvest on time to prevent shattering or quality loss for optimal grain yield and quality.",
    },
];

pub const LAST_STAGE_INDEX: usize = CROP_STAGES.len() - 1;

/// Look up a stage, clamping out-of-range indices to the nearest valid stage.
pub fn stage_at(index: i32) -> &'static CropStage {
    let idx = usize::try_from(index).unwrap_or(0).min(LAST_STAGE_INDEX);
    &CROP_STAGES[idx]
}

/// Daily growing degree-days: `max(0, (max + min) / 2 - BASE_TEMP_C)`.
pub fn calculate_gdd(max_temp_c: f64, min_temp_c: f64) -> f64 {
    let avg = (max_temp_c + min_temp_c) / 2.0;
    (avg - BASE_TEMP_C).max(0.0)
}

/// Stage indices newly reached at `gdd_accumulated`, starting from
/// `current_index`, in threshold order. Empty once the last stage is reached.
pub fn stages_crossed(current_index: usize, gdd_accumulated: f64) -> Vec<usize> {
    let mut crossed = Vec::new();
    let mut idx = current_index;
    while idx < LAST_STAGE_INDEX && gdd_accumulated >= CROP_STAGES[idx + 1].threshold {
        idx += 1;
        crossed.push(idx);
    }
    crossed
}

/// Text of the SMS sent when a farmer enters `stage`.
pub fn stage_message(stage: &CropStage) -> String {
    format!("Stage Update: {} - {}", stage.name, stage.advice)
}
