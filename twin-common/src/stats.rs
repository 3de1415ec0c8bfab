use crate::result::{Column, SimulationResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Target glucose band (mg/dL), inclusive on both ends.
pub const TARGET_LOW: f64 = 70.0;
pub const TARGET_HIGH: f64 = 180.0;
/// Above this a reading is reported as very high.
pub const VERY_HIGH: f64 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseStatus {
    Hypoglycemia,
    Normal,
    High,
    VeryHigh,
}

impl GlucoseStatus {
    pub fn from_glucose(glucose: f64) -> Self {
        if glucose < TARGET_LOW {
            GlucoseStatus::Hypoglycemia
        } else if glucose <= TARGET_HIGH {
            GlucoseStatus::Normal
        } else if glucose <= VERY_HIGH {
            GlucoseStatus::High
        } else {
            GlucoseStatus::VeryHigh
        }
    }
}

impl fmt::Display for GlucoseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GlucoseStatus::Hypoglycemia => "Hypoglycemia",
            GlucoseStatus::Normal => "Normal",
            GlucoseStatus::High => "High",
            GlucoseStatus::VeryHigh => "Very High",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Fraction of steps inside the target band, 0..=1.
    pub time_in_range: f64,
}

impl ColumnStats {
    /// None for an empty column.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let (sum, min, max, in_range) = values.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY, 0usize),
            |(sum, min, max, in_range), &v| {
                let hit = (TARGET_LOW..=TARGET_HIGH).contains(&v) as usize;
                (sum + v, min.min(v), max.max(v), in_range + hit)
            },
        );
        Some(Self {
            mean: sum / n,
            min,
            max,
            time_in_range: in_range as f64 / n,
        })
    }
}

/// Read-only projection of the glucose columns of a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub actual: Option<ColumnStats>,
    pub population: Option<ColumnStats>,
    pub digital_twin: Option<ColumnStats>,
}

impl StatisticsSummary {
    pub fn summarize(result: &SimulationResult) -> Self {
        Self {
            actual: ColumnStats::from_values(result.column(Column::Actual)),
            population: ColumnStats::from_values(result.column(Column::Population)),
            digital_twin: ColumnStats::from_values(result.column(Column::Twin)),
        }
    }
}
