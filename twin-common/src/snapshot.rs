use crate::stats::GlucoseStatus;
use crate::window::MealMarker;
use serde::{Deserialize, Serialize};

/// Readout of the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    pub glucose: f64,
    pub status: GlucoseStatus,
    pub insulin: f64,
}

/// Self-contained data for one frame, safe to hand to another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub frame: usize,
    pub total_frames: usize,
    pub index: Vec<usize>,
    pub time_hours: Vec<f64>,
    pub actual: Vec<f64>,
    pub population: Vec<f64>,
    pub digital_twin: Vec<f64>,
    pub insulin: Vec<f64>,
    pub heart_rate: Vec<f64>,
    pub sleep_efficiency: Vec<f64>,
    /// Zero on non-meal steps.
    pub meal_carbs: Vec<f64>,
    pub x_range: (usize, usize),
    pub meal_markers: Vec<MealMarker>,
    pub current: GlucoseReading,
    pub annotation: String,
}

/// Output of the stateless renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializableFrame {
    Window(FramePayload),
    /// Neutral output for an empty slice.
    Placeholder { message: String },
}

impl SerializableFrame {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SerializableFrame::Placeholder { .. })
    }
}
