use crate::result::{Column, SimulationResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A meal inside the visible window, at its absolute row index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MealMarker {
    pub index: usize,
    pub carbs: f64,
}

/// The trailing rows of a result visible at one frame.
///
/// Borrows the result; renderers read it and must not keep it past the call.
#[derive(Debug, Clone)]
pub struct WindowSlice<'a> {
    result: Option<&'a SimulationResult>,
    rows: Range<usize>,
    /// Current frame after clamping.
    pub frame: usize,
    pub window_steps: usize,
    /// Absolute x range to present, always `window_steps` wide.
    pub x_range: (usize, usize),
    pub elapsed_hours: f64,
    pub steps_per_hour: f64,
    /// Series length, for annotations.
    pub total_frames: usize,
    pub meal_markers: Vec<MealMarker>,
}

impl<'a> WindowSlice<'a> {
    /// A slice with no rows, used when no valid result exists.
    pub fn empty(window_steps: usize) -> Self {
        let window_steps = window_steps.max(1);
        WindowSlice {
            result: None,
            rows: 0..0,
            frame: 0,
            window_steps,
            x_range: (0, window_steps - 1),
            elapsed_hours: 0.0,
            steps_per_hour: 1.0,
            total_frames: 0,
            meal_markers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Absolute row range `[start, end)` covered by the slice.
    pub fn rows(&self) -> Range<usize> {
        self.rows.clone()
    }

    /// Absolute row indices of the slice.
    pub fn index(&self) -> &'a [usize] {
        match self.result {
            Some(result) => &result.index()[self.rows.clone()],
            None => &[],
        }
    }

    pub fn column(&self, column: Column) -> &'a [f64] {
        match self.result {
            Some(result) => &result.column(column)[self.rows.clone()],
            None => &[],
        }
    }

    /// Value of a column at the current frame.
    pub fn latest(&self, column: Column) -> Option<f64> {
        self.column(column).last().copied()
    }
}

/// Returns the window ending at `frame`, at most `window_steps` rows long.
///
/// `frame` is clamped into the series. Near the start the slice is shorter but
/// `x_range` still spans the full window.
pub fn extract(result: &SimulationResult, frame: usize, window_steps: usize) -> WindowSlice<'_> {
    if result.is_empty() {
        return WindowSlice::empty(window_steps);
    }
    let window_steps = window_steps.max(1);
    let frame = frame.min(result.len() - 1);
    let start = (frame + 1).saturating_sub(window_steps);
    let end = frame + 1;

    let meal_markers = result.column(Column::MealCarbs)[start..end]
        .iter()
        .zip(&result.index()[start..end])
        .filter(|(carbs, _)| **carbs != 0.0)
        .map(|(&carbs, &index)| MealMarker { index, carbs })
        .collect();

    WindowSlice {
        result: Some(result),
        rows: start..end,
        frame,
        window_steps,
        x_range: (start, start + window_steps - 1),
        elapsed_hours: frame as f64 / result.steps_per_hour(),
        steps_per_hour: result.steps_per_hour(),
        total_frames: result.len(),
        meal_markers,
    }
}
