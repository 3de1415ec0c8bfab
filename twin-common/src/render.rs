use crate::result::Column;
use crate::snapshot::{FramePayload, GlucoseReading, SerializableFrame};
use crate::stats::GlucoseStatus;
use crate::window::{MealMarker, WindowSlice};

/// Shown by every renderer when there is nothing to draw.
pub const PLACEHOLDER_MESSAGE: &str = "No simulation data";

/// A consumer of window slices.
pub trait RenderTarget {
    type Output;

    fn present(&mut self, slice: &WindowSlice<'_>) -> Self::Output;
}

/// Status line for a slice.
pub fn annotation(slice: &WindowSlice<'_>) -> String {
    if slice.is_empty() {
        return PLACEHOLDER_MESSAGE.to_string();
    }
    format!(
        "Time: {:.1} hours | Frame: {}/{}",
        slice.elapsed_hours, slice.frame, slice.total_frames
    )
}

// --- Continuous canvas ---

/// Something on the canvas that can be redrawn on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawableId {
    Series(Column),
    MealMarkers,
    Axis,
    Annotation,
}

/// Drawables touched by one update, in canvas order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedSet(Vec<DrawableId>);

impl ChangedSet {
    pub fn contains(&self, id: DrawableId) -> bool {
        self.0.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawableId> {
        self.0.iter()
    }

    fn mark(&mut self, id: DrawableId) {
        self.0.push(id);
    }
}

/// One line on the canvas. `x` holds absolute row indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDrawable {
    pub column: Column,
    pub x: Vec<usize>,
    pub y: Vec<f64>,
}

/// Persistent scene state for a continuously redrawn chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub series: Vec<SeriesDrawable>,
    pub meals: Vec<MealMarker>,
    pub x_range: (usize, usize),
    pub annotation: String,
    /// Current glucose readout; None while showing the placeholder.
    pub reading: Option<GlucoseReading>,
}

impl Canvas {
    pub fn series(&self, column: Column) -> Option<&SeriesDrawable> {
        self.series.iter().find(|s| s.column == column)
    }

    pub fn is_placeholder(&self) -> bool {
        self.reading.is_none()
    }
}

/// Columns drawn as lines. Meal carbs are drawn as markers instead.
const LINE_COLUMNS: [Column; 6] = [
    Column::Actual,
    Column::Population,
    Column::Twin,
    Column::Insulin,
    Column::HeartRate,
    Column::SleepEfficiency,
];

/// Keeps one drawable per series alive for the whole session and rewrites
/// their data in place on every update.
#[derive(Debug, Clone)]
pub struct CanvasRenderer {
    canvas: Canvas,
    scratch_x: Vec<usize>,
    scratch_y: Vec<f64>,
}

impl CanvasRenderer {
    pub fn new(window_steps: usize) -> Self {
        let window_steps = window_steps.max(1);
        let series = LINE_COLUMNS
            .iter()
            .map(|&column| SeriesDrawable {
                column,
                x: Vec::with_capacity(window_steps),
                y: Vec::with_capacity(window_steps),
            })
            .collect();
        Self {
            canvas: Canvas {
                series,
                meals: Vec::new(),
                x_range: (0, window_steps - 1),
                annotation: PLACEHOLDER_MESSAGE.to_string(),
                reading: None,
            },
            scratch_x: Vec::with_capacity(window_steps),
            scratch_y: Vec::with_capacity(window_steps),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Writes the slice into the existing drawables and reports which ones changed.
    pub fn update(&mut self, slice: &WindowSlice<'_>) -> ChangedSet {
        let mut changed = ChangedSet::default();
        let Self {
            canvas,
            scratch_x,
            scratch_y,
        } = self;

        for drawable in canvas.series.iter_mut() {
            scratch_x.clear();
            scratch_x.extend_from_slice(slice.index());
            scratch_y.clear();
            scratch_y.extend_from_slice(slice.column(drawable.column));
            if *scratch_x != drawable.x || *scratch_y != drawable.y {
                std::mem::swap(scratch_x, &mut drawable.x);
                std::mem::swap(scratch_y, &mut drawable.y);
                changed.mark(DrawableId::Series(drawable.column));
            }
        }

        if canvas.meals != slice.meal_markers {
            canvas.meals.clear();
            canvas.meals.extend_from_slice(&slice.meal_markers);
            changed.mark(DrawableId::MealMarkers);
        }

        if canvas.x_range != slice.x_range {
            canvas.x_range = slice.x_range;
            changed.mark(DrawableId::Axis);
        }

        let text = annotation(slice);
        let reading = reading(slice);
        if canvas.annotation != text || canvas.reading != reading {
            canvas.annotation = text;
            canvas.reading = reading;
            changed.mark(DrawableId::Annotation);
        }
        changed
    }
}

impl RenderTarget for CanvasRenderer {
    type Output = ChangedSet;

    fn present(&mut self, slice: &WindowSlice<'_>) -> ChangedSet {
        self.update(slice)
    }
}

fn reading(slice: &WindowSlice<'_>) -> Option<GlucoseReading> {
    let glucose = slice.latest(Column::Twin)?;
    Some(GlucoseReading {
        glucose,
        status: GlucoseStatus::from_glucose(glucose),
        insulin: slice.latest(Column::Insulin).unwrap_or_default(),
    })
}

// --- Stateless snapshot ---

/// Turns a slice into an owned, serializable frame. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotRenderer;

impl SnapshotRenderer {
    pub fn render(&self, slice: &WindowSlice<'_>) -> SerializableFrame {
        let Some(current) = reading(slice) else {
            return SerializableFrame::Placeholder {
                message: PLACEHOLDER_MESSAGE.to_string(),
            };
        };
        let index = slice.index().to_vec();
        let time_hours = index.iter().map(|&i| i as f64 / slice.steps_per_hour).collect();

        SerializableFrame::Window(FramePayload {
            frame: slice.frame,
            total_frames: slice.total_frames,
            index,
            time_hours,
            actual: slice.column(Column::Actual).to_vec(),
            population: slice.column(Column::Population).to_vec(),
            digital_twin: slice.column(Column::Twin).to_vec(),
            insulin: slice.column(Column::Insulin).to_vec(),
            heart_rate: slice.column(Column::HeartRate).to_vec(),
            sleep_efficiency: slice.column(Column::SleepEfficiency).to_vec(),
            meal_carbs: slice.column(Column::MealCarbs).to_vec(),
            x_range: slice.x_range,
            meal_markers: slice.meal_markers.clone(),
            current,
            annotation: annotation(slice),
        })
    }
}

impl RenderTarget for SnapshotRenderer {
    type Output = SerializableFrame;

    fn present(&mut self, slice: &WindowSlice<'_>) -> SerializableFrame {
        self.render(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::tests::sample;
    use crate::window::extract;

    #[test]
    fn first_update_touches_everything_then_nothing() {
        let result = sample(60, Some(2));
        let mut renderer = CanvasRenderer::new(12);
        let slice = extract(&result, 5, 12);

        let changed = renderer.update(&slice);
        for column in LINE_COLUMNS {
            assert!(changed.contains(DrawableId::Series(column)));
        }
        assert!(changed.contains(DrawableId::MealMarkers));
        assert!(changed.contains(DrawableId::Annotation));
        // fill-in period: axis unchanged from its initial range
        assert!(!changed.contains(DrawableId::Axis));

        assert!(renderer.update(&slice).is_empty());
    }

    #[test]
    fn constant_series_are_not_redrawn_after_window_fills() {
        let result = sample(60, None);
        let mut renderer = CanvasRenderer::new(12);
        renderer.update(&extract(&result, 20, 12));
        let changed = renderer.update(&extract(&result, 21, 12));
        // x indices shift for every series; meals stay empty
        assert!(changed.contains(DrawableId::Series(Column::Insulin)));
        assert!(changed.contains(DrawableId::Axis));
        assert!(!changed.contains(DrawableId::MealMarkers));
        assert_eq!(renderer.canvas().x_range, (10, 21));
        let twin = renderer.canvas().series(Column::Twin).unwrap();
        assert_eq!(twin.x.first(), Some(&10));
        assert_eq!(twin.y.last(), Some(&123.0));
    }

    #[test]
    fn drawables_are_never_replaced() {
        let result = sample(60, None);
        let mut renderer = CanvasRenderer::new(12);
        let before: Vec<Column> = renderer.canvas().series.iter().map(|s| s.column).collect();
        for frame in 0..60 {
            renderer.update(&extract(&result, frame, 12));
        }
        let after: Vec<Column> = renderer.canvas().series.iter().map(|s| s.column).collect();
        assert_eq!(before, after);
        assert!(renderer.canvas().series(Column::MealCarbs).is_none());
    }

    #[test]
    fn empty_slice_shows_placeholder() {
        let result = sample(60, None);
        let mut renderer = CanvasRenderer::new(12);
        renderer.update(&extract(&result, 10, 12));
        let changed = renderer.update(&WindowSlice::empty(12));
        assert!(changed.contains(DrawableId::Series(Column::Actual)));
        assert!(renderer.canvas().is_placeholder());
        assert_eq!(renderer.canvas().annotation, PLACEHOLDER_MESSAGE);
        assert!(renderer.canvas().series(Column::Actual).unwrap().y.is_empty());

        let frame = SnapshotRenderer.render(&WindowSlice::empty(12));
        assert!(frame.is_placeholder());
    }

    #[test]
    fn snapshot_is_self_contained() {
        let result = sample(60, Some(30));
        let frame = SnapshotRenderer.render(&extract(&result, 35, 12));
        let SerializableFrame::Window(payload) = frame else {
            panic!("expected a window frame");
        };
        assert_eq!(payload.index.first(), Some(&24));
        assert_eq!(payload.digital_twin.len(), 12);
        assert_eq!(payload.meal_markers, vec![MealMarker { index: 30, carbs: 60.0 }]);
        assert_eq!(payload.meal_carbs.len(), 12);
        assert_eq!(payload.meal_carbs[6], 60.0);
        assert_eq!(payload.meal_carbs.iter().filter(|&&c| c != 0.0).count(), 1);
        assert_eq!(payload.current.glucose, 137.0);
        assert_eq!(payload.current.status, GlucoseStatus::Normal);
        assert_eq!(payload.annotation, "Time: 2.9 hours | Frame: 35/60");
        assert!((payload.time_hours[0] - 2.0).abs() < 1e-9);

        let json = serde_json::to_value(SerializableFrame::Window(payload)).unwrap();
        assert_eq!(json["kind"], "window");
    }
}
