pub mod cache;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod food;
pub mod params;
pub mod render;
pub mod result;
pub mod scenario;
pub mod session;
pub mod simulator;
pub mod snapshot;
pub mod stats;
pub mod window;

// Re-export key types for easier use by dependent crates
pub use cache::{CachedResult, ResultCache};
pub use command::ControlCommand;
pub use config::EngineConfig;
pub use controller::{
    Completion, JumpOutcome, PlaybackController, PlaybackMode, PlaybackOptions, PlaybackState,
    PlaybackStatus, ResimulationRequest, TickOutcome,
};
pub use error::{FoodLogError, RangeError, SimulationError, StaleRequestError, ValidationError};
pub use food::{FoodCategory, FoodDatabase, FoodEntry, FoodItem, FoodLog};
pub use params::{
    ModelSelection, ParameterChange, ParameterField, ParameterSnapshot, ParameterStore,
    PlaybackSettings, ScenarioParameters, SleepWindow,
};
pub use render::{Canvas, CanvasRenderer, ChangedSet, DrawableId, RenderTarget, SeriesDrawable, SnapshotRenderer};
pub use result::{Column, OutputFormat, ResultRow, SimulationResult};
pub use scenario::{Cadence, RecordedScenario, Scenario, ScenarioBuilder, ScenarioRow, ScenarioWarning, SyntheticScenario};
pub use session::{CommandOutcome, PlaybackSession};
pub use simulator::{ModelCatalog, ReferenceTwin, Simulator, TwinParameters};
pub use snapshot::{FramePayload, GlucoseReading, SerializableFrame};
pub use stats::{ColumnStats, GlucoseStatus, StatisticsSummary};
pub use window::{extract, MealMarker, WindowSlice};
