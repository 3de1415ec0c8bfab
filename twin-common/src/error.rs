use thiserror::Error;

/// A parameter value was rejected by the parameter store.
///
/// Recoverable: the previous parameter snapshot stays in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for `{field}`: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Failure while building a scenario, running the simulator, or reading/writing a result series.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("unknown digital twin model id {id} (valid ids: 0..{count})")]
    UnknownModel { id: u32, count: u32 },

    #[error("simulator returned {actual} rows for a scenario of {expected} rows")]
    RowCountMismatch { expected: usize, actual: usize },

    #[error("result series is missing column `{0}`")]
    MissingColumn(String),

    #[error("column `{column}` holds {actual} values, expected {expected}")]
    ColumnLength {
        column: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("row index {found} at position {position} breaks the contiguous 0.. ordering")]
    NonContiguousIndex { position: usize, found: usize },

    #[error("unsupported result schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("scenario could not be built: {0}")]
    Scenario(String),

    #[error("model evaluation failed: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode result series: {0}")]
    Encode(String),

    #[error("failed to decode result series: {0}")]
    Decode(String),
}

/// A frame index outside the bounds of the cached result series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame {frame} is out of range for a series of {len} frames")]
pub struct RangeError {
    pub frame: usize,
    pub len: usize,
}

/// A frame request referenced a parameter generation that is no longer current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale parameters: request is for generation {requested}, current generation is {current}")]
pub struct StaleRequestError {
    pub requested: u64,
    pub current: u64,
}

/// A food log entry was rejected or the log could not be persisted.
#[derive(Debug, Error)]
pub enum FoodLogError {
    #[error("food {0:?} is not in the food database")]
    UnknownFood(String),

    #[error("quantity must be a positive number of servings, got {0}")]
    InvalidQuantity(f64),

    #[error("food log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("food log is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
