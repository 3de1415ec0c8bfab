use crate::error::ValidationError;
use crate::simulator::ModelCatalog;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};

/// Sleep start used when a sleep duration is set without an existing window (minutes from start).
pub const DEFAULT_SLEEP_START_MIN: f64 = 13.0 * 60.0;
/// Sleep duration used when a sleep start is set without an existing window (minutes).
pub const DEFAULT_SLEEP_DURATION_MIN: f64 = 8.0 * 60.0;

/// Bounds on the playback tick interval, in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;
pub const MAX_TICK_INTERVAL_MS: u64 = 200;

/// A sleep period inside the scenario, offsets in minutes from scenario start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepWindow {
    pub start_min: f64,
    pub duration_min: f64,
}

/// Inputs to the scenario builder. Immutable; every change produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioParameters {
    /// Initial glucose (mg/dL).
    pub init_cgm: f64,
    /// Basal insulin rate (U/h).
    pub basal_insulin: f64,
    /// Carbohydrate ratio (g/U).
    pub carb_ratio: f64,
    /// Meal size (g).
    pub meal_size: f64,
    /// Meal offset from scenario start (minutes).
    pub meal_time: f64,
    /// Heart-rate baseline (BPM).
    pub heart_rate: f64,
    #[serde(default)]
    pub sleep: Option<SleepWindow>,
}

impl Default for ScenarioParameters {
    fn default() -> Self {
        Self {
            init_cgm: 110.0,
            basal_insulin: 1.0,
            carb_ratio: 12.0,
            meal_size: 75.0,
            meal_time: 60.0,
            heart_rate: 70.0,
            sleep: None,
        }
    }
}

impl ScenarioParameters {
    /// Checks every field against its range. Used for values that did not come through `ParameterStore::set`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_positive(ParameterField::InitCgm, self.init_cgm)?;
        check_non_negative(ParameterField::BasalInsulin, self.basal_insulin)?;
        check_positive(ParameterField::CarbRatio, self.carb_ratio)?;
        check_non_negative(ParameterField::MealSize, self.meal_size)?;
        check_non_negative(ParameterField::MealTime, self.meal_time)?;
        check_positive(ParameterField::HeartRate, self.heart_rate)?;
        if let Some(sleep) = self.sleep {
            check_non_negative(ParameterField::SleepStart, sleep.start_min)?;
            check_positive(ParameterField::SleepDuration, sleep.duration_min)?;
        }
        Ok(())
    }
}

/// Identifies one trained patient-specific model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelSelection(u32);

impl ModelSelection {
    pub fn new(id: u32) -> Self {
        ModelSelection(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback settings that are routed through the store but never require re-simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    pub tick_interval_ms: u64,
    pub window_steps: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            window_steps: 48, // 4 hours at 5-minute cadence
        }
    }
}

/// The full parameter state at one point in time, tagged with a generation number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Increases by one for every accepted change.
    pub generation: u64,
    pub scenario: ScenarioParameters,
    pub model: ModelSelection,
    pub playback: PlaybackSettings,
}

impl ParameterSnapshot {
    /// True when `other` would produce a different simulation result.
    pub fn simulation_differs(&self, other: &ParameterSnapshot) -> bool {
        self.scenario != other.scenario || self.model != other.model
    }
}

/// The settable fields, by their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterField {
    InitCgm,
    BasalInsulin,
    CarbRatio,
    MealSize,
    MealTime,
    HeartRate,
    SleepStart,
    SleepDuration,
    DigitalTwin,
    TickIntervalMs,
    WindowSteps,
}

impl ParameterField {
    pub const ALL: [ParameterField; 11] = [
        ParameterField::InitCgm,
        ParameterField::BasalInsulin,
        ParameterField::CarbRatio,
        ParameterField::MealSize,
        ParameterField::MealTime,
        ParameterField::HeartRate,
        ParameterField::SleepStart,
        ParameterField::SleepDuration,
        ParameterField::DigitalTwin,
        ParameterField::TickIntervalMs,
        ParameterField::WindowSteps,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParameterField::InitCgm => "init_cgm",
            ParameterField::BasalInsulin => "basal_insulin",
            ParameterField::CarbRatio => "carb_ratio",
            ParameterField::MealSize => "meal_size",
            ParameterField::MealTime => "meal_time",
            ParameterField::HeartRate => "heart_rate",
            ParameterField::SleepStart => "sleep_start",
            ParameterField::SleepDuration => "sleep_duration",
            ParameterField::DigitalTwin => "digital_twin",
            ParameterField::TickIntervalMs => "tick_interval_ms",
            ParameterField::WindowSteps => "window_steps",
        }
    }

    /// Whether a change to this field alters the simulated series.
    pub fn affects_simulation(self) -> bool {
        !matches!(self, ParameterField::TickIntervalMs | ParameterField::WindowSteps)
    }
}

impl fmt::Display for ParameterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParameterField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ParameterField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| ValidationError::new(wanted, "", "unknown parameter field"))
    }
}

/// Emitted after every accepted parameter change.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    pub field: ParameterField,
    pub old: ParameterSnapshot,
    pub new: ParameterSnapshot,
}

impl ParameterChange {
    pub fn requires_resimulation(&self) -> bool {
        self.old.simulation_differs(&self.new)
    }
}

/// Validated, typed holder for scenario, model and playback parameters.
///
/// `set` is the only way to change a value. Accepted changes are delivered to
/// every subscriber as a [`ParameterChange`].
#[derive(Debug)]
pub struct ParameterStore {
    current: ParameterSnapshot,
    catalog: ModelCatalog,
    subscribers: Vec<Sender<ParameterChange>>,
}

impl ParameterStore {
    /// Creates a store at generation 0. The initial values are validated like any later change.
    pub fn new(
        scenario: ScenarioParameters,
        model: ModelSelection,
        playback: PlaybackSettings,
        catalog: ModelCatalog,
    ) -> Result<Self, ValidationError> {
        scenario.validate()?;
        if !catalog.contains(model) {
            return Err(unknown_model(&catalog, &model.to_string()));
        }
        validate_playback(playback)?;

        Ok(Self {
            current: ParameterSnapshot {
                generation: 0,
                scenario,
                model,
                playback,
            },
            catalog,
            subscribers: Vec::new(),
        })
    }

    pub fn snapshot(&self) -> &ParameterSnapshot {
        &self.current
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Registers a listener for change events.
    pub fn subscribe(&mut self) -> Receiver<ParameterChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Coerces and validates `raw` for the named field, then replaces the snapshot.
    ///
    /// On failure the previous snapshot is untouched. Setting a field to the
    /// value it already holds is accepted without emitting an event.
    pub fn set(&mut self, field: &str, raw: &str) -> Result<ScenarioParameters, ValidationError> {
        let field: ParameterField = field.parse()?;
        self.set_field(field, raw)
    }

    pub fn set_field(&mut self, field: ParameterField, raw: &str) -> Result<ScenarioParameters, ValidationError> {
        let mut next = self.current.clone();
        apply_field(&mut next, field, raw, &self.catalog)?;

        if next == self.current {
            debug!("Parameter `{}` unchanged at {:?}", field, raw.trim());
            return Ok(self.current.scenario.clone());
        }

        next.generation = self.current.generation + 1;
        let old = std::mem::replace(&mut self.current, next);
        info!(
            "Parameter `{}` set to {} (generation {})",
            field,
            raw.trim(),
            self.current.generation
        );

        let change = ParameterChange {
            field,
            old,
            new: self.current.clone(),
        };
        // Drop listeners whose receiving end has gone away.
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());

        Ok(self.current.scenario.clone())
    }
}

fn apply_field(
    snapshot: &mut ParameterSnapshot,
    field: ParameterField,
    raw: &str,
    catalog: &ModelCatalog,
) -> Result<(), ValidationError> {
    let scenario = &mut snapshot.scenario;
    match field {
        ParameterField::InitCgm => scenario.init_cgm = check_positive(field, parse_float(field, raw)?)?,
        ParameterField::BasalInsulin => {
            scenario.basal_insulin = check_non_negative(field, parse_float(field, raw)?)?
        }
        ParameterField::CarbRatio => scenario.carb_ratio = check_positive(field, parse_float(field, raw)?)?,
        ParameterField::MealSize => scenario.meal_size = check_non_negative(field, parse_float(field, raw)?)?,
        ParameterField::MealTime => scenario.meal_time = check_non_negative(field, parse_float(field, raw)?)?,
        ParameterField::HeartRate => scenario.heart_rate = check_positive(field, parse_float(field, raw)?)?,
        ParameterField::SleepStart => {
            if is_clear(raw) {
                scenario.sleep = None;
            } else {
                let start_min = check_non_negative(field, parse_float(field, raw)?)?;
                let duration_min = scenario.sleep.map_or(DEFAULT_SLEEP_DURATION_MIN, |s| s.duration_min);
                scenario.sleep = Some(SleepWindow { start_min, duration_min });
            }
        }
        ParameterField::SleepDuration => {
            if is_clear(raw) {
                scenario.sleep = None;
            } else {
                let duration_min = check_positive(field, parse_float(field, raw)?)?;
                let start_min = scenario.sleep.map_or(DEFAULT_SLEEP_START_MIN, |s| s.start_min);
                scenario.sleep = Some(SleepWindow { start_min, duration_min });
            }
        }
        ParameterField::DigitalTwin => {
            let id = parse_integer(field, raw)?;
            let model = u32::try_from(id)
                .map(ModelSelection::new)
                .map_err(|_| unknown_model(catalog, raw))?;
            if !catalog.contains(model) {
                return Err(unknown_model(catalog, raw));
            }
            snapshot.model = model;
        }
        ParameterField::TickIntervalMs => {
            let ms = parse_integer(field, raw)?;
            if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&ms) {
                return Err(ValidationError::new(
                    field.name(),
                    raw.trim(),
                    format!("must be between {} and {} ms", MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS),
                ));
            }
            snapshot.playback.tick_interval_ms = ms;
        }
        ParameterField::WindowSteps => {
            let steps = parse_integer(field, raw)?;
            if steps == 0 {
                return Err(ValidationError::new(field.name(), raw.trim(), "must be greater than 0"));
            }
            snapshot.playback.window_steps = usize::try_from(steps)
                .map_err(|_| ValidationError::new(field.name(), raw.trim(), "too large"))?;
        }
    }
    Ok(())
}

fn validate_playback(playback: PlaybackSettings) -> Result<(), ValidationError> {
    if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&playback.tick_interval_ms) {
        return Err(ValidationError::new(
            ParameterField::TickIntervalMs.name(),
            playback.tick_interval_ms.to_string(),
            format!("must be between {} and {} ms", MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS),
        ));
    }
    if playback.window_steps == 0 {
        return Err(ValidationError::new(ParameterField::WindowSteps.name(), "0", "must be greater than 0"));
    }
    Ok(())
}

fn is_clear(raw: &str) -> bool {
    let raw = raw.trim();
    raw.is_empty() || raw.eq_ignore_ascii_case("none")
}

fn parse_float(field: ParameterField, raw: &str) -> Result<f64, ValidationError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::new(field.name(), raw.trim(), "not a number"))?;
    if !value.is_finite() {
        return Err(ValidationError::new(field.name(), raw.trim(), "must be finite"));
    }
    Ok(value)
}

/// Accepts "3" as well as slider-style "3.0"; rejects fractional and negative values.
fn parse_integer(field: ParameterField, raw: &str) -> Result<u64, ValidationError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(value);
    }
    let value = parse_float(field, trimmed)?;
    if value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(ValidationError::new(field.name(), trimmed, "must be a non-negative integer"));
    }
    Ok(value as u64)
}

fn check_positive(field: ParameterField, value: f64) -> Result<f64, ValidationError> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::new(field.name(), value.to_string(), "must be greater than 0"))
    }
}

fn check_non_negative(field: ParameterField, value: f64) -> Result<f64, ValidationError> {
    if value >= 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::new(field.name(), value.to_string(), "must not be negative"))
    }
}

fn unknown_model(catalog: &ModelCatalog, raw: &str) -> ValidationError {
    ValidationError::new(
        ParameterField::DigitalTwin.name(),
        raw.trim(),
        format!("no such model; valid ids are 0..={}", catalog.len().saturating_sub(1)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParameterStore {
        ParameterStore::new(
            ScenarioParameters::default(),
            ModelSelection::new(4),
            PlaybackSettings::default(),
            ModelCatalog::reference(),
        )
        .unwrap()
    }

    #[test]
    fn set_coerces_and_emits_change() {
        let mut store = store();
        let changes = store.subscribe();

        let scenario = store.set("meal_size", " 90 ").unwrap();
        assert_eq!(scenario.meal_size, 90.0);
        assert_eq!(store.snapshot().generation, 1);

        let change = changes.try_recv().unwrap();
        assert_eq!(change.field, ParameterField::MealSize);
        assert_eq!(change.old.scenario.meal_size, 75.0);
        assert_eq!(change.new.scenario.meal_size, 90.0);
        assert!(change.requires_resimulation());
    }

    #[test]
    fn rejected_value_leaves_snapshot_untouched() {
        let mut store = store();
        let changes = store.subscribe();
        let before = store.snapshot().clone();

        let err = store.set("carb_ratio", "0").unwrap_err();
        assert_eq!(err.field, "carb_ratio");
        let err = store.set("init_cgm", "abc").unwrap_err();
        assert_eq!(err.reason, "not a number");
        assert!(store.set("basal_insulin", "-0.5").is_err());
        assert!(store.set("meal_time", "NaN").is_err());
        assert!(store.set("no_such_field", "1").is_err());

        assert_eq!(store.snapshot(), &before);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn unknown_model_is_rejected() {
        let mut store = store();
        let err = store.set("digital_twin", "7").unwrap_err();
        assert_eq!(err.field, "digital_twin");
        assert!(store.set("digital_twin", "-1").is_err());
        assert!(store.set("digital_twin", "1.5").is_err());
        assert_eq!(store.snapshot().model, ModelSelection::new(4));

        store.set("digital_twin", "2.0").unwrap();
        assert_eq!(store.snapshot().model, ModelSelection::new(2));
    }

    #[test]
    fn playback_settings_do_not_require_resimulation() {
        let mut store = store();
        let changes = store.subscribe();

        store.set("tick_interval_ms", "120").unwrap();
        store.set("window_steps", "24").unwrap();
        assert!(store.set("tick_interval_ms", "5").is_err());
        assert!(store.set("tick_interval_ms", "250").is_err());
        assert!(store.set("window_steps", "0").is_err());

        let received: Vec<_> = changes.try_iter().collect();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|c| !c.requires_resimulation()));
        assert_eq!(store.snapshot().playback.tick_interval_ms, 120);
        assert_eq!(store.snapshot().playback.window_steps, 24);
    }

    #[test]
    fn unchanged_value_emits_nothing() {
        let mut store = store();
        let changes = store.subscribe();
        store.set("init_cgm", "110").unwrap();
        assert_eq!(store.snapshot().generation, 0);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn sleep_window_fields() {
        let mut store = store();
        store.set("sleep_start", "120").unwrap();
        assert_eq!(
            store.snapshot().scenario.sleep,
            Some(SleepWindow { start_min: 120.0, duration_min: DEFAULT_SLEEP_DURATION_MIN })
        );
        store.set("sleep_duration", "60").unwrap();
        assert_eq!(store.snapshot().scenario.sleep.map(|s| s.duration_min), Some(60.0));
        assert!(store.set("sleep_duration", "0").is_err());
        store.set("sleep_start", "none").unwrap();
        assert_eq!(store.snapshot().scenario.sleep, None);
    }

    #[test]
    fn initial_values_are_validated() {
        let bad = ScenarioParameters { init_cgm: 0.0, ..ScenarioParameters::default() };
        assert!(ParameterStore::new(bad, ModelSelection::new(0), PlaybackSettings::default(), ModelCatalog::reference()).is_err());
        assert!(ParameterStore::new(
            ScenarioParameters::default(),
            ModelSelection::new(9),
            PlaybackSettings::default(),
            ModelCatalog::reference()
        )
        .is_err());
    }
}
