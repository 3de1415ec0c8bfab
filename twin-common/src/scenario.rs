use crate::error::SimulationError;
use crate::params::ScenarioParameters;
use log::warn;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Heart rate (BPM) the models treat as rest; synthetic rows report their offset from it.
pub const RESTING_HEART_RATE: f64 = 70.0;

/// Fixed time grid of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub step_minutes: u32,
    pub horizon_minutes: u32,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            step_minutes: 5,
            horizon_minutes: 5 * 60,
        }
    }
}

impl Cadence {
    /// Number of rows in a scenario built on this grid.
    pub fn steps(&self) -> usize {
        if self.step_minutes == 0 {
            return 0;
        }
        (self.horizon_minutes / self.step_minutes) as usize
    }

    pub fn steps_per_hour(&self) -> f64 {
        60.0 / self.step_minutes.max(1) as f64
    }

    /// Row index holding the given offset, or `None` when it lies at or past the horizon.
    pub fn index_of(&self, minutes: f64) -> Option<usize> {
        if minutes < 0.0 || minutes >= self.horizon_minutes as f64 || self.step_minutes == 0 {
            return None;
        }
        let index = (minutes / self.step_minutes as f64).floor() as usize;
        (index < self.steps()).then_some(index)
    }
}

/// One fixed-cadence input row handed to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub index: usize,
    pub minute: u32,
    /// CGM reading, when known (the seed on row 0, or every row of recorded data).
    pub cgm: Option<f64>,
    /// Insulin delivery (U/h), basal plus any bolus.
    pub insulin: f64,
    pub meal_carbs: f64,
    pub heart_rate: f64,
    pub heart_rate_wrt_baseline: f64,
    pub sleep_efficiency: f64,
    pub hour_of_day_sin: f64,
    pub hour_of_day_cos: f64,
    pub is_weekend: bool,
}

/// Something the builder had to drop from the requested parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScenarioWarning {
    MealOutsideHorizon { meal_time: f64, horizon_minutes: u32 },
    SleepOutsideHorizon { sleep_start: f64, horizon_minutes: u32 },
}

impl fmt::Display for ScenarioWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioWarning::MealOutsideHorizon { meal_time, horizon_minutes } => write!(
                f,
                "meal at {:.0} min lies outside the {} min scenario horizon and was dropped",
                meal_time, horizon_minutes
            ),
            ScenarioWarning::SleepOutsideHorizon { sleep_start, horizon_minutes } => write!(
                f,
                "sleep window starting at {:.0} min lies outside the {} min scenario horizon and was dropped",
                sleep_start, horizon_minutes
            ),
        }
    }
}

/// Input series for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub cadence: Cadence,
    pub rows: Vec<ScenarioRow>,
    #[serde(default)]
    pub warnings: Vec<ScenarioWarning>,
}

impl Scenario {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when every row carries a CGM reading.
    pub fn has_recorded_cgm(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|row| row.cgm.is_some())
    }
}

/// Produces a scenario from parameters. Must be deterministic.
pub trait ScenarioBuilder: Send + Sync {
    fn build(&self, params: &ScenarioParameters) -> Result<Scenario, SimulationError>;

    fn cadence(&self) -> Cadence;
}

/// Adds the meal (carbs plus bolus) to its row, or records a warning when it is outside the horizon.
fn place_meal(cadence: Cadence, params: &ScenarioParameters, rows: &mut [ScenarioRow], warnings: &mut Vec<ScenarioWarning>) {
    match cadence.index_of(params.meal_time) {
        Some(index) => {
            let row = &mut rows[index];
            row.meal_carbs += params.meal_size;
            row.insulin += params.meal_size / params.carb_ratio;
        }
        None => {
            let warning = ScenarioWarning::MealOutsideHorizon {
                meal_time: params.meal_time,
                horizon_minutes: cadence.horizon_minutes,
            };
            warn!("{}", warning);
            warnings.push(warning);
        }
    }
}

/// Builds a scenario from parameters alone: constant basal, one meal, optional sleep.
#[derive(Debug, Clone)]
pub struct SyntheticScenario {
    pub cadence: Cadence,
    /// Wall-clock hour at scenario start, drives the hour-of-day features.
    pub start_hour: u32,
    pub weekend: bool,
    /// Sleep efficiency applied to rows inside the sleep window.
    pub sleep_efficiency: f64,
}

impl SyntheticScenario {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            cadence,
            start_hour: 8,
            weekend: false,
            sleep_efficiency: 0.85,
        }
    }
}

impl ScenarioBuilder for SyntheticScenario {
    fn build(&self, params: &ScenarioParameters) -> Result<Scenario, SimulationError> {
        let steps = self.cadence.steps();
        if steps == 0 {
            return Err(SimulationError::Scenario("scenario horizon holds no steps".to_string()));
        }

        let mut rows: Vec<ScenarioRow> = (0..steps)
            .map(|index| {
                let minute = index as u32 * self.cadence.step_minutes;
                // Whole hours, as the calendar features were trained on.
                let hour = ((self.start_hour * 60 + minute) / 60) % 24;
                let angle = 2.0 * PI * hour as f64 / 24.0;
                ScenarioRow {
                    index,
                    minute,
                    cgm: (index == 0).then_some(params.init_cgm),
                    insulin: params.basal_insulin,
                    meal_carbs: 0.0,
                    heart_rate: params.heart_rate,
                    heart_rate_wrt_baseline: params.heart_rate - RESTING_HEART_RATE,
                    sleep_efficiency: 0.0,
                    hour_of_day_sin: angle.sin(),
                    hour_of_day_cos: angle.cos(),
                    is_weekend: self.weekend,
                }
            })
            .collect();

        let mut warnings = Vec::new();
        place_meal(self.cadence, params, &mut rows, &mut warnings);

        if let Some(sleep) = params.sleep {
            match self.cadence.index_of(sleep.start_min) {
                Some(_) => {
                    let end = sleep.start_min + sleep.duration_min;
                    for row in rows.iter_mut() {
                        let minute = row.minute as f64;
                        if minute >= sleep.start_min && minute < end {
                            row.sleep_efficiency = self.sleep_efficiency;
                        }
                    }
                }
                None => {
                    let warning = ScenarioWarning::SleepOutsideHorizon {
                        sleep_start: sleep.start_min,
                        horizon_minutes: self.cadence.horizon_minutes,
                    };
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        Ok(Scenario {
            cadence: self.cadence,
            rows,
            warnings,
        })
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }
}

/// Column names of recorded patient data.
pub const RECORDED_COLUMNS: [&str; 9] = [
    "output_cgm",
    "input_insulin",
    "input_meal_carbs",
    "heart_rate",
    "sleep_efficiency",
    "feat_hour_of_day_sin",
    "feat_hour_of_day_cos",
    "feat_is_weekend",
    "heart_rate_WRTbaseline",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RecordedRow {
    output_cgm: f64,
    input_insulin: f64,
    input_meal_carbs: f64,
    heart_rate: f64,
    sleep_efficiency: f64,
    feat_hour_of_day_sin: f64,
    feat_hour_of_day_cos: f64,
    feat_is_weekend: f64,
    #[serde(rename = "heart_rate_WRTbaseline")]
    heart_rate_wrt_baseline: f64,
}

/// Replays a horizon-sized window of recorded patient data, with the planned meal overlaid.
///
/// The recorded insulin and CGM replace `basal_insulin` and `init_cgm`.
#[derive(Debug, Clone)]
pub struct RecordedScenario {
    cadence: Cadence,
    rows: Vec<RecordedRow>,
}

impl RecordedScenario {
    pub fn from_csv<P: AsRef<Path>>(path: P, offset: usize, cadence: Cadence) -> Result<Self, SimulationError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file, offset, cadence)
    }

    pub fn from_reader<R: Read>(reader: R, offset: usize, cadence: Cadence) -> Result<Self, SimulationError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        for column in RECORDED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(SimulationError::MissingColumn(column.to_string()));
            }
        }

        let steps = cadence.steps();
        let rows = csv_reader
            .deserialize::<RecordedRow>()
            .skip(offset)
            .take(steps)
            .collect::<Result<Vec<_>, _>>()?;

        if rows.len() < steps {
            return Err(SimulationError::Scenario(format!(
                "recorded data holds {} rows after offset {}, the horizon needs {}",
                rows.len(),
                offset,
                steps
            )));
        }

        Ok(Self { cadence, rows })
    }
}

impl ScenarioBuilder for RecordedScenario {
    fn build(&self, params: &ScenarioParameters) -> Result<Scenario, SimulationError> {
        let mut rows: Vec<ScenarioRow> = self
            .rows
            .iter()
            .enumerate()
            .map(|(index, recorded)| ScenarioRow {
                index,
                minute: index as u32 * self.cadence.step_minutes,
                cgm: Some(recorded.output_cgm),
                insulin: recorded.input_insulin,
                meal_carbs: recorded.input_meal_carbs,
                heart_rate: recorded.heart_rate,
                heart_rate_wrt_baseline: recorded.heart_rate_wrt_baseline,
                sleep_efficiency: recorded.sleep_efficiency,
                hour_of_day_sin: recorded.feat_hour_of_day_sin,
                hour_of_day_cos: recorded.feat_hour_of_day_cos,
                is_weekend: recorded.feat_is_weekend != 0.0,
            })
            .collect();

        let mut warnings = Vec::new();
        if params.meal_size > 0.0 {
            place_meal(self.cadence, params, &mut rows, &mut warnings);
        }

        Ok(Scenario {
            cadence: self.cadence,
            rows,
            warnings,
        })
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SleepWindow;

    #[test]
    fn synthetic_scenario_places_meal_and_bolus() {
        let builder = SyntheticScenario::new(Cadence::default());
        let scenario = builder.build(&ScenarioParameters::default()).unwrap();

        assert_eq!(scenario.len(), 60);
        assert!(scenario.warnings.is_empty());
        assert_eq!(scenario.rows[0].cgm, Some(110.0));
        assert_eq!(scenario.rows[1].cgm, None);

        let meal = &scenario.rows[12];
        assert_eq!(meal.minute, 60);
        assert_eq!(meal.meal_carbs, 75.0);
        assert!((meal.insulin - 7.25).abs() < 1e-12);

        let carb_rows = scenario.rows.iter().filter(|r| r.meal_carbs != 0.0).count();
        assert_eq!(carb_rows, 1);
        assert!(scenario.rows.iter().enumerate().all(|(i, r)| i == 12 || r.insulin == 1.0));
    }

    #[test]
    fn meal_outside_horizon_is_dropped_with_warning() {
        let builder = SyntheticScenario::new(Cadence::default());
        let params = ScenarioParameters { meal_time: 300.0, ..ScenarioParameters::default() };
        let scenario = builder.build(&params).unwrap();

        assert!(scenario.rows.iter().all(|r| r.meal_carbs == 0.0 && r.insulin == 1.0));
        assert_eq!(
            scenario.warnings,
            vec![ScenarioWarning::MealOutsideHorizon { meal_time: 300.0, horizon_minutes: 300 }]
        );
    }

    #[test]
    fn sleep_window_sets_efficiency() {
        let builder = SyntheticScenario::new(Cadence::default());
        let params = ScenarioParameters {
            sleep: Some(SleepWindow { start_min: 240.0, duration_min: 600.0 }),
            ..ScenarioParameters::default()
        };
        let scenario = builder.build(&params).unwrap();
        assert_eq!(scenario.rows[47].sleep_efficiency, 0.0);
        assert!(scenario.rows[48..].iter().all(|r| r.sleep_efficiency == 0.85));

        let late = ScenarioParameters {
            sleep: Some(SleepWindow { start_min: 780.0, duration_min: 480.0 }),
            ..ScenarioParameters::default()
        };
        let scenario = builder.build(&late).unwrap();
        assert_eq!(scenario.warnings.len(), 1);
    }

    #[test]
    fn hour_features_follow_start_hour() {
        let mut builder = SyntheticScenario::new(Cadence::default());
        builder.start_hour = 0;
        let scenario = builder.build(&ScenarioParameters::default()).unwrap();
        assert!((scenario.rows[0].hour_of_day_cos - 1.0).abs() < 1e-12);
        assert!(scenario.rows[0].hour_of_day_sin.abs() < 1e-12);
        // hour 3 starts at row 36
        assert_eq!(scenario.rows[35].hour_of_day_sin, scenario.rows[24].hour_of_day_sin);
        assert_ne!(scenario.rows[36].hour_of_day_sin, scenario.rows[35].hour_of_day_sin);
    }

    #[test]
    fn heart_rate_is_relative_to_rest() {
        let builder = SyntheticScenario::new(Cadence::default());
        let resting = builder.build(&ScenarioParameters::default()).unwrap();
        assert!(resting.rows.iter().all(|r| r.heart_rate_wrt_baseline == 0.0));

        let params = ScenarioParameters {
            heart_rate: 110.0,
            ..ScenarioParameters::default()
        };
        let active = builder.build(&params).unwrap();
        assert!(active.rows.iter().all(|r| r.heart_rate_wrt_baseline == 40.0));
    }

    #[test]
    fn identical_parameters_build_identical_scenarios() {
        let builder = SyntheticScenario::new(Cadence::default());
        let params = ScenarioParameters::default();
        assert_eq!(builder.build(&params).unwrap(), builder.build(&params).unwrap());
    }

    fn recorded_csv(rows: usize) -> String {
        let mut csv = String::from(
            "output_cgm,input_insulin,input_meal_carbs,heart_rate,sleep_efficiency,is_train,\
             feat_hour_of_day_sin,feat_hour_of_day_cos,feat_is_weekend,heart_rate_WRTbaseline\n",
        );
        for i in 0..rows {
            csv.push_str(&format!("{},0.8,0,65,0,1,0,1,0,0\n", 100 + i));
        }
        csv
    }

    #[test]
    fn recorded_scenario_takes_window_and_overlays_meal() {
        let cadence = Cadence { step_minutes: 5, horizon_minutes: 60 };
        let builder = RecordedScenario::from_reader(recorded_csv(20).as_bytes(), 3, cadence).unwrap();
        let params = ScenarioParameters { meal_time: 10.0, meal_size: 24.0, ..ScenarioParameters::default() };
        let scenario = builder.build(&params).unwrap();

        assert_eq!(scenario.len(), 12);
        assert!(scenario.has_recorded_cgm());
        assert_eq!(scenario.rows[0].cgm, Some(103.0));
        assert_eq!(scenario.rows[2].meal_carbs, 24.0);
        assert!((scenario.rows[2].insulin - 2.8).abs() < 1e-12);
    }

    #[test]
    fn recorded_scenario_rejects_missing_columns_and_short_data() {
        let cadence = Cadence { step_minutes: 5, horizon_minutes: 60 };
        let err = RecordedScenario::from_reader("output_cgm,input_insulin\n100,1\n".as_bytes(), 0, cadence).unwrap_err();
        assert!(matches!(err, SimulationError::MissingColumn(ref c) if c == "input_meal_carbs"));

        let err = RecordedScenario::from_reader(recorded_csv(10).as_bytes(), 0, cadence).unwrap_err();
        assert!(matches!(err, SimulationError::Scenario(_)));
    }
}
