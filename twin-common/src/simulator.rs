use crate::error::SimulationError;
use crate::params::ModelSelection;
use crate::result::{ResultRow, SimulationResult};
use crate::scenario::Scenario;
use log::{debug, info};
use rand::prelude::*;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// Readings outside the sensor range are reported at the range limits (mg/dL).
const SENSOR_FLOOR: f64 = 39.0;
const SENSOR_CEILING: f64 = 401.0;

/// Runs a scenario through one model variant. May be slow; may fail.
pub trait Simulator: Send + Sync {
    /// The set of model ids this simulator accepts.
    fn catalog(&self) -> ModelCatalog;

    fn simulate(&self, scenario: &Scenario, model: ModelSelection) -> Result<SimulationResult, SimulationError>;
}

/// Known digital twin variants; ids are `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    labels: Vec<String>,
}

impl ModelCatalog {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// The five trained patient models shipped with the reference simulator.
    pub fn reference() -> Self {
        Self::new(REFERENCE_TWINS.iter().map(|(label, _)| label.to_string()).collect())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, model: ModelSelection) -> bool {
        (model.id() as usize) < self.labels.len()
    }

    pub fn label(&self, model: ModelSelection) -> Option<&str> {
        self.labels.get(model.id() as usize).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Individual physiology of one model variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TwinParameters {
    /// Glucose drop per unit of active insulin (mg/dL per U).
    pub insulin_sensitivity: f64,
    /// Glucose rise per gram of absorbed carbohydrate (mg/dL per g).
    pub carb_sensitivity: f64,
    pub insulin_half_life_min: f64,
    pub carb_half_life_min: f64,
    /// Basal rate (U/h) at which endogenous production is balanced.
    pub balanced_basal: f64,
    /// Fraction of the distance to `target` recovered per step.
    pub reversion: f64,
    pub target: f64,
    /// Glucose drop per BPM above the heart-rate baseline, per step.
    pub heart_rate_effect: f64,
    /// Glucose drop per step at full sleep efficiency.
    pub sleep_effect: f64,
}

const REFERENCE_TWINS: [(&str, TwinParameters); 5] = [
    (
        "T1DEXI-01-0102",
        TwinParameters {
            insulin_sensitivity: 45.0,
            carb_sensitivity: 3.2,
            insulin_half_life_min: 55.0,
            carb_half_life_min: 35.0,
            balanced_basal: 0.9,
            reversion: 0.010,
            target: 120.0,
            heart_rate_effect: 0.05,
            sleep_effect: 0.4,
        },
    ),
    (
        "T1DEXI-01-0692",
        TwinParameters {
            insulin_sensitivity: 30.0,
            carb_sensitivity: 2.6,
            insulin_half_life_min: 70.0,
            carb_half_life_min: 45.0,
            balanced_basal: 1.2,
            reversion: 0.008,
            target: 135.0,
            heart_rate_effect: 0.04,
            sleep_effect: 0.3,
        },
    ),
    (
        "T1DEXI-01-0794",
        TwinParameters {
            insulin_sensitivity: 60.0,
            carb_sensitivity: 4.0,
            insulin_half_life_min: 45.0,
            carb_half_life_min: 30.0,
            balanced_basal: 0.7,
            reversion: 0.012,
            target: 110.0,
            heart_rate_effect: 0.06,
            sleep_effect: 0.5,
        },
    ),
    (
        "T1DEXI-01-0880",
        TwinParameters {
            insulin_sensitivity: 38.0,
            carb_sensitivity: 3.0,
            insulin_half_life_min: 60.0,
            carb_half_life_min: 40.0,
            balanced_basal: 1.0,
            reversion: 0.009,
            target: 125.0,
            heart_rate_effect: 0.05,
            sleep_effect: 0.35,
        },
    ),
    (
        "T1DEXI-01-1047",
        TwinParameters {
            insulin_sensitivity: 52.0,
            carb_sensitivity: 3.6,
            insulin_half_life_min: 50.0,
            carb_half_life_min: 38.0,
            balanced_basal: 0.8,
            reversion: 0.011,
            target: 115.0,
            heart_rate_effect: 0.07,
            sleep_effect: 0.45,
        },
    ),
];

/// Population-average physiology, the baseline every twin is compared against.
pub const POPULATION_MODEL: TwinParameters = TwinParameters {
    insulin_sensitivity: 45.0,
    carb_sensitivity: 3.3,
    insulin_half_life_min: 56.0,
    carb_half_life_min: 38.0,
    balanced_basal: 0.92,
    reversion: 0.010,
    target: 121.0,
    heart_rate_effect: 0.054,
    sleep_effect: 0.4,
};

/// In-process reference implementation of the simulator contract.
///
/// Each variant is a discrete insulin-on-board / carbs-on-board model. The
/// `actual` column is the recorded CGM when the scenario carries one, and the
/// twin's trajectory plus seeded sensor noise otherwise.
#[derive(Debug, Clone)]
pub struct ReferenceTwin {
    catalog: ModelCatalog,
    twins: Vec<TwinParameters>,
    population: TwinParameters,
    noise_seed: u64,
    /// Standard deviation of sensor noise (mg/dL). Zero disables noise.
    noise_sd: f64,
}

impl Default for ReferenceTwin {
    fn default() -> Self {
        Self::new(42, 4.0)
    }
}

impl ReferenceTwin {
    pub fn new(noise_seed: u64, noise_sd: f64) -> Self {
        Self {
            catalog: ModelCatalog::reference(),
            twins: REFERENCE_TWINS.iter().map(|(_, params)| *params).collect(),
            population: POPULATION_MODEL,
            noise_seed,
            noise_sd,
        }
    }

    pub fn twin(&self, model: ModelSelection) -> Option<&TwinParameters> {
        self.twins.get(model.id() as usize)
    }

    /// Predicted glucose trajectory of one parameter set over the scenario.
    fn trajectory(&self, scenario: &Scenario, params: &TwinParameters) -> Vec<f64> {
        let dt = scenario.cadence.step_minutes as f64;
        let insulin_decay = 0.5f64.powf(dt / params.insulin_half_life_min);
        let carb_decay = 0.5f64.powf(dt / params.carb_half_life_min);
        let production = params.insulin_sensitivity * params.balanced_basal * dt / 60.0;

        let mut glucose = scenario
            .rows
            .first()
            .and_then(|row| row.cgm)
            .unwrap_or(params.target);
        let mut insulin_on_board = 0.0;
        let mut carbs_on_board = 0.0;
        let mut trajectory = Vec::with_capacity(scenario.len());

        for row in &scenario.rows {
            trajectory.push(glucose);

            // --- Absorption ---
            insulin_on_board += row.insulin * dt / 60.0;
            carbs_on_board += row.meal_carbs;
            let insulin_active = insulin_on_board * (1.0 - insulin_decay);
            let carbs_absorbed = carbs_on_board * (1.0 - carb_decay);
            insulin_on_board -= insulin_active;
            carbs_on_board -= carbs_absorbed;

            // --- Glucose update ---
            let delta = carbs_absorbed * params.carb_sensitivity - insulin_active * params.insulin_sensitivity
                + production
                - (glucose - params.target) * params.reversion
                - row.heart_rate_wrt_baseline.max(0.0) * params.heart_rate_effect
                - row.sleep_efficiency * params.sleep_effect;
            glucose = (glucose + delta).clamp(SENSOR_FLOOR, SENSOR_CEILING);
        }
        trajectory
    }
}

impl Simulator for ReferenceTwin {
    fn catalog(&self) -> ModelCatalog {
        self.catalog.clone()
    }

    fn simulate(&self, scenario: &Scenario, model: ModelSelection) -> Result<SimulationResult, SimulationError> {
        let twin = self.twin(model).ok_or(SimulationError::UnknownModel {
            id: model.id(),
            count: self.twins.len() as u32,
        })?;
        debug!(
            "Simulating {} rows with twin {} ({})",
            scenario.len(),
            model,
            self.catalog.label(model).unwrap_or("?")
        );

        let population = self.trajectory(scenario, &self.population);
        let individual = self.trajectory(scenario, twin);

        let actual: Vec<f64> = if scenario.has_recorded_cgm() {
            scenario.rows.iter().map(|row| row.cgm.unwrap_or_default()).collect()
        } else if self.noise_sd > 0.0 {
            let noise = Normal::new(0.0, self.noise_sd).map_err(|e| SimulationError::Model(e.to_string()))?;
            let mut rng = StdRng::seed_from_u64(self.noise_seed ^ model.id() as u64);
            individual
                .iter()
                .map(|g| (g + rng.sample(noise)).clamp(SENSOR_FLOOR, SENSOR_CEILING))
                .collect()
        } else {
            individual.clone()
        };

        let rows = scenario
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| ResultRow {
                index: row.index,
                actual: actual[i],
                population: population[i],
                twin: individual[i],
                insulin: row.insulin,
                meal_carbs: row.meal_carbs,
                heart_rate: row.heart_rate,
                sleep_efficiency: row.sleep_efficiency,
            })
            .collect();

        let result = SimulationResult::from_rows(scenario.cadence.step_minutes, rows)?;
        info!("Simulation with twin {} produced {} rows.", model, result.len());
        Ok(result)
    }
}
