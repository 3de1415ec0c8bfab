use crate::controller::PlaybackOptions;
use crate::food::{FoodDatabase, FoodLog};
use crate::params::{
    ModelSelection, ParameterStore, PlaybackSettings, ScenarioParameters, SleepWindow, MAX_TICK_INTERVAL_MS,
    MIN_TICK_INTERVAL_MS,
};
use crate::result::OutputFormat;
use crate::scenario::{Cadence, RecordedScenario, ScenarioBuilder, SyntheticScenario};
use crate::simulator::{ReferenceTwin, Simulator};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// Time grid and calendar of the scenario
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub step_minutes: u32,
    pub horizon_minutes: u32,
    pub start_hour: u32,
    pub weekend: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            step_minutes: 5,
            horizon_minutes: 300,
            start_hour: 8,
            weekend: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioSource {
    #[default]
    Synthetic,
    Recorded,
}

// Initial scenario parameters and where the input series comes from
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ScenarioConfig {
    pub init_cgm: f64,
    pub basal_insulin: f64,
    pub carb_ratio: f64,
    pub meal_size: f64,
    pub meal_time: f64,
    pub heart_rate: f64,
    pub sleep_start: Option<f64>,
    pub sleep_duration: Option<f64>,
    pub sleep_efficiency: f64,
    pub source: ScenarioSource,
    pub recorded_path: Option<PathBuf>,
    pub recorded_offset: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        let defaults = ScenarioParameters::default();
        Self {
            init_cgm: defaults.init_cgm,
            basal_insulin: defaults.basal_insulin,
            carb_ratio: defaults.carb_ratio,
            meal_size: defaults.meal_size,
            meal_time: defaults.meal_time,
            heart_rate: defaults.heart_rate,
            sleep_start: None,
            sleep_duration: None,
            sleep_efficiency: 0.85,
            source: ScenarioSource::Synthetic,
            recorded_path: None,
            recorded_offset: 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub digital_twin: u32,
    pub noise_seed: u64,
    pub sensor_noise_mg_dl: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            digital_twin: 0,
            noise_seed: 42,
            sensor_noise_mg_dl: 4.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tick_interval_ms: u64,
    pub window_steps: usize,
    pub loop_on_completion: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        let defaults = PlaybackSettings::default();
        Self {
            tick_interval_ms: defaults.tick_interval_ms,
            window_steps: defaults.window_steps,
            loop_on_completion: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// Output settings for the one-shot run
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub base_filename: String,
    pub format: OutputFormat,
    pub save_csv: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_filename: "twin_run".to_string(),
            format: OutputFormat::Json,
            save_csv: false,
        }
    }
}

impl OutputConfig {
    pub fn result_path(&self, format: OutputFormat) -> PathBuf {
        PathBuf::from(format!("{}_result.{}", self.base_filename, format.extension()))
    }
}

// Manual food logging
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct FoodConfig {
    /// JSON file the log is kept in; `None` keeps it in memory.
    pub log_path: Option<PathBuf>,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            log_path: Some(PathBuf::from("food_log.json")),
        }
    }
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub scenario: ScenarioConfig,
    pub model: ModelConfig,
    pub playback: PlaybackConfig,
    pub server: ServerConfig,
    pub output: OutputConfig,
    pub food: FoodConfig,
}

impl EngineConfig {
    /// Loads the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;

        info!("Loaded configuration from {}", path_ref.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timing.step_minutes == 0 {
            anyhow::bail!("step_minutes must be greater than 0.");
        }
        if self.timing.horizon_minutes < self.timing.step_minutes {
            anyhow::bail!("horizon_minutes must cover at least one step.");
        }
        if self.timing.horizon_minutes % self.timing.step_minutes != 0 {
            anyhow::bail!(
                "horizon_minutes ({}) must be a multiple of step_minutes ({}).",
                self.timing.horizon_minutes,
                self.timing.step_minutes
            );
        }
        if self.timing.start_hour > 23 {
            anyhow::bail!("start_hour must be between 0 and 23.");
        }
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&self.playback.tick_interval_ms) {
            anyhow::bail!(
                "tick_interval_ms must be between {} and {}.",
                MIN_TICK_INTERVAL_MS,
                MAX_TICK_INTERVAL_MS
            );
        }
        if self.playback.window_steps == 0 {
            anyhow::bail!("window_steps must be greater than 0.");
        }
        if !(0.0..=1.0).contains(&self.scenario.sleep_efficiency) {
            anyhow::bail!("sleep_efficiency must be between 0 and 1.");
        }
        if self.scenario.source == ScenarioSource::Recorded && self.scenario.recorded_path.is_none() {
            anyhow::bail!("source = \"recorded\" requires recorded_path.");
        }
        if self.model.sensor_noise_mg_dl < 0.0 {
            anyhow::bail!("sensor_noise_mg_dl must not be negative.");
        }
        self.initial_parameters().validate()?;
        Ok(())
    }

    pub fn cadence(&self) -> Cadence {
        Cadence {
            step_minutes: self.timing.step_minutes,
            horizon_minutes: self.timing.horizon_minutes,
        }
    }

    /// A sleep window is configured by either of its two keys; the other takes its default.
    pub fn initial_parameters(&self) -> ScenarioParameters {
        let s = &self.scenario;
        let sleep = match (s.sleep_start, s.sleep_duration) {
            (None, None) => None,
            (start, duration) => Some(SleepWindow {
                start_min: start.unwrap_or(crate::params::DEFAULT_SLEEP_START_MIN),
                duration_min: duration.unwrap_or(crate::params::DEFAULT_SLEEP_DURATION_MIN),
            }),
        };
        ScenarioParameters {
            init_cgm: s.init_cgm,
            basal_insulin: s.basal_insulin,
            carb_ratio: s.carb_ratio,
            meal_size: s.meal_size,
            meal_time: s.meal_time,
            heart_rate: s.heart_rate,
            sleep,
        }
    }

    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            tick_interval_ms: self.playback.tick_interval_ms,
            window_steps: self.playback.window_steps,
        }
    }

    pub fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions {
            loop_on_completion: self.playback.loop_on_completion,
        }
    }

    pub fn simulator(&self) -> ReferenceTwin {
        ReferenceTwin::new(self.model.noise_seed, self.model.sensor_noise_mg_dl)
    }

    /// Builds the parameter store with the initial values, validated against the simulator's catalog.
    pub fn parameter_store(&self, simulator: &dyn Simulator) -> Result<ParameterStore> {
        let store = ParameterStore::new(
            self.initial_parameters(),
            ModelSelection::new(self.model.digital_twin),
            self.playback_settings(),
            simulator.catalog(),
        )?;
        Ok(store)
    }

    pub fn food_log(&self) -> Result<FoodLog> {
        match &self.food.log_path {
            Some(path) => FoodLog::open(path, FoodDatabase::default())
                .map_err(|e| anyhow::anyhow!("Failed to open food log '{}': {}", path.display(), e)),
            None => Ok(FoodLog::in_memory(FoodDatabase::default())),
        }
    }

    /// Reads recorded data when configured, so a bad file fails at startup.
    pub fn scenario_builder(&self) -> Result<Box<dyn ScenarioBuilder>> {
        match (self.scenario.source, &self.scenario.recorded_path) {
            (ScenarioSource::Recorded, Some(path)) => {
                let builder = RecordedScenario::from_csv(path, self.scenario.recorded_offset, self.cadence())
                    .map_err(|e| anyhow::anyhow!("Failed to load recorded data '{}': {}", path.display(), e))?;
                info!(
                    "Using recorded scenario from {} (offset {})",
                    path.display(),
                    self.scenario.recorded_offset
                );
                Ok(Box::new(builder))
            }
            (ScenarioSource::Recorded, None) => anyhow::bail!("source = \"recorded\" requires recorded_path."),
            (ScenarioSource::Synthetic, _) => Ok(Box::new(SyntheticScenario {
                cadence: self.cadence(),
                start_hour: self.timing.start_hour,
                weekend: self.timing.weekend,
                sleep_efficiency: self.scenario.sleep_efficiency,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_a_valid_config() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.cadence().steps(), 60);
        assert_eq!(config.initial_parameters(), ScenarioParameters::default());
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(!config.playback_options().loop_on_completion);
    }

    #[test]
    fn sections_override_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [timing]
            step_minutes = 15
            horizon_minutes = 600

            [scenario]
            meal_size = 40.0
            sleep_start = 120.0

            [model]
            digital_twin = 2

            [playback]
            tick_interval_ms = 100
            loop_on_completion = true

            [output]
            format = "messagepack"
            "#,
        )
        .unwrap();
        assert_eq!(config.cadence().steps(), 40);
        let params = config.initial_parameters();
        assert_eq!(params.meal_size, 40.0);
        assert_eq!(params.sleep.map(|s| s.duration_min), Some(crate::params::DEFAULT_SLEEP_DURATION_MIN));
        assert_eq!(config.output.format, OutputFormat::MessagePack);
        assert_eq!(config.output.result_path(OutputFormat::MessagePack), PathBuf::from("twin_run_result.msgpack"));

        let store = config.parameter_store(&config.simulator()).unwrap();
        assert_eq!(store.snapshot().model, ModelSelection::new(2));
        assert_eq!(store.snapshot().playback.tick_interval_ms, 100);
    }

    #[test]
    fn food_log_location_is_configurable() {
        let config = EngineConfig::default();
        assert_eq!(config.food.log_path, Some(PathBuf::from("food_log.json")));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meals.json");
        let config = EngineConfig::from_toml(&format!("[food]\nlog_path = {:?}\n", path.display().to_string())).unwrap();
        assert!(config.food_log().unwrap().is_empty());

        let config = EngineConfig::from_toml("[food]\n").unwrap();
        assert!(config.food.log_path.is_some());
    }

    #[test]
    fn rejects_inconsistent_values() {
        assert!(EngineConfig::from_toml("[timing]\nhorizon_minutes = 302").is_err());
        assert!(EngineConfig::from_toml("[playback]\ntick_interval_ms = 500").is_err());
        assert!(EngineConfig::from_toml("[scenario]\ncarb_ratio = 0.0").is_err());
        assert!(EngineConfig::from_toml("[scenario]\nsource = \"recorded\"").is_err());

        let config = EngineConfig::from_toml("[model]\ndigital_twin = 9").unwrap();
        assert!(config.parameter_store(&config.simulator()).is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:9000\"\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn synthetic_builder_uses_timing() {
        let config = EngineConfig::from_toml("[timing]\nstart_hour = 22\nweekend = true").unwrap();
        let scenario = config.scenario_builder().unwrap().build(&config.initial_parameters()).unwrap();
        assert_eq!(scenario.len(), 60);
        assert!(scenario.rows[0].is_weekend);
    }
}
