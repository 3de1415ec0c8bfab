use crate::error::SimulationError;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Version of the result column layout. Bumped whenever a column is added or renamed.
pub const SCHEMA_VERSION: u32 = 1;

/// One value column of a simulation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    /// Actual / reference glucose (mg/dL).
    Actual,
    /// Population-model glucose estimate (mg/dL).
    Population,
    /// Individual digital-twin glucose estimate (mg/dL).
    Twin,
    /// Insulin delivery (U/h).
    Insulin,
    /// Meal carbohydrate (g), zero on non-meal steps.
    MealCarbs,
    HeartRate,
    SleepEfficiency,
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Actual,
        Column::Population,
        Column::Twin,
        Column::Insulin,
        Column::MealCarbs,
        Column::HeartRate,
        Column::SleepEfficiency,
    ];

    pub const GLUCOSE: [Column; 3] = [Column::Actual, Column::Population, Column::Twin];

    /// Header used by the external simulator's tabular output.
    pub fn csv_header(self) -> &'static str {
        match self {
            Column::Actual => "cgm_Actual",
            Column::Population => "cgm_NNPop",
            Column::Twin => "cgm_NNDT",
            Column::Insulin => "input_insulin",
            Column::MealCarbs => "input_meal_carbs",
            Column::HeartRate => "heart_rate",
            Column::SleepEfficiency => "sleep_efficiency",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Column::Actual => "Actual CGM",
            Column::Population => "Population Model",
            Column::Twin => "Digital Twin",
            Column::Insulin => "Insulin [U/h]",
            Column::MealCarbs => "Meal Carbs [g]",
            Column::HeartRate => "Heart Rate [BPM]",
            Column::SleepEfficiency => "Sleep Efficiency",
        }
    }

    pub fn is_glucose(self) -> bool {
        Column::GLUCOSE.contains(&self)
    }
}

/// One row of a result series, in the external simulator's column naming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub index: usize,
    #[serde(rename = "cgm_Actual")]
    pub actual: f64,
    #[serde(rename = "cgm_NNPop")]
    pub population: f64,
    #[serde(rename = "cgm_NNDT")]
    pub twin: f64,
    #[serde(rename = "input_insulin")]
    pub insulin: f64,
    #[serde(rename = "input_meal_carbs")]
    pub meal_carbs: f64,
    pub heart_rate: f64,
    pub sleep_efficiency: f64,
}

/// Ordered result series, one row per scenario step, stored column-wise.
///
/// `index` is the sole ordering key and is contiguous from 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    schema_version: u32,
    step_minutes: u32,
    index: Vec<usize>,
    actual: Vec<f64>,
    population: Vec<f64>,
    twin: Vec<f64>,
    insulin: Vec<f64>,
    meal_carbs: Vec<f64>,
    heart_rate: Vec<f64>,
    sleep_efficiency: Vec<f64>,
}

impl SimulationResult {
    /// Builds a result from rows, rejecting any break in the 0.. index sequence.
    pub fn from_rows(step_minutes: u32, rows: Vec<ResultRow>) -> Result<Self, SimulationError> {
        let n = rows.len();
        let mut result = SimulationResult {
            schema_version: SCHEMA_VERSION,
            step_minutes,
            index: Vec::with_capacity(n),
            actual: Vec::with_capacity(n),
            population: Vec::with_capacity(n),
            twin: Vec::with_capacity(n),
            insulin: Vec::with_capacity(n),
            meal_carbs: Vec::with_capacity(n),
            heart_rate: Vec::with_capacity(n),
            sleep_efficiency: Vec::with_capacity(n),
        };
        for row in rows {
            result.index.push(row.index);
            result.actual.push(row.actual);
            result.population.push(row.population);
            result.twin.push(row.twin);
            result.insulin.push(row.insulin);
            result.meal_carbs.push(row.meal_carbs);
            result.heart_rate.push(row.heart_rate);
            result.sleep_efficiency.push(row.sleep_efficiency);
        }
        result.validate()?;
        Ok(result)
    }

    /// Checks the schema version, column lengths and index contiguity.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(SimulationError::SchemaVersion {
                found: self.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        let expected = self.index.len();
        for column in Column::ALL {
            let actual = self.column(column).len();
            if actual != expected {
                return Err(SimulationError::ColumnLength {
                    column: column.csv_header(),
                    expected,
                    actual,
                });
            }
        }
        if let Some((position, &found)) = self.index.iter().enumerate().find(|(pos, idx)| *pos != **idx) {
            return Err(SimulationError::NonContiguousIndex { position, found });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn step_minutes(&self) -> u32 {
        self.step_minutes
    }

    pub fn steps_per_hour(&self) -> f64 {
        60.0 / self.step_minutes.max(1) as f64
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn column(&self, column: Column) -> &[f64] {
        match column {
            Column::Actual => &self.actual,
            Column::Population => &self.population,
            Column::Twin => &self.twin,
            Column::Insulin => &self.insulin,
            Column::MealCarbs => &self.meal_carbs,
            Column::HeartRate => &self.heart_rate,
            Column::SleepEfficiency => &self.sleep_efficiency,
        }
    }

    pub fn row(&self, i: usize) -> Option<ResultRow> {
        Some(ResultRow {
            index: *self.index.get(i)?,
            actual: self.actual[i],
            population: self.population[i],
            twin: self.twin[i],
            insulin: self.insulin[i],
            meal_carbs: self.meal_carbs[i],
            heart_rate: self.heart_rate[i],
            sleep_efficiency: self.sleep_efficiency[i],
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = ResultRow> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    // --- Tabular import/export ---

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), SimulationError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in self.rows() {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Reads the external simulator's tabular output. Every column must be present.
    pub fn read_csv<R: Read>(reader: R, step_minutes: u32) -> Result<Self, SimulationError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let required = std::iter::once("index").chain(Column::ALL.iter().map(|c| c.csv_header()));
        for name in required {
            if !headers.iter().any(|h| h == name) {
                return Err(SimulationError::MissingColumn(name.to_string()));
            }
        }
        let rows = csv_reader.deserialize::<ResultRow>().collect::<Result<Vec<_>, _>>()?;
        Self::from_rows(step_minutes, rows)
    }

    // --- File import/export ---

    /// Writes the result in the given format.
    pub fn save<P: AsRef<Path>>(&self, path: P, format: OutputFormat) -> Result<(), SimulationError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        match format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut writer, self).map_err(|e| SimulationError::Encode(e.to_string()))?
            }
            OutputFormat::Bincode => {
                bincode::serialize_into(&mut writer, self).map_err(|e| SimulationError::Encode(e.to_string()))?
            }
            OutputFormat::MessagePack => rmp_serde::encode::write_named(&mut writer, self)
                .map_err(|e| SimulationError::Encode(e.to_string()))?,
            OutputFormat::Csv => self.write_csv(&mut writer)?,
        }
        writer.flush()?;
        info!("Result series ({} rows) saved to {} ({})", self.len(), path.display(), format);
        Ok(())
    }

    /// Reads a result written by [`SimulationResult::save`] and validates it.
    /// CSV carries no cadence, so `step_minutes` is supplied by the caller.
    pub fn load<P: AsRef<Path>>(path: P, format: OutputFormat, step_minutes: u32) -> Result<Self, SimulationError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let result: SimulationResult = match format {
            OutputFormat::Json => serde_json::from_reader(reader).map_err(|e| SimulationError::Decode(e.to_string()))?,
            OutputFormat::Bincode => {
                bincode::deserialize_from(reader).map_err(|e| SimulationError::Decode(e.to_string()))?
            }
            OutputFormat::MessagePack => {
                rmp_serde::from_read(reader).map_err(|e| SimulationError::Decode(e.to_string()))?
            }
            OutputFormat::Csv => return Self::read_csv(reader, step_minutes),
        };
        result.validate()?;
        Ok(result)
    }
}

/// Result file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Bincode,
    #[serde(rename = "messagepack")]
    MessagePack,
    Csv,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Bincode => "bin",
            OutputFormat::MessagePack => "msgpack",
            OutputFormat::Csv => "csv",
        }
    }

    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(OutputFormat::Json),
            "bin" | "bincode" => Some(OutputFormat::Bincode),
            "msgpack" | "mp" => Some(OutputFormat::MessagePack),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OutputFormat::Json => "json",
            OutputFormat::Bincode => "bincode",
            OutputFormat::MessagePack => "messagepack",
            OutputFormat::Csv => "csv",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "bincode" => Ok(OutputFormat::Bincode),
            "messagepack" | "msgpack" => Ok(OutputFormat::MessagePack),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A small result with a meal at `meal_at`.
    pub(crate) fn sample(len: usize, meal_at: Option<usize>) -> SimulationResult {
        let rows = (0..len)
            .map(|i| ResultRow {
                index: i,
                actual: 100.0 + i as f64,
                population: 105.0 + i as f64,
                twin: 102.0 + i as f64,
                insulin: 1.0,
                meal_carbs: if Some(i) == meal_at { 60.0 } else { 0.0 },
                heart_rate: 70.0,
                sleep_efficiency: 0.0,
            })
            .collect();
        SimulationResult::from_rows(5, rows).unwrap()
    }

    #[test]
    fn rejects_non_contiguous_index() {
        let mut rows: Vec<ResultRow> = sample(4, None).rows().collect();
        rows[2].index = 3;
        let err = SimulationResult::from_rows(5, rows).unwrap_err();
        assert!(matches!(err, SimulationError::NonContiguousIndex { position: 2, found: 3 }));
    }

    #[test]
    fn file_formats_preserve_the_series() {
        let dir = tempfile::tempdir().unwrap();
        let result = sample(24, Some(6));
        for format in [OutputFormat::Json, OutputFormat::Bincode, OutputFormat::MessagePack, OutputFormat::Csv] {
            let path = dir.path().join(format!("result.{}", format.extension()));
            result.save(&path, format).unwrap();
            assert_eq!(OutputFormat::from_path(&path), Some(format));
            let loaded = SimulationResult::load(&path, format, 5).unwrap();
            assert_eq!(loaded, result, "format {}", format);
        }
    }

    #[test]
    fn csv_missing_column_is_an_error() {
        let data = "index,cgm_Actual,cgm_NNPop,input_insulin,input_meal_carbs,heart_rate,sleep_efficiency\n\
                    0,100,101,1,0,70,0\n";
        let err = SimulationResult::read_csv(data.as_bytes(), 5).unwrap_err();
        assert!(matches!(err, SimulationError::MissingColumn(ref c) if c == "cgm_NNDT"));
    }

    #[test]
    fn json_missing_field_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"schema_version":1,"step_minutes":5,"index":[0],"actual":[100.0]}"#).unwrap();
        let err = SimulationResult::load(&path, OutputFormat::Json, 5).unwrap_err();
        assert!(matches!(err, SimulationError::Decode(_)));
    }

    #[test]
    fn output_format_names() {
        assert_eq!("MessagePack".parse::<OutputFormat>(), Ok(OutputFormat::MessagePack));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
