use crate::error::FoodLogError;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodCategory {
    Fruit,
    Grains,
    Vegetables,
    Dairy,
    Protein,
    FastFood,
    Dessert,
    Breakfast,
    Lunch,
    Dinner,
}

/// Carbohydrate content of one serving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FoodItem {
    pub name: &'static str,
    /// Grams of carbohydrate per serving.
    pub carbs: f64,
    pub category: FoodCategory,
}

const fn food(name: &'static str, carbs: f64, category: FoodCategory) -> FoodItem {
    FoodItem { name, carbs, category }
}

const REFERENCE_FOODS: [FoodItem; 28] = [
    food("apple", 25.0, FoodCategory::Fruit),
    food("banana", 27.0, FoodCategory::Fruit),
    food("orange", 15.0, FoodCategory::Fruit),
    food("bread", 15.0, FoodCategory::Grains),
    food("rice", 45.0, FoodCategory::Grains),
    food("pasta", 43.0, FoodCategory::Grains),
    food("potato", 37.0, FoodCategory::Vegetables),
    food("corn", 25.0, FoodCategory::Vegetables),
    food("milk", 12.0, FoodCategory::Dairy),
    food("yogurt", 17.0, FoodCategory::Dairy),
    food("chicken", 0.0, FoodCategory::Protein),
    food("fish", 0.0, FoodCategory::Protein),
    food("beef", 0.0, FoodCategory::Protein),
    food("pizza", 30.0, FoodCategory::FastFood),
    food("burger", 35.0, FoodCategory::FastFood),
    food("fries", 45.0, FoodCategory::FastFood),
    food("cake", 50.0, FoodCategory::Dessert),
    food("cookie", 25.0, FoodCategory::Dessert),
    food("ice cream", 30.0, FoodCategory::Dessert),
    food("cereal", 30.0, FoodCategory::Breakfast),
    food("oatmeal", 27.0, FoodCategory::Breakfast),
    food("pancakes", 35.0, FoodCategory::Breakfast),
    food("sandwich", 30.0, FoodCategory::Lunch),
    food("salad", 10.0, FoodCategory::Lunch),
    food("soup", 15.0, FoodCategory::Lunch),
    food("steak", 0.0, FoodCategory::Dinner),
    food("salmon", 0.0, FoodCategory::Dinner),
    food("vegetables", 10.0, FoodCategory::Dinner),
];

#[derive(Debug, Clone)]
pub struct FoodDatabase {
    items: Vec<FoodItem>,
}

impl Default for FoodDatabase {
    fn default() -> Self {
        Self {
            items: REFERENCE_FOODS.to_vec(),
        }
    }
}

impl FoodDatabase {
    /// Case-insensitive lookup by name.
    pub fn lookup(&self, name: &str) -> Option<&FoodItem> {
        let name = name.trim().to_lowercase();
        self.items.iter().find(|item| item.name == name)
    }

    pub fn items(&self) -> &[FoodItem] {
        &self.items
    }
}

/// One logged intake; `carbs` is already multiplied by `quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    pub timestamp: DateTime<Utc>,
    pub food_name: String,
    pub carbs: f64,
    pub category: FoodCategory,
    pub quantity: f64,
    pub unit: String,
}

/// Manually logged meals, optionally persisted as a JSON array.
///
/// Every successful change is written through to the backing file.
#[derive(Debug)]
pub struct FoodLog {
    database: FoodDatabase,
    entries: Vec<FoodEntry>,
    path: Option<PathBuf>,
}

impl FoodLog {
    pub fn in_memory(database: FoodDatabase) -> Self {
        Self {
            database,
            entries: Vec::new(),
            path: None,
        }
    }

    /// Opens the log at `path`. A missing file starts an empty log.
    pub fn open<P: AsRef<Path>>(path: P, database: FoodDatabase) -> Result<Self, FoodLogError> {
        let path = path.as_ref();
        let entries = match File::open(path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let log = Self {
            database,
            entries,
            path: Some(path.to_path_buf()),
        };
        info!("Food log {} holds {} entries", path.display(), log.len());
        Ok(log)
    }

    pub fn database(&self) -> &FoodDatabase {
        &self.database
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logs `quantity` servings of a known food eaten at `at`.
    pub fn log(&mut self, name: &str, quantity: f64, unit: &str, at: DateTime<Utc>) -> Result<FoodEntry, FoodLogError> {
        let item = *self
            .database
            .lookup(name)
            .ok_or_else(|| FoodLogError::UnknownFood(name.to_string()))?;
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(FoodLogError::InvalidQuantity(quantity));
        }

        let entry = FoodEntry {
            timestamp: at,
            food_name: item.name.to_string(),
            carbs: item.carbs * quantity,
            category: item.category,
            quantity,
            unit: unit.to_string(),
        };
        self.entries.push(entry.clone());
        if let Err(e) = self.save() {
            self.entries.pop();
            return Err(e);
        }
        info!("Logged {} x {} ({:.0} g carbs)", quantity, entry.food_name, entry.carbs);
        Ok(entry)
    }

    /// Logs an intake eaten now.
    pub fn record(&mut self, name: &str, quantity: f64, unit: &str) -> Result<FoodEntry, FoodLogError> {
        self.log(name, quantity, unit, Utc::now())
    }

    /// Carbohydrate eaten within the last `hours`.
    pub fn carbs_last(&self, hours: f64) -> f64 {
        self.total_carbs(hours, Utc::now())
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> &[FoodEntry] {
        &self.entries[self.entries.len().saturating_sub(limit)..]
    }

    /// Carbohydrate eaten within `hours` before `now`.
    pub fn total_carbs(&self, hours: f64, now: DateTime<Utc>) -> f64 {
        let window_secs = hours * 3600.0;
        self.entries
            .iter()
            .filter(|entry| (now - entry.timestamp).num_seconds() as f64 <= window_secs)
            .map(|entry| entry.carbs)
            .sum()
    }

    pub fn clear(&mut self) -> Result<(), FoodLogError> {
        let previous = std::mem::take(&mut self.entries);
        if let Err(e) = self.save() {
            self.entries = previous;
            return Err(e);
        }
        info!("Food log cleared ({} entries)", previous.len());
        Ok(())
    }

    fn save(&self) -> Result<(), FoodLogError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let result = File::create(path).map_err(FoodLogError::from).and_then(|file| {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.entries)?;
            writer.flush()?;
            Ok(())
        });
        if let Err(e) = &result {
            warn!("Failed to save food log {}: {}", path.display(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn lookup_ignores_case_and_spacing() {
        let db = FoodDatabase::default();
        assert_eq!(db.lookup(" Ice Cream ").map(|f| f.carbs), Some(30.0));
        assert_eq!(db.lookup("rice").map(|f| f.category), Some(FoodCategory::Grains));
        assert!(db.lookup("durian").is_none());
        assert_eq!(db.items().len(), 28);
    }

    #[test]
    fn logged_carbs_scale_with_quantity() {
        let mut log = FoodLog::in_memory(FoodDatabase::default());
        let entry = log.log("Banana", 1.5, "piece", noon()).unwrap();
        assert_eq!(entry.food_name, "banana");
        assert_eq!(entry.carbs, 40.5);
        assert_eq!(entry.unit, "piece");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn rejected_entries_leave_the_log_unchanged() {
        let mut log = FoodLog::in_memory(FoodDatabase::default());
        assert!(matches!(
            log.log("durian", 1.0, "serving", noon()),
            Err(FoodLogError::UnknownFood(ref name)) if name == "durian"
        ));
        assert!(matches!(
            log.log("apple", 0.0, "serving", noon()),
            Err(FoodLogError::InvalidQuantity(_))
        ));
        assert!(matches!(
            log.log("apple", f64::NAN, "serving", noon()),
            Err(FoodLogError::InvalidQuantity(_))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn total_carbs_covers_the_requested_window() {
        let mut log = FoodLog::in_memory(FoodDatabase::default());
        log.log("pasta", 1.0, "serving", noon() - Duration::hours(30)).unwrap();
        log.log("rice", 1.0, "serving", noon() - Duration::hours(20)).unwrap();
        log.log("apple", 2.0, "serving", noon() - Duration::hours(1)).unwrap();

        assert_eq!(log.total_carbs(24.0, noon()), 95.0);
        assert_eq!(log.total_carbs(2.0, noon()), 50.0);
        assert_eq!(log.total_carbs(48.0, noon()), 138.0);
    }

    #[test]
    fn recent_returns_newest_entries_in_order() {
        let mut log = FoodLog::in_memory(FoodDatabase::default());
        for (i, name) in ["apple", "bread", "milk"].iter().enumerate() {
            log.log(name, 1.0, "serving", noon() + Duration::minutes(i as i64)).unwrap();
        }
        let names: Vec<_> = log.recent(2).iter().map(|e| e.food_name.as_str()).collect();
        assert_eq!(names, ["bread", "milk"]);
        assert_eq!(log.recent(10).len(), 3);

        log.clear().unwrap();
        assert!(log.recent(5).is_empty());
    }

    #[test]
    fn log_is_persisted_and_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food_log.json");

        let mut log = FoodLog::open(&path, FoodDatabase::default()).unwrap();
        assert!(log.is_empty());
        log.log("pizza", 2.0, "slice", noon()).unwrap();

        let reopened = FoodLog::open(&path, FoodDatabase::default()).unwrap();
        assert_eq!(reopened.recent(1), log.recent(1));
        assert_eq!(reopened.total_carbs(24.0, noon()), 60.0);

        log.clear().unwrap();
        assert!(FoodLog::open(&path, FoodDatabase::default()).unwrap().is_empty());
    }

    #[test]
    fn corrupt_log_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food_log.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FoodLog::open(&path, FoodDatabase::default()),
            Err(FoodLogError::Json(_))
        ));
    }
}
