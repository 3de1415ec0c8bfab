use crate::params::{ModelSelection, ScenarioParameters};
use crate::result::SimulationResult;
use std::sync::Arc;

/// A result series together with the parameters it was computed from.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub generation: u64,
    pub scenario: ScenarioParameters,
    pub model: ModelSelection,
    pub result: Arc<SimulationResult>,
}

impl CachedResult {
    pub fn new(generation: u64, scenario: ScenarioParameters, model: ModelSelection, result: SimulationResult) -> Self {
        Self {
            generation,
            scenario,
            model,
            result: Arc::new(result),
        }
    }

    pub fn len(&self) -> usize {
        self.result.len()
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }
}

/// Holds the result for the current parameters.
///
/// On invalidation the last good result moves to `retained` so a failed
/// re-simulation can fall back to it.
#[derive(Debug, Default)]
pub struct ResultCache {
    current: Option<CachedResult>,
    retained: Option<CachedResult>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The valid result, if any.
    pub fn get(&self) -> Option<&CachedResult> {
        self.current.as_ref()
    }

    /// The last good result, whether valid or invalidated.
    pub fn last_good(&self) -> Option<&CachedResult> {
        self.current.as_ref().or(self.retained.as_ref())
    }

    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn store(&mut self, entry: CachedResult) {
        self.current = Some(entry);
        self.retained = None;
    }

    pub fn invalidate(&mut self) {
        if let Some(entry) = self.current.take() {
            self.retained = Some(entry);
        }
    }

    /// Makes the retained result current again. Returns false if none was retained.
    pub fn restore(&mut self) -> bool {
        match self.retained.take() {
            Some(entry) => {
                self.current = Some(entry);
                true
            }
            None => false,
        }
    }
}
