use crate::cache::{CachedResult, ResultCache};
use crate::error::{RangeError, SimulationError};
use crate::params::{ModelSelection, ParameterChange, ParameterSnapshot, PlaybackSettings, ScenarioParameters};
use crate::result::SimulationResult;
use crate::scenario::ScenarioBuilder;
use crate::simulator::Simulator;
use crate::window::{extract, WindowSlice};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    Stopped,
    Paused,
    Running,
}

/// Externally visible state, including the transient invalidated condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Stopped,
    Paused,
    Running,
    /// A re-simulation is in flight; no frames are delivered.
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub frame: usize,
    pub window_steps: usize,
    pub tick_interval_ms: u64,
    pub mode: PlaybackMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackOptions {
    /// Restart from frame 0 instead of pausing at the end of the series.
    #[serde(default)]
    pub loop_on_completion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpOutcome {
    pub frame: usize,
    /// Set when the target was outside the series and got clamped.
    pub clamped: Option<RangeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running, or nothing to play.
    Idle,
    Advanced(usize),
    /// Reached the end of the series and paused there.
    Completed(usize),
    /// Reached the end of the series and restarted at frame 0.
    Looped,
}

/// What happened to a finished re-simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The parameters moved on while it was running.
    Discarded { generation: u64 },
    Applied { generation: u64, frames: usize },
    /// The previous result (if any) was kept.
    Failed { generation: u64, error: String },
}

/// Parameters of one re-simulation, tagged with the generation that asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResimulationRequest {
    pub generation: u64,
    pub scenario: ScenarioParameters,
    pub model: ModelSelection,
}

impl ResimulationRequest {
    pub fn from_snapshot(snapshot: &ParameterSnapshot) -> Self {
        Self {
            generation: snapshot.generation,
            scenario: snapshot.scenario.clone(),
            model: snapshot.model,
        }
    }

    /// Builds the scenario and runs the simulator. Blocking; may take seconds.
    pub fn run(
        &self,
        builder: &dyn ScenarioBuilder,
        simulator: &dyn Simulator,
    ) -> Result<SimulationResult, SimulationError> {
        let catalog = simulator.catalog();
        if !catalog.contains(self.model) {
            return Err(SimulationError::UnknownModel {
                id: self.model.id(),
                count: catalog.len() as u32,
            });
        }

        let start_time = Instant::now();
        let scenario = builder.build(&self.scenario)?;
        if !scenario.warnings.is_empty() {
            debug!(
                "Scenario for generation {} built with {} warning(s)",
                self.generation,
                scenario.warnings.len()
            );
        }

        let result = simulator.simulate(&scenario, self.model)?;
        if result.len() != scenario.len() {
            return Err(SimulationError::RowCountMismatch {
                expected: scenario.len(),
                actual: result.len(),
            });
        }
        info!(
            "Re-simulation for generation {} finished in {:.1} ms ({} rows)",
            self.generation,
            start_time.elapsed().as_secs_f64() * 1000.0,
            result.len()
        );
        Ok(result)
    }
}

/// Owns the playback state and the result cache for one session.
///
/// Every method takes `&mut self`; callers are expected to funnel all
/// mutations through a single owner.
#[derive(Debug)]
pub struct PlaybackController {
    state: PlaybackState,
    options: PlaybackOptions,
    cache: ResultCache,
    pending: Option<ResimulationRequest>,
    last_error: Option<String>,
}

impl PlaybackController {
    /// Starts Paused at frame 0 with no result.
    pub fn new(settings: PlaybackSettings, options: PlaybackOptions) -> Self {
        Self {
            state: PlaybackState {
                frame: 0,
                window_steps: settings.window_steps.max(1),
                tick_interval_ms: settings.tick_interval_ms,
                mode: PlaybackMode::Paused,
            },
            options,
            cache: ResultCache::new(),
            pending: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn options(&self) -> PlaybackOptions {
        self.options
    }

    pub fn status(&self) -> PlaybackStatus {
        if self.pending.is_some() {
            return PlaybackStatus::Invalidated;
        }
        match self.state.mode {
            PlaybackMode::Stopped => PlaybackStatus::Stopped,
            PlaybackMode::Paused => PlaybackStatus::Paused,
            PlaybackMode::Running => PlaybackStatus::Running,
        }
    }

    /// The valid cached result, None while invalidated.
    pub fn current(&self) -> Option<&CachedResult> {
        self.cache.get()
    }

    pub fn pending(&self) -> Option<&ResimulationRequest> {
        self.pending.as_ref()
    }

    /// Message of the most recent failed re-simulation, cleared on the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // --- Commands ---

    /// Returns true if the mode changed.
    pub fn play(&mut self) -> bool {
        match self.state.mode {
            PlaybackMode::Paused | PlaybackMode::Stopped => {
                self.state.mode = PlaybackMode::Running;
                debug!("Playback running from frame {}", self.state.frame);
                true
            }
            PlaybackMode::Running => false,
        }
    }

    /// Returns true if the mode changed.
    pub fn pause(&mut self) -> bool {
        if self.state.mode == PlaybackMode::Running {
            self.state.mode = PlaybackMode::Paused;
            debug!("Playback paused at frame {}", self.state.frame);
            true
        } else {
            false
        }
    }

    /// Back to frame 0, paused. Keeps the cached result.
    pub fn reset(&mut self) {
        self.state.mode = PlaybackMode::Paused;
        self.state.frame = 0;
        debug!("Playback reset");
    }

    /// Ends the session's playback.
    pub fn stop(&mut self) {
        self.state.mode = PlaybackMode::Stopped;
    }

    /// Moves to `target`, clamped to the last good result. Mode is unchanged.
    pub fn jump(&mut self, target: usize) -> JumpOutcome {
        let len = self.cache.last_good().map_or(0, CachedResult::len);
        let frame = target.min(len.saturating_sub(1));
        self.state.frame = frame;
        let clamped = (frame != target).then_some(RangeError { frame: target, len });
        if let Some(e) = &clamped {
            warn!("Jump clamped: {}", e);
        }
        JumpOutcome { frame, clamped }
    }

    /// Advances one frame while running.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state.mode != PlaybackMode::Running {
            return TickOutcome::Idle;
        }
        let len = match self.cache.get() {
            Some(entry) if !entry.is_empty() => entry.len(),
            _ => return TickOutcome::Idle,
        };

        let last = len - 1;
        if self.state.frame >= last {
            if self.options.loop_on_completion {
                self.state.frame = 0;
                debug!("Playback looped to frame 0");
                TickOutcome::Looped
            } else {
                self.state.frame = last;
                self.state.mode = PlaybackMode::Paused;
                info!("Playback completed at frame {}/{}", last, len);
                TickOutcome::Completed(last)
            }
        } else {
            self.state.frame += 1;
            TickOutcome::Advanced(self.state.frame)
        }
    }

    // --- Parameter changes ---

    /// Takes the new playback settings and, if the simulated series is affected,
    /// invalidates the cache and returns the re-simulation to run.
    pub fn apply_change(&mut self, change: &ParameterChange) -> Option<ResimulationRequest> {
        self.apply_settings(change.new.playback);
        if change.requires_resimulation() {
            Some(self.invalidate(&change.new))
        } else {
            None
        }
    }

    pub fn apply_settings(&mut self, settings: PlaybackSettings) {
        self.state.window_steps = settings.window_steps.max(1);
        self.state.tick_interval_ms = settings.tick_interval_ms;
    }

    /// Drops the current result and marks `snapshot` as the one awaited.
    /// A later call supersedes any earlier pending request.
    pub fn invalidate(&mut self, snapshot: &ParameterSnapshot) -> ResimulationRequest {
        let request = ResimulationRequest::from_snapshot(snapshot);
        if let Some(previous) = &self.pending {
            debug!(
                "Re-simulation for generation {} superseded by generation {}",
                previous.generation, request.generation
            );
        }
        self.cache.invalidate();
        self.pending = Some(request.clone());
        info!("Result invalidated, awaiting generation {}", request.generation);
        request
    }

    /// Applies a finished re-simulation.
    ///
    /// A completion for anything but the awaited generation is discarded. On
    /// success frame goes to 0 and the mode is kept. On failure the previous
    /// result comes back, playback pauses and the frame is kept.
    pub fn complete(
        &mut self,
        generation: u64,
        outcome: Result<SimulationResult, SimulationError>,
    ) -> Completion {
        let request = match self.pending.take() {
            Some(request) if request.generation == generation => request,
            other => {
                warn!(
                    "Discarding re-simulation for generation {} (awaiting {:?})",
                    generation,
                    other.as_ref().map(|r| r.generation)
                );
                self.pending = other;
                return Completion::Discarded { generation };
            }
        };

        match outcome {
            Ok(result) => {
                let frames = result.len();
                self.cache
                    .store(CachedResult::new(generation, request.scenario, request.model, result));
                self.state.frame = 0;
                self.last_error = None;
                info!("Generation {} cached ({} frames)", generation, frames);
                Completion::Applied { generation, frames }
            }
            Err(e) => {
                error!("Re-simulation for generation {} failed: {}", generation, e);
                if self.cache.restore() {
                    warn!("Keeping the previous result");
                }
                let len = self.cache.get().map_or(0, CachedResult::len);
                self.state.frame = self.state.frame.min(len.saturating_sub(1));
                if self.state.mode == PlaybackMode::Running {
                    self.state.mode = PlaybackMode::Paused;
                }
                let message = e.to_string();
                self.last_error = Some(message.clone());
                Completion::Failed {
                    generation,
                    error: message,
                }
            }
        }
    }

    /// Installs a result that was loaded rather than simulated, e.g. from a file.
    pub fn adopt(&mut self, snapshot: &ParameterSnapshot, result: SimulationResult) {
        self.pending = None;
        self.cache.store(CachedResult::new(
            snapshot.generation,
            snapshot.scenario.clone(),
            snapshot.model,
            result,
        ));
        self.state.frame = 0;
        self.last_error = None;
    }

    /// The window at the current frame; empty if there is no valid result.
    pub fn window(&self) -> WindowSlice<'_> {
        match self.cache.get() {
            Some(entry) => extract(&entry.result, self.state.frame, self.state.window_steps),
            None => WindowSlice::empty(self.state.window_steps),
        }
    }
}
