use crate::command::ControlCommand;
use crate::controller::{Completion, JumpOutcome, PlaybackController, PlaybackOptions, ResimulationRequest, TickOutcome};
use crate::error::{SimulationError, ValidationError};
use crate::params::{ParameterChange, ParameterStore};
use crate::result::SimulationResult;
use crate::window::WindowSlice;
use log::debug;
use std::sync::mpsc::Receiver;

/// Result of one control command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// play/pause/reset; `changed` is false for a no-op.
    Playback { changed: bool },
    Jumped(JumpOutcome),
    /// The parameter was accepted and the series must be recomputed.
    Resimulate(ResimulationRequest),
    /// The parameter was accepted; the cached series is still valid.
    Updated,
}

/// A parameter store wired to a playback controller.
///
/// The owner of a session is its single writer: commands, ticks and
/// re-simulation completions all go through `&mut self`.
#[derive(Debug)]
pub struct PlaybackSession {
    controller: PlaybackController,
    store: ParameterStore,
    changes: Receiver<ParameterChange>,
}

impl PlaybackSession {
    pub fn new(mut store: ParameterStore, options: PlaybackOptions) -> Self {
        let changes = store.subscribe();
        let controller = PlaybackController::new(store.snapshot().playback, options);
        Self {
            controller,
            store,
            changes,
        }
    }

    /// Requests the first simulation for the initial parameters.
    pub fn start(&mut self) -> ResimulationRequest {
        self.controller.invalidate(self.store.snapshot())
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn window(&self) -> WindowSlice<'_> {
        self.controller.window()
    }

    pub fn apply(&mut self, command: ControlCommand) -> Result<CommandOutcome, ValidationError> {
        debug!("Command: {}", command);
        let outcome = match command {
            ControlCommand::Play => CommandOutcome::Playback {
                changed: self.controller.play(),
            },
            ControlCommand::Pause => CommandOutcome::Playback {
                changed: self.controller.pause(),
            },
            ControlCommand::Reset => {
                self.controller.reset();
                CommandOutcome::Playback { changed: true }
            }
            ControlCommand::Jump { frame } => CommandOutcome::Jumped(self.controller.jump(frame)),
            ControlCommand::SetParameter { field, value } => {
                self.store.set(&field, &value)?;
                self.drain_changes()
            }
        };
        Ok(outcome)
    }

    pub fn tick(&mut self) -> TickOutcome {
        self.controller.tick()
    }

    pub fn complete(&mut self, generation: u64, outcome: Result<SimulationResult, SimulationError>) -> Completion {
        self.controller.complete(generation, outcome)
    }

    /// Installs a loaded result under the current parameters.
    pub fn adopt(&mut self, result: SimulationResult) {
        self.controller.adopt(self.store.snapshot(), result);
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    // The latest change wins when several arrive together.
    fn drain_changes(&mut self) -> CommandOutcome {
        let mut request = None;
        for change in self.changes.try_iter() {
            if let Some(next) = self.controller.apply_change(&change) {
                request = Some(next);
            }
        }
        match request {
            Some(request) => CommandOutcome::Resimulate(request),
            None => CommandOutcome::Updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PlaybackStatus;
    use crate::params::{ModelSelection, PlaybackSettings, ScenarioParameters};
    use crate::scenario::{Cadence, SyntheticScenario};
    use crate::simulator::{ModelCatalog, ReferenceTwin};

    fn session() -> PlaybackSession {
        let store = ParameterStore::new(
            ScenarioParameters::default(),
            ModelSelection::new(0),
            PlaybackSettings::default(),
            ModelCatalog::reference(),
        )
        .unwrap();
        PlaybackSession::new(store, PlaybackOptions::default())
    }

    fn run(session: &mut PlaybackSession, request: &ResimulationRequest) -> Completion {
        let builder = SyntheticScenario::new(Cadence::default());
        let outcome = request.run(&builder, &ReferenceTwin::default());
        session.complete(request.generation, outcome)
    }

    #[test]
    fn start_simulates_initial_parameters() {
        let mut session = session();
        let request = session.start();
        assert_eq!(request.generation, 0);
        assert_eq!(run(&mut session, &request), Completion::Applied { generation: 0, frames: 60 });
        assert_eq!(session.window().len(), 1);
    }

    #[test]
    fn parameter_change_resimulates_from_frame_zero() {
        let mut session = session();
        let request = session.start();
        run(&mut session, &request);
        session.apply(ControlCommand::Play).unwrap();
        session.apply(ControlCommand::Jump { frame: 40 }).unwrap();

        let outcome = session
            .apply(ControlCommand::SetParameter {
                field: "meal_size".into(),
                value: "90".into(),
            })
            .unwrap();
        let CommandOutcome::Resimulate(request) = outcome else {
            panic!("expected a re-simulation, got {:?}", outcome);
        };
        assert_eq!(request.generation, 1);
        assert_eq!(request.scenario.meal_size, 90.0);

        run(&mut session, &request);
        assert_eq!(session.controller().state().frame, 0);
        assert_eq!(session.controller().status(), PlaybackStatus::Running);
        let current = session.controller().current().unwrap();
        assert_eq!(current.result.row(12).unwrap().meal_carbs, 90.0);
    }

    #[test]
    fn invalid_model_leaves_result_and_frame() {
        let mut session = session();
        let request = session.start();
        run(&mut session, &request);
        session.apply(ControlCommand::Jump { frame: 25 }).unwrap();

        let err = session
            .apply(ControlCommand::SetParameter {
                field: "digital_twin".into(),
                value: "7".into(),
            })
            .unwrap_err();
        assert_eq!(err.field, "digital_twin");
        assert_eq!(session.controller().state().frame, 25);
        assert_eq!(session.controller().current().map(|c| c.generation), Some(0));
        assert_eq!(session.store().snapshot().generation, 0);
    }

    #[test]
    fn window_setting_updates_without_resimulation() {
        let mut session = session();
        let request = session.start();
        run(&mut session, &request);
        session.apply(ControlCommand::Jump { frame: 59 }).unwrap();

        let outcome = session
            .apply(ControlCommand::SetParameter {
                field: "window_steps".into(),
                value: "6".into(),
            })
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Updated);
        assert_eq!(session.window().len(), 6);
        assert_eq!(session.controller().state().frame, 59);
    }

    #[test]
    fn jump_out_of_range_is_clamped() {
        let mut session = session();
        let request = session.start();
        run(&mut session, &request);
        let CommandOutcome::Jumped(jump) = session.apply(ControlCommand::Jump { frame: 1000 }).unwrap() else {
            panic!("expected a jump");
        };
        assert_eq!(jump.frame, 59);
        assert!(jump.clamped.is_some());
    }
}
