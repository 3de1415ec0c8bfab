use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use twin_common::{
    CachedResult, CommandOutcome, ControlCommand, ParameterSnapshot, PlaybackSession, PlaybackStatus,
    ResimulationRequest, ScenarioBuilder, SimulationError, SimulationResult, Simulator, ValidationError,
};

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("playback session has shut down")]
    Closed,
}

/// Read-only view of the session, republished after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub status: PlaybackStatus,
    pub frame: usize,
    pub window_steps: usize,
    pub tick_interval_ms: u64,
    pub parameters: ParameterSnapshot,
    pub last_error: Option<String>,
    /// Shared with the session; never mutated after publication.
    #[serde(skip)]
    pub result: Option<CachedResult>,
}

impl SessionView {
    fn of(session: &PlaybackSession) -> Self {
        let controller = session.controller();
        let state = controller.state();
        Self {
            status: controller.status(),
            frame: state.frame,
            window_steps: state.window_steps,
            tick_interval_ms: state.tick_interval_ms,
            parameters: session.store().snapshot().clone(),
            last_error: controller.last_error().map(str::to_string),
            result: controller.current().cloned(),
        }
    }
}

enum SessionMessage {
    Command {
        command: ControlCommand,
        reply: oneshot::Sender<Result<CommandOutcome, ValidationError>>,
    },
    Shutdown,
}

struct Resimulated {
    generation: u64,
    outcome: Result<SimulationResult, SimulationError>,
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionMessage>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Queues a command and waits for the session to apply it.
    pub async fn send(&self, command: ControlCommand) -> Result<CommandOutcome, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionMessage::Command { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        let outcome = response.await.map_err(|_| SessionError::Closed)?;
        Ok(outcome?)
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Waits until a published view satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<SessionView, SessionError>
    where
        F: Fn(&SessionView) -> bool,
    {
        let mut view = self.view.clone();
        loop {
            {
                let current = view.borrow_and_update();
                if predicate(&current) {
                    return Ok(current.clone());
                }
            }
            view.changed().await.map_err(|_| SessionError::Closed)?;
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionMessage::Shutdown).await;
    }
}

/// Spawns the single-writer task that owns `session`.
///
/// Commands arrive over a queue, ticks come from an interval timer, and
/// re-simulations run on the blocking pool and post their results back.
pub fn spawn(
    mut session: PlaybackSession,
    builder: Arc<dyn ScenarioBuilder>,
    simulator: Arc<dyn Simulator>,
) -> (SessionHandle, JoinHandle<()>) {
    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Resimulated>();

    // A replayed result is kept as is; otherwise simulate the initial parameters.
    let first = match session.controller().current() {
        Some(_) => None,
        None => Some(session.start()),
    };
    let (view_tx, view_rx) = watch::channel(SessionView::of(&session));

    let resimulate = move |request: ResimulationRequest| {
        let builder = Arc::clone(&builder);
        let simulator = Arc::clone(&simulator);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let generation = request.generation;
            let outcome = tokio::task::spawn_blocking(move || request.run(builder.as_ref(), simulator.as_ref()))
                .await
                .unwrap_or_else(|e| Err(SimulationError::Model(format!("re-simulation task failed: {}", e))));
            // The session may have shut down in the meantime.
            let _ = done_tx.send(Resimulated { generation, outcome });
        });
    };

    let task = tokio::spawn(async move {
        match first {
            Some(request) => {
                info!("Playback session started (generation {})", request.generation);
                resimulate(request);
            }
            None => info!("Playback session started from a loaded result"),
        }

        let mut tick_ms = session.controller().state().tick_interval_ms;
        let mut ticker = ticker(tick_ms);

        loop {
            let mut answered = None;
            tokio::select! {
                message = command_rx.recv() => match message {
                    Some(SessionMessage::Command { command, reply }) => {
                        let outcome = session.apply(command);
                        if let Ok(CommandOutcome::Resimulate(request)) = &outcome {
                            resimulate(request.clone());
                        }
                        answered = Some((reply, outcome));
                    }
                    Some(SessionMessage::Shutdown) | None => break,
                },
                Some(done) = done_rx.recv() => {
                    let completion = session.complete(done.generation, done.outcome);
                    debug!("Re-simulation completion: {:?}", completion);
                }
                _ = ticker.tick() => {
                    session.tick();
                }
            }

            let next_ms = session.controller().state().tick_interval_ms;
            if next_ms != tick_ms {
                debug!("Tick interval changed to {} ms", next_ms);
                tick_ms = next_ms;
                ticker = self::ticker(tick_ms);
            }
            view_tx.send_replace(SessionView::of(&session));
            // Reply only once the view reflects the command.
            if let Some((reply, outcome)) = answered {
                let _ = reply.send(outcome);
            }
        }

        session.stop();
        view_tx.send_replace(SessionView::of(&session));
        info!("Playback session stopped");
    });

    let handle = SessionHandle {
        commands: command_tx,
        view: view_rx,
    };
    (handle, task)
}

fn ticker(tick_ms: u64) -> Interval {
    let mut ticker = interval(Duration::from_millis(tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
