use crate::draw::{draw_canvas, save_png};
use anyhow::Result;
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use twin_common::{
    CanvasRenderer, CommandOutcome, ControlCommand, PlaybackSession, ResimulationRequest, ScenarioBuilder,
    SimulationError, SimulationResult, Simulator,
};

/// Everything that can wake the interactive loop besides the tick timer.
enum Event {
    Line(String),
    Resimulated {
        generation: u64,
        outcome: Result<SimulationResult, SimulationError>,
    },
    InputClosed,
}

/// A command typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Control(ControlCommand),
    Status,
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Result<Input, String> {
    match line.trim().to_ascii_lowercase().as_str() {
        "status" => Ok(Input::Status),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        _ => line.parse().map(Input::Control),
    }
}

pub struct LiveOptions {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub steps_per_hour: f64,
}

/// Runs one playback session driven by commands read from stdin.
///
/// The canvas image at `options.output` is redrawn whenever a drawable changes.
pub fn run(
    mut session: PlaybackSession,
    builder: Arc<dyn ScenarioBuilder>,
    simulator: Arc<dyn Simulator>,
    options: LiveOptions,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    spawn_stdin_reader(tx.clone());

    let resimulate = |request: ResimulationRequest| {
        let builder = Arc::clone(&builder);
        let simulator = Arc::clone(&simulator);
        let tx = tx.clone();
        thread::spawn(move || {
            let outcome = request.run(builder.as_ref(), simulator.as_ref());
            let _ = tx.send(Event::Resimulated {
                generation: request.generation,
                outcome,
            });
        });
    };

    let mut renderer = CanvasRenderer::new(session.controller().state().window_steps);
    resimulate(session.start());
    print_help();
    redraw(&mut renderer, &session, &options)?;

    let mut next_tick = Instant::now();
    loop {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                session.tick();
                let interval = session.controller().state().tick_interval_ms;
                next_tick = Instant::now() + Duration::from_millis(interval);
            }
            Err(RecvTimeoutError::Disconnected) | Ok(Event::InputClosed) => break,
            Ok(Event::Resimulated { generation, outcome }) => {
                let completion = session.complete(generation, outcome);
                println!("{:?}", completion);
            }
            Ok(Event::Line(line)) if line.trim().is_empty() => continue,
            Ok(Event::Line(line)) => match parse_input(&line) {
                Ok(Input::Quit) => break,
                Ok(Input::Status) => print_status(&session),
                Ok(Input::Help) => print_help(),
                Ok(Input::Control(command)) => match session.apply(command) {
                    Ok(CommandOutcome::Resimulate(request)) => {
                        println!("re-simulating (generation {})", request.generation);
                        resimulate(request);
                    }
                    Ok(outcome) => debug!("{:?}", outcome),
                    Err(e) => println!("rejected: {}", e),
                },
                Err(e) => println!("{} (type `help` for commands)", e),
            },
        }
        redraw(&mut renderer, &session, &options)?;
    }

    session.stop();
    info!("Interactive session ended");
    Ok(())
}

fn redraw(renderer: &mut CanvasRenderer, session: &PlaybackSession, options: &LiveOptions) -> Result<()> {
    let changed = renderer.update(&session.window());
    if changed.is_empty() {
        return Ok(());
    }
    debug!("Redrawing {} drawable(s)", changed.len());
    match draw_canvas(renderer.canvas(), options.steps_per_hour, options.width, options.height) {
        Ok(image) => save_png(&image, &options.output),
        Err(e) => {
            // Keep the session alive; the next change retries.
            error!("{}", e);
            Ok(())
        }
    }
}

fn spawn_stdin_reader(tx: Sender<Event>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(Event::Line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(Event::InputClosed);
    });
}

fn print_help() {
    println!("commands: play | pause | reset | jump <frame> | set <field> <value> | status | help | quit");
}

fn print_status(session: &PlaybackSession) {
    let controller = session.controller();
    let state = controller.state();
    let snapshot = session.store().snapshot();
    println!(
        "{:?} | frame {}/{} | window {} | tick {} ms | generation {} | model {}",
        controller.status(),
        state.frame,
        controller.current().map_or(0, |c| c.len()),
        state.window_steps,
        state.tick_interval_ms,
        snapshot.generation,
        session.store().catalog().label(snapshot.model).unwrap_or("unknown"),
    );
    println!("{:?}", snapshot.scenario);
    if let Some(e) = controller.last_error() {
        println!("last error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prompt_commands() {
        assert_eq!(parse_input("status"), Ok(Input::Status));
        assert_eq!(parse_input(" QUIT "), Ok(Input::Quit));
        assert_eq!(parse_input("help"), Ok(Input::Help));
        assert_eq!(
            parse_input("jump 12"),
            Ok(Input::Control(ControlCommand::Jump { frame: 12 }))
        );
        assert_eq!(
            parse_input("set digital_twin 2"),
            Ok(Input::Control(ControlCommand::SetParameter {
                field: "digital_twin".into(),
                value: "2".into()
            }))
        );
        assert!(parse_input("rewind").is_err());
    }
}
