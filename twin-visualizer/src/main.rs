use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Builder;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use twin_common::{
    Canvas, CanvasRenderer, Completion, ControlCommand, EngineConfig, OutputFormat, PlaybackSession, ScenarioBuilder,
    SimulationResult, Simulator, TickOutcome,
};

mod draw;
mod interactive;

/// Command-line arguments for the visualizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config.toml file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Width of the output images in pixels
    #[arg(long, default_value_t = 1200)]
    width: u32,

    /// Height of the output images in pixels
    #[arg(long, default_value_t = 900)]
    height: u32,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Drive playback from stdin and keep redrawing a single image
    Interactive {
        #[arg(short, long, default_value = "twin_live.png")]
        output: PathBuf,
    },
    /// Play the whole series once and write one image per frame
    Batch {
        #[arg(short, long, default_value = "frames")]
        output_dir: PathBuf,

        /// Render a saved result instead of simulating the configured parameters
        #[arg(long)]
        replay: Option<PathBuf>,
    },
}

fn frame_file_name(frame: usize) -> String {
    format!("frame_{:05}.png", frame)
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        EngineConfig::load(path)
    } else {
        warn!("Config file '{}' not found, using defaults.", path.display());
        Ok(EngineConfig::default())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    Builder::from_default_env().filter(None, LevelFilter::Info).init();

    info!("Starting Twin Visualizer...");
    let config = load_config(&args.config)?;
    let simulator: Arc<dyn Simulator> = Arc::new(config.simulator());
    let builder: Arc<dyn ScenarioBuilder> = Arc::from(config.scenario_builder()?);
    let store = config.parameter_store(simulator.as_ref())?;
    let session = PlaybackSession::new(store, config.playback_options());
    let steps_per_hour = config.cadence().steps_per_hour();

    match args.mode {
        Mode::Interactive { output } => {
            info!("Live image: {}", output.display());
            let options = interactive::LiveOptions {
                output,
                width: args.width,
                height: args.height,
                steps_per_hour,
            };
            interactive::run(session, builder, simulator, options)
        }
        Mode::Batch { output_dir, replay } => {
            let replay = match replay {
                Some(path) => Some(load_replay(&path, config.timing.step_minutes)?),
                None => None,
            };
            let scenes = collect_scenes(session, builder.as_ref(), simulator.as_ref(), replay)?;
            render_batch(&scenes, steps_per_hour, &output_dir, args.width, args.height)
        }
    }
}

fn load_replay(path: &Path, step_minutes: u32) -> Result<SimulationResult> {
    let format = OutputFormat::from_path(path)
        .with_context(|| format!("Cannot tell the format of '{}' from its extension", path.display()))?;
    let result = SimulationResult::load(path, format, step_minutes)
        .with_context(|| format!("Failed to load result '{}'", path.display()))?;
    info!("Replaying {} frames from {}", result.len(), path.display());
    Ok(result)
}

/// Plays the session from frame 0 to the end and records the canvas at every frame.
fn collect_scenes(
    mut session: PlaybackSession,
    builder: &dyn ScenarioBuilder,
    simulator: &dyn Simulator,
    replay: Option<SimulationResult>,
) -> Result<Vec<Canvas>> {
    match replay {
        Some(result) => session.adopt(result),
        None => {
            let request = session.start();
            let generation = request.generation;
            let start_time = Instant::now();
            let outcome = request.run(builder, simulator);
            match session.complete(generation, outcome) {
                Completion::Applied { frames, .. } => info!(
                    "Simulated {} frames in {:.3} seconds.",
                    frames,
                    start_time.elapsed().as_secs_f64()
                ),
                Completion::Failed { error, .. } => bail!("Simulation failed: {}", error),
                Completion::Discarded { generation } => bail!("Simulation result {} was discarded", generation),
            }
        }
    }

    let mut renderer = CanvasRenderer::new(session.controller().state().window_steps);
    let mut scenes = Vec::new();
    renderer.update(&session.window());
    scenes.push(renderer.canvas().clone());

    session.apply(ControlCommand::Play)?;
    while let TickOutcome::Advanced(_) = session.tick() {
        renderer.update(&session.window());
        scenes.push(renderer.canvas().clone());
    }
    session.stop();
    Ok(scenes)
}

fn render_batch(scenes: &[Canvas], steps_per_hour: f64, output_dir: &Path, width: u32, height: u32) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;
    info!("Rendering {} frames to {}", scenes.len(), output_dir.display());

    let progress_bar = ProgressBar::new(scenes.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) [{eta}]")?
            .progress_chars("#>-"),
    );

    let start_time = Instant::now();
    scenes.par_iter().enumerate().try_for_each(|(frame, canvas)| -> Result<()> {
        let image = draw::draw_canvas(canvas, steps_per_hour, width, height)?;
        draw::save_png(&image, &output_dir.join(frame_file_name(frame)))?;
        progress_bar.inc(1);
        Ok(())
    })?;
    progress_bar.finish_with_message("Frames rendered");

    info!(
        "Rendered {} frames in {:.2} seconds.",
        scenes.len(),
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}
