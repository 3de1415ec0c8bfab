use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use twin_common::{
    EngineConfig, OutputFormat, PlaybackSession, ResimulationRequest, SimulationResult, Simulator, StatisticsSummary,
};

mod server;
mod session;

use server::AppState;

/// Glucose digital twin playback engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config.toml file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the playback session over HTTP (default)
    Serve {
        /// Address to bind, overrides [server].bind
        #[arg(long)]
        bind: Option<String>,

        /// Replay a saved result instead of simulating the initial parameters
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Simulate the configured scenario once and save the result series
    Run {
        /// Output format, overrides [output].format
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Output file, defaults to <base_filename>_result.<ext>
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    if path.exists() {
        EngineConfig::load(path)
    } else {
        warn!("Config file '{}' not found, using defaults.", path.display());
        Ok(EngineConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command.unwrap_or(Command::Serve {
        bind: None,
        replay: None,
    }) {
        Command::Serve { bind, replay } => serve(config, bind, replay).await,
        Command::Run { format, output } => run_once(&config, format, output),
    }
}

async fn serve(config: EngineConfig, bind: Option<String>, replay: Option<PathBuf>) -> Result<()> {
    info!("Starting Twin Engine...");

    let simulator = config.simulator();
    let catalog = simulator.catalog();
    let builder = config.scenario_builder()?;
    let store = config.parameter_store(&simulator)?;
    let mut session = PlaybackSession::new(store, config.playback_options());

    if let Some(path) = &replay {
        let format = OutputFormat::from_path(path)
            .with_context(|| format!("Cannot tell the format of '{}' from its extension", path.display()))?;
        let result = SimulationResult::load(path, format, config.timing.step_minutes)
            .with_context(|| format!("Failed to load result '{}'", path.display()))?;
        info!("Replaying {} frames from {}", result.len(), path.display());
        session.adopt(result);
    }

    let (handle, task) = session::spawn(session, Arc::from(builder), Arc::new(simulator));
    let state = AppState {
        session: handle.clone(),
        model_labels: catalog.labels().to_vec(),
        food_log: Arc::new(tokio::sync::Mutex::new(config.food_log()?)),
    };

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    handle.shutdown().await;
    task.await?;
    Ok(())
}

fn run_once(config: &EngineConfig, format: Option<OutputFormat>, output: Option<PathBuf>) -> Result<()> {
    let simulator = config.simulator();
    let builder = config.scenario_builder()?;
    let store = config.parameter_store(&simulator)?;
    let request = ResimulationRequest::from_snapshot(store.snapshot());

    info!(
        "Simulating {} steps of {} min with model {} ({})",
        config.cadence().steps(),
        config.timing.step_minutes,
        request.model,
        simulator.catalog().label(request.model).unwrap_or("unknown")
    );
    let start_time = Instant::now();
    let result = request.run(builder.as_ref(), &simulator)?;
    info!("Simulation finished in {:.3} seconds.", start_time.elapsed().as_secs_f64());

    let summary = StatisticsSummary::summarize(&result);
    for (name, stats) in [
        ("actual", summary.actual),
        ("population", summary.population),
        ("digital twin", summary.digital_twin),
    ] {
        if let Some(s) = stats {
            info!(
                "{:>12}: mean {:6.1} | min {:6.1} | max {:6.1} | in range {:5.1}%",
                name,
                s.mean,
                s.min,
                s.max,
                s.time_in_range * 100.0
            );
        }
    }

    // --- Save Recorded Data ---
    let format = format.unwrap_or(config.output.format);
    let path = output.unwrap_or_else(|| config.output.result_path(format));
    result.save(&path, format)?;
    if config.output.save_csv && format != OutputFormat::Csv {
        result.save(config.output.result_path(OutputFormat::Csv), OutputFormat::Csv)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_writes_configured_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("twin");
        let config = EngineConfig::from_toml(&format!(
            "[output]\nbase_filename = {:?}\nformat = \"bincode\"\nsave_csv = true\n",
            base.display().to_string()
        ))
        .unwrap();

        run_once(&config, None, None).unwrap();

        let bin = config.output.result_path(OutputFormat::Bincode);
        let loaded = SimulationResult::load(&bin, OutputFormat::Bincode, 5).unwrap();
        assert_eq!(loaded.len(), 60);
        let csv = config.output.result_path(OutputFormat::Csv);
        assert_eq!(SimulationResult::load(&csv, OutputFormat::Csv, 5).unwrap(), loaded);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }
}
