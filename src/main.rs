//! Headless trial sequence runner.
//!
//! Drives a [`TrialSequencer`] against the simulated sled drive, advancing to the
//! next phase every time the previous one reports it is no longer in progress.
//! Ctrl-C stops the running outscan, which ends the sequence; a second Ctrl-C
//! exits without waiting.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sled_daq::config::{Settings, StoreBackend};
use sled_daq::data::storage::open_result_store;
use sled_daq::hardware::SimulatedMotionController;
use sled_daq::status::{ChannelReporter, StatusUpdate};
use sled_daq::trajectory::TrapezoidalPlanner;
use sled_daq::{Collaborators, DaqError, TrialSequencer};

#[derive(Parser, Debug)]
#[command(name = "sled_daq", version, about = "Run a towing-sled trial sequence")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "config/sequencer.toml")]
    config: PathBuf,

    /// Override the number of trials
    #[arg(short, long)]
    trials: Option<u32>,

    /// Override the result store location
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep results in memory only
    #[arg(long, conflicts_with = "store")]
    memory: bool,

    /// Override the simulation speed-up factor
    #[arg(long)]
    time_scale: Option<f64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn apply_overrides(settings: &mut Settings, args: &Args) {
    if let Some(trials) = args.trials {
        settings.sequence.trial_limit = trials;
    }
    if let Some(location) = &args.store {
        settings.storage.location = Some(location.clone());
    }
    if args.memory {
        settings.storage.backend = StoreBackend::Memory;
        if settings.storage.location.is_none() {
            settings.storage.location = Some(PathBuf::from("memory"));
        }
    }
    if let Some(scale) = args.time_scale {
        settings.simulation.time_scale = scale;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut settings = Settings::extract(Some(args.config.as_path()))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    apply_overrides(&mut settings, &args);
    settings.validate().context("invalid configuration")?;

    let store = open_result_store(&settings.storage).context("failed to open result store")?;
    let controller = Arc::new(
        SimulatedMotionController::new(&settings.simulation).with_result_store(Arc::clone(&store)),
    );
    let (reporter, mut updates) = ChannelReporter::new();

    let sequencer = TrialSequencer::from_settings(
        &settings,
        Collaborators {
            controller: controller.clone(),
            planner: Arc::new(TrapezoidalPlanner),
            store,
            reporter: Arc::new(reporter),
        },
    )?;
    info!(
        run_uid = sequencer.run_uid(),
        trials = settings.sequence.trial_limit,
        backend = ?settings.storage.backend,
        "Starting trial sequence"
    );
    let (handle, task) = sequencer.spawn();

    handle.start_next().await?;
    let mut interrupted = false;
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(StatusUpdate::Message(message)) => info!("{}", message),
                Some(StatusUpdate::InProgress(true)) => {}
                Some(StatusUpdate::InProgress(false)) if interrupted => break,
                Some(StatusUpdate::InProgress(false)) => match handle.start_next().await {
                    Ok(()) | Err(DaqError::SequenceFinished) => {}
                    Err(e) => {
                        error!(error = %e, "Unable to advance sequence");
                        break;
                    }
                },
                Some(StatusUpdate::Finished) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    warn!("Interrupted again, leaving the sequence unfinished");
                    break;
                }
                warn!("Interrupted, stopping the running outscan");
                interrupted = true;
                controller.stop();
            }
        }
    }

    let snapshot = handle.snapshot().await?;
    handle.cleanup().await?;
    while let Ok(update) = updates.try_recv() {
        if let StatusUpdate::Message(message) = update {
            info!("{}", message);
        }
    }
    handle.shutdown().await?;
    task.await.context("sequencer task panicked")?;

    info!(
        completed = snapshot.trial_index,
        limit = snapshot.trial_limit,
        "Trial sequence done"
    );
    Ok(())
}
