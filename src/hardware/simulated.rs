//! Simulated Motion Controller
//!
//! Provides a simulated sled drive for running trial sequences without hardware.
//! All timing uses async-safe operations (tokio::time::sleep, not std::thread::sleep),
//! so tests can run it under a paused clock.
//!
//! # Behavior
//!
//! - One set-point is executed per control time-step (scaled by `time_scale`)
//! - Progress feedback every [`FEEDBACK_INTERVAL`] set-points
//! - While the logger is enabled, each step records a `(time, force)` sample from a
//!   quadratic drag model plus uniform noise; the samples are appended to the
//!   result store as the next `trial_<n>` record when the outscan completes

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::config::SimulationConfig;
use crate::data::record::{TrialRecord, TrialSample};
use crate::data::storage::{next_ordinal, ResultStore};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{
    MotionController, OutscanCallbacks, OutscanFeedback, OutscanState,
};

/// Set-points between two progress reports.
pub const FEEDBACK_INTERVAL: usize = 10;

/// Shared state between the controller handle and running outscan tasks.
struct DriveState {
    position: RwLock<f64>,
    logger_enabled: AtomicBool,
    controller_mode: AtomicBool,
    busy: AtomicBool,
    stop_requested: AtomicBool,
    abort_next: AtomicBool,
    outscans_started: AtomicU64,
}

/// Simulated sled drive.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MemoryResultStore::new());
/// let controller = SimulatedMotionController::new(&SimulationConfig::default())
///     .with_result_store(store);
/// assert_eq!(controller.position().await?, 0.0);
/// ```
pub struct SimulatedMotionController {
    state: Arc<DriveState>,
    dt: Duration,
    time_scale: f64,
    drag_coefficient: f64,
    force_noise: f64,
    store: Option<Arc<dyn ResultStore>>,
}

impl SimulatedMotionController {
    /// Create a drive from simulation settings.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            state: Arc::new(DriveState {
                position: RwLock::new(config.initial_position),
                logger_enabled: AtomicBool::new(false),
                controller_mode: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                abort_next: AtomicBool::new(false),
                outscans_started: AtomicU64::new(0),
            }),
            dt: config.dt,
            time_scale: config.time_scale,
            drag_coefficient: config.drag_coefficient,
            force_noise: config.force_noise.abs(),
            store: None,
        }
    }

    /// Append logged runs to `store`.
    pub fn with_result_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Make the next outscan abort after its first set-point.
    pub fn abort_next_outscan(&self) {
        self.state.abort_next.store(true, Ordering::SeqCst);
    }

    /// Stop the running outscan. It reports `Aborted`.
    pub fn stop(&self) {
        if self.state.busy.load(Ordering::SeqCst) {
            self.state.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Number of outscans accepted so far.
    pub fn outscans_started(&self) -> u64 {
        self.state.outscans_started.load(Ordering::SeqCst)
    }

    /// Whether the data logger is enabled.
    pub fn logger_enabled(&self) -> bool {
        self.state.logger_enabled.load(Ordering::SeqCst)
    }

    /// Whether the drive is in set-point control mode.
    pub fn in_controller_mode(&self) -> bool {
        self.state.controller_mode.load(Ordering::SeqCst)
    }
}

fn drag_force(velocity: f64, coefficient: f64, noise: f64) -> f64 {
    let jitter = if noise > 0.0 {
        rand::thread_rng().gen_range(-noise..=noise)
    } else {
        0.0
    };
    coefficient * velocity * velocity.abs() + jitter
}

struct OutscanJob {
    state: Arc<DriveState>,
    store: Option<Arc<dyn ResultStore>>,
    dt: Duration,
    step: Duration,
    drag_coefficient: f64,
    force_noise: f64,
    abort_after_first: bool,
}

impl OutscanJob {
    async fn run(self, setpoints: Vec<f64>, callbacks: OutscanCallbacks) {
        let total = setpoints.len();
        let dt = self.dt.as_secs_f64();
        let logging = self.state.logger_enabled.load(Ordering::SeqCst);
        let mut samples = Vec::new();
        let mut previous = *self.state.position.read().await;
        let mut outcome = OutscanState::Succeeded;
        let mut executed = 0;

        for (i, &setpoint) in setpoints.iter().enumerate() {
            if self.state.stop_requested.swap(false, Ordering::SeqCst)
                || (self.abort_after_first && i == 1)
            {
                tracing::warn!(executed, total, "Simulated outscan aborted");
                outcome = OutscanState::Aborted;
                break;
            }

            sleep(self.step).await;
            let velocity = (setpoint - previous) / dt;
            *self.state.position.write().await = setpoint;
            previous = setpoint;
            executed = i + 1;

            if logging {
                samples.push(TrialSample {
                    time: executed as f64 * dt,
                    force: drag_force(velocity, self.drag_coefficient, self.force_noise),
                });
            }

            if executed % FEEDBACK_INTERVAL == 0 {
                callbacks.progress(OutscanFeedback {
                    percent_complete: 100.0 * executed as f64 / total as f64,
                    secs_to_completion: (total - executed) as f64 * dt,
                });
            }
        }

        let mut result = json!({
            "setpoints": total,
            "executed": executed,
            "final_position": previous,
        });

        if outcome == OutscanState::Succeeded && logging {
            if let Some(store) = &self.store {
                match self.write_record(store.as_ref(), samples).await {
                    Ok(id) => result["record"] = json!(id),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to store logged trial data");
                        result["error"] = json!(e.to_string());
                        outcome = OutscanState::Aborted;
                    }
                }
            }
        }

        self.state.stop_requested.store(false, Ordering::SeqCst);
        self.state.busy.store(false, Ordering::SeqCst);
        tracing::debug!(?outcome, executed, total, "Simulated outscan finished");
        callbacks.done(outcome, result);
    }

    async fn write_record(
        &self,
        store: &dyn ResultStore,
        samples: Vec<TrialSample>,
    ) -> AppResult<String> {
        let record = TrialRecord::new(next_ordinal(store).await?, samples);
        store.append_trial(&record).await?;
        Ok(record.id())
    }
}

#[async_trait]
impl MotionController for SimulatedMotionController {
    async fn position(&self) -> AppResult<f64> {
        Ok(*self.state.position.read().await)
    }

    fn dt(&self) -> f64 {
        self.dt.as_secs_f64()
    }

    async fn start_setpoint_outscan(
        &self,
        setpoints: Vec<f64>,
        callbacks: OutscanCallbacks,
    ) -> AppResult<()> {
        if setpoints.is_empty() {
            return Err(DaqError::Motion("empty set-point profile".to_string()));
        }
        if self.state.busy.swap(true, Ordering::SeqCst) {
            return Err(DaqError::Motion("an outscan is already running".to_string()));
        }
        self.state.controller_mode.store(true, Ordering::SeqCst);
        self.state.outscans_started.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            ticket = callbacks.ticket(),
            setpoints = setpoints.len(),
            target = setpoints.last().copied().unwrap_or_default(),
            "Simulated outscan started"
        );

        let job = OutscanJob {
            state: Arc::clone(&self.state),
            store: self.store.clone(),
            dt: self.dt,
            step: self.dt.div_f64(self.time_scale),
            drag_coefficient: self.drag_coefficient,
            force_noise: self.force_noise,
            abort_after_first: self.state.abort_next.swap(false, Ordering::SeqCst),
        };
        tokio::spawn(job.run(setpoints, callbacks));
        Ok(())
    }

    async fn enable_logger(&self) -> AppResult<()> {
        self.state.logger_enabled.store(true, Ordering::SeqCst);
        tracing::debug!("Simulated logger enabled");
        Ok(())
    }

    async fn disable_logger(&self) -> AppResult<()> {
        self.state.logger_enabled.store(false, Ordering::SeqCst);
        tracing::debug!("Simulated logger disabled");
        Ok(())
    }

    async fn disable_controller_mode(&self) -> AppResult<()> {
        self.state.controller_mode.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::storage::{latest_trial, MemoryResultStore};
    use crate::messages::SequencerCommand;
    use crate::sequencer::phase::PhaseOutcome;
    use tokio::sync::mpsc;

    fn sim_config() -> SimulationConfig {
        SimulationConfig {
            dt: Duration::from_millis(100),
            force_noise: 0.0,
            ..SimulationConfig::default()
        }
    }

    async fn wait_for_done(
        rx: &mut mpsc::UnboundedReceiver<SequencerCommand>,
    ) -> (PhaseOutcome, serde_json::Value, usize) {
        let mut progress_reports = 0;
        while let Some(command) = rx.recv().await {
            match command {
                SequencerCommand::OutscanProgress { .. } => progress_reports += 1,
                SequencerCommand::PhaseCompleted {
                    outcome, detail, ..
                } => return (outcome, detail, progress_reports),
                other => panic!("unexpected command: {:?}", other),
            }
        }
        panic!("callbacks dropped without completion");
    }

    #[tokio::test(start_paused = true)]
    async fn test_outscan_moves_to_last_setpoint() {
        let controller = SimulatedMotionController::new(&sim_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let setpoints: Vec<f64> = (1..=25).map(|i| i as f64 * 0.1).collect();

        controller
            .start_setpoint_outscan(setpoints, OutscanCallbacks::new(1, tx))
            .await
            .unwrap();
        assert!(controller.in_controller_mode());

        let (outcome, detail, progress_reports) = wait_for_done(&mut rx).await;
        assert_eq!(outcome, PhaseOutcome::Succeeded);
        assert_eq!(detail["executed"], 25);
        assert_eq!(progress_reports, 2);
        assert!((controller.position().await.unwrap() - 2.5).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_second_concurrent_outscan() {
        let controller = SimulatedMotionController::new(&sim_config());
        let (tx, _rx) = mpsc::unbounded_channel();

        controller
            .start_setpoint_outscan(vec![1.0, 2.0], OutscanCallbacks::new(1, tx.clone()))
            .await
            .unwrap();
        let second = controller
            .start_setpoint_outscan(vec![3.0], OutscanCallbacks::new(2, tx))
            .await;
        assert!(matches!(second, Err(DaqError::Motion(_))));
        assert_eq!(controller.outscans_started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_run_appends_trial_record() {
        let store = Arc::new(MemoryResultStore::new());
        let controller = SimulatedMotionController::new(&sim_config())
            .with_result_store(store.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        controller.enable_logger().await.unwrap();
        controller
            .start_setpoint_outscan(vec![0.1, 0.3, 0.6], OutscanCallbacks::new(1, tx))
            .await
            .unwrap();
        let (outcome, detail, _) = wait_for_done(&mut rx).await;
        assert_eq!(outcome, PhaseOutcome::Succeeded);
        assert_eq!(detail["record"], "trial_1");

        let record = latest_trial(store.as_ref()).await.unwrap();
        assert_eq!(record.ordinal, 1);
        assert_eq!(record.len(), 3);
        // 12 * v^2 with v = 1, 2, 3 m/s
        let forces: Vec<f64> = record.forces().collect();
        for (force, expected) in forces.iter().zip([12.0, 48.0, 108.0]) {
            assert!((force - expected).abs() < 1e-9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_injection_and_stop() {
        let controller = SimulatedMotionController::new(&sim_config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        controller.abort_next_outscan();
        controller
            .start_setpoint_outscan(vec![1.0, 2.0, 3.0], OutscanCallbacks::new(1, tx.clone()))
            .await
            .unwrap();
        let (outcome, detail, _) = wait_for_done(&mut rx).await;
        assert_eq!(outcome, PhaseOutcome::Aborted);
        assert_eq!(detail["executed"], 1);

        let long: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        controller
            .start_setpoint_outscan(long, OutscanCallbacks::new(2, tx))
            .await
            .unwrap();
        sleep(Duration::from_secs(1)).await;
        controller.stop();
        let (outcome, _, _) = wait_for_done(&mut rx).await;
        assert_eq!(outcome, PhaseOutcome::Aborted);
        assert_eq!(controller.outscans_started(), 2);
    }
}
