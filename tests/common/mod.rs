//! Test doubles shared by the sequencer integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use sled_daq::config::SequencerConfig;
use sled_daq::data::storage::{next_ordinal, ResultStore};
use sled_daq::data::{TrialRecord, TrialSample};
use sled_daq::hardware::{MotionController, OutscanCallbacks, OutscanState};
use sled_daq::status::{StatusReporter, StatusUpdate};
use sled_daq::trajectory::TrapezoidalPlanner;
use sled_daq::{AppResult, Collaborators, DaqError, SequencerHandle, SequencerSnapshot, TrialSequencer};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const SEQUENCER_NAME: &str = "sled";
pub const CONTROL_DT: f64 = 0.02;

/// The four-trial configuration used throughout: settle 3 s, start 7 m, end 5 m.
pub fn sequence_config(trial_limit: u32) -> SequencerConfig {
    SequencerConfig {
        trial_limit,
        settle_delay: Duration::from_secs(3),
        start_position: 7.0,
        run_end_position: 5.0,
        ..SequencerConfig::default()
    }
}

/// One accepted outscan.
#[derive(Debug, Clone)]
pub struct Submission {
    pub setpoints: Vec<f64>,
    pub callbacks: OutscanCallbacks,
    /// Logger state when the outscan was accepted
    pub logged: bool,
}

impl Submission {
    pub fn target(&self) -> f64 {
        *self.setpoints.last().expect("empty profile submitted")
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    position: f64,
    logger_enabled: bool,
    controller_mode: bool,
    fail_next_submit: bool,
    submissions: Vec<Submission>,
}

/// Motion controller that records every profile and completes outscans on demand.
///
/// Completing a logged run appends a record to the attached store, like the rig's
/// data logger does.
pub struct RecordingController {
    state: Mutex<ControllerState>,
    store: Option<Arc<dyn ResultStore>>,
}

impl RecordingController {
    pub fn new(store: Option<Arc<dyn ResultStore>>) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            store,
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().unwrap().submissions.len()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.submissions().iter().map(Submission::target).collect()
    }

    pub fn logger_enabled(&self) -> bool {
        self.state.lock().unwrap().logger_enabled
    }

    pub fn in_controller_mode(&self) -> bool {
        self.state.lock().unwrap().controller_mode
    }

    /// Reject the next submission with a motion error.
    pub fn fail_next_submit(&self) {
        self.state.lock().unwrap().fail_next_submit = true;
    }

    /// Finish the most recent outscan with `state`.
    pub async fn complete_last(&self, state: OutscanState) {
        let submission = self
            .state
            .lock()
            .unwrap()
            .submissions
            .last()
            .cloned()
            .expect("no outscan submitted");
        self.complete(&submission, state).await;
    }

    /// Finish `submission` with `state`, moving the sled and logging as the rig would.
    pub async fn complete(&self, submission: &Submission, state: OutscanState) {
        let mut result = serde_json::json!({ "setpoints": submission.setpoints.len() });
        if state == OutscanState::Succeeded {
            self.state.lock().unwrap().position = submission.target();
            if submission.logged {
                if let Some(store) = &self.store {
                    let ordinal = next_ordinal(store.as_ref()).await.expect("store listing");
                    let record = TrialRecord::new(ordinal, synthetic_samples(10));
                    store.append_trial(&record).await.expect("store append");
                    result["record"] = serde_json::json!(record.id());
                }
            }
        }
        submission.callbacks.done(state, result);
    }
}

/// Evenly spaced samples with a constant drag force.
pub fn synthetic_samples(n: usize) -> Vec<TrialSample> {
    (0..n)
        .map(|i| TrialSample {
            time: i as f64 * CONTROL_DT,
            force: 1.08,
        })
        .collect()
}

#[async_trait]
impl MotionController for RecordingController {
    async fn position(&self) -> AppResult<f64> {
        Ok(self.state.lock().unwrap().position)
    }

    fn dt(&self) -> f64 {
        CONTROL_DT
    }

    async fn start_setpoint_outscan(
        &self,
        setpoints: Vec<f64>,
        callbacks: OutscanCallbacks,
    ) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_submit) {
            return Err(DaqError::Motion("drive not ready".to_string()));
        }
        state.controller_mode = true;
        let logged = state.logger_enabled;
        state.submissions.push(Submission {
            setpoints,
            callbacks,
            logged,
        });
        Ok(())
    }

    async fn enable_logger(&self) -> AppResult<()> {
        self.state.lock().unwrap().logger_enabled = true;
        Ok(())
    }

    async fn disable_logger(&self) -> AppResult<()> {
        self.state.lock().unwrap().logger_enabled = false;
        Ok(())
    }

    async fn disable_controller_mode(&self) -> AppResult<()> {
        self.state.lock().unwrap().controller_mode = false;
        Ok(())
    }
}

/// Result store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl ResultStore for FailingStore {
    async fn trial_ids(&self) -> AppResult<Vec<String>> {
        Err(DaqError::Storage("volume not mounted".to_string()))
    }

    async fn read_trial(&self, _id: &str) -> AppResult<TrialRecord> {
        Err(DaqError::Storage("volume not mounted".to_string()))
    }

    async fn append_trial(&self, _record: &TrialRecord) -> AppResult<()> {
        Err(DaqError::Storage("volume not mounted".to_string()))
    }
}

/// Reporter that keeps every callback in order.
#[derive(Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingReporter {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.updates()
            .into_iter()
            .filter_map(|update| match update {
                StatusUpdate::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn has_message(&self, message: &str) -> bool {
        self.messages().iter().any(|m| m == message)
    }

    pub fn finished_count(&self) -> usize {
        self.updates()
            .iter()
            .filter(|update| **update == StatusUpdate::Finished)
            .count()
    }

    pub fn last_in_progress(&self) -> Option<bool> {
        self.updates().iter().rev().find_map(|update| match update {
            StatusUpdate::InProgress(active) => Some(*active),
            _ => None,
        })
    }
}

impl StatusReporter for RecordingReporter {
    fn in_progress(&self, active: bool) {
        self.updates
            .lock()
            .unwrap()
            .push(StatusUpdate::InProgress(active));
    }

    fn message(&self, message: &str) {
        self.updates
            .lock()
            .unwrap()
            .push(StatusUpdate::Message(message.to_string()));
    }

    fn finished(&self) {
        self.updates.lock().unwrap().push(StatusUpdate::Finished);
    }
}

/// A running sequencer wired to recording doubles.
pub struct Rig {
    pub handle: SequencerHandle,
    pub task: JoinHandle<()>,
    pub controller: Arc<RecordingController>,
    pub reporter: Arc<RecordingReporter>,
    pub store: Arc<dyn ResultStore>,
    pub config: SequencerConfig,
}

impl Rig {
    pub fn spawn(config: SequencerConfig, store: Arc<dyn ResultStore>) -> Self {
        let controller = Arc::new(RecordingController::new(Some(Arc::clone(&store))));
        let reporter = Arc::new(RecordingReporter::default());
        let sequencer = TrialSequencer::new(
            SEQUENCER_NAME,
            "position trajectory",
            Some(Path::new("/data/towing")),
            config.clone(),
            Collaborators {
                controller: controller.clone(),
                planner: Arc::new(TrapezoidalPlanner),
                store: Arc::clone(&store),
                reporter: reporter.clone(),
            },
        )
        .expect("valid sequencer configuration");
        let (handle, task) = sequencer.spawn();

        Self {
            handle,
            task,
            controller,
            reporter,
            store,
            config,
        }
    }

    pub async fn snapshot(&self) -> SequencerSnapshot {
        self.handle.snapshot().await.expect("sequencer running")
    }

    /// Start the move to the start position and let it succeed.
    pub async fn move_to_start(&self) {
        self.handle.start_next().await.expect("move to start accepted");
        self.controller.complete_last(OutscanState::Succeeded).await;
    }

    /// Start the settle delay and wait it out.
    pub async fn settle(&self) {
        self.handle.start_next().await.expect("settle delay accepted");
        tokio::time::sleep(self.config.settle_delay + Duration::from_millis(10)).await;
    }

    /// Start the logged run and let it succeed.
    pub async fn run_trial(&self) {
        self.handle.start_next().await.expect("trial run accepted");
        self.controller.complete_last(OutscanState::Succeeded).await;
    }

    /// One full start/settle/run cycle.
    pub async fn cycle(&self) {
        self.move_to_start().await;
        self.settle().await;
        self.run_trial().await;
    }
}

pub fn message(text: &str) -> String {
    format!("{}: {}", SEQUENCER_NAME, text)
}
