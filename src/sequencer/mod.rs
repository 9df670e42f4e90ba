//! Trial sequencer actor
//!
//! Drives the repeated towing experiment: move to the start position, let the
//! fluid settle, run a logged trial, and repeat until the configured number of
//! trials has completed.
//!
//! # Architecture
//!
//! The sequencer runs as a single tokio task that owns all of its state. Host
//! requests ([`SequencerHandle`]), motion controller callbacks
//! ([`OutscanCallbacks`]) and settle-timer expiry all arrive as
//! [`SequencerCommand`]s on one unbounded channel and are handled strictly in
//! order, so phase handlers never overlap.
//!
//! ```text
//! host ──start_next──┐
//! controller ──done──┼──▶ inbox ──▶ TrialSequencer ──▶ MotionController
//! timer ──expired────┘                    │            ResultStore
//!                                         └──────────▶ StatusReporter
//! ```
//!
//! # Termination
//!
//! Every way the sequence can end (trial limit reached, motion abort, result
//! store failure) reports an explanatory message followed by exactly one
//! `finished`. Completions that arrive afterwards, or that belong to an outscan
//! the sequencer is no longer waiting for, are ignored.

pub mod phase;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

use crate::config::{validate_startup_mode, SequencerConfig, Settings};
use crate::data::storage::{latest_trial, ResultStore};
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{MotionController, OutscanCallbacks};
use crate::messages::SequencerCommand;
use crate::status::StatusReporter;
use crate::trajectory::TrajectoryPlanner;
use phase::{transition, Action, Phase, PhaseEvent, PhaseOutcome};

/// External collaborators the sequencer orchestrates.
#[derive(Clone)]
pub struct Collaborators {
    /// Executes set-point profiles
    pub controller: Arc<dyn MotionController>,
    /// Produces set-point profiles
    pub planner: Arc<dyn TrajectoryPlanner>,
    /// Holds the logged trial records
    pub store: Arc<dyn ResultStore>,
    /// Host status callbacks
    pub reporter: Arc<dyn StatusReporter>,
}

/// Read-only view of the sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerSnapshot {
    /// Handler that runs on the next `start_next`
    pub phase: Phase,
    /// Completed trial cycles
    pub trial_index: u32,
    /// Configured number of trials
    pub trial_limit: u32,
    /// An outscan or settle delay is in progress
    pub active: bool,
    /// `finished` has been signalled
    pub finished: bool,
}

#[derive(Debug)]
struct SequencerState {
    phase: Phase,
    trial_index: u32,
    active: bool,
    finished: bool,
    /// Ticket of the outscan or settle timer being waited on
    awaiting: Option<u64>,
    next_ticket: u64,
    settle_timer: Option<JoinHandle<()>>,
}

impl Default for SequencerState {
    fn default() -> Self {
        Self {
            phase: Phase::MoveToStart,
            trial_index: 0,
            active: false,
            finished: false,
            awaiting: None,
            next_ticket: 1,
            settle_timer: None,
        }
    }
}

/// The trial sequencing state machine.
pub struct TrialSequencer {
    name: String,
    config: SequencerConfig,
    collaborators: Collaborators,
    state: SequencerState,
    run_uid: String,
    /// Weak so the actor exits once every handle and callback is gone
    self_tx: Option<mpsc::WeakUnboundedSender<SequencerCommand>>,
}

impl TrialSequencer {
    /// Validate the construction contract and build a sequencer.
    ///
    /// # Errors
    /// [`DaqError::Configuration`] if `startup_mode` is not `"position trajectory"`,
    /// `store_location` is missing or empty, or `config` violates its invariants.
    pub fn new(
        name: impl Into<String>,
        startup_mode: &str,
        store_location: Option<&Path>,
        config: SequencerConfig,
        collaborators: Collaborators,
    ) -> AppResult<Self> {
        validate_startup_mode(startup_mode)?;
        match store_location {
            Some(path) if !path.as_os_str().is_empty() => {}
            _ => {
                return Err(DaqError::Configuration(
                    "no result store location set, a result store is required".to_string(),
                ))
            }
        }
        config.validate()?;

        let name = name.into();
        collaborators
            .reporter
            .message(&format!("{}: initializing", name));

        Ok(Self {
            name,
            config,
            collaborators,
            state: SequencerState::default(),
            run_uid: uuid::Uuid::new_v4().to_string(),
            self_tx: None,
        })
    }

    /// Build a sequencer from loaded settings.
    pub fn from_settings(settings: &Settings, collaborators: Collaborators) -> AppResult<Self> {
        Self::new(
            settings.plugin.name.clone(),
            &settings.plugin.startup_mode,
            settings.storage.location.as_deref(),
            settings.sequence.clone(),
            collaborators,
        )
    }

    /// Unique identifier of this sequence, attached to every log line.
    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    /// Start the actor on the current tokio runtime.
    pub fn spawn(mut self) -> (SequencerHandle, JoinHandle<()>) {
        let (tx, command_rx) = mpsc::unbounded_channel();
        self.self_tx = Some(tx.downgrade());
        let span = tracing::info_span!("sequencer", run_uid = %self.run_uid);
        let task = tokio::spawn(self.run(command_rx).instrument(span));
        (SequencerHandle { tx }, task)
    }

    /// Runs the actor event loop until shutdown or until every sender is gone.
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<SequencerCommand>) {
        info!(
            trial_limit = self.config.trial_limit,
            settle_delay = ?self.config.settle_delay,
            "Trial sequencer started"
        );

        while let Some(command) = command_rx.recv().await {
            match command {
                SequencerCommand::StartNext { response } => {
                    let result = self.start_next().await;
                    let _ = response.send(result);
                }

                SequencerCommand::Cleanup { response } => {
                    self.cleanup();
                    let _ = response.send(());
                }

                SequencerCommand::Snapshot { response } => {
                    let _ = response.send(self.snapshot());
                }

                SequencerCommand::OutscanProgress { ticket, feedback } => {
                    if self.state.awaiting == Some(ticket) {
                        trace!(
                            ticket,
                            percent_complete = feedback.percent_complete,
                            secs_to_completion = feedback.secs_to_completion,
                            "Outscan progress"
                        );
                    }
                }

                SequencerCommand::PhaseCompleted {
                    ticket,
                    outcome,
                    detail,
                } => {
                    self.on_phase_completed(ticket, outcome, detail).await;
                }

                SequencerCommand::Shutdown { response } => {
                    info!("Shutdown command received");
                    self.cancel_settle_timer();
                    let _ = response.send(());
                    break;
                }
            }
        }

        info!(trial_index = self.state.trial_index, "Trial sequencer stopped");
    }

    fn snapshot(&self) -> SequencerSnapshot {
        SequencerSnapshot {
            phase: self.state.phase,
            trial_index: self.state.trial_index,
            trial_limit: self.config.trial_limit,
            active: self.state.active,
            finished: self.state.finished,
        }
    }

    async fn start_next(&mut self) -> AppResult<()> {
        if self.state.finished {
            debug!("start_next after finish rejected");
            return Err(DaqError::SequenceFinished);
        }
        if self.state.active {
            warn!(phase = %self.state.phase, "start_next while an outscan is active rejected");
            return Err(DaqError::OutscanInProgress);
        }

        self.set_active(true);
        self.apply(PhaseEvent::Start, serde_json::Value::Null).await;
        Ok(())
    }

    fn cleanup(&self) {
        self.report("cleaning up");
    }

    async fn on_phase_completed(
        &mut self,
        ticket: u64,
        outcome: PhaseOutcome,
        detail: serde_json::Value,
    ) {
        if self.state.awaiting != Some(ticket) {
            debug!(ticket, ?outcome, awaiting = ?self.state.awaiting, "Ignoring stale completion");
            return;
        }
        self.state.awaiting = None;
        self.apply(PhaseEvent::Completed(outcome), detail).await;
    }

    /// Look up the transition for `event`, move the phase pointer and run the action.
    async fn apply(&mut self, event: PhaseEvent, detail: serde_json::Value) {
        let from = self.state.phase;
        let step = transition(from, event);
        debug!(from = %from, to = %step.next, ?event, action = ?step.action, "Phase transition");
        self.state.phase = step.next;

        match step.action {
            Action::MoveToStart => self.enter_move_to_start().await,
            Action::StartSettleTimer => self.enter_settle_delay(),
            Action::RunTrial => self.enter_run_trial().await,
            Action::OutscanComplete { cycle_complete } => {
                self.outscan_complete(cycle_complete, detail).await
            }
            Action::SettleComplete => {
                self.state.settle_timer = None;
                self.set_active(false);
            }
            Action::Abort => self.outscan_aborted(detail).await,
            Action::Ignore => {}
        }
    }

    async fn enter_move_to_start(&mut self) {
        self.report(&format!("move to start, count = {}", self.state.trial_index));
        let (target, velocity, acceleration) = (
            self.config.start_position,
            self.config.positioning_velocity,
            self.config.positioning_acceleration,
        );
        if let Err(e) = self.plan_and_submit(target, velocity, acceleration).await {
            self.motion_failure(e).await;
        }
    }

    fn enter_settle_delay(&mut self) {
        self.report(&format!("trial delay, count = {}", self.state.trial_index));
        let Some(tx) = self.sender() else {
            self.report("unable to start settle timer: sequencer stopping");
            self.set_active(false);
            self.finish();
            return;
        };

        let ticket = self.issue_ticket();
        let delay = self.config.settle_delay;
        debug!(ticket, ?delay, "Settle timer armed");
        self.state.settle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SequencerCommand::PhaseCompleted {
                ticket,
                outcome: PhaseOutcome::TimedOut,
                detail: serde_json::Value::Null,
            });
        }));
    }

    async fn enter_run_trial(&mut self) {
        self.report(&format!("running trial, count = {}", self.state.trial_index));

        if self.state.trial_index >= 1 {
            match latest_trial(self.collaborators.store.as_ref()).await {
                Ok(record) => {
                    info!(
                        ordinal = record.ordinal,
                        samples = record.len(),
                        duration = record.duration(),
                        peak_force = record.peak_force(),
                        "Loaded previous trial record"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Previous trial record unavailable");
                    self.report(&format!("unable to open result store: {}", e));
                    self.set_active(false);
                    self.finish();
                    return;
                }
            }
        }

        let (target, velocity, acceleration) = (
            self.config.run_end_position,
            self.config.run_velocity,
            self.config.run_acceleration,
        );
        if let Err(e) = self.start_logged_run(target, velocity, acceleration).await {
            self.motion_failure(e).await;
        }
    }

    async fn start_logged_run(
        &mut self,
        target: f64,
        velocity: f64,
        acceleration: f64,
    ) -> AppResult<()> {
        self.collaborators.controller.enable_logger().await?;
        self.plan_and_submit(target, velocity, acceleration).await
    }

    async fn plan_and_submit(
        &mut self,
        target: f64,
        velocity: f64,
        acceleration: f64,
    ) -> AppResult<()> {
        let controller = Arc::clone(&self.collaborators.controller);
        let current = controller.position().await?;
        let setpoints = self.collaborators.planner.plan(
            current,
            target,
            velocity,
            acceleration,
            controller.dt(),
        )?;

        let tx = self.sender().ok_or(DaqError::SequencerStopped)?;
        let ticket = self.issue_ticket();
        debug!(ticket, current, target, setpoints = setpoints.len(), "Submitting outscan");
        if let Err(e) = controller
            .start_setpoint_outscan(setpoints, OutscanCallbacks::new(ticket, tx))
            .await
        {
            self.state.awaiting = None;
            return Err(e);
        }
        Ok(())
    }

    async fn outscan_complete(&mut self, cycle_complete: bool, detail: serde_json::Value) {
        self.release_controller().await;
        self.set_active(false);
        debug!(%detail, "Outscan succeeded");
        self.report(&format!("outscan complete, count = {}", self.state.trial_index));

        if cycle_complete {
            self.state.trial_index += 1;
            info!(
                trial_index = self.state.trial_index,
                trial_limit = self.config.trial_limit,
                "Trial cycle complete"
            );
            if self.state.trial_index >= self.config.trial_limit {
                self.report(&format!(
                    "all {} trials complete",
                    self.config.trial_limit
                ));
                self.finish();
            }
        }
    }

    async fn outscan_aborted(&mut self, detail: serde_json::Value) {
        self.release_controller().await;
        self.set_active(false);
        warn!(%detail, trial_index = self.state.trial_index, "Outscan aborted");
        self.report(&format!("outscan aborted, count = {}", self.state.trial_index));
        self.finish();
    }

    /// Submission-side failure: nothing is running, so end the sequence here.
    async fn motion_failure(&mut self, error: DaqError) {
        warn!(error = %error, phase = %self.state.phase, "Unable to start outscan");
        self.release_controller().await;
        self.set_active(false);
        self.report(&format!("unable to start outscan: {}", error));
        self.finish();
    }

    async fn release_controller(&self) {
        let controller = &self.collaborators.controller;
        if let Err(e) = controller.disable_controller_mode().await {
            warn!(error = %e, "Failed to leave controller mode");
        }
        if let Err(e) = controller.disable_logger().await {
            warn!(error = %e, "Failed to disable logger");
        }
    }

    fn finish(&mut self) {
        if self.state.finished {
            return;
        }
        self.state.finished = true;
        self.state.phase = Phase::Done;
        self.state.awaiting = None;
        self.cancel_settle_timer();
        info!(trial_index = self.state.trial_index, "Trial sequence finished");
        self.collaborators.reporter.finished();
    }

    fn cancel_settle_timer(&mut self) {
        if let Some(timer) = self.state.settle_timer.take() {
            timer.abort();
        }
    }

    fn set_active(&mut self, active: bool) {
        self.state.active = active;
        self.collaborators.reporter.in_progress(active);
    }

    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.state.next_ticket;
        self.state.next_ticket += 1;
        self.state.awaiting = Some(ticket);
        ticket
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<SequencerCommand>> {
        self.self_tx.as_ref()?.upgrade()
    }

    fn report(&self, message: &str) {
        self.collaborators
            .reporter
            .message(&format!("{}: {}", self.name, message));
    }
}

/// Host-side handle to a running sequencer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SequencerHandle {
    tx: mpsc::UnboundedSender<SequencerCommand>,
}

impl SequencerHandle {
    /// Run the handler of the current phase.
    ///
    /// # Errors
    /// - [`DaqError::OutscanInProgress`] while an outscan or settle delay is active
    /// - [`DaqError::SequenceFinished`] after `finished` was signalled
    ///
    /// Neither error changes sequencer state.
    pub async fn start_next(&self) -> AppResult<()> {
        let (command, rx) = SequencerCommand::start_next();
        self.tx.send(command).map_err(|_| DaqError::SequencerStopped)?;
        rx.await.map_err(|_| DaqError::SequencerStopped)?
    }

    /// Terminal housekeeping: reports a message, changes nothing.
    pub async fn cleanup(&self) -> AppResult<()> {
        let (command, rx) = SequencerCommand::cleanup();
        self.tx.send(command).map_err(|_| DaqError::SequencerStopped)?;
        rx.await.map_err(|_| DaqError::SequencerStopped)
    }

    /// Current phase, trial index and flags.
    ///
    /// Commands are handled in order, so a snapshot reflects every callback
    /// delivered before it was requested.
    pub async fn snapshot(&self) -> AppResult<SequencerSnapshot> {
        let (command, rx) = SequencerCommand::snapshot();
        self.tx.send(command).map_err(|_| DaqError::SequencerStopped)?;
        rx.await.map_err(|_| DaqError::SequencerStopped)
    }

    /// Stop the actor. Outscans already running on the controller are not stopped.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (command, rx) = SequencerCommand::shutdown();
        self.tx.send(command).map_err(|_| DaqError::SequencerStopped)?;
        rx.await.map_err(|_| DaqError::SequencerStopped)
    }
}
