//! Motion controller capability
//!
//! The sequencer drives the sled exclusively through [`MotionController`]. An
//! outscan is one set-point profile execution: the controller accepts the profile,
//! returns immediately, and later reports back through [`OutscanCallbacks`] from
//! whatever task or thread runs the motion.
//!
//! # Contract
//! - `start_setpoint_outscan` returns as soon as the profile is accepted
//! - Exactly one `done` call per accepted outscan
//! - `progress` is advisory and may be called any number of times
//! - Callbacks never block and may be invoked from any thread

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::AppResult;
use crate::messages::SequencerCommand;
use crate::sequencer::phase::PhaseOutcome;

/// Progress report for a running outscan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutscanFeedback {
    /// Fraction of set-points executed, 0-100
    pub percent_complete: f64,
    /// Estimated seconds until the last set-point
    pub secs_to_completion: f64,
}

/// Terminal state of an outscan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutscanState {
    /// Every set-point was executed
    Succeeded,
    /// The outscan was stopped or failed
    Aborted,
}

impl From<OutscanState> for PhaseOutcome {
    fn from(state: OutscanState) -> Self {
        match state {
            OutscanState::Succeeded => PhaseOutcome::Succeeded,
            OutscanState::Aborted => PhaseOutcome::Aborted,
        }
    }
}

/// Progress and completion callbacks handed to the controller with each outscan.
///
/// Cheap to clone; each call is a non-blocking send into the sequencer's inbox.
/// Calls made after the sequencer has stopped are dropped silently.
#[derive(Debug, Clone)]
pub struct OutscanCallbacks {
    ticket: u64,
    inbox: mpsc::UnboundedSender<SequencerCommand>,
}

impl OutscanCallbacks {
    pub(crate) fn new(ticket: u64, inbox: mpsc::UnboundedSender<SequencerCommand>) -> Self {
        Self { ticket, inbox }
    }

    /// Identifier of the outscan these callbacks belong to.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Report progress. Advisory only.
    pub fn progress(&self, feedback: OutscanFeedback) {
        let _ = self.inbox.send(SequencerCommand::OutscanProgress {
            ticket: self.ticket,
            feedback,
        });
    }

    /// Report that the outscan ended. `result` is an opaque payload kept for logging.
    pub fn done(&self, state: OutscanState, result: serde_json::Value) {
        if self
            .inbox
            .send(SequencerCommand::PhaseCompleted {
                ticket: self.ticket,
                outcome: state.into(),
                detail: result,
            })
            .is_err()
        {
            tracing::debug!(ticket = self.ticket, "Outscan finished after sequencer stopped");
        }
    }
}

/// Capability: set-point profile execution with data logging.
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Current sled position.
    async fn position(&self) -> AppResult<f64>;

    /// Control time-step in seconds.
    fn dt(&self) -> f64;

    /// Start executing `setpoints`, one per time-step.
    ///
    /// Returns once the profile is accepted. Completion is reported through `callbacks`.
    async fn start_setpoint_outscan(
        &self,
        setpoints: Vec<f64>,
        callbacks: OutscanCallbacks,
    ) -> AppResult<()>;

    /// Start recording sensor data for the next outscan.
    async fn enable_logger(&self) -> AppResult<()>;

    /// Stop recording sensor data.
    async fn disable_logger(&self) -> AppResult<()>;

    /// Leave set-point control mode after an outscan.
    async fn disable_controller_mode(&self) -> AppResult<()>;
}
