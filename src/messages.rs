//! Message types for the trial sequencer actor
//!
//! Everything that can change sequencer state arrives as a [`SequencerCommand`] on
//! one channel: host requests, motion controller callbacks and settle-timer expiry.
//! The actor handles them one at a time, so no two phase handlers ever overlap.

use crate::error::AppResult;
use crate::hardware::capabilities::OutscanFeedback;
use crate::sequencer::phase::PhaseOutcome;
use crate::sequencer::SequencerSnapshot;
use tokio::sync::oneshot;

/// Commands and events processed by the sequencer actor
#[derive(Debug)]
pub enum SequencerCommand {
    /// Begin the handler of the current phase
    StartNext {
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Terminal housekeeping hook
    Cleanup { response: oneshot::Sender<()> },

    /// Read-only view of the sequencer state
    Snapshot {
        response: oneshot::Sender<SequencerSnapshot>,
    },

    /// Advisory progress from the motion controller
    OutscanProgress {
        ticket: u64,
        feedback: OutscanFeedback,
    },

    /// An outscan or the settle timer finished
    PhaseCompleted {
        ticket: u64,
        outcome: PhaseOutcome,
        detail: serde_json::Value,
    },

    /// Stop the actor
    Shutdown { response: oneshot::Sender<()> },
}

impl SequencerCommand {
    /// Helper to create a StartNext command
    pub fn start_next() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::StartNext { response: tx }, rx)
    }

    /// Helper to create a Cleanup command
    pub fn cleanup() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Cleanup { response: tx }, rx)
    }

    /// Helper to create a Snapshot command
    pub fn snapshot() -> (Self, oneshot::Receiver<SequencerSnapshot>) {
        let (tx, rx) = oneshot::channel();
        (Self::Snapshot { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
