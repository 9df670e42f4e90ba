//! Trial phases and the transition table between them.
//!
//! The current phase doubles as the "next handler" pointer: `start_next` runs the
//! handler of the current phase and moves the pointer to its successor. Completion
//! events never move the pointer, except an abort, which ends the sequence.
//!
//! ```text
//!          start            start            start
//! MoveToStart ──▶ SettleDelay ──▶ RunTrial ──▶ MoveToStart ...
//!      │ (abort)      │ (abort)       │ (abort)
//!      └──────────────┴───────────────┴──────▶ Done
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequencer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Position the sled at the start position
    MoveToStart,
    /// Let the fluid settle
    SettleDelay,
    /// Run the logged trial
    RunTrial,
    /// Terminal; nothing more is started
    Done,
}

impl Phase {
    /// Phase whose handler runs after this one.
    pub fn successor(self) -> Phase {
        match self {
            Phase::MoveToStart => Phase::SettleDelay,
            Phase::SettleDelay => Phase::RunTrial,
            Phase::RunTrial => Phase::MoveToStart,
            Phase::Done => Phase::Done,
        }
    }

    /// Short lowercase label for messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::MoveToStart => "move to start",
            Phase::SettleDelay => "trial delay",
            Phase::RunTrial => "running trial",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phase's asynchronous work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseOutcome {
    /// Outscan executed every set-point
    Succeeded,
    /// Outscan stopped or failed
    Aborted,
    /// Settle timer expired
    TimedOut,
}

/// Inbound event for the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Host called `start_next`
    Start,
    /// Outscan or settle timer finished
    Completed(PhaseOutcome),
}

/// Work the sequencer performs for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Plan and submit the move to the start position
    MoveToStart,
    /// Arm the settle timer
    StartSettleTimer,
    /// Load the previous record, then plan and submit the logged run
    RunTrial,
    /// Outscan succeeded; `cycle_complete` when it closed a full start/settle/run cycle
    OutscanComplete {
        /// Counter increments only at the wrap back to `MoveToStart`
        cycle_complete: bool,
    },
    /// Settle timer expired
    SettleComplete,
    /// Outscan aborted; the sequence ends
    Abort,
    /// Event is not meaningful in this phase
    Ignore,
}

/// Result of looking up `(phase, event)` in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Phase pointer after the transition
    pub next: Phase,
    /// Work to perform
    pub action: Action,
}

/// The transition table.
pub fn transition(phase: Phase, event: PhaseEvent) -> Transition {
    use PhaseOutcome::*;

    let (next, action) = match (phase, event) {
        (Phase::Done, _) => (Phase::Done, Action::Ignore),

        (Phase::MoveToStart, PhaseEvent::Start) => (phase.successor(), Action::MoveToStart),
        (Phase::SettleDelay, PhaseEvent::Start) => (phase.successor(), Action::StartSettleTimer),
        (Phase::RunTrial, PhaseEvent::Start) => (phase.successor(), Action::RunTrial),

        // The pointer is back at MoveToStart only after the run outscan was submitted
        (Phase::MoveToStart, PhaseEvent::Completed(Succeeded)) => (
            phase,
            Action::OutscanComplete {
                cycle_complete: true,
            },
        ),
        (_, PhaseEvent::Completed(Succeeded)) => (
            phase,
            Action::OutscanComplete {
                cycle_complete: false,
            },
        ),
        (_, PhaseEvent::Completed(Aborted)) => (Phase::Done, Action::Abort),
        (_, PhaseEvent::Completed(TimedOut)) => (phase, Action::SettleComplete),
    };

    Transition { next, action }
}
