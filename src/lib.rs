//! Core library for the sled_daq application.
//!
//! This library sequences repeated towing trials on a motion-controlled sled:
//! move to the start position, wait for the water to settle, run a logged
//! trial, and repeat. It contains the trial sequencer state machine and the
//! collaborator interfaces it drives (motion controller, trajectory planner,
//! result store, status reporter), along with reference implementations of each.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod messages;
pub mod sequencer;
pub mod status;
pub mod trajectory;

pub use error::{AppResult, DaqError};
pub use sequencer::{Collaborators, SequencerHandle, SequencerSnapshot, TrialSequencer};
