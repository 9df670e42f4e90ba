//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place for every failure the
//! trial sequencer and its collaborators can surface.
//!
//! ## Error Hierarchy
//!
//! - **`ConfigLoad`**: Wraps errors from `figment` while reading or merging the
//!   configuration file and environment overrides.
//! - **`Configuration`**: Semantic errors caught during validation, such as a wrong
//!   startup mode, a missing result-store location or a non-positive velocity.
//!   These are fatal: the sequencer is never constructed.
//! - **`OutscanInProgress`** / **`SequenceFinished`**: Usage errors returned by
//!   `start_next` when the sequencer cannot accept a new phase. State is untouched.
//! - **`Storage`** / **`NoValidTrialRecords`** / **`Io`**: Result-store failures. At the
//!   start of a trial these end the sequence through the `finished` signal.
//! - **`Motion`** / **`Planning`**: Motion controller or trajectory planner failures.
//! - **`FeatureNotEnabled`**: Functionality (like the HDF5 store) that was not compiled
//!   in. The message tells the user how to enable it.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or merged.
    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure, typically while opening a result store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The result store could not be opened, read or written.
    #[error("Result store error: {0}")]
    Storage(String),

    /// The result store holds no identifier of the form `trial_<n>`.
    #[error("No valid trial records in result store")]
    NoValidTrialRecords,

    /// The motion controller rejected or failed an operation.
    #[error("Motion controller error: {0}")]
    Motion(String),

    /// The trajectory planner rejected its inputs.
    #[error("Trajectory planning error: {0}")]
    Planning(String),

    /// `start_next` was called while an outscan is active.
    #[error("An outscan is already in progress")]
    OutscanInProgress,

    /// `start_next` was called after the sequence signalled `finished`.
    #[error("Trial sequence has finished")]
    SequenceFinished,

    /// The sequencer task is no longer running.
    #[error("Sequencer task has stopped")]
    SequencerStopped,

    /// Functionality was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::ConfigLoad(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Motion("following error".to_string());
        assert_eq!(err.to_string(), "Motion controller error: following error");
    }

    #[test]
    fn test_feature_not_enabled_mentions_flag() {
        let err = DaqError::FeatureNotEnabled("storage_hdf5".into());
        assert!(err.to_string().contains("--features storage_hdf5"));
    }
}
