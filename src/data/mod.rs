//! Trial records and the result stores that hold them.

pub mod record;
pub mod storage;

pub use record::{parse_ordinal, trial_id, TrialRecord, TrialSample};
pub use storage::{
    latest_trial, latest_trial_id, next_ordinal, open_result_store, CsvResultStore,
    Hdf5ResultStore, MemoryResultStore, ResultStore,
};
