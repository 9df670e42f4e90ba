//! Per-trial force records and their identifiers.
//!
//! Every trial run produces one record named `trial_<ordinal>`. Ordinals are
//! compared as integers: `trial_10` is more recent than `trial_9`, even though
//! it sorts first as a string.

use serde::{Deserialize, Serialize};

/// Marker every trial record identifier contains.
pub const TRIAL_MARKER: &str = "trial";

/// One logged sample: seconds since the start of the run and measured force.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialSample {
    /// Seconds since the run started
    pub time: f64,
    /// Measured force (N)
    pub force: f64,
}

/// The time/force series recorded during one trial run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Trial ordinal embedded in the identifier
    pub ordinal: u64,
    /// Logged samples in time order
    pub samples: Vec<TrialSample>,
}

/// Identifier under which the record with `ordinal` is stored.
pub fn trial_id(ordinal: u64) -> String {
    format!("{}_{}", TRIAL_MARKER, ordinal)
}

/// Parse the ordinal out of a stored identifier.
///
/// Returns `None` for anything that is not a trial record, i.e. identifiers without
/// the `trial` marker or whose last `_`-separated segment is not an unsigned integer.
pub fn parse_ordinal(id: &str) -> Option<u64> {
    if !id.contains(TRIAL_MARKER) {
        return None;
    }
    let (_, ordinal) = id.rsplit_once('_')?;
    ordinal.parse().ok()
}

impl TrialRecord {
    /// Create a record from its ordinal and samples.
    pub fn new(ordinal: u64, samples: Vec<TrialSample>) -> Self {
        Self { ordinal, samples }
    }

    /// Store identifier of this record.
    pub fn id(&self) -> String {
        trial_id(self.ordinal)
    }

    /// Sample times.
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.time)
    }

    /// Sample forces.
    pub fn forces(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.force)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Largest absolute force, if any samples were logged.
    pub fn peak_force(&self) -> Option<f64> {
        self.forces().map(f64::abs).reduce(f64::max)
    }

    /// Time span covered by the samples.
    pub fn duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordinal() {
        assert_eq!(parse_ordinal("trial_1"), Some(1));
        assert_eq!(parse_ordinal("trial_10"), Some(10));
        assert_eq!(parse_ordinal("towing_trial_7"), Some(7));
        assert_eq!(parse_ordinal("trial_x"), None);
        assert_eq!(parse_ordinal("trial10"), None);
        assert_eq!(parse_ordinal("settings_3"), None);
        assert_eq!(parse_ordinal("trial_-2"), None);
    }

    #[test]
    fn test_trial_id_round_trips_through_parser() {
        assert_eq!(trial_id(12), "trial_12");
        assert_eq!(parse_ordinal(&trial_id(12)), Some(12));
    }

    #[test]
    fn test_record_summary() {
        let record = TrialRecord::new(
            3,
            vec![
                TrialSample { time: 0.0, force: 0.1 },
                TrialSample { time: 0.5, force: -2.5 },
                TrialSample { time: 1.5, force: 1.0 },
            ],
        );
        assert_eq!(record.id(), "trial_3");
        assert_eq!(record.len(), 3);
        assert_eq!(record.peak_force(), Some(2.5));
        assert_eq!(record.duration(), 1.5);

        let empty = TrialRecord::new(4, Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.peak_force(), None);
        assert_eq!(empty.duration(), 0.0);
    }
}
