//! Result stores with clean feature flag handling.
//!
//! A result store is append-only: the motion controller's logger adds one
//! [`TrialRecord`] per trial run and the sequencer reads back the most recent one.
use crate::{
    config::{StorageConfig, StoreBackend},
    data::record::{parse_ordinal, trial_id, TrialRecord, TrialSample},
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only store of per-trial records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Identifiers of every stored entry, trial records or not.
    async fn trial_ids(&self) -> AppResult<Vec<String>>;

    /// Read the record stored under `id`.
    async fn read_trial(&self, id: &str) -> AppResult<TrialRecord>;

    /// Append a new record. Fails if a record with the same identifier exists.
    async fn append_trial(&self, record: &TrialRecord) -> AppResult<()>;
}

/// Pick the identifier with the highest trial ordinal.
///
/// Identifiers that do not parse as `trial_<n>` are skipped.
pub fn latest_trial_id<'a, I>(ids: I) -> Option<(u64, &'a str)>
where
    I: IntoIterator<Item = &'a String>,
{
    ids.into_iter()
        .filter_map(|id| parse_ordinal(id).map(|ordinal| (ordinal, id.as_str())))
        .max_by_key(|(ordinal, _)| *ordinal)
}

/// Read the most recent trial record from `store`.
///
/// Fails with [`DaqError::NoValidTrialRecords`] when no identifier parses.
pub async fn latest_trial(store: &dyn ResultStore) -> AppResult<TrialRecord> {
    let ids = store.trial_ids().await?;
    let (ordinal, id) = latest_trial_id(&ids).ok_or(DaqError::NoValidTrialRecords)?;
    tracing::debug!(ordinal, id, candidates = ids.len(), "Selected latest trial record");
    store.read_trial(id).await
}

/// Ordinal the next appended record should use (1 for an empty store).
pub async fn next_ordinal(store: &dyn ResultStore) -> AppResult<u64> {
    let ids = store.trial_ids().await?;
    Ok(latest_trial_id(&ids).map_or(1, |(ordinal, _)| ordinal + 1))
}

/// Open the store described by `config`.
pub fn open_result_store(config: &StorageConfig) -> AppResult<Arc<dyn ResultStore>> {
    let location = config.location.as_deref().ok_or_else(|| {
        DaqError::Configuration("no result store location set".to_string())
    })?;
    let store: Arc<dyn ResultStore> = match config.backend {
        StoreBackend::Csv => Arc::new(CsvResultStore::new(location)?),
        StoreBackend::Hdf5 => Arc::new(Hdf5ResultStore::new(location)?),
        StoreBackend::Memory => Arc::new(MemoryResultStore::new()),
    };
    tracing::info!(backend = ?config.backend, location = %location.display(), "Result store opened");
    Ok(store)
}

// ============================================================================
// Memory Store
// ============================================================================

/// Process-local result store.
#[derive(Default)]
pub struct MemoryResultStore {
    entries: RwLock<BTreeMap<String, Vec<TrialSample>>>,
}

impl MemoryResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store samples under an arbitrary identifier, bypassing the trial naming scheme.
    pub async fn insert_raw(&self, id: &str, samples: Vec<TrialSample>) {
        self.entries.write().await.insert(id.to_string(), samples);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn trial_ids(&self) -> AppResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn read_trial(&self, id: &str) -> AppResult<TrialRecord> {
        let ordinal = parse_ordinal(id)
            .ok_or_else(|| DaqError::Storage(format!("'{}' is not a trial record", id)))?;
        let entries = self.entries.read().await;
        let samples = entries
            .get(id)
            .ok_or_else(|| DaqError::Storage(format!("no record named '{}'", id)))?;
        Ok(TrialRecord::new(ordinal, samples.clone()))
    }

    async fn append_trial(&self, record: &TrialRecord) -> AppResult<()> {
        let id = record.id();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return Err(DaqError::Storage(format!("record '{}' already exists", id)));
        }
        entries.insert(id, record.samples.clone());
        Ok(())
    }
}

// ============================================================================
// CSV Store
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::io::Write;
    use std::path::{Path, PathBuf};

    /// Directory of `trial_<n>.csv` files with `time,force` columns.
    pub struct CsvResultStore {
        dir: PathBuf,
    }

    impl CsvResultStore {
        /// Open the store in `dir`, creating the directory if needed.
        pub fn new(dir: impl AsRef<Path>) -> AppResult<Self> {
            let dir = dir.as_ref().to_path_buf();
            if !dir.exists() {
                std::fs::create_dir_all(&dir)?;
            }
            tracing::debug!(dir = %dir.display(), "CSV result store ready");
            Ok(Self { dir })
        }

        fn path_for(&self, id: &str) -> PathBuf {
            self.dir.join(format!("{}.csv", id))
        }
    }

    fn csv_err(context: &str, err: csv::Error) -> DaqError {
        DaqError::Storage(format!("{}: {}", context, err))
    }

    #[async_trait]
    impl ResultStore for CsvResultStore {
        async fn trial_ids(&self) -> AppResult<Vec<String>> {
            let mut ids = Vec::new();
            for entry in std::fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
            Ok(ids)
        }

        async fn read_trial(&self, id: &str) -> AppResult<TrialRecord> {
            let ordinal = parse_ordinal(id)
                .ok_or_else(|| DaqError::Storage(format!("'{}' is not a trial record", id)))?;
            let file = File::open(self.path_for(id))?;
            let mut reader = csv::ReaderBuilder::new()
                .comment(Some(b'#'))
                .from_reader(file);
            let samples = reader
                .deserialize::<TrialSample>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| csv_err("Failed to read trial samples", e))?;
            Ok(TrialRecord::new(ordinal, samples))
        }

        async fn append_trial(&self, record: &TrialRecord) -> AppResult<()> {
            let path = self.path_for(&trial_id(record.ordinal));
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .map_err(|e| {
                    DaqError::Storage(format!("Failed to create {}: {}", path.display(), e))
                })?;

            writeln!(file, "# recorded_at: {}", chrono::Utc::now().to_rfc3339())?;

            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(file);
            writer
                .write_record(["time", "force"])
                .map_err(|e| csv_err("Failed to write CSV header", e))?;
            for sample in &record.samples {
                writer
                    .serialize(sample)
                    .map_err(|e| csv_err("Failed to write trial sample", e))?;
            }
            writer.flush()?;
            tracing::debug!(path = %path.display(), samples = record.len(), "Trial record written");
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use std::path::Path;

    /// Placeholder when the `storage_csv` feature is off.
    pub struct CsvResultStore;

    impl CsvResultStore {
        /// Always fails: CSV support was not compiled in.
        pub fn new(_dir: impl AsRef<Path>) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }

    #[async_trait]
    impl ResultStore for CsvResultStore {
        async fn trial_ids(&self) -> AppResult<Vec<String>> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        async fn read_trial(&self, _id: &str) -> AppResult<TrialRecord> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        async fn append_trial(&self, _record: &TrialRecord) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvResultStore;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvResultStore;

// ============================================================================
// HDF5 Store
// ============================================================================

#[cfg(feature = "storage_hdf5")]
mod hdf5_enabled {
    use super::*;
    use std::path::{Path, PathBuf};

    #[derive(hdf5::H5Type, Clone, Copy, Debug)]
    #[repr(C)]
    struct H5Sample {
        time: f64,
        force: f64,
    }

    /// One HDF5 file; each trial is a group holding a compound `data` dataset.
    pub struct Hdf5ResultStore {
        path: PathBuf,
    }

    impl Hdf5ResultStore {
        /// Use the HDF5 file at `path`. The file is created on first append.
        pub fn new(path: impl AsRef<Path>) -> AppResult<Self> {
            Ok(Self {
                path: path.as_ref().to_path_buf(),
            })
        }
    }

    fn h5_err(err: hdf5::Error) -> DaqError {
        DaqError::Storage(err.to_string())
    }

    #[async_trait]
    impl ResultStore for Hdf5ResultStore {
        async fn trial_ids(&self) -> AppResult<Vec<String>> {
            let file = hdf5::File::open(&self.path).map_err(h5_err)?;
            file.member_names().map_err(h5_err)
        }

        async fn read_trial(&self, id: &str) -> AppResult<TrialRecord> {
            let ordinal = parse_ordinal(id)
                .ok_or_else(|| DaqError::Storage(format!("'{}' is not a trial record", id)))?;
            let file = hdf5::File::open(&self.path).map_err(h5_err)?;
            let dataset = file.dataset(&format!("{}/data", id)).map_err(h5_err)?;
            let raw: Vec<H5Sample> = dataset.read_raw().map_err(h5_err)?;
            let samples = raw
                .into_iter()
                .map(|s| TrialSample {
                    time: s.time,
                    force: s.force,
                })
                .collect();
            Ok(TrialRecord::new(ordinal, samples))
        }

        async fn append_trial(&self, record: &TrialRecord) -> AppResult<()> {
            let id = record.id();
            let file = hdf5::File::append(&self.path).map_err(h5_err)?;
            if file.link_exists(&id) {
                return Err(DaqError::Storage(format!("record '{}' already exists", id)));
            }
            let group = file.create_group(&id).map_err(h5_err)?;
            let data: Vec<H5Sample> = record
                .samples
                .iter()
                .map(|s| H5Sample {
                    time: s.time,
                    force: s.force,
                })
                .collect();
            group
                .new_dataset_builder()
                .with_data(data.as_slice())
                .create("data")
                .map_err(h5_err)?;
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_hdf5"))]
mod hdf5_disabled {
    use super::*;
    use std::path::Path;

    /// Placeholder when the `storage_hdf5` feature is off.
    pub struct Hdf5ResultStore;

    impl Hdf5ResultStore {
        /// Always fails: HDF5 support was not compiled in.
        pub fn new(_path: impl AsRef<Path>) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }

    #[async_trait]
    impl ResultStore for Hdf5ResultStore {
        async fn trial_ids(&self) -> AppResult<Vec<String>> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }

        async fn read_trial(&self, _id: &str) -> AppResult<TrialRecord> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }

        async fn append_trial(&self, _record: &TrialRecord) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
        }
    }
}

#[cfg(feature = "storage_hdf5")]
pub use hdf5_enabled::Hdf5ResultStore;

#[cfg(not(feature = "storage_hdf5"))]
pub use hdf5_disabled::Hdf5ResultStore;

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<TrialSample> {
        (0..n)
            .map(|i| TrialSample {
                time: i as f64 * 0.1,
                force: i as f64,
            })
            .collect()
    }

    #[test]
    fn test_latest_uses_numeric_ordinal() {
        let ids: Vec<String> = ["trial_2", "trial_10", "trial_1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(latest_trial_id(&ids), Some((10, "trial_10")));
    }

    #[test]
    fn test_latest_skips_malformed_ids() {
        let ids: Vec<String> = ["trial_3", "trial_final", "metadata", "trial_99x"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(latest_trial_id(&ids), Some((3, "trial_3")));

        let none: Vec<String> = vec!["metadata".to_string(), "trial_".to_string()];
        assert_eq!(latest_trial_id(&none), None);
    }

    #[tokio::test]
    async fn test_memory_store_latest_trial() {
        let store = MemoryResultStore::new();
        store.insert_raw("trial_2", samples(2)).await;
        store.insert_raw("trial_10", samples(10)).await;
        store.insert_raw("trial_1", samples(1)).await;
        store.insert_raw("calibration", samples(4)).await;

        let record = latest_trial(&store).await.unwrap();
        assert_eq!(record.ordinal, 10);
        assert_eq!(record.len(), 10);
        assert_eq!(next_ordinal(&store).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_memory_store_without_trials() {
        let store = MemoryResultStore::new();
        assert_eq!(next_ordinal(&store).await.unwrap(), 1);

        store.insert_raw("calibration", samples(4)).await;
        assert!(matches!(
            latest_trial(&store).await,
            Err(DaqError::NoValidTrialRecords)
        ));
    }

    #[tokio::test]
    async fn test_memory_store_is_append_only() {
        let store = MemoryResultStore::new();
        let record = TrialRecord::new(1, samples(3));
        store.append_trial(&record).await.unwrap();
        assert!(store.append_trial(&record).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn test_csv_store_append_and_read_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvResultStore::new(dir.path().join("trials")).unwrap();

        for ordinal in [1, 2, 10] {
            store
                .append_trial(&TrialRecord::new(ordinal, samples(ordinal as usize)))
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("trials").join("notes.txt"), "ignored").unwrap();

        let mut ids = store.trial_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["trial_1", "trial_10", "trial_2"]);

        let latest = latest_trial(&store).await.unwrap();
        assert_eq!(latest, TrialRecord::new(10, samples(10)));
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn test_csv_store_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trials");
        let store = CsvResultStore::new(&path).unwrap();
        std::fs::remove_dir_all(&path).unwrap();

        assert!(matches!(latest_trial(&store).await, Err(DaqError::Io(_))));
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn test_hdf5_store_requires_feature() {
        assert!(matches!(
            Hdf5ResultStore::new("trials.h5"),
            Err(DaqError::FeatureNotEnabled(_))
        ));
    }
}
