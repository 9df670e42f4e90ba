//! Configuration System using Figment
//!
//! Strongly-typed configuration for the trial sequencer and the simulated rig.
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables (prefixed with `SLEDDAQ_`, nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SLEDDAQ_SEQUENCE__TRIAL_LIMIT=10
//! SLEDDAQ_SEQUENCE__SETTLE_DELAY=5s
//! SLEDDAQ_STORAGE__LOCATION=/data/towing/run_42
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sled_daq::config::Settings;
//!
//! let settings = Settings::load(Some("config/sequencer.toml".as_ref())).unwrap();
//! println!("Trials: {}", settings.sequence.trial_limit);
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};

/// Startup mode the sequencer requires from its host.
pub const POSITION_TRAJECTORY_MODE: &str = "position trajectory";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Host/plugin settings
    pub plugin: PluginConfig,
    /// Result store settings
    pub storage: StorageConfig,
    /// Trial sequence parameters
    #[serde(default)]
    pub sequence: SequencerConfig,
    /// Simulated motion controller parameters
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Host-facing plugin settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Display name used in status messages
    #[serde(default = "default_plugin_name")]
    pub name: String,
    /// Mode the host started the controller in; must be `"position trajectory"`
    pub startup_mode: String,
}

/// Which result store backs the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Directory of `trial_<n>.csv` files
    #[default]
    Csv,
    /// Single HDF5 file with one group per trial
    Hdf5,
    /// Process-local store, nothing persisted
    Memory,
}

/// Result store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,
    /// Location of the store (directory for CSV, file for HDF5). Required.
    #[serde(default)]
    pub location: Option<PathBuf>,
}

/// Immutable parameters of a trial sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Number of full start/settle/run cycles before the sequence finishes
    #[serde(default = "default_trial_limit")]
    pub trial_limit: u32,
    /// Time the fluid is left to settle before each run
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Position the sled returns to before each trial
    #[serde(default = "default_start_position")]
    pub start_position: f64,
    /// Velocity limit while positioning
    #[serde(default = "default_positioning_velocity")]
    pub positioning_velocity: f64,
    /// Acceleration limit while positioning
    #[serde(default = "default_positioning_acceleration")]
    pub positioning_acceleration: f64,
    /// Position at which a trial run ends
    #[serde(default = "default_run_end_position")]
    pub run_end_position: f64,
    /// Velocity limit during a trial run
    #[serde(default = "default_run_velocity")]
    pub run_velocity: f64,
    /// Acceleration limit during a trial run
    #[serde(default = "default_run_acceleration")]
    pub run_acceleration: f64,
}

/// Simulated rig configuration, used by the binary and tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Sled position at power-up
    #[serde(default)]
    pub initial_position: f64,
    /// Control time-step
    #[serde(default = "default_dt", with = "humantime_serde")]
    pub dt: Duration,
    /// Wall-clock speed-up (2.0 runs twice as fast as real time)
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// Quadratic drag coefficient of the towed model (N·s²/m²)
    #[serde(default = "default_drag_coefficient")]
    pub drag_coefficient: f64,
    /// Standard deviation-like amplitude of the force noise (N)
    #[serde(default = "default_force_noise")]
    pub force_noise: f64,
}

fn default_plugin_name() -> String {
    "sled trial sequencer".to_string()
}

fn default_trial_limit() -> u32 {
    4
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_start_position() -> f64 {
    7.0
}

fn default_positioning_velocity() -> f64 {
    0.2
}

fn default_positioning_acceleration() -> f64 {
    0.05
}

fn default_run_end_position() -> f64 {
    5.0
}

fn default_run_velocity() -> f64 {
    0.3
}

fn default_run_acceleration() -> f64 {
    0.075
}

fn default_dt() -> Duration {
    Duration::from_millis(20)
}

fn default_time_scale() -> f64 {
    1.0
}

fn default_drag_coefficient() -> f64 {
    12.0
}

fn default_force_noise() -> f64 {
    0.05
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            trial_limit: default_trial_limit(),
            settle_delay: default_settle_delay(),
            start_position: default_start_position(),
            positioning_velocity: default_positioning_velocity(),
            positioning_acceleration: default_positioning_acceleration(),
            run_end_position: default_run_end_position(),
            run_velocity: default_run_velocity(),
            run_acceleration: default_run_acceleration(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            dt: default_dt(),
            time_scale: default_time_scale(),
            drag_coefficient: default_drag_coefficient(),
            force_noise: default_force_noise(),
        }
    }
}

fn ensure_positive(name: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{} must be strictly positive, got {}",
            name, value
        )))
    }
}

fn ensure_finite(name: &str, value: f64) -> AppResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{} must be finite, got {}",
            name, value
        )))
    }
}

impl SequencerConfig {
    /// Check the invariants: limit ≥ 1, velocities and accelerations strictly positive.
    pub fn validate(&self) -> AppResult<()> {
        if self.trial_limit < 1 {
            return Err(DaqError::Configuration(
                "trial_limit must be at least 1".to_string(),
            ));
        }
        ensure_finite("start_position", self.start_position)?;
        ensure_finite("run_end_position", self.run_end_position)?;
        ensure_positive("positioning_velocity", self.positioning_velocity)?;
        ensure_positive("positioning_acceleration", self.positioning_acceleration)?;
        ensure_positive("run_velocity", self.run_velocity)?;
        ensure_positive("run_acceleration", self.run_acceleration)?;
        Ok(())
    }
}

impl SimulationConfig {
    /// Check the simulated rig parameters.
    pub fn validate(&self) -> AppResult<()> {
        ensure_finite("initial_position", self.initial_position)?;
        if self.dt.is_zero() {
            return Err(DaqError::Configuration("dt must be non-zero".to_string()));
        }
        ensure_positive("time_scale", self.time_scale)?;
        if !(self.drag_coefficient.is_finite() && self.force_noise.is_finite()) {
            return Err(DaqError::Configuration(
                "drag_coefficient and force_noise must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl Settings {
    /// Settings for the given store location with every other value at its default.
    pub fn with_store_location(location: impl Into<PathBuf>) -> Self {
        Self {
            plugin: PluginConfig {
                name: default_plugin_name(),
                startup_mode: POSITION_TRAJECTORY_MODE.to_string(),
            },
            storage: StorageConfig {
                backend: StoreBackend::default(),
                location: Some(location.into()),
            },
            sequence: SequencerConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }

    /// Load configuration from an optional TOML file merged with `SLEDDAQ_` env vars,
    /// then validate it.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let settings = Self::extract(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load`] but without validation, for callers that apply
    /// overrides first.
    pub fn extract(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment
            .merge(Env::prefixed("SLEDDAQ_").split("__"))
            .extract()?)
    }

    /// Validate startup mode, store location and parameter invariants.
    pub fn validate(&self) -> AppResult<()> {
        validate_startup_mode(&self.plugin.startup_mode)?;
        self.store_location()?;
        self.sequence.validate()?;
        self.simulation.validate()?;
        Ok(())
    }

    /// The configured result-store location, or a configuration error when absent.
    pub fn store_location(&self) -> AppResult<&Path> {
        match self.storage.location.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(DaqError::Configuration(
                "no result store location set, a result store is required".to_string(),
            )),
        }
    }
}

/// Reject any startup mode other than `"position trajectory"`.
pub fn validate_startup_mode(mode: &str) -> AppResult<()> {
    if mode == POSITION_TRAJECTORY_MODE {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "incorrect startup mode '{}' - must be {}",
            mode, POSITION_TRAJECTORY_MODE
        )))
    }
}
