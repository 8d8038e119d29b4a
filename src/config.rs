//! TOML run configuration.

use crate::{
    enums::{InitializeMode, Interpolation},
    error::StatisticsError,
    registration::{PollPolicy, RegistrationParameters},
    statistics::{CC_PER_CUBIC_MM, StatisticsTable},
};

use serde::{Deserialize, Serialize};
use std::path::Path;
use web_time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
    #[error("registration poll budget must be at least 1")]
    InvalidPollBudget,
    #[error("backoff factor must be at least 1.0")]
    InvalidBackoff,
    #[error("unit conversion factor must be positive")]
    InvalidUnitFactor,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub resample: ResampleConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "volume_sequence=debug,warn").
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Multiplier from cubic spacing units to the alternate volume unit.
    pub cc_per_cubic_mm: f64,
    /// Leave label 0 out of plotted series.
    pub ignore_background_in_series: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            cc_per_cubic_mm: CC_PER_CUBIC_MM,
            ignore_background_in_series: true,
        }
    }
}

impl StatisticsConfig {
    /// Chart points of one metric, with or without the background label as
    /// configured.
    pub fn series(
        &self,
        table: &StatisticsTable,
        key: &str,
    ) -> Result<Vec<(f64, f64)>, StatisticsError> {
        table.series(key, self.ignore_background_in_series)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    pub interpolation: Interpolation,
    pub background: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_polls: u32,
    pub poll_interval_ms: u64,
    pub backoff_factor: f64,
    pub max_interval_ms: u64,
    pub initialize_mode: InitializeMode,
    pub cost_metric: String,
    pub translation_scale: f64,
    pub iterations: u32,
    pub use_rigid: bool,
    pub resample_output: bool,
    /// Invert the output transforms once the run is over.
    pub invert_results: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        let parameters = RegistrationParameters::default();
        Self {
            max_polls: 100,
            poll_interval_ms: 100,
            backoff_factor: 1.0,
            max_interval_ms: 5000,
            initialize_mode: parameters.initialize_mode,
            cost_metric: parameters.cost_metric,
            translation_scale: parameters.translation_scale,
            iterations: parameters.iterations,
            use_rigid: parameters.use_rigid,
            resample_output: parameters.resample_output,
            invert_results: false,
        }
    }
}

impl RegistrationConfig {
    pub fn parameters(&self) -> RegistrationParameters {
        RegistrationParameters {
            initialize_mode: self.initialize_mode,
            cost_metric: self.cost_metric.clone(),
            translation_scale: self.translation_scale,
            iterations: self.iterations,
            use_rigid: self.use_rigid,
            resample_output: self.resample_output,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_polls,
            interval: Duration::from_millis(self.poll_interval_ms),
            backoff_factor: self.backoff_factor,
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registration.max_polls == 0 {
            return Err(ConfigError::InvalidPollBudget);
        }
        if !(self.registration.backoff_factor >= 1.0) {
            return Err(ConfigError::InvalidBackoff);
        }
        if !(self.statistics.cc_per_cubic_mm > 0.0) {
            return Err(ConfigError::InvalidUnitFactor);
        }
        Ok(())
    }
}
