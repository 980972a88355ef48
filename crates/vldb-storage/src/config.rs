use serde::{Deserialize, Serialize};
use vldb_core::{ConfigError, Metric};

/// What to do when an existing file turns out to be truncated or garbled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Surface the corruption error.
    #[default]
    Strict,
    /// Start from an empty dataset. Wrong magic or version still fails.
    BestEffort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Atomic rename only.
    #[default]
    Buffered,
    /// Sync the new file to disk before renaming it into place.
    Fsync,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Required when the file does not exist yet; ignored otherwise.
    pub dimension: Option<usize>,
    /// Used only when creating; an existing file keeps its own metric.
    pub metric: Metric,
    pub recovery: RecoveryMode,
    pub durability: Durability,
}

impl StoreConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_metric_name(self, metric: &str) -> Result<Self, ConfigError> {
        Ok(self.with_metric(metric.parse()?))
    }

    pub fn with_recovery(mut self, recovery: RecoveryMode) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dim) = self.dimension {
            if u32::try_from(dim).is_err() {
                return Err(ConfigError::DimensionTooLarge(dim));
            }
        }
        Ok(())
    }

    pub(crate) fn require_dimension(&self) -> Result<usize, ConfigError> {
        self.dimension.ok_or(ConfigError::MissingDimension)
    }
}
