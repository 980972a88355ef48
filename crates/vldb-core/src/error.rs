use thiserror::Error;

/// Problems with how a database is being opened or configured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("dimension required for new database")]
    MissingDimension,
    #[error("unsupported distance metric: {0} (expected one of l2, cosine, dot)")]
    UnsupportedMetric(String),
    #[error("unsupported distance metric code: {0}")]
    UnsupportedMetricCode(u8),
    #[error("dimension {0} does not fit the file header")]
    DimensionTooLarge(usize),
}

/// Rejected caller input. Always raised before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vector must be an array of numbers, got {0}")]
    NotAVector(&'static str),
    #[error("vector must contain only numeric values, found {found} at index {index}")]
    NonNumeric { index: usize, found: &'static str },
    #[error("id cannot be empty")]
    EmptyId,
    #[error("metadata must be an object, got {0}")]
    InvalidMetadata(&'static str),
    #[error("top_k must be positive, got {0}")]
    InvalidTopK(usize),
}
