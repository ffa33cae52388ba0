#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("training data mismatch: {features} feature rows but {labels} labels")]
    TrainingDataMismatch { features: usize, labels: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to serialize model state: {0}")]
    StateSerialization(serde_json::Error),
    #[error("failed to deserialize model state: {0}")]
    StateDeserialization(serde_json::Error),
    #[error("unsupported model state format (expected {expected}, found {found})")]
    UnsupportedStateFormat { expected: u32, found: u32 },
}

pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;
