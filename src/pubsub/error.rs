//! Broker error types

/// Error type for broker operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubsubError {
    /// The topic or pattern already holds the maximum number of sinks
    CapacityExceeded(String),
}

impl std::fmt::Display for PubsubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PubsubError::CapacityExceeded(key) => {
                write!(f, "Subscription limit reached for: {}", key)
            }
        }
    }
}

impl std::error::Error for PubsubError {}
