use thiserror::Error;

/// Core error type for roster operations.
///
/// Errors are `Clone` so the latest heartbeat failure can be handed out to
/// any number of health readers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("Directory error: {0}")]
    Directory(String),

    #[error("cluster membership is shutting down")]
    ShuttingDown,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RosterError {
    /// Whether this error came from a directory call.
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }
}

impl From<serde_json::Error> for RosterError {
    fn from(e: serde_json::Error) -> Self {
        RosterError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for RosterError {
    fn from(e: reqwest::Error) -> Self {
        RosterError::Directory(e.to_string())
    }
}

/// Result type alias using RosterError.
pub type Result<T> = std::result::Result<T, RosterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RosterError::Directory("connection refused".to_string());
        assert_eq!(err.to_string(), "Directory error: connection refused");
        assert!(err.is_directory());
        assert!(!RosterError::ShuttingDown.is_directory());
    }

    #[test]
    fn test_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: RosterError = parse.unwrap_err().into();
        assert!(matches!(err, RosterError::Serialization(_)));
    }
}
