use thiserror::Error;

/// Top-level error type for the chipwarm system.
///
/// Domain crates define their own error types (`SessionError`,
/// `SimulationError`) that wrap this one for storage and configuration
/// failures, so the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChipwarmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl From<toml::de::Error> for ChipwarmError {
    fn from(err: toml::de::Error) -> Self {
        ChipwarmError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ChipwarmError {
    fn from(err: toml::ser::Error) -> Self {
        ChipwarmError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ChipwarmError {
    fn from(err: serde_json::Error) -> Self {
        ChipwarmError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for chipwarm operations.
pub type Result<T> = std::result::Result<T, ChipwarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChipwarmError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(ChipwarmError, &str)> = vec![
            (
                ChipwarmError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                ChipwarmError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                ChipwarmError::Api("bind failed".to_string()),
                "API error: bind failed",
            ),
            (
                ChipwarmError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
            (ChipwarmError::ShuttingDown, "Shutdown in progress"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ChipwarmError = io_err.into();
        assert!(matches!(err, ChipwarmError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let bad_toml = "invalid = [[[";
        let err: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let err: ChipwarmError = err.unwrap_err().into();
        assert!(matches!(err, ChipwarmError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: ChipwarmError = err.unwrap_err().into();
        assert!(matches!(err, ChipwarmError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
