use thiserror::Error;

/// Top-level error type for the chat archive.
///
/// Subsystem crates either return this type directly or define their own
/// error and implement `From<SubsystemError> for VaultError` so that `?`
/// works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VaultError {
    /// A lookup by identity failed, either in a working set index or in the
    /// store. Never retried.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// An entity was added to a working set under an id that is already
    /// taken by another entity of the same kind.
    #[error("duplicate {entity} id: {id}")]
    Duplicate { entity: &'static str, id: i64 },

    /// Insert, query or transaction failure in the relational store.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A deferred media copy/move/delete failed. Only ever logged.
    #[error("Media action failed: {0}")]
    MediaAction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        VaultError::NotFound { entity, id }
    }

    pub fn duplicate(entity: &'static str, id: i64) -> Self {
        VaultError::Duplicate { entity, id }
    }

    /// True for the `NotFound` family, which callers treat as a producer
    /// invariant violation rather than an I/O problem.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound { .. })
    }
}

impl From<toml::de::Error> for VaultError {
    fn from(err: toml::de::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VaultError {
    fn from(err: toml::ser::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for archive operations.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_not_found_display() {
        let err = VaultError::not_found("user", 42);
        assert_eq!(err.to_string(), "user not found: 42");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_duplicate_display() {
        let err = VaultError::duplicate("media", 3);
        assert_eq!(err.to_string(), "duplicate media id: 3");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(VaultError, &str)> = vec![
            (
                VaultError::MediaAction("copy a.jpg".to_string()),
                "Media action failed: copy a.jpg",
            ),
            (
                VaultError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                VaultError::Parse("no format".to_string()),
                "Parse error: no format",
            ),
            (
                VaultError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
            assert!(!error.is_not_found());
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VaultError = io_err.into();
        assert!(matches!(err, VaultError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let vault_err: VaultError = err.unwrap_err().into();
        assert!(matches!(vault_err, VaultError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let vault_err: VaultError = err.unwrap_err().into();
        assert!(matches!(vault_err, VaultError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
