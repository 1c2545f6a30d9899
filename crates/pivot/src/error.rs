//! Error types for relation reconciliation
//!
//! Configuration problems are reported when a binding is defined; everything
//! else comes from the storage collaborator while loading or applying changes.

/// Result type alias for pivot operations
pub type PivotResult<T> = Result<T, PivotError>;

/// Error types for pivot reconciliation
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PivotError {
    /// A relation definition is incomplete or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reading or writing association rows failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The owner has no primary key but association rows must be written
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,

    /// Beginning, committing or rolling back a transaction failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored or supplied value is not usable as a scalar key
    #[error("Invalid key error: {0}")]
    InvalidKey(String),

    /// Relation definitions could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pool or connection URL problem
    #[error("Connection error: {0}")]
    Connection(String),
}

impl PivotError {
    /// Shorthand for a configuration error about a missing field
    pub fn missing(field: &str) -> Self {
        PivotError::Configuration(format!("`{}` is required", field))
    }

    /// Check whether this error came from the storage collaborator
    pub fn is_persistence(&self) -> bool {
        matches!(self, PivotError::Persistence(_) | PivotError::Transaction(_))
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for PivotError {
    fn from(err: sqlx::Error) -> Self {
        PivotError::Persistence(err.to_string())
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for PivotError {
    fn from(err: serde_json::Error) -> Self {
        PivotError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PivotError::missing("table");
        assert_eq!(err.to_string(), "Configuration error: `table` is required");

        let err = PivotError::Persistence("duplicate key".to_string());
        assert_eq!(err.to_string(), "Persistence error: duplicate key");
    }

    #[test]
    fn test_persistence_classification() {
        assert!(PivotError::Persistence("x".to_string()).is_persistence());
        assert!(PivotError::Transaction("x".to_string()).is_persistence());
        assert!(!PivotError::Configuration("x".to_string()).is_persistence());
        assert!(!PivotError::InvalidKey("x".to_string()).is_persistence());
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PivotError = parse_err.into();
        assert!(matches!(err, PivotError::Serialization(_)));
    }
}
