//! Error types for geodex operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while building or querying a geodex database.
#[derive(Debug, Error)]
pub enum GeodexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt index data: {context}")]
    Corrupt { context: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("index is closed")]
    Closed,
}

impl GeodexError {
    /// Build a `Corrupt` error carrying location context (file, offset,
    /// violated invariant).
    pub fn corrupt(context: impl Into<String>) -> Self {
        GeodexError::Corrupt {
            context: context.into(),
        }
    }

    /// True for structural-invariant violations that queries degrade on
    /// instead of propagating.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, GeodexError::Corrupt { .. })
    }
}

/// Result type for geodex operations
pub type GeodexResult<T> = Result<T, GeodexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_constructor() {
        let err = GeodexError::corrupt("child offset 99 past end of file");
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("child offset 99"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: GeodexError = io_err.into();
        assert!(!err.is_corrupt());
        assert!(matches!(err, GeodexError::Io(_)));
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(GeodexError::Closed.to_string(), "index is closed");
    }
}
