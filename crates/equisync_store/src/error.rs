//! Error types for record store operations.

use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while querying the backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unreachable: {0}")]
    Connectivity(String),

    /// The store was reached but the query failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::connectivity("connection refused");
        assert_eq!(err.to_string(), "store unreachable: connection refused");

        assert_eq!(StoreError::Closed.to_string(), "store is closed");
    }
}
