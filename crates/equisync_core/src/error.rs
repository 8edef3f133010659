//! Error types for the equisync core.

use crate::config::ConfigError;
use crate::schema::AttributeType;
use crate::tree::NodeId;
use equisync_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the synchronization core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The backing store failed during a batch.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A row column could not be coerced to its attribute type.
    #[error("cannot convert column {column} to {expected}: found {found}")]
    RowConversion {
        /// Column name.
        column: String,
        /// Attribute type the column maps to.
        expected: AttributeType,
        /// Description of the offending value.
        found: String,
    },

    /// A required column is absent from a row.
    #[error("missing column {0}")]
    MissingColumn(&'static str),

    /// An attribute name outside the fixed schema.
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    /// An update carried a value of the wrong type for its key.
    #[error("type mismatch for attribute {key}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Attribute key.
        key: String,
        /// Schema type.
        expected: AttributeType,
        /// Supplied type.
        found: AttributeType,
    },

    /// A node id is already registered in the address space.
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    /// A node id outside the namespace this manager owns.
    #[error("node {0} is outside the owned namespace")]
    ForeignNamespace(NodeId),

    /// An attribute fixed at creation was targeted by an update.
    #[error("attribute {0} cannot change after creation")]
    ImmutableAttribute(String),

    /// A node the operation depends on is not registered.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Startup could not complete.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The address space was already created.
    #[error("address space already created")]
    AlreadyInitialized,

    /// The refresh worker thread could not be started.
    #[error("failed to start refresh worker: {0}")]
    Worker(#[from] std::io::Error),
}

impl CoreError {
    /// Returns true if a refresh batch may contain this error and carry on.
    ///
    /// Store and row errors are recovered locally; configuration and
    /// startup errors must stop the process from serving.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Store(_)
                | CoreError::RowConversion { .. }
                | CoreError::MissingColumn(_)
                | CoreError::TypeMismatch { .. }
                | CoreError::ImmutableAttribute(_)
        )
    }
}

/// Result type for lookup and validation.
pub type LookupResult<T> = Result<T, LookupError>;

/// Negative outcomes of node resolution, validation and reads.
///
/// These are ordinary answers to client requests, not faults.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// No node with this id is owned by this manager.
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// The handle does not refer to a live node.
    #[error("invalid node handle")]
    Invalid,

    /// The node exists but carries no value.
    #[error("node {0} has no value")]
    NotReadable(NodeId),
}
