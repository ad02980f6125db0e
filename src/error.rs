// In: src/error.rs

//! This module defines the single, unified error type for the entire splay library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use thiserror::Error;

/// Boxed error produced by a consumer sink or a conversion function.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SplayError>;

#[derive(Error, Debug)]
pub enum SplayError {
    // =========================================================================
    // === Protocol & Argument Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    // =========================================================================
    // === Buffer Errors
    // =========================================================================
    /// The allocator handed back a buffer of a different capacity than requested.
    /// This is a bug in the allocator, never a user error.
    #[error("Allocation mismatch for {kind} column: requested capacity {requested}, got {actual}")]
    AllocationMismatch {
        kind: String,
        requested: usize,
        actual: usize,
    },

    #[error("Capacity exceeded: {kind} buffer is full at {capacity} values")]
    CapacityExceeded { kind: String, capacity: usize },

    #[error("Releasing buffers failed for {} of them: {}", failures.len(), failures.join("; "))]
    ReleaseFailed { failures: Vec<String> },

    // =========================================================================
    // === Collaborator Errors
    // =========================================================================
    #[error("Lock acquisition was interrupted")]
    Interrupted,

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Consumer sink rejected chunks: {source}")]
    Sink {
        #[source]
        source: BoxedError,
    },

    #[error("Unsupported data type for this operation: {0}")]
    UnsupportedType(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error from the Serde JSON library, typically while loading configuration.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`SplayError`], mirroring the protocol's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidArgument,
    IllegalState,
    AllocationMismatch,
    CapacityExceeded,
    Interrupted,
    Collaborator,
}

impl SplayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SplayError::InvalidArgument(_) | SplayError::InvalidConfiguration(_) => {
                ErrorCategory::InvalidArgument
            }
            SplayError::IllegalState(_) => ErrorCategory::IllegalState,
            SplayError::AllocationMismatch { .. } => ErrorCategory::AllocationMismatch,
            SplayError::CapacityExceeded { .. } => ErrorCategory::CapacityExceeded,
            SplayError::Interrupted => ErrorCategory::Interrupted,
            SplayError::ReleaseFailed { .. }
            | SplayError::Conversion(_)
            | SplayError::Sink { .. }
            | SplayError::UnsupportedType(_)
            | SplayError::Arrow(_)
            | SplayError::SerdeJson(_)
            | SplayError::Io(_) => ErrorCategory::Collaborator,
        }
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        SplayError::IllegalState(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        SplayError::InvalidArgument(msg.into())
    }

    /// Wraps an arbitrary consumer failure.
    pub fn sink<E>(err: E) -> Self
    where
        E: Into<BoxedError>,
    {
        SplayError::Sink { source: err.into() }
    }
}
