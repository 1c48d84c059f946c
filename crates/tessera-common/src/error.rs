//! Error types for Tessera.

use thiserror::Error;

/// Result type alias using TesseraError.
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Errors that can occur in Tessera operations.
#[derive(Debug, Error)]
pub enum TesseraError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u32 },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u32, reason: String },

    #[error("Page full, unable to store row")]
    PageFull,

    #[error("Row decode failed at {row}: {reason}")]
    RowDecode { row: String, reason: String },

    // Index errors
    #[error("Index node full")]
    NodeFull,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Index validation failed: {0}")]
    ValidationFailed(String),

    // Constraint errors
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Batch failed after {succeeded} rows: {source}")]
    BatchFailed {
        succeeded: usize,
        #[source]
        source: Box<TesseraError>,
    },

    // Caller contract errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("No more elements")]
    NoSuchElement,

    // Catalog errors
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    /// Returns true for page parse or linkage faults surfaced as runtime I/O errors.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TesseraError::Io(_)
                | TesseraError::PageNotFound { .. }
                | TesseraError::PageCorrupted { .. }
                | TesseraError::RowDecode { .. }
        )
    }

    /// Returns true if this error (or the cause of a failed batch) is a
    /// constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            TesseraError::ConstraintViolation(_) => true,
            TesseraError::BatchFailed { source, .. } => source.is_constraint_violation(),
            _ => false,
        }
    }

    /// Shorthand for a corrupted page error.
    pub fn corrupted(page_id: u32, reason: impl Into<String>) -> Self {
        TesseraError::PageCorrupted {
            page_id,
            reason: reason.into(),
        }
    }
}
