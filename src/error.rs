//! Error handling.

use serde_json::Number;
use thiserror::Error;
use tokio::sync::AcquireError;

use crate::models::DType;

/// Reduction engine error type
///
/// This type encapsulates the various errors that may occur during planning and execution.
/// Each variant is distinguishable so that callers can decide whether a failed run is worth
/// retrying with different parameters.
#[derive(Debug, Error)]
pub enum ReductionError {
    /// Array descriptor failed validation
    #[error("array descriptor is not valid")]
    InvalidDescriptor(#[source] validator::ValidationErrors),

    /// Reduction request failed validation
    #[error("reduction request is not valid")]
    InvalidRequest(#[source] validator::ValidationErrors),

    /// Memory budget does not resolve to a positive byte ceiling
    #[error("memory budget must resolve to a positive byte ceiling")]
    InvalidBudget,

    /// Error parsing a human-readable byte ceiling
    #[error("failed to parse byte ceiling")]
    BudgetParse(#[from] byte_unit::ParseError),

    /// Incompatible missing or fill value for the data type
    #[error("incompatible value {0} for data type")]
    IncompatibleValue(Number),

    /// Valid-range bounds are inverted or empty
    #[error("missing data valid range min must be less than max")]
    InvalidValidRange,

    /// A cell with no non-missing layers was produced without a fill value to write
    #[error("a cell with no non-missing layers requires a fill value for the output")]
    FillValueRequired,

    /// Per-cell count does not fit in the output data type
    #[error("per-cell count {count} is not representable in the output data type")]
    CountUnrepresentable { count: i64 },

    /// Descriptor data type does not match the store's element type
    #[error("descriptor data type {expected} does not match element type {type_name}")]
    DTypeMismatch {
        expected: DType,
        type_name: &'static str,
    },

    /// Block plan and array disagree on the number of rows
    #[error("block plan covers {plan_rows} rows but the array has {array_rows}")]
    PlanMismatch { plan_rows: usize, array_rows: usize },

    /// Error opening an array store
    #[error("failed to open array store")]
    StoreOpen(#[source] std::io::Error),

    /// Error reading a block from the input store
    #[error("failed to read {row_count} rows at row {start_row}")]
    StoreRead {
        start_row: usize,
        row_count: usize,
        #[source]
        source: std::io::Error,
    },

    /// Error writing a block to the output store
    #[error("failed to write {row_count} rows at row {start_row}")]
    StoreWrite {
        start_row: usize,
        row_count: usize,
        #[source]
        source: std::io::Error,
    },

    /// Insufficient memory to process a block
    #[error("insufficient memory to process block ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquire(#[from] AcquireError),

    /// Run was cancelled between blocks
    #[error("reduction cancelled")]
    Cancelled,

    /// Error converting from bytes to a type
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// Error creating an ndarray array from a shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ndarray::ShapeError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    /// A worker task panicked or was aborted
    #[error("worker task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl ReductionError {
    /// Whether the error indicates an I/O failure on a specific block.
    ///
    /// When this returns true the output store's contents are undefined and must be discarded.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ReductionError::StoreRead { .. } | ReductionError::StoreWrite { .. }
        )
    }
}
