//! Array store contract.
//!
//! Stores provide row-range access to on-disk array data. The engine is deliberately ignorant
//! of file formats: a store exposes its descriptor and reads or writes blocks of whole rows.
//! Format concerns (headers, compression, byte order) belong to store implementations.

use async_trait::async_trait;
use ndarray::{Array2, Array3};

use crate::models::ArrayDescriptor;
use crate::operation::Element;
use crate::planner::BlockRange;

/// Read side of a store: yields rows x cols x layers input blocks.
///
/// Reads of disjoint row ranges may be issued concurrently.
#[async_trait]
pub trait ArraySource<T: Element>: Send + Sync {
    /// Descriptor for the stored array.
    fn descriptor(&self) -> ArrayDescriptor;

    /// Read the rows covered by `range`.
    ///
    /// Returns a block shaped `range.row_count` x cols x layers. Errors are not retried by the
    /// engine; a failed read aborts the run.
    async fn read_rows(&self, range: BlockRange) -> std::io::Result<Array3<T>>;
}

/// Write side of a store: accepts rows x cols reduced blocks.
///
/// Writes to disjoint row ranges may be issued concurrently; implementations must serialise
/// or safely interleave them. A failed write aborts the run and leaves the store's contents
/// undefined.
#[async_trait]
pub trait ArraySink<T: Element>: Send + Sync {
    /// Write a reduced block at the given start row.
    async fn write_rows(&self, start_row: usize, block: Array2<T>) -> std::io::Result<()>;
}
