//! This crate provides an out-of-core reduction engine for numeric array data. It computes
//! cell-wise statistical reductions (sum, mean, count, min, max) across the layer dimension of
//! arrays that are too large to fit in memory, by partitioning the rows into blocks sized to a
//! caller-supplied memory budget and streaming one block at a time through a
//! read-reduce-write pipeline. The reduced output is identical regardless of the block size
//! chosen, so the budget is purely a performance knob.
//!
//! The engine is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation.
//! * [Serde](serde) performs (de)serialisation of reduction request data.
//! * [zerocopy] converts between raw bytes and typed array elements in the file-backed store.
//! * [tokio-rayon](tokio_rayon) offloads CPU-bound folds to a worker pool without blocking the
//!   runtime.

pub mod array;
pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod models;
pub mod operation;
pub mod operations;
pub mod planner;
pub mod reducer;
pub mod resource_manager;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
