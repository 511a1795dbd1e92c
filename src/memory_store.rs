//! In-memory array store.
//!
//! The reference implementation of the store contract, also used by tests and benchmarks.

use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use ndarray::{s, Array2, Array3};

use crate::array;
use crate::error::ReductionError;
use crate::models::ArrayDescriptor;
use crate::operation::Element;
use crate::planner::BlockRange;
use crate::store::{ArraySink, ArraySource};

/// Return an InvalidInput error for a row range outside the store.
fn out_of_range(start_row: usize, row_count: usize, rows: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("row range [{start_row}, {}) outside array of {rows} rows", start_row + row_count),
    )
}

/// Read-only in-memory source over an owned rows x cols x layers array.
#[derive(Debug)]
pub struct MemoryArraySource<T> {
    descriptor: ArrayDescriptor,
    data: Array3<T>,
}

impl<T: Element> MemoryArraySource<T> {
    /// Return a new MemoryArraySource over the given array.
    pub fn new(data: Array3<T>) -> Result<Self, ReductionError> {
        let (rows, cols, layers) = data.dim();
        let descriptor = ArrayDescriptor::new(rows, cols, layers, T::DTYPE).validated()?;
        Ok(MemoryArraySource { descriptor, data })
    }

    /// Return a new MemoryArraySource decoded from row-major bytes.
    pub fn from_bytes(data: &Bytes, descriptor: ArrayDescriptor) -> Result<Self, ReductionError> {
        let descriptor = descriptor.validated()?;
        let block = array::build_block::<T>(
            data,
            BlockRange::new(0, descriptor.rows),
            descriptor.cols,
            descriptor.layers,
        )?;
        Self::new(block)
    }
}

#[async_trait]
impl<T: Element> ArraySource<T> for MemoryArraySource<T> {
    fn descriptor(&self) -> ArrayDescriptor {
        self.descriptor
    }

    async fn read_rows(&self, range: BlockRange) -> io::Result<Array3<T>> {
        if range.end_row() > self.descriptor.rows || range.row_count == 0 {
            return Err(out_of_range(
                range.start_row,
                range.row_count,
                self.descriptor.rows,
            ));
        }
        Ok(self
            .data
            .slice(s![range.start_row..range.end_row(), .., ..])
            .to_owned())
    }
}

/// In-memory sink collecting reduced rows x cols blocks.
#[derive(Debug)]
pub struct MemoryArraySink<T> {
    rows: usize,
    cols: usize,
    data: Mutex<Array2<T>>,
}

impl<T: Element> MemoryArraySink<T> {
    /// Return a new zero-filled MemoryArraySink with the given output shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        MemoryArraySink {
            rows,
            cols,
            data: Mutex::new(Array2::zeros((rows, cols))),
        }
    }

    /// Consume the sink and return the collected output.
    pub fn into_array(self) -> Array2<T> {
        self.data.into_inner().unwrap_or_else(|err| err.into_inner())
    }
}

#[async_trait]
impl<T: Element> ArraySink<T> for MemoryArraySink<T> {
    async fn write_rows(&self, start_row: usize, block: Array2<T>) -> io::Result<()> {
        let (row_count, cols) = block.dim();
        if start_row + row_count > self.rows {
            return Err(out_of_range(start_row, row_count, self.rows));
        }
        if cols != self.cols {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block has {cols} columns, store has {}", self.cols),
            ));
        }
        let mut data = self
            .data
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "sink lock poisoned"))?;
        data.slice_mut(s![start_row..start_row + row_count, ..])
            .assign(&block);
        Ok(())
    }
}
