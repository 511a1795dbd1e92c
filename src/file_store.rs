//! File-backed array store over raw native-endian row-major binary data.
//!
//! The file holds bare elements with no header; the descriptor travels separately (sidecar
//! metadata is the caller's concern). Reads and writes use positional I/O, so disjoint row
//! ranges can be accessed concurrently through a shared file handle.

use std::fs::{File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use num_traits::Zero;
// Bring trait into scope to use as_bytes_mut method.
use zerocopy::AsBytes;

use crate::array;
use crate::error::ReductionError;
use crate::models::{ArrayDescriptor, DType};
use crate::operation::Element;
use crate::planner::BlockRange;
use crate::store::{ArraySink, ArraySource};

/// Check that the descriptor's data type matches the element type parameter.
fn check_dtype<T: Element>(dtype: DType) -> Result<(), ReductionError> {
    if T::DTYPE != dtype {
        return Err(ReductionError::DTypeMismatch {
            expected: dtype,
            type_name: std::any::type_name::<T>(),
        });
    }
    Ok(())
}

/// Convert a blocking-task join failure into an I/O error.
fn join_error(err: tokio::task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

/// Read-only source over a raw binary file.
#[derive(Debug)]
pub struct FileArraySource<T> {
    file: Arc<File>,
    descriptor: ArrayDescriptor,
    _marker: PhantomData<T>,
}

impl<T: Element> FileArraySource<T> {
    /// Open a raw binary file holding the described array.
    ///
    /// Fails if the descriptor is invalid, its data type does not match `T`, or the file is
    /// shorter than the descriptor requires.
    pub fn open(path: impl AsRef<Path>, descriptor: ArrayDescriptor) -> Result<Self, ReductionError> {
        let descriptor = descriptor.validated()?;
        check_dtype::<T>(descriptor.dtype)?;
        let file = File::open(path).map_err(ReductionError::StoreOpen)?;
        let expected = (descriptor.rows * descriptor.bytes_per_row()) as u64;
        let actual = file
            .metadata()
            .map_err(ReductionError::StoreOpen)?
            .len();
        if actual < expected {
            return Err(ReductionError::StoreOpen(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file holds {actual} bytes, descriptor requires {expected}"),
            )));
        }
        Ok(FileArraySource {
            file: Arc::new(file),
            descriptor,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<T: Element> ArraySource<T> for FileArraySource<T> {
    fn descriptor(&self) -> ArrayDescriptor {
        self.descriptor
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn read_rows(&self, range: BlockRange) -> io::Result<Array3<T>> {
        if range.end_row() > self.descriptor.rows || range.row_count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "row range [{}, {}) outside array of {} rows",
                    range.start_row,
                    range.end_row(),
                    self.descriptor.rows
                ),
            ));
        }
        let file = Arc::clone(&self.file);
        let cols = self.descriptor.cols;
        let layers = self.descriptor.layers;
        let offset = (range.start_row * self.descriptor.bytes_per_row()) as u64;
        let elements = tokio::task::spawn_blocking(move || {
            // Read into a typed buffer so the element alignment is correct.
            let mut elements = vec![T::zero(); range.row_count * cols * layers];
            file.read_exact_at(elements.as_mut_slice().as_bytes_mut(), offset)?;
            Ok::<_, io::Error>(elements)
        })
        .await
        .map_err(join_error)??;
        Array3::from_shape_vec((range.row_count, cols, layers), elements)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

/// Write-only sink over a raw binary file.
#[derive(Debug)]
pub struct FileArraySink<T> {
    file: Arc<File>,
    rows: usize,
    cols: usize,
    _marker: PhantomData<T>,
}

impl<T: Element> FileArraySink<T> {
    /// Create (or truncate) a raw binary file sized for a rows x cols output array.
    pub fn create(path: impl AsRef<Path>, rows: usize, cols: usize) -> Result<Self, ReductionError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(ReductionError::StoreOpen)?;
        file.set_len((rows * cols * std::mem::size_of::<T>()) as u64)
            .map_err(ReductionError::StoreOpen)?;
        Ok(FileArraySink {
            file: Arc::new(file),
            rows,
            cols,
            _marker: PhantomData,
        })
    }
}

#[async_trait]
impl<T: Element> ArraySink<T> for FileArraySink<T> {
    #[tracing::instrument(level = "DEBUG", skip(self, block))]
    async fn write_rows(&self, start_row: usize, block: Array2<T>) -> io::Result<()> {
        let (row_count, cols) = block.dim();
        if start_row + row_count > self.rows {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "row range [{start_row}, {}) outside array of {} rows",
                    start_row + row_count,
                    self.rows
                ),
            ));
        }
        if cols != self.cols {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block has {cols} columns, store has {}", self.cols),
            ));
        }
        let file = Arc::clone(&self.file);
        let offset = (start_row * self.cols * std::mem::size_of::<T>()) as u64;
        let data = array::block_to_bytes(&block);
        tokio::task::spawn_blocking(move || file.write_all_at(&data, offset))
            .await
            .map_err(join_error)?
    }
}
