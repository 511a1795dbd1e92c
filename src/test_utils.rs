use std::io;

use async_trait::async_trait;
use ndarray::{Array2, Array3};

use serde_json::Number;

use crate::memory_store::{MemoryArraySink, MemoryArraySource};
use crate::models::{ArrayDescriptor, MissingPolicy, ReduceRequest, ReductionKind};
use crate::planner::BlockRange;
use crate::store::{ArraySink, ArraySource};

/// Sentinel marking missing cells in the f64 fixtures.
pub(crate) const MISSING: f64 = -9999.0;

/// 10x4x3 fixture: cell (r, c) holds layers [base, base + 1, base + 2] with base = 4r + c,
/// except cell (0, 0) which holds [2.0, missing, 4.0] and cell (1, 1) which is missing in
/// every layer.
pub(crate) fn layered_f64() -> Array3<f64> {
    let mut data = Array3::from_shape_fn((10, 4, 3), |(r, c, l)| (4 * r + c + l) as f64);
    data[[0, 0, 0]] = 2.0;
    data[[0, 0, 1]] = MISSING;
    data[[0, 0, 2]] = 4.0;
    for l in 0..3 {
        data[[1, 1, l]] = MISSING;
    }
    data
}

/// A request over the f64 fixtures: excludes the sentinel and writes it back as the fill value.
pub(crate) fn f64_request(kind: ReductionKind) -> ReduceRequest {
    let sentinel = Number::from_f64(MISSING).unwrap();
    ReduceRequest::with_missing(kind, MissingPolicy::value(sentinel.clone()), sentinel)
}

/// Source that fails with an I/O error when asked for the block starting at `fail_at`.
pub(crate) struct FailingSource {
    inner: MemoryArraySource<f64>,
    fail_at: usize,
}

impl FailingSource {
    pub(crate) fn new(data: Array3<f64>, fail_at: usize) -> Self {
        FailingSource {
            inner: MemoryArraySource::new(data).unwrap(),
            fail_at,
        }
    }
}

#[async_trait]
impl ArraySource<f64> for FailingSource {
    fn descriptor(&self) -> ArrayDescriptor {
        self.inner.descriptor()
    }

    async fn read_rows(&self, range: BlockRange) -> io::Result<Array3<f64>> {
        if range.start_row == self.fail_at {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected read failure",
            ));
        }
        self.inner.read_rows(range).await
    }
}

/// Sink that fails with an I/O error when given the block starting at `fail_at`.
pub(crate) struct FailingSink {
    inner: MemoryArraySink<f64>,
    fail_at: usize,
}

impl FailingSink {
    pub(crate) fn new(rows: usize, cols: usize, fail_at: usize) -> Self {
        FailingSink {
            inner: MemoryArraySink::new(rows, cols),
            fail_at,
        }
    }
}

#[async_trait]
impl ArraySink<f64> for FailingSink {
    async fn write_rows(&self, start_row: usize, block: Array2<f64>) -> io::Result<()> {
        if start_row == self.fail_at {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            ));
        }
        self.inner.write_rows(start_row, block).await
    }
}
