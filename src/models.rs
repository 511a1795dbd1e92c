//! Data types and associated functions and methods

use serde::{Deserialize, Serialize};
use serde_json::Number;
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::error::ReductionError;
use crate::operation::Element;

/// Supported numerical data types
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

impl DType {
    /// Returns the size of the associated type in bytes.
    pub fn size_of(self) -> usize {
        match self {
            Self::Int32 => std::mem::size_of::<i32>(),
            Self::Int64 => std::mem::size_of::<i64>(),
            Self::Uint32 => std::mem::size_of::<u32>(),
            Self::Uint64 => std::mem::size_of::<u64>(),
            Self::Float32 => std::mem::size_of::<f32>(),
            Self::Float64 => std::mem::size_of::<f64>(),
        }
    }
}

/// Shape and element type of a stored array.
///
/// The descriptor is caller-provided and read-only for the duration of a run. All dimensions
/// must be positive.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ArrayDescriptor {
    /// Number of rows
    #[validate(range(min = 1, message = "row count must be greater than 0"))]
    pub rows: usize,
    /// Number of columns
    #[validate(range(min = 1, message = "column count must be greater than 0"))]
    pub cols: usize,
    /// Number of layers reduced over
    #[validate(range(min = 1, message = "layer count must be greater than 0"))]
    pub layers: usize,
    /// Element data type
    pub dtype: DType,
}

impl ArrayDescriptor {
    /// Return a new ArrayDescriptor.
    pub fn new(rows: usize, cols: usize, layers: usize, dtype: DType) -> Self {
        ArrayDescriptor {
            rows,
            cols,
            layers,
            dtype,
        }
    }

    /// In-memory footprint in bytes of a single row across all layers.
    pub fn bytes_per_row(&self) -> usize {
        self.cols * self.layers * self.dtype.size_of()
    }

    /// Validate the descriptor, rejecting non-positive dimensions before any I/O.
    pub fn validated(self) -> Result<Self, ReductionError> {
        self.validate().map_err(ReductionError::InvalidDescriptor)?;
        Ok(self)
    }
}

/// Supported reductions over the layer dimension
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionKind {
    /// Sum of non-missing values
    Sum,
    /// Arithmetic mean of non-missing values
    Mean,
    /// Number of non-missing values
    Count,
    /// Minimum of non-missing values
    Min,
    /// Maximum of non-missing values
    Max,
}

impl ReductionKind {
    /// Default number of simultaneous in-memory block copies the reduction requires.
    ///
    /// These are starting points, not a law; the right multiplier for a given store and
    /// workload is an empirical question and callers may override it in the budget.
    pub fn default_copies(self) -> usize {
        match self {
            Self::Sum | Self::Count | Self::Min | Self::Max => 1,
            Self::Mean => 2,
        }
    }
}

/// Description of missing data to exclude from reductions.
///
/// Gridded data marks absent cells with fill sentinels, a valid range, or both at once, so
/// the policy is a combination rather than a choice: a value is missing if it equals any
/// sentinel or falls outside the valid bounds. An untyped policy (T = [Number]) arrives with
/// the request; [MissingPolicy::resolve] converts it to the element type before any block is
/// read.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct MissingPolicy<T> {
    /// Values treated as missing
    #[serde(default)]
    pub sentinels: Vec<T>,
    /// Smallest valid value; anything below it is missing
    pub valid_min: Option<T>,
    /// Largest valid value; anything above it is missing
    pub valid_max: Option<T>,
}

impl<T> MissingPolicy<T> {
    /// Policy excluding a single sentinel value.
    pub fn value(sentinel: T) -> Self {
        Self::values(vec![sentinel])
    }

    /// Policy excluding a set of sentinel values.
    pub fn values(sentinels: Vec<T>) -> Self {
        MissingPolicy {
            sentinels,
            valid_min: None,
            valid_max: None,
        }
    }

    /// Policy excluding values below `min`.
    pub fn valid_min(min: T) -> Self {
        MissingPolicy {
            sentinels: Vec::new(),
            valid_min: Some(min),
            valid_max: None,
        }
    }

    /// Policy excluding values above `max`.
    pub fn valid_max(max: T) -> Self {
        MissingPolicy {
            sentinels: Vec::new(),
            valid_min: None,
            valid_max: Some(max),
        }
    }

    /// Policy excluding values outside `[min, max]`.
    pub fn valid_range(min: T, max: T) -> Self {
        MissingPolicy {
            sentinels: Vec::new(),
            valid_min: Some(min),
            valid_max: Some(max),
        }
    }

    /// Additionally exclude `sentinel`.
    pub fn with_sentinel(mut self, sentinel: T) -> Self {
        self.sentinels.push(sentinel);
        self
    }

    /// Whether the policy excludes no values at all.
    pub fn is_empty(&self) -> bool {
        self.sentinels.is_empty() && self.valid_min.is_none() && self.valid_max.is_none()
    }
}

impl<T: PartialOrd> MissingPolicy<T> {
    /// Whether the value is excluded from reductions.
    pub fn is_missing(&self, x: &T) -> bool {
        if self.sentinels.contains(x) {
            return true;
        }
        if let Some(min) = &self.valid_min {
            if x < min {
                return true;
            }
        }
        if let Some(max) = &self.valid_max {
            if x > max {
                return true;
            }
        }
        false
    }
}

impl MissingPolicy<Number> {
    /// Convert the untyped policy to the element type.
    ///
    /// Rejects sentinels and bounds the type cannot represent, and inverted or empty valid
    /// ranges. Runs before any block I/O.
    pub fn resolve<T: Element>(&self) -> Result<MissingPolicy<T>, ReductionError> {
        let sentinels = self
            .sentinels
            .iter()
            .map(T::from_request_value)
            .collect::<Result<Vec<T>, _>>()?;
        let valid_min = self
            .valid_min
            .as_ref()
            .map(T::from_request_value)
            .transpose()?;
        let valid_max = self
            .valid_max
            .as_ref()
            .map(T::from_request_value)
            .transpose()?;
        if let (Some(min), Some(max)) = (&valid_min, &valid_max) {
            if min >= max {
                return Err(ReductionError::InvalidValidRange);
            }
        }
        Ok(MissingPolicy {
            sentinels,
            valid_min,
            valid_max,
        })
    }
}

/// Request data for a reduction run
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_request"))]
pub struct ReduceRequest {
    /// Which reduction to apply
    pub kind: ReductionKind,
    /// Missing data to exclude from the reduction
    pub missing: Option<MissingPolicy<Number>>,
    /// Value written to output cells with no non-missing layers
    pub fill: Option<Number>,
}

impl ReduceRequest {
    /// Return a new ReduceRequest with no missing data.
    pub fn new(kind: ReductionKind) -> Self {
        ReduceRequest {
            kind,
            missing: None,
            fill: None,
        }
    }

    /// Return a new ReduceRequest excluding the policy's values and writing `fill` to
    /// all-missing output cells.
    pub fn with_missing(kind: ReductionKind, missing: MissingPolicy<Number>, fill: Number) -> Self {
        ReduceRequest {
            kind,
            missing: Some(missing),
            fill: Some(fill),
        }
    }

    /// Validate the request against the data type it will be applied to.
    pub fn validate_for(&self, dtype: DType) -> Result<(), ReductionError> {
        self.validate().map_err(ReductionError::InvalidRequest)?;
        if let Some(missing) = &self.missing {
            check_policy(missing, dtype)?;
        }
        if let Some(fill) = &self.fill {
            check_value(fill, dtype)?;
        }
        Ok(())
    }
}

/// Check that an untyped policy resolves in the given data type.
fn check_policy(policy: &MissingPolicy<Number>, dtype: DType) -> Result<(), ReductionError> {
    match dtype {
        DType::Int32 => policy.resolve::<i32>().map(|_| ()),
        DType::Int64 => policy.resolve::<i64>().map(|_| ()),
        DType::Uint32 => policy.resolve::<u32>().map(|_| ()),
        DType::Uint64 => policy.resolve::<u64>().map(|_| ()),
        DType::Float32 => policy.resolve::<f32>().map(|_| ()),
        DType::Float64 => policy.resolve::<f64>().map(|_| ()),
    }
}

/// Check that an untyped request value is representable in the given data type.
fn check_value(value: &Number, dtype: DType) -> Result<(), ReductionError> {
    match dtype {
        DType::Int32 => i32::from_request_value(value).map(|_| ()),
        DType::Int64 => i64::from_request_value(value).map(|_| ()),
        DType::Uint32 => u32::from_request_value(value).map(|_| ()),
        DType::Uint64 => u64::from_request_value(value).map(|_| ()),
        DType::Float32 => f32::from_request_value(value).map(|_| ()),
        DType::Float64 => f64::from_request_value(value).map(|_| ()),
    }
}

/// Validate a reduction request
fn validate_request(request: &ReduceRequest) -> Result<(), ValidationError> {
    if let Some(missing) = &request.missing {
        if missing.is_empty() {
            return Err(ValidationError::new("Missing data policy excludes no values"));
        }
        if request.fill.is_none() {
            return Err(ValidationError::new(
                "Missing data requires a fill value for the output",
            ));
        }
    }
    Ok(())
}

/// Counters describing a completed run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReduceSummary {
    /// Number of blocks processed
    pub blocks: usize,
    /// Number of rows processed
    pub rows: usize,
    /// Number of output cells that received the fill value
    pub filled: u64,
}
