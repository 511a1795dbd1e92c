use ndarray::{Array2, ArrayView3};
use serde_json::Number;

use crate::error::ReductionError;
use crate::models::{DType, MissingPolicy};

/// Trait for array elements.
///
/// Implemented for the numeric types the engine supports. Each element type carries its
/// runtime [DType] tag, used by stores to reject mismatched descriptors, and its own
/// conversion from untyped request values (missing sentinels, bounds and fill values), so
/// range checking lives with the type that knows its range.
pub trait Element:
    Copy
    + PartialOrd
    + Send
    + Sync
    + 'static
    + num_traits::Bounded
    + num_traits::FromPrimitive
    + num_traits::Zero
    + std::fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::Div<Output = Self>
    + zerocopy::AsBytes
    + zerocopy::FromBytes
{
    /// Runtime data type tag for this element type.
    const DTYPE: DType;

    /// Convert an untyped request value into this element type, rejecting values outside its
    /// range.
    fn from_request_value(value: &Number) -> Result<Self, ReductionError>;
}

impl Element for i32 {
    const DTYPE: DType = DType::Int32;

    fn from_request_value(value: &Number) -> Result<Self, ReductionError> {
        value
            .as_i64()
            .and_then(|wide| Self::try_from(wide).ok())
            .ok_or_else(|| ReductionError::IncompatibleValue(value.clone()))
    }
}

impl Element for i64 {
    const DTYPE: DType = DType::Int64;

    fn from_request_value(value: &Number) -> Result<Self, ReductionError> {
        value
            .as_i64()
            .ok_or_else(|| ReductionError::IncompatibleValue(value.clone()))
    }
}

impl Element for u32 {
    const DTYPE: DType = DType::Uint32;

    fn from_request_value(value: &Number) -> Result<Self, ReductionError> {
        value
            .as_u64()
            .and_then(|wide| Self::try_from(wide).ok())
            .ok_or_else(|| ReductionError::IncompatibleValue(value.clone()))
    }
}

impl Element for u64 {
    const DTYPE: DType = DType::Uint64;

    fn from_request_value(value: &Number) -> Result<Self, ReductionError> {
        value
            .as_u64()
            .ok_or_else(|| ReductionError::IncompatibleValue(value.clone()))
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::Float32;

    fn from_request_value(value: &Number) -> Result<Self, ReductionError> {
        // A double too large for f32 casts to infinity.
        value
            .as_f64()
            .map(|wide| wide as f32)
            .filter(|narrowed| narrowed.is_finite())
            .ok_or_else(|| ReductionError::IncompatibleValue(value.clone()))
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;

    fn from_request_value(value: &Number) -> Result<Self, ReductionError> {
        value
            .as_f64()
            .ok_or_else(|| ReductionError::IncompatibleValue(value.clone()))
    }
}

/// The result of reducing one block: per-cell reduced values and non-missing counts.
///
/// Cells whose count is zero hold a placeholder value; the engine overwrites them with the
/// configured fill value before the block is written out.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockReduction<T> {
    /// Reduced value per cell
    pub values: Array2<T>,
    /// Number of non-missing layers folded into each cell
    pub counts: Array2<i64>,
}

/// Trait for cell-wise reductions over the layer axis of a block.
///
/// This forms the contract between the streaming engine and the reductions. Implementations
/// must be pure functions of the block passed in: the engine relies on block results being
/// independent of one another to make block size a performance knob rather than a correctness
/// one.
pub trait Reduction {
    /// Reduce one block.
    ///
    /// Returns a [BlockReduction](crate::operation::BlockReduction) holding per-cell values and
    /// counts.
    ///
    /// # Arguments
    ///
    /// * `block`: Input rows to reduce, shaped rows x cols x layers
    /// * `missing`: Optional missing data policy; matching values are excluded
    fn reduce_t<T: Element>(
        block: ArrayView3<'_, T>,
        missing: Option<&MissingPolicy<T>>,
    ) -> Result<BlockReduction<T>, ReductionError>;
}
