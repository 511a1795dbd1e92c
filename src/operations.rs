//! Cell-wise reductions over the layer axis of a block.
//!
//! Each reduction is implemented as a struct that implements the
//! [Reduction](crate::operation::Reduction) trait.

use std::cmp::{max_by, min_by};

use crate::error::ReductionError;
use crate::models::{MissingPolicy, ReductionKind};
use crate::operation::{BlockReduction, Element, Reduction};

use ndarray::{Array2, ArrayView3, Axis};

/// Layer axis of an input block (rows x cols x layers).
const LAYER_AXIS: Axis = Axis(2);

/// Convert a per-cell count into the element type.
fn from_count<T: Element>(count: i64) -> Result<T, ReductionError> {
    T::from_i64(count).ok_or(ReductionError::CountUnrepresentable { count })
}

/// Fold each cell's layers into a (sum, non-missing count) pair.
fn sum_fold<T: Element>(
    block: ArrayView3<'_, T>,
    missing: Option<&MissingPolicy<T>>,
) -> Array2<(T, i64)> {
    block.fold_axis(LAYER_AXIS, (T::zero(), 0_i64), |(sum, count), val| {
        if let Some(missing) = missing {
            if !missing.is_missing(val) {
                (*sum + *val, count + 1)
            } else {
                (*sum, *count)
            }
        } else {
            (*sum + *val, count + 1)
        }
    })
}

/// Unpack an array of (value, count) pairs into a BlockReduction.
fn split_values_counts<T: Element>(folded: Array2<(T, i64)>) -> BlockReduction<T> {
    let values = folded.map(|&(value, _)| value);
    let counts = folded.map(|&(_, count)| count);
    BlockReduction { values, counts }
}

/// Per-cell sum of non-missing layer values.
pub struct Sum {}

impl Reduction for Sum {
    fn reduce_t<T: Element>(
        block: ArrayView3<'_, T>,
        missing: Option<&MissingPolicy<T>>,
    ) -> Result<BlockReduction<T>, ReductionError> {
        Ok(split_values_counts(sum_fold(block, missing)))
    }
}

/// Per-cell arithmetic mean of non-missing layer values.
///
/// The divisor is the number of non-missing layers for the cell, not the layer count. Integer
/// element types use truncating division.
pub struct Mean {}

impl Reduction for Mean {
    fn reduce_t<T: Element>(
        block: ArrayView3<'_, T>,
        missing: Option<&MissingPolicy<T>>,
    ) -> Result<BlockReduction<T>, ReductionError> {
        let folded = sum_fold(block, missing);
        let counts = folded.map(|&(_, count)| count);
        let mut values = Array2::<T>::zeros(folded.raw_dim());
        for (value, &(sum, count)) in values.iter_mut().zip(folded.iter()) {
            if count > 0 {
                *value = sum / from_count::<T>(count)?;
            }
        }
        Ok(BlockReduction { values, counts })
    }
}

/// Per-cell count of non-missing layer values.
pub struct Count {}

impl Reduction for Count {
    fn reduce_t<T: Element>(
        block: ArrayView3<'_, T>,
        missing: Option<&MissingPolicy<T>>,
    ) -> Result<BlockReduction<T>, ReductionError> {
        let counts = block.fold_axis(LAYER_AXIS, 0_i64, |count, val| {
            if let Some(missing) = missing {
                if !missing.is_missing(val) {
                    count + 1
                } else {
                    *count
                }
            } else {
                count + 1
            }
        });
        let mut values = Array2::<T>::zeros(counts.raw_dim());
        for (value, &count) in values.iter_mut().zip(counts.iter()) {
            if count > 0 {
                *value = from_count::<T>(count)?;
            }
        }
        Ok(BlockReduction { values, counts })
    }
}

// TODO: surface undefined float ordering (NaN outside the missing description) as a
// ReductionError instead of panicking.
fn min_element_pairwise<T: Element>(x: &&T, y: &&T) -> std::cmp::Ordering {
    x.partial_cmp(y)
        .unwrap_or_else(|| panic!("unexpected undefined order error for min"))
}

fn max_element_pairwise<T: Element>(x: &&T, y: &&T) -> std::cmp::Ordering {
    x.partial_cmp(y)
        .unwrap_or_else(|| panic!("unexpected undefined order error for max"))
}

/// Per-cell minimum of non-missing layer values.
pub struct Min {}

impl Reduction for Min {
    fn reduce_t<T: Element>(
        block: ArrayView3<'_, T>,
        missing: Option<&MissingPolicy<T>>,
    ) -> Result<BlockReduction<T>, ReductionError> {
        let init = T::max_value();
        let folded = block.fold_axis(LAYER_AXIS, (init, 0_i64), |(running_min, count), val| {
            if let Some(missing) = missing {
                if !missing.is_missing(val) {
                    (*min_by(running_min, val, min_element_pairwise), count + 1)
                } else {
                    (*running_min, *count)
                }
            } else {
                (*min_by(running_min, val, min_element_pairwise), count + 1)
            }
        });
        Ok(split_values_counts(folded))
    }
}

/// Per-cell maximum of non-missing layer values.
pub struct Max {}

impl Reduction for Max {
    fn reduce_t<T: Element>(
        block: ArrayView3<'_, T>,
        missing: Option<&MissingPolicy<T>>,
    ) -> Result<BlockReduction<T>, ReductionError> {
        let init = T::min_value();
        let folded = block.fold_axis(LAYER_AXIS, (init, 0_i64), |(running_max, count), val| {
            if let Some(missing) = missing {
                if !missing.is_missing(val) {
                    (*max_by(running_max, val, max_element_pairwise), count + 1)
                } else {
                    (*running_max, *count)
                }
            } else {
                (*max_by(running_max, val, max_element_pairwise), count + 1)
            }
        });
        Ok(split_values_counts(folded))
    }
}

/// Reduce one block with the given kind.
///
/// Dispatches to the corresponding [Reduction](crate::operation::Reduction) implementation.
pub fn reduce_block<T: Element>(
    kind: ReductionKind,
    block: ArrayView3<'_, T>,
    missing: Option<&MissingPolicy<T>>,
) -> Result<BlockReduction<T>, ReductionError> {
    match kind {
        ReductionKind::Sum => Sum::reduce_t(block, missing),
        ReductionKind::Mean => Mean::reduce_t(block, missing),
        ReductionKind::Count => Count::reduce_t(block, missing),
        ReductionKind::Min => Min::reduce_t(block, missing),
        ReductionKind::Max => Max::reduce_t(block, missing),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use ndarray::{array, Array3};

    /// 2x2x3 i64 block: cell (r, c) holds layers [base, base + 1, base + 2] with
    /// base = 10 * (2 * r + c).
    fn i64_block() -> Array3<i64> {
        Array3::from_shape_fn((2, 2, 3), |(r, c, l)| (10 * (2 * r + c) + l) as i64)
    }

    #[test]
    fn sum_i64() {
        let block = i64_block();
        let result = Sum::reduce_t::<i64>(block.view(), None).unwrap();
        assert_eq!(array![[3, 33], [63, 93]], result.values);
        assert_eq!(array![[3, 3], [3, 3]], result.counts);
    }

    #[test]
    fn sum_i64_missing_value() {
        let block = i64_block();
        let missing = MissingPolicy::value(1);
        let result = Sum::reduce_t::<i64>(block.view(), Some(&missing)).unwrap();
        // Cell (0, 0) loses its middle layer; the sum must not be zero-padded.
        assert_eq!(array![[2, 33], [63, 93]], result.values);
        assert_eq!(array![[2, 3], [3, 3]], result.counts);
    }

    #[test]
    fn sum_f64_all_missing_cell() {
        let block = Array3::from_shape_vec(
            (1, 2, 3),
            vec![-9999.0, -9999.0, -9999.0, 2.0, -9999.0, 4.0],
        )
        .unwrap();
        let missing = MissingPolicy::value(-9999.0);
        let result = Sum::reduce_t::<f64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(array![[0, 2]], result.counts);
        // All-missing cell holds the placeholder; the engine fills it before writing.
        assert_eq!(6.0, result.values[[0, 1]]);
    }

    #[test]
    fn sum_f64_combined_sentinel_and_range() {
        // A sentinel inside the valid range and out-of-range values are both excluded.
        let block = Array3::from_shape_vec((1, 1, 4), vec![1.0, -9999.0, 3.0, 100.0]).unwrap();
        let missing = MissingPolicy::valid_range(0.0, 10.0).with_sentinel(3.0);
        let result = Sum::reduce_t::<f64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(1.0, result.values[[0, 0]]);
        assert_eq!(1, result.counts[[0, 0]]);
    }

    #[test]
    fn sum_f32_infinity() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![1.0_f32, f32::INFINITY]).unwrap();
        let result = Sum::reduce_t::<f32>(block.view(), None).unwrap();
        assert_eq!(f32::INFINITY, result.values[[0, 0]]);
        assert_eq!(2, result.counts[[0, 0]]);
    }

    #[test]
    fn mean_f64() {
        let block = Array3::from_shape_vec((1, 1, 3), vec![1.0, 2.0, 6.0]).unwrap();
        let result = Mean::reduce_t::<f64>(block.view(), None).unwrap();
        assert_eq!(3.0, result.values[[0, 0]]);
        assert_eq!(3, result.counts[[0, 0]]);
    }

    #[test]
    fn mean_f64_missing_divides_by_non_missing_count() {
        // A cell with layer values [2.0, missing, 4.0] must average to 3.0, not 2.0.
        let block = Array3::from_shape_vec((1, 1, 3), vec![2.0, -9999.0, 4.0]).unwrap();
        let missing = MissingPolicy::value(-9999.0);
        let result = Mean::reduce_t::<f64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(3.0, result.values[[0, 0]]);
        assert_eq!(2, result.counts[[0, 0]]);
    }

    #[test]
    fn mean_f64_valid_range() {
        let block = Array3::from_shape_vec((1, 1, 4), vec![1.0, 2.0, 3.0, 100.0]).unwrap();
        let missing = MissingPolicy::valid_range(0.0, 10.0);
        let result = Mean::reduce_t::<f64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(2.0, result.values[[0, 0]]);
        assert_eq!(3, result.counts[[0, 0]]);
    }

    #[test]
    fn mean_i64_truncates() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![1_i64, 2]).unwrap();
        let result = Mean::reduce_t::<i64>(block.view(), None).unwrap();
        assert_eq!(1, result.values[[0, 0]]);
        assert_eq!(2, result.counts[[0, 0]]);
    }

    #[test]
    fn mean_all_missing_cell_is_not_divided() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![0.0_f64, 0.0]).unwrap();
        let missing = MissingPolicy::value(0.0);
        let result = Mean::reduce_t::<f64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(0, result.counts[[0, 0]]);
    }

    #[test]
    fn count_u32() {
        let block = i64_block().map(|&v| v as u32);
        let missing = MissingPolicy::valid_max(20);
        let result = Count::reduce_t::<u32>(block.view(), Some(&missing)).unwrap();
        assert_eq!(array![[3, 3], [1, 0]], result.counts);
        assert_eq!(array![[3, 3], [1, 0]], result.values.map(|&v| v as i64));
    }

    #[test]
    fn min_i64_missing_values() {
        let block = i64_block();
        let missing = MissingPolicy::values(vec![0, 1]);
        let result = Min::reduce_t::<i64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(array![[2, 10], [20, 30]], result.values);
        assert_eq!(array![[1, 3], [3, 3]], result.counts);
    }

    #[test]
    fn min_f32_infinity() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![f32::INFINITY, 1.0]).unwrap();
        let result = Min::reduce_t::<f32>(block.view(), None).unwrap();
        assert_eq!(1.0, result.values[[0, 0]]);
        assert_eq!(2, result.counts[[0, 0]]);
    }

    #[test]
    #[should_panic(expected = "unexpected undefined order error for min")]
    fn min_f32_nan() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![1.0, f32::NAN]).unwrap();
        let _ = Min::reduce_t::<f32>(block.view(), None);
    }

    #[test]
    fn max_i64_valid_min() {
        let block = i64_block();
        let missing = MissingPolicy::valid_min(11);
        let result = Max::reduce_t::<i64>(block.view(), Some(&missing)).unwrap();
        assert_eq!(array![[0, 2], [3, 3]], result.counts);
        assert_eq!(12, result.values[[0, 1]]);
        assert_eq!(32, result.values[[1, 1]]);
    }

    #[test]
    fn max_f32_infinity_first() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![f32::INFINITY, 1.0]).unwrap();
        let result = Max::reduce_t::<f32>(block.view(), None).unwrap();
        assert_eq!(f32::INFINITY, result.values[[0, 0]]);
        assert_eq!(2, result.counts[[0, 0]]);
    }

    #[test]
    #[should_panic(expected = "unexpected undefined order error for max")]
    fn max_f64_nan_first() {
        let block = Array3::from_shape_vec((1, 1, 2), vec![f64::NAN, 1.0]).unwrap();
        let _ = Max::reduce_t::<f64>(block.view(), None);
    }

    #[test]
    fn reduce_block_dispatches_all_kinds() {
        let block = i64_block();
        for kind in [
            ReductionKind::Sum,
            ReductionKind::Mean,
            ReductionKind::Count,
            ReductionKind::Min,
            ReductionKind::Max,
        ] {
            let result = reduce_block::<i64>(kind, block.view(), None).unwrap();
            assert_eq!(&[2, 2], result.values.shape());
            assert_eq!(array![[3, 3], [3, 3]], result.counts);
        }
    }

    #[test]
    fn reduce_block_single_row_blocks_match_whole_array() {
        // Reducing row-by-row must agree with reducing the whole array in one pass.
        let block = i64_block();
        let missing = MissingPolicy::value(21);
        for kind in [
            ReductionKind::Sum,
            ReductionKind::Mean,
            ReductionKind::Count,
            ReductionKind::Min,
            ReductionKind::Max,
        ] {
            let whole = reduce_block::<i64>(kind, block.view(), Some(&missing)).unwrap();
            for row in 0..2 {
                let single = block.slice(ndarray::s![row..row + 1, .., ..]);
                let part = reduce_block::<i64>(kind, single, Some(&missing)).unwrap();
                assert_eq!(whole.values.slice(ndarray::s![row..row + 1, ..]), part.values);
                assert_eq!(whole.counts.slice(ndarray::s![row..row + 1, ..]), part.counts);
            }
        }
    }
}
