//! Functions and utilities for converting between raw bytes and [ndarray] blocks.

use crate::error::ReductionError;
use crate::planner::BlockRange;

use bytes::Bytes;
use ndarray::{Array2, Array3, ArrayView3};
// Bring trait into scope to use as_bytes method.
use zerocopy::AsBytes;

/// Convert from Bytes to `&[T]`.
///
/// Zerocopy provides a mechanism for converting between types.
/// Correct alignment of the data is necessary.
///
/// # Arguments
///
/// * `data`: Bytes containing data to convert.
pub fn from_bytes<T: zerocopy::FromBytes>(data: &Bytes) -> Result<&[T], ReductionError> {
    let layout = zerocopy::LayoutVerified::<_, [T]>::new_slice(&data[..]).ok_or(
        ReductionError::FromBytes {
            type_name: std::any::type_name::<T>(),
        },
    )?;
    Ok(layout.into_slice())
}

/// Build an owned rows x cols x layers block from row-major bytes.
///
/// # Arguments
///
/// * `data`: Bytes containing the block's elements. Must be at least as aligned as an instance
///   of `T`.
/// * `range`: The row range the bytes cover
/// * `cols`: Number of columns
/// * `layers`: Number of layers
pub fn build_block<T>(
    data: &Bytes,
    range: BlockRange,
    cols: usize,
    layers: usize,
) -> Result<Array3<T>, ReductionError>
where
    T: Clone + zerocopy::FromBytes,
{
    let elements = from_bytes::<T>(data)?;
    let view = ArrayView3::from_shape((range.row_count, cols, layers), elements)
        .map_err(ReductionError::ShapeInvalid)?;
    Ok(view.to_owned())
}

/// Serialise a rows x cols block into row-major bytes.
pub fn block_to_bytes<T: Clone + Copy + zerocopy::AsBytes>(block: &Array2<T>) -> Bytes {
    // Owned blocks are normally in standard layout; fall back to an element copy if not.
    match block.as_slice() {
        Some(elements) => Bytes::copy_from_slice(elements.as_bytes()),
        None => {
            let elements = block.iter().copied().collect::<Vec<T>>();
            Bytes::copy_from_slice(elements.as_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    #[test]
    fn from_bytes_u32() {
        assert_eq!(
            [0x04030201_u32],
            from_bytes::<u32>(&Bytes::from_static(&[1, 2, 3, 4])).unwrap()
        );
    }

    #[test]
    fn from_bytes_i64() {
        assert_eq!(
            [0x0807060504030201_i64],
            from_bytes::<i64>(&Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8])).unwrap()
        );
    }

    fn assert_from_bytes_error<T: std::fmt::Debug>(result: Result<T, ReductionError>) {
        match result.unwrap_err() {
            ReductionError::FromBytes { type_name: _ } => (),
            _ => panic!("expected from_bytes to fail"),
        };
    }

    #[test]
    fn from_bytes_u32_too_small() {
        assert_from_bytes_error(from_bytes::<u32>(&Bytes::from_static(&[1, 2, 3])))
    }

    #[test]
    fn from_bytes_u32_unaligned() {
        static ARRAY: [u8; 5] = [1, 2, 3, 4, 5];
        assert_from_bytes_error(from_bytes::<u32>(&Bytes::from_static(&ARRAY[1..])))
    }

    #[test]
    fn build_block_2x2x2() {
        let elements: [i32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        let data = Bytes::copy_from_slice(elements.as_bytes());
        let block = build_block::<i32>(&data, BlockRange::new(4, 2), 2, 2).unwrap();
        assert_eq!(array![[[1, 2], [3, 4]], [[5, 6], [7, 8]]], block);
    }

    #[test]
    fn build_block_wrong_shape() {
        let elements: [i32; 3] = [1, 2, 3];
        let data = Bytes::copy_from_slice(elements.as_bytes());
        match build_block::<i32>(&data, BlockRange::new(0, 2), 2, 1).unwrap_err() {
            ReductionError::ShapeInvalid(err) => {
                assert_eq!(ndarray::ErrorKind::OutOfBounds, err.kind())
            }
            _ => panic!("expected out of bounds error"),
        }
    }

    #[test]
    fn block_to_bytes_standard_layout() {
        let block = array![[1.0_f64, 2.0], [3.0, 4.0]];
        let data = block_to_bytes(&block);
        assert_eq!([1.0_f64, 2.0, 3.0, 4.0].as_bytes(), &data[..]);
    }

    #[test]
    fn block_to_bytes_fortran_layout_copies() {
        use ndarray::ShapeBuilder;
        let block = Array2::from_shape_vec((2, 2).f(), vec![1_i32, 2, 3, 4]).unwrap();
        assert!(block.as_slice().is_none());
        let data = block_to_bytes(&block);
        assert_eq!([1_i32, 3, 2, 4].as_bytes(), &data[..]);
    }
}
