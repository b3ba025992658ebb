//! Numeric backend interop.
//! Optional conversions between BoxSpace payloads and ndarray types.
//!
//! Gated behind the `ndarray` feature. The core crate keeps plain arrays
//! (`[T; N]`) as BoxSpace elements.

// ndarray interop
#[cfg(feature = "ndarray")]
pub mod ndarray_impl {
    use crate::spaces::BoxSpace;
    use ndarray::{Array1, Array2};

    /// Error type for conversions from ndarray to fixed-size arrays.
    #[derive(Debug, Clone)]
    pub struct NdarrayShapeError;

    impl<T: Copy + PartialOrd + Clone, const N: usize> BoxSpace<T, N> {
        /// Convert a BoxSpace element `[T; N]` into an `ndarray::Array1<T>`.
        pub fn to_ndarray(elem: [T; N]) -> Array1<T> {
            Array1::from_vec(elem.to_vec())
        }

        /// Attempt to convert an `ndarray::Array1<T>` into a BoxSpace element `[T; N]`.
        pub fn from_ndarray(arr: &Array1<T>) -> Result<[T; N], NdarrayShapeError> {
            if arr.len() != N { return Err(NdarrayShapeError); }
            let vec = arr.to_vec();
            vec.try_into().map_err(|_| NdarrayShapeError)
        }

        /// Stack a batch of observations (one per env slot) into a `(batch, N)` matrix.
        pub fn stack_batch(batch: &[[T; N]]) -> Result<Array2<T>, NdarrayShapeError> {
            let flat: Vec<T> = batch.iter().flat_map(|e| e.iter().copied()).collect();
            Array2::from_shape_vec((batch.len(), N), flat).map_err(|_| NdarrayShapeError)
        }
    }

}
