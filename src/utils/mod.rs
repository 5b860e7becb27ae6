use std::fmt::{Debug, Display};
use std::iter::Sum;

use ndarray::ScalarOperand;
use num_traits::{Float, FromPrimitive, NumAssign, ToPrimitive};

/// Float element type accepted by every algorithm in the crate (`f32` and `f64`).
pub trait FloatOps:
    Float
    + FromPrimitive
    + ToPrimitive
    + NumAssign
    + Sum
    + ScalarOperand
    + Send
    + Sync
    + Debug
    + Display
    + 'static
{
}

impl<T> FloatOps for T where
    T: Float
        + FromPrimitive
        + ToPrimitive
        + NumAssign
        + Sum
        + ScalarOperand
        + Send
        + Sync
        + Debug
        + Display
        + 'static
{
}

pub trait Normalize<T: FloatOps> {
    /// Scales every row so that it sums to `target`, given its current `sums`.
    fn normalize_rows(&mut self, sums: &[T], target: T) -> anyhow::Result<()>;
}

/// Converts an `f64` constant into `T`. Infallible for `f32` and `f64`.
pub(crate) fn float<T: FloatOps>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Converts a count into `T`.
pub(crate) fn count<T: FloatOps>(value: usize) -> T {
    T::from_usize(value).unwrap_or_else(T::nan)
}
