use ndarray::{Array2, ArrayView2, Zip};

use crate::dimred::tsne::error::TsneError;
use crate::utils::FloatOps;

/// Pairwise squared Euclidean distances between the rows of `x`.
///
/// The result is symmetric with an exact zero diagonal. Rows are filled in parallel.
///
/// # Returns
/// - `Ok(Array2<T>)`: `n_obs × n_obs` distance matrix
/// - `Err`: fewer than two observations, or a distance that does not fit in `T`
pub fn squared_euclidean<T: FloatOps>(x: ArrayView2<T>) -> anyhow::Result<Array2<T>> {
    let n_obs = x.nrows();
    if n_obs < 2 {
        return Err(TsneError::TooFewObservations(n_obs).into());
    }
    let dist = pairwise_squared(x);
    ensure_finite(dist.view())?;
    Ok(dist)
}

pub(crate) fn ensure_finite<T: FloatOps>(dist: ArrayView2<T>) -> anyhow::Result<()> {
    if dist.iter().any(|d| !d.is_finite()) {
        return Err(TsneError::DistanceOverflow.into());
    }
    Ok(())
}

pub(crate) fn pairwise_squared<T: FloatOps>(x: ArrayView2<T>) -> Array2<T> {
    let n_obs = x.nrows();
    let mut dist = Array2::zeros((n_obs, n_obs));

    Zip::indexed(dist.rows_mut()).par_for_each(|i, mut row| {
        let xi = x.row(i);
        for (j, d) in row.iter_mut().enumerate() {
            if i == j {
                continue;
            }
            // (a - b)^2 == (b - a)^2 bit for bit, so d_ij == d_ji without a copy pass.
            *d = xi
                .iter()
                .zip(x.row(j).iter())
                .map(|(&a, &b)| (a - b) * (a - b))
                .sum::<T>();
        }
    });

    dist.diag_mut().fill(T::zero());
    dist
}
