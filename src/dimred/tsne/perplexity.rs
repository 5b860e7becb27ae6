//! # Perplexity calibration
//!
//! Turns a pairwise squared distance matrix into the symmetric affinity matrix `P`.
//! Every row gets its own Gaussian precision `beta_i = 1 / (2 sigma_i^2)`, found by bisection
//! so that the entropy of the row's neighbor distribution equals `log2(perplexity)`.

use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Zip};
use rayon::prelude::*;

use crate::dimred::tsne::distance::ensure_finite;
use crate::utils::{count, float, FloatOps, Normalize};

/// Added to probabilities before every logarithm.
pub const PROBABILITY_FLOOR: f64 = 1e-12;

/// Stopping rule of the per-row precision search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams<T> {
    /// Accepted absolute error between row entropy and target entropy (bits).
    pub tolerance: T,
    /// Maximum number of search steps per row.
    pub max_iter: usize,
}

impl<T: FloatOps> Default for SearchParams<T> {
    fn default() -> Self {
        Self {
            tolerance: float(1e-5),
            max_iter: 50,
        }
    }
}

/// Outcome of the precision search for a single row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionSearch<T> {
    pub beta: T,
    pub entropy: T,
    pub iterations: usize,
    pub converged: bool,
}

/// Calibrated affinities of a data set.
#[derive(Debug, Clone)]
pub struct Calibration<T> {
    /// Symmetric joint affinities, summing to one with a zero diagonal.
    pub p: Array2<T>,
    /// Precision selected for every row.
    pub betas: Array1<T>,
    /// Rows whose search hit the step cap before reaching the tolerance.
    pub unconverged: Vec<usize>,
}

fn min_distance<T: FloatOps>(distances: ArrayView1<T>, skip: Option<usize>) -> T {
    distances
        .iter()
        .enumerate()
        .filter(|&(j, _)| Some(j) != skip)
        .fold(T::infinity(), |acc, (_, &d)| acc.min(d))
}

/// Writes the unnormalized Gaussian kernel of one row into `out` and returns its sum.
///
/// Distances are shifted by the row minimum, so the closest neighbor always has weight one.
fn kernel_row<T: FloatOps>(
    distances: ArrayView1<T>,
    skip: Option<usize>,
    beta: T,
    shift: T,
    mut out: ArrayViewMut1<T>,
) -> T {
    let mut sum = T::zero();
    for (j, (o, &d)) in out.iter_mut().zip(distances.iter()).enumerate() {
        *o = if Some(j) == skip {
            T::zero()
        } else {
            (-(d - shift) * beta).exp()
        };
        sum += *o;
    }
    sum
}

fn entropy_of<T: FloatOps>(kernel: ArrayView1<T>, sum: T) -> T {
    let eps = float::<T>(PROBABILITY_FLOOR);
    kernel
        .iter()
        .map(|&k| {
            let p = k / sum;
            -p * (p + eps).log2()
        })
        .sum()
}

/// Shannon entropy (bits) of the neighbor distribution of a row at precision `beta`.
///
/// `skip` is the position of the point itself, which never counts as its own neighbor.
pub fn row_entropy<T: FloatOps>(distances: ArrayView1<T>, skip: Option<usize>, beta: T) -> T {
    let mut kernel = Array1::zeros(distances.len());
    let shift = min_distance(distances, skip);
    let sum = kernel_row(distances, skip, beta, shift, kernel.view_mut());
    entropy_of(kernel.view(), sum)
}

/// Searches the precision giving a row the requested entropy.
///
/// Starting from `beta = 1`, the precision is doubled (or halved) until the target is
/// bracketed, then bisected. If `params.max_iter` steps pass without reaching the tolerance,
/// the best precision seen is returned with `converged == false`.
pub fn search_precision<T: FloatOps>(
    distances: ArrayView1<T>,
    skip: Option<usize>,
    target_entropy: T,
    params: &SearchParams<T>,
) -> PrecisionSearch<T> {
    let two = float::<T>(2.0);
    let shift = min_distance(distances, skip);
    let mut kernel = Array1::zeros(distances.len());

    let mut beta = T::one();
    let mut lower: Option<T> = None;
    let mut upper: Option<T> = None;

    let mut best = PrecisionSearch {
        beta,
        entropy: T::nan(),
        iterations: 0,
        converged: false,
    };
    let mut best_error = T::infinity();

    for iteration in 0..params.max_iter {
        let sum = kernel_row(distances, skip, beta, shift, kernel.view_mut());
        let entropy = entropy_of(kernel.view(), sum);
        let diff = entropy - target_entropy;

        if diff.abs() < best_error {
            best_error = diff.abs();
            best = PrecisionSearch {
                beta,
                entropy,
                iterations: iteration + 1,
                converged: false,
            };
        }

        if diff.abs() <= params.tolerance {
            return PrecisionSearch {
                beta,
                entropy,
                iterations: iteration + 1,
                converged: true,
            };
        }

        if diff > T::zero() {
            // too flat: sharpen the kernel
            lower = Some(beta);
            beta = match upper {
                Some(bound) => (beta + bound) / two,
                None => beta * two,
            };
        } else {
            upper = Some(beta);
            beta = match lower {
                Some(bound) => (beta + bound) / two,
                None => beta / two,
            };
        }
    }

    best
}

/// Row-stochastic neighbor probabilities `P_{j|i}` for every point.
///
/// # Returns
/// - `Ok((Array2<T>, Vec<PrecisionSearch<T>>))`: conditional matrix and the per-row searches
/// - `Err`: a row could not be normalized
pub fn conditional_probabilities<T: FloatOps>(
    distances: ArrayView2<T>,
    perplexity: T,
    params: &SearchParams<T>,
) -> anyhow::Result<(Array2<T>, Vec<PrecisionSearch<T>>)> {
    let n_obs = distances.nrows();
    let target_entropy = perplexity.log2();

    let searches: Vec<PrecisionSearch<T>> = (0..n_obs)
        .into_par_iter()
        .map(|i| search_precision(distances.row(i), Some(i), target_entropy, params))
        .collect();

    let mut conditional = Array2::zeros((n_obs, n_obs));
    let mut sums = vec![T::zero(); n_obs];
    Zip::indexed(conditional.rows_mut())
        .and(&mut sums[..])
        .par_for_each(|i, row, sum| {
            let d = distances.row(i);
            *sum = kernel_row(d, Some(i), searches[i].beta, min_distance(d, Some(i)), row);
        });

    conditional.normalize_rows(&sums, T::one())?;
    Ok((conditional, searches))
}

/// `P = (C + C^T) / (2 n_obs)` with the diagonal forced to zero.
pub fn symmetrize<T: FloatOps>(conditional: ArrayView2<T>) -> Array2<T> {
    let scale = float::<T>(2.0) * count::<T>(conditional.nrows());
    let mut p = (&conditional + &conditional.t()) / scale;
    p.diag_mut().fill(T::zero());
    p
}

/// Runs the full calibration: per-row precision search, row normalization, symmetrization.
///
/// Rows that do not converge are kept with their best precision and reported in
/// [`Calibration::unconverged`]. Distances must be finite.
pub fn calibrate<T: FloatOps>(
    distances: ArrayView2<T>,
    perplexity: T,
    params: &SearchParams<T>,
) -> anyhow::Result<Calibration<T>> {
    ensure_finite(distances)?;
    let (conditional, searches) = conditional_probabilities(distances, perplexity, params)?;

    let unconverged: Vec<usize> = searches
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.converged)
        .map(|(i, _)| i)
        .collect();

    for &i in &unconverged {
        debug!(
            "Row {}: entropy {} after {} steps (target {}), keeping beta = {}",
            i,
            searches[i].entropy,
            searches[i].iterations,
            perplexity.log2(),
            searches[i].beta
        );
    }
    if !unconverged.is_empty() {
        warn!(
            "Perplexity calibration did not converge for {} of {} points; using best precision found",
            unconverged.len(),
            distances.nrows()
        );
    }

    Ok(Calibration {
        p: symmetrize(conditional.view()),
        betas: searches.iter().map(|s| s.beta).collect(),
        unconverged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimred::tsne::distance::squared_euclidean;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_data(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.random_range(-5.0..5.0))
    }

    #[test]
    fn test_conditional_rows_are_distributions() {
        let x = random_data(40, 8, 42);
        let dist = squared_euclidean(x.view()).unwrap();
        let (conditional, searches) =
            conditional_probabilities(dist.view(), 5.0, &SearchParams::default()).unwrap();

        assert_eq!(searches.len(), 40);
        for (i, row) in conditional.rows().into_iter().enumerate() {
            assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-10);
            assert_eq!(row[i], 0.0);
            assert!(row.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_joint_affinities_properties() {
        let x = random_data(30, 4, 3);
        let dist = squared_euclidean(x.view()).unwrap();
        let calibration = calibrate(dist.view(), 7.0, &SearchParams::default()).unwrap();
        let p = &calibration.p;

        assert_relative_eq!(p.sum(), 1.0, epsilon = 1e-10);
        for i in 0..30 {
            assert_eq!(p[[i, i]], 0.0);
            for j in 0..30 {
                assert_eq!(p[[i, j]], p[[j, i]]);
                assert!(p[[i, j]] >= 0.0);
            }
        }
        assert!(calibration.unconverged.is_empty());
        assert_eq!(calibration.betas.len(), 30);
    }

    #[test]
    fn test_entropy_matches_perplexity() {
        let distances = Array1::from_shape_fn(200, |j| {
            let r = 0.05 * (j + 1) as f64;
            r * r
        });
        let params = SearchParams::default();

        for perplexity in [5.0f64, 10.0, 30.0] {
            let target = perplexity.log2();
            let search = search_precision(distances.view(), None, target, &params);

            assert!(search.converged, "perplexity {} did not converge", perplexity);
            assert_abs_diff_eq!(search.entropy, target, epsilon = 1e-4);
            assert_abs_diff_eq!(
                row_entropy(distances.view(), None, search.beta),
                target,
                epsilon = 1e-4
            );
        }
    }

    #[test]
    fn test_smaller_perplexity_gives_sharper_kernel() {
        let distances = Array1::from_shape_fn(100, |j| (j + 1) as f64 * 0.3);
        let params = SearchParams::default();

        let narrow = search_precision(distances.view(), None, 3.0f64.log2(), &params);
        let wide = search_precision(distances.view(), None, 20.0f64.log2(), &params);

        assert!(narrow.beta > wide.beta);
    }

    #[test]
    fn test_self_term_excluded() {
        let distances = ndarray::array![0.0, 1.0, 1.0, 1.0, 1.0];
        // four equidistant neighbors: uniform at any precision
        assert_abs_diff_eq!(
            row_entropy(distances.view(), Some(0), 3.0),
            2.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_unreachable_target_keeps_best_precision() {
        let distances = Array1::<f64>::zeros(10);
        let params = SearchParams {
            tolerance: 1e-5,
            max_iter: 20,
        };
        let search = search_precision(distances.view(), Some(0), 2.0f64.log2(), &params);

        assert!(!search.converged);
        assert!(search.beta.is_finite());
        assert_abs_diff_eq!(search.entropy, 9.0f64.log2(), epsilon = 1e-6);
    }

    #[test]
    fn test_coincident_points_are_reported() {
        let x = Array2::<f64>::ones((9, 3));
        let dist = squared_euclidean(x.view()).unwrap();
        let calibration = calibrate(dist.view(), 2.0, &SearchParams::default()).unwrap();

        assert_eq!(calibration.unconverged, (0..9).collect::<Vec<_>>());
        assert!(calibration.p.iter().all(|v| v.is_finite()));
        assert_relative_eq!(calibration.p.sum(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_infinite_distances_rejected() {
        let mut dist = Array2::<f64>::from_elem((7, 7), 4.0);
        dist.diag_mut().fill(0.0);
        dist[[0, 1]] = f64::INFINITY;
        dist[[1, 0]] = f64::INFINITY;

        let err = calibrate(dist.view(), 1.5, &SearchParams::default()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::dimred::tsne::TsneError>(),
            Some(&crate::dimred::tsne::TsneError::DistanceOverflow)
        );
    }
}
