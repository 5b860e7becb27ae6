//! # Embedding optimizer
//!
//! Gradient descent with momentum on KL(P || Q), where `Q` is the Student-t (one degree of
//! freedom) affinity of the current embedding. The optimizer owns the embedding and its
//! velocity; `P` is only ever borrowed.

use ndarray::{Array2, ArrayView2, Axis, Zip};

use crate::dimred::tsne::distance::pairwise_squared;
use crate::dimred::tsne::error::TsneError;
use crate::dimred::tsne::perplexity::PROBABILITY_FLOOR;
use crate::dimred::tsne::schedule::{OptimizationSchedule, Phase};
use crate::utils::{float, FloatOps};

/// Student-t affinities of an embedding.
///
/// # Returns
/// `(q, w)` where `w_ij = 1 / (1 + |y_i - y_j|^2)` with a zero diagonal and `q = w / sum(w)`.
pub fn student_t_affinities<T: FloatOps>(y: ArrayView2<T>) -> (Array2<T>, Array2<T>) {
    let mut w = pairwise_squared(y);
    w.par_mapv_inplace(|d| T::one() / (T::one() + d));
    w.diag_mut().fill(T::zero());

    let total = w.sum();
    let q = &w / total;
    (q, w)
}

/// KL(P || Q), with both probabilities floored before the logarithm.
pub fn kl_divergence<T: FloatOps>(p: ArrayView2<T>, q: ArrayView2<T>) -> T {
    let eps = float::<T>(PROBABILITY_FLOOR);
    p.iter()
        .zip(q.iter())
        .map(|(&pij, &qij)| pij * ((pij + eps) / (qij + eps)).ln())
        .sum()
}

/// `grad_i = 4 * sum_j (exaggeration * p_ij - q_ij) * w_ij * (y_i - y_j)`
pub fn gradient<T: FloatOps>(
    y: ArrayView2<T>,
    p: ArrayView2<T>,
    q: ArrayView2<T>,
    w: ArrayView2<T>,
    exaggeration: T,
) -> Array2<T> {
    let n_obs = y.nrows();
    let four = float::<T>(4.0);
    let mut grad = Array2::zeros(y.raw_dim());

    Zip::indexed(grad.rows_mut()).par_for_each(|i, mut g| {
        let yi = y.row(i);
        for j in 0..n_obs {
            if i == j {
                continue;
            }
            let coeff = (exaggeration * p[[i, j]] - q[[i, j]]) * w[[i, j]];
            for ((gk, &a), &b) in g.iter_mut().zip(yi.iter()).zip(y.row(j).iter()) {
                *gk += coeff * (a - b);
            }
        }
        g.mapv_inplace(|v| v * four);
    });

    grad
}

fn all_finite<T: FloatOps>(values: &Array2<T>) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Mutable optimization state of one fit.
pub struct EmbeddingOptimizer<T: FloatOps> {
    embedding: Array2<T>,
    velocity: Array2<T>,
    gains: Option<Array2<T>>,
    min_gain: T,
    learning_rate: T,
    recenter: bool,
    schedule: OptimizationSchedule<T>,
}

impl<T: FloatOps> EmbeddingOptimizer<T> {
    /// Starts from `initial` with zero velocity. Re-centering is on, adaptive gains are off.
    pub fn new(initial: Array2<T>, learning_rate: T, schedule: OptimizationSchedule<T>) -> Self {
        let velocity = Array2::zeros(initial.raw_dim());
        Self {
            embedding: initial,
            velocity,
            gains: None,
            min_gain: float(0.01),
            learning_rate,
            recenter: true,
            schedule,
        }
    }

    pub fn with_recenter(mut self, recenter: bool) -> Self {
        self.recenter = recenter;
        self
    }

    /// Enables per-coordinate adaptive gains, floored at `min_gain`.
    pub fn with_adaptive_gains(mut self, min_gain: T) -> Self {
        self.gains = Some(Array2::ones(self.embedding.raw_dim()));
        self.min_gain = min_gain;
        self
    }

    pub fn embedding(&self) -> ArrayView2<'_, T> {
        self.embedding.view()
    }

    pub fn into_embedding(self) -> Array2<T> {
        self.embedding
    }

    /// KL(P || Q) of the current embedding.
    pub fn divergence(&self, p: ArrayView2<T>) -> T {
        let (q, _) = student_t_affinities(self.embedding.view());
        kl_divergence(p, q.view())
    }

    /// Performs one update of the embedding.
    ///
    /// # Returns
    /// - `Ok(Phase)`: the phase the iteration ran in
    /// - `Err`: `TsneError::NumericalInstability` if `Q`, the velocity or the embedding
    ///   became non-finite
    pub fn step(&mut self, p: ArrayView2<T>, iteration: usize) -> anyhow::Result<Phase> {
        let phase = self.schedule.phase(iteration);
        let momentum = self.schedule.momentum_at(iteration);
        let exaggeration = self.schedule.exaggeration_at(iteration);

        let (q, w) = student_t_affinities(self.embedding.view());
        if !all_finite(&q) {
            return Err(TsneError::NumericalInstability { iteration }.into());
        }

        let grad = gradient(self.embedding.view(), p, q.view(), w.view(), exaggeration);
        let lr = self.learning_rate;

        match self.gains.as_mut() {
            Some(gains) => {
                let up = float::<T>(0.2);
                let down = float::<T>(0.8);
                let min_gain = self.min_gain;
                Zip::from(gains)
                    .and(&mut self.velocity)
                    .and(&grad)
                    .for_each(|gain, v, &dg| {
                        *gain = if (dg > T::zero()) != (*v > T::zero()) {
                            *gain + up
                        } else {
                            *gain * down
                        };
                        *gain = gain.max(min_gain);
                        *v = momentum * *v - lr * *gain * dg;
                    });
            }
            None => {
                Zip::from(&mut self.velocity)
                    .and(&grad)
                    .for_each(|v, &dg| *v = momentum * *v - lr * dg);
            }
        }

        self.embedding += &self.velocity;

        if self.recenter {
            if let Some(mean) = self.embedding.mean_axis(Axis(0)) {
                self.embedding -= &mean;
            }
        }

        if !all_finite(&self.velocity) || !all_finite(&self.embedding) {
            return Err(TsneError::NumericalInstability { iteration }.into());
        }

        Ok(phase)
    }
}
