//! # t-distributed Stochastic Neighbor Embedding
//!
//! Exact t-SNE: every pairwise affinity is computed, so memory and time per iteration are
//! quadratic in the number of observations.
//!
//! A fit runs in four stages:
//! 1. pairwise squared distances of the input ([`distance`])
//! 2. per-point precision search and symmetric affinities `P` ([`perplexity`])
//! 3. random (or caller-supplied) initial embedding
//! 4. momentum gradient descent on KL(P || Q) with early exaggeration ([`optimizer`],
//!    [`schedule`])
//!
//! Heavy steps run on the current rayon thread pool; install a custom pool to control the
//! number of threads.

pub mod distance;
mod error;
pub mod optimizer;
pub mod perplexity;
pub mod schedule;

pub use error::TsneError;
pub use optimizer::EmbeddingOptimizer;
pub use perplexity::{Calibration, SearchParams};
pub use schedule::{OptimizationSchedule, Phase};

use log::{log, warn, Level};
use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::utils::{count, float, FloatOps};

/// Tunable values of a t-SNE fit.
#[derive(Debug, Clone, PartialEq)]
pub struct TSNEConfig<T> {
    /// Target effective number of neighbors per point.
    pub perplexity: T,
    pub early_exaggeration: bool,
    /// Factor applied to `P` in the gradient during early exaggeration.
    pub exaggeration: T,
    pub exaggeration_iterations: usize,
    pub initial_momentum: T,
    pub final_momentum: T,
    pub momentum_switch_iteration: usize,
    pub adaptive_gains: bool,
    pub min_gain: T,
    /// Subtract the column means of the embedding after every update.
    pub recenter: bool,
    /// Standard deviation of the Gaussian initial embedding.
    pub init_std: T,
    pub perplexity_tolerance: T,
    pub perplexity_max_iter: usize,
    pub random_seed: u64,
    /// Record the divergence every `report_interval` iterations; `0` only records the first
    /// and last.
    pub report_interval: usize,
    pub verbose: bool,
}

impl<T: FloatOps> Default for TSNEConfig<T> {
    fn default() -> Self {
        let schedule = OptimizationSchedule::<T>::default();
        let search = SearchParams::<T>::default();
        Self {
            perplexity: float(30.0),
            early_exaggeration: schedule.early_exaggeration,
            exaggeration: schedule.exaggeration,
            exaggeration_iterations: schedule.exaggeration_iterations,
            initial_momentum: schedule.initial_momentum,
            final_momentum: schedule.final_momentum,
            momentum_switch_iteration: schedule.momentum_switch_iteration,
            adaptive_gains: false,
            min_gain: float(0.01),
            recenter: true,
            init_std: float(1e-4),
            perplexity_tolerance: search.tolerance,
            perplexity_max_iter: search.max_iter,
            random_seed: 42,
            report_interval: 100,
            verbose: false,
        }
    }
}

impl<T: FloatOps> TSNEConfig<T> {
    pub fn schedule(&self) -> OptimizationSchedule<T> {
        OptimizationSchedule {
            early_exaggeration: self.early_exaggeration,
            exaggeration: self.exaggeration,
            exaggeration_iterations: self.exaggeration_iterations,
            initial_momentum: self.initial_momentum,
            final_momentum: self.final_momentum,
            momentum_switch_iteration: self.momentum_switch_iteration,
        }
    }

    pub fn search_params(&self) -> SearchParams<T> {
        SearchParams {
            tolerance: self.perplexity_tolerance,
            max_iter: self.perplexity_max_iter,
        }
    }
}

/// Diagnostics of a completed fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport<T> {
    pub iterations: usize,
    /// Points whose precision search stopped at the step cap.
    pub unconverged: Vec<usize>,
    /// `(iteration, KL(P || Q))` before the given iteration ran. The last entry is the final
    /// embedding, recorded under the total iteration count.
    pub divergence: Vec<(usize, T)>,
}

impl<T: FloatOps> FitReport<T> {
    pub fn initial_divergence(&self) -> Option<T> {
        self.divergence.first().map(|&(_, kl)| kl)
    }

    pub fn final_divergence(&self) -> Option<T> {
        self.divergence.last().map(|&(_, kl)| kl)
    }
}

/// Embedding together with its [`FitReport`].
#[derive(Debug, Clone)]
pub struct TSNEResult<T> {
    pub embedding: Array2<T>,
    pub report: FitReport<T>,
}

/// Exact t-SNE.
///
/// Holds configuration only; each fit computes its own distances, affinities and optimizer
/// state and drops them when it returns.
///
/// # Example Usage
/// ```ignore
/// let tsne = TSNE::new(30.0, true);
/// let learning_rate = tsne.stable_learning_rate(data.nrows());
/// let embedding = tsne.fit(data.view(), 1000, 2, learning_rate)?;
/// ```
#[derive(Debug, Clone)]
pub struct TSNE<T: FloatOps> {
    config: TSNEConfig<T>,
}

impl<T: FloatOps> TSNE<T> {
    /// Creates a model with the given perplexity and default values for everything else.
    pub fn new(perplexity: T, early_exaggeration: bool) -> Self {
        Self {
            config: TSNEConfig {
                perplexity,
                early_exaggeration,
                ..TSNEConfig::default()
            },
        }
    }

    pub fn from_config(config: TSNEConfig<T>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TSNEConfig<T> {
        &self.config
    }

    /// Largest learning rate at which the plain momentum update keeps `n_obs` points stable:
    /// `n_obs / (4 · max(exaggeration, 1))`, or `n_obs / 4` without early exaggeration.
    ///
    /// A point's attraction grows with `exaggeration` times its row of `P`, which sums to about
    /// `1 / n_obs`. Above this rate, tightly bound neighbors overshoot each other and the
    /// embedding oscillates instead of settling, so small inputs need small rates. With the
    /// default ×4 exaggeration that is 0.25 for four points and 250 for four thousand.
    pub fn stable_learning_rate(&self, n_obs: usize) -> T {
        let exaggeration = if self.config.early_exaggeration {
            self.config.exaggeration.max(T::one())
        } else {
            T::one()
        };
        count::<T>(n_obs) / (float::<T>(4.0) * exaggeration)
    }

    /// Embeds the rows of `x` into `output_dimensions` dimensions.
    ///
    /// The initial embedding is drawn from an RNG seeded with `random_seed`, so repeated calls
    /// give the same result.
    ///
    /// # Parameters
    /// - `x`: observations × features
    /// - `iterations`: number of gradient steps
    /// - `output_dimensions`: columns of the embedding
    /// - `learning_rate`: step size of the velocity update. Keep it at or below
    ///   [`stable_learning_rate`](Self::stable_learning_rate); larger values are accepted but
    ///   may leave neighbors oscillating around each other.
    ///
    /// # Returns
    /// - `Ok(Array2<T>)`: observations × `output_dimensions`
    /// - `Err`: a [`TsneError`] for invalid arguments or a diverging optimization
    pub fn fit(
        &self,
        x: ArrayView2<T>,
        iterations: usize,
        output_dimensions: usize,
        learning_rate: T,
    ) -> anyhow::Result<Array2<T>> {
        Ok(self
            .fit_detailed(x, iterations, output_dimensions, learning_rate)?
            .embedding)
    }

    /// Same as [`fit`](Self::fit), drawing the initial embedding from `rng`.
    pub fn fit_with_rng<R: Rng + ?Sized>(
        &self,
        x: ArrayView2<T>,
        iterations: usize,
        output_dimensions: usize,
        learning_rate: T,
        rng: &mut R,
    ) -> anyhow::Result<Array2<T>> {
        self.validate(x, iterations, output_dimensions, learning_rate)?;
        let initial = self.initial_embedding(x.nrows(), output_dimensions, rng);
        Ok(self.run(x, initial, iterations, learning_rate)?.embedding)
    }

    /// Optimizes starting from a caller-supplied embedding instead of a random one.
    ///
    /// The output dimensionality is the number of columns of `initial`.
    pub fn fit_from(
        &self,
        x: ArrayView2<T>,
        initial: Array2<T>,
        iterations: usize,
        learning_rate: T,
    ) -> anyhow::Result<TSNEResult<T>> {
        let (rows, cols) = initial.dim();
        if rows != x.nrows() || cols == 0 {
            return Err(TsneError::InitialEmbeddingShape {
                expected_rows: x.nrows(),
                got: (rows, cols),
            }
            .into());
        }
        self.validate(x, iterations, cols, learning_rate)?;
        if initial.iter().any(|v| !v.is_finite()) {
            return Err(TsneError::NonFiniteInput.into());
        }
        self.run(x, initial, iterations, learning_rate)
    }

    /// Same as [`fit`](Self::fit), also returning the [`FitReport`].
    pub fn fit_detailed(
        &self,
        x: ArrayView2<T>,
        iterations: usize,
        output_dimensions: usize,
        learning_rate: T,
    ) -> anyhow::Result<TSNEResult<T>> {
        self.validate(x, iterations, output_dimensions, learning_rate)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.random_seed);
        let initial = self.initial_embedding(x.nrows(), output_dimensions, &mut rng);
        self.run(x, initial, iterations, learning_rate)
    }

    /// Computes only the calibrated affinities `P` of `x`.
    pub fn affinities(&self, x: ArrayView2<T>) -> anyhow::Result<Calibration<T>> {
        self.validate_data(x)?;
        let distances = distance::squared_euclidean(x)?;
        perplexity::calibrate(
            distances.view(),
            self.config.perplexity,
            &self.config.search_params(),
        )
    }

    fn validate_data(&self, x: ArrayView2<T>) -> anyhow::Result<()> {
        let n_obs = x.nrows();
        if n_obs < 2 {
            return Err(TsneError::TooFewObservations(n_obs).into());
        }

        let perplexity = self.config.perplexity;
        let upper = count::<T>(n_obs) / float(3.0);
        if !(perplexity > T::zero() && perplexity < upper) {
            return Err(TsneError::InvalidPerplexity {
                perplexity: perplexity.to_f64().unwrap_or(f64::NAN),
                n_obs,
            }
            .into());
        }

        if x.iter().any(|v| !v.is_finite()) {
            return Err(TsneError::NonFiniteInput.into());
        }
        Ok(())
    }

    fn validate(
        &self,
        x: ArrayView2<T>,
        iterations: usize,
        output_dimensions: usize,
        learning_rate: T,
    ) -> anyhow::Result<()> {
        self.validate_data(x)?;
        if iterations == 0 {
            return Err(TsneError::InvalidIterations.into());
        }
        if output_dimensions == 0 {
            return Err(TsneError::InvalidOutputDimensions.into());
        }
        if !(learning_rate > T::zero() && learning_rate.is_finite()) {
            return Err(
                TsneError::InvalidLearningRate(learning_rate.to_f64().unwrap_or(f64::NAN)).into(),
            );
        }
        self.validate_tuning()
    }

    fn validate_tuning(&self) -> anyhow::Result<()> {
        let c = &self.config;
        let invalid = |name: &'static str, value: T| -> anyhow::Result<()> {
            Err(TsneError::InvalidParameter {
                name,
                value: value.to_f64().unwrap_or(f64::NAN),
            }
            .into())
        };

        let unit = |m: T| m >= T::zero() && m < T::one();
        if !(c.exaggeration > T::zero() && c.exaggeration.is_finite()) {
            return invalid("exaggeration", c.exaggeration);
        }
        if !unit(c.initial_momentum) {
            return invalid("initial_momentum", c.initial_momentum);
        }
        if !unit(c.final_momentum) {
            return invalid("final_momentum", c.final_momentum);
        }
        if !(c.min_gain > T::zero()) {
            return invalid("min_gain", c.min_gain);
        }
        if !(c.init_std > T::zero() && c.init_std.is_finite()) {
            return invalid("init_std", c.init_std);
        }
        if !(c.perplexity_tolerance > T::zero()) {
            return invalid("perplexity_tolerance", c.perplexity_tolerance);
        }
        if c.perplexity_max_iter == 0 {
            return invalid("perplexity_max_iter", T::zero());
        }
        Ok(())
    }

    fn initial_embedding<R: Rng + ?Sized>(
        &self,
        n_obs: usize,
        output_dimensions: usize,
        rng: &mut R,
    ) -> Array2<T> {
        let std = self.config.init_std;
        Array2::from_shape_simple_fn((n_obs, output_dimensions), || {
            let z: f64 = rng.sample(StandardNormal);
            std * float::<T>(z)
        })
    }

    fn log_level(&self) -> Level {
        if self.config.verbose {
            Level::Info
        } else {
            Level::Debug
        }
    }

    fn run(
        &self,
        x: ArrayView2<T>,
        initial: Array2<T>,
        iterations: usize,
        learning_rate: T,
    ) -> anyhow::Result<TSNEResult<T>> {
        let level = self.log_level();
        let (n_obs, n_features) = x.dim();
        let output_dimensions = initial.ncols();
        log!(
            level,
            "t-SNE: {} observations × {} features -> {} dimensions, perplexity {}, {} iterations",
            n_obs,
            n_features,
            output_dimensions,
            self.config.perplexity,
            iterations
        );
        let stable = self.stable_learning_rate(n_obs);
        if learning_rate > stable {
            warn!(
                "Learning rate {} exceeds {} for {} observations; the embedding may oscillate",
                learning_rate, stable, n_obs
            );
        }

        let distances = distance::squared_euclidean(x)?;
        let calibration = perplexity::calibrate(
            distances.view(),
            self.config.perplexity,
            &self.config.search_params(),
        )?;
        drop(distances);
        let p = calibration.p.view();

        let mut optimizer =
            EmbeddingOptimizer::new(initial, learning_rate, self.config.schedule())
                .with_recenter(self.config.recenter);
        if self.config.adaptive_gains {
            optimizer = optimizer.with_adaptive_gains(self.config.min_gain);
        }

        let interval = self.config.report_interval;
        let mut divergence = Vec::new();
        for iteration in 0..iterations {
            if iteration == 0 || (interval > 0 && iteration % interval == 0) {
                let kl = optimizer.divergence(p);
                log!(level, "Iteration {}: KL divergence {}", iteration, kl);
                divergence.push((iteration, kl));
            }
            optimizer.step(p, iteration)?;
        }

        let final_kl = optimizer.divergence(p);
        log!(level, "t-SNE finished: KL divergence {}", final_kl);
        divergence.push((iterations, final_kl));

        Ok(TSNEResult {
            embedding: optimizer.into_embedding(),
            report: FitReport {
                iterations,
                unconverged: calibration.unconverged,
                divergence,
            },
        })
    }
}

/// Builder for configuring and creating [`TSNE`] instances.
///
/// # Example Usage
/// ```ignore
/// let tsne = TSNEBuilder::<f64>::new()
///     .perplexity(20.0)
///     .exaggeration(12.0)
///     .exaggeration_iterations(100)
///     .random_seed(7)
///     .build();
/// ```
pub struct TSNEBuilder<T: FloatOps> {
    config: TSNEConfig<T>,
}

impl<T: FloatOps> Default for TSNEBuilder<T> {
    fn default() -> Self {
        Self {
            config: TSNEConfig::default(),
        }
    }
}

impl<T: FloatOps> TSNEBuilder<T> {
    /// Creates a new builder with the defaults of [`TSNEConfig`]:
    /// perplexity 30, exaggeration ×4 for 250 iterations, momentum 0.5 → 0.8 at iteration 250,
    /// no adaptive gains, re-centering on, initial standard deviation 1e-4, seed 42.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn perplexity(mut self, perplexity: T) -> Self {
        self.config.perplexity = perplexity;
        self
    }

    pub fn early_exaggeration(mut self, early_exaggeration: bool) -> Self {
        self.config.early_exaggeration = early_exaggeration;
        self
    }

    pub fn exaggeration(mut self, exaggeration: T) -> Self {
        self.config.exaggeration = exaggeration;
        self
    }

    pub fn exaggeration_iterations(mut self, iterations: usize) -> Self {
        self.config.exaggeration_iterations = iterations;
        self
    }

    /// Sets the momentum before and after the ramp.
    pub fn momentum(mut self, initial: T, last: T) -> Self {
        self.config.initial_momentum = initial;
        self.config.final_momentum = last;
        self
    }

    pub fn momentum_switch_iteration(mut self, iteration: usize) -> Self {
        self.config.momentum_switch_iteration = iteration;
        self
    }

    pub fn adaptive_gains(mut self, adaptive_gains: bool) -> Self {
        self.config.adaptive_gains = adaptive_gains;
        self
    }

    pub fn min_gain(mut self, min_gain: T) -> Self {
        self.config.min_gain = min_gain;
        self
    }

    pub fn recenter(mut self, recenter: bool) -> Self {
        self.config.recenter = recenter;
        self
    }

    pub fn init_std(mut self, init_std: T) -> Self {
        self.config.init_std = init_std;
        self
    }

    pub fn perplexity_tolerance(mut self, tolerance: T) -> Self {
        self.config.perplexity_tolerance = tolerance;
        self
    }

    pub fn perplexity_max_iter(mut self, max_iter: usize) -> Self {
        self.config.perplexity_max_iter = max_iter;
        self
    }

    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    pub fn report_interval(mut self, interval: usize) -> Self {
        self.config.report_interval = interval;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn build(self) -> TSNE<T> {
        TSNE::from_config(self.config)
    }
}
