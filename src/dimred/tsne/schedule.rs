use crate::utils::{count, float, FloatOps};

/// Optimization phase an iteration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `P` is scaled by the exaggeration factor in the gradient, momentum is at its initial value.
    EarlyExaggeration,
    /// Momentum moves linearly from its initial to its final value.
    MomentumRamp,
    SteadyState,
}

/// Iteration-indexed exaggeration and momentum values.
///
/// Every method is a pure function of the iteration index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationSchedule<T> {
    pub early_exaggeration: bool,
    pub exaggeration: T,
    pub exaggeration_iterations: usize,
    pub initial_momentum: T,
    pub final_momentum: T,
    pub momentum_switch_iteration: usize,
}

impl<T: FloatOps> Default for OptimizationSchedule<T> {
    fn default() -> Self {
        Self {
            early_exaggeration: true,
            exaggeration: float(4.0),
            exaggeration_iterations: 250,
            initial_momentum: float(0.5),
            final_momentum: float(0.8),
            momentum_switch_iteration: 250,
        }
    }
}

impl<T: FloatOps> OptimizationSchedule<T> {
    fn exaggeration_end(&self) -> usize {
        if self.early_exaggeration {
            self.exaggeration_iterations
        } else {
            0
        }
    }

    pub fn phase(&self, iteration: usize) -> Phase {
        if iteration < self.exaggeration_end() {
            Phase::EarlyExaggeration
        } else if iteration < self.momentum_switch_iteration {
            Phase::MomentumRamp
        } else {
            Phase::SteadyState
        }
    }

    /// Factor applied to `P` when computing the gradient.
    pub fn exaggeration_at(&self, iteration: usize) -> T {
        match self.phase(iteration) {
            Phase::EarlyExaggeration => self.exaggeration,
            _ => T::one(),
        }
    }

    pub fn momentum_at(&self, iteration: usize) -> T {
        match self.phase(iteration) {
            Phase::EarlyExaggeration => self.initial_momentum,
            Phase::MomentumRamp => {
                let start = self.exaggeration_end();
                let span = count::<T>(self.momentum_switch_iteration - start);
                let progress = count::<T>(iteration - start) / span;
                self.initial_momentum + (self.final_momentum - self.initial_momentum) * progress
            }
            Phase::SteadyState => self.final_momentum,
        }
    }
}
