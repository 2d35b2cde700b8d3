use rand::{Rng, prelude::Distribution};
use statrs::distribution::Normal;

/// Unified interface for the scalar draws the Gibbs conditionals need
pub(crate) trait RngDraw {
    fn sample_norm(&mut self) -> f64;
    fn sample_unif(&mut self) -> f64;
    fn sample_exp(&mut self) -> f64;
    fn sample_trunc_norm(&mut self, mean: f64, sd: f64, lower: f64) -> f64;
}

impl<R: Rng + ?Sized> RngDraw for R {
    /// Sample from the standard normal distribution
    #[inline(always)]
    fn sample_norm(&mut self) -> f64 {
        Normal::standard().sample(self)
    }

    /// Sample from the open-at-zero uniform distribution on (0, 1]
    #[inline(always)]
    fn sample_unif(&mut self) -> f64 {
        1.0 - self.r#gen::<f64>()
    }

    /// Sample from the Exp(1) distribution
    #[inline(always)]
    fn sample_exp(&mut self) -> f64 {
        -self.sample_unif().ln()
    }

    /// Sample from `Normal(mean, sd)` truncated to `[lower, ∞)`.
    ///
    /// The draw is made on the standardised scale with the truncation point
    /// `a = (lower - mean) / sd`; see [`crate::truncated`] for the two regimes.
    #[inline(always)]
    fn sample_trunc_norm(&mut self, mean: f64, sd: f64, lower: f64) -> f64 {
        let a = (lower - mean) / sd;
        let z = crate::truncated::standard_normal_above(self, a);
        (mean + sd * z).max(lower)
    }
}
