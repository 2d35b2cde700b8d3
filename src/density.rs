//! Joint log density of the hierarchical subject-effects model.
//!
//! # Model
//! For observation `i` with subject `s = subj_idx[i]`:
//! - Likelihood: `measure[i] ~ N(X[i] · beta_subject[s], eps[s])`
//! - `beta_subject[s] = beta_group + group_sd ⊙ beta_subject_offset[s]`
//! - `beta_group[k] ~ N(0, 2.5)`, `beta_subject_offset[s, k] ~ N(0, 2.5)`
//! - `group_sd[k] ~ N⁺(0, 2.5)`, `eps[s] ~ N⁺(0, 2.5)` (half-normal)
//!
//! The densities here are fully normalised, including the `ln 2` from each
//! half-normal truncation. Nothing is clamped: a zero noise scale or a
//! negative bounded parameter yields a non-finite value that the caller sees.

use ndarray::{Array1, Array2, Axis};
use statrs::consts::LN_SQRT_2PI;
use std::f64::consts::LN_2;
use std::sync::Arc;
use tracing::debug;

#[cfg(not(feature = "rayon"))]
use ndarray::Zip;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{ModelError, ObservationSet, ParameterLayout, Parameters};

/// Default scale of every weakly-informative prior.
pub const DEFAULT_PRIOR_SCALE: f64 = 2.5;

/// Scales of the zero-centred priors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorScales {
    /// `beta_group[k] ~ N(0, beta_group)`
    pub beta_group: f64,
    /// `group_sd[k] ~ N⁺(0, group_sd)`
    pub group_sd: f64,
    /// `beta_subject_offset[s, k] ~ N(0, beta_subject_offset)`
    pub beta_subject_offset: f64,
    /// `eps[s] ~ N⁺(0, eps)`
    pub eps: f64,
}

impl Default for PriorScales {
    fn default() -> Self {
        Self {
            beta_group: DEFAULT_PRIOR_SCALE,
            group_sd: DEFAULT_PRIOR_SCALE,
            beta_subject_offset: DEFAULT_PRIOR_SCALE,
            eps: DEFAULT_PRIOR_SCALE,
        }
    }
}

impl PriorScales {
    /// # Errors
    /// Returns [`ModelError::InvalidPriorScale`] naming the first scale that is
    /// not finite and strictly positive.
    pub fn validate(&self) -> Result<(), ModelError> {
        for (name, value) in [
            ("beta_group", self.beta_group),
            ("group_sd", self.group_sd),
            ("beta_subject_offset", self.beta_subject_offset),
            ("eps", self.eps),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ModelError::InvalidPriorScale { name, value });
            }
        }
        Ok(())
    }
}

/// `ln N(x | mean, sd)`.
#[inline]
pub fn normal_ln_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -LN_SQRT_2PI - sd.ln() - 0.5 * z * z
}

/// `ln N⁺(x | 0, scale)`, the half-normal on `[0, ∞)`.
#[inline]
pub fn half_normal_ln_pdf(x: f64, scale: f64) -> f64 {
    if x < 0.0 {
        f64::NEG_INFINITY
    } else {
        LN_2 + normal_ln_pdf(x, 0.0, scale)
    }
}

/// The hierarchical model bound to one observation set.
///
/// Cloning is cheap; the data are shared.
#[derive(Debug, Clone)]
pub struct HierarchicalModel {
    data: Arc<ObservationSet>,
    priors: PriorScales,
    layout: ParameterLayout,
}

impl HierarchicalModel {
    /// # Errors
    /// Returns [`ModelError::InvalidPriorScale`] if `priors` is invalid.
    pub fn new(data: ObservationSet, priors: PriorScales) -> Result<Self, ModelError> {
        Self::from_shared(Arc::new(data), priors)
    }

    pub(crate) fn from_shared(
        data: Arc<ObservationSet>,
        priors: PriorScales,
    ) -> Result<Self, ModelError> {
        priors.validate()?;
        let layout = ParameterLayout::new(data.n_predictors(), data.n_subjects());
        debug!(dim = layout.dim(), "built hierarchical model");
        Ok(Self {
            data,
            priors,
            layout,
        })
    }

    pub fn data(&self) -> &ObservationSet {
        &self.data
    }

    pub(crate) fn shared_data(&self) -> Arc<ObservationSet> {
        Arc::clone(&self.data)
    }

    pub fn priors(&self) -> &PriorScales {
        &self.priors
    }

    pub fn layout(&self) -> ParameterLayout {
        self.layout
    }

    /// Per-observation coefficient rows, gathered from `beta_subject` by subject.
    fn gathered_coefficients(&self, beta_subject: &Array2<f64>) -> Array2<f64> {
        beta_subject.select(Axis(0), self.data.subjects())
    }

    /// Mean of every observation: `X[i] · beta_subject[subj_idx[i]]`.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `params` does not match the
    /// model's dimensions.
    pub fn linear_predictor(&self, params: &Parameters) -> Result<Array1<f64>, ModelError> {
        self.layout.check_shape(params)?;
        Ok(self.fitted_means(params))
    }

    fn fitted_means(&self, params: &Parameters) -> Array1<f64> {
        let coefficients = self.gathered_coefficients(&params.beta_subject());
        (&self.data.design() * &coefficients).sum_axis(Axis(1))
    }

    /// Noise scale of every observation: `eps[subj_idx[i]]`.
    fn gathered_scales(&self, params: &Parameters) -> Array1<f64> {
        params.eps.select(Axis(0), self.data.subjects())
    }

    /// Sum over observations of `ln N(measure[i] | mean[i], eps[subj_idx[i]])`.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `params` does not match the
    /// model's dimensions.
    pub fn log_likelihood(&self, params: &Parameters) -> Result<f64, ModelError> {
        self.layout.check_shape(params)?;
        let mean = self.fitted_means(params);
        let scale = self.gathered_scales(params);
        let measure = self.data.measure();

        #[cfg(feature = "rayon")]
        let total = (0..measure.len())
            .into_par_iter()
            .map(|i| normal_ln_pdf(measure[i], mean[i], scale[i]))
            .sum();
        #[cfg(not(feature = "rayon"))]
        let total = Zip::from(&measure)
            .and(&mean)
            .and(&scale)
            .fold(0.0, |acc, &y, &mu, &sd| acc + normal_ln_pdf(y, mu, sd));
        Ok(total)
    }

    /// Sum of the prior log densities of every sampled parameter.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `params` does not match the
    /// model's dimensions.
    pub fn log_prior(&self, params: &Parameters) -> Result<f64, ModelError> {
        self.layout.check_shape(params)?;
        let p = &self.priors;
        let group = params
            .beta_group
            .iter()
            .map(|&b| normal_ln_pdf(b, 0.0, p.beta_group))
            .sum::<f64>();
        let spread = params
            .group_sd
            .iter()
            .map(|&sd| half_normal_ln_pdf(sd, p.group_sd))
            .sum::<f64>();
        let offsets = params
            .beta_subject_offset
            .iter()
            .map(|&o| normal_ln_pdf(o, 0.0, p.beta_subject_offset))
            .sum::<f64>();
        let noise = params
            .eps
            .iter()
            .map(|&e| half_normal_ln_pdf(e, p.eps))
            .sum::<f64>();
        Ok(group + spread + offsets + noise)
    }

    /// Joint log density `ln p(measure, params)`.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `params` does not match the
    /// model's dimensions.
    pub fn log_density(&self, params: &Parameters) -> Result<f64, ModelError> {
        Ok(self.log_prior(params)? + self.log_likelihood(params)?)
    }

    /// Joint log density and its gradient with respect to every parameter.
    ///
    /// The gradient is returned in a [`Parameters`] container, entry for entry.
    /// Derivatives of the half-normal terms are taken on the open interior `x > 0`.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `params` does not match the
    /// model's dimensions.
    pub fn log_density_gradient(
        &self,
        params: &Parameters,
    ) -> Result<(f64, Parameters), ModelError> {
        self.layout.check_shape(params)?;
        let p = &self.priors;
        let m = self.data.n_predictors();
        let j = self.data.n_subjects();
        let x = self.data.design();
        let measure = self.data.measure();
        let mean = self.fitted_means(params);

        let mut grad = Parameters::zeros(m, j);
        let mut value = self.log_prior(params)?;

        for (i, &s) in self.data.subjects().iter().enumerate() {
            let sd = params.eps[s];
            let r = measure[i] - mean[i];
            value += normal_ln_pdf(measure[i], mean[i], sd);

            // d/d(mean) of the Normal log density
            let g = r / (sd * sd);
            for k in 0..m {
                let xik = x[[i, k]];
                grad.beta_group[k] += xik * g;
                grad.group_sd[k] += xik * params.beta_subject_offset[[s, k]] * g;
                grad.beta_subject_offset[[s, k]] += xik * params.group_sd[k] * g;
            }
            grad.eps[s] += -1.0 / sd + r * r / (sd * sd * sd);
        }

        // Zero-centred Normal priors all contribute -x / scale².
        let prior_pull = |g: &mut f64, &x: &f64, scale: f64| *g -= x / (scale * scale);
        grad.beta_group
            .zip_mut_with(&params.beta_group, |g, x| prior_pull(g, x, p.beta_group));
        grad.group_sd
            .zip_mut_with(&params.group_sd, |g, x| prior_pull(g, x, p.group_sd));
        grad.beta_subject_offset
            .zip_mut_with(&params.beta_subject_offset, |g, x| {
                prior_pull(g, x, p.beta_subject_offset)
            });
        grad.eps.zip_mut_with(&params.eps, |g, x| prior_pull(g, x, p.eps));

        Ok((value, grad))
    }

    /// Log density and gradient on the unconstrained scale.
    ///
    /// `theta` follows [`ParameterLayout`] order, with `group_sd[k]` and `eps[s]`
    /// replaced by their logarithms. The value includes the log-Jacobian
    /// `Σ ln group_sd + Σ ln eps` of the exp transform, so it is the density a
    /// gradient-based sampler working on `theta` should target.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `theta` has the wrong length.
    pub fn log_density_unconstrained(&self, theta: &[f64]) -> Result<(f64, Vec<f64>), ModelError> {
        let layout = self.layout;
        let mut params = layout.unpack(theta)?;
        params.group_sd.mapv_inplace(f64::exp);
        params.eps.mapv_inplace(f64::exp);

        let (value, grad) = self.log_density_gradient(&params)?;
        let mut flat = layout.pack(&grad)?;

        let mut log_jacobian = 0.0;
        for k in 0..layout.n_predictors() {
            let idx = layout.group_sd(k);
            flat[idx] = flat[idx] * params.group_sd[k] + 1.0;
            log_jacobian += theta[idx];
        }
        for s in 0..layout.n_subjects() {
            let idx = layout.eps(s);
            flat[idx] = flat[idx] * params.eps[s] + 1.0;
            log_jacobian += theta[idx];
        }
        Ok((value + log_jacobian, flat))
    }
}
