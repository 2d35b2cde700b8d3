//! Bayesian hierarchical linear regression with subject-level effects.
//!
//! This module implements a Gibbs sampler for the non-centred multi-level model
//! in [`crate::density`], driven by `mini-mcmc`'s [`GibbsSampler`].
//!
//! # Model
//! - Likelihood: \( y_i \sim \mathcal{N}(x_i^\top \beta_{s_i}, \varepsilon_{s_i}) \)
//! - Subject coefficients: \( \beta_s = \beta_g + \sigma_g \odot \delta_s \)
//! - Priors: \( \beta_g, \delta_s \sim \mathcal{N}(0, 2.5) \), \( \sigma_g, \varepsilon_s \sim \mathcal{N}^+(0, 2.5) \)
//!
//! # Sweep
//! For every predictor column `k` the sampler updates the block
//! \( (\beta_{g,k}, \sigma_{g,k}, \delta_{\cdot,k}) \):
//! 1. \( \beta_{g,k} \) from its Gaussian conditional with \( \delta_{\cdot,k} \) integrated out,
//! 2. \( \sigma_{g,k} \) by log-scale random-walk Metropolis on the same marginal,
//! 3. each \( \delta_{s,k} \) from its Gaussian full conditional.
//!
//! and then each \( \varepsilon_s \) by log-scale random-walk Metropolis.
//! Steps 1-2 are only valid when step 3 follows them within the same sweep, which
//! holds because the state is laid out column block by column block (see
//! [`ParameterLayout`]) and the Gibbs sampler visits coordinates in order.
//! With [`HierarchicalRegression::with_collapsed_updates`] set to `false`, steps
//! 1-2 use the plain full conditionals instead (Gaussian, and truncated Gaussian
//! for \( \sigma_{g,k} \)).

use mini_mcmc::{
    core::{ChainRunner, init_det},
    distributions::Conditional,
    gibbs::GibbsSampler,
    stats::RunStats,
};
use ndarray::{Array3, Array4, ArrayView2, Axis, s};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::density::{HierarchicalModel, PriorScales, half_normal_ln_pdf};
use crate::diagnostics::{ParameterSummary, split_rhat, summarize};
use crate::params::{ParameterKind, ParameterLayout, Parameters};
use crate::rng::RngDraw;
use crate::{ModelError, ObservationSet};

/// Metropolis steps per scale parameter and sweep.
const DEFAULT_METROPOLIS_STEPS: usize = 4;

/// Split-R-hat above which a run is reported as poorly mixed.
const RHAT_WARNING: f64 = 1.1;

/// A Gibbs sampler for the hierarchical subject-effects regression.
///
/// # Type Parameters
/// * `R` - The random number generator type (defaults to `ChaCha8Rng`)
///
/// # Example
/// ```rust
/// use ndarray::array;
/// use hierarchical_deconv::{ObservationSet, PriorScales};
/// use hierarchical_deconv::regression::HierarchicalRegression;
///
/// let data = ObservationSet::new(
///     4, 1, 2,
///     array![1.0, 1.2, 3.0, 3.2],
///     array![[1.0], [1.0], [1.0], [1.0]],
///     vec![1, 1, 2, 2],
/// ).unwrap();
///
/// let model = HierarchicalRegression::new(data, PriorScales::default(), 2, 42).unwrap();
/// let results = model.run(200, 200).expect("MCMC failed");
///
/// let beta_subject = results.beta_subject_samples();
/// assert_eq!(beta_subject.shape(), &[2, 200, 2, 1]);
/// ```
pub struct HierarchicalRegression<R = ChaCha8Rng>
where
    R: SeedableRng + Rng + Clone + Send + Sync,
{
    model: HierarchicalModel,
    n_chains: usize,
    seed: u64,
    rng: R,
    metropolis_steps: usize,
    collapsed: bool,
}

impl HierarchicalRegression<ChaCha8Rng> {
    /// Create a new hierarchical regression sampler with default RNG.
    ///
    /// # Arguments
    /// * `data` - Validated observation table
    /// * `priors` - Prior scales; [`PriorScales::default`] gives the 2.5 weakly-informative priors
    /// * `n_chains` - Number of independent MCMC chains to run (≥ 1)
    /// * `seed` - Random seed; the same seed and data give identical results
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidChainCount`] if `n_chains` is zero and
    /// [`ModelError::InvalidPriorScale`] for an invalid prior.
    pub fn new(
        data: ObservationSet,
        priors: PriorScales,
        n_chains: usize,
        seed: u64,
    ) -> Result<Self, ModelError> {
        Self::from_rng(ChaCha8Rng::seed_from_u64(seed), data, priors, n_chains, seed)
    }
}

impl<R: SeedableRng + Rng + Clone + Send + Sync> HierarchicalRegression<R> {
    /// Create a new hierarchical regression sampler with a custom RNG.
    ///
    /// # Arguments
    /// * `rng` - Random number generator used by the conditionals
    /// * `data` - Validated observation table
    /// * `priors` - Prior scales
    /// * `n_chains` - Number of independent MCMC chains to run (≥ 1)
    /// * `seed` - Random seed for chain initialisation; any `u64` is accepted
    ///   (`mini-mcmc` receives it with the top bit cleared)
    ///
    /// # Errors
    /// See [`HierarchicalRegression::new`].
    pub fn from_rng(
        rng: R,
        data: ObservationSet,
        priors: PriorScales,
        n_chains: usize,
        seed: u64,
    ) -> Result<Self, ModelError> {
        if n_chains == 0 {
            return Err(ModelError::InvalidChainCount);
        }
        Ok(Self {
            model: HierarchicalModel::new(data, priors)?,
            n_chains,
            seed,
            rng,
            metropolis_steps: DEFAULT_METROPOLIS_STEPS,
            collapsed: true,
        })
    }

    /// Replace the prior scales.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidPriorScale`] if `priors` is invalid.
    pub fn with_priors(mut self, priors: PriorScales) -> Result<Self, ModelError> {
        self.model = HierarchicalModel::from_shared(self.model.shared_data(), priors)?;
        Ok(self)
    }

    /// Number of Metropolis steps per sweep for each `eps[s]` (and each
    /// `group_sd[k]` under collapsed updates). Values below one are raised to one.
    pub fn with_metropolis_steps(mut self, steps: usize) -> Self {
        self.metropolis_steps = steps.max(1);
        self
    }

    /// Toggle the offset-marginal updates of `beta_group` and `group_sd`
    /// (on by default).
    pub fn with_collapsed_updates(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    pub fn model(&self) -> &HierarchicalModel {
        &self.model
    }

    /// Dispersed starting points: `Uniform(-2, 2)` on the unconstrained scale,
    /// with one seeded stream per chain.
    fn initial_states(&self) -> Vec<Vec<f64>> {
        let layout = self.model.layout();
        let mut init: Vec<Vec<f64>> = init_det(self.n_chains, layout.dim());
        for (chain, state) in init.iter_mut().enumerate() {
            let mut rng = R::seed_from_u64(self.seed.wrapping_add(chain as u64));
            for (idx, value) in state.iter_mut().enumerate() {
                let u: f64 = rng.gen_range(-2.0..2.0);
                *value = match layout.kind(idx) {
                    Some(ParameterKind::GroupSd { .. } | ParameterKind::Eps { .. }) => u.exp(),
                    _ => u,
                };
            }
        }
        init
    }

    /// Run the MCMC sampler to obtain posterior samples.
    ///
    /// # Arguments
    /// * `burn_in` - Number of burn-in sweeps per chain, discarded
    /// * `samples` - Number of posterior draws to keep per chain
    ///
    /// # Errors
    /// - [`ModelError::InvalidSampleCount`] if `samples` is zero
    /// - [`ModelError::EmptyModel`] if the model has no parameters
    /// - [`ModelError::Sampler`] if `mini-mcmc` fails
    ///
    /// Non-finite draws are reported through `tracing` and kept in the output.
    pub fn run(self, burn_in: usize, samples: usize) -> Result<HierarchicalResults, ModelError> {
        if samples == 0 {
            return Err(ModelError::InvalidSampleCount);
        }
        let layout = self.model.layout();
        if layout.dim() == 0 {
            return Err(ModelError::EmptyModel);
        }
        let data = self.model.data();
        info!(
            n = data.n_observations(),
            m = data.n_predictors(),
            j = data.n_subjects(),
            chains = self.n_chains,
            burn_in,
            samples,
            collapsed = self.collapsed,
            "running hierarchical Gibbs sampler"
        );

        let init = self.initial_states();
        let cond = HierarchicalConditional::new(
            &self.model,
            self.rng,
            self.metropolis_steps,
            self.collapsed,
        );

        let mut gibbs = GibbsSampler::new(cond, init).set_seed(engine_seed(self.seed));
        let (all_samples, run_stats) = gibbs
            .run_progress(samples, burn_in)
            .map_err(|e| ModelError::Sampler(e.to_string()))?;

        let results = HierarchicalResults {
            samples: all_samples,
            layout,
            run_stats,
        };
        results.report_health();
        Ok(results)
    }
}

/// Posterior draws and summaries from the hierarchical regression MCMC.
pub struct HierarchicalResults {
    /// All MCMC samples from all chains
    ///
    /// Dimensions: `[n_chains, n_samples, dim]`, with the last axis in
    /// [`ParameterLayout`] order.
    pub samples: Array3<f64>,

    /// Mapping between the last sample axis and named parameters
    pub layout: ParameterLayout,

    /// Runtime statistics reported by `mini-mcmc`
    pub run_stats: RunStats,
}

impl HierarchicalResults {
    pub fn n_chains(&self) -> usize {
        self.samples.shape()[0]
    }

    pub fn n_draws(&self) -> usize {
        self.samples.shape()[1]
    }

    /// Draws of one flat parameter, laid out `[chain, draw]`.
    pub fn parameter_samples(&self, index: usize) -> ArrayView2<'_, f64> {
        self.samples.index_axis(Axis(2), index)
    }

    /// One draw as a [`Parameters`] value.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] only if the samples do not match the layout.
    pub fn draw(&self, chain: usize, draw: usize) -> Result<Parameters, ModelError> {
        let flat = self.samples.slice(s![chain, draw, ..]).to_vec();
        self.layout.unpack(&flat)
    }

    fn gather_vector(&self, len: usize, index: impl Fn(usize) -> usize) -> Array3<f64> {
        let (chains, draws, _) = self.samples.dim();
        Array3::from_shape_fn((chains, draws, len), |(c, d, i)| self.samples[[c, d, index(i)]])
    }

    /// `eps` draws, `[chain, draw, subject]`.
    pub fn eps_samples(&self) -> Array3<f64> {
        self.gather_vector(self.layout.n_subjects(), |s| self.layout.eps(s))
    }

    /// `beta_group` draws, `[chain, draw, predictor]`.
    pub fn beta_group_samples(&self) -> Array3<f64> {
        self.gather_vector(self.layout.n_predictors(), |k| self.layout.beta_group(k))
    }

    /// `group_sd` draws, `[chain, draw, predictor]`.
    pub fn group_sd_samples(&self) -> Array3<f64> {
        self.gather_vector(self.layout.n_predictors(), |k| self.layout.group_sd(k))
    }

    /// `beta_subject_offset` draws, `[chain, draw, subject, predictor]`.
    pub fn beta_subject_offset_samples(&self) -> Array4<f64> {
        let (chains, draws, _) = self.samples.dim();
        let shape = (chains, draws, self.layout.n_subjects(), self.layout.n_predictors());
        Array4::from_shape_fn(shape, |(c, d, s, k)| {
            self.samples[[c, d, self.layout.offset(s, k)]]
        })
    }

    /// Derived `beta_subject = beta_group + group_sd ⊙ beta_subject_offset` for
    /// every draw, `[chain, draw, subject, predictor]`.
    pub fn beta_subject_samples(&self) -> Array4<f64> {
        let (chains, draws, _) = self.samples.dim();
        let layout = self.layout;
        let shape = (chains, draws, layout.n_subjects(), layout.n_predictors());
        Array4::from_shape_fn(shape, |(c, d, s, k)| {
            let bg = self.samples[[c, d, layout.beta_group(k)]];
            let sd = self.samples[[c, d, layout.group_sd(k)]];
            let off = self.samples[[c, d, layout.offset(s, k)]];
            bg + sd * off
        })
    }

    /// Pooled draws (chain-major) of a sampled or derived parameter by name,
    /// e.g. `"eps[2]"` or `"beta_subject[1,1]"`.
    pub fn get_posterior_samples(&self, name: &str) -> Option<Vec<f64>> {
        if let Some(idx) = self.layout.index_of(name) {
            return Some(self.parameter_samples(idx).iter().copied().collect());
        }
        let pos = self.layout.derived_names().iter().position(|n| n == name)?;
        let m = self.layout.n_predictors();
        let beta = self.beta_subject_samples();
        Some(
            beta.slice(s![.., .., pos / m, pos % m])
                .iter()
                .copied()
                .collect(),
        )
    }

    /// Posterior means of the sampled parameters.
    ///
    /// The mean of the derived coefficients is
    /// `beta_subject_samples().mean_axis(..)`, not `posterior_mean().beta_subject()`.
    pub fn posterior_mean(&self) -> Result<Parameters, ModelError> {
        let (chains, draws, dim) = self.samples.dim();
        let pooled = self.samples.to_shape((chains * draws, dim))?;
        let means: Vec<f64> = (0..dim)
            .map(|i| pooled.column(i).mean().unwrap_or(f64::NAN))
            .collect();
        self.layout.unpack(&means)
    }

    /// Summaries of every sampled parameter followed by every `beta_subject` entry.
    pub fn parameter_summaries(&self) -> Vec<ParameterSummary> {
        let beta = self.beta_subject_samples();
        let m = self.layout.n_predictors();
        let mut columns: Vec<(String, ArrayView2<'_, f64>)> = self
            .layout
            .parameter_names()
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (name, self.parameter_samples(idx)))
            .collect();
        columns.extend(
            self.layout
                .derived_names()
                .into_iter()
                .enumerate()
                .map(|(pos, name)| (name, beta.slice(s![.., .., pos / m, pos % m]))),
        );

        #[cfg(feature = "rayon")]
        let summaries: Vec<ParameterSummary> = columns
            .par_iter()
            .map(|(name, draws)| summarize(name.as_str(), draws.view()))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let summaries: Vec<ParameterSummary> = columns
            .iter()
            .map(|(name, draws)| summarize(name.as_str(), draws.view()))
            .collect();
        summaries
    }

    /// Largest split-R-hat over the sampled parameters.
    pub fn max_split_rhat(&self) -> Option<f64> {
        (0..self.layout.dim())
            .filter_map(|idx| split_rhat(self.parameter_samples(idx)))
            .max_by(f64::total_cmp)
    }

    fn report_health(&self) {
        let non_finite = self.samples.iter().filter(|v| !v.is_finite()).count();
        if non_finite > 0 {
            warn!(non_finite, "posterior draws contain non-finite values");
        }
        match self.max_split_rhat() {
            Some(rhat) if rhat > RHAT_WARNING => {
                warn!(max_split_rhat = rhat, "chains have not mixed");
            }
            Some(rhat) => debug!(max_split_rhat = rhat, "chains mixed"),
            None => debug!("too few draws for split-R-hat"),
        }
    }

    /// Print a summary of the MCMC results
    pub fn summary(&self) {
        println!(
            "{:<28} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8} {:>7}",
            "Parameter", "Mean", "Std. Dev.", "2.5%", "50%", "97.5%", "ESS", "R-hat"
        );
        println!("{}", "-".repeat(100));
        for row in self.parameter_summaries() {
            let rhat = row
                .split_rhat
                .map_or("N/A".to_string(), |r| format!("{:.3}", r));
            println!(
                "{:<28} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>8.0} {:>7}",
                row.name, row.mean, row.sd, row.q025, row.median, row.q975, row.ess, rhat
            );
        }
    }
}

/// Sufficient statistics of one subject for one predictor column.
///
/// With `z_i` the residual of row `i` after removing every column except `k`:
/// `q = Σ x_ik²`, `p = Σ x_ik z_i` over the subject's rows.
#[derive(Debug, Clone, Copy)]
struct ColumnStats {
    q: f64,
    p: f64,
    /// Current `eps[s]²`
    sigma2: f64,
}

/// Implements the conditional distributions for the Gibbs sampler.
///
/// # Type Parameters
/// * `R` - The random number generator type
#[derive(Clone)]
struct HierarchicalConditional<R>
where
    R: SeedableRng + Rng + Clone + Send + Sync,
{
    data: Arc<ObservationSet>,
    priors: PriorScales,
    layout: ParameterLayout,
    metropolis_steps: usize,
    collapsed: bool,
    rng: R,
}

impl<R> HierarchicalConditional<R>
where
    R: SeedableRng + Rng + Clone + Send + Sync,
{
    fn new(model: &HierarchicalModel, rng: R, metropolis_steps: usize, collapsed: bool) -> Self {
        Self {
            data: model.shared_data(),
            priors: *model.priors(),
            layout: model.layout(),
            metropolis_steps,
            collapsed,
            rng,
        }
    }

    /// `beta_subject[s, k]` under the state `given`.
    #[inline]
    fn coefficient(&self, given: &[f64], s: usize, k: usize) -> f64 {
        let l = &self.layout;
        given[l.beta_group(k)] + given[l.group_sd(k)] * given[l.offset(s, k)]
    }

    /// Residual of row `i`, leaving out column `skip` if given.
    fn residual(&self, given: &[f64], i: usize, skip: Option<usize>) -> f64 {
        let s = self.data.subjects()[i];
        let x = self.data.design();
        let fitted: f64 = (0..self.layout.n_predictors())
            .filter(|&k| Some(k) != skip)
            .map(|k| x[[i, k]] * self.coefficient(given, s, k))
            .sum();
        self.data.measure()[i] - fitted
    }

    fn subject_column_stats(&self, given: &[f64], s: usize, k: usize) -> ColumnStats {
        let x = self.data.design();
        let (q, p) = self
            .data
            .subject_rows(s)
            .iter()
            .fold((0.0, 0.0), |(q, p), &i| {
                let xik = x[[i, k]];
                (q + xik * xik, p + xik * self.residual(given, i, Some(k)))
            });
        let eps = given[self.layout.eps(s)];
        ColumnStats {
            q,
            p,
            sigma2: eps * eps,
        }
    }

    fn column_stats(&self, given: &[f64], k: usize) -> Vec<ColumnStats> {
        (0..self.layout.n_subjects())
            .map(|s| self.subject_column_stats(given, s, k))
            .collect()
    }

    /// Fold the current state into the random stream.
    ///
    /// Every chain runs its own clone of this conditional, so the clones start
    /// from the same RNG state; mixing in the state separates their streams.
    fn mix_state(&mut self, given: &[f64]) {
        let salt = given.iter().fold(0xcbf2_9ce4_8422_2325_u64, |h, v| {
            (h ^ v.to_bits()).wrapping_mul(0x0000_0100_0000_01b3)
        });
        let seed = self.rng.next_u64() ^ salt;
        self.rng = R::seed_from_u64(seed);
    }

    fn draw_normal(&mut self, precision: f64, linear: f64) -> f64 {
        let var = 1.0 / precision;
        linear * var + self.rng.sample_norm() * var.sqrt()
    }

    fn sample_beta_group(&mut self, given: &[f64], k: usize) -> f64 {
        let tau = self.priors.beta_group;
        let stats = self.column_stats(given, k);
        let sd = given[self.layout.group_sd(k)];
        let mut precision = 1.0 / (tau * tau);
        let mut linear = 0.0;

        if self.collapsed {
            // Offsets of column k integrated out: the subject's rows share the
            // extra variance c·x xᵀ, c = (group_sd · offset prior scale)².
            let c = (sd * self.priors.beta_subject_offset).powi(2);
            for st in &stats {
                let denom = st.sigma2 + c * st.q;
                precision += st.q / denom;
                linear += st.p / denom;
            }
        } else {
            for (s, st) in stats.iter().enumerate() {
                let off = given[self.layout.offset(s, k)];
                precision += st.q / st.sigma2;
                linear += (st.p - st.q * sd * off) / st.sigma2;
            }
        }
        self.draw_normal(precision, linear)
    }

    fn sample_group_sd(&mut self, given: &[f64], k: usize) -> f64 {
        let stats = self.column_stats(given, k);
        let bg = given[self.layout.beta_group(k)];
        let current = given[self.layout.group_sd(k)];
        let tau_sd = self.priors.group_sd;

        if !self.collapsed {
            let mut precision = 1.0 / (tau_sd * tau_sd);
            let mut linear = 0.0;
            for (s, st) in stats.iter().enumerate() {
                let off = given[self.layout.offset(s, k)];
                precision += off * off * st.q / st.sigma2;
                linear += off * (st.p - st.q * bg) / st.sigma2;
            }
            let var = 1.0 / precision;
            return self.rng.sample_trunc_norm(linear * var, var.sqrt(), 0.0);
        }

        let tau_off = self.priors.beta_subject_offset;
        let log_target = move |sd: f64| -> f64 {
            if !(sd > 0.0) {
                return f64::NEG_INFINITY;
            }
            let c = (sd * tau_off).powi(2);
            let mut lp = half_normal_ln_pdf(sd, tau_sd) + sd.ln();
            for st in &stats {
                if st.q == 0.0 {
                    continue;
                }
                let w = st.p - bg * st.q;
                let denom = st.sigma2 + c * st.q;
                lp += -0.5 * (denom / st.sigma2).ln() + 0.5 * c * w * w / (st.sigma2 * denom);
            }
            lp
        };
        let step = proposal_scale(self.layout.n_subjects());
        log_scale_metropolis(
            &mut self.rng,
            current,
            step,
            self.metropolis_steps,
            log_target,
        )
    }

    fn sample_offset(&mut self, given: &[f64], s: usize, k: usize) -> f64 {
        let tau = self.priors.beta_subject_offset;
        let st = self.subject_column_stats(given, s, k);
        let bg = given[self.layout.beta_group(k)];
        let sd = given[self.layout.group_sd(k)];
        let precision = 1.0 / (tau * tau) + sd * sd * st.q / st.sigma2;
        let linear = sd * (st.p - st.q * bg) / st.sigma2;
        self.draw_normal(precision, linear)
    }

    fn sample_eps(&mut self, given: &[f64], s: usize) -> f64 {
        let rows = self.data.subject_rows(s);
        let n_s = rows.len() as f64;
        let ss: f64 = rows
            .iter()
            .map(|&i| self.residual(given, i, None).powi(2))
            .sum();
        let tau = self.priors.eps;
        let current = given[self.layout.eps(s)];

        // ln p(eps | rest) on the log scale, up to a constant (Jacobian included).
        let log_target = move |eps: f64| -> f64 {
            if !(eps > 0.0) {
                return f64::NEG_INFINITY;
            }
            half_normal_ln_pdf(eps, tau) - n_s * eps.ln() - 0.5 * ss / (eps * eps) + eps.ln()
        };
        let step = proposal_scale(rows.len());
        log_scale_metropolis(
            &mut self.rng,
            current,
            step,
            self.metropolis_steps,
            log_target,
        )
    }
}

impl<R> Conditional<f64> for HierarchicalConditional<R>
where
    R: SeedableRng + Rng + Clone + Send + Sync,
{
    /// Sample coordinate `i` of the state from its conditional distribution.
    ///
    /// The coordinate is decoded with [`ParameterLayout::kind`]; see the module
    /// documentation for the update used for each kind.
    fn sample(&mut self, i: usize, given: &[f64]) -> f64 {
        if i == 0 {
            self.mix_state(given);
        }
        match self.layout.kind(i) {
            Some(ParameterKind::BetaGroup { k }) => self.sample_beta_group(given, k),
            Some(ParameterKind::GroupSd { k }) => self.sample_group_sd(given, k),
            Some(ParameterKind::BetaSubjectOffset { s, k }) => self.sample_offset(given, s, k),
            Some(ParameterKind::Eps { s }) => self.sample_eps(given, s),
            None => given[i],
        }
    }
}

/// Seed handed to `mini-mcmc`, which adds the chain index to it without
/// wrapping. Clearing the top bit keeps `seed + chain` in range for any seed.
fn engine_seed(seed: u64) -> u64 {
    seed & (u64::MAX >> 1)
}

/// Random-walk step on the log scale for a scale parameter informed by `count`
/// observations (or subjects): roughly 2.4 posterior standard deviations.
fn proposal_scale(count: usize) -> f64 {
    2.4 / (2.0 * (count as f64 + 1.0)).sqrt()
}

/// Random-walk Metropolis on `ln x` for a positive parameter.
///
/// `log_target` must already include the `ln x` Jacobian of the log transform.
/// Proposals whose target is not finite are rejected.
fn log_scale_metropolis<R, F>(
    rng: &mut R,
    current: f64,
    step: f64,
    steps: usize,
    log_target: F,
) -> f64
where
    R: Rng + ?Sized,
    F: Fn(f64) -> f64,
{
    let mut value = current;
    let mut lp = log_target(value);
    for _ in 0..steps {
        let proposal = (value.ln() + step * rng.sample_norm()).exp();
        let lp_proposal = log_target(proposal);
        let log_alpha = lp_proposal - lp;
        if log_alpha >= 0.0 || rng.sample_unif().ln() < log_alpha {
            value = proposal;
            lp = lp_proposal;
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};

    fn two_subjects() -> ObservationSet {
        ObservationSet::new(
            4,
            1,
            2,
            array![1.0, 1.2, 3.0, 3.2],
            array![[1.0], [1.0], [1.0], [1.0]],
            vec![1, 1, 2, 2],
        )
        .unwrap()
    }

    fn conditional(collapsed: bool) -> HierarchicalConditional<ChaCha8Rng> {
        let model = HierarchicalModel::new(two_subjects(), PriorScales::default()).unwrap();
        HierarchicalConditional::new(&model, ChaCha8Rng::seed_from_u64(1), 4, collapsed)
    }

    #[test]
    fn rejects_bad_run_settings() {
        assert!(matches!(
            HierarchicalRegression::new(two_subjects(), PriorScales::default(), 0, 1),
            Err(ModelError::InvalidChainCount)
        ));
        let model = HierarchicalRegression::new(two_subjects(), PriorScales::default(), 1, 1)
            .unwrap();
        assert!(matches!(model.run(10, 0), Err(ModelError::InvalidSampleCount)));

        let empty = ObservationSet::new(0, 0, 0, Array1::zeros(0), Array2::zeros((0, 0)), vec![])
            .unwrap();
        let model = HierarchicalRegression::new(empty, PriorScales::default(), 1, 1).unwrap();
        assert!(matches!(model.run(10, 10), Err(ModelError::EmptyModel)));
    }

    #[test]
    fn accepts_seeds_at_the_top_of_the_range() {
        assert_eq!(engine_seed(u64::MAX), u64::MAX >> 1);
        assert_eq!(engine_seed(42), 42);

        let results = HierarchicalRegression::new(two_subjects(), PriorScales::default(), 3, u64::MAX)
            .unwrap()
            .run(5, 5)
            .unwrap();
        assert_eq!(results.samples.shape(), &[3, 5, 6]);
    }

    #[test]
    fn initial_states_are_dispersed_and_positive_where_bounded() {
        let model = HierarchicalRegression::new(two_subjects(), PriorScales::default(), 3, 9)
            .unwrap();
        let layout = model.model().layout();
        let init = model.initial_states();
        assert_eq!(init.len(), 3);
        assert_ne!(init[0], init[1]);
        for state in &init {
            assert_eq!(state.len(), layout.dim());
            assert!(state[layout.group_sd(0)] > 0.0);
            assert!(state[layout.eps(0)] > 0.0 && state[layout.eps(1)] > 0.0);
            assert!(state.iter().all(|v| v.abs() < 2.0_f64.exp() + 1e-12));
        }
    }

    #[test]
    fn column_stats_use_partial_residuals() {
        let cond = conditional(true);
        let layout = cond.layout;
        let mut given = vec![0.0; layout.dim()];
        given[layout.beta_group(0)] = 1.0;
        given[layout.group_sd(0)] = 0.5;
        given[layout.offset(1, 0)] = 2.0;
        given[layout.eps(0)] = 0.5;
        given[layout.eps(1)] = 2.0;

        let st = cond.subject_column_stats(&given, 1, 0);
        assert_abs_diff_eq!(st.q, 2.0);
        assert_abs_diff_eq!(st.p, 3.0 + 3.2);
        assert_abs_diff_eq!(st.sigma2, 4.0);
        assert_abs_diff_eq!(cond.residual(&given, 2, None), 3.0 - 2.0);
    }

    #[test]
    fn offset_conditional_reverts_to_prior_when_spread_is_zero() {
        let mut cond = conditional(true);
        let layout = cond.layout;
        let mut given = vec![1.0; layout.dim()];
        given[layout.group_sd(0)] = 0.0;
        let draws: Vec<f64> = (0..20_000).map(|_| cond.sample_offset(&given, 0, 0)).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!(mean.abs() < 0.1, "mean = {mean}");
        assert!((var.sqrt() - 2.5).abs() < 0.1, "sd = {}", var.sqrt());
    }

    #[test]
    fn scale_updates_stay_positive() {
        for collapsed in [true, false] {
            let mut cond = conditional(collapsed);
            let layout = cond.layout;
            let mut given = vec![0.5; layout.dim()];
            for _ in 0..500 {
                for i in 0..layout.dim() {
                    given[i] = cond.sample(i, &given);
                }
                assert!(given[layout.group_sd(0)] >= 0.0);
                assert!(given[layout.eps(0)] > 0.0 && given[layout.eps(1)] > 0.0);
                assert!(given.iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn metropolis_targets_the_given_density() {
        // Log-normal(0, 0.5) target on x, expressed on the log scale.
        let log_target = |x: f64| {
            if x > 0.0 {
                -0.5 * (x.ln() / 0.5).powi(2)
            } else {
                f64::NEG_INFINITY
            }
        };
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut x = 1.0;
        let logs: Vec<f64> = (0..20_000)
            .map(|_| {
                x = log_scale_metropolis(&mut rng, x, 0.8, 1, log_target);
                x.ln()
            })
            .collect();
        let mean = logs.iter().sum::<f64>() / logs.len() as f64;
        let sd = (logs.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / logs.len() as f64).sqrt();
        assert!(mean.abs() < 0.05, "mean = {mean}");
        assert!((sd - 0.5).abs() < 0.05, "sd = {sd}");
    }
}
