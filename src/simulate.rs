//! Synthetic multi-subject experiments with known ground truth.
//!
//! Every subject's coefficient for predictor `k` is drawn from
//! `N(group_mean[k], group_sd[k])`; measurements are `X[i] · beta_subject[s]`
//! plus Gaussian noise with scale `noise_sd` (1.0 by default). The first design
//! column is an intercept of ones unless disabled; the others are standard normal.
//!
//! This is a regression-level simulator. It draws i.i.d. standard-normal
//! predictors and does not model event onsets or their convolution with a
//! haemodynamic response kernel, so it does not reproduce an fMRI time series.
//! To get response-shaped designs, build the columns from a
//! [`crate::basis::ResponseBasis`] yourself.

use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::rng::RngDraw;
use crate::{ModelError, ObservationSet};

/// Settings for [`Simulation::simulate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub n_subjects: usize,
    pub observations_per_subject: usize,
    /// Population mean of each coefficient (length `m`).
    pub group_mean: Array1<f64>,
    /// Spread of subject coefficients (length `m`, non-negative).
    pub group_sd: Array1<f64>,
    /// Residual standard deviation shared by all subjects.
    pub noise_sd: f64,
    /// Whether column 0 of the design is an intercept.
    pub intercept: bool,
}

/// A simulated data set and the values that generated it.
#[derive(Debug, Clone)]
pub struct SimulatedExperiment {
    pub data: ObservationSet,
    /// True subject coefficients (`j`×`m`).
    pub beta_subject: Array2<f64>,
    /// True noise scale of each subject.
    pub eps: Array1<f64>,
}

/// Draws belonging to one subject.
struct SubjectDraw {
    beta: Vec<f64>,
    design: Vec<f64>,
    measure: Vec<f64>,
}

impl Simulation {
    /// Unit noise and an intercept column.
    pub fn new(
        n_subjects: usize,
        observations_per_subject: usize,
        group_mean: Array1<f64>,
        group_sd: Array1<f64>,
    ) -> Self {
        Self {
            n_subjects,
            observations_per_subject,
            group_mean,
            group_sd,
            noise_sd: 1.0,
            intercept: true,
        }
    }

    pub fn with_noise_sd(mut self, noise_sd: f64) -> Self {
        self.noise_sd = noise_sd;
        self
    }

    pub fn with_intercept(mut self, intercept: bool) -> Self {
        self.intercept = intercept;
        self
    }

    fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidSimulation(msg));
        if self.n_subjects == 0 || self.observations_per_subject == 0 {
            return invalid("need at least one subject and one observation per subject".into());
        }
        if self.group_mean.is_empty() {
            return invalid("need at least one predictor".into());
        }
        if self.group_mean.len() != self.group_sd.len() {
            return invalid(format!(
                "group_mean has {} entries but group_sd has {}",
                self.group_mean.len(),
                self.group_sd.len()
            ));
        }
        if self.group_mean.iter().any(|v| !v.is_finite()) {
            return invalid("group_mean must be finite".into());
        }
        if self.group_sd.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return invalid("group_sd must be finite and >= 0".into());
        }
        if !(self.noise_sd.is_finite() && self.noise_sd > 0.0) {
            return invalid(format!("noise_sd must be finite and > 0, got {}", self.noise_sd));
        }
        Ok(())
    }

    fn draw_subject(&self, seed: u64) -> SubjectDraw {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let m = self.group_mean.len();
        let beta: Vec<f64> = self
            .group_mean
            .iter()
            .zip(&self.group_sd)
            .map(|(&mu, &sd)| mu + sd * rng.sample_norm())
            .collect();

        let mut design = Vec::with_capacity(self.observations_per_subject * m);
        let mut measure = Vec::with_capacity(self.observations_per_subject);
        for _ in 0..self.observations_per_subject {
            let row: Vec<f64> = (0..m)
                .map(|k| {
                    if k == 0 && self.intercept {
                        1.0
                    } else {
                        rng.sample_norm()
                    }
                })
                .collect();
            let mean: f64 = row.iter().zip(&beta).map(|(x, b)| x * b).sum();
            measure.push(mean + self.noise_sd * rng.sample_norm());
            design.extend(row);
        }
        SubjectDraw {
            beta,
            design,
            measure,
        }
    }

    /// Simulate one experiment. Subject `s` draws from its own stream seeded
    /// with `seed + s`, so the output does not depend on the `rayon` feature.
    ///
    /// # Errors
    /// Returns [`ModelError::InvalidSimulation`] for inconsistent settings.
    pub fn simulate(&self, seed: u64) -> Result<SimulatedExperiment, ModelError> {
        self.validate()?;
        let j = self.n_subjects;
        let m = self.group_mean.len();
        let per_subject = self.observations_per_subject;
        let n = j * per_subject;

        #[cfg(feature = "rayon")]
        let draws: Vec<SubjectDraw> = (0..j)
            .into_par_iter()
            .map(|s| self.draw_subject(seed.wrapping_add(s as u64)))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let draws: Vec<SubjectDraw> = (0..j)
            .map(|s| self.draw_subject(seed.wrapping_add(s as u64)))
            .collect();

        let mut beta = Vec::with_capacity(j * m);
        let mut design = Vec::with_capacity(n * m);
        let mut measure = Vec::with_capacity(n);
        for draw in draws {
            beta.extend(draw.beta);
            design.extend(draw.design);
            measure.extend(draw.measure);
        }
        let subj_idx: Vec<usize> = (1..=j)
            .flat_map(|s| std::iter::repeat_n(s, per_subject))
            .collect();

        let data = ObservationSet::new(
            n,
            m,
            j,
            Array1::from(measure),
            Array2::from_shape_vec((n, m), design)?,
            subj_idx,
        )?;
        debug!(n, m, j, seed, "simulated experiment");

        Ok(SimulatedExperiment {
            data,
            beta_subject: Array2::from_shape_vec((j, m), beta)?,
            eps: Array1::from_elem(j, self.noise_sd),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn settings() -> Simulation {
        Simulation::new(6, 30, array![1.0, -2.0], array![0.5, 0.0])
    }

    #[test]
    fn same_seed_same_experiment() {
        let a = settings().simulate(17).unwrap();
        let b = settings().simulate(17).unwrap();
        let c = settings().simulate(18).unwrap();
        assert_eq!(a.data.measure(), b.data.measure());
        assert_eq!(a.beta_subject, b.beta_subject);
        assert_ne!(a.data.measure(), c.data.measure());
    }

    #[test]
    fn layout_follows_settings() {
        let sim = settings().simulate(3).unwrap();
        assert_eq!(sim.data.n_observations(), 180);
        assert_eq!(sim.data.n_predictors(), 2);
        assert_eq!(sim.data.n_subjects(), 6);
        assert_eq!(sim.data.subject_rows(2).len(), 30);
        assert!(sim.data.design().column(0).iter().all(|&v| v == 1.0));
        assert_eq!(sim.eps, Array1::from_elem(6, 1.0));
        // Zero spread pins the coefficient to its group mean.
        assert!(sim.beta_subject.column(1).iter().all(|&v| v == -2.0));
    }

    #[test]
    fn noiseless_limit_reproduces_linear_predictor() {
        let sim = settings()
            .with_noise_sd(1e-12)
            .with_intercept(false)
            .simulate(5)
            .unwrap();
        let data = &sim.data;
        for i in 0..data.n_observations() {
            let s = data.subjects()[i];
            let mean = data.design().row(i).dot(&sim.beta_subject.row(s));
            assert!((data.measure()[i] - mean).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let bad = [
            Simulation::new(0, 5, array![1.0], array![1.0]),
            Simulation::new(2, 5, array![1.0], array![1.0, 2.0]),
            Simulation::new(2, 5, array![1.0], array![-1.0]),
            Simulation::new(2, 5, array![1.0], array![1.0]).with_noise_sd(0.0),
        ];
        for sim in bad {
            assert!(matches!(
                sim.simulate(1),
                Err(ModelError::InvalidSimulation(_))
            ));
        }
    }
}
