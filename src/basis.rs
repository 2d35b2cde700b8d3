//! Response basis sets for deconvolution designs.
//!
//! A [`ResponseBasis`] describes an event's response over a time window as a
//! linear combination of regressors. Its matrix `L` (regressors × timepoints)
//! turns one row of fitted coefficients, for example one row of
//! `beta_subject`, into a response time course.
//!
//! - [`BasisSet::Fir`]: one regressor per timepoint (`L` is the identity).
//! - [`BasisSet::Fourier`]: a constant row followed by `√2·sin` and `√2·cos`
//!   rows with 1, 2, ... periods over the window.
//! - [`BasisSet::Legendre`]: Legendre polynomials `P_0, P_1, ...` on `[-1, 1]`.
//!
//! Fourier and Legendre sets always have an odd number of regressors; an even
//! request is rounded up.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::f64::consts::{PI, SQRT_2};
use std::fmt;

use crate::BasisError;

/// Slack for floating-point interval arithmetic when counting timepoints.
const TIMEPOINT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasisSet {
    Fir,
    Fourier,
    Legendre,
}

impl BasisSet {
    pub fn name(&self) -> &'static str {
        match self {
            BasisSet::Fir => "fir",
            BasisSet::Fourier => "fourier",
            BasisSet::Legendre => "legendre",
        }
    }
}

impl fmt::Display for BasisSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A basis evaluated on a regular grid of timepoints.
#[derive(Debug, Clone)]
pub struct ResponseBasis {
    basis: BasisSet,
    timepoints: Array1<f64>,
    labels: Vec<String>,
    /// `n_regressors × n_timepoints`
    matrix: Array2<f64>,
}

impl ResponseBasis {
    /// Build a basis over `[interval.0, interval.1)` sampled at `sample_frequency` Hz.
    ///
    /// # Arguments
    /// * `basis` - Which basis set to build
    /// * `interval` - Start and end of the response window, in seconds
    /// * `sample_frequency` - Samples per second
    /// * `n_regressors` - Requested regressor count; ignored for FIR, whose
    ///   count is `(interval.1 - interval.0) × sample_frequency`
    ///
    /// # Errors
    /// Returns a [`BasisError`] if the interval is empty, the frequency is not
    /// positive, or the window holds no FIR regressor.
    pub fn new(
        basis: BasisSet,
        interval: (f64, f64),
        sample_frequency: f64,
        n_regressors: usize,
    ) -> Result<Self, BasisError> {
        let (start, end) = interval;
        if !(start.is_finite() && end.is_finite() && end > start) {
            return Err(BasisError::EmptyInterval { start, end });
        }
        if !(sample_frequency.is_finite() && sample_frequency > 0.0) {
            return Err(BasisError::InvalidFrequency(sample_frequency));
        }

        let span = (end - start) * sample_frequency;
        let (n_timepoints, n_regressors) = match basis {
            BasisSet::Fir => {
                let count = (span + TIMEPOINT_TOLERANCE).floor() as usize;
                (count, count)
            }
            BasisSet::Fourier | BasisSet::Legendre => {
                let count = (span - TIMEPOINT_TOLERANCE).ceil() as usize;
                (count, n_regressors | 1)
            }
        };
        if n_regressors == 0 || n_timepoints == 0 {
            return Err(BasisError::NoRegressors {
                basis: basis.name(),
            });
        }

        let timepoints =
            Array1::from_shape_fn(n_timepoints, |i| start + i as f64 / sample_frequency);
        let (matrix, labels) = match basis {
            BasisSet::Fir => (
                Array2::eye(n_regressors),
                timepoints.iter().map(|t| format!("fir_{t:.3}s")).collect(),
            ),
            BasisSet::Fourier => (
                fourier_matrix(n_regressors, n_timepoints),
                fourier_labels(n_regressors),
            ),
            BasisSet::Legendre => (
                legendre_matrix(n_regressors, n_timepoints),
                (1..=n_regressors).map(|k| format!("legendre_{k}")).collect(),
            ),
        };

        Ok(Self {
            basis,
            timepoints,
            labels,
            matrix,
        })
    }

    pub fn basis(&self) -> BasisSet {
        self.basis
    }

    pub fn n_regressors(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn timepoints(&self) -> ArrayView1<'_, f64> {
        self.timepoints.view()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The `n_regressors × n_timepoints` basis matrix.
    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    /// Response time course `Σ_r betas[r] · L[r, ·]`.
    ///
    /// # Errors
    /// Returns [`BasisError::CoefficientLength`] if `betas` does not have one
    /// entry per regressor.
    pub fn timecourse(&self, betas: ArrayView1<'_, f64>) -> Result<Array1<f64>, BasisError> {
        self.check_length(betas.len())?;
        Ok(betas.dot(&self.matrix))
    }

    /// Row-wise [`ResponseBasis::timecourse`] for a coefficient matrix such as
    /// `beta_subject` (one row per subject).
    ///
    /// # Errors
    /// Returns [`BasisError::CoefficientLength`] if the column count is wrong.
    pub fn timecourses(&self, betas: ArrayView2<'_, f64>) -> Result<Array2<f64>, BasisError> {
        self.check_length(betas.ncols())?;
        Ok(betas.dot(&self.matrix))
    }

    fn check_length(&self, found: usize) -> Result<(), BasisError> {
        if found == self.n_regressors() {
            Ok(())
        } else {
            Err(BasisError::CoefficientLength {
                expected: self.n_regressors(),
                found,
            })
        }
    }
}

/// `n` evenly spaced points from `lo` to `hi` inclusive (`[lo]` when `n == 1`).
fn linspace(lo: f64, hi: f64, n: usize) -> Array1<f64> {
    if n == 1 {
        Array1::from_elem(1, lo)
    } else {
        Array1::linspace(lo, hi, n)
    }
}

fn fourier_matrix(n_regressors: usize, n_timepoints: usize) -> Array2<f64> {
    let half = n_regressors / 2;
    let mut matrix = Array2::zeros((n_regressors, n_timepoints));
    matrix.row_mut(0).fill(1.0);
    for r in 0..half {
        let x = linspace(0.0, 2.0 * PI * (r + 1) as f64, n_timepoints);
        matrix.row_mut(1 + r).assign(&x.mapv(|v| SQRT_2 * v.sin()));
        matrix.row_mut(1 + r + half).assign(&x.mapv(|v| SQRT_2 * v.cos()));
    }
    matrix
}

fn fourier_labels(n_regressors: usize) -> Vec<String> {
    let half = n_regressors / 2;
    std::iter::once("fourier_intercept".to_string())
        .chain((1..=half).map(|p| format!("fourier_sin_{p}_period")))
        .chain((1..=half).map(|p| format!("fourier_cos_{p}_period")))
        .collect()
}

/// Rows `P_0 .. P_{n-1}` via `(k+1) P_{k+1} = (2k+1) x P_k - k P_{k-1}`.
fn legendre_matrix(n_regressors: usize, n_timepoints: usize) -> Array2<f64> {
    let x = linspace(-1.0, 1.0, n_timepoints);
    let mut matrix = Array2::zeros((n_regressors, n_timepoints));
    matrix.row_mut(0).fill(1.0);
    if n_regressors > 1 {
        matrix.row_mut(1).assign(&x);
    }
    for k in 1..n_regressors.saturating_sub(1) {
        let kf = k as f64;
        let next = (&matrix.row(k) * &x * (2.0 * kf + 1.0) - &matrix.row(k - 1) * kf) / (kf + 1.0);
        matrix.row_mut(k + 1).assign(&next);
    }
    matrix
}
