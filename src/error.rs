//! Error types.

use thiserror::Error;

/// Errors raised while validating inputs or running the hierarchical model.
///
/// Every validation variant is produced before any inference step runs.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("measure has {found} entries but n = {n}")]
    MeasureLength { n: usize, found: usize },
    #[error("design matrix is {rows}x{cols} but n = {n}, m = {m}")]
    DesignShape {
        n: usize,
        m: usize,
        rows: usize,
        cols: usize,
    },
    #[error("subj_idx has {found} entries but n = {n}")]
    SubjectIndexLength { n: usize, found: usize },
    #[error("subj_idx[{position}] = {index} is outside [1, {n_subjects}]")]
    SubjectIndexOutOfRange {
        position: usize,
        index: usize,
        n_subjects: usize,
    },
    #[error("measure[{position}] is not finite ({value})")]
    NonFiniteMeasure { position: usize, value: f64 },
    #[error("X[{row}, {col}] is not finite ({value})")]
    NonFiniteDesign { row: usize, col: usize, value: f64 },
    #[error("prior scale `{name}` must be finite and > 0, got {value}")]
    InvalidPriorScale { name: &'static str, value: f64 },
    #[error("at least one chain is required")]
    InvalidChainCount,
    #[error("number of retained samples must be positive")]
    InvalidSampleCount,
    #[error("expected {expected} parameter values, got {found}")]
    ParameterLength { expected: usize, found: usize },
    #[error("model has no parameters (m = 0 and j = 0)")]
    EmptyModel,
    #[error("invalid simulation settings: {0}")]
    InvalidSimulation(String),
    #[error("sampler failed: {0}")]
    Sampler(String),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Errors raised while building a response basis.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BasisError {
    #[error("interval end ({end}) must be greater than start ({start})")]
    EmptyInterval { start: f64, end: f64 },
    #[error("sample frequency must be finite and > 0, got {0}")]
    InvalidFrequency(f64),
    #[error("{basis} basis requires at least one regressor")]
    NoRegressors { basis: &'static str },
    #[error("expected {expected} coefficients, got {found}")]
    CoefficientLength { expected: usize, found: usize },
}
