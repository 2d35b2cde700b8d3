//! Validated observation table.
//!
//! An [`ObservationSet`] is the flat data contract consumed by the model:
//! `n` measurements, an `n`×`m` design matrix and a one-based subject index per
//! measurement. The only way to build one is [`ObservationSet::new`], so every
//! set in circulation already satisfies the shape and range invariants.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::ModelError;

/// Measurements, design matrix and subject membership for one analysis.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    measure: Array1<f64>,
    x: Array2<f64>,
    /// Zero-based subject of each observation.
    subject: Vec<usize>,
    /// Observation rows belonging to each subject.
    rows_by_subject: Vec<Vec<usize>>,
}

impl ObservationSet {
    /// Validate and store an observation table.
    ///
    /// # Arguments
    /// * `n` - Number of observations
    /// * `m` - Number of predictors (columns of `x`)
    /// * `j` - Number of subjects
    /// * `measure` - Length-`n` measurements
    /// * `x` - `n`×`m` design matrix
    /// * `subj_idx` - Length-`n` one-based subject indices, each in `[1, j]`
    ///
    /// # Errors
    /// Returns a [`ModelError`] describing the first violated invariant: a length
    /// or shape that disagrees with `n`/`m`, a subject index outside `[1, j]`, or
    /// a non-finite entry in `measure` or `x`.
    ///
    /// # Example
    /// ```
    /// use ndarray::array;
    /// use hierarchical_deconv::ObservationSet;
    ///
    /// let data = ObservationSet::new(
    ///     4, 1, 2,
    ///     array![1.0, 1.2, 3.0, 3.2],
    ///     array![[1.0], [1.0], [1.0], [1.0]],
    ///     vec![1, 1, 2, 2],
    /// ).unwrap();
    /// assert_eq!(data.n_subjects(), 2);
    ///
    /// let bad = ObservationSet::new(
    ///     2, 1, 1,
    ///     array![1.0, 2.0],
    ///     array![[1.0], [1.0]],
    ///     vec![1, 2],
    /// );
    /// assert!(bad.is_err());
    /// ```
    pub fn new(
        n: usize,
        m: usize,
        j: usize,
        measure: Array1<f64>,
        x: Array2<f64>,
        subj_idx: Vec<usize>,
    ) -> Result<Self, ModelError> {
        if measure.len() != n {
            return Err(ModelError::MeasureLength {
                n,
                found: measure.len(),
            });
        }
        if x.nrows() != n || x.ncols() != m {
            return Err(ModelError::DesignShape {
                n,
                m,
                rows: x.nrows(),
                cols: x.ncols(),
            });
        }
        if subj_idx.len() != n {
            return Err(ModelError::SubjectIndexLength {
                n,
                found: subj_idx.len(),
            });
        }
        if let Some((position, &index)) = subj_idx
            .iter()
            .enumerate()
            .find(|&(_, &s)| s == 0 || s > j)
        {
            return Err(ModelError::SubjectIndexOutOfRange {
                position,
                index,
                n_subjects: j,
            });
        }
        if let Some((position, &value)) = measure.iter().enumerate().find(|(_, v)| !v.is_finite())
        {
            return Err(ModelError::NonFiniteMeasure { position, value });
        }
        if let Some(((row, col), &value)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ModelError::NonFiniteDesign { row, col, value });
        }

        let subject: Vec<usize> = subj_idx.iter().map(|&s| s - 1).collect();
        let mut rows_by_subject = vec![Vec::new(); j];
        for (row, &s) in subject.iter().enumerate() {
            rows_by_subject[s].push(row);
        }
        debug!(n, m, j, "validated observation set");

        Ok(Self {
            measure,
            x,
            subject,
            rows_by_subject,
        })
    }

    /// Number of observations `n`.
    pub fn n_observations(&self) -> usize {
        self.measure.len()
    }

    /// Number of predictors `m`.
    pub fn n_predictors(&self) -> usize {
        self.x.ncols()
    }

    /// Number of subjects `j`.
    pub fn n_subjects(&self) -> usize {
        self.rows_by_subject.len()
    }

    pub fn measure(&self) -> ArrayView1<'_, f64> {
        self.measure.view()
    }

    pub fn design(&self) -> ArrayView2<'_, f64> {
        self.x.view()
    }

    /// Zero-based subject of every observation, in row order.
    pub fn subjects(&self) -> &[usize] {
        &self.subject
    }

    /// Rows of the observation table that belong to subject `s` (zero-based).
    pub fn subject_rows(&self, s: usize) -> &[usize] {
        &self.rows_by_subject[s]
    }
}
