//! Model parameters and their flat layout.
//!
//! The sampled state is non-centred: `beta_group`, `group_sd` and the raw
//! `beta_subject_offset` table are the random quantities, and the subject-level
//! coefficients are always derived from them with [`Parameters::beta_subject`].

use ndarray::{Array1, Array2};

use crate::ModelError;

/// One value of every sampled model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Residual standard deviation of each subject (length `j`, non-negative).
    pub eps: Array1<f64>,
    /// Population-mean regression weights (length `m`).
    pub beta_group: Array1<f64>,
    /// Raw per-subject deviations (`j`×`m`).
    pub beta_subject_offset: Array2<f64>,
    /// Spread of subject coefficients around `beta_group` (length `m`, non-negative).
    pub group_sd: Array1<f64>,
}

impl Parameters {
    /// All-zero parameters for `m` predictors and `j` subjects.
    pub fn zeros(m: usize, j: usize) -> Self {
        Self {
            eps: Array1::zeros(j),
            beta_group: Array1::zeros(m),
            beta_subject_offset: Array2::zeros((j, m)),
            group_sd: Array1::zeros(m),
        }
    }

    pub fn n_predictors(&self) -> usize {
        self.beta_group.len()
    }

    pub fn n_subjects(&self) -> usize {
        self.eps.len()
    }

    /// Subject-level coefficients: row `s` is `beta_group + group_sd ⊙ beta_subject_offset[s]`.
    ///
    /// # Example
    /// ```
    /// use ndarray::array;
    /// use hierarchical_deconv::Parameters;
    ///
    /// let params = Parameters {
    ///     eps: array![1.0, 1.0],
    ///     beta_group: array![2.0],
    ///     beta_subject_offset: array![[-1.0], [0.5]],
    ///     group_sd: array![0.5],
    /// };
    /// assert_eq!(params.beta_subject(), array![[1.5], [2.25]]);
    /// ```
    pub fn beta_subject(&self) -> Array2<f64> {
        let mut beta = self.beta_subject_offset.clone();
        for mut row in beta.rows_mut() {
            row.zip_mut_with(&self.group_sd, |off, &sd| *off *= sd);
            row.zip_mut_with(&self.beta_group, |scaled, &bg| *scaled = bg + *scaled);
        }
        beta
    }
}

/// Which model parameter a flat index refers to (zero-based positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    BetaGroup { k: usize },
    GroupSd { k: usize },
    BetaSubjectOffset { s: usize, k: usize },
    Eps { s: usize },
}

/// Mapping between [`Parameters`] and the flat state vector driven by the sampler.
///
/// The state is laid out one predictor column at a time:
/// `[beta_group[k], group_sd[k], beta_subject_offset[0..j, k]]` for every `k`,
/// followed by `eps[0..j]`. Keeping a column's terms contiguous lets a single
/// Gibbs sweep update them as a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    m: usize,
    j: usize,
}

impl ParameterLayout {
    pub fn new(m: usize, j: usize) -> Self {
        Self { m, j }
    }

    pub fn n_predictors(&self) -> usize {
        self.m
    }

    pub fn n_subjects(&self) -> usize {
        self.j
    }

    /// Total number of sampled scalars: `2m + j·m + j`.
    pub fn dim(&self) -> usize {
        self.m * self.block_len() + self.j
    }

    #[inline]
    fn block_len(&self) -> usize {
        2 + self.j
    }

    #[inline]
    pub fn beta_group(&self, k: usize) -> usize {
        k * self.block_len()
    }

    #[inline]
    pub fn group_sd(&self, k: usize) -> usize {
        k * self.block_len() + 1
    }

    #[inline]
    pub fn offset(&self, s: usize, k: usize) -> usize {
        k * self.block_len() + 2 + s
    }

    #[inline]
    pub fn eps(&self, s: usize) -> usize {
        self.m * self.block_len() + s
    }

    /// Decode a flat index. Returns `None` past the end of the state.
    pub fn kind(&self, index: usize) -> Option<ParameterKind> {
        let columns_end = self.m * self.block_len();
        if index < columns_end {
            let k = index / self.block_len();
            Some(match index % self.block_len() {
                0 => ParameterKind::BetaGroup { k },
                1 => ParameterKind::GroupSd { k },
                r => ParameterKind::BetaSubjectOffset { s: r - 2, k },
            })
        } else if index < self.dim() {
            Some(ParameterKind::Eps {
                s: index - columns_end,
            })
        } else {
            None
        }
    }

    /// Stan-style one-based names in flat order, e.g. `beta_subject_offset[2,1]`.
    pub fn parameter_names(&self) -> Vec<String> {
        (0..self.dim())
            .filter_map(|i| self.kind(i))
            .map(|kind| match kind {
                ParameterKind::BetaGroup { k } => format!("beta_group[{}]", k + 1),
                ParameterKind::GroupSd { k } => format!("group_sd[{}]", k + 1),
                ParameterKind::BetaSubjectOffset { s, k } => {
                    format!("beta_subject_offset[{},{}]", s + 1, k + 1)
                }
                ParameterKind::Eps { s } => format!("eps[{}]", s + 1),
            })
            .collect()
    }

    /// Flat index of a named parameter.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameter_names().iter().position(|n| n == name)
    }

    /// Names of the derived subject coefficients, row-major (`beta_subject[s,k]`).
    pub fn derived_names(&self) -> Vec<String> {
        (0..self.j)
            .flat_map(|s| (0..self.m).map(move |k| format!("beta_subject[{},{}]", s + 1, k + 1)))
            .collect()
    }

    /// Flatten parameters into sampler order.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `params` does not match this layout.
    pub fn pack(&self, params: &Parameters) -> Result<Vec<f64>, ModelError> {
        self.check_shape(params)?;
        let mut flat = vec![0.0; self.dim()];
        for k in 0..self.m {
            flat[self.beta_group(k)] = params.beta_group[k];
            flat[self.group_sd(k)] = params.group_sd[k];
            for s in 0..self.j {
                flat[self.offset(s, k)] = params.beta_subject_offset[[s, k]];
            }
        }
        for s in 0..self.j {
            flat[self.eps(s)] = params.eps[s];
        }
        Ok(flat)
    }

    /// Rebuild parameters from a flat state vector.
    ///
    /// # Errors
    /// Returns [`ModelError::ParameterLength`] if `flat.len() != self.dim()`.
    pub fn unpack(&self, flat: &[f64]) -> Result<Parameters, ModelError> {
        if flat.len() != self.dim() {
            return Err(ModelError::ParameterLength {
                expected: self.dim(),
                found: flat.len(),
            });
        }
        Ok(Parameters {
            eps: Array1::from_shape_fn(self.j, |s| flat[self.eps(s)]),
            beta_group: Array1::from_shape_fn(self.m, |k| flat[self.beta_group(k)]),
            beta_subject_offset: Array2::from_shape_fn((self.j, self.m), |(s, k)| {
                flat[self.offset(s, k)]
            }),
            group_sd: Array1::from_shape_fn(self.m, |k| flat[self.group_sd(k)]),
        })
    }

    pub(crate) fn check_shape(&self, params: &Parameters) -> Result<(), ModelError> {
        let found = params.eps.len()
            + params.beta_group.len()
            + params.beta_subject_offset.len()
            + params.group_sd.len();
        let consistent = params.eps.len() == self.j
            && params.beta_group.len() == self.m
            && params.group_sd.len() == self.m
            && params.beta_subject_offset.dim() == (self.j, self.m);
        if consistent {
            Ok(())
        } else {
            Err(ModelError::ParameterLength {
                expected: self.dim(),
                found,
            })
        }
    }
}
