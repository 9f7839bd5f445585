use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_linalg::{Eigh, UPLO};
use serde::Serialize;
use thiserror::Error;

/// Eigenvalues at or below this fraction of the total variance count as zero.
pub const EIGENVALUE_EPSILON: f64 = 1.0e-9;
/// The map is always two-dimensional.
pub const N_COMPONENTS: usize = 2;
pub const MIN_REFERENCE_SAMPLES: usize = 2;

/// Why a two-axis map cannot be drawn from the data at hand.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Insufficiency {
    #[error("at least {required} reference records are required, but only {found} are available")]
    TooFewRecords { found: usize, required: usize },
    #[error("axis {axis} captures no variance (eigenvalue {eigenvalue:.3e})")]
    ZeroVariance { axis: usize, eigenvalue: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("Not enough data to build the population map: {0}.")]
    InsufficientData(#[from] Insufficiency),
    #[error("Received {found} population tags for {expected} reference records.")]
    TagCount { found: usize, expected: usize },
    #[error("Vectors of width {found} cannot be projected by a map fitted on width {expected}.")]
    DimensionMismatch { found: usize, expected: usize },
    #[error("Eigendecomposition of the covariance matrix failed: {0}")]
    Eigen(String),
}

/// A fitted two-component principal axis model.
#[derive(Debug, Clone, Serialize)]
pub struct PcaModel {
    mean: Array1<f64>,
    /// One column per axis, `width x 2`.
    components: Array2<f64>,
    explained_variance: [f64; N_COMPONENTS],
}

impl PcaModel {
    /// Fits the top two principal axes of `data` (rows are samples).
    ///
    /// Uses a dense symmetric eigendecomposition of the sample covariance, so the result
    /// is fully deterministic. Each axis is oriented so its largest-magnitude loading is
    /// positive.
    pub fn fit(data: ArrayView2<f64>) -> Result<Self, ProjectionError> {
        let n_samples = data.nrows();
        let too_few = || Insufficiency::TooFewRecords {
            found: n_samples,
            required: MIN_REFERENCE_SAMPLES,
        };
        if n_samples < MIN_REFERENCE_SAMPLES {
            return Err(too_few().into());
        }
        let mean = data.mean_axis(Axis(0)).ok_or_else(too_few)?;

        let centered = &data - &mean;
        let covariance = centered.t().dot(&centered) / (n_samples - 1) as f64;

        let (eigenvalues, eigenvectors) = covariance
            .eigh(UPLO::Upper)
            .map_err(|e| ProjectionError::Eigen(e.to_string()))?;

        // Eigenvalues come back ascending; tiny negatives are rounding noise.
        let total: f64 = eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let threshold = EIGENVALUE_EPSILON * total.max(1.0);
        let width = eigenvalues.len();

        let mut components = Array2::zeros((width, N_COMPONENTS));
        let mut explained_variance = [0.0; N_COMPONENTS];
        for axis in 0..N_COMPONENTS {
            let eigenvalue = if axis < width {
                eigenvalues[width - 1 - axis]
            } else {
                0.0
            };
            if eigenvalue <= threshold {
                return Err(Insufficiency::ZeroVariance {
                    axis: axis + 1,
                    eigenvalue,
                }
                .into());
            }

            let mut loading = eigenvectors.column(width - 1 - axis).to_owned();
            let pivot = loading
                .iter()
                .copied()
                .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if pivot < 0.0 {
                loading.mapv_inplace(|v| -v);
            }
            components.column_mut(axis).assign(&loading);
            explained_variance[axis] = eigenvalue / total * 100.0;
        }

        log::debug!(
            "PCA fit on {n_samples} samples of width {width}: axes explain {:.1}% and {:.1}%",
            explained_variance[0],
            explained_variance[1]
        );

        Ok(Self {
            mean,
            components,
            explained_variance,
        })
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    /// Percent of total variance on each axis.
    pub fn explained_variance(&self) -> [f64; N_COMPONENTS] {
        self.explained_variance
    }

    /// Scores of each row of `data`, `n x 2`.
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, ProjectionError> {
        if data.ncols() != self.width() {
            return Err(ProjectionError::DimensionMismatch {
                found: data.ncols(),
                expected: self.width(),
            });
        }
        Ok((&data - &self.mean).dot(&self.components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn axes_follow_the_dominant_directions() {
        // Variance is concentrated on the first coordinate, then the second.
        let data = array![
            [-4.0, 1.0, 0.0],
            [4.0, -1.0, 0.0],
            [-2.0, -1.0, 0.5],
            [2.0, 1.0, -0.5],
        ];
        let model = PcaModel::fit(data.view()).unwrap();
        let components = model.components();
        assert!(components[[0, 0]].abs() > 0.9);
        assert!(components[[0, 0]] > 0.0);
        let [first, second] = model.explained_variance();
        assert!(first > second);
        assert!(first + second <= 100.0 + 1e-9);
    }

    #[test]
    fn axes_are_orthonormal() {
        let data = array![
            [1.0, 2.0, 0.5],
            [3.0, 0.0, 1.5],
            [0.0, 1.0, 2.0],
            [2.0, 4.0, 0.0],
            [5.0, 1.0, 1.0],
        ];
        let model = PcaModel::fit(data.view()).unwrap();
        let gram = model.components().t().dot(model.components());
        assert_abs_diff_eq!(gram[[0, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(gram[[1, 1]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(gram[[0, 1]], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn scores_are_centred() {
        let data = array![[1.0, 0.0], [0.0, 2.0], [3.0, 1.0], [2.0, 5.0]];
        let model = PcaModel::fit(data.view()).unwrap();
        let scores = model.transform(data.view()).unwrap();
        for axis in 0..N_COMPONENTS {
            assert_abs_diff_eq!(scores.column(axis).sum(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn a_single_sample_is_insufficient() {
        let err = PcaModel::fit(array![[1.0, 2.0]].view()).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::InsufficientData(Insufficiency::TooFewRecords {
                found: 1,
                required: 2
            })
        );
    }

    #[test]
    fn collinear_data_has_no_second_axis() {
        let data = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        match PcaModel::fit(data.view()).unwrap_err() {
            ProjectionError::InsufficientData(Insufficiency::ZeroVariance { axis, .. }) => {
                assert_eq!(axis, 2)
            }
            other => panic!("Expected ZeroVariance, got {other:?}"),
        }
    }
}
