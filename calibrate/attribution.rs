//! Global feature attribution for linear classifiers.
//!
//! The magnitude of every encoded coefficient is summed back onto the schema feature that
//! produced it, so a one-hot block counts once. The top features are then normalized to
//! percentages of their combined mass. The ranking describes the model, not the
//! individual subject.

use crate::calibrate::model::Classifier;
use crate::pipeline::FittedPipeline;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttributionError {
    #[error("The classifier does not expose linear coefficients, so no feature attribution is available.")]
    UnsupportedModel,
    #[error(
        "The classifier has {found} coefficients, but the preprocessing pipeline emits {expected} encoded features."
    )]
    CoefficientShape { found: usize, expected: usize },
}

/// Share of the ranked features' coefficient magnitude owed to one schema feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureWeight {
    pub feature: String,
    /// Percentage of the total, in `[0, 100]`.
    pub weight: f64,
}

/// The top features by weight, descending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionRanking {
    pub features: Vec<FeatureWeight>,
}

impl AttributionRanking {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.features.iter().map(|f| f.weight).sum()
    }
}

/// Ranks schema features by absolute coefficient mass and reports the top `k` as
/// percentages of the mass they jointly carry, so the ranking always sums to 100.
///
/// `k` is clamped to the number of schema features and `k = 0` yields an empty ranking.
/// Equal weights keep schema order. When the selected coefficients are all zero the
/// weight is split evenly over them.
pub fn top_features<C: Classifier + ?Sized>(
    classifier: &C,
    pipeline: &FittedPipeline,
    k: usize,
) -> Result<AttributionRanking, AttributionError> {
    let coefficients = classifier
        .coefficients()
        .ok_or(AttributionError::UnsupportedModel)?;
    let encoded = pipeline.encoded_columns();
    if coefficients.len() != encoded.len() {
        return Err(AttributionError::CoefficientShape {
            found: coefficients.len(),
            expected: encoded.len(),
        });
    }

    let names = pipeline.feature_names();
    let mut mass: Vec<f64> = vec![0.0; names.len()];
    for (column, coefficient) in encoded.iter().zip(coefficients.iter()) {
        mass[column.source] += coefficient.abs();
    }

    let mut order: Vec<usize> = (0..names.len()).collect();
    // Stable sort, so ties keep schema order.
    order.sort_by(|&a, &b| mass[b].total_cmp(&mass[a]));
    order.truncate(k.min(names.len()));

    // Percentages are relative to the selected features only.
    let selected: f64 = order.iter().map(|&idx| mass[idx]).sum();
    if selected <= 0.0 && !order.is_empty() {
        log::warn!("Selected coefficients are all zero; attribution is split evenly.");
    }
    let share = |idx: usize| {
        if selected > 0.0 {
            mass[idx] / selected * 100.0
        } else {
            100.0 / order.len() as f64
        }
    };

    let features = order
        .iter()
        .map(|&idx| FeatureWeight {
            feature: names[idx].clone(),
            weight: share(idx),
        })
        .collect();

    Ok(AttributionRanking { features })
}
