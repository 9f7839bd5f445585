//! # Record Normalization
//!
//! Validates a raw [`InputRecord`] against the [`FeatureSchema`] and returns a
//! [`NormalizedRecord`]: one value per schema feature, in schema order, with every
//! missing value imputed.
//!
//! - Numeric values are forwarded exactly as supplied. Clamping to the observed range is
//!   a display concern handled by [`NumericSummary::clamp`]. Only an explicit missing
//!   value is imputed; NaN and infinities are rejected. Boolean labels read as 1 and 0.
//! - Categorical values must be levels the reference table has actually seen.
//! - Failures are user-correctable and always name the offending field.

use crate::schema::{FeatureKind, FeatureSchema, NumericSummary};
use crate::types::{BOOLEAN_FALSE, BOOLEAN_TRUE, FeatureValue, InputRecord};
use serde::Serialize;
use thiserror::Error;

/// User-correctable problems with a submitted record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("The required feature '{feature}' is absent from the record.")]
    MissingFeature { feature: String },
    #[error(
        "Feature '{feature}' has value '{value}', which never occurs in the reference data. Choose one of the observed categories."
    )]
    UnknownCategory { feature: String, value: String },
    #[error("Feature '{feature}' is not part of the reference schema.")]
    UnexpectedFeature { feature: String },
    #[error("Feature '{feature}' expects a number, but '{value}' could not be parsed as one.")]
    InvalidNumber { feature: String, value: String },
}

impl InputError {
    /// The field the user needs to correct.
    pub fn feature(&self) -> &str {
        match self {
            Self::MissingFeature { feature }
            | Self::UnknownCategory { feature, .. }
            | Self::UnexpectedFeature { feature }
            | Self::InvalidNumber { feature, .. } => feature,
        }
    }
}

/// A validated record: exactly one non-missing value per schema feature, schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    entries: Vec<(String, FeatureValue)>,
}

impl NormalizedRecord {
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Numeric value of a feature, matching the name without regard to ASCII case.
    pub fn number_ignore_case(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.as_number())
    }

    /// Values in schema order.
    pub fn values(&self) -> impl Iterator<Item = &FeatureValue> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The record as shown to the user: numeric values clamped into the observed range.
    pub fn display_values(&self, schema: &FeatureSchema) -> Vec<DisplayValue> {
        self.entries
            .iter()
            .zip(schema.features())
            .map(|((name, value), spec)| {
                let shown = match (&spec.kind, value) {
                    (FeatureKind::Numeric(summary), FeatureValue::Number(v)) => {
                        summary.clamp(*v).to_string()
                    }
                    _ => value.to_string(),
                };
                DisplayValue {
                    feature: name.clone(),
                    value: shown,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayValue {
    pub feature: String,
    pub value: String,
}

/// Validates and imputes a raw record.
pub fn normalize(raw: &InputRecord, schema: &FeatureSchema) -> Result<NormalizedRecord, InputError> {
    if let Some(extra) = raw.keys().find(|key| schema.get(key).is_none()) {
        return Err(InputError::UnexpectedFeature {
            feature: extra.to_string(),
        });
    }

    let mut entries = Vec::with_capacity(schema.len());
    for spec in schema.features() {
        let value = raw.get(&spec.name).ok_or_else(|| InputError::MissingFeature {
            feature: spec.name.clone(),
        })?;

        let normalized = match &spec.kind {
            FeatureKind::Numeric(summary) => normalize_numeric(&spec.name, value, summary)?,
            FeatureKind::Categorical(levels) => match value.category_label() {
                None if !value.is_missing() => {
                    return Err(InputError::UnknownCategory {
                        feature: spec.name.clone(),
                        value: value.to_string(),
                    });
                }
                None => {
                    let mode = levels.most_frequent();
                    log::debug!("Imputing '{}' with most frequent level '{mode}'", spec.name);
                    FeatureValue::Category(mode.to_string())
                }
                Some(level) if levels.contains(&level) => FeatureValue::Category(level),
                Some(level) => {
                    return Err(InputError::UnknownCategory {
                        feature: spec.name.clone(),
                        value: level,
                    });
                }
            },
        };
        entries.push((spec.name.clone(), normalized));
    }

    Ok(NormalizedRecord { entries })
}

fn normalize_numeric(
    name: &str,
    value: &FeatureValue,
    summary: &NumericSummary,
) -> Result<FeatureValue, InputError> {
    let invalid = |value: String| InputError::InvalidNumber {
        feature: name.to_string(),
        value,
    };
    let number = match value {
        FeatureValue::Missing => {
            log::debug!("Imputing '{name}' with reference mean {:.4}", summary.mean);
            summary.mean
        }
        FeatureValue::Number(v) if v.is_finite() => *v,
        FeatureValue::Number(v) => return Err(invalid(v.to_string())),
        FeatureValue::Category(text) => match text.trim() {
            BOOLEAN_TRUE => 1.0,
            BOOLEAN_FALSE => 0.0,
            trimmed => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| invalid(text.clone()))?,
        },
    };
    Ok(FeatureValue::Number(number))
}
