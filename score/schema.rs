//! # Schema Introspection
//!
//! Classifies every reference column as numeric or categorical, once, when the
//! reference table is loaded. The resulting [`FeatureSchema`] drives input validation,
//! imputation defaults and the shape of the preprocessing pipeline, so no request ever
//! re-infers column types from data.

use crate::types::{FeatureValue, ReferenceDataset};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failures establishing the canonical schema. All of these indicate a problem with the
/// reference data itself, never with a user's record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error(
        "The label column '{0}' was not found in the reference table. Please check spelling and case."
    )]
    MissingLabel(String),
    #[error(
        "Column '{0}' contains no non-missing values, so no default or input range can be established."
    )]
    EmptyColumn(String),
    #[error("Column '{0}' appears more than once in the reference table.")]
    DuplicateColumn(String),
    #[error("Column '{column}' has {found} values, but the table has {expected} rows.")]
    RaggedColumn {
        column: String,
        found: usize,
        expected: usize,
    },
    #[error("Row {row} has {found} cells, but the header declares {expected} columns.")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Row {row} has label '{value}', but labels must be 0 (control) or 1 (case).")]
    InvalidLabel { row: usize, value: String },
    #[error("The reference table has no feature columns besides the label.")]
    NoFeatures,
}

/// Observed range of a numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Whole-number input (the age column); only affects the input control.
    pub integer: bool,
}

impl NumericSummary {
    /// Clamps a value into the observed range. Used for display only; the normalizer
    /// forwards the user's value unclamped.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelCount {
    pub level: String,
    pub count: usize,
}

/// Observed levels of a categorical column, sorted by level name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoricalSummary {
    levels: Vec<LevelCount>,
}

impl CategoricalSummary {
    fn from_counts(counts: BTreeMap<String, usize>) -> Self {
        Self {
            levels: counts
                .into_iter()
                .map(|(level, count)| LevelCount { level, count })
                .collect(),
        }
    }

    pub fn contains(&self, level: &str) -> bool {
        self.levels
            .binary_search_by(|entry| entry.level.as_str().cmp(level))
            .is_ok()
    }

    pub fn levels(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().map(|entry| entry.level.as_str())
    }

    pub fn counts(&self) -> &[LevelCount] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// The modal level. Ties go to the lexicographically smallest level.
    ///
    /// Read from the level counts recorded when the schema was built. A schema belongs to
    /// exactly one reference table and is rebuilt whenever that table is reloaded, so the
    /// result always equals the mode of the current reference column.
    pub fn most_frequent(&self) -> &str {
        let mut best: Option<&LevelCount> = None;
        for entry in &self.levels {
            if best.is_none_or(|b| entry.count > b.count) {
                best = Some(entry);
            }
        }
        best.map_or("", |entry| entry.level.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FeatureKind {
    Numeric(NumericSummary),
    Categorical(CategoricalSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

/// A presentation control derived from the schema: a slider per numeric feature and a
/// select box per categorical feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "control", rename_all = "lowercase")]
pub enum InputControl {
    Slider {
        feature: String,
        min: f64,
        max: f64,
        default: f64,
        integer: bool,
    },
    Select {
        feature: String,
        options: Vec<String>,
        default: String,
    },
}

/// The canonical, ordered feature schema of a reference table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSchema {
    label: String,
    features: Vec<FeatureSpec>,
}

/// Convenience wrapper around [`FeatureSchema::build`].
pub fn build_schema(reference: &ReferenceDataset) -> Result<FeatureSchema, SchemaError> {
    FeatureSchema::build(reference)
}

impl FeatureSchema {
    pub fn build(reference: &ReferenceDataset) -> Result<Self, SchemaError> {
        if !reference.has_label() {
            return Err(SchemaError::MissingLabel(
                reference.label_column().to_string(),
            ));
        }

        let mut features = Vec::new();
        for name in reference.feature_names() {
            // feature_names only yields existing columns
            let values = reference.column(name).unwrap_or(&[]);
            let kind = introspect_column(name, values)?;
            log::debug!("Schema: column '{name}' classified as {}", kind_label(&kind));
            features.push(FeatureSpec {
                name: name.to_string(),
                kind,
            });
        }

        if features.is_empty() {
            return Err(SchemaError::NoFeatures);
        }

        Ok(Self {
            label: reference.label_column().to_string(),
            features,
        })
    }

    pub fn label_column(&self) -> &str {
        &self.label
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Looks a feature up ignoring ASCII case. Configuration files name clinical fields
    /// loosely ("age" vs "Age").
    pub fn find_ignore_case(&self, name: &str) -> Option<&FeatureSpec> {
        self.get(name).or_else(|| {
            self.features
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn input_controls(&self) -> Vec<InputControl> {
        self.features
            .iter()
            .map(|spec| match &spec.kind {
                FeatureKind::Numeric(summary) if summary.integer => InputControl::Slider {
                    feature: spec.name.clone(),
                    min: summary.min.trunc(),
                    max: summary.max.trunc(),
                    default: summary.mean.round(),
                    integer: true,
                },
                FeatureKind::Numeric(summary) => InputControl::Slider {
                    feature: spec.name.clone(),
                    min: summary.min,
                    max: summary.max,
                    default: summary.mean,
                    integer: false,
                },
                FeatureKind::Categorical(levels) => InputControl::Select {
                    feature: spec.name.clone(),
                    options: levels.levels().map(str::to_string).collect(),
                    default: levels.most_frequent().to_string(),
                },
            })
            .collect()
    }
}

fn kind_label(kind: &FeatureKind) -> &'static str {
    match kind {
        FeatureKind::Numeric(_) => "numeric",
        FeatureKind::Categorical(_) => "categorical",
    }
}

/// A column is numeric when every non-missing cell is a number; a single text cell makes
/// the whole column categorical.
fn introspect_column(name: &str, values: &[FeatureValue]) -> Result<FeatureKind, SchemaError> {
    let all_numeric = values
        .iter()
        .all(|v| matches!(v, FeatureValue::Number(_) | FeatureValue::Missing));

    if all_numeric {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;
        for v in values.iter().filter_map(FeatureValue::as_number) {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            count += 1;
        }
        if count == 0 {
            return Err(SchemaError::EmptyColumn(name.to_string()));
        }
        return Ok(FeatureKind::Numeric(NumericSummary {
            min,
            max,
            mean: sum / count as f64,
            integer: name.eq_ignore_ascii_case("age"),
        }));
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for level in values.iter().filter_map(FeatureValue::category_label) {
        *counts.entry(level).or_insert(0) += 1;
    }
    if counts.is_empty() {
        return Err(SchemaError::EmptyColumn(name.to_string()));
    }
    Ok(FeatureKind::Categorical(CategoricalSummary::from_counts(
        counts,
    )))
}
