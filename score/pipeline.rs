// ========================================================================================
//
//                            The Preprocessing Pipeline
//
// ========================================================================================
//
// Turns schema-ordered clinical values into the fixed-width numeric embedding consumed by
// the classifier and the population projector. The pipeline is fit once from the
// reference population and then reused for every transform; nothing here mutates after
// `fit` returns.
//
// Output layout (the contract the classifier's coefficient order relies on):
//   [ numeric columns, schema order | one-hot block per categorical column, schema order ]
// Each one-hot block has one slot per observed level (sorted) plus a trailing "other"
// slot, so an unseen level never changes the width.

use crate::normalize::NormalizedRecord;
use crate::schema::{FeatureKind, FeatureSchema};
use crate::types::{FeatureValue, ReferenceDataset};
use ndarray::{Array1, Array2, ArrayViewMut1};
use serde::Serialize;
use thiserror::Error;

/// Standard deviations below this are treated as zero and the column is only centred.
pub const SCALE_EPSILON: f64 = 1.0e-12;
/// Name suffix of the catch-all one-hot slot.
pub const OTHER_LEVEL: &str = "<other>";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Row {row} has {found} values, but the fitted pipeline expects {expected}.")]
    RowWidth {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Reference column '{0}' is declared in the schema but absent from the table.")]
    ColumnNotFound(String),
}

/// How one source feature is embedded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnTransform {
    /// Mean-impute, then `(x - mean) / scale`.
    Standardize { mean: f64, scale: f64 },
    /// Mode-impute, then one-hot over `levels` plus the trailing other slot.
    OneHot { levels: Vec<String>, fill: String },
}

/// One output dimension and the schema feature it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedColumn {
    pub name: String,
    pub source: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct FittedColumn {
    source: usize,
    offset: usize,
    transform: ColumnTransform,
}

/// A pipeline whose statistics have been fixed from the reference population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedPipeline {
    feature_names: Vec<String>,
    columns: Vec<FittedColumn>,
    encoded: Vec<EncodedColumn>,
}

impl FittedPipeline {
    /// Fits imputation, scaling and encoding statistics over the reference rows only.
    pub fn fit(reference: &ReferenceDataset, schema: &FeatureSchema) -> Result<Self, PipelineError> {
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        for (source, spec) in schema.features().iter().enumerate() {
            let values = reference
                .column(&spec.name)
                .ok_or_else(|| PipelineError::ColumnNotFound(spec.name.clone()))?;
            match &spec.kind {
                FeatureKind::Numeric(_) => numeric.push((source, fit_standardize(values))),
                FeatureKind::Categorical(levels) => {
                    let transform = ColumnTransform::OneHot {
                        levels: levels.levels().map(str::to_string).collect(),
                        fill: levels.most_frequent().to_string(),
                    };
                    categorical.push((source, transform));
                }
            }
        }

        let mut columns = Vec::with_capacity(schema.len());
        let mut encoded = Vec::new();
        for (source, transform) in numeric.into_iter().chain(categorical) {
            let name = &schema.features()[source].name;
            let offset = encoded.len();
            match &transform {
                ColumnTransform::Standardize { .. } => encoded.push(EncodedColumn {
                    name: name.clone(),
                    source,
                }),
                ColumnTransform::OneHot { levels, .. } => {
                    for level in levels.iter().map(String::as_str).chain([OTHER_LEVEL]) {
                        encoded.push(EncodedColumn {
                            name: format!("{name}={level}"),
                            source,
                        });
                    }
                }
            }
            columns.push(FittedColumn {
                source,
                offset,
                transform,
            });
        }

        log::info!(
            "Fitted preprocessing pipeline: {} source features -> {} encoded dimensions",
            schema.len(),
            encoded.len()
        );

        Ok(Self {
            feature_names: schema.features().iter().map(|f| f.name.clone()).collect(),
            columns,
            encoded,
        })
    }

    /// Width of every vector this pipeline produces.
    pub fn width(&self) -> usize {
        self.encoded.len()
    }

    pub fn encoded_columns(&self) -> &[EncodedColumn] {
        &self.encoded
    }

    pub fn encoded_names(&self) -> Vec<String> {
        self.encoded.iter().map(|c| c.name.clone()).collect()
    }

    /// Schema feature names, indexed by `EncodedColumn::source`.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// The fitted transform of the schema feature at position `source`.
    pub fn transform_for(&self, source: usize) -> Option<&ColumnTransform> {
        self.columns
            .iter()
            .find(|c| c.source == source)
            .map(|c| &c.transform)
    }

    /// Embeds one schema-ordered row. Missing cells are imputed with the fitted statistics.
    pub fn transform_row(&self, row: &[FeatureValue]) -> Result<Array1<f64>, PipelineError> {
        let mut out = Array1::zeros(self.width());
        self.transform_row_into(0, row, out.view_mut())?;
        Ok(out)
    }

    /// Embeds a batch of validated records, one output row per record.
    pub fn transform(&self, records: &[NormalizedRecord]) -> Result<Array2<f64>, PipelineError> {
        let mut out = Array2::zeros((records.len(), self.width()));
        for (idx, record) in records.iter().enumerate() {
            let row: Vec<FeatureValue> = record.values().cloned().collect();
            self.transform_row_into(idx, &row, out.row_mut(idx))?;
        }
        Ok(out)
    }

    /// Embeds the reference population itself, in table row order.
    pub fn transform_reference(
        &self,
        reference: &ReferenceDataset,
    ) -> Result<Array2<f64>, PipelineError> {
        let columns: Vec<&[FeatureValue]> = self
            .feature_names
            .iter()
            .map(|name| {
                reference
                    .column(name)
                    .ok_or_else(|| PipelineError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        let n = reference.n_rows();
        let mut out = Array2::zeros((n, self.width()));
        let mut row = Vec::with_capacity(columns.len());
        for idx in 0..n {
            row.clear();
            row.extend(columns.iter().map(|column| column[idx].clone()));
            self.transform_row_into(idx, &row, out.row_mut(idx))?;
        }
        Ok(out)
    }

    fn transform_row_into(
        &self,
        row_idx: usize,
        row: &[FeatureValue],
        mut out: ArrayViewMut1<f64>,
    ) -> Result<(), PipelineError> {
        if row.len() != self.feature_names.len() {
            return Err(PipelineError::RowWidth {
                row: row_idx + 1,
                found: row.len(),
                expected: self.feature_names.len(),
            });
        }

        for column in &self.columns {
            let value = &row[column.source];
            match &column.transform {
                ColumnTransform::Standardize { mean, scale } => {
                    let x = value.as_number().unwrap_or(*mean);
                    out[column.offset] = (x - mean) / scale;
                }
                ColumnTransform::OneHot { levels, fill } => {
                    let level = value.category_label().unwrap_or_else(|| fill.clone());
                    let slot = levels
                        .binary_search(&level)
                        .unwrap_or(levels.len());
                    out[column.offset + slot] = 1.0;
                }
            }
        }
        Ok(())
    }
}

/// Mean over present values; scale is the population standard deviation of the column
/// after mean imputation.
fn fit_standardize(values: &[FeatureValue]) -> ColumnTransform {
    let present: Vec<f64> = values.iter().filter_map(FeatureValue::as_number).collect();
    let mean = if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    };
    let sum_sq: f64 = present.iter().map(|v| (v - mean).powi(2)).sum();
    let variance = if values.is_empty() {
        0.0
    } else {
        sum_sq / values.len() as f64
    };
    let std = variance.sqrt();
    let scale = if std > SCALE_EPSILON { std } else { 1.0 };
    ColumnTransform::Standardize { mean, scale }
}
