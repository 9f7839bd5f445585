// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// Types shared between the schema, normalizer, pipeline and engine live here. Types used
// by a single file stay in that file.

use crate::schema::SchemaError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

/// Default name of the binary outcome column in the reference table.
pub const DEFAULT_LABEL_COLUMN: &str = "Target";

/// Category labels for boolean cells, shared by the table and record loaders.
pub const BOOLEAN_TRUE: &str = "true";
pub const BOOLEAN_FALSE: &str = "false";

pub(crate) fn boolean_label(flag: bool) -> &'static str {
    if flag { BOOLEAN_TRUE } else { BOOLEAN_FALSE }
}

/// A single cell of a clinical record.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    Missing,
}

impl FeatureValue {
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// The numeric payload, if this value is a finite number.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Renders the value as a category label. Integral numbers drop their fractional part
    /// so `1.0` and `1` name the same level.
    pub fn category_label(&self) -> Option<String> {
        match self {
            Self::Number(v) if v.is_finite() => Some(format_level(*v)),
            Self::Number(_) | Self::Missing => None,
            Self::Category(s) => Some(s.clone()),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Category(s) => f.write_str(s),
            Self::Missing => f.write_str("NA"),
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Category(value.to_string())
    }
}

pub(crate) fn format_level(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// Population membership of a point in the comparison space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PopulationTag {
    Control,
    Case,
    Subject,
}

impl PopulationTag {
    pub fn from_label(label: u8) -> Option<Self> {
        match label {
            0 => Some(Self::Control),
            1 => Some(Self::Case),
            _ => None,
        }
    }
}

impl fmt::Display for PopulationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Case => f.write_str("case"),
            Self::Subject => f.write_str("subject"),
        }
    }
}

/// One assessment request: feature name to raw value. Keys are unique by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRecord {
    values: BTreeMap<String, FeatureValue>,
}

impl InputRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Inserts a value, returning the previous one for that feature if any.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FeatureValue>,
    ) -> Option<FeatureValue> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FeatureValue> {
        self.values.iter()
    }
}

/// Row counts shown next to the reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub features: usize,
    pub cases: usize,
    pub controls: usize,
}

/// The immutable historical case/control table.
///
/// Stored column-major. Column order is the canonical feature order; the label column
/// is kept alongside the features and only interpreted when labels are requested, so a
/// table without its label can still be constructed and is rejected at schema time.
#[derive(Debug, Clone)]
pub struct ReferenceDataset {
    label: String,
    names: Vec<String>,
    columns: Vec<Vec<FeatureValue>>,
    n_rows: usize,
}

impl ReferenceDataset {
    /// Builds a table from named columns. All columns must have the same length and
    /// names must be unique.
    pub fn from_columns(
        label: impl Into<String>,
        columns: Vec<(String, Vec<FeatureValue>)>,
    ) -> Result<Self, SchemaError> {
        let n_rows = columns.first().map_or(0, |(_, values)| values.len());
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if names.contains(&name) {
                return Err(SchemaError::DuplicateColumn(name));
            }
            if values.len() != n_rows {
                return Err(SchemaError::RaggedColumn {
                    column: name,
                    found: values.len(),
                    expected: n_rows,
                });
            }
            names.push(name);
            data.push(values);
        }
        Ok(Self {
            label: label.into(),
            names,
            columns: data,
            n_rows,
        })
    }

    /// Builds a table from row-major data under the given header.
    pub fn from_rows(
        label: impl Into<String>,
        header: Vec<String>,
        rows: Vec<Vec<FeatureValue>>,
    ) -> Result<Self, SchemaError> {
        let mut columns: Vec<(String, Vec<FeatureValue>)> = header
            .into_iter()
            .map(|name| (name, Vec::with_capacity(rows.len())))
            .collect();
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(SchemaError::RaggedRow {
                    row: row_idx + 1,
                    found: row.len(),
                    expected: columns.len(),
                });
            }
            for (column, value) in columns.iter_mut().zip(row) {
                column.1.push(value);
            }
        }
        Self::from_columns(label, columns)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn label_column(&self) -> &str {
        &self.label
    }

    pub fn has_label(&self) -> bool {
        self.names.iter().any(|n| n == &self.label)
    }

    /// Feature column names in canonical order, excluding the label.
    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(move |name| *name != self.label)
    }

    pub fn column(&self, name: &str) -> Option<&[FeatureValue]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    /// Case/control tag of every row, read from the label column.
    pub fn tags(&self) -> Result<Vec<PopulationTag>, SchemaError> {
        let labels = self
            .column(&self.label)
            .ok_or_else(|| SchemaError::MissingLabel(self.label.clone()))?;
        labels
            .iter()
            .enumerate()
            .map(|(row, value)| {
                value
                    .as_number()
                    .filter(|v| v.fract() == 0.0 && (0.0..=1.0).contains(v))
                    .and_then(|v| PopulationTag::from_label(v as u8))
                    .ok_or_else(|| SchemaError::InvalidLabel {
                        row: row + 1,
                        value: value.to_string(),
                    })
            })
            .collect()
    }

    pub fn summary(&self) -> Result<DatasetSummary, SchemaError> {
        let tags = self.tags()?;
        let cases = tags.iter().filter(|t| **t == PopulationTag::Case).count();
        Ok(DatasetSummary {
            rows: self.n_rows,
            features: self.feature_names().count(),
            cases,
            controls: tags.len() - cases,
        })
    }
}
