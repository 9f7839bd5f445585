//! # File Input and Output
//!
//! Reads the reference table (delimited text, via `polars`) and the subject record
//! (a TOML table), and writes assessment reports as TOML. No validation beyond
//! well-formedness happens here; schema checks belong to the introspector and the
//! normalizer.

use crate::schema::SchemaError;
use crate::types::{FeatureValue, InputRecord, ReferenceDataset, boolean_label};
use polars::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::path::Path;
use thiserror::Error;

/// Cell text treated as missing in addition to empty cells.
pub const MISSING_MARKER: &str = "NA";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The reference table is malformed: {0}")]
    Schema(#[from] SchemaError),
    #[error("Failed to parse TOML record file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Column '{column}' has type {found_type}, which is neither numeric, text nor boolean."
    )]
    UnsupportedColumnType { column: String, found_type: String },
    #[error(
        "Field '{feature}' in the record file is a {found_type}; use a number, a string or a boolean."
    )]
    UnsupportedRecordValue { feature: String, found_type: String },
}

/// Loads the reference table. Text and boolean columns become categorical; every other
/// column is read as numeric.
pub fn load_reference_dataset(
    path: &str,
    label_column: &str,
    separator: u8,
) -> Result<ReferenceDataset, DataError> {
    println!("Loading reference data from '{path}'");

    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(separator)
                        .with_null_values(Some(NullValues::AllColumnsSingle(
                            MISSING_MARKER.into(),
                        ))),
                ),
        )
        .finish()?;

    println!(
        "Successfully loaded {} rows and {} columns.",
        df.height(),
        df.width()
    );

    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        let name = column.name().to_string();
        let values = extract_column(&name, column.as_materialized_series())?;
        columns.push((name, values));
    }

    let reference = ReferenceDataset::from_columns(label_column, columns)?;
    log::info!(
        "Reference table: {} rows, {} feature columns, label '{}'",
        reference.n_rows(),
        reference.feature_names().count(),
        label_column
    );
    Ok(reference)
}

fn extract_column(name: &str, series: &Series) -> Result<Vec<FeatureValue>, DataError> {
    let values = match series.dtype() {
        DataType::String => series
            .str()?
            .into_iter()
            .map(|cell| match cell.map(str::trim) {
                None | Some("") => FeatureValue::Missing,
                Some(text) => FeatureValue::Category(text.to_string()),
            })
            .collect(),
        DataType::Boolean => series
            .bool()?
            .into_iter()
            .map(|cell| match cell {
                None => FeatureValue::Missing,
                Some(flag) => FeatureValue::Category(boolean_label(flag).to_string()),
            })
            .collect(),
        other => {
            let casted = series.cast(&DataType::Float64).map_err(|_| {
                DataError::UnsupportedColumnType {
                    column: name.to_string(),
                    found_type: format!("{other:?}"),
                }
            })?;
            casted
                .f64()?
                .into_iter()
                .map(|cell| match cell {
                    Some(v) if v.is_finite() => FeatureValue::Number(v),
                    _ => FeatureValue::Missing,
                })
                .collect()
        }
    };
    Ok(values)
}

/// Loads a subject record from a TOML table of `name = value` pairs.
///
/// Numbers are taken as numbers and strings as given (the normalizer parses numeric text).
/// Booleans become the labels `"true"` and `"false"`, matching boolean reference columns;
/// against a numeric feature they read as 1 and 0. An empty string or `"NA"` marks the
/// value as missing.
pub fn load_input_record(path: &str) -> Result<InputRecord, DataError> {
    let text = fs::read_to_string(path)?;
    parse_input_record(&text)
}

pub fn parse_input_record(text: &str) -> Result<InputRecord, DataError> {
    let table: toml::Table = toml::from_str(text)?;
    let mut record = InputRecord::new();
    for (feature, value) in table {
        let value = match value {
            toml::Value::Integer(v) => FeatureValue::Number(v as f64),
            toml::Value::Float(v) => FeatureValue::Number(v),
            toml::Value::Boolean(flag) => FeatureValue::Category(boolean_label(flag).to_string()),
            toml::Value::String(s) if s.trim().is_empty() || s.trim() == MISSING_MARKER => {
                FeatureValue::Missing
            }
            toml::Value::String(s) => FeatureValue::Category(s),
            other => {
                return Err(DataError::UnsupportedRecordValue {
                    feature,
                    found_type: other.type_str().to_string(),
                });
            }
        };
        record.insert(feature, value);
    }
    Ok(record)
}

/// Renders any report as pretty TOML.
pub fn render_report<T: Serialize>(report: &T) -> Result<String, DataError> {
    Ok(toml::to_string_pretty(report)?)
}

pub fn write_report<T: Serialize>(path: &str, report: &T) -> Result<(), DataError> {
    fs::write(path, render_report(report)?)?;
    log::info!("Report written to '{path}'");
    Ok(())
}
