//! Coronary heart disease risk inference and explanation.
//!
//! A reference case/control table is introspected into a [`schema::FeatureSchema`], a
//! preprocessing pipeline is fitted on it once, and each subject record is then scored by
//! a [`calibrate::model::Classifier`], placed on a two-axis population map, explained by
//! a coefficient attribution and turned into a risk age with recommendations.
//! [`engine::InferenceContext`] ties the pieces together.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod config;
pub mod derived;
pub mod engine;
pub mod io;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod types;

#[path = "../map/mod.rs"]
pub mod map;

#[path = "../calibrate/mod.rs"]
pub mod calibrate;

pub use engine::{Assessment, AssessmentError, ErrorCategory, InferenceContext, Section};
pub use types::{FeatureValue, InputRecord, ReferenceDataset};
