//! # Derived Metrics
//!
//! Turns a risk assessment into the figures a subject actually reads: a "risk age" and a
//! list of lifestyle recommendations. All of it is declarative policy; nothing here
//! depends on the classifier's internals.

use crate::calibrate::model::{RiskAssessment, RiskLevel};
use crate::normalize::NormalizedRecord;
use crate::schema::{FeatureKind, FeatureSchema};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive range every risk age is clamped into.
pub const RISK_AGE_BOUNDS: (i64, i64) = (20, 90);

/// Category of the always-present risk-band recommendation.
pub const OVERALL_RISK_CATEGORY: &str = "Overall Risk";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error(
        "The age field '{0}' is not a numeric feature of the reference schema, so no risk age can be computed."
    )]
    MissingAgeField(String),
    #[error("The validated record carries no numeric value for the age field '{0}'.")]
    MissingAge(String),
}

/// Years added to the subject's age for a given probability of disease. Buckets are
/// closed on their lower bound.
pub fn risk_age_offset(probability_case: f64) -> i64 {
    if probability_case >= 0.70 {
        15
    } else if probability_case >= 0.50 {
        10
    } else if probability_case >= 0.30 {
        5
    } else if probability_case >= 0.20 {
        0
    } else {
        -5
    }
}

/// `clamp(round(age) + offset, 20, 90)`, for any finite age.
pub fn risk_age(age: f64, probability_case: f64) -> i64 {
    let (low, high) = RISK_AGE_BOUNDS;
    rounded_age(age)
        .saturating_add(risk_age_offset(probability_case))
        .clamp(low, high)
}

// The cast saturates at the i64 range; arithmetic on the result must saturate too.
fn rounded_age(age: f64) -> i64 {
    age.round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    AtLeast,
    Below,
    AtMost,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Above => value > threshold,
            Self::AtLeast => value >= threshold,
            Self::Below => value < threshold,
            Self::AtMost => value <= threshold,
        }
    }
}

/// `field <comparison> threshold`, evaluated on the validated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRule {
    pub field: String,
    pub comparison: Comparison,
    pub threshold: f64,
    pub category: String,
    pub message: String,
}

impl RecommendationRule {
    pub fn new(
        field: &str,
        comparison: Comparison,
        threshold: f64,
        category: &str,
        message: &str,
    ) -> Self {
        Self {
            field: field.to_string(),
            comparison,
            threshold,
            category: category.to_string(),
            message: message.to_string(),
        }
    }

    /// Fires only when the field is present in the record and numeric.
    pub fn fires(&self, record: &NormalizedRecord) -> bool {
        record
            .number_ignore_case(&self.field)
            .is_some_and(|value| self.comparison.holds(value, self.threshold))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub category: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedMetrics {
    pub risk_age: i64,
    pub age_delta: i64,
    pub recommendations: Vec<Recommendation>,
}

/// Rules plus the name of the age field. Deserializes from the `[recommendations]`
/// table of the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationPolicy {
    pub age_field: String,
    pub rules: Vec<RecommendationRule>,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            age_field: "Age".to_string(),
            rules: vec![
                RecommendationRule::new(
                    "SystolicBP",
                    Comparison::Above,
                    130.0,
                    "Blood Pressure",
                    "Your systolic blood pressure is above 130 mmHg. Reduce salt intake, stay active, and monitor your blood pressure regularly.",
                ),
                RecommendationRule::new(
                    "Cholesterol",
                    Comparison::Above,
                    200.0,
                    "Cholesterol",
                    "Your cholesterol is above 200 mg/dL. Favour a diet low in saturated fat and discuss lipid testing with your doctor.",
                ),
                RecommendationRule::new(
                    "Age",
                    Comparison::Above,
                    50.0,
                    "Age",
                    "Cardiovascular risk rises with age. Schedule regular heart health check-ups.",
                ),
            ],
        }
    }
}

impl RecommendationPolicy {
    /// Checks the policy against the schema. The age field is required; rules on unknown
    /// fields are kept but can never fire, and are reported once here.
    pub fn validate(&self, schema: &FeatureSchema) -> Result<(), PolicyError> {
        match schema.find_ignore_case(&self.age_field) {
            Some(spec) if matches!(spec.kind, FeatureKind::Numeric(_)) => {}
            _ => return Err(PolicyError::MissingAgeField(self.age_field.clone())),
        }
        for rule in &self.rules {
            match schema.find_ignore_case(&rule.field) {
                None => log::warn!(
                    "Recommendation rule on '{}' ({}) names a field absent from the schema and will never fire.",
                    rule.field,
                    rule.category
                ),
                Some(spec) if matches!(spec.kind, FeatureKind::Categorical(_)) => log::warn!(
                    "Recommendation rule on '{}' ({}) targets a categorical field and will never fire.",
                    rule.field,
                    rule.category
                ),
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Risk age and recommendations for one subject. Every rule is evaluated
    /// independently, in order, and exactly one risk-band message closes the list.
    pub fn derive(
        &self,
        record: &NormalizedRecord,
        risk: &RiskAssessment,
    ) -> Result<DerivedMetrics, PolicyError> {
        let age = record
            .number_ignore_case(&self.age_field)
            .ok_or_else(|| PolicyError::MissingAge(self.age_field.clone()))?;
        let risk_age = risk_age(age, risk.probability_case);
        let age_delta = risk_age.saturating_sub(rounded_age(age));

        let mut recommendations: Vec<Recommendation> = self
            .rules
            .iter()
            .filter(|rule| rule.fires(record))
            .map(|rule| Recommendation {
                category: rule.category.clone(),
                message: rule.message.clone(),
            })
            .collect();
        recommendations.push(band_recommendation(risk.risk_level()));

        Ok(DerivedMetrics {
            risk_age,
            age_delta,
            recommendations,
        })
    }
}

fn band_recommendation(level: RiskLevel) -> Recommendation {
    let message = match level {
        RiskLevel::High => {
            "Your risk is high. Consult a cardiologist promptly and review your lifestyle with them."
        }
        RiskLevel::Moderate => {
            "Your risk is moderate. Consider lifestyle changes and discuss them with your doctor."
        }
        RiskLevel::Low => "Your risk is low. Keep up your healthy habits.",
    };
    Recommendation {
        category: OVERALL_RISK_CATEGORY.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::schema::build_schema;
    use crate::types::{DEFAULT_LABEL_COLUMN, InputRecord, ReferenceDataset};

    fn schema() -> FeatureSchema {
        let reference = ReferenceDataset::from_rows(
            DEFAULT_LABEL_COLUMN,
            vec![
                "Age".into(),
                "SystolicBP".into(),
                "Cholesterol".into(),
                "Target".into(),
            ],
            vec![
                vec![40.0.into(), 120.0.into(), 180.0.into(), 0.0.into()],
                vec![65.0.into(), 160.0.into(), 260.0.into(), 1.0.into()],
            ],
        )
        .unwrap();
        build_schema(&reference).unwrap()
    }

    fn record(age: f64, systolic: f64, cholesterol: f64) -> NormalizedRecord {
        let raw = InputRecord::new()
            .with("Age", age)
            .with("SystolicBP", systolic)
            .with("Cholesterol", cholesterol);
        normalize(&raw, &schema()).unwrap()
    }

    fn risk(probability_case: f64) -> RiskAssessment {
        RiskAssessment {
            predicted_label: u8::from(probability_case >= 0.5),
            probability_case,
            probability_control: 1.0 - probability_case,
        }
    }

    #[test]
    fn offset_buckets_close_on_their_lower_bound() {
        assert_eq!(risk_age_offset(0.19), -5);
        assert_eq!(risk_age_offset(0.20), 0);
        assert_eq!(risk_age_offset(0.29), 0);
        assert_eq!(risk_age_offset(0.30), 5);
        assert_eq!(risk_age_offset(0.49), 5);
        assert_eq!(risk_age_offset(0.50), 10);
        assert_eq!(risk_age_offset(0.69), 10);
        assert_eq!(risk_age_offset(0.70), 15);
        assert_eq!(risk_age_offset(1.0), 15);
    }

    #[test]
    fn risk_age_stays_within_bounds() {
        assert_eq!(risk_age(88.0, 0.9), 90);
        assert_eq!(risk_age(21.0, 0.1), 20);
        for age in [0.0, 20.0, 45.4, 45.5, 70.0, 120.0] {
            for p in [0.0, 0.2, 0.3, 0.5, 0.7, 1.0] {
                let value = risk_age(age, p);
                assert!((20..=90).contains(&value), "risk age {value} for {age}/{p}");
            }
        }
    }

    #[test]
    fn extreme_ages_saturate_instead_of_overflowing() {
        assert_eq!(risk_age(1e300, 0.9), 90);
        assert_eq!(risk_age(-1e300, 0.1), 20);
        assert_eq!(risk_age(f64::MAX, 0.1), 90);
        assert_eq!(risk_age(f64::MIN, 0.9), 20);

        let policy = RecommendationPolicy::default();
        let old = policy.derive(&record(1e300, 120.0, 180.0), &risk(0.9)).unwrap();
        assert_eq!(old.risk_age, 90);
        assert_eq!(old.age_delta, 90 - i64::MAX);

        let young = policy.derive(&record(-1e300, 120.0, 180.0), &risk(0.1)).unwrap();
        assert_eq!(young.risk_age, 20);
        assert_eq!(young.age_delta, i64::MAX);
    }

    #[test]
    fn rules_fire_independently_and_one_band_message_closes() {
        let policy = RecommendationPolicy::default();
        let derived = policy.derive(&record(55.0, 150.0, 190.0), &risk(0.72)).unwrap();
        let categories: Vec<&str> = derived
            .recommendations
            .iter()
            .map(|r| r.category.as_str())
            .collect();
        assert_eq!(categories, vec!["Blood Pressure", "Age", OVERALL_RISK_CATEGORY]);
        assert!(derived.recommendations[2].message.contains("high"));
        assert_eq!(derived.risk_age, 70);
        assert_eq!(derived.age_delta, 15);
    }

    #[test]
    fn band_message_tracks_the_probability() {
        let policy = RecommendationPolicy::default();
        for (p, word) in [(0.10, "low"), (0.30, "moderate"), (0.69, "moderate"), (0.70, "high")] {
            let derived = policy.derive(&record(45.0, 120.0, 180.0), &risk(p)).unwrap();
            assert_eq!(derived.recommendations.len(), 1);
            assert!(derived.recommendations[0].message.contains(word));
        }
    }

    #[test]
    fn rules_on_unknown_fields_never_fire() {
        let mut policy = RecommendationPolicy::default();
        policy.rules.push(RecommendationRule::new(
            "Glucose",
            Comparison::AtLeast,
            0.0,
            "Diabetes",
            "Check your blood sugar.",
        ));
        assert!(policy.validate(&schema()).is_ok());
        let derived = policy.derive(&record(45.0, 120.0, 180.0), &risk(0.1)).unwrap();
        assert!(derived.recommendations.iter().all(|r| r.category != "Diabetes"));
    }

    #[test]
    fn missing_age_field_is_a_configuration_error() {
        let policy = RecommendationPolicy {
            age_field: "YearsOld".to_string(),
            ..RecommendationPolicy::default()
        };
        assert_eq!(
            policy.validate(&schema()).unwrap_err(),
            PolicyError::MissingAgeField("YearsOld".to_string())
        );
    }

    #[test]
    fn field_names_match_without_case() {
        let policy = RecommendationPolicy {
            age_field: "age".to_string(),
            rules: vec![RecommendationRule::new(
                "systolicbp",
                Comparison::AtMost,
                125.0,
                "Blood Pressure",
                "Keep it up.",
            )],
        };
        assert!(policy.validate(&schema()).is_ok());
        let derived = policy.derive(&record(45.0, 120.0, 180.0), &risk(0.25)).unwrap();
        assert_eq!(derived.recommendations[0].category, "Blood Pressure");
        assert_eq!(derived.risk_age, 45);
    }
}
