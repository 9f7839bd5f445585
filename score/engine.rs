// ========================================================================================
//
//                               The Inference Context
//
// ========================================================================================
//
// Everything derived from the reference population is computed once in
// `InferenceContext::new` and never mutated afterwards. `assess` is a pure function of
// the context and one record, so a single context can serve any number of threads.

use crate::calibrate::attribution::{AttributionError, AttributionRanking, top_features};
use crate::calibrate::model::{
    Classifier, LogisticModel, ModelError, RiskAssessment, RiskLevel, predict,
};
use crate::config::{ConfigError, EngineConfig};
use crate::derived::{DerivedMetrics, PolicyError, RecommendationPolicy};
use crate::io::{DataError, load_reference_dataset};
use crate::map::{Projection, ProjectionError, project};
use crate::normalize::{DisplayValue, InputError, normalize};
use crate::pipeline::{FittedPipeline, PipelineError};
use crate::schema::{FeatureSchema, SchemaError};
use crate::types::{DatasetSummary, InputRecord, PopulationTag, ReferenceDataset};
use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    /// The user can correct the record and retry.
    Input,
    /// The session is misconfigured; retrying cannot help.
    Configuration,
    /// Too little data for an optional section.
    DataSufficiency,
    /// The classifier cannot support an optional section.
    UnsupportedModel,
}

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),
    #[error("Invalid reference data: {0}")]
    Schema(#[from] SchemaError),
    #[error("Preprocessing failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Classifier error: {0}")]
    Model(#[from] ModelError),
    #[error("Population map error: {0}")]
    Projection(#[from] ProjectionError),
    #[error("Attribution error: {0}")]
    Attribution(#[from] AttributionError),
    #[error("Recommendation policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AssessmentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Input(_) | Self::Data(DataError::UnsupportedRecordValue { .. }) => {
                ErrorCategory::Input
            }
            Self::Projection(ProjectionError::InsufficientData(_)) => {
                ErrorCategory::DataSufficiency
            }
            Self::Attribution(AttributionError::UnsupportedModel) => {
                ErrorCategory::UnsupportedModel
            }
            _ => ErrorCategory::Configuration,
        }
    }
}

/// An optional part of the assessment that may be withheld without failing the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Section<T> {
    Available(T),
    Unavailable { reason: String },
}

impl<T> Section<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

/// The full answer to one assessment request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub risk_level: RiskLevel,
    /// Probability of the predicted class, percent.
    pub confidence: f64,
    pub verdict: String,
    pub risk: RiskAssessment,
    /// The validated record, numeric values clamped for display.
    pub record: Vec<DisplayValue>,
    pub derived: DerivedMetrics,
    pub attribution: Section<AttributionRanking>,
    pub projection: Section<Projection>,
}

/// Immutable state shared by every request.
#[derive(Debug)]
pub struct InferenceContext<C: Classifier> {
    schema: FeatureSchema,
    pipeline: FittedPipeline,
    reference_embedding: Array2<f64>,
    tags: Vec<PopulationTag>,
    summary: DatasetSummary,
    classifier: C,
    policy: RecommendationPolicy,
    top_k: usize,
}

impl<C: Classifier> InferenceContext<C> {
    /// Builds the schema, fits the pipeline, embeds the reference population and checks
    /// that the classifier and the recommendation policy agree with all of it.
    pub fn new(
        reference: &ReferenceDataset,
        classifier: C,
        config: &EngineConfig,
    ) -> Result<Self, AssessmentError> {
        let schema = FeatureSchema::build(reference)?;
        let tags = reference.tags()?;
        let summary = reference.summary()?;
        let pipeline = FittedPipeline::fit(reference, &schema)?;
        let reference_embedding = pipeline.transform_reference(reference)?;

        if classifier.n_features() != pipeline.width() {
            return Err(ModelError::InputShape {
                found: pipeline.width(),
                expected: classifier.n_features(),
            }
            .into());
        }
        if let Some(trained_on) = classifier.feature_names() {
            for (position, (found, expected)) in
                pipeline.encoded_columns().iter().zip(trained_on).enumerate()
            {
                if found.name != *expected {
                    return Err(ModelError::FeatureMismatch {
                        position,
                        found: found.name.clone(),
                        expected: expected.clone(),
                    }
                    .into());
                }
            }
        }
        config.recommendations.validate(&schema)?;

        log::info!(
            "Inference context ready: {} reference records ({} cases, {} controls), {} features, {} encoded dimensions",
            summary.rows,
            summary.cases,
            summary.controls,
            schema.len(),
            pipeline.width()
        );

        Ok(Self {
            schema,
            pipeline,
            reference_embedding,
            tags,
            summary,
            classifier,
            policy: config.recommendations.clone(),
            top_k: config.top_k,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn pipeline(&self) -> &FittedPipeline {
        &self.pipeline
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn summary(&self) -> DatasetSummary {
        self.summary
    }

    pub fn reference_embedding(&self) -> &Array2<f64> {
        &self.reference_embedding
    }

    pub fn tags(&self) -> &[PopulationTag] {
        &self.tags
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Runs one record through validation, prediction, projection, attribution and the
    /// derived metrics. Projection and attribution degrade to `Section::Unavailable` when
    /// the data or the classifier cannot support them; everything else is fatal.
    pub fn assess(&self, raw: &InputRecord) -> Result<Assessment, AssessmentError> {
        let record = normalize(raw, &self.schema)?;
        let row: Vec<_> = record.values().cloned().collect();
        let vector = self.pipeline.transform_row(&row)?;

        let risk = predict(vector.view(), &self.classifier)?;

        let projection = match project(self.reference_embedding.view(), &self.tags, vector.view())
        {
            Ok(projection) => Section::Available(projection),
            Err(e @ ProjectionError::InsufficientData(_)) => {
                log::warn!("Population map withheld: {e}");
                Section::Unavailable {
                    reason: e.to_string(),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let attribution = match top_features(&self.classifier, &self.pipeline, self.top_k) {
            Ok(ranking) => Section::Available(ranking),
            Err(e @ AttributionError::UnsupportedModel) => {
                log::warn!("Feature attribution withheld: {e}");
                Section::Unavailable {
                    reason: e.to_string(),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let derived = self.policy.derive(&record, &risk)?;

        Ok(Assessment {
            risk_level: risk.risk_level(),
            confidence: risk.confidence(),
            verdict: risk.verdict().to_string(),
            risk,
            record: record.display_values(&self.schema),
            derived,
            attribution,
            projection,
        })
    }
}

impl InferenceContext<LogisticModel> {
    /// Loads the reference table and a TOML logistic model and builds the context.
    pub fn open(
        reference_path: &str,
        model_path: &str,
        config: &EngineConfig,
    ) -> Result<Self, AssessmentError> {
        let reference =
            load_reference_dataset(reference_path, &config.label_column, config.separator_byte()?)?;
        let model = LogisticModel::load(model_path)?;
        Self::new(&reference, model, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_LABEL_COLUMN, FeatureValue};
    use ndarray::{Array1, ArrayView1};

    fn reference(rows: usize) -> ReferenceDataset {
        let data = (0..rows)
            .map(|i| {
                let case = i % 2 == 1;
                vec![
                    FeatureValue::Number(40.0 + (i % 30) as f64),
                    FeatureValue::Number(if case { 145.0 } else { 120.0 } + (i % 7) as f64),
                    FeatureValue::Category(if i % 3 == 0 { "Male" } else { "Female" }.into()),
                    FeatureValue::Number(if case { 1.0 } else { 0.0 }),
                ]
            })
            .collect();
        ReferenceDataset::from_rows(
            DEFAULT_LABEL_COLUMN,
            vec![
                "Age".into(),
                "SystolicBP".into(),
                "Sex".into(),
                "Target".into(),
            ],
            data,
        )
        .unwrap()
    }

    fn model() -> LogisticModel {
        LogisticModel::new(
            vec![
                "Age".into(),
                "SystolicBP".into(),
                "Sex=Female".into(),
                "Sex=Male".into(),
                "Sex=<other>".into(),
            ],
            0.0,
            Array1::from_vec(vec![0.4, 1.5, -0.2, 0.2, 0.0]),
        )
        .unwrap()
    }

    fn subject() -> InputRecord {
        InputRecord::new()
            .with("Age", 57.0)
            .with("SystolicBP", 150.0)
            .with("Sex", "Male")
    }

    struct Opaque;

    impl Classifier for Opaque {
        fn n_features(&self) -> usize {
            5
        }

        fn predict_proba(&self, x: ArrayView1<f64>) -> Result<[f64; 2], ModelError> {
            let case = if x[1] > 0.0 { 0.9 } else { 0.1 };
            Ok([1.0 - case, case])
        }
    }

    #[test]
    fn full_assessment_has_every_section() {
        let context =
            InferenceContext::new(&reference(40), model(), &EngineConfig::default()).unwrap();
        let assessment = context.assess(&subject()).unwrap();
        assert!(assessment.projection.is_available());
        assert!(assessment.attribution.is_available());
        assert_eq!(assessment.record.len(), 3);
        assert_eq!(assessment.risk_level, assessment.risk.risk_level());
    }

    #[test]
    fn context_keeps_the_embedded_reference_and_configured_ranking_size() {
        let config = EngineConfig {
            top_k: 2,
            ..EngineConfig::default()
        };
        let context = InferenceContext::new(&reference(40), model(), &config).unwrap();
        assert_eq!(context.top_k(), 2);

        let embedding = context.reference_embedding();
        assert_eq!(embedding.nrows(), context.tags().len());
        assert_eq!(embedding.ncols(), context.pipeline().width());

        let ranking = context.assess(&subject()).unwrap().attribution;
        let ranking = ranking.available().unwrap();
        assert_eq!(ranking.len(), 2);
        assert!((ranking.total_weight() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn opaque_classifier_degrades_attribution_only() {
        let context = InferenceContext::new(&reference(40), Opaque, &EngineConfig::default())
            .unwrap();
        let assessment = context.assess(&subject()).unwrap();
        assert!(!assessment.attribution.is_available());
        assert!(assessment.projection.is_available());
    }

    #[test]
    fn width_mismatch_is_a_configuration_error() {
        let narrow = LogisticModel::new(
            vec!["Age".into(), "SystolicBP".into()],
            0.0,
            Array1::from_vec(vec![1.0, 1.0]),
        )
        .unwrap();
        let err = InferenceContext::new(&reference(10), narrow, &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(matches!(
            err,
            AssessmentError::Model(ModelError::InputShape {
                found: 5,
                expected: 2
            })
        ));
    }

    #[test]
    fn reordered_coefficients_are_rejected() {
        let swapped = LogisticModel::new(
            vec![
                "SystolicBP".into(),
                "Age".into(),
                "Sex=Female".into(),
                "Sex=Male".into(),
                "Sex=<other>".into(),
            ],
            0.0,
            Array1::zeros(5),
        )
        .unwrap();
        let err = InferenceContext::new(&reference(10), swapped, &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AssessmentError::Model(ModelError::FeatureMismatch { position: 0, .. })
        ));
    }

    #[test]
    fn input_errors_are_user_correctable() {
        let context =
            InferenceContext::new(&reference(10), model(), &EngineConfig::default()).unwrap();
        let err = context
            .assess(&InputRecord::new().with("Age", 50.0))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Input);
    }
}
