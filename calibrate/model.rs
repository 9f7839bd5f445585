use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Tolerance on `P(case) + P(control) = 1`.
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1.0e-6;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a trained classifier
// when serialized to a TOML file.

/// Structural information the classifier was trained against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Encoded feature names in the exact order the weights apply to. This is the
    /// preprocessing pipeline's output layout at training time and is checked against
    /// the live pipeline before any prediction is made.
    pub feature_names: Vec<String>,
}

/// Named coefficients, so the artifact can be read and audited by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedCoefficients {
    pub intercept: f64,
    /// Weight per encoded feature name.
    pub weights: HashMap<String, f64>,
}

/// The self-contained, trained model artifact as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub config: ModelConfig,
    pub coefficients: MappedCoefficients,
}

/// Custom error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "The model expects {expected} input features, but the preprocessed vector has {found}. The pipeline and the classifier disagree."
    )]
    InputShape { found: usize, expected: usize },
    #[error("Coefficient for encoded feature '{0}' is missing from the model file.")]
    MissingCoefficient(String),
    #[error(
        "Encoded feature {position} is '{found}' in the pipeline but '{expected}' in the model. The model was trained against a different schema."
    )]
    FeatureMismatch {
        position: usize,
        found: String,
        expected: String,
    },
    #[error("Classifier returned probabilities ({control}, {case}) that do not form a distribution.")]
    InvalidProbabilities { control: f64, case: f64 },
}

/// A trained binary classifier over preprocessed vectors.
///
/// Implementations must be pure functions of their input: no internal state changes
/// between calls, so a single instance can serve concurrent requests.
pub trait Classifier: Send + Sync {
    /// Width of the vectors the classifier accepts.
    fn n_features(&self) -> usize;

    /// `[P(control), P(case)]` for one vector.
    fn predict_proba(&self, x: ArrayView1<f64>) -> Result<[f64; 2], ModelError>;

    /// Class label for one vector.
    fn predict(&self, x: ArrayView1<f64>) -> Result<u8, ModelError> {
        let [control, case] = self.predict_proba(x)?;
        Ok(u8::from(case >= control))
    }

    /// Per-encoded-feature linear coefficients, when the model has them.
    fn coefficients(&self) -> Option<ArrayView1<'_, f64>> {
        None
    }

    /// Encoded feature names the classifier was trained on, when known.
    fn feature_names(&self) -> Option<&[String]> {
        None
    }
}

/// Binary logistic regression over the preprocessed embedding.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    feature_names: Vec<String>,
    intercept: f64,
    weights: Array1<f64>,
}

impl LogisticModel {
    pub fn new(
        feature_names: Vec<String>,
        intercept: f64,
        weights: Array1<f64>,
    ) -> Result<Self, ModelError> {
        if feature_names.len() != weights.len() {
            return Err(ModelError::InputShape {
                found: weights.len(),
                expected: feature_names.len(),
            });
        }
        Ok(Self {
            feature_names,
            intercept,
            weights,
        })
    }

    /// Flattens named coefficients into `config.feature_names` order.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        let ModelArtifact {
            config,
            coefficients,
        } = artifact;
        let weights = config
            .feature_names
            .iter()
            .map(|name| {
                coefficients
                    .weights
                    .get(name)
                    .copied()
                    .ok_or_else(|| ModelError::MissingCoefficient(name.clone()))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Self::new(
            config.feature_names,
            coefficients.intercept,
            Array1::from_vec(weights),
        )
    }

    pub fn to_artifact(&self) -> ModelArtifact {
        ModelArtifact {
            config: ModelConfig {
                feature_names: self.feature_names.clone(),
            },
            coefficients: MappedCoefficients {
                intercept: self.intercept,
                weights: self
                    .feature_names
                    .iter()
                    .cloned()
                    .zip(self.weights.iter().copied())
                    .collect(),
            },
        }
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(&self.to_artifact())?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let artifact: ModelArtifact = toml::from_str(&toml_string)?;
        Self::from_artifact(artifact)
    }
}

impl Classifier for LogisticModel {
    fn n_features(&self) -> usize {
        self.weights.len()
    }

    fn predict_proba(&self, x: ArrayView1<f64>) -> Result<[f64; 2], ModelError> {
        if x.len() != self.weights.len() {
            return Err(ModelError::InputShape {
                found: x.len(),
                expected: self.weights.len(),
            });
        }
        // Clamp eta to prevent numerical overflow in exp()
        let eta = (self.intercept + self.weights.dot(&x)).clamp(-700.0, 700.0);
        let case = 1.0 / (1.0 + f64::exp(-eta));
        Ok([1.0 - case, case])
    }

    fn coefficients(&self) -> Option<ArrayView1<'_, f64>> {
        Some(self.weights.view())
    }

    fn feature_names(&self) -> Option<&[String]> {
        Some(&self.feature_names)
    }
}

/// Overall risk band of a probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Bands close on their lower bound: 0.30 is moderate, 0.70 is high.
    pub fn from_probability(probability_case: f64) -> Self {
        if probability_case >= 0.70 {
            Self::High
        } else if probability_case >= 0.30 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// The classifier's verdict on one subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub predicted_label: u8,
    pub probability_case: f64,
    pub probability_control: f64,
}

impl RiskAssessment {
    /// Probability of the predicted class, in percent.
    pub fn confidence(&self) -> f64 {
        if self.predicted_label == 1 {
            self.probability_case * 100.0
        } else {
            self.probability_control * 100.0
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_probability(self.probability_case)
    }

    pub fn verdict(&self) -> &'static str {
        if self.predicted_label == 1 {
            "Your parameters resemble those of patient cases with heart disease. Take care of yourself. Heart disease predicted."
        } else {
            "Your parameters don't resemble patient cases with heart disease. No heart disease predicted."
        }
    }
}

/// Runs the classifier on one preprocessed vector.
///
/// The label and the probabilities are taken from the classifier as-is. A width
/// mismatch means the pipeline and the classifier were built for different schemas and
/// is returned as `ModelError::InputShape`; callers must treat it as fatal.
pub fn predict<C: Classifier + ?Sized>(
    vector: ArrayView1<f64>,
    classifier: &C,
) -> Result<RiskAssessment, ModelError> {
    if vector.len() != classifier.n_features() {
        return Err(ModelError::InputShape {
            found: vector.len(),
            expected: classifier.n_features(),
        });
    }

    let [control, case] = classifier.predict_proba(vector)?;
    let in_range = (0.0..=1.0).contains(&control) && (0.0..=1.0).contains(&case);
    if !in_range || ((control + case) - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
        return Err(ModelError::InvalidProbabilities { control, case });
    }
    let predicted_label = classifier.predict(vector)?;

    log::debug!(
        "Prediction: label={predicted_label}, P(case)={case:.4}, P(control)={control:.4}"
    );

    Ok(RiskAssessment {
        predicted_label,
        probability_case: case,
        probability_control: control,
    })
}
