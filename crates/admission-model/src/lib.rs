use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use admission_core::{ClassifierError, IntentClassifier};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid model artifact: {0}")]
    Shape(String),
}

/// Provenance block carried alongside the weights in the artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelMetadata {
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelArtifact {
    #[serde(default)]
    metadata: ModelMetadata,
    labels: Vec<String>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    coefficients: Vec<Vec<f32>>,
    intercepts: Vec<f32>,
}

/// TF-IDF (unigram + bigram) features with a multinomial logistic-regression
/// head, loaded from a JSON artifact exported by the offline training job.
/// Inference only; training is out of scope.
#[derive(Debug, Clone)]
pub struct TfidfLogisticModel {
    metadata: ModelMetadata,
    labels: Vec<String>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    coefficients: Vec<Vec<f32>>,
    intercepts: Vec<f32>,
}

impl TfidfLogisticModel {
    /// # Errors
    /// Returns [`ModelError`] when the file cannot be read or parsed, or when
    /// the weight shapes are inconsistent.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let body = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let artifact: ModelArtifact =
            serde_json::from_str(&body).map_err(|source| ModelError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_artifact(artifact)
    }

    /// # Errors
    /// Returns [`ModelError`] when the JSON cannot be parsed or the weight
    /// shapes are inconsistent.
    pub fn from_json_str(body: &str) -> Result<Self, ModelError> {
        let artifact: ModelArtifact =
            serde_json::from_str(body).map_err(|source| ModelError::Parse {
                path: "<inline>".to_string(),
                source,
            })?;
        Self::from_artifact(artifact)
    }

    fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelError> {
        let ModelArtifact { metadata, labels, vocabulary, idf, coefficients, intercepts } =
            artifact;

        if labels.is_empty() {
            return Err(ModelError::Shape("labels must be non-empty".to_string()));
        }
        if vocabulary.is_empty() {
            return Err(ModelError::Shape("vocabulary must be non-empty".to_string()));
        }
        if idf.len() != vocabulary.len() {
            return Err(ModelError::Shape(format!(
                "idf length {} does not match vocabulary size {}",
                idf.len(),
                vocabulary.len()
            )));
        }
        if let Some(index) = vocabulary.values().find(|index| **index >= idf.len()) {
            return Err(ModelError::Shape(format!(
                "vocabulary index {index} out of range for {} features",
                idf.len()
            )));
        }
        if coefficients.len() != labels.len() {
            return Err(ModelError::Shape(format!(
                "{} coefficient rows for {} labels",
                coefficients.len(),
                labels.len()
            )));
        }
        if let Some(row) = coefficients.iter().find(|row| row.len() != idf.len()) {
            return Err(ModelError::Shape(format!(
                "coefficient row length {} does not match {} features",
                row.len(),
                idf.len()
            )));
        }
        if intercepts.len() != labels.len() {
            return Err(ModelError::Shape(format!(
                "{} intercepts for {} labels",
                intercepts.len(),
                labels.len()
            )));
        }

        Ok(Self { metadata, labels, vocabulary, idf, coefficients, intercepts })
    }

    #[must_use]
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Sparse TF-IDF feature vector: term counts over unigrams and bigrams,
    /// scaled by idf and L2-normalized, matching the training vectorizer.
    fn features(&self, text: &str) -> Vec<(usize, f32)> {
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|ch: char| !ch.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
            .collect();

        let mut counts: HashMap<usize, f32> = HashMap::new();
        for token in &tokens {
            if let Some(index) = self.vocabulary.get(token) {
                *counts.entry(*index).or_insert(0.0) += 1.0;
            }
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            if let Some(index) = self.vocabulary.get(&bigram) {
                *counts.entry(*index).or_insert(0.0) += 1.0;
            }
        }

        let mut features: Vec<(usize, f32)> = counts
            .into_iter()
            .map(|(index, count)| (index, count * self.idf[index]))
            .collect();
        let norm = features.iter().map(|(_, value)| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, value) in &mut features {
                *value /= norm;
            }
        }
        features.sort_unstable_by_key(|(index, _)| *index);
        features
    }

    fn logits(&self, text: &str) -> Vec<f32> {
        let features = self.features(text);
        self.coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, intercept)| {
                intercept
                    + features.iter().map(|(index, value)| row[*index] * value).sum::<f32>()
            })
            .collect()
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|logit| (logit - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 {
        exps.iter().map(|value| value / total).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

impl IntentClassifier for TfidfLogisticModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict_top(&self, text: &str) -> Result<usize, ClassifierError> {
        let logits = self.logits(text);
        logits
            .iter()
            .enumerate()
            .max_by(|(_, lhs), (_, rhs)| lhs.total_cmp(rhs))
            .map(|(index, _)| index)
            .ok_or_else(|| ClassifierError("model has no output classes".to_string()))
    }

    fn predict_distribution(&self, text: &str) -> Result<Option<Vec<f32>>, ClassifierError> {
        Ok(Some(softmax(&self.logits(text))))
    }
}
