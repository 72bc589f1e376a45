//! Remote classification backends
//!
//! The classifier model is an opaque remote inference service returning
//! ranked `(label, score)` pairs. Each backend implements [`Classifier`];
//! the backend is chosen once from configuration at startup.
//!
//! Expected response bodies:
//! - `{"predictions": [{"prediction": "...", "prediction_score": 0.9}, ...]}`
//! - `{"error": "..."}`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ClassifierBackend, PipelineSettings};

const USER_AGENT: &str = concat!("trailcam-ingest/", env!("CARGO_PKG_VERSION"));

/// One ranked prediction as returned by the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    pub prediction: String,
    pub prediction_score: f64,
}

impl RawPrediction {
    pub fn new(prediction: impl Into<String>, prediction_score: f64) -> Self {
        Self {
            prediction: prediction.into(),
            prediction_score,
        }
    }
}

/// Classifier call errors
///
/// All variants resolve to the analyzer's `error` tier; they stay distinct
/// for logging.
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("Classifier request timed out")]
    Timeout,

    #[error("Classifier connection error: {0}")]
    Connection(String),

    #[error("Classifier returned HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Classifier reported error: {0}")]
    Service(String),

    #[error("Classifier response parse error: {0}")]
    Parse(String),

    #[error("Cannot read image {0}")]
    Io(String),
}

impl From<reqwest::Error> for ClassifierError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifierError::Timeout
        } else if e.is_decode() {
            ClassifierError::Parse(e.to_string())
        } else {
            ClassifierError::Connection(e.to_string())
        }
    }
}

/// Outcome of one classification call
pub type ClassifierOutcome = Result<Vec<RawPrediction>, ClassifierError>;

/// Classification capability
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Backend identifier for logs and health output
    fn backend_id(&self) -> &'static str;

    /// Classify one image file
    async fn classify(&self, image: &Path) -> ClassifierOutcome;
}

#[derive(Debug, Deserialize)]
struct ClassifierResponse {
    #[serde(default)]
    predictions: Option<Vec<RawPrediction>>,
    #[serde(default)]
    error: Option<String>,
}

async fn read_response(response: reqwest::Response) -> ClassifierOutcome {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClassifierError::Status(status.as_u16(), body));
    }

    let parsed: ClassifierResponse = response
        .json()
        .await
        .map_err(|e| ClassifierError::Parse(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(ClassifierError::Service(error));
    }

    Ok(parsed.predictions.unwrap_or_default())
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ClassifierError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ClassifierError::Connection(e.to_string()))
}

/// Uploads the image bytes as a multipart form (`image` field)
pub struct HttpClassifier {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn backend_id(&self) -> &'static str {
        "http"
    }

    async fn classify(&self, image: &Path) -> ClassifierOutcome {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| ClassifierError::Io(format!("{}: {}", image.display(), e)))?;

        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.jpg".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("image", part);

        tracing::debug!(endpoint = %self.endpoint, path = %image.display(), "Uploading image for classification");

        let response = self
            .http_client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        read_response(response).await
    }
}

/// Sends the image path; for classifiers that share the media filesystem
pub struct PathClassifier {
    http_client: reqwest::Client,
    endpoint: String,
}

impl PathClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClassifierError> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Classifier for PathClassifier {
    fn backend_id(&self) -> &'static str {
        "path"
    }

    async fn classify(&self, image: &Path) -> ClassifierOutcome {
        let body = serde_json::json!({ "filepath": image.to_string_lossy() });

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?;

        read_response(response).await
    }
}

/// Build the configured backend
pub fn build_classifier(settings: &PipelineSettings) -> Result<Arc<dyn Classifier>, ClassifierError> {
    let timeout = Duration::from_secs(settings.classifier_timeout_secs);
    let classifier: Arc<dyn Classifier> = match settings.classifier_backend {
        ClassifierBackend::Http => Arc::new(HttpClassifier::new(&settings.classifier_url, timeout)?),
        ClassifierBackend::Path => Arc::new(PathClassifier::new(&settings.classifier_url, timeout)?),
    };
    tracing::info!(
        backend = classifier.backend_id(),
        endpoint = %settings.classifier_url,
        "Classifier backend configured"
    );
    Ok(classifier)
}
