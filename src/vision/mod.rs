//! Text detection services.
//!
//! We don't recognize any text ourselves. A [`TextDetector`] sends image bytes
//! to a cloud OCR service and hands back the [`Annotation`]s it found.

use std::{error, fmt, sync::Arc};

use clap::ValueEnum;
use schemars::JsonSchema;

use crate::prelude::*;

pub mod fixture;
pub mod google;

/// A fragment of detected text, as reported by the OCR service.
///
/// The field names follow Google's `EntityAnnotation` JSON encoding, so that
/// saved API responses can be read directly.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// The detected text.
    #[serde(default)]
    pub description: Option<String>,

    /// The service's confidence in this detection, from 0.0 to 1.0. Usually
    /// missing (or zero) for plain text detection.
    #[serde(default)]
    pub confidence: Option<f32>,

    /// Where the text is in the image.
    #[serde(default)]
    pub bounding_poly: Option<BoundingPoly>,
}

/// A polygon around some detected text, in pixel coordinates.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct BoundingPoly {
    /// The corners of the polygon, in order.
    #[serde(default)]
    pub vertices: Vec<Vertex>,
}

/// A single polygon corner. The API omits coordinates which are zero.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

/// The OCR service reported an error for our request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceError {
    /// The message reported by the service.
    pub message: String,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Google Vision API Error: {}", self.message)
    }
}

impl error::Error for ServiceError {}

/// Interface to an OCR service.
#[async_trait]
pub trait TextDetector: Send + Sync + 'static {
    /// Detect text in an image.
    ///
    /// Annotations come back in the order chosen by the service, and never
    /// include annotations without a description. Finding no text at all is
    /// not an error. If the service reports an error, it is returned as a
    /// [`ServiceError`].
    async fn detect_text(&self, image: &[u8]) -> Result<Vec<Annotation>>;
}

/// Our different OCR engines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum EngineType {
    /// Google Cloud Vision `TEXT_DETECTION`.
    #[default]
    Google,

    /// Replay a saved Vision API response from `--fixture-response`, for
    /// offline runs and testing.
    Fixture,
}

/// Settings used to construct a [`TextDetector`].
#[derive(Clone, Debug, Default)]
pub struct DetectorSettings {
    /// Override the Vision API base URL.
    pub api_base: Option<String>,

    /// Request timeout, in seconds.
    pub timeout: Option<u64>,

    /// Saved response for [`EngineType::Fixture`].
    pub fixture_response: Option<PathBuf>,
}

impl EngineType {
    /// Instantiate an appropriate detector.
    pub async fn create_detector(
        &self,
        settings: &DetectorSettings,
    ) -> Result<Arc<dyn TextDetector>> {
        match self {
            EngineType::Google => Ok(Arc::new(google::GoogleVisionDetector::from_env(
                settings.api_base.as_deref(),
                settings.timeout,
            )?)),
            EngineType::Fixture => {
                let path = settings.fixture_response.as_deref().ok_or_else(|| {
                    anyhow!("--engine fixture requires --fixture-response")
                })?;
                Ok(Arc::new(fixture::FixtureDetector::load(path).await?))
            }
        }
    }
}

/// Join the text of all annotations with spaces, skipping empty ones.
pub fn raw_text(annotations: &[Annotation]) -> String {
    annotations
        .iter()
        .filter_map(|a| a.description.as_deref())
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
