//! OCR using the Google Cloud Vision REST API.

use std::{env, time::Duration};

use base64::{Engine as _, prelude::BASE64_STANDARD};
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};

use crate::{
    prelude::*,
    retry::{
        IsKnownTransient, retry_result_for_status, retry_result_ok,
        try_potentially_transient, try_transient,
    },
};

use super::{Annotation, ServiceError, TextDetector};

/// The public Vision API endpoint.
const DEFAULT_API_BASE: &str = "https://vision.googleapis.com";

/// Request body for `images:annotate`.
#[derive(Debug, Serialize)]
struct AnnotateBatchRequest {
    requests: Vec<AnnotateImageRequest>,
}

impl AnnotateBatchRequest {
    /// Ask for `TEXT_DETECTION` on a single image.
    fn text_detection(image: &[u8]) -> Self {
        Self {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: BASE64_STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "TEXT_DETECTION",
                }],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct AnnotateImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

/// Inline image data, Base64 encoded.
#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Response body for `images:annotate`. Also the format of our saved fixture
/// responses.
#[derive(Debug, Default, Deserialize)]
pub struct AnnotateBatchResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

/// Results for one image.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<Annotation>,

    /// Set if this image could not be processed.
    #[serde(default)]
    error: Option<Status>,
}

/// A Google RPC status.
#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

/// The error wrapper Google uses for HTTP-level failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Status,
}

impl AnnotateBatchResponse {
    /// Extract annotations for our single image, or the service's error.
    pub fn into_annotations(self) -> Result<Vec<Annotation>> {
        let Some(response) = self.responses.into_iter().next() else {
            return Ok(vec![]);
        };
        if let Some(status) = response.error
            && !status.message.is_empty()
        {
            return Err(ServiceError {
                message: status.message,
            }
            .into());
        }
        Ok(response
            .text_annotations
            .into_iter()
            .filter(|annotation| annotation.description.is_some())
            .collect())
    }
}

/// How we authenticate to Google.
#[derive(Clone)]
enum Credentials {
    /// An API key, passed as `?key=`.
    ApiKey(String),
    /// An OAuth access token.
    BearerToken(String),
}

/// OCR engine wrapping Google Cloud Vision.
pub struct GoogleVisionDetector {
    /// HTTP client, reused between requests.
    client: reqwest::Client,

    /// The full `images:annotate` URL.
    endpoint: String,

    credentials: Credentials,

    /// Per-request timeout.
    timeout: Option<Duration>,
}

impl GoogleVisionDetector {
    /// Create a detector using credentials from the environment.
    ///
    /// `api_base` is used if `GOOGLE_VISION_API_BASE` is not set.
    pub fn from_env(api_base: Option<&str>, timeout: Option<u64>) -> Result<Self> {
        let credentials = if let Ok(key) = env::var("GOOGLE_VISION_API_KEY") {
            Credentials::ApiKey(key)
        } else if let Ok(token) = env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            Credentials::BearerToken(token)
        } else {
            return Err(anyhow!(
                "set GOOGLE_VISION_API_KEY or GOOGLE_OAUTH_ACCESS_TOKEN to use Google Cloud Vision"
            ));
        };
        let api_base = env::var("GOOGLE_VISION_API_BASE")
            .ok()
            .or_else(|| api_base.map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_API_BASE.to_owned());
        Self::new(&api_base, credentials, timeout)
    }

    fn new(api_base: &str, credentials: Credentials, timeout: Option<u64>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/images:annotate", api_base.trim_end_matches('/')),
            credentials,
            timeout: timeout.map(Duration::from_secs),
        })
    }

    /// Make a single `images:annotate` call.
    #[instrument(level = "debug", skip_all)]
    async fn annotate_once(
        &self,
        request: &AnnotateBatchRequest,
    ) -> RetryResult<(), (), AnnotateBatchResponse, anyhow::Error> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        builder = match &self.credentials {
            Credentials::ApiKey(key) => builder.query(&[("key", key)]),
            Credentials::BearerToken(token) => builder.bearer_auth(token),
        };
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = try_potentially_transient!(builder.send().await);
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(ErrorBody { error }) if !error.message.is_empty() => {
                    anyhow::Error::from(ServiceError {
                        message: error.message,
                    })
                }
                _ => anyhow!("Google Vision API returned HTTP {}: {}", status, body),
            };
            return retry_result_for_status(status, error);
        }

        // A truncated body is worth another try.
        let body = try_transient!(response.json::<AnnotateBatchResponse>().await);
        trace!(?body, "Vision response");
        retry_result_ok(body)
    }
}

#[async_trait]
impl TextDetector for GoogleVisionDetector {
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    async fn detect_text(&self, image: &[u8]) -> Result<Vec<Annotation>> {
        let request = AnnotateBatchRequest::text_detection(image);

        let jitter = ExponentialJitter::FromBackoffRange {
            backoff_range_millis: 1..=30_000,
            re_attempts: 5,
            jitter_ratio: 0.2,
        };
        let result = self
            .annotate_once(&request)
            .await
            .retry_with_async(|_| async { self.annotate_once(&request).await })
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                warn!(
                    "succeeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                error!(
                    "FAILED after exhausting all {} retrying attempts with error {fatal_error:?}",
                    retry_errors_list.len(),
                )
            });

        let response = match result {
            ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
                output
            }
            ResolvedResult::Fatal { error, .. } => return Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => return Err(fatal_error),
        };
        let annotations = response.into_annotations()?;
        debug!(count = annotations.len(), "Detected text annotations");
        Ok(annotations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_text_detection_request() {
        let request = AnnotateBatchRequest::text_detection(b"png!");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "requests": [{
                    "image": {"content": "cG5nIQ=="},
                    "features": [{"type": "TEXT_DETECTION"}],
                }]
            })
        );
    }

    #[test]
    fn decodes_annotations_and_drops_missing_descriptions() -> Result<()> {
        let response: AnnotateBatchResponse = serde_json::from_value(json!({
            "responses": [{
                "textAnnotations": [
                    {
                        "locale": "en",
                        "description": "Gravity pulls",
                        "boundingPoly": {"vertices": [{"x": 1, "y": 2}, {"x": 30, "y": 2}]}
                    },
                    {"boundingPoly": {"vertices": []}},
                    {"description": "pulls", "confidence": 0.5}
                ]
            }]
        }))?;
        let annotations = response.into_annotations()?;
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].description.as_deref(), Some("Gravity pulls"));
        assert_eq!(annotations[0].bounding_poly.as_ref().unwrap().vertices.len(), 2);
        assert_eq!(annotations[1].confidence, Some(0.5));
        Ok(())
    }

    #[test]
    fn no_text_is_not_an_error() -> Result<()> {
        let empty: AnnotateBatchResponse = serde_json::from_value(json!({"responses": [{}]}))?;
        assert!(empty.into_annotations()?.is_empty());

        let no_responses: AnnotateBatchResponse = serde_json::from_value(json!({}))?;
        assert!(no_responses.into_annotations()?.is_empty());
        Ok(())
    }

    #[test]
    fn reports_service_errors() -> Result<()> {
        let response: AnnotateBatchResponse = serde_json::from_value(json!({
            "responses": [{"error": {"code": 3, "message": "Bad image data."}}]
        }))?;
        let err = response.into_annotations().unwrap_err();
        let service_error = err.downcast_ref::<ServiceError>().expect("ServiceError");
        assert_eq!(service_error.message, "Bad image data.");

        // An empty message is not an error.
        let response: AnnotateBatchResponse = serde_json::from_value(json!({
            "responses": [{"error": {"message": ""}, "textAnnotations": []}]
        }))?;
        assert!(response.into_annotations()?.is_empty());
        Ok(())
    }

    #[test]
    fn endpoint_trims_trailing_slash() -> Result<()> {
        let detector = GoogleVisionDetector::new(
            "http://localhost:8080/",
            Credentials::ApiKey("k".to_owned()),
            Some(5),
        )?;
        assert_eq!(detector.endpoint, "http://localhost:8080/v1/images:annotate");
        assert_eq!(detector.timeout, Some(Duration::from_secs(5)));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Needs GOOGLE_VISION_API_KEY and network access"]
    async fn detects_text_with_real_api() -> Result<()> {
        let detector = GoogleVisionDetector::from_env(None, Some(30))?;
        let image = std::fs::read("tests/fixtures/images/gravity.png")?;
        detector.detect_text(&image).await?;
        Ok(())
    }
}
