//! A detector which replays a saved Vision API response.
//!
//! Every image gets the same answer. This is handy for trying out cleaning
//! settings without paying for API calls, and for testing.

use super::{Annotation, ServiceError, TextDetector, google::AnnotateBatchResponse};
use crate::{async_utils::io::read_json_or_toml, prelude::*};

/// Replays a saved `images:annotate` response.
#[derive(Debug)]
pub struct FixtureDetector {
    /// The saved response, decoded once up front. Service errors are kept so
    /// that every image reports them.
    response: Result<Vec<Annotation>, ServiceError>,
}

impl FixtureDetector {
    /// Load a saved JSON response.
    pub async fn load(path: &Path) -> Result<Self> {
        let response = read_json_or_toml::<AnnotateBatchResponse>(path).await?;
        let response = match response.into_annotations() {
            Ok(annotations) => Ok(annotations),
            Err(err) => Err(err.downcast::<ServiceError>()?),
        };
        Ok(Self { response })
    }
}

#[async_trait]
impl TextDetector for FixtureDetector {
    #[instrument(level = "debug", skip_all, fields(bytes = image.len()))]
    async fn detect_text(&self, image: &[u8]) -> Result<Vec<Annotation>> {
        match &self.response {
            Ok(annotations) => Ok(annotations.clone()),
            Err(service_error) => Err(service_error.clone().into()),
        }
    }
}
