//! Processing a single image, from pixels to cleaned text.

use std::sync::Arc;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    confidence::{self, ConfidenceSource},
    normalize::{SpellCorrector, TextNormalizer},
    prelude::*,
    render::draw_bounding_boxes,
    vision::{self, TextDetector},
};

/// Image types the Vision API accepts as inline content.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
    "image/vnd.microsoft.icon",
];

/// Everything we learned about one image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageReport {
    /// All detected text, joined with spaces.
    pub raw_text: String,

    /// The text after cleaning and formatting.
    pub cleaned_text: String,

    /// Confidence, from 0 to 100.
    pub confidence: f32,

    /// Where `confidence` came from.
    pub confidence_source: ConfidenceSource,

    /// A copy of the image with bounding boxes drawn on it, if we made one.
    pub annotated_image: Option<PathBuf>,
}

impl ImageReport {
    /// The report for an image with no text in it.
    fn no_text() -> Self {
        Self {
            raw_text: String::new(),
            cleaned_text: String::new(),
            confidence: 0.0,
            confidence_source: ConfidenceSource::None,
            annotated_image: None,
        }
    }
}

/// Detect, clean, score and draw.
pub struct Pipeline {
    detector: Arc<dyn TextDetector>,
    normalizer: TextNormalizer,

    /// Word list for proxy confidence scores. This is a real dictionary even
    /// when the normalizer keeps words as written.
    dictionary: Arc<dyn SpellCorrector>,

    /// Where to put annotated images. We don't draw any if this is `None`.
    output_dir: Option<PathBuf>,
}

impl Pipeline {
    /// Create a new pipeline.
    pub fn new(
        detector: Arc<dyn TextDetector>,
        normalizer: TextNormalizer,
        dictionary: Arc<dyn SpellCorrector>,
        output_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            detector,
            normalizer,
            dictionary,
            output_dir,
        }
    }

    /// Process an image file.
    ///
    /// If the OCR service reports an error, we stop and return it, without
    /// cleaning anything.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn process_image(&self, path: &Path) -> Result<ImageReport> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image {:?}", path))?;
        check_image_type(path, &data)?;

        let annotations = self
            .detector
            .detect_text(&data)
            .await
            .with_context(|| format!("text detection failed for {:?}", path))?;
        if annotations.is_empty() {
            info!("No text detected");
            return Ok(ImageReport::no_text());
        }
        for annotation in &annotations {
            trace!(text = ?annotation.description, "Annotation");
        }

        let raw_text = vision::raw_text(&annotations);
        debug!(%raw_text, "Raw extracted text");
        let cleaned_text = self.normalizer.clean_and_format(&raw_text);
        debug!(%cleaned_text, "Cleaned and formatted text");

        let (confidence, confidence_source) =
            confidence::score(&annotations, &raw_text, self.dictionary.as_ref());

        let annotated_image = match &self.output_dir {
            Some(output_dir) => {
                let path = path.to_owned();
                let output_dir = output_dir.to_owned();
                spawn_blocking_propagating_panics(move || {
                    draw_bounding_boxes(&path, &data, &annotations, &output_dir)
                })
                .await?
            }
            None => None,
        };

        Ok(ImageReport {
            raw_text,
            cleaned_text,
            confidence,
            confidence_source,
            annotated_image,
        })
    }
}

/// Make sure we have an image type the OCR service understands.
fn check_image_type(path: &Path, data: &[u8]) -> Result<()> {
    let mime_type = infer::get(data)
        .map(|kind| kind.mime_type())
        .ok_or_else(|| anyhow!("unknown file type for {:?}", path))?;
    if SUPPORTED_IMAGE_TYPES.contains(&mime_type) {
        Ok(())
    } else {
        Err(anyhow!("unsupported file type {} for {:?}", mime_type, path))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Cursor};

    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    use super::*;
    use crate::{
        config::default_headers,
        normalize::{FrequencyDictionary, KeepAsIs},
        vision::{Annotation, BoundingPoly, ServiceError, Vertex},
    };

    /// A detector with a canned answer.
    struct CannedDetector(Result<Vec<Annotation>, ServiceError>);

    #[async_trait]
    impl TextDetector for CannedDetector {
        async fn detect_text(&self, _image: &[u8]) -> Result<Vec<Annotation>> {
            self.0.clone().map_err(anyhow::Error::from)
        }
    }

    fn pipeline(
        answer: Result<Vec<Annotation>, ServiceError>,
        output_dir: Option<PathBuf>,
    ) -> Pipeline {
        let speller: Arc<dyn SpellCorrector> = Arc::new(FrequencyDictionary::builtin());
        let normalizer = TextNormalizer::new(speller.clone(), &default_headers()).unwrap();
        Pipeline::new(
            Arc::new(CannedDetector(answer)),
            normalizer,
            speller,
            output_dir,
        )
    }

    fn write_png(path: &Path) {
        let image =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 20, Rgba([255; 4])));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        fs::write(path, bytes.into_inner()).unwrap();
    }

    fn word(text: &str, x: i32) -> Annotation {
        Annotation {
            description: Some(text.to_owned()),
            confidence: None,
            bounding_poly: Some(BoundingPoly {
                vertices: vec![
                    Vertex { x, y: 2 },
                    Vertex { x: x + 5, y: 2 },
                    Vertex { x: x + 5, y: 8 },
                    Vertex { x, y: 8 },
                ],
            }),
        }
    }

    #[tokio::test]
    async fn processes_gravity_example() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join("gravity.png");
        write_png(&image_path);
        let annotations = ["Gravity", "pulls", "objects", "objects", "down."]
            .iter()
            .enumerate()
            .map(|(i, text)| word(text, i as i32 * 6))
            .collect();
        let pipeline = pipeline(Ok(annotations), Some(dir.path().join("out")));

        let report = pipeline.process_image(&image_path).await?;
        assert_eq!(report.raw_text, "Gravity pulls objects objects down.");
        assert_eq!(report.cleaned_text, "Gravity pulls objects down.");
        assert_eq!(report.confidence_source, ConfidenceSource::Proxy);
        assert!((0.0..=100.0).contains(&report.confidence));
        let annotated = report.annotated_image.expect("annotated image");
        assert!(annotated.ends_with("out/gravity_annotated.png"));
        assert!(annotated.exists());
        Ok(())
    }

    #[tokio::test]
    async fn no_text_is_an_empty_report() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join("blank.png");
        write_png(&image_path);
        let pipeline = pipeline(Ok(vec![]), Some(dir.path().to_owned()));
        let report = pipeline.process_image(&image_path).await?;
        assert_eq!(report, ImageReport::no_text());
        Ok(())
    }

    #[tokio::test]
    async fn service_errors_stop_processing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join("page.png");
        write_png(&image_path);
        let pipeline = pipeline(
            Err(ServiceError {
                message: "Bad image data.".to_owned(),
            }),
            None,
        );
        let err = pipeline.process_image(&image_path).await.unwrap_err();
        assert!(err.downcast_ref::<ServiceError>().is_some());
        assert!(format!("{err:#}").contains("Google Vision API Error: Bad image data."));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_non_images() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "just some text")?;
        let pipeline = pipeline(Ok(vec![]), None);
        assert!(pipeline.process_image(&path).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn proxy_score_ignores_disabled_spell_check() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join("page.png");
        write_png(&image_path);
        let annotations = ["zzqx", "qwrtp", "blorf"]
            .iter()
            .enumerate()
            .map(|(i, text)| word(text, i as i32 * 6))
            .collect();
        let normalizer = TextNormalizer::new(Arc::new(KeepAsIs), &default_headers())?;
        let pipeline = Pipeline::new(
            Arc::new(CannedDetector(Ok(annotations))),
            normalizer,
            Arc::new(FrequencyDictionary::builtin()),
            None,
        );
        let report = pipeline.process_image(&image_path).await?;
        assert_eq!(report.cleaned_text, "zzqx qwrtp blorf");
        assert_eq!(report.confidence_source, ConfidenceSource::Proxy);
        assert_eq!(report.confidence, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn api_confidence_is_used_when_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join("page.png");
        write_png(&image_path);
        let annotations = vec![Annotation {
            description: Some("Gravity".to_owned()),
            confidence: Some(0.92),
            bounding_poly: None,
        }];
        let report = pipeline(Ok(annotations), None)
            .process_image(&image_path)
            .await?;
        assert_eq!(report.confidence_source, ConfidenceSource::Api);
        assert!((report.confidence - 92.0).abs() < 0.01);
        assert_eq!(report.annotated_image, None);
        Ok(())
    }
}
