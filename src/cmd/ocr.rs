//! The `ocr` subcommand.

use std::sync::{Arc, Mutex};

use clap::Args;
use futures::{StreamExt as _, TryStreamExt as _, stream};
use schemars::JsonSchema;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_jsonl_or_csv, write_jsonl},
    },
    confidence::ConfidenceSource,
    pipeline::Pipeline,
    prelude::*,
    ui::{ProgressConfig, Ui},
    vision::{DetectorSettings, EngineType},
};

use super::NormalizeOpts;

/// Options for the `ocr` subcommand.
#[derive(Debug, Args)]
pub struct OcrOpts {
    /// Image files to process.
    #[clap(value_name = "IMAGE")]
    pub images: Vec<PathBuf>,

    /// A JSONL or CSV file listing more images, with `id` and `path` fields.
    #[clap(long)]
    pub input_list: Option<PathBuf>,

    /// Write JSONL results here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Save copies of each image with bounding boxes drawn around the text in
    /// this directory.
    #[clap(long)]
    pub output_dir: Option<PathBuf>,

    /// The OCR engine to use.
    #[clap(long, value_enum, default_value_t = EngineType::default())]
    pub engine: EngineType,

    /// A saved Vision API response, replayed by `--engine fixture`.
    #[clap(long)]
    pub fixture_response: Option<PathBuf>,

    /// Max number of images to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// A timeout, in seconds, for each OCR request.
    #[clap(long)]
    pub timeout: Option<u64>,

    /// What portion of images should we allow to fail? Specified as a number
    /// between 0.0 and 1.0.
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,

    #[clap(flatten)]
    pub normalize_opts: NormalizeOpts,
}

/// An input record describing an image to OCR.
#[derive(Clone, Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct OcrInput {
    /// The ID of the record.
    pub id: Value,

    /// The path to the image.
    pub path: PathBuf,
}

/// An output record describing an OCRed image.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct OcrOutput {
    /// The ID of the record.
    pub id: Value,

    /// The path to the image.
    pub path: PathBuf,

    /// All text detected in the image, joined with spaces.
    pub raw_text: String,

    /// The detected text, after cleaning and formatting.
    pub cleaned_text: String,

    /// Confidence in the extracted text, from 0 to 100.
    pub confidence: f32,

    /// Where the confidence score came from.
    pub confidence_source: ConfidenceSource,

    /// A copy of the image with bounding boxes drawn around detected text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<PathBuf>,

    /// Any errors that occurred. If this is not empty, the image could not be
    /// processed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl OcrOutput {
    /// Did we fail to process this image?
    pub fn is_failure(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let (config, dictionary, normalizer) = opts.normalize_opts.load().await?;
    let detector = opts
        .engine
        .create_detector(&DetectorSettings {
            api_base: config.api_base.clone(),
            timeout: opts.timeout,
            fixture_response: opts.fixture_response.clone(),
        })
        .await?;
    let pipeline = Arc::new(Pipeline::new(
        detector,
        normalizer,
        dictionary,
        opts.output_dir.clone(),
    ));

    let inputs = collect_inputs(opts).await?;
    if inputs.is_empty() {
        return Err(anyhow!("no images to process"));
    }

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔎",
            msg: "OCRing images",
            done_msg: "OCRed images",
        },
        inputs.len() as u64,
    );
    let outputs = process_inputs(pipeline, inputs, opts.job_count.max(1));
    let (outputs, counters) = OcrCounters::wrap_stream(pb.wrap_stream(outputs).boxed());
    write_jsonl(
        opts.output_path.as_deref(),
        outputs
            .map(|output| serde_json::to_value(output).context("failed to serialize output"))
            .boxed(),
    )
    .await?;

    let counters = counters.lock().expect("lock poisoned").to_owned();
    counters.finish(&ui, opts.allowed_failure_rate)
}

/// Gather images from the command line and from `--input-list`.
async fn collect_inputs(opts: &OcrOpts) -> Result<Vec<OcrInput>> {
    let mut inputs = opts
        .images
        .iter()
        .map(|path| OcrInput {
            id: Value::String(path.to_string_lossy().into_owned()),
            path: path.to_owned(),
        })
        .collect::<Vec<_>>();
    if let Some(list) = &opts.input_list {
        let list = (list != Path::new("-")).then_some(list.as_path());
        let records = read_jsonl_or_csv(list).await?.try_collect::<Vec<_>>().await?;
        for record in records {
            let input = serde_json::from_value::<OcrInput>(record)
                .context("failed to deserialize input record")?;
            inputs.push(input);
        }
    }
    Ok(inputs)
}

/// Process images concurrently, returning results in input order.
fn process_inputs(
    pipeline: Arc<Pipeline>,
    inputs: Vec<OcrInput>,
    job_count: usize,
) -> BoxedStream<OcrOutput> {
    stream::iter(inputs)
        .map(move |input| {
            let pipeline = pipeline.clone();
            async move { process_input(&pipeline, input).await }
        })
        .buffered(job_count)
        .boxed()
}

/// Process one image, recording any failure in the output.
#[instrument(level = "debug", skip_all, fields(id = %input.id))]
async fn process_input(pipeline: &Pipeline, input: OcrInput) -> OcrOutput {
    match pipeline.process_image(&input.path).await {
        Ok(report) => OcrOutput {
            id: input.id,
            path: input.path,
            raw_text: report.raw_text,
            cleaned_text: report.cleaned_text,
            confidence: report.confidence,
            confidence_source: report.confidence_source,
            annotated_image: report.annotated_image,
            errors: vec![],
        },
        Err(err) => {
            error!("Failed to process {:?}: {:#}", input.path, err);
            OcrOutput {
                id: input.id,
                path: input.path,
                raw_text: String::new(),
                cleaned_text: String::new(),
                confidence: 0.0,
                confidence_source: ConfidenceSource::None,
                annotated_image: None,
                errors: vec![format!("{:#}", err)],
            }
        }
    }
}

/// Counts of what happened during a run.
#[derive(Clone, Debug, Default)]
struct OcrCounters {
    /// How many images did we process?
    total_count: usize,

    /// How many images failed?
    failure_count: usize,

    /// How many images had no text?
    no_text_count: usize,
}

impl OcrCounters {
    /// Wrap a stream, counting outputs as they go by.
    fn wrap_stream(
        stream: BoxedStream<OcrOutput>,
    ) -> (BoxedStream<OcrOutput>, Arc<Mutex<OcrCounters>>) {
        let counters = Arc::new(Mutex::new(Self::default()));
        let counters_clone = counters.clone();
        let stream = stream
            .inspect(move |output| {
                let mut counters = counters_clone.lock().expect("lock poisoned");
                counters.total_count += 1;
                if output.is_failure() {
                    counters.failure_count += 1;
                } else if output.confidence_source == ConfidenceSource::None {
                    counters.no_text_count += 1;
                }
            })
            .boxed();
        (stream, counters)
    }

    /// Report our counts, and fail if too many images failed.
    fn finish(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        if self.no_text_count > 0 {
            ui.display_message(
                "🈳",
                &format!("{} images contained no text", self.no_text_count),
            );
        }
        let failure_rate = if self.total_count == 0 {
            0.0
        } else {
            self.failure_count as f32 / self.total_count as f32
        };
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of images failed, but only {:.2}% were allowed",
                self.failure_count,
                self.total_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            if self.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!("{} images could not be processed", self.failure_count),
                );
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(errors: Vec<String>, confidence_source: ConfidenceSource) -> OcrOutput {
        OcrOutput {
            id: json!(1),
            path: PathBuf::from("a.png"),
            raw_text: String::new(),
            cleaned_text: String::new(),
            confidence: 0.0,
            confidence_source,
            annotated_image: None,
            errors,
        }
    }

    #[tokio::test]
    async fn counters_enforce_failure_rate() {
        let outputs = vec![
            output(vec![], ConfidenceSource::Proxy),
            output(vec!["boom".to_owned()], ConfidenceSource::None),
            output(vec![], ConfidenceSource::None),
            output(vec![], ConfidenceSource::Api),
        ];
        let (stream, counters) = OcrCounters::wrap_stream(stream::iter(outputs).boxed());
        assert_eq!(stream.collect::<Vec<_>>().await.len(), 4);

        let counters = counters.lock().unwrap().to_owned();
        assert_eq!(counters.total_count, 4);
        assert_eq!(counters.failure_count, 1);
        assert_eq!(counters.no_text_count, 1);

        let ui = Ui::init_for_tests();
        assert!(counters.finish(&ui, 0.0).is_err());
        assert!(counters.finish(&ui, 0.25).is_ok());
    }

    #[test]
    fn serializes_without_empty_fields() {
        let json = serde_json::to_value(output(vec![], ConfidenceSource::Proxy)).unwrap();
        assert_eq!(
            json,
            json!({
                "id": 1,
                "path": "a.png",
                "raw_text": "",
                "cleaned_text": "",
                "confidence": 0.0,
                "confidence_source": "proxy",
            })
        );
    }

    #[tokio::test]
    async fn collects_inputs_from_args_and_list() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("images.jsonl");
        std::fs::write(&list, "{\"id\": \"scan-7\", \"path\": \"scans/7.png\"}\n")?;
        let opts = OcrOpts {
            images: vec![PathBuf::from("page1.png")],
            input_list: Some(list),
            output_path: None,
            output_dir: None,
            engine: EngineType::Fixture,
            fixture_response: None,
            job_count: 1,
            timeout: None,
            allowed_failure_rate: 0.0,
            normalize_opts: NormalizeOpts::default(),
        };
        let inputs = collect_inputs(&opts).await?;
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].id, json!("page1.png"));
        assert_eq!(inputs[1].id, json!("scan-7"));
        assert_eq!(inputs[1].path, PathBuf::from("scans/7.png"));
        Ok(())
    }
}
