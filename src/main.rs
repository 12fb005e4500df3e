use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod confidence;
mod config;
mod normalize;
mod pipeline;
mod prelude;
mod render;
mod retry;
mod ui;
mod vision;

/// Extract text from images with Google Cloud Vision, and clean it up.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GOOGLE_VISION_API_KEY: A Cloud Vision API key.
  - GOOGLE_OAUTH_ACCESS_TOKEN: An OAuth access token, used instead of an
    API key (for example, from `gcloud auth print-access-token`).
  - GOOGLE_VISION_API_BASE (optional): Override the server URL.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR images, clean the extracted text, and score it.
    Ocr(cmd::ocr::OcrOpts),
    /// Clean and reformat text which was already extracted.
    Clean(cmd::clean::CleanOpts),
    /// Print schemas for input, output and config formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Ocr(opts) => opts.output_path.is_none(),
            Cmd::Clean(opts) => opts.output_path.is_none(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Progress bars would get mixed into our output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Ocr(opts) => cmd::ocr::cmd_ocr(ui, opts).await?,
        Cmd::Clean(opts) => cmd::clean::cmd_clean(opts).await?,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await?,
    }
    Ok(())
}
