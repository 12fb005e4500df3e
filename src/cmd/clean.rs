//! The `clean` subcommand.

use clap::Args;
use futures::StreamExt as _;

use crate::{
    async_utils::io::{read_jsonl_or_csv, read_text, write_jsonl, write_text},
    normalize::TextNormalizer,
    prelude::*,
};

use super::NormalizeOpts;

/// Options for the `clean` subcommand.
#[derive(Debug, Args)]
pub struct CleanOpts {
    /// Text to clean. Defaults to standard input.
    #[clap(value_name = "FILE")]
    pub input_path: Option<PathBuf>,

    /// Write cleaned output here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Read JSONL (or CSV) records instead of plain text, and add a
    /// `cleaned_text` field to each.
    #[clap(long)]
    pub jsonl: bool,

    /// The record field holding raw text, when using `--jsonl`.
    #[clap(long, default_value = "text")]
    pub field: String,

    #[clap(flatten)]
    pub normalize_opts: NormalizeOpts,
}

/// The `clean` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_clean(opts: &CleanOpts) -> Result<()> {
    let (_config, _dictionary, normalizer) = opts.normalize_opts.load().await?;
    let input_path = opts.input_path.as_deref().filter(|p| *p != Path::new("-"));

    if opts.jsonl {
        let field = opts.field.clone();
        let records = read_jsonl_or_csv(input_path)
            .await?
            .map(move |record| clean_record(&normalizer, &field, record?))
            .boxed();
        write_jsonl(opts.output_path.as_deref(), records).await
    } else {
        let raw_text = read_text(input_path).await?;
        let cleaned_text = normalizer.clean_and_format(&raw_text);
        write_text(opts.output_path.as_deref(), &cleaned_text).await
    }
}

/// Add `cleaned_text` to a record. A missing field counts as empty text.
fn clean_record(normalizer: &TextNormalizer, field: &str, record: Value) -> Result<Value> {
    let Value::Object(mut map) = record else {
        return Err(anyhow!("expected a JSON object, found {}", record));
    };
    let cleaned_text = map
        .get(field)
        .map(|raw| normalizer.clean_and_format_value(raw))
        .unwrap_or_default();
    map.insert("cleaned_text".to_owned(), Value::String(cleaned_text));
    Ok(Value::Object(map))
}
