//! I/O utilities.
//!
//! We read image lists as JSONL or CSV, config files as TOML or JSON, and raw
//! text as plain UTF-8. We write JSONL records or plain text. Any of these may
//! come from (or go to) a file or standard input (or output).

use std::{pin::Pin, sync::Arc, task::Context};

use futures::{StreamExt as _, pin_mut};
use peekable::tokio::AsyncPeekable;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWrite,
        AsyncWriteExt as _, BufReader, BufWriter, ReadBuf,
    },
};
use tokio_stream::wrappers::LinesStream;

use crate::prelude::*;

use super::BoxedStream;

/// A reader which knows whether its input looks like JSON (or JSONL), so that
/// we can pick a parser without asking the user.
pub struct SmartReader {
    /// Is our input JSON or JSONL?
    is_json_like: bool,

    /// A human-readable description of the input source, for error messages.
    description: String,

    /// The underlying reader, pinned so async reads can borrow into it.
    reader: Pin<Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>>,
}

impl SmartReader {
    /// Wrap an existing reader, peeking at the first byte to detect JSON.
    pub async fn new_from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let mut peekable = AsyncPeekable::new(Box::new(BufReader::new(reader)));
        let mut buffer = vec![0; 1];
        peekable
            .peek_exact(&mut buffer)
            .await
            .with_context(|| format!("{} is empty", description))?;
        Ok(Self {
            is_json_like: buffer[0] == b'{',
            description,
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Open a file, using its extension to detect JSON.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let is_json_like = ext == "json" || ext == "jsonl";
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open file at path: {:?}", path))?;
        Ok(Self {
            is_json_like,
            description: path.to_string_lossy().into_owned(),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Open either a [`Path`] or standard input.
    pub async fn new_from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_from_path(path).await,
            None => Self::new_from_reader("stdin".to_owned(), tokio::io::stdin()).await,
        }
    }

    /// Is our input JSON-like?
    pub fn is_json_like(&self) -> bool {
        self.is_json_like
    }
}

impl AsyncRead for SmartReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        Pin::get_mut(self).reader.as_mut().poll_read(cx, buf)
    }
}

impl AsyncBufRead for SmartReader {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> std::task::Poll<std::io::Result<&[u8]>> {
        Pin::get_mut(self).reader.as_mut().poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::get_mut(self).reader.as_mut().consume(amt)
    }
}

/// Read TOML or JSON from a file.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut reader = SmartReader::new_from_path(path).await?;
    let mut data = String::new();
    reader
        .read_to_string(&mut data)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if reader.is_json_like() {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// A stream of [`serde_json::Value`] records.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read JSONL or CSV records from a file or stdin. CSV rows become JSON
/// objects keyed by the header row, with string values.
pub async fn read_jsonl_or_csv(path: Option<&Path>) -> Result<JsonStream> {
    let reader = SmartReader::new_from_path_or_stdin(path).await?;
    let description = Arc::new(reader.description.clone());
    if reader.is_json_like() {
        let lines = LinesStream::new(reader.lines());
        Ok(Box::pin(
            lines
                .filter(|line| {
                    let blank = matches!(line, Ok(line) if line.trim().is_empty());
                    async move { !blank }
                })
                .map(move |line| {
                    let line = line?;
                    serde_json::from_str::<Value>(&line).with_context(|| {
                        format!(
                            "Failed to parse JSON from line in {:?}: {:?}",
                            description, line
                        )
                    })
                }),
        ))
    } else {
        let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(reader);
        let headers = Arc::new(
            reader
                .headers()
                .await
                .with_context(|| {
                    format!("Failed to read CSV headers from {:?}", description)
                })?
                .to_owned(),
        );
        Ok(Box::pin(reader.into_records().map(move |record| {
            let record = record.with_context(|| {
                format!("Failed to read CSV record from {:?}", description)
            })?;
            let map: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| (header.to_owned(), Value::String(value.to_owned())))
                .collect();
            Ok(Value::Object(map))
        })))
    }
}

/// Read an entire text file, or all of stdin.
pub async fn read_text(path: Option<&Path>) -> Result<String> {
    let mut text = String::new();
    match path {
        Some(path) => {
            File::open(path)
                .await
                .with_context(|| format!("Failed to open file at path: {:?}", path))?
                .read_to_string(&mut text)
                .await
                .with_context(|| format!("Failed to read text from {:?}", path))?;
        }
        None => {
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read text from stdin")?;
        }
    }
    Ok(text)
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of JSON values, one per line, to a file or stdout.
pub async fn write_jsonl(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(value) = stream.next().await {
        let value = value?;
        let json = serde_json::to_string(&value)
            .with_context(|| format!("Failed to serialize JSON: {:?}", value))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Write plain text, followed by a newline, to a file or stdout.
pub async fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    writer
        .write_all(text.as_bytes())
        .await
        .context("Failed to write text to output")?;
    if !text.ends_with('\n') {
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}
