//! Cleaning up raw OCR text.
//!
//! OCR output is one long string of recognized fragments. We run it through a
//! fixed series of heuristic passes: fix misspelled words, drop stuttered
//! duplicates, split paragraphs around known headers, break lines at bullets
//! and sentence ends, and then tidy the whitespace.
//!
//! Note that the whitespace pass flattens every line break inserted by the
//! passes before it. Downstream consumers rely on the flattened output, so it
//! stays that way unless [`TextNormalizer::with_preserved_line_breaks`] is
//! used.

use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex, RegexBuilder};

use crate::prelude::*;

pub use self::spelling::{FrequencyDictionary, KeepAsIs, SpellCorrector};

pub mod spelling;

/// A run of word characters.
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("failed to compile regex"));

/// A period and a space, with the decimal digit before it, if any.
static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)?\. ").expect("failed to compile regex"));

/// One or more line breaks, plus any whitespace following each of them.
static LINE_BREAKS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\n\s*)+").expect("failed to compile regex"));

/// The bullet character used by most worksheets.
const BULLET: char = '•';

/// Turns raw OCR text into readable paragraphs.
pub struct TextNormalizer {
    /// Shared spelling backend.
    speller: Arc<dyn SpellCorrector>,

    /// Case-insensitive patterns for each known header, in order.
    headers: Vec<Regex>,

    /// Keep the line breaks inserted by earlier passes.
    preserve_line_breaks: bool,
}

impl TextNormalizer {
    /// Create a normalizer using `speller` and an ordered list of headers which
    /// should always start their own paragraph.
    pub fn new(speller: Arc<dyn SpellCorrector>, headers: &[String]) -> Result<Self> {
        let headers = headers
            .iter()
            .filter(|header| !header.is_empty())
            .map(|header| {
                RegexBuilder::new(&regex::escape(header))
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("failed to compile header {:?}", header))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            speller,
            headers,
            preserve_line_breaks: false,
        })
    }

    /// Only collapse spaces and tabs during whitespace normalization, so that
    /// header, bullet and sentence breaks survive into the output.
    pub fn with_preserved_line_breaks(mut self, preserve: bool) -> Self {
        self.preserve_line_breaks = preserve;
        self
    }

    /// Clean and format `raw_text`. This never fails: empty input produces
    /// empty output.
    #[instrument(level = "trace", skip_all, fields(len = raw_text.len()))]
    pub fn clean_and_format(&self, raw_text: &str) -> String {
        if raw_text.is_empty() {
            return String::new();
        }

        let text = correct_spelling(raw_text, self.speller.as_ref());
        let text = collapse_repeated_words(&text);
        let text = isolate_headers(&text, &self.headers);
        let text = break_bullets(&text);
        let text = break_sentences(&text);
        let text = if self.preserve_line_breaks {
            normalize_horizontal_whitespace(&text)
        } else {
            normalize_whitespace(&text)
        };
        let text = collapse_line_breaks(&text);
        trace!(%text, "Cleaned text");
        text
    }

    /// Clean and format a JSON value. Anything other than a string is treated
    /// as empty input.
    pub fn clean_and_format_value(&self, raw: &Value) -> String {
        match raw {
            Value::String(text) => self.clean_and_format(text),
            _ => String::new(),
        }
    }
}

/// Is this token a candidate for spelling correction?
fn is_alphabetic_word(token: &str) -> bool {
    !token.is_empty() && token.chars().all(char::is_alphabetic)
}

/// Replace unknown alphabetic tokens with their corrections. Everything else
/// passes through untouched. Tokens are rejoined with single spaces.
fn correct_spelling(text: &str, speller: &dyn SpellCorrector) -> String {
    text.split_whitespace()
        .map(|token| {
            if is_alphabetic_word(token) && !speller.is_known(token) {
                match speller.correction(token) {
                    Some(corrected) => {
                        debug!(%token, %corrected, "Corrected spelling");
                        corrected
                    }
                    None => token.to_owned(),
                }
            } else {
                token.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse runs of the same word separated by single spaces ("the the THE")
/// into the first occurrence. Comparison ignores case, and only whole words
/// match, so "the theory" is left alone.
fn collapse_repeated_words(text: &str) -> String {
    let words = WORD_RE.find_iter(text).collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    let mut copied_up_to = 0;
    let mut i = 0;
    while i < words.len() {
        let first = words[i];
        let mut last = i;
        while let Some(next) = words.get(last + 1) {
            let gap = &text[words[last].end()..next.start()];
            if gap == " " && same_word(first.as_str(), next.as_str()) {
                last += 1;
            } else {
                break;
            }
        }
        if last > i {
            out.push_str(&text[copied_up_to..first.end()]);
            copied_up_to = words[last].end();
        }
        i = last + 1;
    }
    out.push_str(&text[copied_up_to..]);
    out
}

/// Case-insensitive word comparison.
fn same_word(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Surround every occurrence of each header with blank lines, keeping the
/// casing of the matched text. Headers are applied one after another, each to
/// the output of the previous one.
fn isolate_headers(text: &str, headers: &[Regex]) -> String {
    headers.iter().fold(text.to_owned(), |text, header| {
        header.replace_all(&text, "\n\n${0}\n\n").into_owned()
    })
}

/// Start a new line before every bullet.
fn break_bullets(text: &str) -> String {
    text.replace(BULLET, "\n•")
}

/// Replace ". " with ".\n", except after a decimal digit, so that numbers like
/// "9.8" followed by a space are left alone. Superscripts and fractions don't
/// count as digits.
fn break_sentences(text: &str) -> String {
    SENTENCE_END_RE
        .replace_all(text, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                caps[0].to_owned()
            } else {
                ".\n".to_owned()
            }
        })
        .into_owned()
}

/// Collapse all whitespace, line breaks included, into single spaces.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace within each line, leaving line breaks in place.
fn normalize_horizontal_whitespace(text: &str) -> String {
    text.split('\n')
        .map(normalize_whitespace)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Collapse runs of line breaks into one, and trim.
fn collapse_line_breaks(text: &str) -> String {
    LINE_BREAKS_RE.replace_all(text, "\n").trim().to_owned()
}
