//! Confidence scores for extracted text, as percentages.
//!
//! Plain text detection rarely reports a confidence, so most of the time we
//! fall back to a proxy score computed from the text itself.

use schemars::JsonSchema;

use crate::{normalize::SpellCorrector, prelude::*, vision::Annotation};

/// Where a confidence score came from.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    /// Averaged from the OCR service's own confidence values.
    Api,
    /// Estimated from the text, because the service gave us nothing useful.
    Proxy,
    /// No text was detected.
    None,
}

/// Punctuation which may wrap an otherwise clean token.
const WRAPPING_PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '"', '\'', '“', '”', '‘', '’',
];

/// Pick a confidence score for a set of annotations.
///
/// The service's values are only trusted if the first annotation has a
/// positive confidence.
pub fn score(
    annotations: &[Annotation],
    raw_text: &str,
    speller: &dyn SpellCorrector,
) -> (f32, ConfidenceSource) {
    let api_confidence = annotations.first().and_then(|a| a.confidence);
    if api_confidence.is_some_and(|c| c > 0.0) {
        let confidence = average_confidence(annotations);
        debug!(confidence, "Average confidence score (API)");
        (confidence, ConfidenceSource::Api)
    } else {
        let confidence = proxy_confidence(raw_text, speller);
        debug!(confidence, "API confidence missing, using proxy score");
        (confidence, ConfidenceSource::Proxy)
    }
}

/// Mean of all reported confidences, as a percentage. Annotations without a
/// confidence are skipped.
pub fn average_confidence(annotations: &[Annotation]) -> f32 {
    let values = annotations
        .iter()
        .filter_map(|a| a.confidence)
        .collect::<Vec<_>>();
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    (mean * 100.0).clamp(0.0, 100.0)
}

/// Estimate confidence from the text alone: the percentage of tokens which
/// look cleanly recognized.
///
/// A token counts as clean if it is a known word or a number. Tokens made
/// only of punctuation or symbols are ignored. Words joined by `/` or `-`
/// ("km/h", "free-fall") are clean if every part is.
pub fn proxy_confidence(raw_text: &str, speller: &dyn SpellCorrector) -> f32 {
    let mut counted = 0usize;
    let mut clean = 0usize;
    for token in raw_text.split_whitespace() {
        let token = token.trim_matches(WRAPPING_PUNCTUATION);
        if !token.chars().any(char::is_alphanumeric) {
            continue;
        }
        counted += 1;
        if is_clean_token(token, speller) {
            clean += 1;
        }
    }
    if counted == 0 {
        return 0.0;
    }
    clean as f32 / counted as f32 * 100.0
}

fn is_clean_token(token: &str, speller: &dyn SpellCorrector) -> bool {
    if is_number(token) {
        return true;
    }
    token
        .split(['/', '-'])
        .filter(|part| !part.is_empty())
        .all(|part| {
            is_number(part)
                || (part.chars().all(char::is_alphabetic) && speller.is_known(part))
        })
}

/// Digits with optional decimal, grouping or percent signs: "9.8", "1,000",
/// "42%".
fn is_number(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '%' | '+' | '-'))
}
