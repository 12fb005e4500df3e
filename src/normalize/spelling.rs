//! Spelling correction backends.
//!
//! The normalizer only needs two questions answered: "do you know this word?"
//! and "what did the writer probably mean?". [`FrequencyDictionary`] answers
//! them with the classic edit-distance model: a misspelled word is replaced by
//! the most frequent known word one edit away, or failing that, two edits away.
//! Words much longer than anything in the dictionary are left alone, since the
//! number of candidate edits grows with the square of the word length.

use std::{collections::HashMap, fs};

use crate::prelude::*;

/// Our built-in English word list, in `word count` format.
const BUILTIN_WORDS: &str = include_str!("en_words.txt");

/// Letters we use to build candidate edits.
const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

/// How much longer than our longest word a token may be before we stop trying
/// to correct it.
const MAX_EXTRA_LETTERS: usize = 3;

/// A spelling-correction backend.
///
/// Implementations must be cheap to share between threads, because a single
/// instance is built at startup and reused for every image.
pub trait SpellCorrector: Send + Sync + 'static {
    /// Is `word` a recognized dictionary word?
    fn is_known(&self, word: &str) -> bool;

    /// The most likely intended word, or `None` if we have no better guess.
    fn correction(&self, word: &str) -> Option<String>;
}

/// A word-frequency dictionary. Lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct FrequencyDictionary {
    /// Lower-cased words and their relative frequencies.
    words: HashMap<String, u64>,

    /// Length of our longest word, in characters.
    longest_word: usize,
}

impl FrequencyDictionary {
    /// Our built-in English dictionary.
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_WORDS).expect("built-in word list should parse")
    }

    /// Load a word list from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read word list {:?}", path))?;
        Self::parse(&text).with_context(|| format!("failed to parse word list {:?}", path))
    }

    /// Parse a word list. Each line holds a word and an optional count,
    /// separated by whitespace. Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut dictionary = Self::default();
        for (line_idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            let count = match fields.next() {
                Some(count) => count.parse::<u64>().with_context(|| {
                    format!("invalid count {:?} on line {}", count, line_idx + 1)
                })?,
                None => 1,
            };
            dictionary.add_word(word, count);
        }
        Ok(dictionary)
    }

    /// Add a word, summing counts if we already know it.
    pub fn add_word(&mut self, word: &str, count: u64) {
        let word = word.to_lowercase();
        self.longest_word = self.longest_word.max(word.chars().count());
        *self.words.entry(word).or_default() += count;
    }

    /// Merge another dictionary into this one.
    pub fn extend(&mut self, other: FrequencyDictionary) {
        for (word, count) in other.words {
            self.add_word(&word, count);
        }
    }

    /// How many distinct words do we know?
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Pick the most frequent known word from `candidates`. Ties go to the
    /// alphabetically first word, so that corrections are stable.
    fn best_known<'a>(&self, candidates: impl Iterator<Item = &'a String>) -> Option<String> {
        candidates
            .filter_map(|word| self.words.get(word).map(|&count| (count, word)))
            .max_by(|(a_count, a_word), (b_count, b_word)| {
                a_count.cmp(b_count).then_with(|| b_word.cmp(a_word))
            })
            .map(|(_, word)| word.to_owned())
    }
}

impl SpellCorrector for FrequencyDictionary {
    fn is_known(&self, word: &str) -> bool {
        self.words.contains_key(&word.to_lowercase())
    }

    fn correction(&self, word: &str) -> Option<String> {
        let word = word.to_lowercase();
        if self.words.contains_key(&word) {
            return Some(word);
        }
        if word.chars().count() > self.longest_word + MAX_EXTRA_LETTERS {
            return None;
        }

        let one_edit = edits(&word);
        if let Some(best) = self.best_known(one_edit.iter()) {
            return Some(best);
        }

        // Only keep known words at distance two, or this gets huge.
        let two_edits = one_edit
            .iter()
            .flat_map(|edit| edits(edit))
            .filter(|edit| self.words.contains_key(edit))
            .collect::<Vec<_>>();
        self.best_known(two_edits.iter())
    }
}

/// A corrector which accepts every word as written.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAsIs;

impl SpellCorrector for KeepAsIs {
    fn is_known(&self, _word: &str) -> bool {
        true
    }

    fn correction(&self, _word: &str) -> Option<String> {
        None
    }
}

/// All strings one deletion, transposition, replacement or insertion away
/// from `word`.
fn edits(word: &str) -> Vec<String> {
    let chars = word.chars().collect::<Vec<_>>();
    let mut out = Vec::with_capacity(chars.len() * 54 + 26);
    let joined = |left: &[char], middle: &str, right: &[char]| {
        let mut s = String::with_capacity(word.len() + 2);
        s.extend(left);
        s.push_str(middle);
        s.extend(right);
        s
    };

    for i in 0..=chars.len() {
        let (left, right) = chars.split_at(i);
        if !right.is_empty() {
            out.push(joined(left, "", &right[1..]));
        }
        if right.len() > 1 {
            let swapped = format!("{}{}", right[1], right[0]);
            out.push(joined(left, &swapped, &right[2..]));
        }
        for letter in ALPHABET.chars() {
            let letter = letter.to_string();
            if !right.is_empty() {
                out.push(joined(left, &letter, &right[1..]));
            }
            out.push(joined(left, &letter, right));
        }
    }
    out
}
