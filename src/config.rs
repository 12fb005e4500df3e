//! Configuration files.

use std::sync::Arc;

use schemars::JsonSchema;

use crate::{
    async_utils::io::read_json_or_toml,
    normalize::{FrequencyDictionary, KeepAsIs, SpellCorrector, TextNormalizer},
    prelude::*,
};

/// Headers from the physics worksheet this tool was first used on. Each one
/// always gets a paragraph of its own.
const DEFAULT_HEADERS: &[&str] = &[
    "State the universal law of gravitation.",
    "What do you mean by free fall?",
    "What do you mean by acceleration due to gravity?",
    "If the moon attracts the earth; why does the Earth not move towards the moon?",
];

/// The default header list, as owned strings.
pub fn default_headers() -> Vec<String> {
    DEFAULT_HEADERS.iter().map(|&h| h.to_owned()).collect()
}

/// Settings which may be loaded from a TOML or JSON file.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields, default)]
pub struct CleanerConfig {
    /// Exact header or question strings which should be set apart as their own
    /// paragraphs. Matched case-insensitively, in this order.
    pub headers: Vec<String>,

    /// An extra word list in `word count` format, merged into the built-in
    /// dictionary. Relative paths are resolved against the config file.
    pub dictionary_path: Option<PathBuf>,

    /// Keep header, bullet and sentence line breaks in cleaned text, instead
    /// of flattening them into spaces.
    pub preserve_line_breaks: bool,

    /// Base URL of the Vision API, without the `/v1/...` path.
    pub api_base: Option<String>,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            headers: default_headers(),
            dictionary_path: None,
            preserve_line_breaks: false,
            api_base: None,
        }
    }
}

impl CleanerConfig {
    /// Load a config file, or use the defaults if `path` is `None`.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let mut config = read_json_or_toml::<Self>(path).await?;
        if let Some(dictionary_path) = &config.dictionary_path
            && dictionary_path.is_relative()
            && let Some(dir) = path.parent()
        {
            config.dictionary_path = Some(dir.join(dictionary_path));
        }
        config
            .validate()
            .with_context(|| format!("invalid config file {:?}", path))?;
        debug!(?config, "Loaded config");
        Ok(config)
    }

    /// Check for settings we can't use.
    pub fn validate(&self) -> Result<()> {
        if let Some(idx) = self.headers.iter().position(|h| h.trim().is_empty()) {
            return Err(anyhow!("header {} is empty", idx + 1));
        }
        Ok(())
    }

    /// Build our word-frequency dictionary. This should happen once per run,
    /// because loading a large word list is slow.
    ///
    /// Confidence scoring always uses this dictionary, even when spelling
    /// correction is turned off.
    #[instrument(level = "debug", skip(self))]
    pub fn build_dictionary(&self) -> Result<Arc<dyn SpellCorrector>> {
        let mut dictionary = FrequencyDictionary::builtin();
        if let Some(path) = &self.dictionary_path {
            dictionary.extend(FrequencyDictionary::load(path)?);
        }
        debug!(words = dictionary.len(), "Loaded spelling dictionary");
        Ok(Arc::new(dictionary))
    }

    /// Build a [`TextNormalizer`] using our headers. If `spell_check` is false,
    /// words are kept as written instead of being corrected with `dictionary`.
    pub fn build_normalizer(
        &self,
        dictionary: Arc<dyn SpellCorrector>,
        spell_check: bool,
        keep_line_breaks: bool,
    ) -> Result<TextNormalizer> {
        let speller: Arc<dyn SpellCorrector> = if spell_check {
            dictionary
        } else {
            Arc::new(KeepAsIs)
        };
        Ok(TextNormalizer::new(speller, &self.headers)?
            .with_preserved_line_breaks(keep_line_breaks || self.preserve_line_breaks))
    }
}
