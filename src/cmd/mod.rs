//! Command-line entry points.

use std::sync::Arc;

use clap::Args;

use crate::{
    config::CleanerConfig,
    normalize::{SpellCorrector, TextNormalizer},
    prelude::*,
};

pub mod clean;
pub mod ocr;
pub mod schema;

/// Options controlling how we clean text, shared by several subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct NormalizeOpts {
    /// A TOML or JSON config file with headers and dictionary settings.
    #[clap(long = "config")]
    pub config_path: Option<PathBuf>,

    /// Don't correct spelling.
    #[clap(long)]
    pub no_spell_check: bool,

    /// Keep header, bullet and sentence line breaks in the cleaned text,
    /// instead of flattening everything onto one line.
    #[clap(long)]
    pub keep_line_breaks: bool,
}

impl NormalizeOpts {
    /// Load our config, and build the dictionary and normalizer it describes.
    ///
    /// The dictionary is returned separately because confidence scoring uses
    /// it too, whether or not spelling correction is enabled.
    pub async fn load(
        &self,
    ) -> Result<(CleanerConfig, Arc<dyn SpellCorrector>, TextNormalizer)> {
        let config = CleanerConfig::load(self.config_path.as_deref()).await?;
        let dictionary = config.build_dictionary()?;
        let normalizer = config.build_normalizer(
            dictionary.clone(),
            !self.no_spell_check,
            self.keep_line_breaks,
        )?;
        Ok((config, dictionary, normalizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::proxy_confidence;

    #[tokio::test]
    async fn no_spell_check_still_scores_with_dictionary() -> Result<()> {
        let opts = NormalizeOpts {
            no_spell_check: true,
            ..NormalizeOpts::default()
        };
        let (_config, dictionary, normalizer) = opts.load().await?;
        assert_eq!(normalizer.clean_and_format("zzqx qwrtp blorf"), "zzqx qwrtp blorf");
        assert_eq!(proxy_confidence("zzqx qwrtp blorf", dictionary.as_ref()), 0.0);
        assert_eq!(
            proxy_confidence("Gravity pulls objects down.", dictionary.as_ref()),
            100.0
        );
        Ok(())
    }
}
