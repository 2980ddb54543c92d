//! TOML loading for the configuration structs.
//!
//! Ambient-stack plumbing only: the core types in [`super`] are constructible
//! without this module, which exists so the CLI can load a `sina.toml` file
//! instead of wiring every flag by hand.

use std::path::Path;

use serde::Deserialize;

use super::{AlignmentConfig, FamilySelectorConfig, SearchConfig};
use crate::error::Error;

/// The full on-disk configuration surface (§6's "recognized options" table).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub alignment: AlignmentConfig,
    pub family_selector: FamilySelectorConfig,
    pub search: SearchConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        ConfigFile {
            alignment: AlignmentConfig::default(),
            family_selector: FamilySelectorConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<ConfigFile, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| Error::Configuration(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(parsed.alignment, AlignmentConfig::default());
        assert_eq!(parsed.search, SearchConfig::default());
    }

    #[test]
    fn overrides_apply_per_field() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [alignment]
            match-score = 2.0
            mismatch-score = -1.0
            gap-open = 5.0
            gap-extend = 2.0
            family-weight = 1.0
            insertion-policy = "Forbid"
            overhang = "Attach"
            lowercase = "Unaligned"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.alignment.match_score, 2.0);
        assert_eq!(
            parsed.alignment.insertion_policy,
            crate::config::InsertionPolicy::Forbid
        );
    }
}
