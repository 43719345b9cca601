use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, Result};
use crate::bullets::DEFAULT_BULLET_FIELD;
use crate::extract::{default_sections, SectionSpec};
use crate::render::RendererKind;
use crate::store::DEFAULT_ANKI_URL;

pub const CONFIG_FILE_NAME: &str = "config.yml";
pub const DEFAULT_MAPPING_FILE: &str = "anki_note_map.tsv";

/// Settings read from `config.yml`; every key is optional.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(default)]
pub struct Config {
    pub anki_url: String,
    pub timeout_secs: u64,
    pub renderers: Vec<RendererKind>,
    pub sections: Vec<SectionSpec>,
    pub mapping: PathBuf,
    /// field rewritten by `bullets` and `export --bullets`
    pub bullet_field: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            anki_url: DEFAULT_ANKI_URL.to_string(),
            timeout_secs: 30,
            renderers: vec![RendererKind::MultiMarkdown, RendererKind::Builtin],
            sections: default_sections(),
            mapping: PathBuf::from(DEFAULT_MAPPING_FILE),
            bullet_field: DEFAULT_BULLET_FIELD.to_string(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn from_yaml(text: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.renderers.is_empty() {
            return kind_fail!(Generic, "config lists no renderers".to_string());
        }
        if self.sections.is_empty() {
            return kind_fail!(Generic, "config lists no sections".to_string());
        }
        for (i, s) in self.sections.iter().enumerate() {
            if self.sections[..i].iter().any(|o| o.field == s.field) {
                return kind_fail!(Generic, format!("field '{}' is filled by more than one section", s.field));
            }
        }
        Ok(())
    }

    /// Load the explicit file when given, else the user config file when it
    /// exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.is_file() => p,
                _ => {
                    debug!("no config file, using defaults");
                    return Ok(Config::default());
                }
            },
        };
        let text = fs::read_to_string(&path).map_err(|e| Error {
            kind: ErrorKind::InternalIo(e),
            desc: format!("cannot read config {}", path.display()),
            detail: None,
        })?;
        debug!(path = %path.display(), "loading config");
        Config::from_yaml(&text).map_err(|mut e| {
            e.detail = Some(path.display().to_string());
            e
        })
    }
}

/// `<config dir>/cardsync/config.yml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cardsync").join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        assert_eq!(Config::from_yaml("{}").unwrap(), Config::default());
    }

    #[test]
    fn partial_file_overrides_only_its_keys() {
        let config = Config::from_yaml("anki_url: http://localhost:9000\nrenderers: [pandoc, builtin]\n\
                                        sections:\n  - marker: QUESTION\n    field: Text\n").unwrap();
        assert_eq!(config.anki_url, "http://localhost:9000");
        assert_eq!(config.renderers, vec![RendererKind::Pandoc, RendererKind::Builtin]);
        assert_eq!(config.sections, vec![SectionSpec::new("QUESTION", "Text", true)]);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn two_sections_for_one_field_is_refused() {
        let text = "sections:\n  - {marker: A, field: Front}\n  - {marker: B, field: Front}\n";
        assert!(Config::from_yaml(text).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/cardsync.yml"))).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InternalIo(_)));
    }
}
