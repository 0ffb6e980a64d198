//! Conversion configuration
//!
//! An optional `unfurl.toml` next to the script supplies defaults for the
//! conversion; command-line arguments override it.

use std::path::Path;

use serde::Deserialize;

use crate::errors::{ConversionError, ConvertResult};

pub const CONFIG_FILE: &str = "unfurl.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// Django project name (`django-admin startproject <name>`)
    pub project_name: Option<String>,
    /// App name; defaults to the script filename
    pub app_name: Option<String>,
}

impl ConvertConfig {
    pub fn load(path: &Path) -> ConvertResult<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|err| ConversionError::Config(err.to_string()))
    }

    /// Load `unfurl.toml` from a directory, falling back to defaults when
    /// there is none
    pub fn load_from_dir(dir: &Path) -> ConvertResult<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let config: ConvertConfig =
            toml::from_str("project_name = \"myproject\"\napp_name = \"counter\"\n").unwrap();
        assert_eq!(config.project_name.as_deref(), Some("myproject"));
        assert_eq!(config.app_name.as_deref(), Some("counter"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<ConvertConfig, _> = toml::from_str("projcet_name = \"typo\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConvertConfig::load_from_dir(dir.path()).unwrap();
        assert!(config.project_name.is_none());
        assert!(config.app_name.is_none());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "project_name = \"site\"\n").unwrap();
        let config = ConvertConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.project_name.as_deref(), Some("site"));
    }
}
