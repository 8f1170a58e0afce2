//! Remote definition files.
//!
//! `gitpub init` reads a small TOML file describing the backend to attach:
//!
//! ```toml
//! remote-type = "rest"
//!
//! [repo-args]
//! url = "https://blog.example"
//! token = "..."
//! ```
//!
//! The `repo-args` table is backend-specific and passed to the backend
//! registry as JSON; only `remote-type` is interpreted here.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::errors::ConfigError;
use crate::remote::known_remote_types;

/// Parsed remote definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RemoteConfig {
    /// Backend selector, matched against the registry.
    pub remote_type: String,

    /// Backend constructor arguments, passed through uninterpreted.
    #[serde(default)]
    pub repo_args: toml::Table,
}

impl RemoteConfig {
    /// Load and validate a remote definition file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), remote_type = %config.remote_type, "loaded remote config");
        Ok(config)
    }

    /// Check the backend selector against the registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !known_remote_types().contains(&self.remote_type.as_str()) {
            return Err(ConfigError::UnknownRemoteType(self.remote_type.clone()));
        }
        Ok(())
    }

    /// The `repo-args` table as the JSON value the backend registry takes.
    pub fn repo_args_json(&self) -> Result<serde_json::Value, ConfigError> {
        serde_json::to_value(&self.repo_args)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blog.toml");
        std::fs::write(
            &path,
            "remote-type = \"rest\"\n\n[repo-args]\nurl = \"https://blog.example\"\ntoken = \"s\"\n",
        )
        .unwrap();

        let config = RemoteConfig::load(&path).unwrap();
        assert_eq!(config.remote_type, "rest");
        let args = config.repo_args_json().unwrap();
        assert_eq!(args["url"], serde_json::json!("https://blog.example"));
    }

    #[test]
    fn test_missing_file() {
        let err = RemoteConfig::load(Path::new("/no/such/file.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_unknown_remote_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "remote-type = \"gopher\"\n").unwrap();
        let err = RemoteConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRemoteType(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "remote-type = \"rest\"\nbogus = 1\n").unwrap();
        let err = RemoteConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
