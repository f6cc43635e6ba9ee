//! Runtime configuration, loadable from TOML.
//!
//! ```toml
//! module_paths = ["scripts/lib"]
//! collection_dir = "collections"
//! dev_mode = false
//! interrupt_workers = 1
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings of a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Directories appended to `sys.path`.
    pub module_paths: Vec<PathBuf>,
    /// Every subdirectory of this directory is appended to `sys.path`.
    pub collection_dir: Option<PathBuf>,
    /// Expose unreleased calculators to scripts.
    pub dev_mode: bool,
    /// Worker threads delivering interrupts.
    pub interrupt_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module_paths: Vec::new(),
            collection_dir: None,
            dev_mode: false,
            interrupt_workers: 1,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded runtime configuration");
        Ok(config)
    }

    #[must_use]
    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_collection_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.collection_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    #[must_use]
    pub fn with_interrupt_workers(mut self, workers: usize) -> Self {
        self.interrupt_workers = workers;
        self
    }

    /// `module_paths` followed by the subdirectories of `collection_dir`, sorted by name.
    pub(crate) fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.module_paths.clone();
        if let Some(dir) = &self.collection_dir {
            match fs::read_dir(dir) {
                Ok(entries) => {
                    let mut collections: Vec<PathBuf> = entries
                        .filter_map(Result::ok)
                        .map(|entry| entry.path())
                        .filter(|path| path.is_dir())
                        .collect();
                    collections.sort();
                    paths.extend(collections);
                }
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "could not read collection directory");
                }
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config = RuntimeConfig::from_toml_str("dev_mode = true").unwrap();
        assert_eq!(config, RuntimeConfig::default().with_dev_mode(true));
        assert_eq!(config.interrupt_workers, 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RuntimeConfig::from_toml_str("threads = 4").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn collection_subdirectories_follow_module_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a collection").unwrap();

        let config = RuntimeConfig::default()
            .with_module_path("/opt/lib")
            .with_collection_dir(dir.path());
        assert_eq!(
            config.search_paths(),
            vec![PathBuf::from("/opt/lib"), dir.path().join("a"), dir.path().join("b")]
        );
    }

    #[test]
    fn load_reports_the_path() {
        let err = RuntimeConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
