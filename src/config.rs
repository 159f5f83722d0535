use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::split::SplitConfig;

/// which date index implementation answers point-in-time queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateIndexKind {
    /// on-disk directory tree keyed by UTC date fields
    #[default]
    Directory,
    /// no index; walks the revision tree on every query
    Scan,
}

/// repository configuration, stored as config.toml by `Repository::init`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// root of live content files
    pub content_dir: PathBuf,
    /// root of meta directories (properties, revisions, date index)
    pub meta_dir: PathBuf,
    /// suffix appended to a node's physical path to name its meta directory
    #[serde(default = "default_meta_suffix")]
    pub meta_suffix: String,
    /// splitting of node paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<SplitConfig>,
    /// splitting of revision names below a node's revisions directory
    #[serde(default = "default_revision_split")]
    pub revision_split: Option<SplitConfig>,
    /// stage content writes in a temporary file and rename on close
    #[serde(default = "default_true")]
    pub copy_on_write: bool,
    /// notify the configured indexer after writes
    #[serde(default)]
    pub auto_index: bool,
    /// glob patterns of file names hidden from children listings
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    /// child streamed instead of the generated listing when reading a collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_alternative: Option<String>,
    #[serde(default)]
    pub date_index: DateIndexKind,
    /// report index entries pointing at missing revisions instead of skipping them
    #[serde(default)]
    pub strict_index: bool,
}

fn default_meta_suffix() -> String {
    ".meta".to_string()
}

fn default_revision_split() -> Option<SplitConfig> {
    Some(SplitConfig::revisions())
}

fn default_true() -> bool {
    true
}

fn default_ignore() -> Vec<String> {
    vec![".*".to_string()]
}

impl Config {
    /// config with content and meta roots below `root`
    pub fn new(root: &Path) -> Self {
        Self::with_dirs(root.join("content"), root.join("meta"))
    }

    pub fn with_dirs(content_dir: impl Into<PathBuf>, meta_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
            meta_dir: meta_dir.into(),
            meta_suffix: default_meta_suffix(),
            split: None,
            revision_split: default_revision_split(),
            copy_on_write: true,
            auto_index: false,
            ignore: default_ignore(),
            directory_alternative: None,
            date_index: DateIndexKind::default(),
            strict_index: false,
        }
    }

    pub fn with_split(mut self, split: SplitConfig) -> Self {
        self.split = Some(split);
        self
    }

    /// load config from file, resolving relative directories against its location
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if let Some(base) = path.parent() {
            if config.content_dir.is_relative() {
                config.content_dir = base.join(&config.content_dir);
            }
            if config.meta_dir.is_relative() {
                config.meta_dir = base.join(&config.meta_dir);
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.meta_suffix.is_empty() || self.meta_suffix.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "invalid meta suffix: {:?}",
                self.meta_suffix
            )));
        }
        if let Some(split) = &self.split {
            split.validate()?;
        }
        if let Some(split) = &self.revision_split {
            split.validate()?;
        }
        for pattern in &self.ignore {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidConfig(format!("ignore pattern {}: {}", pattern, e)))?;
        }
        Ok(())
    }
}
