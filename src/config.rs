//! Export and import configuration.
//!
//! Both structs deserialize with serde defaults, so a caller can load them
//! from any format and only spell out what differs. The connection itself is
//! never part of the config: the executor is passed in separately.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::import::ResumePoint;
use crate::schema::DEFAULT_TEMP_KEY_ATTEMPTS;
use crate::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_shard_size() -> usize {
    0xFFFF
}

fn default_page_size() -> usize {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_temp_key_attempts() -> usize {
    DEFAULT_TEMP_KEY_ATTEMPTS
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory that receives the manifest files and `data/`.
    pub project_dir: PathBuf,
    /// Gzip the shard files.
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Pretty-print shards with this many spaces; 0 writes compact JSON.
    #[serde(default)]
    pub indent_size: usize,
    /// Flush a shard once its buffered JSON reaches this many bytes.
    #[serde(default = "default_shard_size")]
    pub shard_size_bytes: usize,
    /// Records fetched per scan query.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Replace an existing export directory instead of aborting.
    #[serde(default)]
    pub assume_yes: bool,
    #[serde(default = "default_true")]
    pub pull_uniqueness_constraints: bool,
    #[serde(default = "default_temp_key_attempts")]
    pub temp_key_attempts: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("neo4j-backup"),
            compress: true,
            indent_size: 0,
            shard_size_bytes: default_shard_size(),
            page_size: default_page_size(),
            assume_yes: false,
            pull_uniqueness_constraints: true,
            temp_key_attempts: DEFAULT_TEMP_KEY_ATTEMPTS,
        }
    }
}

impl ExportConfig {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self { project_dir: project_dir.into(), ..Self::default() }
    }

    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_indent_size(mut self, indent_size: usize) -> Self {
        self.indent_size = indent_size;
        self
    }

    pub fn with_shard_size_bytes(mut self, bytes: usize) -> Self {
        self.shard_size_bytes = bytes;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    pub fn with_pull_uniqueness_constraints(mut self, pull: bool) -> Self {
        self.pull_uniqueness_constraints = pull;
        self
    }

    pub fn with_temp_key_attempts(mut self, attempts: usize) -> Self {
        self.temp_key_attempts = attempts;
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        data_dir(&self.project_dir)
    }

    pub fn validate(&self) -> Result<()> {
        check_dir(&self.project_dir)?;
        if self.shard_size_bytes == 0 {
            return Err(Error::Config("shard_size_bytes must be greater than 0".into()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be greater than 0".into()));
        }
        if self.temp_key_attempts == 0 {
            return Err(Error::Config("temp_key_attempts must be greater than 0".into()));
        }
        if self.indent_size > 16 {
            return Err(Error::Config(format!("indent_size {} is larger than 16", self.indent_size)));
        }
        Ok(())
    }
}

// ============================================================================
// Import
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory written by a previous export.
    pub project_dir: PathBuf,
    /// Proceed into a non-empty target or the source database itself.
    #[serde(default)]
    pub assume_yes: bool,
    /// Shards loaded concurrently within one phase.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pick a fresh temp key when the manifest's key already exists in the
    /// target, instead of aborting.
    #[serde(default)]
    pub allow_temp_key_overwrite: bool,
    #[serde(default = "default_temp_key_attempts")]
    pub temp_key_attempts: usize,
    /// Continue a failed import from this point.
    #[serde(default)]
    pub resume: Option<ResumePoint>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("neo4j-backup"),
            assume_yes: false,
            workers: default_workers(),
            allow_temp_key_overwrite: false,
            temp_key_attempts: DEFAULT_TEMP_KEY_ATTEMPTS,
            resume: None,
        }
    }
}

impl ImportConfig {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self { project_dir: project_dir.into(), ..Self::default() }
    }

    pub fn with_assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_allow_temp_key_overwrite(mut self, allow: bool) -> Self {
        self.allow_temp_key_overwrite = allow;
        self
    }

    pub fn with_temp_key_attempts(mut self, attempts: usize) -> Self {
        self.temp_key_attempts = attempts;
        self
    }

    pub fn with_resume(mut self, resume: ResumePoint) -> Self {
        self.resume = Some(resume);
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        data_dir(&self.project_dir)
    }

    pub fn validate(&self) -> Result<()> {
        check_dir(&self.project_dir)?;
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.temp_key_attempts == 0 {
            return Err(Error::Config("temp_key_attempts must be greater than 0".into()));
        }
        Ok(())
    }
}

fn data_dir(project_dir: &Path) -> PathBuf {
    project_dir.join("data")
}

fn check_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Err(Error::Config("project_dir must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_defaults_from_json() {
        let cfg: ExportConfig = serde_json::from_str(r#"{"project_dir": "/tmp/x"}"#).unwrap();
        assert_eq!(cfg, ExportConfig::new("/tmp/x"));
        assert!(cfg.compress);
        assert_eq!(cfg.shard_size_bytes, 65535);
        assert_eq!(cfg.data_dir(), PathBuf::from("/tmp/x/data"));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_import_defaults_from_json() {
        let cfg: ImportConfig = serde_json::from_str(r#"{"project_dir": "/tmp/x", "workers": 2}"#).unwrap();
        assert_eq!(cfg, ImportConfig::new("/tmp/x").with_workers(2));
        assert!(cfg.resume.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            ExportConfig::new("/tmp/x").with_page_size(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(ExportConfig::new("/tmp/x").with_shard_size_bytes(0).validate().is_err());
        assert!(ExportConfig::new("").validate().is_err());
        assert!(ImportConfig::new("/tmp/x").with_workers(0).validate().is_err());
        assert!(ImportConfig::new("/tmp/x").with_temp_key_attempts(0).validate().is_err());
    }
}
