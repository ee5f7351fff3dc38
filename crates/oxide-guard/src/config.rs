//! Compiler configuration loaded from `oxide-guard.yml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::registry::{OperationRegistry, OperationTemplate};
use crate::validation::timeout::{Timeout, TimeoutConfig};

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "oxide-guard.yml";

/// Compiler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Directory compiled output is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Path of the digest store.
    #[serde(default = "default_lockfile")]
    pub lockfile: PathBuf,

    /// Timeout defaults and limits.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Custom operations backed by SQL templates.
    #[serde(default)]
    pub custom_operations: BTreeMap<String, OperationTemplate>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("compiled")
}

fn default_lockfile() -> PathBuf {
    PathBuf::from("oxide-guard.lock")
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            lockfile: default_lockfile(),
            timeouts: TimeoutConfig::default(),
            custom_operations: BTreeMap::new(),
        }
    }
}

impl GuardConfig {
    /// Loads configuration from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| GuardError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::parse(&content, path)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parses configuration text; `path` is only used for error context.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| GuardError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the registry of configured custom operations.
    pub fn registry(&self) -> Result<OperationRegistry> {
        OperationRegistry::from_templates(&self.custom_operations)
    }

    fn validate(&self) -> Result<()> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(GuardError::Config("output_dir cannot be empty".to_string()));
        }
        if self.lockfile.as_os_str().is_empty() {
            return Err(GuardError::Config("lockfile cannot be empty".to_string()));
        }

        let limits = &self.timeouts;
        if let Timeout::Limit(d) = limits.default_lock_timeout {
            if d > limits.max_lock_timeout {
                return Err(GuardError::Config(format!(
                    "default_lock_timeout ({}) exceeds max_lock_timeout ({})",
                    limits.default_lock_timeout,
                    Timeout::Limit(limits.max_lock_timeout)
                )));
            }
        }
        if let Timeout::Limit(d) = limits.default_statement_timeout {
            if d > limits.max_statement_timeout {
                return Err(GuardError::Config(format!(
                    "default_statement_timeout ({}) exceeds max_statement_timeout ({})",
                    limits.default_statement_timeout,
                    Timeout::Limit(limits.max_statement_timeout)
                )));
            }
        }

        for (name, template) in &self.custom_operations {
            if template.sql.is_empty() {
                return Err(GuardError::Config(format!(
                    "custom operation '{name}' has no sql"
                )));
            }
        }
        Ok(())
    }
}
