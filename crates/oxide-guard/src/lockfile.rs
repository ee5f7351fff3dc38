//! Persistent digest store.
//!
//! Maps each compiled artifact to the digests of the source it came from
//! and of the output that was written. The file is read on first access
//! and written back once, atomically, by [`Lockfile::save`].

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::digest::Digest;
use crate::error::{GuardError, Result};

/// Digests recorded for one compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRecord {
    /// Digest of the source the artifact was compiled from.
    pub source_digest: Digest,
    /// Digest of the compiled output.
    pub compiled_digest: Digest,
    /// Target database, if the compile was qualified by one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// Returns the store key of a source file, namespaced by database.
#[must_use]
pub fn key(file_name: &str, database: Option<&str>) -> String {
    match database {
        Some(database) => format!("{database}/{file_name}"),
        None => file_name.to_string(),
    }
}

/// The digest store backing incremental compilation.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
    entries: OnceCell<BTreeMap<String, DigestRecord>>,
}

impl Lockfile {
    /// Opens the store at `path` without reading it yet.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: OnceCell::new(),
        }
    }

    /// Returns the store's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every record, reading the file on first access.
    ///
    /// A missing file is an empty store; a malformed one is an error.
    pub fn entries(&self) -> Result<&BTreeMap<String, DigestRecord>> {
        if let Some(entries) = self.entries.get() {
            return Ok(entries);
        }
        let loaded = read(&self.path)?;
        Ok(self.entries.get_or_init(|| loaded))
    }

    /// Returns the record for `key`.
    pub fn get(&self, key: &str) -> Result<Option<&DigestRecord>> {
        Ok(self.entries()?.get(key))
    }

    /// Inserts or replaces the record for `key`.
    pub fn record(&mut self, key: impl Into<String>, record: DigestRecord) -> Result<()> {
        self.entries()?;
        if let Some(entries) = self.entries.get_mut() {
            entries.insert(key.into(), record);
        }
        Ok(())
    }

    /// Writes the store to a sibling temp file and renames it into place.
    pub fn save(&self) -> Result<()> {
        let entries = self.entries()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| GuardError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = self
            .path
            .with_file_name(format!("{file_name}.{}.tmp", std::process::id()));

        let mut json = serde_json::to_string_pretty(entries)?;
        json.push('\n');
        std::fs::write(&temp_path, &json).map_err(|e| GuardError::Io {
            path: temp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            GuardError::Io {
                path: self.path.clone(),
                source: e,
            }
        })?;

        info!(
            path = %self.path.display(),
            entries = entries.len(),
            "Saved lockfile"
        );
        Ok(())
    }
}

fn read(path: &Path) -> Result<BTreeMap<String, DigestRecord>> {
    if !path.exists() {
        debug!(path = %path.display(), "No lockfile yet, starting empty");
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| GuardError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let entries: BTreeMap<String, DigestRecord> =
        serde_json::from_str(&content).map_err(|e| GuardError::Lockfile {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(path = %path.display(), entries = entries.len(), "Loaded lockfile");
    Ok(entries)
}
