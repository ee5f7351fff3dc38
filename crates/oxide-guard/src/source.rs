//! Declarative migration source files.
//!
//! A source is a YAML document listing the calls of each direction. The
//! resulting [`Migration`] replays those calls through the recorder, so
//! they go through the same dispatch as Rust-defined migrations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};
use crate::executor::Recorder;
use crate::instruction::Arguments;
use crate::migration::{Migration, Procedure};
use crate::registry::OperationRegistry;
use crate::validation::timeout::Timeout;

/// One operation call as written in a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Operation name.
    pub op: String,
    /// Every other key of the entry.
    #[serde(flatten)]
    pub arguments: Arguments,
}

/// The parsed contents of a source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationSource {
    /// Migration name; the file stem when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Target database identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Lock timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout: Option<Timeout>,
    /// Statement timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout: Option<Timeout>,
    /// Calls of the `up` direction; absent means not implemented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<Vec<Call>>,
    /// Calls of the `down` direction; absent means not implemented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<Vec<Call>>,
}

impl MigrationSource {
    /// Parses source bytes; `path` is only used for error context.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self> {
        serde_yaml::from_slice(bytes).map_err(|e| GuardError::SourceParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Reads and parses a source file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| GuardError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&bytes, path)
    }

    /// Builds the migration, naming it `default_name` unless the source names it.
    #[must_use]
    pub fn into_migration(self, default_name: &str, registry: Arc<OperationRegistry>) -> Migration {
        let mut migration = Migration::new(self.name.unwrap_or_else(|| default_name.to_string()))
            .registry(registry);
        if let Some(database) = self.database {
            migration = migration.database(database);
        }
        if let Some(timeout) = self.lock_timeout {
            migration = migration.lock_timeout(timeout);
        }
        if let Some(timeout) = self.statement_timeout {
            migration = migration.statement_timeout(timeout);
        }
        if let Some(calls) = self.up {
            migration = migration.up_procedure(ScriptedProcedure::new(calls));
        }
        if let Some(calls) = self.down {
            migration = migration.down_procedure(ScriptedProcedure::new(calls));
        }
        migration
    }
}

/// A procedure that replays recorded calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedProcedure {
    calls: Vec<Call>,
}

impl ScriptedProcedure {
    /// Creates a procedure from calls.
    #[must_use]
    pub fn new(calls: Vec<Call>) -> Self {
        Self { calls }
    }
}

impl Procedure for ScriptedProcedure {
    fn run(&self, recorder: &mut Recorder) -> Result<()> {
        for call in &self.calls {
            recorder.call(&call.op, call.arguments.clone())?;
        }
        Ok(())
    }
}

/// Returns the file stem used as the default migration name.
#[must_use]
pub fn default_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml" | "yaml")
    )
}

/// Expands paths into source files.
///
/// Files are kept as given; directories contribute their `*.yml` and
/// `*.yaml` files sorted by name.
pub fn discover<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if !path.is_dir() {
            files.push(path.to_path_buf());
            continue;
        }
        let entries = std::fs::read_dir(path).map_err(|e| GuardError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GuardError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            let candidate = entry.path();
            if candidate.is_file() && is_source_file(&candidate) {
                found.push(candidate);
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

/// Parses source bytes into a migration named after the file.
pub fn migration_from_bytes(
    bytes: &[u8],
    path: &Path,
    registry: Arc<OperationRegistry>,
) -> Result<Migration> {
    let source = MigrationSource::parse(bytes, path)?;
    Ok(source.into_migration(&default_name(path), registry))
}
