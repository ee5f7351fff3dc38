//! Error types for the migration compiler.

use std::path::PathBuf;

use crate::instruction_set::Direction;
use crate::validation::ValidationReport;

/// Errors that can occur while loading, validating, or compiling migrations.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// IO error with file path context.
    #[error("Failed to access '{path}': {source}")]
    Io {
        /// Path that was being read or written.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A migration source file could not be parsed.
    #[error("Failed to parse migration source '{path}': {source}")]
    SourceParse {
        /// Path to the source file.
        path: PathBuf,
        /// Parser error.
        source: serde_yaml::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse config '{path}': {source}")]
    ConfigParse {
        /// Path to the config file.
        path: PathBuf,
        /// Parser error.
        source: serde_yaml::Error,
    },

    /// The persisted digest store is malformed.
    #[error("Lockfile '{path}' is malformed: {source}")]
    Lockfile {
        /// Path to the lockfile.
        path: PathBuf,
        /// Deserialization error.
        source: serde_json::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation name with no built-in or registered handler.
    #[error("Unknown operation '{name}'")]
    UnknownOperation {
        /// The operation name that was called.
        name: String,
    },

    /// Arguments passed to an operation do not have the expected shape.
    #[error("Invalid arguments for '{operation}': {message}")]
    InvalidArgument {
        /// Operation name.
        operation: String,
        /// What is wrong with the arguments.
        message: String,
    },

    /// A migration direction has no procedure.
    #[error("Migration '{migration}' does not implement '{direction}'")]
    NotImplemented {
        /// Migration name.
        migration: String,
        /// The missing direction.
        direction: Direction,
    },

    /// A migration failed validation.
    #[error("Migration '{migration}' is unsafe:\n{report}")]
    Validation {
        /// Migration name.
        migration: String,
        /// Every violation found.
        report: ValidationReport,
    },

    /// Compiled output was edited after it was generated.
    #[error(
        "Compiled output '{}' was modified after compilation (expected digest {expected}, found {actual}); regenerate it from '{file}' instead of editing it",
        output.display()
    )]
    Integrity {
        /// Source file name.
        file: String,
        /// Path to the compiled output.
        output: PathBuf,
        /// Digest recorded in the lockfile.
        expected: String,
        /// Digest of the output currently on disk.
        actual: String,
    },

    /// Several sources in one run would write the same compiled output.
    #[error(
        "Migration '{file}' compiles to '{}', which is also the output of {}; rename one of them",
        output.display(),
        others.iter().map(|p| format!("'{}'", p.display())).collect::<Vec<_>>().join(", ")
    )]
    OutputCollision {
        /// Source file name.
        file: String,
        /// The shared output path.
        output: PathBuf,
        /// The other sources compiling to the same path.
        others: Vec<PathBuf>,
    },

    /// A migration declares a different target than the one being compiled.
    #[error("Migration '{file}' targets database '{declared}' but compilation is for '{requested}'")]
    DatabaseMismatch {
        /// Source file name.
        file: String,
        /// Database declared in the migration.
        declared: String,
        /// Database requested by the caller.
        requested: String,
    },

    /// The renderer failed to produce output.
    #[error("Render error: {0}")]
    Render(String),

    /// Invalid configuration value.
    #[error("Invalid config: {0}")]
    Config(String),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<GuardError>),
}

impl GuardError {
    /// Creates an `InvalidArgument` error.
    pub fn invalid_argument(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error signals hand-edited compiled output.
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }
}

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, GuardError>;
