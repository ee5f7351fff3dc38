//! Incremental compilation.
//!
//! For every source the compiler compares the digests recorded in the
//! [`Lockfile`] with what is on disk:
//!
//! - source and output both match: the existing output is reused verbatim
//! - the output changed while the source did not: the file fails with
//!   [`GuardError::Integrity`]
//! - anything else: the migration is validated and rendered again
//!
//! Sources of one run that would write the same output path all fail with
//! [`GuardError::OutputCollision`] before any digest is looked at.
//!
//! [`Compiler::compile`] performs no writes. [`Compiler::commit`] writes
//! fresh output, records digests for the files that succeeded and saves the
//! lockfile once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::GuardConfig;
use crate::digest::Digest;
use crate::error::{GuardError, Result};
use crate::lockfile::{self, DigestRecord, Lockfile};
use crate::migration::Capability;
use crate::registry::OperationRegistry;
use crate::render::Renderer;
use crate::source;
use crate::validation::Validator;

/// Whether a result was rendered in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Validated and rendered in this run.
    Compiled,
    /// Existing output reused without validation or rendering.
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compiled => f.write_str("compiled"),
            Self::Unchanged => f.write_str("unchanged"),
        }
    }
}

/// State of a source relative to its recorded digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Source and output match the lockfile.
    UpToDate,
    /// The source changed since it was compiled.
    Stale,
    /// No record exists for the source.
    NeverCompiled,
    /// A record exists but the output file is gone.
    MissingOutput,
    /// The output changed while the source did not.
    Tampered {
        /// Digest recorded in the lockfile.
        expected: Digest,
        /// Digest of the output on disk.
        actual: Digest,
    },
}

impl FileStatus {
    /// Returns true if the file needs to be compiled again.
    #[must_use]
    pub fn needs_compile(&self) -> bool {
        matches!(self, Self::Stale | Self::NeverCompiled | Self::MissingOutput)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::Stale => f.write_str("stale"),
            Self::NeverCompiled => f.write_str("never compiled"),
            Self::MissingOutput => f.write_str("missing output"),
            Self::Tampered { .. } => f.write_str("tampered"),
        }
    }
}

/// A successfully compiled (or reused) migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledResult {
    /// Source file name.
    pub file_name: String,
    /// Lockfile key.
    pub key: String,
    /// Path of the source file.
    pub source_path: PathBuf,
    /// Target database the compile was qualified by.
    pub database: Option<String>,
    /// Digest of the source.
    pub source_digest: Digest,
    /// Digest of the compiled body.
    pub compiled_digest: Digest,
    /// Where the body belongs.
    pub output_path: PathBuf,
    /// The compiled body.
    pub body: String,
    /// Capabilities the migration requires.
    pub capabilities: BTreeSet<Capability>,
    /// Whether the body was rendered in this run.
    pub outcome: Outcome,
}

/// A source that could not be compiled.
#[derive(Debug)]
pub struct FileFailure {
    /// Source file name.
    pub file: String,
    /// Path of the source file.
    pub path: PathBuf,
    /// Why it failed.
    pub error: GuardError,
}

/// Per-file results of one compile run, in input order.
#[derive(Debug, Default)]
pub struct CompileReport {
    files: Vec<std::result::Result<CompiledResult, FileFailure>>,
}

impl CompileReport {
    /// Returns every per-file result.
    #[must_use]
    pub fn files(&self) -> &[std::result::Result<CompiledResult, FileFailure>] {
        &self.files
    }

    /// Iterates over the successful results.
    pub fn compiled(&self) -> impl Iterator<Item = &CompiledResult> {
        self.files.iter().filter_map(|f| f.as_ref().ok())
    }

    /// Iterates over the failures.
    pub fn failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.files.iter().filter_map(|f| f.as_ref().err())
    }

    /// Returns true if no file failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.files.iter().all(std::result::Result::is_ok)
    }

    /// Converts into the successful results, or every failure at once.
    pub fn into_result(self) -> Result<Vec<CompiledResult>> {
        let mut compiled = Vec::new();
        let mut errors = Vec::new();
        for file in self.files {
            match file {
                Ok(result) => compiled.push(result),
                Err(failure) => errors.push(failure.error),
            }
        }
        match errors.len() {
            0 => Ok(compiled),
            1 => Err(errors.remove(0)),
            _ => Err(GuardError::Multiple(errors)),
        }
    }
}

/// Status of one source, as reported by [`Compiler::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Source file name.
    pub file: String,
    /// Lockfile key.
    pub key: String,
    /// Change-detection outcome.
    pub status: FileStatus,
}

/// Compiles migration sources incrementally.
pub struct Compiler<R: Renderer> {
    config: GuardConfig,
    registry: Arc<OperationRegistry>,
    validator: Validator,
    renderer: R,
}

impl<R: Renderer> Compiler<R> {
    /// Creates a compiler from a configuration snapshot.
    pub fn new(config: GuardConfig, registry: OperationRegistry, renderer: R) -> Self {
        let validator = Validator::new(config.timeouts.clone());
        Self {
            config,
            registry: Arc::new(registry),
            validator,
            renderer,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Returns the renderer.
    #[must_use]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Returns where the output of `source` belongs.
    #[must_use]
    pub fn output_path(&self, source: &Path, database: Option<&str>) -> PathBuf {
        let mut path = self.config.output_dir.clone();
        if let Some(database) = database {
            path.push(database);
        }
        path.push(format!(
            "{}.{}",
            source::default_name(source),
            self.renderer.extension()
        ));
        path
    }

    /// Compiles every source without writing anything.
    ///
    /// Only an unreadable lockfile aborts the run; every other problem is
    /// reported per file.
    pub fn compile<I, P>(
        &self,
        sources: I,
        database: Option<&str>,
        lockfile: &Lockfile,
    ) -> Result<CompileReport>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        lockfile.entries()?;

        let sources: Vec<P> = sources.into_iter().collect();
        let mut outputs: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for (index, path) in sources.iter().enumerate() {
            outputs
                .entry(self.output_path(path.as_ref(), database))
                .or_default()
                .push(index);
        }

        let mut report = CompileReport::default();
        for (index, path) in sources.iter().enumerate() {
            let path: &Path = path.as_ref();
            let file = file_name(path);
            let output = self.output_path(path, database);
            let result = match outputs.get(&output) {
                Some(claimants) if claimants.len() > 1 => Err(GuardError::OutputCollision {
                    file: file.clone(),
                    others: claimants
                        .iter()
                        .filter(|other| **other != index)
                        .map(|other| AsRef::<Path>::as_ref(&sources[*other]).to_path_buf())
                        .collect(),
                    output,
                }),
                _ => self.compile_file(path, &file, database, lockfile),
            };
            let result = result.map_err(|error| {
                warn!(file = %file, error = %error, "Compilation failed");
                FileFailure {
                    file: file.clone(),
                    path: path.to_path_buf(),
                    error,
                }
            });
            report.files.push(result);
        }
        Ok(report)
    }

    fn compile_file(
        &self,
        path: &Path,
        file: &str,
        database: Option<&str>,
        lockfile: &Lockfile,
    ) -> Result<CompiledResult> {
        let bytes = read_bytes(path)?;
        let source_digest = Digest::of(&bytes);
        let key = lockfile::key(file, database);
        let output_path = self.output_path(path, database);
        let record = lockfile.get(&key)?;

        let (status, existing) = detect(record, &source_digest, &output_path)?;
        debug!(file = %file, status = %status, "Checked digests");

        match (status, existing) {
            (FileStatus::UpToDate, Some(body)) => {
                // Capabilities only need the recorded instructions.
                let migration =
                    source::migration_from_bytes(&bytes, path, Arc::clone(&self.registry))?;
                let capabilities = migration.capabilities()?;
                info!(file = %file, "Unchanged");
                return Ok(CompiledResult {
                    file_name: file.to_string(),
                    key,
                    source_path: path.to_path_buf(),
                    database: database.map(str::to_string),
                    compiled_digest: Digest::of(&body),
                    source_digest,
                    output_path,
                    body,
                    capabilities,
                    outcome: Outcome::Unchanged,
                });
            }
            (FileStatus::Tampered { expected, actual }, _) => {
                return Err(GuardError::Integrity {
                    file: file.to_string(),
                    output: output_path,
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
            _ => {}
        }

        let migration = source::migration_from_bytes(&bytes, path, Arc::clone(&self.registry))?;
        if let (Some(requested), Some(declared)) = (database, migration.target_database()) {
            if requested != declared {
                return Err(GuardError::DatabaseMismatch {
                    file: file.to_string(),
                    declared: declared.to_string(),
                    requested: requested.to_string(),
                });
            }
        }

        let validated = self.validator.validated(&migration)?;
        let body = self.renderer.render(&validated)?;
        let compiled_digest = Digest::of(&body);
        info!(
            file = %file,
            renderer = self.renderer.name(),
            digest = compiled_digest.short(12),
            "Compiled"
        );

        Ok(CompiledResult {
            file_name: file.to_string(),
            key,
            source_path: path.to_path_buf(),
            database: database.map(str::to_string),
            source_digest,
            compiled_digest,
            output_path,
            body,
            capabilities: validated.capabilities().clone(),
            outcome: Outcome::Compiled,
        })
    }

    /// Writes fresh output and records digests for every successful file.
    ///
    /// The lockfile is saved once, after all outputs are written. Failed
    /// files keep their previous output and record. Returns the number of
    /// outputs written.
    pub fn commit(&self, report: &CompileReport, lockfile: &mut Lockfile) -> Result<usize> {
        let mut written = 0;
        for result in report.compiled() {
            if result.outcome == Outcome::Compiled {
                write_output(&result.output_path, &result.body)?;
                written += 1;
            }
            lockfile.record(
                result.key.clone(),
                DigestRecord {
                    source_digest: result.source_digest.clone(),
                    compiled_digest: result.compiled_digest.clone(),
                    database: result.database.clone(),
                },
            )?;
        }
        lockfile.save()?;
        Ok(written)
    }

    /// Validates one source without consulting or touching any digests.
    pub fn check(&self, path: &Path) -> Result<()> {
        let bytes = read_bytes(path)?;
        let migration = source::migration_from_bytes(&bytes, path, Arc::clone(&self.registry))?;
        self.validator
            .validate(&migration)
            .into_result(migration.name())
    }

    /// Reports the change-detection status of every source.
    pub fn status<I, P>(
        &self,
        sources: I,
        database: Option<&str>,
        lockfile: &Lockfile,
    ) -> Result<Vec<StatusEntry>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut entries = Vec::new();
        for path in sources {
            let path = path.as_ref();
            let file = file_name(path);
            let key = lockfile::key(&file, database);
            let source_digest = Digest::of(read_bytes(path)?);
            let output_path = self.output_path(path, database);
            let (status, _) = detect(lockfile.get(&key)?, &source_digest, &output_path)?;
            entries.push(StatusEntry { file, key, status });
        }
        Ok(entries)
    }
}

impl<R: Renderer> fmt::Debug for Compiler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("renderer", &self.renderer.name())
            .finish()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| GuardError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_output(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| GuardError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    std::fs::write(path, body).map_err(|e| GuardError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Classifies a source against its record; returns the output body when up to date.
///
/// Digests are taken over the raw bytes on disk, so output that is no
/// longer valid UTF-8 is reported as tampered like any other edit.
fn detect(
    record: Option<&DigestRecord>,
    source_digest: &Digest,
    output_path: &Path,
) -> Result<(FileStatus, Option<String>)> {
    let Some(record) = record else {
        return Ok((FileStatus::NeverCompiled, None));
    };
    if !output_path.exists() {
        return Ok((FileStatus::MissingOutput, None));
    }
    if record.source_digest != *source_digest {
        return Ok((FileStatus::Stale, None));
    }

    let bytes = read_bytes(output_path)?;
    let output_digest = Digest::of(&bytes);
    if record.compiled_digest == output_digest {
        if let Ok(body) = String::from_utf8(bytes) {
            return Ok((FileStatus::UpToDate, Some(body)));
        }
    }
    Ok((
        FileStatus::Tampered {
            expected: record.compiled_digest.clone(),
            actual: output_digest,
        },
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::PostgresRenderer;

    const ADD_EMAIL: &str = "up:\n  - op: add_column\n    table: users\n    column: email\n    type: string\ndown:\n  - op: remove_column\n    table: users\n    column: email\n";

    fn compiler(root: &Path) -> Compiler<PostgresRenderer> {
        let config = GuardConfig {
            output_dir: root.join("compiled"),
            lockfile: root.join("oxide-guard.lock"),
            ..GuardConfig::default()
        };
        Compiler::new(config, OperationRegistry::new(), PostgresRenderer::new())
    }

    #[test]
    fn test_output_path() {
        let compiler = compiler(Path::new("/project"));
        assert_eq!(
            compiler.output_path(Path::new("db/0001_add_email.yml"), None),
            PathBuf::from("/project/compiled/0001_add_email.sql")
        );
        assert_eq!(
            compiler.output_path(Path::new("db/0001_add_email.yml"), Some("primary")),
            PathBuf::from("/project/compiled/primary/0001_add_email.sql")
        );
    }

    #[test]
    fn test_compile_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("0001_add_email.yml");
        std::fs::write(&source, ADD_EMAIL).unwrap();

        let compiler = compiler(dir.path());
        let lockfile = Lockfile::open(&compiler.config().lockfile);
        let report = compiler.compile([&source], None, &lockfile).unwrap();

        assert!(report.is_success());
        let result = report.compiled().next().unwrap();
        assert_eq!(result.outcome, Outcome::Compiled);
        assert!(!result.body.is_empty());
        assert!(!result.output_path.exists());
        assert!(!compiler.config().lockfile.exists());
    }

    #[test]
    fn test_missing_source_is_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("0002_good.yml");
        std::fs::write(&good, ADD_EMAIL).unwrap();

        let compiler = compiler(dir.path());
        let lockfile = Lockfile::open(&compiler.config().lockfile);
        let report = compiler
            .compile([dir.path().join("0001_missing.yml"), good], None, &lockfile)
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.compiled().count(), 1);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.file, "0001_missing.yml");
        assert!(matches!(failure.error, GuardError::Io { .. }));
    }

    #[test]
    fn test_database_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("0001_analytics.yml");
        std::fs::write(&source, format!("database: analytics\n{ADD_EMAIL}")).unwrap();

        let compiler = compiler(dir.path());
        let lockfile = Lockfile::open(&compiler.config().lockfile);
        let report = compiler
            .compile([&source], Some("primary"), &lockfile)
            .unwrap();
        let failure = report.failures().next().unwrap();
        assert!(matches!(
            &failure.error,
            GuardError::DatabaseMismatch { declared, requested, .. }
                if declared == "analytics" && requested == "primary"
        ));

        let report = compiler
            .compile([&source], Some("analytics"), &lockfile)
            .unwrap();
        assert!(report.is_success());
    }

    #[test]
    fn test_check_reports_violations() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("0001_not_null.yml");
        std::fs::write(
            &source,
            "up:\n  - op: add_column\n    table: users\n    column: age\n    type: integer\n    null: false\n",
        )
        .unwrap();

        let compiler = compiler(dir.path());
        match compiler.check(&source) {
            Err(GuardError::Validation { migration, report }) => {
                assert_eq!(migration, "0001_not_null");
                // missing default in up, missing down
                assert_eq!(report.violations().len(), 2);
            }
            other => panic!("Expected Validation error, got {other:?}"),
        }
        assert!(!compiler.config().output_dir.exists());
    }

    #[test]
    fn test_malformed_lockfile_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = compiler(dir.path());
        std::fs::write(&compiler.config().lockfile, "[]").unwrap();
        let lockfile = Lockfile::open(&compiler.config().lockfile);
        let result = compiler.compile(Vec::<PathBuf>::new(), None, &lockfile);
        assert!(matches!(result, Err(GuardError::Lockfile { .. })));
    }

    #[test]
    fn test_detect_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.sql");
        let source = Digest::of("source");
        let record = DigestRecord {
            source_digest: source.clone(),
            compiled_digest: Digest::of("body"),
            database: None,
        };

        assert_eq!(
            detect(None, &source, &output).unwrap().0,
            FileStatus::NeverCompiled
        );
        assert_eq!(
            detect(Some(&record), &source, &output).unwrap().0,
            FileStatus::MissingOutput
        );

        std::fs::write(&output, "body").unwrap();
        let (status, body) = detect(Some(&record), &source, &output).unwrap();
        assert_eq!(status, FileStatus::UpToDate);
        assert_eq!(body.as_deref(), Some("body"));
        assert_eq!(
            detect(Some(&record), &Digest::of("edited"), &output).unwrap().0,
            FileStatus::Stale
        );

        std::fs::write(&output, "hand edited").unwrap();
        assert!(matches!(
            detect(Some(&record), &source, &output).unwrap().0,
            FileStatus::Tampered { .. }
        ));
    }

    #[test]
    fn test_detect_non_utf8_output_is_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.sql");
        let source = Digest::of("source");
        let record = DigestRecord {
            source_digest: source.clone(),
            compiled_digest: Digest::of("body"),
            database: None,
        };

        std::fs::write(&output, [0xff_u8, 0xfe]).unwrap();
        let (status, body) = detect(Some(&record), &source, &output).unwrap();
        assert_eq!(
            status,
            FileStatus::Tampered {
                expected: Digest::of("body"),
                actual: Digest::of([0xff_u8, 0xfe]),
            }
        );
        assert!(body.is_none());
    }

    #[test]
    fn test_shared_output_path_fails_every_claimant() {
        let dir = tempfile::tempdir().unwrap();
        let yml = dir.path().join("0001_users.yml");
        let yaml = dir.path().join("0001_users.yaml");
        let other = dir.path().join("0002_other.yml");
        for path in [&yml, &yaml, &other] {
            std::fs::write(path, ADD_EMAIL).unwrap();
        }

        let compiler = compiler(dir.path());
        let lockfile = Lockfile::open(&compiler.config().lockfile);
        let report = compiler
            .compile([&yml, &yaml, &other], None, &lockfile)
            .unwrap();

        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.compiled().next().unwrap().file_name, "0002_other.yml");
        for failure in report.failures() {
            match &failure.error {
                GuardError::OutputCollision { output, others, .. } => {
                    assert_eq!(output, &dir.path().join("compiled/0001_users.sql"));
                    assert_eq!(others.len(), 1);
                    assert_ne!(others[0], failure.path);
                }
                other => panic!("Expected OutputCollision, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_into_result_aggregates() {
        let report = CompileReport {
            files: vec![
                Err(FileFailure {
                    file: "a.yml".to_string(),
                    path: PathBuf::from("a.yml"),
                    error: GuardError::Render("a".to_string()),
                }),
                Err(FileFailure {
                    file: "b.yml".to_string(),
                    path: PathBuf::from("b.yml"),
                    error: GuardError::Render("b".to_string()),
                }),
            ],
        };
        assert!(matches!(report.into_result(), Err(GuardError::Multiple(errors)) if errors.len() == 2));
    }
}
