//! End-to-end tests of the incremental compile pipeline.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use oxide_guard::prelude::*;

const ADD_EMAIL: &str = "\
up:
  - op: add_column
    table: users
    column: email
    type: string
down:
  - op: remove_column
    table: users
    column: email
";

/// Counts how often the wrapped renderer is invoked.
#[derive(Default)]
struct CountingRenderer {
    inner: PostgresRenderer,
    calls: AtomicUsize,
}

impl CountingRenderer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Renderer for CountingRenderer {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn render(&self, migration: &ValidatedMigration<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.render(migration)
    }
}

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write_source(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join("migrations").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn config(&self) -> GuardConfig {
        GuardConfig {
            output_dir: self.root().join("compiled"),
            lockfile: self.root().join("oxide-guard.lock"),
            ..GuardConfig::default()
        }
    }

    fn compiler(&self) -> Compiler<CountingRenderer> {
        Compiler::new(
            self.config(),
            OperationRegistry::new(),
            CountingRenderer::default(),
        )
    }

    fn lockfile(&self) -> Lockfile {
        Lockfile::open(self.root().join("oxide-guard.lock"))
    }
}

/// Compiles and commits in one go, as the CLI does.
fn compile_and_commit<R: Renderer>(
    compiler: &Compiler<R>,
    sources: &[PathBuf],
    database: Option<&str>,
) -> CompileReport {
    let mut lockfile = Lockfile::open(&compiler.config().lockfile);
    let report = compiler.compile(sources, database, &lockfile).unwrap();
    compiler.commit(&report, &mut lockfile).unwrap();
    report
}

#[test]
fn test_nullable_column_round_trip_compiles() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();

    let report = compile_and_commit(&compiler, &[source], None);
    assert!(report.is_success());

    let result = report.compiled().next().unwrap();
    assert_eq!(result.outcome, Outcome::Compiled);
    assert!(!result.body.is_empty());
    assert!(result.capabilities.is_empty());
    assert_eq!(
        std::fs::read_to_string(&result.output_path).unwrap(),
        result.body
    );

    let lockfile = project.lockfile();
    let record = lockfile.get("0001_add_email.yml").unwrap().unwrap();
    assert_eq!(record.compiled_digest, result.compiled_digest);
    assert_eq!(record.source_digest, Digest::of(ADD_EMAIL));
    assert_eq!(record.database, None);
}

#[test]
fn test_unchanged_source_is_not_rendered_again() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();

    let first = compile_and_commit(&compiler, &[source.clone()], None);
    assert_eq!(compiler.renderer().calls(), 1);

    let second = compile_and_commit(&compiler, &[source], None);
    assert_eq!(compiler.renderer().calls(), 1);

    let first = first.compiled().next().unwrap();
    let second = second.compiled().next().unwrap();
    assert_eq!(second.outcome, Outcome::Unchanged);
    assert_eq!(first.compiled_digest, second.compiled_digest);
    assert_eq!(first.body, second.body);
}

#[test]
fn test_source_change_recompiles_and_updates_digests() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();
    let first = compile_and_commit(&compiler, &[source.clone()], None);
    let first = first.compiled().next().unwrap().clone();

    let edited = ADD_EMAIL.replace("type: string", "type: text");
    std::fs::write(&source, &edited).unwrap();

    let second = compile_and_commit(&compiler, &[source], None);
    let second = second.compiled().next().unwrap();
    assert_eq!(second.outcome, Outcome::Compiled);
    assert_eq!(compiler.renderer().calls(), 2);
    assert_ne!(first.source_digest, second.source_digest);
    assert_ne!(first.compiled_digest, second.compiled_digest);
    assert!(second.body.contains("TEXT"));

    let record = project
        .lockfile()
        .get("0001_add_email.yml")
        .unwrap()
        .cloned()
        .unwrap();
    assert_eq!(record.source_digest, Digest::of(&edited));
    assert_eq!(record.compiled_digest, second.compiled_digest);
}

#[test]
fn test_hand_edited_output_is_an_integrity_violation() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();
    let first = compile_and_commit(&compiler, &[source.clone()], None);
    let output = first.compiled().next().unwrap().output_path.clone();

    std::fs::write(&output, "-- edited by hand\n").unwrap();

    let lockfile = project.lockfile();
    let report = compiler.compile([&source], None, &lockfile).unwrap();
    let failure = report.failures().next().unwrap();
    assert!(failure.error.is_integrity_violation());
    assert_eq!(compiler.renderer().calls(), 1);

    let mut lockfile = project.lockfile();
    compiler.commit(&report, &mut lockfile).unwrap();
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "-- edited by hand\n"
    );

    let statuses = compiler.status([&source], None, &project.lockfile()).unwrap();
    assert!(matches!(statuses[0].status, FileStatus::Tampered { .. }));
}

#[test]
fn test_missing_output_is_recompiled() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();
    let first = compile_and_commit(&compiler, &[source.clone()], None);
    std::fs::remove_file(&first.compiled().next().unwrap().output_path).unwrap();

    let second = compile_and_commit(&compiler, &[source], None);
    assert_eq!(second.compiled().next().unwrap().outcome, Outcome::Compiled);
    assert_eq!(compiler.renderer().calls(), 2);
}

#[test]
fn test_invalid_file_does_not_block_others() {
    let project = Project::new();
    let bad = project.write_source(
        "0001_two_indexes.yml",
        "\
up:
  - op: add_index
    table: users
    column: email
  - op: add_index
    table: users
    column: name
down:
  - op: remove_index
    table: users
    column: email
",
    );
    let good = project.write_source("0002_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();

    let report = compile_and_commit(&compiler, &[bad.clone(), good], None);
    assert!(!report.is_success());
    assert_eq!(report.compiled().count(), 1);

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.file, "0001_two_indexes.yml");
    match &failure.error {
        GuardError::Validation { report, .. } => {
            assert!(report
                .violations()
                .iter()
                .any(|v| v.kind == ViolationKind::CrossInstruction));
        }
        other => panic!("Expected Validation error, got {other:?}"),
    }

    let lockfile = project.lockfile();
    assert!(lockfile.get("0001_two_indexes.yml").unwrap().is_none());
    assert!(lockfile.get("0002_add_email.yml").unwrap().is_some());
    assert!(!project.root().join("compiled/0001_two_indexes.sql").exists());
}

#[test]
fn test_database_scoped_keys_and_paths() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();

    let report = compile_and_commit(&compiler, &[source.clone()], Some("primary"));
    let result = report.compiled().next().unwrap();
    assert_eq!(
        result.output_path,
        project.root().join("compiled/primary/0001_add_email.sql")
    );

    let lockfile = project.lockfile();
    let record = lockfile.get("primary/0001_add_email.yml").unwrap().unwrap();
    assert_eq!(record.database.as_deref(), Some("primary"));
    assert!(lockfile.get("0001_add_email.yml").unwrap().is_none());

    let statuses = compiler.status([&source], None, &lockfile).unwrap();
    assert_eq!(statuses[0].status, FileStatus::NeverCompiled);
    let statuses = compiler.status([&source], Some("primary"), &lockfile).unwrap();
    assert_eq!(statuses[0].status, FileStatus::UpToDate);
}

#[test]
fn test_custom_operation_from_config() {
    let project = Project::new();
    let config = GuardConfig::parse(
        "\
custom_operations:
  attach_partition:
    lock: access_exclusive
    sql:
      - \"ALTER TABLE {table} ATTACH PARTITION {partition} DEFAULT\"
",
        Path::new("oxide-guard.yml"),
    )
    .unwrap();
    let config = GuardConfig {
        output_dir: project.root().join("compiled"),
        lockfile: project.root().join("oxide-guard.lock"),
        ..config
    };
    let registry = config.registry().unwrap();
    let compiler = Compiler::new(config, registry, PostgresRenderer::new());

    let source = project.write_source(
        "0001_partition.yml",
        "\
up:
  - op: attach_partition
    table: events
    partition: events_default
down:
  - op: drop_table
    table: events_default
",
    );

    let report = compile_and_commit(&compiler, &[source.clone()], None);
    let result = report.compiled().next().unwrap();
    assert!(result
        .body
        .contains("ALTER TABLE events ATTACH PARTITION events_default DEFAULT;"));
    let custom = Capability::CustomOperation("attach_partition".to_string());
    assert!(result.capabilities.contains(&custom));

    let report = compile_and_commit(&compiler, &[source], None);
    let result = report.compiled().next().unwrap();
    assert_eq!(result.outcome, Outcome::Unchanged);
    assert!(result.capabilities.contains(&custom));
}

#[test]
fn test_timeout_overrides_from_source() {
    let project = Project::new();
    let too_long = project.write_source(
        "0001_slow.yml",
        &format!("statement_timeout: 120\n{ADD_EMAIL}"),
    );
    let disabled = project.write_source("0002_disabled.yml", &format!("lock_timeout: 0\n{ADD_EMAIL}"));
    let compiler = project.compiler();

    let report = compile_and_commit(&compiler, &[too_long, disabled], None);
    assert_eq!(report.failures().count(), 2);
    for failure in report.failures() {
        match &failure.error {
            GuardError::Validation { report, .. } => assert!(report
                .violations()
                .iter()
                .all(|v| v.kind == ViolationKind::TimeoutPolicy)),
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }
}

#[test]
fn test_unchanged_result_keeps_capabilities() {
    let project = Project::new();
    let source = project.write_source(
        "0001_index_email.yml",
        "\
up:
  - op: add_index
    table: users
    column: email
down:
  - op: remove_index
    table: users
    column: email
",
    );
    let compiler = project.compiler();

    let first = compile_and_commit(&compiler, &[source.clone()], None);
    let second = compile_and_commit(&compiler, &[source], None);
    let first = first.compiled().next().unwrap();
    let second = second.compiled().next().unwrap();

    assert_eq!(second.outcome, Outcome::Unchanged);
    assert_eq!(compiler.renderer().calls(), 1);
    assert!(second.capabilities.contains(&Capability::NonTransactional));
    assert_eq!(first.capabilities, second.capabilities);
}

#[test]
fn test_sources_sharing_an_output_never_overwrite_each_other() {
    let project = Project::new();
    let yml = project.write_source("0001_users.yml", ADD_EMAIL);
    let yaml = project.write_source(
        "0001_users.yaml",
        &ADD_EMAIL.replace("type: string", "type: text"),
    );
    let files = oxide_guard::source::discover(&[project.root().join("migrations")]).unwrap();
    assert_eq!(files.len(), 2);
    let compiler = project.compiler();

    for _ in 0..2 {
        let report = compile_and_commit(&compiler, &files, None);
        assert_eq!(report.failures().count(), 2);
        for failure in report.failures() {
            assert!(matches!(failure.error, GuardError::OutputCollision { .. }));
            assert!(!failure.error.is_integrity_violation());
        }
    }

    assert_eq!(compiler.renderer().calls(), 0);
    assert!(!project.root().join("compiled/0001_users.sql").exists());
    let lockfile = project.lockfile();
    assert!(lockfile.get("0001_users.yml").unwrap().is_none());
    assert!(lockfile.get("0001_users.yaml").unwrap().is_none());

    std::fs::remove_file(&yaml).unwrap();
    let report = compile_and_commit(&compiler, &[yml], None);
    assert!(report.is_success());
}

#[test]
fn test_non_utf8_output_is_an_integrity_violation() {
    let project = Project::new();
    let source = project.write_source("0001_add_email.yml", ADD_EMAIL);
    let compiler = project.compiler();
    let first = compile_and_commit(&compiler, &[source.clone()], None);
    let output = first.compiled().next().unwrap().output_path.clone();

    std::fs::write(&output, [0xff_u8, 0xfe, 0x00]).unwrap();

    let report = compiler
        .compile([&source], None, &project.lockfile())
        .unwrap();
    assert!(report.failures().next().unwrap().error.is_integrity_violation());

    let statuses = compiler.status([&source], None, &project.lockfile()).unwrap();
    assert!(matches!(statuses[0].status, FileStatus::Tampered { .. }));
}
