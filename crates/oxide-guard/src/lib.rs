//! Safety compiler for declarative database schema migrations.
//!
//! `oxide-guard` records the schema changes of a migration, checks them for
//! operational risk before they ever reach a database, and compiles the
//! ones that pass into deterministic output:
//!
//! - Every operation has a static lock weight (`SHARE` or `ACCESS EXCLUSIVE`)
//! - Unsafe shapes are rejected (NOT NULL columns without default, inline
//!   indexes on new references, hash indexes, ...)
//! - Concurrent index builds must be alone in their direction
//! - Lock and statement timeouts are checked against the locks taken
//! - Compilation is incremental and detects hand-edited output
//!
//! # Architecture
//!
//! - **Instructions** - One variant per operation, with lock classification
//! - **Recorder** - Runs a direction's procedure and records its instructions
//! - **Validator** - Structural rules, cross-instruction invariants, timeout policies
//! - **Compiler** - Digest-based change detection, rendering, lockfile updates
//! - **Renderer** - Turns a validated migration into text (PostgreSQL bundled)
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_guard::prelude::*;
//!
//! let migration = Migration::new("add_email_to_users")
//!     .up(|m| m.add_column("users", "email", "string", ColumnOptions::default()))
//!     .down(|m| m.remove_column("users", "email"));
//!
//! let validator = Validator::default();
//! let validated = validator.validated(&migration)?;
//! let sql = PostgresRenderer::new().render(&validated)?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Compile every migration source under db/migrate
//! oxide-guard compile db/migrate
//!
//! # Validate without writing anything
//! oxide-guard check db/migrate
//!
//! # Show which sources are stale or tampered
//! oxide-guard status db/migrate --database primary
//! ```

pub mod compile;
pub mod config;
pub mod digest;
pub mod error;
pub mod executor;
pub mod instruction;
pub mod instruction_set;
pub mod lock;
pub mod lockfile;
pub mod migration;
pub mod registry;
pub mod render;
pub mod schema;
pub mod source;
pub mod validation;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::compile::{
        CompileReport, CompiledResult, Compiler, FileFailure, FileStatus, Outcome,
    };
    pub use crate::config::GuardConfig;
    pub use crate::digest::Digest;
    pub use crate::error::{GuardError, Result};
    pub use crate::executor::Recorder;
    pub use crate::instruction::{
        Arguments, ColumnOptions, CustomInstruction, ForeignKeyOptions, IndexOptions, Instruction,
        ReferenceOptions, RemoveIndexOptions, Tag,
    };
    pub use crate::instruction_set::{Direction, InstructionSet};
    pub use crate::lock::LockWeight;
    pub use crate::lockfile::{DigestRecord, Lockfile};
    pub use crate::migration::{Capability, Migration, Procedure};
    pub use crate::registry::{OperationRegistry, OperationTemplate};
    pub use crate::render::{PostgresRenderer, Renderer};
    pub use crate::schema::{
        ColumnDefinition, ColumnType, DefaultValue, ForeignKeyAction, IndexType,
    };
    pub use crate::validation::timeout::{EffectiveTimeouts, Timeout, TimeoutConfig, TimeoutPolicy};
    pub use crate::validation::{
        ValidatedMigration, ValidationReport, ValidationResult, Validator, Violation,
        ViolationKind,
    };
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_rust_defined_migration_end_to_end() {
        let migration = Migration::new("add_email_to_users")
            .up(|m| m.add_column("users", "email", "string", ColumnOptions::default()))
            .down(|m| m.remove_column("users", "email"));

        let validator = Validator::default();
        let validated = validator.validated(&migration).unwrap();
        let sql = PostgresRenderer::new().render(&validated).unwrap();
        assert!(sql.contains("ADD COLUMN \"email\" VARCHAR"));
        assert!(sql.contains("DROP COLUMN \"email\""));
    }

    #[test]
    fn test_prelude_types_compose() {
        let mut registry = OperationRegistry::new();
        registry
            .register("noop", |name: &str, args: &Arguments| {
                Ok(CustomInstruction {
                    name: name.to_string(),
                    table: None,
                    lock_weight: None,
                    statements: vec!["SELECT 1".to_string()],
                    arguments: args.clone(),
                })
            })
            .unwrap();
        let migration = Migration::new("custom")
            .registry(std::sync::Arc::new(registry))
            .up(|m| m.custom("noop", Arguments::new()))
            .down(|m| m.custom("noop", Arguments::new()));

        let validator = Validator::new(TimeoutConfig::default());
        let validated = validator.validated(&migration).unwrap();
        assert!(validated
            .capabilities()
            .contains(&Capability::CustomOperation("noop".to_string())));
        let sql = PostgresRenderer::new().render(&validated).unwrap();
        assert!(sql.contains("SELECT 1;"));
    }
}
