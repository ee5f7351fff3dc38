//! Renderers turning validated migrations into output text.
//!
//! The compiler only hashes what a renderer returns; the format is up to
//! the renderer, as long as the same migration always renders the same.

mod postgres;

pub use postgres::PostgresRenderer;

use crate::error::Result;
use crate::validation::ValidatedMigration;

/// Produces the compiled body of a validated migration.
pub trait Renderer: Send + Sync {
    /// Returns the renderer name.
    fn name(&self) -> &'static str;

    /// Returns the file extension of compiled output.
    fn extension(&self) -> &str {
        "sql"
    }

    /// Renders a migration deterministically.
    fn render(&self, migration: &ValidatedMigration<'_>) -> Result<String>;
}

impl<R: Renderer + ?Sized> Renderer for &R {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn extension(&self) -> &str {
        (**self).extension()
    }

    fn render(&self, migration: &ValidatedMigration<'_>) -> Result<String> {
        (**self).render(migration)
    }
}
