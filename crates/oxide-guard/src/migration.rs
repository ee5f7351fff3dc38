//! Migrations and their per-direction procedures.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::executor::Recorder;
use crate::instruction::Instruction;
use crate::instruction_set::{Direction, InstructionSet};
use crate::registry::OperationRegistry;
use crate::validation::timeout::Timeout;

/// User logic that records the instructions of one direction.
pub trait Procedure {
    /// Runs the procedure against a recorder.
    fn run(&self, recorder: &mut Recorder) -> Result<()>;
}

impl<F> Procedure for F
where
    F: Fn(&mut Recorder) -> Result<()>,
{
    fn run(&self, recorder: &mut Recorder) -> Result<()> {
        self(recorder)
    }
}

/// Something a compiled migration needs from whoever renders or runs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// At least one direction cannot run inside a transaction.
    NonTransactional,
    /// The named custom operation is used.
    CustomOperation(String),
}

impl Capability {
    /// Collects the capabilities required by some instruction sets.
    pub fn required_by<'a, I>(sets: I) -> BTreeSet<Self>
    where
        I: IntoIterator<Item = &'a InstructionSet>,
    {
        let mut capabilities = BTreeSet::new();
        for set in sets {
            if set.has_concurrent_index() {
                capabilities.insert(Self::NonTransactional);
            }
            for instruction in set {
                if let Instruction::Custom(custom) = instruction {
                    capabilities.insert(Self::CustomOperation(custom.name.clone()));
                }
            }
        }
        capabilities
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonTransactional => f.write_str("non-transactional"),
            Self::CustomOperation(name) => write!(f, "custom operation '{name}'"),
        }
    }
}

/// A named schema change with an `up` and a `down` direction.
///
/// Instructions are recorded lazily: a direction's procedure runs the
/// first time that direction is requested, and the result is kept.
///
/// ```rust,ignore
/// let migration = Migration::new("add_email_to_users")
///     .up(|m| m.add_column("users", "email", "string", ColumnOptions::default()))
///     .down(|m| m.remove_column("users", "email"));
/// ```
pub struct Migration {
    name: String,
    database: Option<String>,
    lock_timeout: Option<Timeout>,
    statement_timeout: Option<Timeout>,
    up: Option<Box<dyn Procedure>>,
    down: Option<Box<dyn Procedure>>,
    registry: Arc<OperationRegistry>,
    up_instructions: OnceCell<InstructionSet>,
    down_instructions: OnceCell<InstructionSet>,
}

impl Migration {
    /// Creates a migration with no procedures.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: None,
            lock_timeout: None,
            statement_timeout: None,
            up: None,
            down: None,
            registry: Arc::new(OperationRegistry::new()),
            up_instructions: OnceCell::new(),
            down_instructions: OnceCell::new(),
        }
    }

    /// Sets the `up` procedure.
    #[must_use]
    pub fn up<F>(self, procedure: F) -> Self
    where
        F: Fn(&mut Recorder) -> Result<()> + 'static,
    {
        self.up_procedure(procedure)
    }

    /// Sets the `down` procedure.
    #[must_use]
    pub fn down<F>(self, procedure: F) -> Self
    where
        F: Fn(&mut Recorder) -> Result<()> + 'static,
    {
        self.down_procedure(procedure)
    }

    /// Sets the `up` procedure from any [`Procedure`].
    #[must_use]
    pub fn up_procedure(mut self, procedure: impl Procedure + 'static) -> Self {
        self.up = Some(Box::new(procedure));
        self
    }

    /// Sets the `down` procedure from any [`Procedure`].
    #[must_use]
    pub fn down_procedure(mut self, procedure: impl Procedure + 'static) -> Self {
        self.down = Some(Box::new(procedure));
        self
    }

    /// Overrides the lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.lock_timeout = Some(timeout.into());
        self
    }

    /// Overrides the statement timeout.
    #[must_use]
    pub fn statement_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.statement_timeout = Some(timeout.into());
        self
    }

    /// Sets the target database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the registry used to resolve custom operations.
    #[must_use]
    pub fn registry(mut self, registry: Arc<OperationRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the migration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the target database, if declared.
    #[must_use]
    pub fn target_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Returns the lock timeout override.
    #[must_use]
    pub fn lock_timeout_override(&self) -> Option<Timeout> {
        self.lock_timeout
    }

    /// Returns the statement timeout override.
    #[must_use]
    pub fn statement_timeout_override(&self) -> Option<Timeout> {
        self.statement_timeout
    }

    /// Returns true if the direction has a procedure.
    #[must_use]
    pub fn implements(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up.is_some(),
            Direction::Down => self.down.is_some(),
        }
    }

    /// Returns the instructions of a direction, recording them on first use.
    ///
    /// A failed recording is not kept; asking again re-runs the procedure.
    pub fn instructions(&self, direction: Direction) -> Result<&InstructionSet> {
        let (procedure, cell) = match direction {
            Direction::Up => (&self.up, &self.up_instructions),
            Direction::Down => (&self.down, &self.down_instructions),
        };
        if let Some(set) = cell.get() {
            return Ok(set);
        }

        let procedure = procedure.as_ref().ok_or_else(|| GuardError::NotImplemented {
            migration: self.name.clone(),
            direction,
        })?;

        let mut recorder = Recorder::new(direction, Arc::clone(&self.registry));
        procedure.run(&mut recorder)?;
        let set = recorder.finish();
        debug!(
            migration = %self.name,
            direction = %direction,
            count = set.len(),
            "Recorded migration direction"
        );
        Ok(cell.get_or_init(|| set))
    }

    /// Returns the capabilities required by both directions.
    pub fn capabilities(&self) -> Result<BTreeSet<Capability>> {
        let up = self.instructions(Direction::Up)?;
        let down = self.instructions(Direction::Down)?;
        Ok(Capability::required_by([up, down]))
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("lock_timeout", &self.lock_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("up", &self.up.is_some())
            .field("down", &self.down.is_some())
            .finish_non_exhaustive()
    }
}
