//! Validation pipeline.
//!
//! Three layers run over each direction of a migration:
//!
//! - **structural** rules check one instruction at a time
//! - **invariants** check the direction's instructions as a whole
//! - **timeout** policies check the effective timeouts against the locks taken
//!
//! Failures from every layer and both directions accumulate into a single
//! [`ValidationResult`]; nothing short-circuits.

pub mod invariants;
pub mod structural;
pub mod timeout;

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{GuardError, Result};
use crate::instruction_set::{Direction, InstructionSet};
use crate::migration::{Capability, Migration};

use self::timeout::{EffectiveTimeouts, TimeoutConfig};

/// Category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A direction has no procedure.
    Unimplemented,
    /// An operation name with no handler.
    UnknownOperation,
    /// Arguments of an operation have the wrong shape.
    InvalidArgument,
    /// A procedure failed for another reason.
    Procedure,
    /// A single instruction breaks a local rule.
    Structural,
    /// The instructions of a direction break a combined rule.
    CrossInstruction,
    /// Timeouts do not fit the locks taken.
    TimeoutPolicy,
}

/// One human-readable validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// What kind of rule failed.
    pub kind: ViolationKind,
    /// Direction the failure was found in.
    pub direction: Option<Direction>,
    /// Description of the problem.
    pub message: String,
}

impl Violation {
    /// Creates a violation not yet tied to a direction.
    #[must_use]
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            direction: None,
            message: message.into(),
        }
    }

    /// Ties the violation to a direction.
    #[must_use]
    pub fn in_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Converts an error raised while recording a direction.
    #[must_use]
    pub fn from_error(error: &GuardError) -> Self {
        let kind = match error {
            GuardError::NotImplemented { .. } => ViolationKind::Unimplemented,
            GuardError::UnknownOperation { .. } => ViolationKind::UnknownOperation,
            GuardError::InvalidArgument { .. } => ViolationKind::InvalidArgument,
            _ => ViolationKind::Procedure,
        };
        Self::new(kind, error.to_string())
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Some(direction) => write!(f, "[{direction}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of validation: success, or a non-empty list of violations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[must_use]
pub enum ValidationResult {
    /// No problems found.
    #[default]
    Valid,
    /// At least one problem found.
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    /// A failed result holding one violation.
    pub fn failure(violation: Violation) -> Self {
        Self::Invalid(vec![violation])
    }

    /// Combines two results, keeping violations in order.
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Valid, other) => other,
            (this, Self::Valid) => this,
            (Self::Invalid(mut left), Self::Invalid(right)) => {
                left.extend(right);
                Self::Invalid(left)
            }
        }
    }

    /// Ties every violation to a direction.
    pub fn in_direction(self, direction: Direction) -> Self {
        match self {
            Self::Valid => Self::Valid,
            Self::Invalid(violations) => Self::Invalid(
                violations
                    .into_iter()
                    .map(|v| v.in_direction(direction))
                    .collect(),
            ),
        }
    }

    /// Returns true if there are no violations.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Returns the violations; empty when valid.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Valid => &[],
            Self::Invalid(violations) => violations,
        }
    }

    /// Converts into a `Result`, reporting failures for `migration`.
    pub fn into_result(self, migration: &str) -> Result<()> {
        match self {
            Self::Valid => Ok(()),
            Self::Invalid(violations) => Err(GuardError::Validation {
                migration: migration.to_string(),
                report: ValidationReport { violations },
            }),
        }
    }
}

impl FromIterator<Violation> for ValidationResult {
    fn from_iter<I: IntoIterator<Item = Violation>>(iter: I) -> Self {
        let violations: Vec<Violation> = iter.into_iter().collect();
        if violations.is_empty() {
            Self::Valid
        } else {
            Self::Invalid(violations)
        }
    }
}

/// Every violation of one migration, for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns the violations.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {violation}")?;
        }
        Ok(())
    }
}

/// Runs the validation pipeline with a fixed timeout configuration.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: TimeoutConfig,
}

impl Validator {
    /// Creates a validator.
    #[must_use]
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Returns the timeout configuration.
    #[must_use]
    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Resolves the timeouts a direction of `migration` will run with.
    #[must_use]
    pub fn effective_timeouts(
        &self,
        migration: &Migration,
        set: &InstructionSet,
    ) -> EffectiveTimeouts {
        EffectiveTimeouts::resolve(
            migration.lock_timeout_override(),
            migration.statement_timeout_override(),
            set.strictest_lock(),
            &self.config,
        )
    }

    /// Validates one recorded direction.
    pub fn validate_set(&self, migration: &Migration, set: &InstructionSet) -> ValidationResult {
        let timeouts = self.effective_timeouts(migration, set);
        set.iter()
            .map(structural::check)
            .fold(ValidationResult::Valid, ValidationResult::merge)
            .merge(invariants::check(set))
            .merge(timeout::check(set, &timeouts, &self.config))
            .in_direction(set.direction())
    }

    /// Validates both directions of a migration.
    pub fn validate(&self, migration: &Migration) -> ValidationResult {
        Direction::BOTH
            .into_iter()
            .map(|direction| match migration.instructions(direction) {
                Ok(set) => self.validate_set(migration, set),
                Err(error) => {
                    ValidationResult::failure(Violation::from_error(&error).in_direction(direction))
                }
            })
            .fold(ValidationResult::Valid, ValidationResult::merge)
    }

    /// Validates a migration and returns the render-ready view of it.
    pub fn validated<'a>(&self, migration: &'a Migration) -> Result<ValidatedMigration<'a>> {
        self.validate(migration).into_result(migration.name())?;

        let up = migration.instructions(Direction::Up)?;
        let down = migration.instructions(Direction::Down)?;
        Ok(ValidatedMigration {
            migration,
            up_timeouts: self.effective_timeouts(migration, up),
            down_timeouts: self.effective_timeouts(migration, down),
            capabilities: Capability::required_by([up, down]),
            up,
            down,
        })
    }
}

/// A migration that passed validation.
///
/// Only [`Validator::validated`] creates these, so renderers never see an
/// unchecked migration.
#[derive(Debug)]
pub struct ValidatedMigration<'a> {
    migration: &'a Migration,
    up: &'a InstructionSet,
    down: &'a InstructionSet,
    up_timeouts: EffectiveTimeouts,
    down_timeouts: EffectiveTimeouts,
    capabilities: BTreeSet<Capability>,
}

impl<'a> ValidatedMigration<'a> {
    /// Returns the migration name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.migration.name()
    }

    /// Returns the underlying migration.
    #[must_use]
    pub fn migration(&self) -> &'a Migration {
        self.migration
    }

    /// Returns the instructions of a direction.
    #[must_use]
    pub fn instructions(&self, direction: Direction) -> &'a InstructionSet {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    /// Returns the effective timeouts of a direction.
    #[must_use]
    pub fn timeouts(&self, direction: Direction) -> EffectiveTimeouts {
        match direction {
            Direction::Up => self.up_timeouts,
            Direction::Down => self.down_timeouts,
        }
    }

    /// Returns the capabilities required by the migration.
    #[must_use]
    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    /// Returns true if a direction can run inside a transaction.
    #[must_use]
    pub fn is_transactional(&self, direction: Direction) -> bool {
        !self.instructions(direction).has_concurrent_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{ColumnOptions, IndexOptions, RemoveIndexOptions};
    use crate::validation::timeout::Timeout;

    fn add_email() -> Migration {
        Migration::new("add_email")
            .up(|m| m.add_column("users", "email", "string", ColumnOptions::default()))
            .down(|m| m.remove_column("users", "email"))
    }

    #[test]
    fn test_merge_is_associative() {
        let a = ValidationResult::failure(Violation::new(ViolationKind::Structural, "a"));
        let b = ValidationResult::Valid;
        let c = ValidationResult::failure(Violation::new(ViolationKind::TimeoutPolicy, "c"));

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));
        assert_eq!(left, right);
        let messages: Vec<_> = left.violations().iter().map(|v| v.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "c"]);
    }

    #[test]
    fn test_collect_empty_is_valid() {
        let result: ValidationResult = Vec::<Violation>::new().into_iter().collect();
        assert!(result.is_valid());
    }

    #[test]
    fn test_nullable_column_with_defaults_is_valid() {
        let validator = Validator::default();
        assert!(validator.validate(&add_email()).is_valid());
    }

    #[test]
    fn test_missing_down_reported_as_violation() {
        let migration =
            Migration::new("no_down").up(|m| m.drop_table("legacy"));
        let result = Validator::default().validate(&migration);
        assert_eq!(result.violations().len(), 1);
        let violation = &result.violations()[0];
        assert_eq!(violation.kind, ViolationKind::Unimplemented);
        assert_eq!(violation.direction, Some(Direction::Down));
    }

    #[test]
    fn test_unknown_operation_reported_as_violation() {
        let migration = Migration::new("m")
            .up(|m| m.call("teleport_table", Default::default()))
            .down(|m| m.drop_table("t"));
        let result = Validator::default().validate(&migration);
        assert_eq!(result.violations()[0].kind, ViolationKind::UnknownOperation);
    }

    #[test]
    fn test_failures_accumulate_across_layers_and_directions() {
        let migration = Migration::new("bad")
            .up(|m| {
                m.add_column(
                    "users",
                    "email",
                    "string",
                    ColumnOptions::default().not_null(),
                )?;
                m.add_index("users", "email", IndexOptions::default())
            })
            .down(|m| m.remove_index("users", RemoveIndexOptions::default()));

        let result = Validator::default().validate(&migration);
        let kinds: Vec<_> = result.violations().iter().map(|v| (v.direction, v.kind)).collect();
        assert!(kinds.contains(&(Some(Direction::Up), ViolationKind::Structural)));
        assert!(kinds.contains(&(Some(Direction::Up), ViolationKind::CrossInstruction)));
        assert!(kinds.contains(&(Some(Direction::Up), ViolationKind::TimeoutPolicy)));
        assert!(kinds.contains(&(Some(Direction::Down), ViolationKind::Structural)));
    }

    #[test]
    fn test_single_index_with_default_timeouts_is_valid() {
        let migration = Migration::new("index_email")
            .up(|m| m.add_index("users", "email", IndexOptions::default()))
            .down(|m| m.remove_index("users", RemoveIndexOptions::by_column("email")));
        assert!(Validator::default().validate(&migration).is_valid());
    }

    #[test]
    fn test_index_with_short_statement_timeout_is_invalid() {
        let migration = Migration::new("index_email")
            .statement_timeout(Timeout::from_secs(60))
            .up(|m| m.add_index("users", "email", IndexOptions::default()))
            .down(|m| m.remove_index("users", RemoveIndexOptions::by_name("index_users_on_email")));
        let result = Validator::default().validate(&migration);
        assert_eq!(result.violations().len(), 2);
        assert!(result
            .violations()
            .iter()
            .all(|v| v.kind == ViolationKind::TimeoutPolicy));
    }

    #[test]
    fn test_disabled_override_on_exclusive_migration_is_invalid() {
        let migration = add_email()
            .lock_timeout(Timeout::Disabled)
            .statement_timeout(Timeout::Disabled);
        let result = Validator::default().validate(&migration);
        // two per direction
        assert_eq!(result.violations().len(), 4);
    }

    #[test]
    fn test_validated_view() {
        let migration = add_email();
        let validator = Validator::default();
        let validated = validator.validated(&migration).unwrap();
        assert_eq!(validated.name(), "add_email");
        assert_eq!(validated.instructions(Direction::Up).len(), 1);
        assert!(validated.is_transactional(Direction::Up));
        assert_eq!(validated.timeouts(Direction::Down).lock, Timeout::from_secs(5));
        assert!(validated.capabilities().is_empty());
    }

    #[test]
    fn test_validated_rejects_invalid() {
        let migration = Migration::new("bad").up(|m| m.drop_table("t"));
        let err = Validator::default().validated(&migration).unwrap_err();
        match err {
            GuardError::Validation { migration, report } => {
                assert_eq!(migration, "bad");
                assert_eq!(report.violations().len(), 1);
                assert!(report.to_string().contains("[down]"));
            }
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }
}
