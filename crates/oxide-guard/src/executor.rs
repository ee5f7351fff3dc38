//! Migration executor.
//!
//! A [`Recorder`] is handed to the procedure of one migration direction.
//! Every operation called on it appends an [`Instruction`] to that
//! direction's [`InstructionSet`]; nothing is executed against a database.

use std::sync::Arc;

use tracing::debug;

use crate::error::{GuardError, Result};
use crate::instruction::{
    Arguments, ColumnOptions, ForeignKeyOptions, IndexOptions, Instruction, IntoColumns,
    ReferenceOptions, RemoveIndexOptions, Tag,
};
use crate::instruction_set::{Direction, InstructionSet};
use crate::registry::OperationRegistry;
use crate::schema::{ColumnDefinition, ColumnType, DefaultValue};

/// Records the instructions of one migration direction.
#[derive(Debug)]
pub struct Recorder {
    registry: Arc<OperationRegistry>,
    instructions: InstructionSet,
}

impl Recorder {
    /// Creates a recorder with an empty instruction set.
    #[must_use]
    pub fn new(direction: Direction, registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            instructions: InstructionSet::new(direction),
        }
    }

    /// Returns the direction being recorded.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.instructions.direction()
    }

    /// Returns what has been recorded so far.
    #[must_use]
    pub fn instructions(&self) -> &InstructionSet {
        &self.instructions
    }

    /// Consumes the recorder, returning the recorded set.
    #[must_use]
    pub fn finish(self) -> InstructionSet {
        self.instructions
    }

    /// Appends an already built instruction.
    pub fn record(&mut self, instruction: Instruction) -> Result<()> {
        debug!(
            direction = %self.direction(),
            instruction = %instruction,
            "Recorded instruction"
        );
        self.instructions.push(instruction);
        Ok(())
    }

    /// Dispatches an operation by name.
    ///
    /// Built-in names are parsed from `arguments`; other names are looked
    /// up in the registry and fail with `UnknownOperation` when absent.
    pub fn call(&mut self, name: &str, arguments: Arguments) -> Result<()> {
        match Tag::parse(name) {
            Some(tag) => {
                let instruction = Instruction::from_call(tag, arguments)?;
                self.record(instruction)
            }
            None => self.custom(name, arguments),
        }
    }

    /// Records a registered custom operation.
    pub fn custom(&mut self, name: &str, arguments: Arguments) -> Result<()> {
        if !self.registry.contains(name) {
            return Err(GuardError::UnknownOperation {
                name: name.to_string(),
            });
        }
        let custom = self.registry.construct(name, &arguments)?;
        self.record(Instruction::Custom(custom))
    }

    /// Records `create_table`.
    pub fn create_table(
        &mut self,
        table: impl Into<String>,
        columns: Vec<ColumnDefinition>,
    ) -> Result<()> {
        self.record(Instruction::create_table(table, columns))
    }

    /// Records `drop_table`.
    pub fn drop_table(&mut self, table: impl Into<String>) -> Result<()> {
        self.record(Instruction::drop_table(table))
    }

    /// Records `add_column`.
    pub fn add_column(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: impl Into<ColumnType>,
        options: ColumnOptions,
    ) -> Result<()> {
        self.record(Instruction::add_column(table, column, column_type, options))
    }

    /// Records `remove_column`.
    pub fn remove_column(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Result<()> {
        self.record(Instruction::remove_column(table, column))
    }

    /// Records `change_column`.
    pub fn change_column(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: impl Into<ColumnType>,
        options: ColumnOptions,
    ) -> Result<()> {
        self.record(Instruction::change_column(table, column, column_type, options))
    }

    /// Records `rename_column`.
    pub fn rename_column(
        &mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<()> {
        self.record(Instruction::rename_column(table, from, to))
    }

    /// Records `change_column_default`. `None` drops the default.
    pub fn change_column_default(
        &mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        default: Option<DefaultValue>,
    ) -> Result<()> {
        self.record(Instruction::change_column_default(table, column, default))
    }

    /// Records `add_reference`.
    pub fn add_reference(
        &mut self,
        table: impl Into<String>,
        reference: impl Into<String>,
        options: ReferenceOptions,
    ) -> Result<()> {
        self.record(Instruction::add_reference(table, reference, options))
    }

    /// Records `remove_reference`.
    pub fn remove_reference(
        &mut self,
        table: impl Into<String>,
        reference: impl Into<String>,
        polymorphic: bool,
    ) -> Result<()> {
        self.record(Instruction::remove_reference(table, reference, polymorphic))
    }

    /// Records `add_index`.
    pub fn add_index(
        &mut self,
        table: impl Into<String>,
        columns: impl IntoColumns,
        options: IndexOptions,
    ) -> Result<()> {
        let instruction = Instruction::add_index(table, columns, options)?;
        self.record(instruction)
    }

    /// Records `remove_index`.
    pub fn remove_index(
        &mut self,
        table: impl Into<String>,
        options: RemoveIndexOptions,
    ) -> Result<()> {
        self.record(Instruction::remove_index(table, options))
    }

    /// Records `add_foreign_key`.
    pub fn add_foreign_key(
        &mut self,
        table: impl Into<String>,
        to_table: impl Into<String>,
        options: ForeignKeyOptions,
    ) -> Result<()> {
        self.record(Instruction::add_foreign_key(table, to_table, options))
    }

    /// Records `validate_foreign_key`.
    pub fn validate_foreign_key(
        &mut self,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<()> {
        self.record(Instruction::validate_foreign_key(table, name))
    }

    /// Records `remove_foreign_key`.
    pub fn remove_foreign_key(
        &mut self,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<()> {
        self.record(Instruction::remove_foreign_key(table, name))
    }

    /// Records `add_check_constraint`.
    pub fn add_check_constraint(
        &mut self,
        table: impl Into<String>,
        expression: impl Into<String>,
        name: Option<String>,
    ) -> Result<()> {
        self.record(Instruction::add_check_constraint(table, expression, name))
    }

    /// Records `validate_check_constraint`.
    pub fn validate_check_constraint(
        &mut self,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<()> {
        self.record(Instruction::validate_check_constraint(table, name))
    }

    /// Records `remove_check_constraint`.
    pub fn remove_check_constraint(
        &mut self,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<()> {
        self.record(Instruction::remove_check_constraint(table, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::CustomInstruction;
    use crate::lock::LockWeight;
    use serde_json::json;

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn recorder() -> Recorder {
        Recorder::new(Direction::Up, Arc::new(OperationRegistry::new()))
    }

    #[test]
    fn test_records_in_order() {
        let mut m = recorder();
        m.add_column("users", "email", "string", ColumnOptions::default())
            .unwrap();
        m.add_foreign_key("posts", "users", ForeignKeyOptions::default())
            .unwrap();
        let set = m.finish();
        let tags: Vec<_> = set.iter().map(Instruction::tag).collect();
        assert_eq!(tags, vec!["add_column", "add_foreign_key"]);
        assert_eq!(set.direction(), Direction::Up);
    }

    #[test]
    fn test_call_builtin() {
        let mut m = recorder();
        m.call(
            "remove_column",
            args(json!({"table": "users", "column": "email"})),
        )
        .unwrap();
        assert_eq!(m.instructions().len(), 1);
        assert_eq!(
            m.instructions().strictest_lock(),
            LockWeight::AccessExclusive
        );
    }

    #[test]
    fn test_call_unknown_operation() {
        let mut m = recorder();
        let result = m.call("drop_everything", Arguments::new());
        assert!(
            matches!(result, Err(GuardError::UnknownOperation { name }) if name == "drop_everything")
        );
        assert!(m.instructions().is_empty());
    }

    #[test]
    fn test_call_registered_operation() {
        let mut registry = OperationRegistry::new();
        registry
            .register("vacuum", |name: &str, args: &Arguments| {
                Ok(CustomInstruction {
                    name: name.to_string(),
                    table: args
                        .get("table")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    lock_weight: None,
                    statements: vec!["VACUUM".to_string()],
                    arguments: args.clone(),
                })
            })
            .unwrap();

        let mut m = Recorder::new(Direction::Down, Arc::new(registry));
        m.call("vacuum", args(json!({"table": "events"}))).unwrap();
        let set = m.finish();
        let recorded = &set.as_slice()[0];
        assert_eq!(recorded.tag(), "vacuum");
        assert_eq!(recorded.table(), Some("events"));
    }

    #[test]
    fn test_add_index_invalid_columns_not_recorded() {
        let mut m = recorder();
        assert!(m
            .add_index("users", Vec::<String>::new(), IndexOptions::default())
            .is_err());
        assert!(m.instructions().is_empty());
    }
}
