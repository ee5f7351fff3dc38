//! Rules checked on one instruction at a time.

use super::{ValidationResult, Violation, ViolationKind};
use crate::instruction::Instruction;
use crate::schema::IndexType;

fn violation(instruction: &Instruction, message: &str) -> Violation {
    Violation::new(
        ViolationKind::Structural,
        format!("{}: {}", instruction.description(), message),
    )
}

/// Checks the local rules of `instruction`'s operation.
pub fn check(instruction: &Instruction) -> ValidationResult {
    let mut violations = Vec::new();

    match instruction {
        Instruction::AddColumn { options, .. } => {
            if !options.null && options.default.is_none() {
                violations.push(violation(
                    instruction,
                    "a NOT NULL column needs a default value",
                ));
            }
            if options.unique {
                violations.push(violation(
                    instruction,
                    "a new column cannot be UNIQUE; add a unique index in a separate migration",
                ));
            }
        }
        Instruction::AddReference { options, .. } => {
            if options.index {
                violations.push(violation(
                    instruction,
                    "`index: true` is not allowed; add the index in a separate migration",
                ));
            }
            if options.foreign_key {
                violations.push(violation(
                    instruction,
                    "`foreign_key: true` is not allowed; add the foreign key in a separate migration",
                ));
            }
        }
        Instruction::AddIndex { options, .. } => {
            if options.using == IndexType::Hash {
                violations.push(violation(
                    instruction,
                    "hash indexes are not allowed; use btree",
                ));
            }
        }
        Instruction::RemoveIndex { options, .. } => {
            if options.name.is_none() && options.column.is_none() {
                violations.push(violation(
                    instruction,
                    "either `name` or `column` is required",
                ));
            }
        }
        Instruction::CreateTable { columns, .. } => {
            if columns.is_empty() {
                violations.push(violation(instruction, "at least one column is required"));
            }
        }
        _ => {}
    }

    violations.into_iter().collect()
}
