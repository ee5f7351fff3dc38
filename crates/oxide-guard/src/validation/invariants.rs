//! Rules checked over all instructions of one direction.

use super::{ValidationResult, Violation, ViolationKind};
use crate::instruction_set::InstructionSet;

/// A concurrent index operation must be alone in its direction.
pub fn check(set: &InstructionSet) -> ValidationResult {
    if set.len() < 2 {
        return ValidationResult::Valid;
    }
    set.iter()
        .filter(|instruction| instruction.is_concurrent_index())
        .map(|instruction| {
            Violation::new(
                ViolationKind::CrossInstruction,
                format!(
                    "{} must be the only instruction in its direction ({} found); move it to its own migration",
                    instruction.description(),
                    set.len()
                ),
            )
        })
        .collect()
}
