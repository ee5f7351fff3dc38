//! Ordered instructions recorded for one direction of a migration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;
use crate::lock::LockWeight;

/// The half of a migration being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply the change.
    Up,
    /// Roll the change back.
    Down,
}

impl Direction {
    /// Both directions, in compile order.
    pub const BOTH: [Self; 2] = [Self::Up, Self::Down];

    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instructions of one direction, in recording order.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionSet {
    direction: Direction,
    instructions: Vec<Instruction>,
}

impl InstructionSet {
    /// Creates an empty set for a direction.
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            instructions: Vec::new(),
        }
    }

    /// Returns the direction this set belongs to.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Appends an instruction.
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Iterates over the instructions in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    /// Returns the instructions as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the most restrictive lock taken by any member.
    ///
    /// Unclassified instructions are ignored; an empty set is `Share`.
    #[must_use]
    pub fn strictest_lock(&self) -> LockWeight {
        LockWeight::strictest(self.instructions.iter().filter_map(Instruction::lock_weight))
    }

    /// Returns true if any member is a concurrent index operation.
    #[must_use]
    pub fn has_concurrent_index(&self) -> bool {
        self.instructions.iter().any(Instruction::is_concurrent_index)
    }
}

impl<'a> IntoIterator for &'a InstructionSet {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
