//! Lock classification for schema changes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How restrictive the table lock taken by a schema change is.
///
/// Variants are ordered from least to most restrictive so that the
/// strictest lock of a group of instructions is simply their maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LockWeight {
    /// Concurrent reads and writes stay possible.
    #[default]
    Share,
    /// All concurrent access to the table is blocked.
    AccessExclusive,
}

impl LockWeight {
    /// Returns the PostgreSQL name of the lock mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Share => "SHARE",
            Self::AccessExclusive => "ACCESS EXCLUSIVE",
        }
    }

    /// Folds lock weights into the strictest one. `Share` for no input.
    pub fn strictest<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        weights.into_iter().max().unwrap_or_default()
    }
}

impl fmt::Display for LockWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(LockWeight::Share < LockWeight::AccessExclusive);
    }

    #[test]
    fn test_strictest_of_nothing_is_share() {
        assert_eq!(LockWeight::strictest([]), LockWeight::Share);
    }

    #[test]
    fn test_strictest_picks_max() {
        let weights = [
            LockWeight::Share,
            LockWeight::AccessExclusive,
            LockWeight::Share,
        ];
        assert_eq!(LockWeight::strictest(weights), LockWeight::AccessExclusive);
        assert_eq!(
            LockWeight::strictest([LockWeight::Share, LockWeight::Share]),
            LockWeight::Share
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&LockWeight::AccessExclusive).unwrap();
        assert_eq!(json, "\"access_exclusive\"");
        let parsed: LockWeight = serde_json::from_str("\"share\"").unwrap();
        assert_eq!(parsed, LockWeight::Share);
    }
}
