//! Lock and statement timeout policies.
//!
//! Every instruction implies a [`TimeoutPolicy`] from its lock weight and
//! tag. The distinct policies of one direction are evaluated once against
//! that direction's [`EffectiveTimeouts`].

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ValidationResult, Violation, ViolationKind};
use crate::instruction::Instruction;
use crate::instruction_set::InstructionSet;
use crate::lock::LockWeight;

/// A lock or statement timeout.
///
/// Written as whole seconds in sources and config; `0` means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum Timeout {
    /// No timeout.
    Disabled,
    /// Abort after the given duration.
    Limit(Duration),
}

impl Timeout {
    /// Creates a timeout from whole seconds; `0` disables it.
    #[must_use]
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Disabled
        } else {
            Self::Limit(Duration::from_secs(secs))
        }
    }

    /// Returns true if the timeout is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    /// Returns the limit, if any.
    #[must_use]
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Limit(d) => Some(*d),
        }
    }
}

impl From<u64> for Timeout {
    fn from(secs: u64) -> Self {
        Self::from_secs(secs)
    }
}

impl From<Timeout> for u64 {
    fn from(timeout: Timeout) -> Self {
        timeout.as_duration().map_or(0, |d| d.as_secs())
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Disabled
        } else {
            Self::Limit(duration)
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("disabled"),
            Self::Limit(d) if d.subsec_millis() == 0 => write!(f, "{}s", d.as_secs()),
            Self::Limit(d) => write!(f, "{}ms", d.as_millis()),
        }
    }
}

/// Serde helpers storing a `Duration` as whole seconds.
pub(crate) mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

fn default_lock_timeout() -> Timeout {
    Timeout::from_secs(5)
}

fn default_statement_timeout() -> Timeout {
    Timeout::from_secs(60)
}

fn default_max_lock_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_statement_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_min_concurrent_statement_timeout() -> Duration {
    Duration::from_secs(3600)
}

/// Timeout defaults and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Lock timeout used when a migration does not override it.
    #[serde(default = "default_lock_timeout")]
    pub default_lock_timeout: Timeout,

    /// Statement timeout used when a migration does not override it.
    #[serde(default = "default_statement_timeout")]
    pub default_statement_timeout: Timeout,

    /// Upper bound on the lock timeout of ACCESS EXCLUSIVE work.
    #[serde(default = "default_max_lock_timeout", with = "seconds")]
    pub max_lock_timeout: Duration,

    /// Upper bound on the statement timeout of ACCESS EXCLUSIVE work.
    #[serde(default = "default_max_statement_timeout", with = "seconds")]
    pub max_statement_timeout: Duration,

    /// Lower bound on the statement timeout of concurrent index work.
    #[serde(default = "default_min_concurrent_statement_timeout", with = "seconds")]
    pub min_concurrent_statement_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_lock_timeout: default_lock_timeout(),
            default_statement_timeout: default_statement_timeout(),
            max_lock_timeout: default_max_lock_timeout(),
            max_statement_timeout: default_max_statement_timeout(),
            min_concurrent_statement_timeout: default_min_concurrent_statement_timeout(),
        }
    }
}

/// The timeouts a direction will actually run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveTimeouts {
    /// Lock timeout.
    pub lock: Timeout,
    /// Statement timeout.
    pub statement: Timeout,
}

impl EffectiveTimeouts {
    /// Resolves each timeout from its override or the configured default.
    ///
    /// Without an override a timeout is disabled when the direction's
    /// strictest lock is `Share`, so a direction mixing concurrent
    /// index work with exclusive work gets the defaults.
    #[must_use]
    pub fn resolve(
        lock_override: Option<Timeout>,
        statement_override: Option<Timeout>,
        strictest: LockWeight,
        config: &TimeoutConfig,
    ) -> Self {
        let fallback = |default: Timeout| match strictest {
            LockWeight::Share => Timeout::Disabled,
            LockWeight::AccessExclusive => default,
        };
        Self {
            lock: lock_override.unwrap_or_else(|| fallback(config.default_lock_timeout)),
            statement: statement_override
                .unwrap_or_else(|| fallback(config.default_statement_timeout)),
        }
    }
}

/// Timeout constraints implied by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeoutPolicy {
    /// No constraint.
    Noop,
    /// Both timeouts must be set and within the maxima.
    AccessExclusive,
    /// The statement timeout must not be below the concurrent minimum.
    Concurrent,
}

impl TimeoutPolicy {
    /// Selects the policy for one instruction.
    #[must_use]
    pub fn for_instruction(instruction: &Instruction) -> Self {
        match instruction.lock_weight() {
            Some(LockWeight::AccessExclusive) => Self::AccessExclusive,
            Some(LockWeight::Share) if instruction.is_concurrent_index() => Self::Concurrent,
            _ => Self::Noop,
        }
    }

    /// Returns the distinct policies implied by a set.
    #[must_use]
    pub fn for_set(set: &InstructionSet) -> BTreeSet<Self> {
        set.iter().map(Self::for_instruction).collect()
    }

    /// Checks the effective timeouts against this policy.
    pub fn evaluate(&self, timeouts: &EffectiveTimeouts, config: &TimeoutConfig) -> ValidationResult {
        let violation = |message: String| Violation::new(ViolationKind::TimeoutPolicy, message);
        let mut violations = Vec::new();

        match self {
            Self::Noop => {}
            Self::AccessExclusive => {
                match timeouts.lock {
                    Timeout::Disabled => violations.push(violation(
                        "lock timeout must not be disabled for ACCESS EXCLUSIVE operations"
                            .to_string(),
                    )),
                    Timeout::Limit(d) if d > config.max_lock_timeout => {
                        violations.push(violation(format!(
                            "lock timeout {} exceeds the maximum of {} for ACCESS EXCLUSIVE operations",
                            timeouts.lock,
                            Timeout::Limit(config.max_lock_timeout)
                        )));
                    }
                    Timeout::Limit(_) => {}
                }
                match timeouts.statement {
                    Timeout::Disabled => violations.push(violation(
                        "statement timeout must not be disabled for ACCESS EXCLUSIVE operations"
                            .to_string(),
                    )),
                    Timeout::Limit(d) if d > config.max_statement_timeout => {
                        violations.push(violation(format!(
                            "statement timeout {} exceeds the maximum of {} for ACCESS EXCLUSIVE operations",
                            timeouts.statement,
                            Timeout::Limit(config.max_statement_timeout)
                        )));
                    }
                    Timeout::Limit(_) => {}
                }
            }
            Self::Concurrent => {
                if let Timeout::Limit(d) = timeouts.statement {
                    if d < config.min_concurrent_statement_timeout {
                        violations.push(violation(format!(
                            "statement timeout {} is below the minimum of {} for concurrent index operations",
                            timeouts.statement,
                            Timeout::Limit(config.min_concurrent_statement_timeout)
                        )));
                    }
                }
            }
        }

        violations.into_iter().collect()
    }
}

/// Evaluates every distinct policy of a set once.
pub fn check(
    set: &InstructionSet,
    timeouts: &EffectiveTimeouts,
    config: &TimeoutConfig,
) -> ValidationResult {
    TimeoutPolicy::for_set(set)
        .into_iter()
        .map(|policy| policy.evaluate(timeouts, config))
        .fold(ValidationResult::Valid, ValidationResult::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{ColumnOptions, IndexOptions};
    use crate::instruction_set::Direction;

    fn limits(lock: u64, statement: u64) -> EffectiveTimeouts {
        EffectiveTimeouts {
            lock: Timeout::from_secs(lock),
            statement: Timeout::from_secs(statement),
        }
    }

    fn exclusive_set() -> InstructionSet {
        let mut set = InstructionSet::new(Direction::Up);
        set.push(Instruction::add_column(
            "users",
            "email",
            "string",
            ColumnOptions::default(),
        ));
        set
    }

    fn index_set() -> InstructionSet {
        let mut set = InstructionSet::new(Direction::Up);
        set.push(Instruction::add_index("users", "email", IndexOptions::default()).unwrap());
        set
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(Timeout::from_secs(0), Timeout::Disabled);
        assert_eq!(
            Timeout::from_secs(5),
            Timeout::Limit(Duration::from_secs(5))
        );
        assert_eq!(Timeout::from_secs(5).to_string(), "5s");
        assert_eq!(
            Timeout::Limit(Duration::from_millis(1500)).to_string(),
            "1500ms"
        );
    }

    #[test]
    fn test_timeout_serde_seconds() {
        let t: Timeout = serde_json::from_str("0").unwrap();
        assert!(t.is_disabled());
        let t: Timeout = serde_json::from_str("30").unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), "30");
    }

    #[test]
    fn test_policy_selection() {
        assert_eq!(
            TimeoutPolicy::for_set(&exclusive_set()).into_iter().collect::<Vec<_>>(),
            vec![TimeoutPolicy::AccessExclusive]
        );
        assert_eq!(
            TimeoutPolicy::for_set(&index_set()).into_iter().collect::<Vec<_>>(),
            vec![TimeoutPolicy::Concurrent]
        );
        let mut fk = InstructionSet::new(Direction::Up);
        fk.push(Instruction::validate_foreign_key("posts", "fk_posts_users"));
        assert_eq!(
            TimeoutPolicy::for_set(&fk).into_iter().collect::<Vec<_>>(),
            vec![TimeoutPolicy::Noop]
        );
    }

    #[test]
    fn test_resolve_defaults_for_exclusive() {
        let config = TimeoutConfig::default();
        let t = EffectiveTimeouts::resolve(None, None, LockWeight::AccessExclusive, &config);
        assert_eq!(t, limits(5, 60));
    }

    #[test]
    fn test_resolve_disables_for_share() {
        let config = TimeoutConfig::default();
        let t = EffectiveTimeouts::resolve(None, None, LockWeight::Share, &config);
        assert_eq!(t, limits(0, 0));

        let t = EffectiveTimeouts::resolve(
            None,
            Some(Timeout::from_secs(7200)),
            LockWeight::Share,
            &config,
        );
        assert_eq!(t, limits(0, 7200));
    }

    #[test]
    fn test_exclusive_statement_timeout_bounds() {
        let config = TimeoutConfig::default();
        let set = exclusive_set();
        assert!(check(&set, &limits(5, 60), &config).is_valid());
        assert!(check(&set, &limits(5, 30), &config).is_valid());

        let result = check(&set, &limits(5, 61), &config);
        assert_eq!(result.violations().len(), 1);
        assert!(result.violations()[0].message.contains("statement timeout 61s"));
    }

    #[test]
    fn test_exclusive_rejects_disabled_timeouts() {
        let config = TimeoutConfig::default();
        let result = check(&exclusive_set(), &limits(0, 0), &config);
        assert_eq!(result.violations().len(), 2);
        assert!(result
            .violations()
            .iter()
            .all(|v| v.kind == ViolationKind::TimeoutPolicy));
    }

    #[test]
    fn test_exclusive_lock_timeout_max() {
        let config = TimeoutConfig::default();
        let result = check(&exclusive_set(), &limits(11, 60), &config);
        assert_eq!(result.violations().len(), 1);
        assert!(result.violations()[0].message.contains("lock timeout 11s"));
    }

    #[test]
    fn test_concurrent_minimum() {
        let config = TimeoutConfig::default();
        let set = index_set();
        assert!(!check(&set, &limits(5, 60), &config).is_valid());
        assert!(!check(&set, &limits(0, 60), &config).is_valid());
        assert!(check(&set, &limits(5, 3600), &config).is_valid());
        assert!(check(&set, &limits(0, 0), &config).is_valid());
    }

    #[test]
    fn test_limits_follow_config() {
        let config = TimeoutConfig {
            max_statement_timeout: Duration::from_secs(120),
            ..TimeoutConfig::default()
        };
        assert!(check(&exclusive_set(), &limits(5, 90), &config).is_valid());
    }

    #[test]
    fn test_config_deserializes_seconds() {
        let config: TimeoutConfig =
            serde_json::from_str(r#"{"max_lock_timeout": 3, "default_lock_timeout": 0}"#).unwrap();
        assert_eq!(config.max_lock_timeout, Duration::from_secs(3));
        assert!(config.default_lock_timeout.is_disabled());
        assert_eq!(config.max_statement_timeout, Duration::from_secs(60));
    }
}
