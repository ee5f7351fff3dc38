//! Registry of custom operations.
//!
//! Operation names outside the built-in vocabulary are resolved here. A
//! constructor turns the call arguments into a [`CustomInstruction`];
//! operations declared in the configuration file are backed by SQL
//! templates with `{argument}` placeholders.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GuardError, Result};
use crate::instruction::{Arguments, CustomInstruction, Tag};
use crate::lock::LockWeight;

/// Builds a custom instruction from the operation name and its arguments.
pub type Constructor = Arc<dyn Fn(&str, &Arguments) -> Result<CustomInstruction> + Send + Sync>;

/// A custom operation declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTemplate {
    /// Lock taken by the operation; unclassified when absent.
    #[serde(default)]
    pub lock: Option<LockWeight>,
    /// Argument holding the table name.
    #[serde(default = "default_table_argument")]
    pub table_argument: String,
    /// SQL statements with `{argument}` placeholders.
    pub sql: Vec<String>,
}

fn default_table_argument() -> String {
    "table".to_string()
}

/// Matches `{argument}` placeholders in template SQL.
static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

impl OperationTemplate {
    /// Expands this template for one call.
    pub fn instantiate(&self, name: &str, arguments: &Arguments) -> Result<CustomInstruction> {
        let placeholder = placeholder_regex();

        let mut statements = Vec::with_capacity(self.sql.len());
        for template in &self.sql {
            let mut missing = Vec::new();
            let rendered = placeholder.replace_all(template, |caps: &regex::Captures<'_>| {
                let key = &caps[1];
                match arguments.get(key) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(value) => value.to_string(),
                    None => {
                        missing.push(key.to_string());
                        String::new()
                    }
                }
            });
            if !missing.is_empty() {
                return Err(GuardError::invalid_argument(
                    name,
                    format!("missing argument(s): {}", missing.join(", ")),
                ));
            }
            statements.push(rendered.into_owned());
        }

        let table = arguments
            .get(&self.table_argument)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        Ok(CustomInstruction {
            name: name.to_string(),
            table,
            lock_weight: self.lock,
            statements,
            arguments: arguments.clone(),
        })
    }
}

/// Maps custom operation names to constructors.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Constructor>,
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configured templates.
    pub fn from_templates<'a, I>(templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a OperationTemplate)>,
    {
        let mut registry = Self::new();
        for (name, template) in templates {
            let template = template.clone();
            registry.register(name.clone(), move |op: &str, args: &Arguments| {
                template.instantiate(op, args)
            })?;
        }
        Ok(registry)
    }

    /// Registers a constructor under `name`.
    ///
    /// Built-in operation names cannot be shadowed.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(&str, &Arguments) -> Result<CustomInstruction> + Send + Sync + 'static,
    {
        let name = name.into();
        if Tag::parse(&name).is_some() {
            return Err(GuardError::Config(format!(
                "custom operation '{name}' shadows a built-in operation"
            )));
        }
        debug!(operation = %name, "Registering custom operation");
        self.operations.insert(name, Arc::new(constructor));
        Ok(())
    }

    /// Returns the constructor for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Constructor> {
        self.operations.get(name)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Returns the registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Constructs the instruction for a registered operation.
    pub fn construct(&self, name: &str, arguments: &Arguments) -> Result<CustomInstruction> {
        let constructor = self.get(name).ok_or_else(|| GuardError::UnknownOperation {
            name: name.to_string(),
        })?;
        constructor(name, arguments)
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}
