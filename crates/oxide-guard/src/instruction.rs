//! Schema-change instructions.
//!
//! This module defines every operation a migration can record, the lock
//! each one takes, and the deterministic names derived for indexes and
//! constraints when the author does not supply one.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{GuardError, Result};
use crate::lock::LockWeight;
use crate::schema::{ColumnDefinition, ColumnType, DefaultValue, ForeignKeyAction, IndexType};

/// Free-form arguments attached to an instruction.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Built-in operation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// `create_table`
    CreateTable,
    /// `drop_table`
    DropTable,
    /// `add_column`
    AddColumn,
    /// `remove_column`
    RemoveColumn,
    /// `change_column`
    ChangeColumn,
    /// `rename_column`
    RenameColumn,
    /// `change_column_default`
    ChangeColumnDefault,
    /// `add_reference`
    AddReference,
    /// `remove_reference`
    RemoveReference,
    /// `add_index`
    AddIndex,
    /// `remove_index`
    RemoveIndex,
    /// `add_foreign_key`
    AddForeignKey,
    /// `validate_foreign_key`
    ValidateForeignKey,
    /// `remove_foreign_key`
    RemoveForeignKey,
    /// `add_check_constraint`
    AddCheckConstraint,
    /// `validate_check_constraint`
    ValidateCheckConstraint,
    /// `remove_check_constraint`
    RemoveCheckConstraint,
}

impl Tag {
    /// Every built-in tag.
    pub const ALL: [Self; 17] = [
        Self::CreateTable,
        Self::DropTable,
        Self::AddColumn,
        Self::RemoveColumn,
        Self::ChangeColumn,
        Self::RenameColumn,
        Self::ChangeColumnDefault,
        Self::AddReference,
        Self::RemoveReference,
        Self::AddIndex,
        Self::RemoveIndex,
        Self::AddForeignKey,
        Self::ValidateForeignKey,
        Self::RemoveForeignKey,
        Self::AddCheckConstraint,
        Self::ValidateCheckConstraint,
        Self::RemoveCheckConstraint,
    ];

    /// Returns the canonical operation name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTable => "create_table",
            Self::DropTable => "drop_table",
            Self::AddColumn => "add_column",
            Self::RemoveColumn => "remove_column",
            Self::ChangeColumn => "change_column",
            Self::RenameColumn => "rename_column",
            Self::ChangeColumnDefault => "change_column_default",
            Self::AddReference => "add_reference",
            Self::RemoveReference => "remove_reference",
            Self::AddIndex => "add_index",
            Self::RemoveIndex => "remove_index",
            Self::AddForeignKey => "add_foreign_key",
            Self::ValidateForeignKey => "validate_foreign_key",
            Self::RemoveForeignKey => "remove_foreign_key",
            Self::AddCheckConstraint => "add_check_constraint",
            Self::ValidateCheckConstraint => "validate_check_constraint",
            Self::RemoveCheckConstraint => "remove_check_constraint",
        }
    }

    /// Looks up a built-in tag by operation name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }

    /// Returns the lock this operation takes, if it is classified at all.
    ///
    /// Constraint operations are unclassified and do not contribute to a
    /// set's strictest lock.
    #[must_use]
    pub fn lock_weight(&self) -> Option<LockWeight> {
        match self {
            Self::CreateTable
            | Self::DropTable
            | Self::AddColumn
            | Self::RemoveColumn
            | Self::ChangeColumn
            | Self::RenameColumn
            | Self::AddReference
            | Self::RemoveReference => Some(LockWeight::AccessExclusive),
            Self::AddIndex | Self::RemoveIndex => Some(LockWeight::Share),
            Self::ChangeColumnDefault
            | Self::AddForeignKey
            | Self::ValidateForeignKey
            | Self::RemoveForeignKey
            | Self::AddCheckConstraint
            | Self::ValidateCheckConstraint
            | Self::RemoveCheckConstraint => None,
        }
    }

    /// Returns true for the concurrent index builds/drops.
    #[must_use]
    pub fn is_concurrent_index(&self) -> bool {
        matches!(self, Self::AddIndex | Self::RemoveIndex)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types that normalize into a list of column names.
pub trait IntoColumns {
    /// Converts into column names.
    fn into_columns(self) -> Vec<String>;
}

impl IntoColumns for &str {
    fn into_columns(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoColumns for String {
    fn into_columns(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoColumns for Vec<String> {
    fn into_columns(self) -> Vec<String> {
        self
    }
}

impl IntoColumns for Vec<&str> {
    fn into_columns(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl<const N: usize> IntoColumns for [&str; N] {
    fn into_columns(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

/// A single column name or a list of them, as written in sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    /// `column: email`
    One(String),
    /// `column: [a, b]`
    Many(Vec<String>),
}

impl IntoColumns for OneOrMany {
    fn into_columns(self) -> Vec<String> {
        match self {
            Self::One(column) => vec![column],
            Self::Many(columns) => columns,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_reference_type() -> ColumnType {
    ColumnType::BigInt
}

/// Options for `add_column` and `change_column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnOptions {
    /// Whether the column allows NULL values.
    pub null: bool,
    /// Default value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Whether a UNIQUE constraint is requested.
    pub unique: bool,
    /// Anything else the author passed.
    #[serde(flatten)]
    pub extra: Arguments,
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self {
            null: true,
            default: None,
            unique: false,
            extra: Arguments::new(),
        }
    }
}

impl ColumnOptions {
    /// Marks the column NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.null = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default_value(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Requests a UNIQUE constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Options for `add_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Explicit index name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Access method.
    pub using: IndexType,
    /// Partial index condition.
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Anything else the author passed.
    #[serde(flatten)]
    pub extra: Arguments,
}

impl IndexOptions {
    /// Sets the index name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the access method.
    #[must_use]
    pub fn using(mut self, using: IndexType) -> Self {
        self.using = using;
        self
    }

    /// Sets a partial index condition.
    #[must_use]
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Identifies the index dropped by `remove_index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveIndexOptions {
    /// Index name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Indexed column(s), used to derive the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<OneOrMany>,
    /// Anything else the author passed.
    #[serde(flatten)]
    pub extra: Arguments,
}

impl RemoveIndexOptions {
    /// Identifies the index by name.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Identifies the index by its column(s).
    #[must_use]
    pub fn by_column(columns: impl IntoColumns) -> Self {
        Self {
            column: Some(OneOrMany::Many(columns.into_columns())),
            ..Self::default()
        }
    }
}

/// Options for `add_reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceOptions {
    /// Whether the reference column allows NULL values.
    pub null: bool,
    /// Adds a `<name>_type` column next to `<name>_id`.
    pub polymorphic: bool,
    /// Requests an inline index.
    pub index: bool,
    /// Requests an inline foreign key.
    pub foreign_key: bool,
    /// Type of the `<name>_id` column.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Anything else the author passed.
    #[serde(flatten)]
    pub extra: Arguments,
}

impl Default for ReferenceOptions {
    fn default() -> Self {
        Self {
            null: default_true(),
            polymorphic: false,
            index: false,
            foreign_key: false,
            column_type: default_reference_type(),
            extra: Arguments::new(),
        }
    }
}

/// Options for `add_foreign_key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForeignKeyOptions {
    /// Referencing column; derived from the target table when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Referenced column; `id` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Constraint name; derived when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Action on delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ForeignKeyAction>,
    /// Action on update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ForeignKeyAction>,
    /// Anything else the author passed.
    #[serde(flatten)]
    pub extra: Arguments,
}

/// An instruction produced by a registered custom operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomInstruction {
    /// Operation name it was registered under.
    pub name: String,
    /// Table it touches, if any.
    pub table: Option<String>,
    /// Lock it declares; `None` leaves it unclassified.
    pub lock_weight: Option<LockWeight>,
    /// Statements handed to the renderer verbatim.
    pub statements: Vec<String>,
    /// The arguments it was called with.
    pub arguments: Arguments,
}

/// A single recorded schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Create a table.
    CreateTable {
        /// Table name.
        table: String,
        /// Column definitions.
        columns: Vec<ColumnDefinition>,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Column type.
        column_type: ColumnType,
        /// Column options.
        options: ColumnOptions,
    },

    /// Remove a column.
    RemoveColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Change a column's type and options.
    ChangeColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New column type.
        column_type: ColumnType,
        /// New column options.
        options: ColumnOptions,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Set or drop a column default.
    ChangeColumnDefault {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// New default; `None` drops it.
        default: Option<DefaultValue>,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Add a `<reference>_id` column.
    AddReference {
        /// Table name.
        table: String,
        /// Reference name (the column is `<reference>_id`).
        reference: String,
        /// Reference options.
        options: ReferenceOptions,
    },

    /// Remove a `<reference>_id` column.
    RemoveReference {
        /// Table name.
        table: String,
        /// Reference name.
        reference: String,
        /// Whether the `<reference>_type` column goes too.
        polymorphic: bool,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Build an index concurrently.
    AddIndex {
        /// Table name.
        table: String,
        /// Indexed columns.
        columns: Vec<String>,
        /// Index name (explicit or derived).
        name: String,
        /// Index options as given.
        options: IndexOptions,
    },

    /// Drop an index concurrently.
    RemoveIndex {
        /// Table name.
        table: String,
        /// Identification of the index as given.
        options: RemoveIndexOptions,
    },

    /// Add a foreign key without validating existing rows.
    AddForeignKey {
        /// Referencing table.
        table: String,
        /// Referenced table.
        to_table: String,
        /// Referencing column.
        column: String,
        /// Referenced column.
        primary_key: String,
        /// Constraint name.
        name: String,
        /// Action on delete.
        on_delete: Option<ForeignKeyAction>,
        /// Action on update.
        on_update: Option<ForeignKeyAction>,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Validate a previously added foreign key.
    ValidateForeignKey {
        /// Referencing table.
        table: String,
        /// Constraint name.
        name: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Drop a foreign key.
    RemoveForeignKey {
        /// Referencing table.
        table: String,
        /// Constraint name.
        name: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Add a check constraint without validating existing rows.
    AddCheckConstraint {
        /// Table name.
        table: String,
        /// Boolean SQL expression.
        expression: String,
        /// Constraint name.
        name: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Validate a previously added check constraint.
    ValidateCheckConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// Drop a check constraint.
    RemoveCheckConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
        /// Extra arguments.
        extra: Arguments,
    },

    /// An operation supplied through the registry.
    Custom(CustomInstruction),
}

/// Derives the name of an index on `columns` of `table`.
#[must_use]
pub fn index_name(table: &str, columns: &[String]) -> String {
    format!("index_{}_on_{}", table, columns.join("_and_"))
}

/// Derives the referencing column for a foreign key to `to_table`.
///
/// Only regular English plurals are singularized (`users`, `categories`,
/// `addresses`, `boxes`); pass an explicit column for anything else.
#[must_use]
pub fn foreign_key_column(to_table: &str) -> String {
    format!("{}_id", singularize(to_table))
}

fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.ends_with(|c: char| !"aeiou".contains(c)) {
            return format!("{stem}y");
        }
    }
    if ["sses", "shes", "ches", "xes"].iter().any(|suffix| word.ends_with(*suffix)) {
        return word[..word.len() - 2].to_string();
    }
    if word.ends_with("ss") {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

/// Derives the name of a foreign key from `table` to `to_table`.
#[must_use]
pub fn foreign_key_name(table: &str, to_table: &str) -> String {
    format!("fk_{table}_{to_table}")
}

/// Derives the name of a check constraint from its expression.
#[must_use]
pub fn check_constraint_name(table: &str, expression: &str) -> String {
    format!("chk_{}_{}", table, Digest::of(expression).short(10))
}

impl Instruction {
    // Convenience constructors

    /// Creates a CreateTable instruction.
    #[must_use]
    pub fn create_table(table: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self::CreateTable {
            table: table.into(),
            columns,
            extra: Arguments::new(),
        }
    }

    /// Creates a DropTable instruction.
    #[must_use]
    pub fn drop_table(table: impl Into<String>) -> Self {
        Self::DropTable {
            table: table.into(),
            extra: Arguments::new(),
        }
    }

    /// Creates an AddColumn instruction.
    #[must_use]
    pub fn add_column(
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: impl Into<ColumnType>,
        options: ColumnOptions,
    ) -> Self {
        Self::AddColumn {
            table: table.into(),
            column: column.into(),
            column_type: column_type.into(),
            options,
        }
    }

    /// Creates a RemoveColumn instruction.
    #[must_use]
    pub fn remove_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::RemoveColumn {
            table: table.into(),
            column: column.into(),
            extra: Arguments::new(),
        }
    }

    /// Creates a ChangeColumn instruction.
    #[must_use]
    pub fn change_column(
        table: impl Into<String>,
        column: impl Into<String>,
        column_type: impl Into<ColumnType>,
        options: ColumnOptions,
    ) -> Self {
        Self::ChangeColumn {
            table: table.into(),
            column: column.into(),
            column_type: column_type.into(),
            options,
        }
    }

    /// Creates a RenameColumn instruction.
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            from: from.into(),
            to: to.into(),
            extra: Arguments::new(),
        }
    }

    /// Creates a ChangeColumnDefault instruction.
    #[must_use]
    pub fn change_column_default(
        table: impl Into<String>,
        column: impl Into<String>,
        default: Option<DefaultValue>,
    ) -> Self {
        Self::ChangeColumnDefault {
            table: table.into(),
            column: column.into(),
            default,
            extra: Arguments::new(),
        }
    }

    /// Creates an AddReference instruction.
    #[must_use]
    pub fn add_reference(
        table: impl Into<String>,
        reference: impl Into<String>,
        options: ReferenceOptions,
    ) -> Self {
        Self::AddReference {
            table: table.into(),
            reference: reference.into(),
            options,
        }
    }

    /// Creates a RemoveReference instruction.
    #[must_use]
    pub fn remove_reference(
        table: impl Into<String>,
        reference: impl Into<String>,
        polymorphic: bool,
    ) -> Self {
        Self::RemoveReference {
            table: table.into(),
            reference: reference.into(),
            polymorphic,
            extra: Arguments::new(),
        }
    }

    /// Creates an AddIndex instruction, deriving the name when absent.
    pub fn add_index(
        table: impl Into<String>,
        columns: impl IntoColumns,
        options: IndexOptions,
    ) -> Result<Self> {
        let table = table.into();
        let columns = columns.into_columns();
        if columns.is_empty() || columns.iter().any(|c| c.trim().is_empty()) {
            return Err(GuardError::invalid_argument(
                Tag::AddIndex.as_str(),
                "at least one non-empty column is required",
            ));
        }
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| index_name(&table, &columns));
        Ok(Self::AddIndex {
            table,
            columns,
            name,
            options,
        })
    }

    /// Creates a RemoveIndex instruction.
    #[must_use]
    pub fn remove_index(table: impl Into<String>, options: RemoveIndexOptions) -> Self {
        Self::RemoveIndex {
            table: table.into(),
            options,
        }
    }

    /// Creates an AddForeignKey instruction, deriving column and name when absent.
    #[must_use]
    pub fn add_foreign_key(
        table: impl Into<String>,
        to_table: impl Into<String>,
        options: ForeignKeyOptions,
    ) -> Self {
        let table = table.into();
        let to_table = to_table.into();
        let ForeignKeyOptions {
            column,
            primary_key,
            name,
            on_delete,
            on_update,
            extra,
        } = options;
        Self::AddForeignKey {
            column: column.unwrap_or_else(|| foreign_key_column(&to_table)),
            primary_key: primary_key.unwrap_or_else(|| "id".to_string()),
            name: name.unwrap_or_else(|| foreign_key_name(&table, &to_table)),
            table,
            to_table,
            on_delete,
            on_update,
            extra,
        }
    }

    /// Creates a ValidateForeignKey instruction.
    #[must_use]
    pub fn validate_foreign_key(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ValidateForeignKey {
            table: table.into(),
            name: name.into(),
            extra: Arguments::new(),
        }
    }

    /// Creates a RemoveForeignKey instruction.
    #[must_use]
    pub fn remove_foreign_key(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::RemoveForeignKey {
            table: table.into(),
            name: name.into(),
            extra: Arguments::new(),
        }
    }

    /// Creates an AddCheckConstraint instruction, deriving the name when absent.
    #[must_use]
    pub fn add_check_constraint(
        table: impl Into<String>,
        expression: impl Into<String>,
        name: Option<String>,
    ) -> Self {
        let table = table.into();
        let expression = expression.into();
        Self::AddCheckConstraint {
            name: name.unwrap_or_else(|| check_constraint_name(&table, &expression)),
            table,
            expression,
            extra: Arguments::new(),
        }
    }

    /// Creates a ValidateCheckConstraint instruction.
    #[must_use]
    pub fn validate_check_constraint(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ValidateCheckConstraint {
            table: table.into(),
            name: name.into(),
            extra: Arguments::new(),
        }
    }

    /// Creates a RemoveCheckConstraint instruction.
    #[must_use]
    pub fn remove_check_constraint(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::RemoveCheckConstraint {
            table: table.into(),
            name: name.into(),
            extra: Arguments::new(),
        }
    }

    /// Builds a built-in instruction from a loosely-typed argument map.
    pub fn from_call(tag: Tag, arguments: Arguments) -> Result<Self> {
        let op = tag.as_str();
        let instruction = match tag {
            Tag::CreateTable => {
                let args: CreateTableArgs = parse_args(op, arguments)?;
                Self::CreateTable {
                    table: args.table,
                    columns: args.columns,
                    extra: args.extra,
                }
            }
            Tag::DropTable => {
                let args: TableArgs = parse_args(op, arguments)?;
                Self::DropTable {
                    table: args.table,
                    extra: args.extra,
                }
            }
            Tag::AddColumn | Tag::ChangeColumn => {
                let args: ColumnArgs = parse_args(op, arguments)?;
                if tag == Tag::AddColumn {
                    Self::add_column(args.table, args.column, args.column_type, args.options)
                } else {
                    Self::change_column(args.table, args.column, args.column_type, args.options)
                }
            }
            Tag::RemoveColumn => {
                let args: RemoveColumnArgs = parse_args(op, arguments)?;
                Self::RemoveColumn {
                    table: args.table,
                    column: args.column,
                    extra: args.extra,
                }
            }
            Tag::RenameColumn => {
                let args: RenameColumnArgs = parse_args(op, arguments)?;
                Self::RenameColumn {
                    table: args.table,
                    from: args.from,
                    to: args.to,
                    extra: args.extra,
                }
            }
            Tag::ChangeColumnDefault => {
                let args: ColumnDefaultArgs = parse_args(op, arguments)?;
                Self::ChangeColumnDefault {
                    table: args.table,
                    column: args.column,
                    default: args.default,
                    extra: args.extra,
                }
            }
            Tag::AddReference => {
                let args: AddReferenceArgs = parse_args(op, arguments)?;
                Self::add_reference(args.table, args.reference, args.options)
            }
            Tag::RemoveReference => {
                let args: RemoveReferenceArgs = parse_args(op, arguments)?;
                Self::RemoveReference {
                    table: args.table,
                    reference: args.reference,
                    polymorphic: args.polymorphic,
                    extra: args.extra,
                }
            }
            Tag::AddIndex => {
                let args: AddIndexArgs = parse_args(op, arguments)?;
                Self::add_index(args.table, args.column, args.options)?
            }
            Tag::RemoveIndex => {
                let args: RemoveIndexArgs = parse_args(op, arguments)?;
                Self::remove_index(args.table, args.options)
            }
            Tag::AddForeignKey => {
                let args: AddForeignKeyArgs = parse_args(op, arguments)?;
                Self::add_foreign_key(args.table, args.to_table, args.options)
            }
            Tag::ValidateForeignKey | Tag::RemoveForeignKey => {
                let args: ForeignKeyRefArgs = parse_args(op, arguments)?;
                let name = match (args.name, args.to_table) {
                    (Some(name), _) => name,
                    (None, Some(to_table)) => foreign_key_name(&args.table, &to_table),
                    (None, None) => {
                        return Err(GuardError::invalid_argument(
                            op,
                            "either `name` or `to_table` is required",
                        ))
                    }
                };
                if tag == Tag::ValidateForeignKey {
                    Self::ValidateForeignKey {
                        table: args.table,
                        name,
                        extra: args.extra,
                    }
                } else {
                    Self::RemoveForeignKey {
                        table: args.table,
                        name,
                        extra: args.extra,
                    }
                }
            }
            Tag::AddCheckConstraint => {
                let args: AddCheckArgs = parse_args(op, arguments)?;
                let mut instruction =
                    Self::add_check_constraint(args.table, args.expression, args.name);
                if let Self::AddCheckConstraint { extra, .. } = &mut instruction {
                    *extra = args.extra;
                }
                instruction
            }
            Tag::ValidateCheckConstraint | Tag::RemoveCheckConstraint => {
                let args: NamedConstraintArgs = parse_args(op, arguments)?;
                if tag == Tag::ValidateCheckConstraint {
                    Self::ValidateCheckConstraint {
                        table: args.table,
                        name: args.name,
                        extra: args.extra,
                    }
                } else {
                    Self::RemoveCheckConstraint {
                        table: args.table,
                        name: args.name,
                        extra: args.extra,
                    }
                }
            }
        };
        Ok(instruction)
    }

    /// Returns the built-in tag, or `None` for custom instructions.
    #[must_use]
    pub fn builtin_tag(&self) -> Option<Tag> {
        let tag = match self {
            Self::CreateTable { .. } => Tag::CreateTable,
            Self::DropTable { .. } => Tag::DropTable,
            Self::AddColumn { .. } => Tag::AddColumn,
            Self::RemoveColumn { .. } => Tag::RemoveColumn,
            Self::ChangeColumn { .. } => Tag::ChangeColumn,
            Self::RenameColumn { .. } => Tag::RenameColumn,
            Self::ChangeColumnDefault { .. } => Tag::ChangeColumnDefault,
            Self::AddReference { .. } => Tag::AddReference,
            Self::RemoveReference { .. } => Tag::RemoveReference,
            Self::AddIndex { .. } => Tag::AddIndex,
            Self::RemoveIndex { .. } => Tag::RemoveIndex,
            Self::AddForeignKey { .. } => Tag::AddForeignKey,
            Self::ValidateForeignKey { .. } => Tag::ValidateForeignKey,
            Self::RemoveForeignKey { .. } => Tag::RemoveForeignKey,
            Self::AddCheckConstraint { .. } => Tag::AddCheckConstraint,
            Self::ValidateCheckConstraint { .. } => Tag::ValidateCheckConstraint,
            Self::RemoveCheckConstraint { .. } => Tag::RemoveCheckConstraint,
            Self::Custom(_) => return None,
        };
        Some(tag)
    }

    /// Returns the canonical operation name.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Custom(custom) => &custom.name,
            other => other.builtin_tag().map_or("custom", |tag| tag.as_str()),
        }
    }

    /// Returns the table this instruction touches.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::RemoveColumn { table, .. }
            | Self::ChangeColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::ChangeColumnDefault { table, .. }
            | Self::AddReference { table, .. }
            | Self::RemoveReference { table, .. }
            | Self::AddIndex { table, .. }
            | Self::RemoveIndex { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::ValidateForeignKey { table, .. }
            | Self::RemoveForeignKey { table, .. }
            | Self::AddCheckConstraint { table, .. }
            | Self::ValidateCheckConstraint { table, .. }
            | Self::RemoveCheckConstraint { table, .. } => Some(table),
            Self::Custom(custom) => custom.table.as_deref(),
        }
    }

    /// Returns the lock this instruction takes, if classified.
    #[must_use]
    pub fn lock_weight(&self) -> Option<LockWeight> {
        match self {
            Self::Custom(custom) => custom.lock_weight,
            other => other.builtin_tag().and_then(|tag| tag.lock_weight()),
        }
    }

    /// Returns true for concurrent index builds/drops.
    #[must_use]
    pub fn is_concurrent_index(&self) -> bool {
        self.builtin_tag().is_some_and(|tag| tag.is_concurrent_index())
    }

    /// Returns the free-form arguments that were not part of the typed shape.
    #[must_use]
    pub fn extra(&self) -> &Arguments {
        match self {
            Self::AddColumn { options, .. } | Self::ChangeColumn { options, .. } => &options.extra,
            Self::AddReference { options, .. } => &options.extra,
            Self::AddIndex { options, .. } => &options.extra,
            Self::RemoveIndex { options, .. } => &options.extra,
            Self::CreateTable { extra, .. }
            | Self::DropTable { extra, .. }
            | Self::RemoveColumn { extra, .. }
            | Self::RenameColumn { extra, .. }
            | Self::ChangeColumnDefault { extra, .. }
            | Self::RemoveReference { extra, .. }
            | Self::AddForeignKey { extra, .. }
            | Self::ValidateForeignKey { extra, .. }
            | Self::RemoveForeignKey { extra, .. }
            | Self::AddCheckConstraint { extra, .. }
            | Self::ValidateCheckConstraint { extra, .. }
            | Self::RemoveCheckConstraint { extra, .. } => extra,
            Self::Custom(custom) => &custom.arguments,
        }
    }

    /// Returns a short human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::AddColumn { table, column, .. }
            | Self::RemoveColumn { table, column, .. }
            | Self::ChangeColumn { table, column, .. }
            | Self::ChangeColumnDefault { table, column, .. } => {
                format!("{} {}.{}", self.tag(), table, column)
            }
            Self::RenameColumn { table, from, to, .. } => {
                format!("{} {}.{} -> {}", self.tag(), table, from, to)
            }
            Self::AddReference {
                table, reference, ..
            }
            | Self::RemoveReference {
                table, reference, ..
            } => format!("{} {}.{}", self.tag(), table, reference),
            Self::AddIndex { table, name, .. } => {
                format!("{} {} on {}", self.tag(), name, table)
            }
            Self::AddForeignKey { table, name, .. }
            | Self::ValidateForeignKey { table, name, .. }
            | Self::RemoveForeignKey { table, name, .. }
            | Self::AddCheckConstraint { table, name, .. }
            | Self::ValidateCheckConstraint { table, name, .. }
            | Self::RemoveCheckConstraint { table, name, .. } => {
                format!("{} {} on {}", self.tag(), name, table)
            }
            other => match other.table() {
                Some(table) => format!("{} {}", other.tag(), table),
                None => other.tag().to_string(),
            },
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

fn parse_args<T: DeserializeOwned>(operation: &str, arguments: Arguments) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(arguments))
        .map_err(|e| GuardError::invalid_argument(operation, e.to_string()))
}

#[derive(Deserialize)]
struct TableArgs {
    table: String,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct CreateTableArgs {
    table: String,
    #[serde(default)]
    columns: Vec<ColumnDefinition>,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct ColumnArgs {
    table: String,
    column: String,
    #[serde(rename = "type")]
    column_type: ColumnType,
    #[serde(flatten)]
    options: ColumnOptions,
}

#[derive(Deserialize)]
struct RemoveColumnArgs {
    table: String,
    column: String,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct RenameColumnArgs {
    table: String,
    from: String,
    to: String,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct ColumnDefaultArgs {
    table: String,
    column: String,
    #[serde(default)]
    default: Option<DefaultValue>,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct AddReferenceArgs {
    table: String,
    reference: String,
    #[serde(flatten)]
    options: ReferenceOptions,
}

#[derive(Deserialize)]
struct RemoveReferenceArgs {
    table: String,
    reference: String,
    #[serde(default)]
    polymorphic: bool,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct AddIndexArgs {
    table: String,
    #[serde(alias = "columns")]
    column: OneOrMany,
    #[serde(flatten)]
    options: IndexOptions,
}

#[derive(Deserialize)]
struct RemoveIndexArgs {
    table: String,
    #[serde(flatten)]
    options: RemoveIndexOptions,
}

#[derive(Deserialize)]
struct AddForeignKeyArgs {
    table: String,
    to_table: String,
    #[serde(flatten)]
    options: ForeignKeyOptions,
}

#[derive(Deserialize)]
struct ForeignKeyRefArgs {
    table: String,
    #[serde(default)]
    to_table: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct AddCheckArgs {
    table: String,
    expression: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    extra: Arguments,
}

#[derive(Deserialize)]
struct NamedConstraintArgs {
    table: String,
    name: String,
    #[serde(flatten)]
    extra: Arguments,
}
