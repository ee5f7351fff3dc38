//! Column, default and index value types used by instructions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Column data types understood by the bundled renderer.
///
/// Parsed from the short names used in migration sources (`string`,
/// `bigint`, `decimal(10, 2)`, ...). Anything unrecognized is carried
/// through verbatim as [`ColumnType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    /// Variable-length string with optional max length.
    String(Option<u32>),
    /// Unbounded text.
    Text,
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Boolean.
    Boolean,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp without time zone.
    Timestamp,
    /// Timestamp with time zone.
    TimestampTz,
    /// Decimal with optional precision and scale.
    Decimal(Option<u8>, Option<u8>),
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// JSON stored as text.
    Json,
    /// Binary JSON.
    Jsonb,
    /// UUID.
    Uuid,
    /// Binary data.
    Binary,
    /// A type name passed through unchanged.
    Custom(String),
}

impl ColumnType {
    /// Returns the PostgreSQL type name.
    #[must_use]
    pub fn postgres_name(&self) -> String {
        match self {
            Self::String(Some(len)) => format!("VARCHAR({len})"),
            Self::String(None) => "VARCHAR".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::TimestampTz => "TIMESTAMPTZ".to_string(),
            Self::Decimal(Some(p), Some(s)) => format!("DECIMAL({p}, {s})"),
            Self::Decimal(Some(p), None) => format!("DECIMAL({p})"),
            Self::Decimal(None, _) => "DECIMAL".to_string(),
            Self::Float => "REAL".to_string(),
            Self::Double => "DOUBLE PRECISION".to_string(),
            Self::Json => "JSON".to_string(),
            Self::Jsonb => "JSONB".to_string(),
            Self::Uuid => "UUID".to_string(),
            Self::Binary => "BYTEA".to_string(),
            Self::Custom(name) => name.clone(),
        }
    }
}

/// Splits `name(a, b)` into `("name", ["a", "b"])`.
fn split_parameters(s: &str) -> (&str, Vec<&str>) {
    match (s.find('('), s.strip_suffix(')')) {
        (Some(open), Some(inner)) => {
            let params = inner[open + 1..]
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            (s[..open].trim(), params)
        }
        _ => (s, Vec::new()),
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("column type must not be empty".to_string());
        }
        let lowered = trimmed.to_ascii_lowercase();
        let (name, params) = split_parameters(&lowered);
        let number = |i: usize| -> Result<Option<u32>, String> {
            params
                .get(i)
                .map(|p| {
                    p.parse::<u32>()
                        .map_err(|_| format!("invalid type parameter '{p}' in '{trimmed}'"))
                })
                .transpose()
        };

        let parsed = match name {
            "string" | "varchar" => Self::String(number(0)?),
            "text" => Self::Text,
            "smallint" => Self::SmallInt,
            "integer" | "int" => Self::Integer,
            "bigint" => Self::BigInt,
            "boolean" | "bool" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" | "timestamp" => Self::Timestamp,
            "timestamptz" => Self::TimestampTz,
            "decimal" | "numeric" => {
                let narrow = |v: Option<u32>| -> Result<Option<u8>, String> {
                    v.map(|n| {
                        u8::try_from(n).map_err(|_| format!("precision out of range in '{trimmed}'"))
                    })
                    .transpose()
                };
                Self::Decimal(narrow(number(0)?)?, narrow(number(1)?)?)
            }
            "float" | "real" => Self::Float,
            "double" => Self::Double,
            "json" => Self::Json,
            "jsonb" => Self::Jsonb,
            "uuid" => Self::Uuid,
            "binary" | "bytea" => Self::Binary,
            _ => Self::Custom(trimmed.to_string()),
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<&str> for ColumnType {
    /// Infallible conversion for the Rust DSL; unparsable names become `Custom`.
    fn from(value: &str) -> Self {
        value
            .parse()
            .unwrap_or_else(|_| Self::Custom(value.to_string()))
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(Some(len)) => write!(f, "string({len})"),
            Self::String(None) => f.write_str("string"),
            Self::Text => f.write_str("text"),
            Self::SmallInt => f.write_str("smallint"),
            Self::Integer => f.write_str("integer"),
            Self::BigInt => f.write_str("bigint"),
            Self::Boolean => f.write_str("boolean"),
            Self::Date => f.write_str("date"),
            Self::Time => f.write_str("time"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::TimestampTz => f.write_str("timestamptz"),
            Self::Decimal(Some(p), Some(s)) => write!(f, "decimal({p}, {s})"),
            Self::Decimal(Some(p), None) => write!(f, "decimal({p})"),
            Self::Decimal(None, _) => f.write_str("decimal"),
            Self::Float => f.write_str("float"),
            Self::Double => f.write_str("double"),
            Self::Json => f.write_str("json"),
            Self::Jsonb => f.write_str("jsonb"),
            Self::Uuid => f.write_str("uuid"),
            Self::Binary => f.write_str("binary"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String literal default.
    String(String),
    /// SQL expression (e.g., `now()`), written as `{ sql: "now()" }`.
    Expression {
        /// Raw SQL expression.
        sql: String,
    },
}

impl DefaultValue {
    /// Creates an expression default.
    #[must_use]
    pub fn expression(sql: impl Into<String>) -> Self {
        Self::Expression { sql: sql.into() }
    }

    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Expression { sql } => sql.clone(),
        }
    }
}

/// Index access method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// B-tree (the default).
    #[default]
    Btree,
    /// Hash index.
    Hash,
    /// Generalized inverted index.
    Gin,
    /// Generalized search tree.
    Gist,
    /// Block range index.
    Brin,
    /// Space-partitioned GiST.
    Spgist,
}

impl IndexType {
    /// Returns the access method name used in `USING`.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Btree => "btree",
            Self::Hash => "hash",
            Self::Gin => "gin",
            Self::Gist => "gist",
            Self::Brin => "brin",
            Self::Spgist => "spgist",
        }
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

fn default_true() -> bool {
    true
}

/// A column declared inside `create_table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Data type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column allows NULL values.
    #[serde(default = "default_true")]
    pub null: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// Whether this column is the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDefinition {
    /// Creates a nullable column without default.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: impl Into<ColumnType>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            null: true,
            default: None,
            primary_key: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.null = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.null = false;
        self
    }
}
