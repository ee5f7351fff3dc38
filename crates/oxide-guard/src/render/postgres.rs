//! PostgreSQL renderer.
//!
//! Each direction becomes one section. Transactional directions are
//! wrapped in `BEGIN`/`COMMIT` with `SET LOCAL` timeouts; directions
//! holding a concurrent index operation use session timeouts instead and
//! reset them afterwards.

use std::fmt::Write as _;

use crate::error::{GuardError, Result};
use crate::instruction::{index_name, IntoColumns, Instruction};
use crate::instruction_set::Direction;
use crate::schema::{ColumnDefinition, ColumnType, DefaultValue};
use crate::validation::timeout::{EffectiveTimeouts, Timeout};
use crate::validation::ValidatedMigration;

use super::Renderer;

/// Renders migrations as PostgreSQL scripts.
#[derive(Debug, Clone, Default)]
pub struct PostgresRenderer;

impl PostgresRenderer {
    /// Creates a new PostgreSQL renderer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn quote(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn timeout_literal(timeout: Timeout) -> String {
        match timeout {
            Timeout::Disabled => "'0'".to_string(),
            limit => format!("'{limit}'"),
        }
    }

    fn column_type_sql(column_type: &ColumnType) -> String {
        column_type.postgres_name()
    }

    fn column_definition(column: &ColumnDefinition) -> String {
        let mut parts = vec![
            Self::quote(&column.name),
            Self::column_type_sql(&column.column_type),
        ];
        if column.primary_key {
            parts.push("PRIMARY KEY".to_string());
        } else if !column.null {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default.to_sql()));
        }
        parts.join(" ")
    }

    fn add_column_clause(
        column: &str,
        column_type: &ColumnType,
        null: bool,
        default: Option<&DefaultValue>,
    ) -> String {
        let mut sql = format!(
            "ADD COLUMN {} {}",
            Self::quote(column),
            Self::column_type_sql(column_type)
        );
        if !null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = default {
            let _ = write!(sql, " DEFAULT {}", default.to_sql());
        }
        sql
    }

    fn statements(instruction: &Instruction) -> Result<Vec<String>> {
        let sql = match instruction {
            Instruction::CreateTable { table, columns, .. } => {
                let definitions: Vec<String> =
                    columns.iter().map(Self::column_definition).collect();
                format!(
                    "CREATE TABLE {} (\n  {}\n)",
                    Self::quote(table),
                    definitions.join(",\n  ")
                )
            }
            Instruction::DropTable { table, .. } => format!("DROP TABLE {}", Self::quote(table)),
            Instruction::AddColumn {
                table,
                column,
                column_type,
                options,
            } => format!(
                "ALTER TABLE {} {}",
                Self::quote(table),
                Self::add_column_clause(column, column_type, options.null, options.default.as_ref())
            ),
            Instruction::RemoveColumn { table, column, .. } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                Self::quote(table),
                Self::quote(column)
            ),
            Instruction::ChangeColumn {
                table,
                column,
                column_type,
                options,
            } => {
                let column = Self::quote(column);
                let mut actions = vec![format!(
                    "ALTER COLUMN {column} TYPE {}",
                    Self::column_type_sql(column_type)
                )];
                actions.push(if options.null {
                    format!("ALTER COLUMN {column} DROP NOT NULL")
                } else {
                    format!("ALTER COLUMN {column} SET NOT NULL")
                });
                if let Some(default) = &options.default {
                    actions.push(format!(
                        "ALTER COLUMN {column} SET DEFAULT {}",
                        default.to_sql()
                    ));
                }
                format!("ALTER TABLE {} {}", Self::quote(table), actions.join(", "))
            }
            Instruction::RenameColumn {
                table, from, to, ..
            } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                Self::quote(table),
                Self::quote(from),
                Self::quote(to)
            ),
            Instruction::ChangeColumnDefault {
                table,
                column,
                default,
                ..
            } => {
                let action = match default {
                    Some(default) => format!("SET DEFAULT {}", default.to_sql()),
                    None => "DROP DEFAULT".to_string(),
                };
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} {}",
                    Self::quote(table),
                    Self::quote(column),
                    action
                )
            }
            Instruction::AddReference {
                table,
                reference,
                options,
            } => {
                let mut clauses = vec![Self::add_column_clause(
                    &format!("{reference}_id"),
                    &options.column_type,
                    options.null,
                    None,
                )];
                if options.polymorphic {
                    clauses.push(Self::add_column_clause(
                        &format!("{reference}_type"),
                        &ColumnType::String(None),
                        options.null,
                        None,
                    ));
                }
                format!("ALTER TABLE {} {}", Self::quote(table), clauses.join(", "))
            }
            Instruction::RemoveReference {
                table,
                reference,
                polymorphic,
                ..
            } => {
                let mut clauses = vec![format!(
                    "DROP COLUMN {}",
                    Self::quote(&format!("{reference}_id"))
                )];
                if *polymorphic {
                    clauses.push(format!(
                        "DROP COLUMN {}",
                        Self::quote(&format!("{reference}_type"))
                    ));
                }
                format!("ALTER TABLE {} {}", Self::quote(table), clauses.join(", "))
            }
            Instruction::AddIndex {
                table,
                columns,
                name,
                options,
            } => {
                let quoted: Vec<String> = columns.iter().map(|c| Self::quote(c)).collect();
                let mut sql = String::from("CREATE ");
                if options.unique {
                    sql.push_str("UNIQUE ");
                }
                let _ = write!(
                    sql,
                    "INDEX CONCURRENTLY {} ON {} USING {} ({})",
                    Self::quote(name),
                    Self::quote(table),
                    options.using.as_sql(),
                    quoted.join(", ")
                );
                if let Some(condition) = &options.condition {
                    let _ = write!(sql, " WHERE {condition}");
                }
                sql
            }
            Instruction::RemoveIndex { table, options } => {
                let name = match (&options.name, &options.column) {
                    (Some(name), _) => name.clone(),
                    (None, Some(columns)) => index_name(table, &columns.clone().into_columns()),
                    (None, None) => {
                        return Err(GuardError::Render(format!(
                            "cannot identify the index to remove on '{table}'"
                        )))
                    }
                };
                format!("DROP INDEX CONCURRENTLY IF EXISTS {}", Self::quote(&name))
            }
            Instruction::AddForeignKey {
                table,
                to_table,
                column,
                primary_key,
                name,
                on_delete,
                on_update,
                ..
            } => {
                let mut sql = format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    Self::quote(table),
                    Self::quote(name),
                    Self::quote(column),
                    Self::quote(to_table),
                    Self::quote(primary_key)
                );
                if let Some(action) = on_delete {
                    let _ = write!(sql, " ON DELETE {}", action.to_sql());
                }
                if let Some(action) = on_update {
                    let _ = write!(sql, " ON UPDATE {}", action.to_sql());
                }
                sql.push_str(" NOT VALID");
                sql
            }
            Instruction::AddCheckConstraint {
                table,
                expression,
                name,
                ..
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({}) NOT VALID",
                Self::quote(table),
                Self::quote(name),
                expression
            ),
            Instruction::ValidateForeignKey { table, name, .. }
            | Instruction::ValidateCheckConstraint { table, name, .. } => format!(
                "ALTER TABLE {} VALIDATE CONSTRAINT {}",
                Self::quote(table),
                Self::quote(name)
            ),
            Instruction::RemoveForeignKey { table, name, .. }
            | Instruction::RemoveCheckConstraint { table, name, .. } => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                Self::quote(table),
                Self::quote(name)
            ),
            Instruction::Custom(custom) => return Ok(custom.statements.clone()),
        };
        Ok(vec![sql])
    }

    fn render_direction(
        &self,
        out: &mut String,
        migration: &ValidatedMigration<'_>,
        direction: Direction,
    ) -> Result<()> {
        let set = migration.instructions(direction);
        let EffectiveTimeouts { lock, statement } = migration.timeouts(direction);
        let transactional = migration.is_transactional(direction);

        let _ = writeln!(out, "-- migrate:{direction}");
        if set.is_empty() {
            out.push_str("-- no changes\n");
            return Ok(());
        }

        if transactional {
            out.push_str("BEGIN;\n");
            let _ = writeln!(out, "SET LOCAL lock_timeout = {};", Self::timeout_literal(lock));
            let _ = writeln!(
                out,
                "SET LOCAL statement_timeout = {};",
                Self::timeout_literal(statement)
            );
        } else {
            let _ = writeln!(out, "SET lock_timeout = {};", Self::timeout_literal(lock));
            let _ = writeln!(
                out,
                "SET statement_timeout = {};",
                Self::timeout_literal(statement)
            );
        }

        for instruction in set {
            for statement in Self::statements(instruction)? {
                out.push_str(statement.trim_end_matches(';'));
                out.push_str(";\n");
            }
        }

        if transactional {
            out.push_str("COMMIT;\n");
        } else {
            out.push_str("RESET lock_timeout;\nRESET statement_timeout;\n");
        }
        Ok(())
    }
}

impl Renderer for PostgresRenderer {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn render(&self, migration: &ValidatedMigration<'_>) -> Result<String> {
        let mut out = String::new();
        let _ = writeln!(out, "-- {}", migration.name());
        for capability in migration.capabilities() {
            let _ = writeln!(out, "-- requires: {capability}");
        }
        for direction in Direction::BOTH {
            out.push('\n');
            self.render_direction(&mut out, migration, direction)?;
        }
        Ok(out)
    }
}
