//! Index creation and the PostgreSQL rule objects that stand in for upserts.
//!
//! PostgreSQL has no `INSERT OR IGNORE` or `REPLACE`, so a table that needs
//! either behaviour gets a rule rewriting conflicting inserts. The rules are
//! created and dropped explicitly; every other backend returns `None` and
//! relies on the statement prefix instead.

use crate::ast::CreateTableStatement;
use crate::core::{DatabaseError, Result};
use crate::dialect::{Dialect, Unit};

impl Dialect {
    /// The statement creating the table's index, if the table declares one
    /// and the backend does not declare it inside `CREATE TABLE`.
    pub fn create_index(self, create: &CreateTableStatement, unit: &Unit) -> Result<Option<String>> {
        let columns = match create.index() {
            Some(columns) => columns,
            None => return Ok(None),
        };
        for column in columns {
            self.validate_identifier(column)?;
        }
        let columns = columns.join(", ");
        let table = self.qualify(create.table_name(), unit)?;

        let statement = match self {
            Dialect::MySql => return Ok(None),
            Dialect::Sqlite | Dialect::Embedded => {
                let index = self.object_name(&table, "index")?;
                format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", index, table, columns)
            }
            Dialect::PostgreSql => {
                let index = self.object_name(create.table_name(), "index")?;
                format!(
                    "DO $$ DECLARE counter INTEGER; BEGIN \
                     SELECT COUNT(*) INTO counter FROM pg_indexes \
                     WHERE schemaname = '{}' AND tablename = '{}' AND indexname = '{}';\
                     IF counter = 0 THEN EXECUTE 'CREATE INDEX {} ON {} ({})'; END IF; END; $$",
                    unit.name().unwrap_or("public"),
                    create.table_name(),
                    index,
                    index,
                    table,
                    columns
                )
            }
        };
        Ok(Some(statement))
    }

    /// A rule that silently drops inserts colliding on `key_columns`.
    pub fn on_insert_ignore(
        self,
        table_name: &str,
        key_columns: &[&str],
        unit: &Unit,
    ) -> Result<Option<String>> {
        if self != Dialect::PostgreSql {
            return Ok(None);
        }
        let table = self.qualify(table_name, unit)?;
        let rule = self.object_name(table_name, "on_insert_ignore")?;
        let condition = self.key_condition(&table, key_columns)?;
        Ok(Some(format!(
            "CREATE OR REPLACE RULE {} AS ON INSERT TO {} WHERE {} DO INSTEAD NOTHING",
            rule, table, condition
        )))
    }

    pub fn on_insert_not_ignore(self, table_name: &str, unit: &Unit) -> Result<Option<String>> {
        self.drop_rule(table_name, "on_insert_ignore", unit)
    }

    /// A rule that turns inserts colliding on the primary key into updates of
    /// the remaining columns.
    pub fn on_insert_update(self, create: &CreateTableStatement, unit: &Unit) -> Result<Option<String>> {
        if self != Dialect::PostgreSql {
            return Ok(None);
        }
        let keys = create.primary_key_columns();
        if keys.is_empty() {
            return Err(DatabaseError::MalformedStatement(format!(
                "table {} has no primary key to update on",
                create.table_name()
            )));
        }
        let table = self.qualify(create.table_name(), unit)?;
        let rule = self.object_name(create.table_name(), "on_insert_update")?;
        let condition = self.key_condition(&table, &keys)?;

        let assignments: Vec<String> = create
            .columns()
            .iter()
            .filter(|column| !column.is_primary_key())
            .map(|column| format!("{} = NEW.{}", column.name(), column.name()))
            .collect();
        let action = if assignments.is_empty() {
            "NOTHING".to_string()
        } else {
            format!(
                "UPDATE {} SET {} WHERE ({}) = ({})",
                table,
                assignments.join(", "),
                keys.join(", "),
                new_row(&keys)
            )
        };
        Ok(Some(format!(
            "CREATE OR REPLACE RULE {} AS ON INSERT TO {} WHERE {} DO INSTEAD {}",
            rule, table, condition, action
        )))
    }

    pub fn on_insert_not_update(self, table_name: &str, unit: &Unit) -> Result<Option<String>> {
        self.drop_rule(table_name, "on_insert_update", unit)
    }

    fn drop_rule(self, table_name: &str, suffix: &str, unit: &Unit) -> Result<Option<String>> {
        if self != Dialect::PostgreSql {
            return Ok(None);
        }
        let table = self.qualify(table_name, unit)?;
        let rule = self.object_name(table_name, suffix)?;
        Ok(Some(format!("DROP RULE IF EXISTS {} ON {}", rule, table)))
    }

    fn key_condition(self, table: &str, key_columns: &[&str]) -> Result<String> {
        if key_columns.is_empty() {
            return Err(DatabaseError::MalformedStatement(format!(
                "a rule on {} needs at least one key column",
                table
            )));
        }
        for column in key_columns {
            self.validate_identifier(column)?;
        }
        Ok(format!(
            "EXISTS(SELECT 1 FROM {} WHERE ({}) = ({}))",
            table,
            key_columns.join(", "),
            new_row(key_columns)
        ))
    }

    /// Derived object names have to respect the identifier limit as well.
    fn object_name(self, table: &str, suffix: &str) -> Result<String> {
        let name = format!("{}_{}", table, suffix);
        self.validate_identifier(&name)?;
        Ok(name)
    }
}

fn new_row(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| format!("NEW.{}", column))
        .collect::<Vec<_>>()
        .join(", ")
}
