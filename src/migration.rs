//! Apply declarations to the database: DDL for schemas, tables, join tables and foreign keys.
//! Order follows PostgreSQL dependencies; every statement is safe to re-run.

use crate::config::types::*;
use crate::config::{default_schema_id, validate, FullConfig};
use crate::error::{AppError, ConfigError};
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// One DDL statement. Optional statements may fail (e.g. a constraint that already exists).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub optional: bool,
}

impl Statement {
    fn required(sql: String) -> Self {
        Statement { sql, optional: false }
    }

    fn optional(sql: String) -> Self {
        Statement { sql, optional: true }
    }
}

/// Key column type as referenced from another table: serial types become plain integers.
fn key_type(column: &ColumnConfig) -> String {
    match column.type_.name().to_lowercase().as_str() {
        "bigserial" | "serial8" => "bigint".into(),
        "serial" | "serial4" => "integer".into(),
        "smallserial" | "serial2" => "smallint".into(),
        _ => column.type_.ddl(),
    }
}

struct Lookup<'c> {
    default_sid: &'c str,
    schemas: HashMap<&'c str, &'c SchemaConfig>,
    tables: HashMap<&'c str, &'c TableConfig>,
    columns: HashMap<&'c str, Vec<&'c ColumnConfig>>,
    table_of_type: HashMap<&'c str, &'c str>,
}

impl<'c> Lookup<'c> {
    fn new(config: &'c FullConfig) -> Result<Self, ConfigError> {
        Ok(Lookup {
            default_sid: default_schema_id(config)?,
            schemas: config.schemas.iter().map(|s| (s.id.as_str(), s)).collect(),
            tables: config.tables.iter().map(|t| (t.id.as_str(), t)).collect(),
            columns: config.columns.iter().fold(HashMap::new(), |mut m, c| {
                m.entry(c.table_id.as_str()).or_default().push(c);
                m
            }),
            table_of_type: config
                .resources
                .iter()
                .map(|r| (r.type_name.as_str(), r.table_id.as_str()))
                .collect(),
        })
    }

    fn schema_name(&self, schema_id: Option<&str>) -> Result<&'c str, ConfigError> {
        let sid = schema_id.unwrap_or(self.default_sid);
        self.schemas
            .get(sid)
            .map(|s| s.name.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            })
    }

    fn qualified(&self, table: &TableConfig) -> Result<String, ConfigError> {
        Ok(format!(
            "{}.{}",
            quote(self.schema_name(table.schema_id.as_deref())?),
            quote(&table.name)
        ))
    }

    fn table_for_type(&self, type_name: &str) -> Result<&'c TableConfig, ConfigError> {
        self.table_of_type
            .get(type_name)
            .and_then(|id| self.tables.get(id))
            .copied()
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: type_name.to_string(),
            })
    }

    fn column(&self, table: &TableConfig, name: &str) -> Option<&'c ColumnConfig> {
        self.columns
            .get(table.id.as_str())
            .and_then(|cols| cols.iter().find(|c| c.name == name))
            .copied()
    }

    fn pk_type(&self, table: &TableConfig) -> Result<String, ConfigError> {
        self.column(table, &table.primary_key)
            .map(key_type)
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                table_id: table.id.clone(),
                column: table.primary_key.clone(),
            })
    }
}

fn column_def(column: &ColumnConfig) -> String {
    let mut def = format!("{} {}", quote(&column.name), column.type_.ddl());
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    match &column.default {
        Some(ColumnDefaultConfig::Literal(s)) => {
            def.push_str(&format!(" DEFAULT '{}'", s.replace('\'', "''")));
        }
        Some(ColumnDefaultConfig::Expression { expression }) => {
            def.push_str(&format!(" DEFAULT {}", expression));
        }
        None => {}
    }
    def
}

/// Every statement needed for `config`, in execution order.
pub fn plan(config: &FullConfig) -> Result<Vec<Statement>, ConfigError> {
    validate(config)?;
    let lookup = Lookup::new(config)?;
    let mut statements = Vec::new();

    for s in &config.schemas {
        statements.push(Statement::required(format!("CREATE SCHEMA IF NOT EXISTS {}", quote(&s.name))));
        if let Some(comment) = &s.comment {
            statements.push(Statement::optional(format!(
                "COMMENT ON SCHEMA {} IS '{}'",
                quote(&s.name),
                comment.replace('\'', "''")
            )));
        }
    }

    for t in &config.tables {
        let mut defs: Vec<String> = lookup
            .columns
            .get(t.id.as_str())
            .map(|cols| cols.iter().map(|c| column_def(c)).collect())
            .unwrap_or_default();
        defs.push(format!("PRIMARY KEY ({})", quote(&t.primary_key)));
        statements.push(Statement::required(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            lookup.qualified(t)?,
            defs.join(",\n  ")
        )));
    }

    // Both sides of a many-to-many usually declare the same join table.
    let mut join_tables = BTreeSet::new();
    for rel in &config.relations {
        let owner = lookup.table_for_type(&rel.resource)?;
        let target = lookup.table_for_type(&rel.target)?;
        match (rel.kind, &rel.join_table, &rel.foreign_key) {
            (RelationKindConfig::BelongsToMany, Some(join), _) => {
                let schema = lookup.schema_name(join.schema_id.as_deref().or(owner.schema_id.as_deref()))?;
                let full = format!("{}.{}", quote(schema), quote(&join.table));
                if !join_tables.insert(full.clone()) {
                    continue;
                }
                statements.push(Statement::required(format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n  {} {} NOT NULL,\n  {} {} NOT NULL,\n  PRIMARY KEY ({}, {})\n)",
                    full,
                    quote(&join.owner_key),
                    lookup.pk_type(owner)?,
                    quote(&join.related_key),
                    lookup.pk_type(target)?,
                    quote(&join.owner_key),
                    quote(&join.related_key)
                )));
                for (key, table) in [(&join.owner_key, owner), (&join.related_key, target)] {
                    statements.push(Statement::optional(format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE CASCADE",
                        full,
                        quote(&format!("fk_{}_{}", join.table, key)),
                        quote(key),
                        lookup.qualified(table)?,
                        quote(&table.primary_key)
                    )));
                }
            }
            (RelationKindConfig::BelongsTo, _, Some(fk)) => {
                statements.push(Statement::optional(format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    lookup.qualified(owner)?,
                    quote(&format!("fk_{}_{}", owner.name, fk)),
                    quote(fk),
                    lookup.qualified(target)?,
                    quote(&target.primary_key)
                )));
            }
            // has-one/has-many keys are created from the inverse belongs-to, when declared.
            _ => {}
        }
    }
    Ok(statements)
}

/// Apply `config` to the database. Validates first.
pub async fn apply_migrations(pool: &PgPool, config: &FullConfig) -> Result<(), AppError> {
    for statement in plan(config)? {
        tracing::debug!(sql = %statement.sql, "migration");
        match sqlx::query(&statement.sql).execute(pool).await {
            Ok(_) => {}
            Err(e) if statement.optional => {
                tracing::debug!(error = %e, "optional migration statement skipped");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn statements() -> Vec<Statement> {
        plan(&parse_config(include_str!("../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    #[test]
    fn tables_are_created_idempotently() {
        let statements = statements();
        assert_eq!(statements[0].sql, "CREATE SCHEMA IF NOT EXISTS \"billing\"");
        let invoices = statements
            .iter()
            .find(|s| s.sql.contains("\"billing\".\"invoices\" ("))
            .unwrap();
        assert!(invoices.sql.starts_with("CREATE TABLE IF NOT EXISTS"));
        assert!(invoices.sql.contains("\"account_id\" bigint NOT NULL"));
        assert!(invoices.sql.contains("PRIMARY KEY (\"id\")"));
        assert!(!invoices.optional);
    }

    #[test]
    fn join_table_is_declared_once_with_key_types() {
        let statements = statements();
        let joins: Vec<&Statement> = statements
            .iter()
            .filter(|s| s.sql.starts_with("CREATE TABLE IF NOT EXISTS \"billing\".\"account_tag\""))
            .collect();
        assert_eq!(joins.len(), 1);
        assert!(joins[0].sql.contains("\"account_id\" bigint NOT NULL"));
        assert!(joins[0].sql.contains("\"tag_id\" bigint NOT NULL"));
    }

    #[test]
    fn foreign_keys_are_optional() {
        let statements = statements();
        let fk = statements
            .iter()
            .find(|s| s.sql.contains("fk_invoices_account_id"))
            .unwrap();
        assert!(fk.optional);
        assert!(fk.sql.contains("REFERENCES \"billing\".\"accounts\" (\"id\")"));
    }
}
