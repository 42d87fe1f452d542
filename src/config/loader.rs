//! Load declarations from JSON and resolve them into the runtime registry.

use crate::config::resolved::{
    Cardinality, ColumnInfo, JoinTable, PkType, RelationDescriptor, RelationKind, ResolvedModel,
    ResolvedResource,
};
use crate::config::types::*;
use crate::config::{default_schema_id, validate, FullConfig};
use crate::error::ConfigError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Build the resolved model from a full config. Validates first.
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;
    let default_sid = default_schema_id(config)?;

    let schemas_by_id: HashMap<_, _> = config.schemas.iter().map(|s| (s.id.as_str(), s)).collect();
    let tables_by_id: HashMap<_, _> = config.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let columns_by_table: HashMap<_, Vec<&ColumnConfig>> =
        config.columns.iter().fold(HashMap::new(), |mut m, c| {
            m.entry(c.table_id.as_str()).or_default().push(c);
            m
        });
    let schema_name = |sid: Option<&str>| -> Result<String, ConfigError> {
        let sid = sid.unwrap_or(default_sid);
        schemas_by_id
            .get(sid)
            .map(|s| s.name.clone())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            })
    };

    let mut resources = Vec::with_capacity(config.resources.len());
    for api in &config.resources {
        let table = tables_by_id
            .get(api.table_id.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "table",
                id: api.table_id.clone(),
            })?;
        let table_columns = columns_by_table
            .get(table.id.as_str())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let pk_col = table_columns
            .iter()
            .find(|c| c.name == table.primary_key)
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                table_id: table.id.clone(),
                column: table.primary_key.clone(),
            })?;
        let pk_type = infer_pk_type(pk_col);

        let columns = table_columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                pk_type: (c.name == table.primary_key).then_some(pk_type),
                nullable: c.nullable,
                has_default: c.default.is_some() || (c.name == table.primary_key && is_generated(c)),
                pg_type: column_pg_type_name(&c.type_),
                type_name: c.type_.name().to_lowercase(),
            })
            .collect();

        let mut relations = BTreeMap::new();
        for rel in config.relations.iter().filter(|r| r.resource == api.type_name) {
            let kind = resolve_relation_kind(rel, &schema_name, table.schema_id.as_deref())?;
            relations.insert(
                rel.name.clone(),
                RelationDescriptor {
                    name: rel.name.clone(),
                    target: rel.target.clone(),
                    kind,
                },
            );
        }

        resources.push(ResolvedResource {
            type_name: api.type_name.clone(),
            path_segment: api.path_segment.clone(),
            table_id: table.id.clone(),
            schema_name: schema_name(table.schema_id.as_deref())?,
            table_name: table.name.clone(),
            pk_column: table.primary_key.clone(),
            pk_type,
            columns,
            operations: api.operations.clone(),
            hidden: api.hidden.iter().cloned().collect(),
            attribute_map: api.attribute_map.clone(),
            relations,
            default_includes: api.default_includes.clone(),
            include_map: api.include_map.clone(),
            validation: api.validation.clone(),
        });
    }

    let model = ResolvedModel::new(resources);
    for resource in &model.resources {
        let to_many = resource
            .relations
            .values()
            .filter(|r| r.cardinality() == Cardinality::ToMany)
            .count();
        tracing::debug!(
            resource = %resource.type_name,
            path = %resource.path_segment,
            relations = resource.relations.len(),
            to_many,
            "resource registered"
        );
    }
    Ok(model)
}

fn resolve_relation_kind(
    rel: &RelationConfig,
    schema_name: &dyn Fn(Option<&str>) -> Result<String, ConfigError>,
    owner_schema: Option<&str>,
) -> Result<RelationKind, ConfigError> {
    let missing = |what: &str| ConfigError::InvalidRelation {
        resource: rel.resource.clone(),
        relation: rel.name.clone(),
        reason: format!("{} required", what),
    };
    let fk = || rel.foreign_key.clone().ok_or_else(|| missing("foreign_key"));
    Ok(match rel.kind {
        RelationKindConfig::BelongsTo => RelationKind::BelongsTo { foreign_key: fk()? },
        RelationKindConfig::HasOne => RelationKind::HasOne { foreign_key: fk()? },
        RelationKindConfig::HasMany => RelationKind::HasMany { foreign_key: fk()? },
        RelationKindConfig::BelongsToMany => {
            let join = rel.join_table.as_ref().ok_or_else(|| missing("join_table"))?;
            RelationKind::BelongsToMany {
                join: JoinTable {
                    schema_name: schema_name(join.schema_id.as_deref().or(owner_schema))?,
                    table: join.table.clone(),
                    owner_key: join.owner_key.clone(),
                    related_key: join.related_key.clone(),
                },
            }
        }
    })
}

/// Parse a declaration document.
pub fn parse_config(json: &str) -> Result<FullConfig, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    parse_config(&raw)
}

pub(crate) fn column_pg_type_name(ty: &ColumnTypeConfig) -> Option<String> {
    let name = ty.name();
    let lower = name.to_lowercase();
    if lower == "timestamptz" || lower == "timestamp with time zone" {
        Some("timestamptz".into())
    } else if lower == "timestamp" || lower.starts_with("timestamp ") {
        Some("timestamp".into())
    } else if lower == "date" {
        Some("date".into())
    } else if lower.contains("uuid") {
        Some("uuid".into())
    } else if lower == "numeric" || lower == "decimal" {
        Some("numeric".into())
    } else if lower == "jsonb" || lower == "json" {
        Some(lower)
    } else if name.contains('.') {
        // Schema-qualified custom type; cast so text binds correctly
        Some(name.to_string())
    } else {
        None
    }
}

fn is_generated(col: &ColumnConfig) -> bool {
    let lower = col.type_.name().to_lowercase();
    lower.contains("serial")
}

fn infer_pk_type(col: &ColumnConfig) -> PkType {
    let type_lower = col.type_.name().to_lowercase();
    if type_lower.contains("uuid") {
        PkType::Uuid
    } else if type_lower.contains("bigserial") || type_lower.contains("bigint") {
        PkType::BigInt
    } else if type_lower.contains("serial") || type_lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../tests/fixtures/billing.json");

    #[test]
    fn resolves_relation_registry() {
        let model = resolve(&parse_config(FIXTURE).unwrap()).unwrap();
        let accounts = model.resource_by_type("account").unwrap();
        assert_eq!(accounts.pk_type, PkType::BigInt);
        assert_eq!(
            accounts.relation("owner").unwrap().kind,
            RelationKind::BelongsTo {
                foreign_key: "owner_id".into()
            }
        );
        assert_eq!(accounts.relation("tags").unwrap().cardinality(), Cardinality::ToMany);
        let users = model.resource_by_path("users").unwrap();
        assert!(users.hidden.contains("password_hash"));
        assert!(!users.is_filterable("password_hash"));
    }

    #[test]
    fn join_table_inherits_owner_schema() {
        let model = resolve(&parse_config(FIXTURE).unwrap()).unwrap();
        let tags = model.resource_by_type("account").unwrap().relation("tags").unwrap();
        match &tags.kind {
            RelationKind::BelongsToMany { join } => {
                assert_eq!(join.schema_name, "billing");
                assert_eq!(join.owner_key, "account_id");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
