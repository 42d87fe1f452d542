//! Declaration validation: referential integrity and relation consistency.

use crate::config::{FullConfig, RelationKindConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Default schema id when tables omit schema_id.
pub fn default_schema_id(config: &FullConfig) -> Result<&str, ConfigError> {
    config
        .schemas
        .first()
        .map(|s| s.id.as_str())
        .ok_or_else(|| ConfigError::Validation("at least one schema required".into()))
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let default_sid = default_schema_id(config)?;
    let schema_ids: HashSet<&str> = config.schemas.iter().map(|s| s.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();

    let mut columns_by_table: HashMap<&str, HashSet<&str>> = HashMap::new();
    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
        columns_by_table
            .entry(c.table_id.as_str())
            .or_default()
            .insert(c.name.as_str());
    }

    for t in &config.tables {
        let sid = t.schema_id.as_deref().unwrap_or(default_sid);
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
        let has_pk = columns_by_table
            .get(t.id.as_str())
            .map(|cols| cols.contains(t.primary_key.as_str()))
            .unwrap_or(false);
        if !has_pk {
            return Err(ConfigError::InvalidPrimaryKey {
                table_id: t.id.clone(),
                column: t.primary_key.clone(),
            });
        }
    }

    let mut types = HashSet::new();
    let mut path_segments = HashSet::new();
    let mut table_of_type: HashMap<&str, &str> = HashMap::new();
    for r in &config.resources {
        if !table_ids.contains(r.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: r.table_id.clone(),
            });
        }
        if !types.insert(r.type_name.as_str()) {
            return Err(ConfigError::DuplicateType(r.type_name.clone()));
        }
        if !path_segments.insert(r.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(r.path_segment.clone()));
        }
        table_of_type.insert(r.type_name.as_str(), r.table_id.as_str());
    }

    let has_column = |table: &str, column: &str| {
        columns_by_table
            .get(table)
            .map(|cols| cols.contains(column))
            .unwrap_or(false)
    };

    let mut relation_names: HashMap<&str, HashSet<&str>> = HashMap::new();
    for rel in &config.relations {
        let invalid = |reason: &str| ConfigError::InvalidRelation {
            resource: rel.resource.clone(),
            relation: rel.name.clone(),
            reason: reason.to_string(),
        };
        let owner_table = *table_of_type
            .get(rel.resource.as_str())
            .ok_or_else(|| invalid("owner type is not declared"))?;
        let target_table = *table_of_type
            .get(rel.target.as_str())
            .ok_or_else(|| invalid("target type is not declared"))?;
        if !relation_names
            .entry(rel.resource.as_str())
            .or_default()
            .insert(rel.name.as_str())
        {
            return Err(invalid("declared twice"));
        }
        match rel.kind {
            RelationKindConfig::BelongsTo => {
                let fk = rel.foreign_key.as_deref().ok_or_else(|| invalid("foreign_key required"))?;
                if !has_column(owner_table, fk) {
                    return Err(invalid("foreign_key is not a column of the owner table"));
                }
            }
            RelationKindConfig::HasOne | RelationKindConfig::HasMany => {
                let fk = rel.foreign_key.as_deref().ok_or_else(|| invalid("foreign_key required"))?;
                if !has_column(target_table, fk) {
                    return Err(invalid("foreign_key is not a column of the target table"));
                }
            }
            RelationKindConfig::BelongsToMany => {
                let join = rel.join_table.as_ref().ok_or_else(|| invalid("join_table required"))?;
                if join.owner_key == join.related_key {
                    return Err(invalid("join_table keys must differ"));
                }
                if let Some(sid) = join.schema_id.as_deref() {
                    if !schema_ids.contains(sid) {
                        return Err(ConfigError::MissingReference {
                            kind: "schema",
                            id: sid.to_string(),
                        });
                    }
                }
            }
        }
    }

    for r in &config.resources {
        let names = relation_names.get(r.type_name.as_str());
        let known = |name: &str| names.map(|n| n.contains(name)).unwrap_or(false);
        for (include, relation) in &r.include_map {
            if !known(relation) {
                return Err(ConfigError::Validation(format!(
                    "{}: include_map {} names unknown relation {}",
                    r.type_name, include, relation
                )));
            }
        }
        for path in &r.default_includes {
            let head = path.split('.').next().unwrap_or_default();
            let head = r.include_map.get(head).map(String::as_str).unwrap_or(head);
            if !known(head) {
                return Err(ConfigError::Validation(format!(
                    "{}: default include {} names unknown relation",
                    r.type_name, path
                )));
            }
        }
        for column in r.attribute_map.values().chain(r.hidden.iter()) {
            if !has_column(r.table_id.as_str(), column) {
                return Err(ConfigError::Validation(format!(
                    "{}: unknown column {}",
                    r.type_name, column
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const FIXTURE: &str = include_str!("../../tests/fixtures/billing.json");

    #[test]
    fn fixture_is_valid() {
        let config = parse_config(FIXTURE).unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn duplicate_path_segment_is_rejected() {
        let mut config = parse_config(FIXTURE).unwrap();
        let mut dup = config.resources[0].clone();
        dup.type_name = "clone".into();
        config.resources.push(dup);
        assert!(matches!(validate(&config), Err(ConfigError::DuplicatePathSegment(_))));
    }

    #[test]
    fn belongs_to_requires_owner_column() {
        let mut config = parse_config(FIXTURE).unwrap();
        let rel = config
            .relations
            .iter_mut()
            .find(|r| r.name == "owner")
            .unwrap();
        rel.foreign_key = Some("nope".into());
        assert!(matches!(validate(&config), Err(ConfigError::InvalidRelation { .. })));
    }
}
