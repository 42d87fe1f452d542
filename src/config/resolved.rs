//! Resolved resource registry: declarations validated and flattened for runtime use.

use crate::config::ValidationRule;
use crate::error::AppError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Primary key type for parsing path/body ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub pk_type: Option<PkType>,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), NOW()).
    pub has_default: bool,
    /// PostgreSQL type name for SQL casts (e.g. "timestamptz") when binding string values.
    pub pg_type: Option<String>,
    /// Lowercased declared type, used to coerce query-string values.
    pub type_name: String,
}

impl ColumnInfo {
    pub fn is_integer(&self) -> bool {
        let t = self.type_name.as_str();
        t.contains("int") || t.contains("serial")
    }

    pub fn is_numeric(&self) -> bool {
        let t = self.type_name.as_str();
        self.is_integer() || t.contains("numeric") || t.contains("decimal") || t.contains("real") || t.contains("double") || t.contains("float")
    }

    pub fn is_bool(&self) -> bool {
        self.type_name.starts_with("bool")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinTable {
    pub schema_name: String,
    pub table: String,
    pub owner_key: String,
    pub related_key: String,
}

/// Storage shape of a relation. Fixed at registration time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// Owner row holds `foreign_key` pointing at the target's key.
    BelongsTo { foreign_key: String },
    /// Target row holds `foreign_key` pointing at the owner's key; at most one.
    HasOne { foreign_key: String },
    HasMany { foreign_key: String },
    BelongsToMany { join: JoinTable },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

impl RelationKind {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            RelationKind::BelongsTo { .. } | RelationKind::HasOne { .. } => Cardinality::ToOne,
            RelationKind::HasMany { .. } | RelationKind::BelongsToMany { .. } => Cardinality::ToMany,
        }
    }

    /// Whether the relation can be written before the owner has an id.
    pub fn is_owner_side(&self) -> bool {
        matches!(self, RelationKind::BelongsTo { .. })
    }
}

#[derive(Clone, Debug)]
pub struct RelationDescriptor {
    pub name: String,
    /// Type name of the related resource.
    pub target: String,
    pub kind: RelationKind,
}

impl RelationDescriptor {
    pub fn cardinality(&self) -> Cardinality {
        self.kind.cardinality()
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedResource {
    pub type_name: String,
    pub path_segment: String,
    pub table_id: String,
    pub schema_name: String,
    pub table_name: String,
    pub pk_column: String,
    pub pk_type: PkType,
    pub columns: Vec<ColumnInfo>,
    pub operations: Vec<String>,
    pub hidden: HashSet<String>,
    /// API attribute -> column.
    pub attribute_map: BTreeMap<String, String>,
    pub relations: BTreeMap<String, RelationDescriptor>,
    pub default_includes: Vec<String>,
    pub include_map: BTreeMap<String, String>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ResolvedResource {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.get(name)
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.operations.iter().any(|o| o == operation)
    }

    /// Column behind a public attribute name, if it exists and is visible.
    pub fn column_for_attribute(&self, attribute: &str) -> Option<&ColumnInfo> {
        let column = self
            .attribute_map
            .get(attribute)
            .map(String::as_str)
            .unwrap_or(attribute);
        if self.hidden.contains(column) {
            return None;
        }
        self.column(column)
    }

    pub fn attribute_for_column<'a>(&'a self, column: &'a str) -> &'a str {
        self.attribute_map
            .iter()
            .find(|(_, c)| c.as_str() == column)
            .map(|(a, _)| a.as_str())
            .unwrap_or(column)
    }

    pub fn is_filterable(&self, attribute: &str) -> bool {
        self.column_for_attribute(attribute).is_some()
    }

    /// Parse a string id into the key's storage value. Malformed ids cannot match any row.
    pub fn parse_id(&self, id: &str) -> Result<Value, AppError> {
        let not_found = || AppError::NotFound(format!("{} {} not found", self.type_name, id));
        match self.pk_type {
            PkType::Int | PkType::BigInt => id.parse::<i64>().map(Value::from).map_err(|_| not_found()),
            PkType::Uuid => uuid::Uuid::parse_str(id)
                .map(|u| Value::String(u.to_string()))
                .map_err(|_| not_found()),
            PkType::Text => Ok(Value::String(id.to_string())),
        }
    }
}

/// Registry of every declared resource, keyed by type name and by path segment.
#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub resources: Vec<ResolvedResource>,
    by_type: HashMap<String, usize>,
    type_by_path: HashMap<String, usize>,
}

impl ResolvedModel {
    pub fn new(resources: Vec<ResolvedResource>) -> Self {
        let by_type = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.type_name.clone(), i))
            .collect();
        let type_by_path = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.path_segment.clone(), i))
            .collect();
        ResolvedModel {
            resources,
            by_type,
            type_by_path,
        }
    }

    pub fn resource_by_type(&self, type_name: &str) -> Option<&ResolvedResource> {
        self.by_type.get(type_name).map(|&i| &self.resources[i])
    }

    pub fn resource_by_path(&self, path: &str) -> Option<&ResolvedResource> {
        self.type_by_path.get(path).map(|&i| &self.resources[i])
    }

    pub fn target_of(&self, relation: &RelationDescriptor) -> Result<&ResolvedResource, AppError> {
        self.resource_by_type(&relation.target).ok_or_else(|| {
            AppError::InvalidRequest(format!("Unknown resource type {}", relation.target))
        })
    }
}

/// String form of a stored key, as used in resource identifiers.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
