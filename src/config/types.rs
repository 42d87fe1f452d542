//! Raw declaration types matching the JSON resource configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    #[serde(default)]
    pub schema_id: Option<String>,
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_primary_key() -> String {
    "id".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    /// DDL rendering, e.g. `varchar(255)`.
    pub fn ddl(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params: Some(p) } if !p.is_empty() => {
                let joined: Vec<String> = p.iter().map(|n| n.to_string()).collect();
                format!("{}({})", name, joined.join(", "))
            }
            ColumnTypeConfig::Parameterized { name, .. } => name.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(String),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(s) => Ok(ColumnDefaultConfig::Literal(s)),
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(serde_json::Value::String(s)) = obj.remove("value") {
                    return Ok(ColumnDefaultConfig::Literal(s));
                }
                Err(serde::de::Error::custom(
                    "column default must be a string, { \"expression\": \"...\" } or { \"value\": \"...\" }",
                ))
            }
            _ => Err(serde::de::Error::custom(
                "column default must be a string or { \"expression\": \"...\" }",
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub id: String,
    pub table_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKindConfig {
    /// Foreign key lives on the owning resource's table.
    BelongsTo,
    /// Foreign key lives on the related table; at most one row.
    HasOne,
    HasMany,
    /// Rows linked through a join table.
    BelongsToMany,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinTableConfig {
    #[serde(default)]
    pub schema_id: Option<String>,
    pub table: String,
    /// Join column pointing at the owning resource.
    pub owner_key: String,
    /// Join column pointing at the related resource.
    pub related_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Type name of the owning resource.
    pub resource: String,
    pub name: String,
    pub kind: RelationKindConfig,
    /// Type name of the related resource.
    pub target: String,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub join_table: Option<JoinTableConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// JSON:API `type` member.
    #[serde(rename = "type")]
    pub type_name: String,
    pub table_id: String,
    /// Public URL segment; may differ from the type name.
    pub path_segment: String,
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,
    /// Columns never exposed in documents (e.g. password hashes).
    #[serde(default)]
    pub hidden: Vec<String>,
    /// API attribute name -> column name.
    #[serde(default)]
    pub attribute_map: BTreeMap<String, String>,
    #[serde(default)]
    pub default_includes: Vec<String>,
    /// Include name -> relation name, for relations that collide with an attribute.
    #[serde(default)]
    pub include_map: BTreeMap<String, String>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

fn default_operations() -> Vec<String> {
    ["read", "create", "update", "delete"].iter().map(|s| s.to_string()).collect()
}

/// All declarations in one struct for in-memory or file loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FullConfig {
    pub schemas: Vec<SchemaConfig>,
    pub tables: Vec<TableConfig>,
    pub columns: Vec<ColumnConfig>,
    pub relations: Vec<RelationConfig>,
    pub resources: Vec<ResourceConfig>,
}
