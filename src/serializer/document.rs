use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

/// Resource linkage: `null`, one identifier, or a list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Linkage {
    One(Option<Identifier>),
    Many(Vec<Identifier>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RelationshipObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Map<String, Value>>,
    pub data: Linkage,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipObject>,
}

impl ResourceObject {
    pub fn identifier(&self) -> Identifier {
        Identifier {
            type_name: self.type_name.clone(),
            id: self.id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PrimaryData {
    One(Option<ResourceObject>),
    Many(Vec<ResourceObject>),
}

/// Top-level document. `included` is left out when empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Document {
    pub data: PrimaryData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Map<String, Value>>,
}

impl Document {
    /// `{"data": null}`.
    pub fn empty() -> Self {
        Document {
            data: PrimaryData::One(None),
            included: Vec::new(),
            meta: None,
            links: None,
        }
    }

    pub fn items(&self) -> Vec<&ResourceObject> {
        match &self.data {
            PrimaryData::One(item) => item.iter().collect(),
            PrimaryData::Many(items) => items.iter().collect(),
        }
    }
}
