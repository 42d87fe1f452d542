use super::document::{Document, Identifier, Linkage, PrimaryData, RelationshipObject, ResourceObject};
use super::transformer;
use crate::config::ResolvedModel;
use crate::include::{Node, Related};
use crate::query::PageDescriptor;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

type Key = (String, String);

/// `included` entries in first-seen order, one per `(type, id)`.
#[derive(Default)]
struct IncludedSet {
    order: Vec<Key>,
    objects: HashMap<Key, ResourceObject>,
}

impl IncludedSet {
    /// A repeated resource keeps its first entry; relationships from later paths are merged in.
    fn insert(&mut self, object: ResourceObject) {
        let key = (object.type_name.clone(), object.id.clone());
        match self.objects.get_mut(&key) {
            Some(existing) => existing.relationships.extend(object.relationships),
            None => {
                self.order.push(key.clone());
                self.objects.insert(key, object);
            }
        }
    }

    fn into_vec(self, primary: &[Key]) -> Vec<ResourceObject> {
        let IncludedSet { order, mut objects } = self;
        order
            .into_iter()
            .filter(|key| !primary.contains(key))
            .filter_map(|key| objects.remove(&key))
            .collect()
    }
}

pub struct Serializer<'a> {
    model: &'a ResolvedModel,
    base_url: Option<&'a str>,
    identifiers_only: bool,
}

impl<'a> Serializer<'a> {
    pub fn new(model: &'a ResolvedModel, base_url: Option<&'a str>) -> Self {
        Serializer {
            model,
            base_url: base_url.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()),
            identifiers_only: false,
        }
    }

    /// Emit `{type, id}` only: no attributes, links or included resources.
    pub fn identifiers_only(mut self) -> Self {
        self.identifiers_only = true;
        self
    }

    pub fn item(&self, node: Option<&Node>) -> Document {
        let data = node.map(|n| self.resource_object(n));
        let included = self.included(node.into_iter().collect());
        Document {
            data: PrimaryData::One(data),
            included,
            meta: None,
            links: None,
        }
    }

    /// A listing with `meta.pagination`. `path` is the collection's URL path.
    pub fn collection(&self, nodes: &[Node], page: &PageDescriptor, path: &str) -> Document {
        let data: Vec<ResourceObject> = nodes.iter().map(|n| self.resource_object(n)).collect();
        let included = self.included(nodes.iter().collect());
        let mut meta = Map::new();
        meta.insert("pagination".into(), pagination_meta(page));
        Document {
            data: PrimaryData::Many(data),
            included,
            meta: Some(meta),
            links: self.base_url.map(|base| page_links(base, path, page)),
        }
    }

    fn included(&self, primary: Vec<&Node>) -> Vec<ResourceObject> {
        if self.identifiers_only {
            return Vec::new();
        }
        let mut set = IncludedSet::default();
        for node in &primary {
            self.collect(node, &mut set);
        }
        let keys: Vec<Key> = primary
            .iter()
            .map(|n| (n.type_name.clone(), n.id.clone()))
            .collect();
        set.into_vec(&keys)
    }

    fn collect(&self, node: &Node, set: &mut IncludedSet) {
        for related in node.related.values() {
            for child in related.nodes() {
                set.insert(self.resource_object(child));
                self.collect(child, set);
            }
        }
    }

    fn path_of<'b>(&'b self, type_name: &'b str) -> &'b str {
        self.model
            .resource_by_type(type_name)
            .map(|r| r.path_segment.as_str())
            .unwrap_or(type_name)
    }

    fn resource_object(&self, node: &Node) -> ResourceObject {
        if self.identifiers_only {
            return ResourceObject {
                type_name: node.type_name.clone(),
                id: node.id.clone(),
                attributes: None,
                links: None,
                meta: None,
                relationships: BTreeMap::new(),
            };
        }
        let mut attributes = self
            .model
            .resource_by_type(&node.type_name)
            .map(|r| transformer::dump(r, &node.row))
            .unwrap_or_default();
        let custom_links = attributes.remove("links");
        let meta = attributes.remove("meta");

        let item_url = self
            .base_url
            .map(|base| format!("{}/{}/{}", base, self.path_of(&node.type_name), node.id));
        // Hoisted links are only emitted alongside generated ones.
        let mut links = Map::new();
        if let Some(url) = &item_url {
            if let Some(Value::Object(custom)) = custom_links {
                links = custom;
            }
            links.insert("self".into(), Value::String(url.clone()));
        }

        let relationships = node
            .related
            .iter()
            .map(|(key, related)| {
                let links = item_url.as_ref().map(|url| {
                    let mut links = Map::new();
                    links.insert("self".into(), Value::String(format!("{}/relationships/{}", url, key)));
                    links.insert("related".into(), Value::String(format!("{}/{}", url, key)));
                    links
                });
                let data = match related {
                    Related::One(child) => Linkage::One(child.as_deref().map(identifier)),
                    Related::Many(children) => Linkage::Many(children.iter().map(identifier).collect()),
                };
                (key.clone(), RelationshipObject { links, data })
            })
            .collect();

        ResourceObject {
            type_name: node.type_name.clone(),
            id: node.id.clone(),
            attributes: Some(attributes),
            links: Some(links).filter(|l| !l.is_empty()),
            meta,
            relationships,
        }
    }
}

fn identifier(node: &Node) -> Identifier {
    Identifier {
        type_name: node.type_name.clone(),
        id: node.id.clone(),
    }
}

fn pagination_meta(page: &PageDescriptor) -> Value {
    serde_json::json!({
        "total": page.total,
        "count": page.count,
        "per_page": page.per_page,
        "current_page": page.current_page,
        "total_pages": page.total_pages,
        "has_more_pages": page.has_more_pages,
    })
}

fn page_links(base: &str, path: &str, page: &PageDescriptor) -> Map<String, Value> {
    let url = |n: u64| {
        Value::String(format!(
            "{}/{}?page[offset]={}&page[limit]={}",
            base, path, n, page.per_page
        ))
    };
    let mut links = Map::new();
    links.insert("self".into(), url(page.current_page));
    links.insert("first".into(), url(1));
    if page.current_page > 1 {
        links.insert("prev".into(), url(page.current_page - 1));
    }
    if page.current_page < page.total_pages {
        links.insert("next".into(), url(page.current_page + 1));
    }
    links.insert("last".into(), url(page.total_pages));
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn node(model: &ResolvedModel, type_name: &str, row: Value) -> Node {
        Node::new(
            model.resource_by_type(type_name).unwrap(),
            row.as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn item_hoists_links_and_meta_and_stringifies_id() {
        let model = model();
        let line = node(
            &model,
            "line",
            json!({"id": 4, "description": "x", "amount": 2.5, "invoice_id": 1,
                   "meta": {"rev": 2}, "links": {"docs": "https://docs"}}),
        );
        let doc = serde_json::to_value(Serializer::new(&model, Some("http://api/")).item(Some(&line))).unwrap();
        assert_eq!(doc["data"]["id"], json!("4"));
        assert_eq!(doc["data"]["attributes"], json!({"description": "x", "amount": 2.5}));
        assert_eq!(doc["data"]["meta"], json!({"rev": 2}));
        assert_eq!(
            doc["data"]["links"],
            json!({"docs": "https://docs", "self": "http://api/lines/4"})
        );
        assert!(doc.get("included").is_none());
    }

    #[test]
    fn hoisted_links_are_dropped_without_base_url() {
        let model = model();
        let line = node(
            &model,
            "line",
            json!({"id": 4, "description": "x", "links": {"docs": "https://docs"}}),
        );
        let doc = serde_json::to_value(Serializer::new(&model, None).item(Some(&line))).unwrap();
        assert!(doc["data"].get("links").is_none());
        assert!(doc["data"]["attributes"].get("links").is_none());
    }

    #[test]
    fn links_only_with_base_url_and_empty_attributes_are_an_object() {
        let model = model();
        let tag = node(&model, "tag", json!({"id": 1}));
        let doc = serde_json::to_value(Serializer::new(&model, None).item(Some(&tag))).unwrap();
        assert_eq!(doc, json!({"data": {"type": "tag", "id": "1", "attributes": {}}}));
    }

    #[test]
    fn included_is_deduplicated_and_relationships_merged() {
        let model = model();
        let user = node(&model, "user", json!({"id": 9, "name": "ann"}));
        let mut profile = node(&model, "profile", json!({"id": 3, "bio": "b", "user_id": 9}));
        profile.related.insert("user".into(), Related::One(Some(Box::new(user.clone()))));

        let mut reached_via_owner = node(&model, "account", json!({"id": 1, "name": "a", "owner_id": 9}));
        let mut owner_with_profile = user.clone();
        owner_with_profile
            .related
            .insert("profile".into(), Related::One(Some(Box::new(profile))));
        reached_via_owner
            .related
            .insert("owner".into(), Related::One(Some(Box::new(owner_with_profile))));

        let mut sibling = node(&model, "account", json!({"id": 2, "name": "b", "owner_id": 9}));
        let mut owner_with_accounts = user.clone();
        owner_with_accounts.related.insert(
            "accounts".into(),
            Related::Many(vec![node(&model, "account", json!({"id": 2, "name": "b", "owner_id": 9}))]),
        );
        sibling
            .related
            .insert("owner".into(), Related::One(Some(Box::new(owner_with_accounts))));

        let page = PageDescriptor {
            total: 2,
            count: 2,
            per_page: 10,
            current_page: 1,
            total_pages: 1,
            has_more_pages: false,
        };
        let doc = Serializer::new(&model, None).collection(&[reached_via_owner, sibling], &page, "accounts");

        let users: Vec<&ResourceObject> = doc.included.iter().filter(|r| r.type_name == "user").collect();
        assert_eq!(users.len(), 1);
        let keys: Vec<&str> = users[0].relationships.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["accounts", "profile"]);
        assert!(!doc.included.iter().any(|r| r.type_name == "account"));
        assert_eq!(doc.included.iter().filter(|r| r.type_name == "profile").count(), 1);
    }

    #[test]
    fn identifier_only_drops_attributes_links_and_included() {
        let model = model();
        let mut account = node(&model, "account", json!({"id": 5, "name": "a", "owner_id": 9}));
        account.related.insert(
            "owner".into(),
            Related::One(Some(Box::new(node(&model, "user", json!({"id": 9, "name": "ann"}))))),
        );
        let doc = Serializer::new(&model, Some("http://api"))
            .identifiers_only()
            .item(Some(&account));
        assert_eq!(serde_json::to_value(doc).unwrap(), json!({"data": {"type": "account", "id": "5"}}));
    }

    #[test]
    fn paged_links_include_prev_and_next() {
        let model = model();
        let page = PageDescriptor {
            total: 25,
            count: 10,
            per_page: 10,
            current_page: 2,
            total_pages: 3,
            has_more_pages: true,
        };
        let doc = Serializer::new(&model, Some("http://api")).collection(&[], &page, "tags");
        let links = doc.links.unwrap();
        assert_eq!(links["prev"], json!("http://api/tags?page[offset]=1&page[limit]=10"));
        assert_eq!(links["next"], json!("http://api/tags?page[offset]=3&page[limit]=10"));
        assert_eq!(doc.meta.unwrap()["pagination"]["total_pages"], json!(3));
    }
}
