use super::IncludeNode;
use crate::config::{key_string, Cardinality, RelationKind, ResolvedModel, ResolvedResource};
use crate::error::AppError;
use crate::query::{apply_sort, sort_rows, values_equal, ListQuery, Order};
use crate::request::QueryParams;
use crate::store::{Row, Store};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// A loaded row and the relations eagerly loaded beneath it.
#[derive(Clone, Debug)]
pub struct Node {
    pub type_name: String,
    pub id: String,
    pub row: Row,
    /// Keyed by include name.
    pub related: BTreeMap<String, Related>,
}

#[derive(Clone, Debug)]
pub enum Related {
    One(Option<Box<Node>>),
    Many(Vec<Node>),
}

impl Related {
    pub fn nodes(&self) -> Vec<&Node> {
        match self {
            Related::One(node) => node.iter().map(|n| n.as_ref()).collect(),
            Related::Many(nodes) => nodes.iter().collect(),
        }
    }
}

impl Node {
    pub fn new(resource: &ResolvedResource, row: Row) -> Self {
        let id = key_string(row.get(&resource.pk_column).unwrap_or(&Value::Null));
        Node {
            type_name: resource.type_name.clone(),
            id,
            row,
            related: BTreeMap::new(),
        }
    }

    fn key(&self, resource: &ResolvedResource) -> Value {
        self.row.get(&resource.pk_column).cloned().unwrap_or(Value::Null)
    }
}

type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

/// Fill `nodes` with every relation in `plan`, one store round per relation and depth.
pub fn load<'a>(
    store: &'a dyn Store,
    model: &'a ResolvedModel,
    params: &'a QueryParams,
    resource: &'a ResolvedResource,
    nodes: &'a mut [Node],
    plan: &'a [IncludeNode],
) -> LoadFuture<'a> {
    Box::pin(async move {
        if nodes.is_empty() {
            return Ok(());
        }
        for include in plan {
            let target = model.target_of(&include.relation)?;
            let mut groups = related_rows(store, resource, target, include, nodes).await?;

            let order = related_order(params, target, &include.key)?;
            let limit = match include.relation.cardinality() {
                Cardinality::ToMany => params.related_limit(&include.key).filter(|n| *n >= 0),
                Cardinality::ToOne => None,
            };
            for group in groups.iter_mut() {
                if let Some(order) = &order {
                    sort_rows(group, std::slice::from_ref(order), &target.pk_column);
                }
                if let Some(limit) = limit {
                    group.truncate(limit as usize);
                }
            }

            let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
            let mut children: Vec<Node> = groups
                .into_iter()
                .flatten()
                .map(|row| Node::new(target, row))
                .collect();
            load(store, model, params, target, &mut children, &include.children).await?;

            let mut children = children.into_iter();
            for (node, size) in nodes.iter_mut().zip(sizes) {
                let group: Vec<Node> = children.by_ref().take(size).collect();
                let related = match include.relation.cardinality() {
                    Cardinality::ToOne => Related::One(group.into_iter().next().map(Box::new)),
                    Cardinality::ToMany => Related::Many(group),
                };
                node.related.insert(include.key.clone(), related);
            }
        }
        Ok(())
    })
}

fn related_order(
    params: &QueryParams,
    target: &ResolvedResource,
    key: &str,
) -> Result<Option<Order>, AppError> {
    let Some((attribute, descending)) = params.related_sort(key) else {
        return Ok(None);
    };
    let column = target
        .column_for_attribute(&attribute)
        .ok_or_else(|| AppError::InvalidRequest(format!("Can not sort on attribute {}", attribute)))?;
    Ok(Some(Order {
        column: column.name.clone(),
        descending,
    }))
}

fn distinct(values: impl Iterator<Item = Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for v in values {
        if !v.is_null() && !out.iter().any(|o| values_equal(o, &v)) {
            out.push(v);
        }
    }
    out
}

/// Whole target table, in key order. Used when a load is unconstrained.
async fn everything(store: &dyn Store, target: &ResolvedResource) -> Result<Vec<Row>, AppError> {
    let mut query = ListQuery::all();
    apply_sort(target, None, &mut query)?;
    store.fetch(target, &query).await
}

fn cell<'r>(row: &'r Row, column: &str) -> &'r Value {
    row.get(column).unwrap_or(&Value::Null)
}

/// Related rows per parent, in parent order.
async fn related_rows(
    store: &dyn Store,
    owner: &ResolvedResource,
    target: &ResolvedResource,
    include: &IncludeNode,
    nodes: &[Node],
) -> Result<Vec<Vec<Row>>, AppError> {
    tracing::debug!(
        resource = %owner.type_name,
        relation = %include.relation.name,
        constrained = include.constrained,
        parents = nodes.len(),
        "eager load"
    );
    match &include.relation.kind {
        RelationKind::BelongsTo { foreign_key } => {
            let keys = distinct(nodes.iter().map(|n| cell(&n.row, foreign_key).clone()));
            let rows = if include.constrained {
                store.fetch_where_in(target, &target.pk_column, &keys).await?
            } else {
                everything(store, target).await?
            };
            Ok(nodes
                .iter()
                .map(|n| {
                    let fk = cell(&n.row, foreign_key);
                    rows.iter()
                        .filter(|r| values_equal(cell(r, &target.pk_column), fk))
                        .take(1)
                        .cloned()
                        .collect()
                })
                .collect())
        }
        RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
            let keys = distinct(nodes.iter().map(|n| n.key(owner)));
            let rows = if include.constrained {
                store.fetch_where_in(target, foreign_key, &keys).await?
            } else {
                everything(store, target).await?
            };
            Ok(nodes
                .iter()
                .map(|n| {
                    let key = n.key(owner);
                    rows.iter()
                        .filter(|r| values_equal(cell(r, foreign_key), &key))
                        .cloned()
                        .collect()
                })
                .collect())
        }
        RelationKind::BelongsToMany { join } => {
            let keys = distinct(nodes.iter().map(|n| n.key(owner)));
            let pairs = if include.constrained {
                store.pivot_rows(join, Some(&keys)).await?
            } else {
                store.pivot_rows(join, None).await?
            };
            let rows = if include.constrained {
                let related = distinct(pairs.iter().map(|(_, related)| related.clone()));
                store.fetch_where_in(target, &target.pk_column, &related).await?
            } else {
                everything(store, target).await?
            };
            Ok(nodes
                .iter()
                .map(|n| {
                    let key = n.key(owner);
                    let linked: Vec<&Value> = pairs
                        .iter()
                        .filter(|(o, _)| values_equal(o, &key))
                        .map(|(_, r)| r)
                        .collect();
                    rows.iter()
                        .filter(|r| linked.iter().any(|l| values_equal(cell(r, &target.pk_column), l)))
                        .cloned()
                        .collect()
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use crate::include::plan;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    async fn seed(model: &ResolvedModel, store: &MemoryStore) {
        let account = model.resource_by_type("account").unwrap();
        let invoice = model.resource_by_type("invoice").unwrap();
        let line = model.resource_by_type("line").unwrap();
        store.insert(account, &row(json!({"name": "acme"}))).await.unwrap();
        store.insert(invoice, &row(json!({"number": "A-1", "account_id": 1}))).await.unwrap();
        for (description, amount) in [("a", 5.0), ("b", 50.0), ("c", 20.0)] {
            store
                .insert(line, &row(json!({"description": description, "amount": amount, "invoice_id": 1})))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn nested_includes_are_attached_per_parent() {
        let model = model();
        let store = MemoryStore::new(&model);
        seed(&model, &store).await;
        let account = model.resource_by_type("account").unwrap();
        let rows = store.fetch(account, &ListQuery::all()).await.unwrap();
        let mut nodes: Vec<Node> = rows.into_iter().map(|r| Node::new(account, r)).collect();
        let tree = plan(&model, account, &["invoices.lines".to_string()], false).unwrap();
        let params = QueryParams::default();
        load(&store, &model, &params, account, &mut nodes, &tree).await.unwrap();

        let Related::Many(invoices) = &nodes[0].related["invoices"] else { panic!("to-many expected") };
        assert_eq!(invoices.len(), 1);
        let Related::Many(lines) = &invoices[0].related["lines"] else { panic!("to-many expected") };
        assert_eq!(lines.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn related_limit_and_sort_apply_per_parent() {
        let model = model();
        let store = MemoryStore::new(&model);
        seed(&model, &store).await;
        let invoice = model.resource_by_type("invoice").unwrap();
        let rows = store.fetch(invoice, &ListQuery::all()).await.unwrap();
        let mut nodes: Vec<Node> = rows.into_iter().map(|r| Node::new(invoice, r)).collect();
        let tree = plan(&model, invoice, &["lines".to_string()], true).unwrap();
        let params = QueryParams::from_pairs(&[
            ("related[lines][limit]".to_string(), "2".to_string()),
            ("related[lines][sort]".to_string(), "-amount".to_string()),
        ]);
        load(&store, &model, &params, invoice, &mut nodes, &tree).await.unwrap();

        let Related::Many(lines) = &nodes[0].related["lines"] else { panic!("to-many expected") };
        assert_eq!(lines.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["2", "3"]);
        let Related::One(Some(account)) = &nodes[0].related["account"] else { panic!("default include expected") };
        assert_eq!(account.id, "1");
    }
}
