//! In-process store with the same observable behaviour as the PostgreSQL store.

use super::{Row, Store};
use crate::config::{key_string, ColumnInfo, JoinTable, PkType, RelationKind, ResolvedModel, ResolvedResource};
use crate::error::AppError;
use crate::query::{compare_values, sort_rows, values_equal, Condition, ListQuery, Matcher, Subquery, TableRef, Window};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type TableKey = (String, String);

fn key_of(table: &TableRef) -> TableKey {
    (table.schema.clone(), table.table.clone())
}

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Default)]
struct Tables {
    tables: HashMap<TableKey, Table>,
}

impl Tables {
    fn rows(&self, table: &TableRef) -> &[Row] {
        self.tables
            .get(&key_of(table))
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    fn table_mut(&mut self, table: &TableRef) -> &mut Table {
        self.tables.entry(key_of(table)).or_default()
    }

    fn matches(&self, row: &Row, conditions: &[Condition]) -> Result<bool, AppError> {
        for condition in conditions {
            let ok = match condition {
                Condition::Match { column, matcher } => {
                    let cell = row.get(column).unwrap_or(&Value::Null);
                    match matcher {
                        Matcher::Exact(Value::Null) => cell.is_null(),
                        Matcher::Exact(v) => values_equal(cell, v),
                        Matcher::Like(pattern) => !cell.is_null() && like(pattern)?.is_match(&key_string(cell)),
                    }
                }
                Condition::In { column, subquery } => {
                    let cell = row.get(column).unwrap_or(&Value::Null);
                    let selected = self.select(subquery)?;
                    selected.iter().any(|v| values_equal(cell, v))
                }
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn select(&self, sub: &Subquery) -> Result<Vec<Value>, AppError> {
        let mut out = Vec::new();
        for row in self.rows(&sub.table) {
            if self.matches(row, &sub.conditions)? {
                out.push(row.get(&sub.select).cloned().unwrap_or(Value::Null));
            }
        }
        Ok(out)
    }

    fn filtered(&self, table: &TableRef, conditions: &[Condition]) -> Result<Vec<Row>, AppError> {
        let mut out = Vec::new();
        for row in self.rows(table) {
            if self.matches(row, conditions)? {
                out.push(row.clone());
            }
        }
        Ok(out)
    }
}

/// Translate a SQL LIKE pattern into an anchored regex.
fn like(pattern: &str) -> Result<Regex, AppError> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| AppError::InvalidRequest(format!("Invalid filter pattern: {}", e)))
}

fn not_null_violation(column: &ColumnInfo) -> AppError {
    AppError::Constraint(format!(
        "null value in column \"{}\" violates not-null constraint",
        column.name
    ))
}

/// Tables for every declared resource and join table, held behind one lock.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new(model: &ResolvedModel) -> Self {
        let mut tables = Tables::default();
        for resource in &model.resources {
            tables.table_mut(&TableRef::of(resource));
            for relation in resource.relations.values() {
                if let RelationKind::BelongsToMany { join } = &relation.kind {
                    tables.table_mut(&TableRef::join(join));
                }
            }
        }
        MemoryStore {
            tables: RwLock::new(tables),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of mutating statements executed so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, resource: &ResolvedResource, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        let mut rows = self.read().filtered(&TableRef::of(resource), &query.conditions)?;
        sort_rows(&mut rows, &query.order, &resource.pk_column);
        if let Window::Range { offset, limit } = query.window {
            rows = rows
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
        }
        if query.key_only {
            for row in rows.iter_mut() {
                row.retain(|k, _| *k == resource.pk_column);
            }
        }
        Ok(rows)
    }

    async fn count(&self, resource: &ResolvedResource, query: &ListQuery) -> Result<u64, AppError> {
        let rows = self.read().filtered(&TableRef::of(resource), &query.conditions)?;
        Ok(rows.len() as u64)
    }

    async fn find(&self, resource: &ResolvedResource, id: &Value) -> Result<Option<Row>, AppError> {
        Ok(self
            .read()
            .rows(&TableRef::of(resource))
            .iter()
            .find(|r| values_equal(r.get(&resource.pk_column).unwrap_or(&Value::Null), id))
            .cloned())
    }

    async fn fetch_where_in(
        &self,
        resource: &ResolvedResource,
        column: &str,
        values: &[Value],
    ) -> Result<Vec<Row>, AppError> {
        let mut rows: Vec<Row> = self
            .read()
            .rows(&TableRef::of(resource))
            .iter()
            .filter(|r| {
                let cell = r.get(column).unwrap_or(&Value::Null);
                values.iter().any(|v| values_equal(cell, v))
            })
            .cloned()
            .collect();
        sort_rows(&mut rows, &[], &resource.pk_column);
        Ok(rows)
    }

    async fn insert(&self, resource: &ResolvedResource, values: &Row) -> Result<Row, AppError> {
        let mut tables = self.write();
        let table = tables.table_mut(&TableRef::of(resource));
        let mut row = Row::new();
        for column in &resource.columns {
            let value = values.get(&column.name).cloned().unwrap_or(Value::Null);
            row.insert(column.name.clone(), value);
        }
        let pk = resource.pk_column.as_str();
        if row.get(pk).map(Value::is_null).unwrap_or(true) {
            let generated = match resource.pk_type {
                PkType::Int | PkType::BigInt => {
                    let max = table
                        .rows
                        .iter()
                        .filter_map(|r| r.get(pk).and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0);
                    table.next_id = table.next_id.max(max) + 1;
                    Value::from(table.next_id)
                }
                PkType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
                PkType::Text => Value::Null,
            };
            row.insert(pk.to_string(), generated);
        }
        for column in &resource.columns {
            if !column.nullable && row.get(&column.name).map(Value::is_null).unwrap_or(true) {
                return Err(not_null_violation(column));
            }
        }
        let id = row.get(pk).cloned().unwrap_or(Value::Null);
        if table
            .rows
            .iter()
            .any(|r| values_equal(r.get(pk).unwrap_or(&Value::Null), &id))
        {
            return Err(AppError::Constraint(format!(
                "duplicate key value violates unique constraint on \"{}\"",
                pk
            )));
        }
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        id: &Value,
        values: &Row,
    ) -> Result<Option<Row>, AppError> {
        let mut tables = self.write();
        let table = tables.table_mut(&TableRef::of(resource));
        let pk = resource.pk_column.as_str();
        let Some(row) = table
            .rows
            .iter_mut()
            .find(|r| values_equal(r.get(pk).unwrap_or(&Value::Null), id))
        else {
            return Ok(None);
        };
        for (name, value) in values {
            let Some(column) = resource.column(name) else { continue };
            if name == pk {
                continue;
            }
            if value.is_null() && !column.nullable {
                return Err(not_null_violation(column));
            }
            row.insert(name.clone(), value.clone());
        }
        Ok(Some(row.clone()))
    }

    async fn delete(&self, resource: &ResolvedResource, id: &Value) -> Result<bool, AppError> {
        let mut tables = self.write();
        let table = tables.table_mut(&TableRef::of(resource));
        let pk = resource.pk_column.as_str();
        let before = table.rows.len();
        table
            .rows
            .retain(|r| !values_equal(r.get(pk).unwrap_or(&Value::Null), id));
        Ok(table.rows.len() < before)
    }

    async fn pivot_rows(
        &self,
        join: &JoinTable,
        owners: Option<&[Value]>,
    ) -> Result<Vec<(Value, Value)>, AppError> {
        let tables = self.read();
        let mut pairs: Vec<(Value, Value)> = tables
            .rows(&TableRef::join(join))
            .iter()
            .map(|r| {
                (
                    r.get(&join.owner_key).cloned().unwrap_or(Value::Null),
                    r.get(&join.related_key).cloned().unwrap_or(Value::Null),
                )
            })
            .filter(|(owner, _)| owners.map(|o| o.iter().any(|v| values_equal(owner, v))).unwrap_or(true))
            .collect();
        pairs.sort_by(|a, b| compare_values(&a.0, &b.0).then_with(|| compare_values(&a.1, &b.1)));
        Ok(pairs)
    }

    async fn attach(&self, join: &JoinTable, owner: &Value, related: &Value) -> Result<(), AppError> {
        if owner.is_null() || related.is_null() {
            return Err(AppError::Constraint(format!(
                "null value in join table \"{}\"",
                join.table
            )));
        }
        let mut tables = self.write();
        let table = tables.table_mut(&TableRef::join(join));
        let exists = table.rows.iter().any(|r| {
            values_equal(r.get(&join.owner_key).unwrap_or(&Value::Null), owner)
                && values_equal(r.get(&join.related_key).unwrap_or(&Value::Null), related)
        });
        if !exists {
            let mut row = Row::new();
            row.insert(join.owner_key.clone(), owner.clone());
            row.insert(join.related_key.clone(), related.clone());
            table.rows.push(row);
        }
        Ok(())
    }

    async fn detach(
        &self,
        join: &JoinTable,
        owner: &Value,
        related: Option<&Value>,
    ) -> Result<u64, AppError> {
        let mut tables = self.write();
        let table = tables.table_mut(&TableRef::join(join));
        let before = table.rows.len();
        table.rows.retain(|r| {
            let same_owner = values_equal(r.get(&join.owner_key).unwrap_or(&Value::Null), owner);
            let same_related = related
                .map(|rel| values_equal(r.get(&join.related_key).unwrap_or(&Value::Null), rel))
                .unwrap_or(true);
            !(same_owner && same_related)
        });
        Ok((before - table.rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use crate::query::{apply_filters, related_scope};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn generates_keys_and_enforces_not_null() {
        let model = model();
        let store = MemoryStore::new(&model);
        let accounts = model.resource_by_type("account").unwrap();
        let a = store.insert(accounts, &row(json!({"name": "acme"}))).await.unwrap();
        let b = store.insert(accounts, &row(json!({"name": "globex"}))).await.unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
        let err = store.insert(accounts, &row(json!({"owner_id": 1}))).await.unwrap_err();
        assert!(matches!(err, AppError::Constraint(_)));
    }

    #[tokio::test]
    async fn semi_join_filter_through_join_table() {
        let model = model();
        let store = MemoryStore::new(&model);
        let accounts = model.resource_by_type("account").unwrap();
        let tags = model.resource_by_type("tag").unwrap();
        let acme = store.insert(accounts, &row(json!({"name": "acme"}))).await.unwrap();
        store.insert(accounts, &row(json!({"name": "globex"}))).await.unwrap();
        let vip = store.insert(tags, &row(json!({"label": "vip"}))).await.unwrap();
        let relation = accounts.relation("tags").unwrap();
        let RelationKind::BelongsToMany { join } = &relation.kind else { panic!() };
        store.attach(join, &acme["id"], &vip["id"]).await.unwrap();
        store.attach(join, &acme["id"], &vip["id"]).await.unwrap();
        assert_eq!(store.pivot_rows(join, None).await.unwrap().len(), 1);

        let mut filters = BTreeMap::new();
        filters.insert("tags.label".to_string(), "v%".to_string());
        let mut query = ListQuery::all();
        apply_filters(&model, accounts, &filters, &mut query).unwrap();
        let rows = store.fetch(accounts, &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("acme"));

        let scoped = store
            .fetch(tags, &related_scope(relation, tags, &acme["id"]))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
    }
}
