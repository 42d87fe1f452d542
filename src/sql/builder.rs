//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and join-table statements.

use crate::config::{JoinTable, RelationKind, ResolvedModel, ResolvedResource};
use crate::query::{Condition, ListQuery, Matcher, Subquery, TableRef, Window};
use crate::store::Row;
use serde_json::Value;
use std::collections::HashMap;

/// PostgreSQL's limit on bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65535;

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// Column casts for every declared table and join table, so bound text values compare correctly.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    casts: HashMap<(String, String, String), String>,
}

impl Catalog {
    pub fn from_model(model: &ResolvedModel) -> Self {
        let mut casts = HashMap::new();
        for resource in &model.resources {
            for c in &resource.columns {
                if let Some(t) = &c.pg_type {
                    casts.insert(
                        (resource.schema_name.clone(), resource.table_name.clone(), c.name.clone()),
                        t.clone(),
                    );
                }
            }
            for relation in resource.relations.values() {
                let RelationKind::BelongsToMany { join } = &relation.kind else { continue };
                let target = model.resource_by_type(&relation.target);
                for (key, owner) in [(&join.owner_key, Some(resource)), (&join.related_key, target)] {
                    let cast = owner
                        .and_then(|r| r.column(&r.pk_column))
                        .and_then(|c| c.pg_type.clone());
                    if let Some(t) = cast {
                        casts.insert((join.schema_name.clone(), join.table.clone(), key.clone()), t);
                    }
                }
            }
        }
        Catalog { casts }
    }

    fn cast(&self, table: &TableRef, column: &str) -> Option<&str> {
        self.casts
            .get(&(table.schema.clone(), table.table.clone(), column.to_string()))
            .map(String::as_str)
    }
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Placeholder for a value; NULL is inlined so it takes the column's type.
    fn placeholder(&mut self, v: &Value, cast: Option<&str>) -> String {
        if v.is_null() {
            return "NULL".into();
        }
        let n = self.push_param(v.clone());
        cast.map(|t| format!("${}::{}", n, t))
            .unwrap_or_else(|| format!("${}", n))
    }
}

/// SELECT list: custom types as text and numeric as float8 so rows decode to JSON scalars.
fn select_column_list(resource: &ResolvedResource) -> String {
    resource
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            match c.pg_type.as_deref().unwrap_or("") {
                t if t.contains('.') => format!("{}::text AS {}", q, q),
                "numeric" => format!("{}::float8 AS {}", q, q),
                _ => q,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_conditions(
    q: &mut QueryBuf,
    catalog: &Catalog,
    table: &TableRef,
    conditions: &[Condition],
) -> Vec<String> {
    conditions
        .iter()
        .map(|condition| match condition {
            Condition::Match { column, matcher: Matcher::Exact(Value::Null) } => {
                format!("{} IS NULL", quoted(column))
            }
            Condition::Match { column, matcher: Matcher::Exact(v) } => {
                let ph = q.placeholder(v, catalog.cast(table, column));
                format!("{} = {}", quoted(column), ph)
            }
            Condition::Match { column, matcher: Matcher::Like(pattern) } => {
                let n = q.push_param(Value::String(pattern.clone()));
                format!("{}::text LIKE ${}", quoted(column), n)
            }
            Condition::In { column, subquery } => {
                format!("{} IN ({})", quoted(column), subquery_sql(q, catalog, subquery))
            }
        })
        .collect()
}

fn subquery_sql(q: &mut QueryBuf, catalog: &Catalog, sub: &Subquery) -> String {
    let parts = push_conditions(q, catalog, &sub.table, &sub.conditions);
    format!(
        "SELECT {} FROM {}{}",
        quoted(&sub.select),
        qualified_table(&sub.table.schema, &sub.table.table),
        where_clause(&parts)
    )
}

fn where_clause(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// SELECT with conditions, ORDER BY and LIMIT/OFFSET from the query.
pub fn select_list(catalog: &Catalog, resource: &ResolvedResource, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table_ref = TableRef::of(resource);
    let parts = push_conditions(&mut q, catalog, &table_ref, &query.conditions);
    let cols = if query.key_only {
        quoted(&resource.pk_column)
    } else {
        select_column_list(resource)
    };
    let order_clause = if query.order.is_empty() {
        format!(" ORDER BY {}", quoted(&resource.pk_column))
    } else {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|o| format!("{} {}", quoted(&o.column), if o.descending { "DESC" } else { "ASC" }))
            .collect();
        format!(" ORDER BY {}", order.join(", "))
    };
    let window_clause = match query.window {
        Window::All => String::new(),
        Window::Range { offset, limit } => format!(" LIMIT {} OFFSET {}", limit, offset),
    };
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        cols,
        qualified_table(&resource.schema_name, &resource.table_name),
        where_clause(&parts),
        order_clause,
        window_clause
    );
    q
}

/// SELECT COUNT(*) with the query's conditions only.
pub fn count(catalog: &Catalog, resource: &ResolvedResource, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let parts = push_conditions(&mut q, catalog, &TableRef::of(resource), &query.conditions);
    q.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {}{}",
        qualified_table(&resource.schema_name, &resource.table_name),
        where_clause(&parts)
    );
    q
}

/// SELECT by primary key.
pub fn select_by_id(catalog: &Catalog, resource: &ResolvedResource, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id, catalog.cast(&TableRef::of(resource), &resource.pk_column));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(resource),
        qualified_table(&resource.schema_name, &resource.table_name),
        quoted(&resource.pk_column),
        ph
    );
    q
}

/// SELECT rows WHERE column IN ($1, $2, ...) ORDER BY pk. Used for batch-fetching related rows.
pub fn select_by_column_in(
    catalog: &Catalog,
    resource: &ResolvedResource,
    column_name: &str,
    values: &[Value],
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&resource.schema_name, &resource.table_name);
    let cols = select_column_list(resource);
    let table_ref = TableRef::of(resource);
    let cast = catalog.cast(&table_ref, column_name);
    let placeholders: Vec<String> = values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| q.placeholder(v, cast))
        .collect();
    if placeholders.is_empty() {
        q.sql = format!("SELECT {} FROM {} WHERE 1 = 0", cols, table);
        return q;
    }
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} IN ({}) ORDER BY {}",
        cols,
        table,
        quoted(column_name),
        placeholders.join(", "),
        quoted(&resource.pk_column)
    );
    q
}

/// INSERT: only columns present in `values`; omitted columns take their DB default.
pub fn insert(resource: &ResolvedResource, values: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&resource.schema_name, &resource.table_name);
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &resource.columns {
        let Some(val) = values.get(&c.name) else { continue };
        placeholders.push(q.placeholder(val, c.pg_type.as_deref()));
        cols.push(quoted(&c.name));
    }
    let returning = select_column_list(resource);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only declared columns present in `values`.
pub fn update(resource: &ResolvedResource, id: &Value, values: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(&resource.schema_name, &resource.table_name);
    let pk = &resource.pk_column;
    let pk_cast = resource.column(pk).and_then(|c| c.pg_type.as_deref());
    let mut sets = Vec::new();
    for (k, v) in values {
        if k == pk {
            continue;
        }
        let Some(c) = resource.column(k) else { continue };
        let rhs = q.placeholder(v, c.pg_type.as_deref());
        sets.push(format!("{} = {}", quoted(k), rhs));
    }
    let returning = select_column_list(resource);
    if sets.is_empty() {
        let ph = q.placeholder(id, pk_cast);
        q.sql = format!("SELECT {} FROM {} WHERE {} = {}", returning, table, quoted(pk), ph);
        return q;
    }
    let ph = q.placeholder(id, pk_cast);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table,
        sets.join(", "),
        quoted(pk),
        ph,
        returning
    );
    q
}

/// DELETE by id.
pub fn delete(resource: &ResolvedResource, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pk = &resource.pk_column;
    let ph = q.placeholder(id, resource.column(pk).and_then(|c| c.pg_type.as_deref()));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        qualified_table(&resource.schema_name, &resource.table_name),
        quoted(pk),
        ph
    );
    q
}

/// SELECT owner_key, related_key from a join table.
pub fn select_pivot(catalog: &Catalog, join: &JoinTable, owners: Option<&[Value]>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table_ref = TableRef::join(join);
    let mut sql = format!(
        "SELECT {} AS \"owner\", {} AS \"related\" FROM {}",
        quoted(&join.owner_key),
        quoted(&join.related_key),
        qualified_table(&join.schema_name, &join.table)
    );
    if let Some(owners) = owners {
        let cast = catalog.cast(&table_ref, &join.owner_key);
        let placeholders: Vec<String> = owners.iter().map(|v| q.placeholder(v, cast)).collect();
        if placeholders.is_empty() {
            sql.push_str(" WHERE 1 = 0");
        } else {
            sql.push_str(&format!(" WHERE {} IN ({})", quoted(&join.owner_key), placeholders.join(", ")));
        }
    }
    sql.push_str(&format!(" ORDER BY {}, {}", quoted(&join.owner_key), quoted(&join.related_key)));
    q.sql = sql;
    q
}

/// INSERT one join row; an existing pair is left alone.
pub fn insert_pivot(catalog: &Catalog, join: &JoinTable, owner: &Value, related: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table_ref = TableRef::join(join);
    let o = q.placeholder(owner, catalog.cast(&table_ref, &join.owner_key));
    let r = q.placeholder(related, catalog.cast(&table_ref, &join.related_key));
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {}) ON CONFLICT DO NOTHING",
        qualified_table(&join.schema_name, &join.table),
        quoted(&join.owner_key),
        quoted(&join.related_key),
        o,
        r
    );
    q
}

/// DELETE one join row, or every row of `owner`.
pub fn delete_pivot(
    catalog: &Catalog,
    join: &JoinTable,
    owner: &Value,
    related: Option<&Value>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table_ref = TableRef::join(join);
    let o = q.placeholder(owner, catalog.cast(&table_ref, &join.owner_key));
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        qualified_table(&join.schema_name, &join.table),
        quoted(&join.owner_key),
        o
    );
    if let Some(related) = related {
        let r = q.placeholder(related, catalog.cast(&table_ref, &join.related_key));
        sql.push_str(&format!(" AND {} = {}", quoted(&join.related_key), r));
    }
    q.sql = sql;
    q
}
