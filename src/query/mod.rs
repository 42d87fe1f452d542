//! Store-neutral query handle and the composer that fills it from request parameters.

mod filter;
mod paginate;
mod sort;

pub use filter::{apply_filters, coerce_value};
pub use paginate::{PageDescriptor, Pagination};
pub use sort::apply_sort;

use crate::config::{key_string, JoinTable, RelationDescriptor, RelationKind, ResolvedResource};
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq)]
pub enum Matcher {
    Exact(Value),
    /// SQL LIKE pattern (`%` wildcard).
    Like(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn of(resource: &ResolvedResource) -> Self {
        TableRef {
            schema: resource.schema_name.clone(),
            table: resource.table_name.clone(),
        }
    }

    pub fn join(join: &JoinTable) -> Self {
        TableRef {
            schema: join.schema_name.clone(),
            table: join.table.clone(),
        }
    }
}

/// `SELECT select FROM table WHERE conditions`.
#[derive(Clone, Debug, PartialEq)]
pub struct Subquery {
    pub table: TableRef,
    pub select: String,
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Match { column: String, matcher: Matcher },
    In { column: String, subquery: Subquery },
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Condition::Match {
            column: column.into(),
            matcher: Matcher::Exact(value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Window {
    #[default]
    All,
    Range { offset: u64, limit: u64 },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub conditions: Vec<Condition>,
    pub order: Vec<Order>,
    pub window: Window,
    /// Select only the primary key column.
    pub key_only: bool,
}

impl ListQuery {
    pub fn all() -> Self {
        ListQuery::default()
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Query over `relation`'s target rows that belong to `owner_key`.
///
/// `owner_key` is the owner's primary key for has-one/has-many/many-to-many and the
/// owner's foreign key value for belongs-to.
pub fn related_scope(
    relation: &RelationDescriptor,
    target: &ResolvedResource,
    owner_key: &Value,
) -> ListQuery {
    let condition = match &relation.kind {
        RelationKind::BelongsTo { .. } => Condition::eq(target.pk_column.clone(), owner_key.clone()),
        RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => {
            Condition::eq(foreign_key.clone(), owner_key.clone())
        }
        RelationKind::BelongsToMany { join } => Condition::In {
            column: target.pk_column.clone(),
            subquery: Subquery {
                table: TableRef::join(join),
                select: join.related_key.clone(),
                conditions: vec![Condition::eq(join.owner_key.clone(), owner_key.clone())],
            },
        },
    };
    ListQuery::all().filter(condition)
}

/// Loose equality: numbers by value, numbers and strings by their string form.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            key_string(a) == key_string(b)
        }
        _ => a == b,
    }
}

/// Total order used for in-memory sorting. Nulls sort first.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => key_string(a).cmp(&key_string(b)),
    }
}

/// Order rows by `order`, then by `pk` ascending.
pub fn sort_rows(rows: &mut [Map<String, Value>], order: &[Order], pk: &str) {
    rows.sort_by(|a, b| {
        let by_order = order.iter().fold(Ordering::Equal, |acc, o| {
            acc.then_with(|| {
                let ord = compare_values(
                    a.get(&o.column).unwrap_or(&Value::Null),
                    b.get(&o.column).unwrap_or(&Value::Null),
                );
                if o.descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
        });
        by_order.then_with(|| {
            compare_values(a.get(pk).unwrap_or(&Value::Null), b.get(pk).unwrap_or(&Value::Null))
        })
    });
}
