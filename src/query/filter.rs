use super::{Condition, ListQuery, Matcher, Subquery, TableRef};
use crate::config::{ColumnInfo, RelationKind, ResolvedModel, ResolvedResource};
use crate::error::AppError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Coerce a query-string value to the column's JSON representation.
pub fn coerce_value(column: &ColumnInfo, raw: &str) -> Value {
    if column.is_integer() {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::from(n);
        }
    }
    if column.is_numeric() {
        if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    if column.is_bool() {
        match raw {
            "true" | "1" => return Value::Bool(true),
            "false" | "0" => return Value::Bool(false),
            _ => {}
        }
    }
    Value::String(raw.to_string())
}

fn matcher_for(column: &ColumnInfo, raw: &str) -> Matcher {
    if raw.contains('%') {
        Matcher::Like(raw.to_string())
    } else {
        Matcher::Exact(coerce_value(column, raw))
    }
}

/// Constrain `query` by `filter[...]` parameters.
///
/// Keys are visible attributes of `resource`, or `relation.attribute` where the
/// relation is declared on `resource`. Anything else is rejected.
pub fn apply_filters(
    model: &ResolvedModel,
    resource: &ResolvedResource,
    filters: &BTreeMap<String, String>,
    query: &mut ListQuery,
) -> Result<(), AppError> {
    let rejected = |key: &str| AppError::InvalidRequest(format!("Can not filter on attribute {}", key));

    for (key, raw) in filters.iter().filter(|(_, v)| !v.is_empty()) {
        let condition = match key.split_once('.') {
            None => {
                let column = resource.column_for_attribute(key).ok_or_else(|| rejected(key))?;
                Condition::Match {
                    column: column.name.clone(),
                    matcher: matcher_for(column, raw),
                }
            }
            Some((relation_name, attribute)) => {
                let relation = resource.relation(relation_name).ok_or_else(|| rejected(key))?;
                let target = model.target_of(relation)?;
                let column = target.column_for_attribute(attribute).ok_or_else(|| rejected(key))?;
                let inner = Condition::Match {
                    column: column.name.clone(),
                    matcher: matcher_for(column, raw),
                };
                relation_condition(resource, target, &relation.kind, inner)
            }
        };
        tracing::debug!(resource = %resource.type_name, filter = %key, "filter applied");
        query.conditions.push(condition);
    }
    Ok(())
}

/// Semi-join selecting owner rows whose related rows satisfy `inner`.
fn relation_condition(
    owner: &ResolvedResource,
    target: &ResolvedResource,
    kind: &RelationKind,
    inner: Condition,
) -> Condition {
    let target_rows = |select: &str| Subquery {
        table: TableRef::of(target),
        select: select.to_string(),
        conditions: vec![inner.clone()],
    };
    match kind {
        RelationKind::BelongsTo { foreign_key } => Condition::In {
            column: foreign_key.clone(),
            subquery: target_rows(&target.pk_column),
        },
        RelationKind::HasOne { foreign_key } | RelationKind::HasMany { foreign_key } => Condition::In {
            column: owner.pk_column.clone(),
            subquery: target_rows(foreign_key),
        },
        RelationKind::BelongsToMany { join } => Condition::In {
            column: owner.pk_column.clone(),
            subquery: Subquery {
                table: TableRef::join(join),
                select: join.owner_key.clone(),
                conditions: vec![Condition::In {
                    column: join.related_key.clone(),
                    subquery: target_rows(&target.pk_column),
                }],
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    #[test]
    fn unknown_and_hidden_attributes_are_rejected() {
        let model = model();
        let users = model.resource_by_type("user").unwrap();
        for key in ["nope", "password_hash", "ghost.name", "accounts.nope"] {
            let mut filters = BTreeMap::new();
            filters.insert(key.to_string(), "x".to_string());
            let err = apply_filters(&model, users, &filters, &mut ListQuery::all()).unwrap_err();
            assert!(matches!(err, AppError::InvalidRequest(_)), "{}", key);
        }
    }

    #[test]
    fn empty_values_are_dropped_before_validation() {
        let model = model();
        let users = model.resource_by_type("user").unwrap();
        let mut filters = BTreeMap::new();
        filters.insert("nope".to_string(), String::new());
        let mut query = ListQuery::all();
        apply_filters(&model, users, &filters, &mut query).unwrap();
        assert!(query.conditions.is_empty());
    }

    #[test]
    fn attribute_map_and_like_are_honoured() {
        let model = model();
        let invoices = model.resource_by_type("invoice").unwrap();
        let mut filters = BTreeMap::new();
        filters.insert("reference".to_string(), "INV-%".to_string());
        let mut query = ListQuery::all();
        apply_filters(&model, invoices, &filters, &mut query).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::Match {
                column: "number".into(),
                matcher: Matcher::Like("INV-%".into())
            }]
        );
    }

    #[test]
    fn relation_filter_becomes_semi_join() {
        let model = model();
        let accounts = model.resource_by_type("account").unwrap();
        let mut filters = BTreeMap::new();
        filters.insert("owner.id".to_string(), "9".to_string());
        let mut query = ListQuery::all();
        apply_filters(&model, accounts, &filters, &mut query).unwrap();
        match &query.conditions[0] {
            Condition::In { column, subquery } => {
                assert_eq!(column, "owner_id");
                assert_eq!(subquery.table.table, "users");
                assert_eq!(subquery.conditions, vec![Condition::eq("id", Value::from(9))]);
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }
}
