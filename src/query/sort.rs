use super::{ListQuery, Order};
use crate::config::ResolvedResource;
use crate::error::AppError;

/// Apply a single `sort` token (`name` or `-name`), then the primary key as tie-breaker.
pub fn apply_sort(
    resource: &ResolvedResource,
    sort: Option<&str>,
    query: &mut ListQuery,
) -> Result<(), AppError> {
    if let Some(token) = sort {
        let (name, descending) = match token.strip_prefix('-') {
            Some(name) => (name, true),
            None => (token, false),
        };
        let column = resource
            .column_for_attribute(name)
            .ok_or_else(|| AppError::InvalidRequest(format!("Can not sort on attribute {}", name)))?;
        query.order.push(Order {
            column: column.name.clone(),
            descending,
        });
    }
    if !query.order.iter().any(|o| o.column == resource.pk_column) {
        query.order.push(Order {
            column: resource.pk_column.clone(),
            descending: false,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};

    #[test]
    fn descending_token_and_key_tiebreak() {
        let model =
            resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap();
        let accounts = model.resource_by_type("account").unwrap();
        let mut query = ListQuery::all();
        apply_sort(accounts, Some("-name"), &mut query).unwrap();
        assert_eq!(
            query.order,
            vec![
                Order { column: "name".into(), descending: true },
                Order { column: "id".into(), descending: false },
            ]
        );
        let err = apply_sort(accounts, Some("owner_id"), &mut ListQuery::all()).unwrap_err();
        assert_eq!(err.to_string(), "Can not sort on attribute owner_id");
    }
}
