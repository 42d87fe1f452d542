//! Row <-> attribute translation for one resource.

use crate::config::ResolvedResource;
use crate::error::AppError;
use crate::store::Row;
use serde_json::{Map, Value};

/// Public attributes of a stored row: key and hidden columns dropped, names mapped.
pub fn dump(resource: &ResolvedResource, row: &Row) -> Map<String, Value> {
    row.iter()
        .filter(|(column, _)| {
            column.as_str() != resource.pk_column && !resource.hidden.contains(column.as_str())
        })
        .map(|(column, value)| (resource.attribute_for_column(column).to_string(), value.clone()))
        .collect()
}

/// Column values for request attributes. `id` is never written from attributes.
pub fn parse(resource: &ResolvedResource, attributes: &Map<String, Value>) -> Result<Row, AppError> {
    let mut row = Row::new();
    for (name, value) in attributes {
        if name == "id" {
            continue;
        }
        let column = resource
            .column_for_attribute(name)
            .ok_or_else(|| AppError::InvalidRequest(format!("The {} field is not allowed here.", name)))?;
        if column.name == resource.pk_column {
            continue;
        }
        row.insert(column.name.clone(), value.clone());
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use serde_json::json;

    #[test]
    fn attribute_map_and_hidden_columns() {
        let model = resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap();
        let invoice = model.resource_by_type("invoice").unwrap();
        let row = json!({"id": 7, "number": "A-7", "account_id": 3}).as_object().cloned().unwrap();
        assert_eq!(Value::Object(dump(invoice, &row)), json!({"reference": "A-7"}));

        let attributes = json!({"reference": "A-8"}).as_object().cloned().unwrap();
        assert_eq!(Value::Object(parse(invoice, &attributes).unwrap()), json!({"number": "A-8"}));

        let hidden = json!({"account_id": 1}).as_object().cloned().unwrap();
        assert!(parse(invoice, &hidden).is_err());
    }
}
