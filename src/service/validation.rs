//! Request document checks and declared attribute rules.

use crate::config::{ResolvedResource, ValidationRule};
use crate::error::AppError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against per-attribute rules. All required fields must be present.
    pub fn validate(
        body: &Map<String, Value>,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<(), AppError> {
        let mut names: Vec<&String> = rules.keys().collect();
        names.sort();
        for name in names {
            let rule = &rules[name];
            let val = body.get(name);
            if rule.required == Some(true) && val.map(is_blank).unwrap_or(true) {
                return Err(AppError::Validation(format!("{} is required", name)));
            }
            if let Some(v) = val {
                validate_field(name, v, rule)?;
            }
        }
        Ok(())
    }

    /// Validate only the fields present in body (for PATCH). Required is not enforced for missing fields.
    pub fn validate_partial(
        body: &Map<String, Value>,
        rules: &HashMap<String, ValidationRule>,
    ) -> Result<(), AppError> {
        for (name, v) in body {
            if let Some(rule) = rules.get(name) {
                if rule.required == Some(true) && is_blank(v) {
                    return Err(AppError::Validation(format!("{} is required", name)));
                }
                validate_field(name, v, rule)?;
            }
        }
        Ok(())
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn validate_field(name: &str, v: &Value, rule: &ValidationRule) -> Result<(), AppError> {
    if v.is_null() {
        return Ok(());
    }
    if let Value::Array(items) = v {
        return items.iter().try_for_each(|item| validate_field(name, item, rule));
    }
    if let Some(format) = &rule.format {
        validate_format(name, v, format)?;
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at most {} characters",
                    name, max
                )));
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                return Err(AppError::Validation(format!(
                    "{} must be at least {} characters",
                    name, min
                )));
            }
        }
    }
    if let Some(ref pattern) = rule.pattern {
        let re = Regex::new(pattern).map_err(|_| AppError::Validation(format!("invalid pattern for {}", name)))?;
        if let Some(s) = v.as_str() {
            if !re.is_match(s) {
                return Err(AppError::Validation(format!("{} does not match required pattern", name)));
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            return Err(AppError::Validation(format!(
                "{} must be one of: {:?}",
                name,
                allowed.iter().take(5).collect::<Vec<_>>()
            )));
        }
    }
    if let Some(min) = rule.minimum {
        if let Some(n) = v.as_f64() {
            if n < min {
                return Err(AppError::Validation(format!("{} must be at least {}", name, min)));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = v.as_f64() {
            if n > max {
                return Err(AppError::Validation(format!("{} must be at most {}", name, max)));
            }
        }
    }
    Ok(())
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(name: &str, v: &Value, format: &str) -> Result<(), AppError> {
    match format.to_lowercase().as_str() {
        "email" => {
            if let Some(s) = v.as_str() {
                if !s.contains('@') || s.len() < 3 {
                    return Err(AppError::Validation(format!("{} must be a valid email", name)));
                }
            }
        }
        "uuid" => {
            if let Some(s) = v.as_str() {
                if uuid::Uuid::parse_str(s).is_err() {
                    return Err(AppError::Validation(format!("{} must be a valid UUID", name)));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn reject(message: &str) -> AppError {
    tracing::info!(detail = message, "document rejected");
    AppError::Validation(message.to_string())
}

/// `data` present, no `errors` member, and `data.type` equal to `type_name`.
pub fn require_type(body: &Value, type_name: &str) -> Result<(), AppError> {
    let data = match body.get("data") {
        Some(d) if !d.is_null() => d,
        _ => return Err(reject("The data attribute is required.")),
    };
    if body.get("errors").map(|e| !e.is_null()).unwrap_or(false) {
        return Err(reject("The members data and errors MUST NOT coexist in the same document."));
    }
    match data.get("type") {
        None | Some(Value::Null) => Err(reject("The data attribute must have a type property.")),
        Some(Value::String(t)) if t == type_name => Ok(()),
        Some(Value::String(_)) => Err(reject("The type property doesn't match the endpoint.")),
        Some(_) => Err(reject("The value of the type member MUST be a string.")),
    }
}

/// `data.id` present, a string, and equal to the id in the URL.
pub fn require_id(body: &Value, id: &str) -> Result<(), AppError> {
    let data = match body.get("data") {
        Some(d) if !d.is_null() => d,
        _ => return Err(reject("The data attribute is required.")),
    };
    match data.get("id") {
        None | Some(Value::Null) => Err(reject("The data attribute must have an id property.")),
        Some(Value::String(given)) if given == id => Ok(()),
        Some(Value::String(_)) => Err(reject("The id property doesn't match the endpoint.")),
        Some(_) => Err(reject("The value of the id member MUST be a string.")),
    }
}

pub fn forbid_id(body: &Value) -> Result<(), AppError> {
    match body.get("data").and_then(|d| d.get("id")) {
        Some(id) if !id.is_null() => Err(AppError::ClientGeneratedId(
            "Client generated IDs are not allowed.".into(),
        )),
        _ => Ok(()),
    }
}

/// Every attribute must have a declared rule.
pub fn pre_validate(resource: &ResolvedResource, attributes: &Map<String, Value>) -> Result<(), AppError> {
    match attributes.keys().find(|name| !resource.validation.contains_key(name.as_str())) {
        Some(name) => Err(AppError::InvalidRequest(format!(
            "The {} field is not allowed here.",
            name
        ))),
        None => Ok(()),
    }
}

/// Relationship linkage appended as `<relation>_id`: an id, or a list of ids.
fn with_linkage(attributes: &Map<String, Value>, relationships: &Map<String, Value>) -> Map<String, Value> {
    let mut out = attributes.clone();
    for (name, payload) in relationships {
        let id_of = |r: &Value| r.get("id").cloned().unwrap_or(Value::Null);
        let linkage = match payload.get("data") {
            None => Value::Array(Vec::new()),
            Some(Value::Null) => continue,
            Some(Value::Array(refs)) => Value::Array(refs.iter().map(id_of).collect()),
            Some(r) => id_of(r),
        };
        out.insert(format!("{}_id", name), linkage);
    }
    out
}

/// Declared rules over attributes plus relationship linkage. `partial` checks only
/// what is present; otherwise the `id` rule is dropped and `required` enforced.
pub fn validate_or_fail(
    resource: &ResolvedResource,
    attributes: &Map<String, Value>,
    relationships: &Map<String, Value>,
    partial: bool,
) -> Result<(), AppError> {
    let values = with_linkage(attributes, relationships);
    let result = if partial {
        RequestValidator::validate_partial(&values, &resource.validation)
    } else {
        let mut rules = resource.validation.clone();
        rules.remove("id");
        RequestValidator::validate(&values, &rules)
    };
    if let Err(e) = &result {
        tracing::info!(resource = %resource.type_name, error = %e, "validation failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve};
    use serde_json::json;

    fn message(result: Result<(), AppError>) -> String {
        match result {
            Err(AppError::Validation(m)) | Err(AppError::InvalidRequest(m)) => m,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn type_checks_in_order() {
        assert_eq!(message(require_type(&json!({}), "tag")), "The data attribute is required.");
        assert_eq!(
            message(require_type(&json!({"data": {"type": "tag"}, "errors": []}), "tag")),
            "The members data and errors MUST NOT coexist in the same document."
        );
        assert_eq!(
            message(require_type(&json!({"data": {}}), "tag")),
            "The data attribute must have a type property."
        );
        assert_eq!(
            message(require_type(&json!({"data": {"type": 1}}), "tag")),
            "The value of the type member MUST be a string."
        );
        assert_eq!(
            message(require_type(&json!({"data": {"type": "user"}}), "tag")),
            "The type property doesn't match the endpoint."
        );
        assert!(require_type(&json!({"data": {"type": "tag"}}), "tag").is_ok());
    }

    #[test]
    fn id_checks() {
        assert_eq!(
            message(require_id(&json!({"data": {"id": 5}}), "5")),
            "The value of the id member MUST be a string."
        );
        assert_eq!(
            message(require_id(&json!({"data": {"id": "6"}}), "5")),
            "The id property doesn't match the endpoint."
        );
        assert!(matches!(
            forbid_id(&json!({"data": {"id": "1"}})),
            Err(AppError::ClientGeneratedId(_))
        ));
    }

    #[test]
    fn attributes_without_rules_are_not_allowed() {
        let model = resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap();
        let tag = model.resource_by_type("tag").unwrap();
        let attrs = json!({"label": "x", "color": "red"}).as_object().cloned().unwrap();
        assert_eq!(message(pre_validate(tag, &attrs)), "The color field is not allowed here.");
    }

    #[test]
    fn relationship_linkage_satisfies_required_rules() {
        let model = resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap();
        let invoice = model.resource_by_type("invoice").unwrap();
        let attrs = json!({"reference": "A-1"}).as_object().cloned().unwrap();
        let none = Map::new();
        assert_eq!(
            message(validate_or_fail(invoice, &attrs, &none, false)),
            "account_id is required"
        );
        let rels = json!({"account": {"data": {"type": "account", "id": "1"}}})
            .as_object()
            .cloned()
            .unwrap();
        assert!(validate_or_fail(invoice, &attrs, &rels, false).is_ok());
        assert!(validate_or_fail(invoice, &Map::new(), &none, true).is_ok());
    }
}
