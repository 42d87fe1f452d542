//! Batch endpoint: ordered add/update/delete operations with per-operation results.

use super::Engine;
use crate::config::key_string;
use crate::error::AppError;
use crate::request::RequestContext;
use crate::response::JsonApiResponse;
use crate::serializer::Document;
use serde::Serialize;
use serde_json::Value;

const OPS: [&str; 3] = ["add", "update", "delete"];

/// Outcome of one batch operation.
#[derive(Debug, Serialize)]
pub struct OperationResult {
    pub op: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_data: Option<Value>,
}

impl OperationResult {
    fn done(op: &str, response: JsonApiResponse) -> Self {
        OperationResult {
            op: op.to_string(),
            status: response.status.as_u16(),
            data: response.body,
            title: None,
            detail: None,
            original_data: None,
        }
    }

    fn failed(op: &str, status: u16, title: &str, detail: String, operation: &Value) -> Self {
        OperationResult {
            op: op.to_string(),
            status,
            data: None,
            title: Some(title.to_string()),
            detail: Some(detail),
            original_data: Some(operation.clone()),
        }
    }
}

fn alpha_dash(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

/// Envelope checks. The first failure rejects the whole request.
fn validate_envelope(body: &Value) -> Result<&Vec<Value>, AppError> {
    let fail = |m: String| Err(AppError::Validation(m));
    let empty = match body {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if empty {
        return fail("Unable to decode body.".into());
    }
    let operations = match body.get("operations") {
        None | Some(Value::Null) => return fail("The operations field is required.".into()),
        Some(Value::Array(ops)) => ops,
        Some(_) => return fail("The operations must be an array.".into()),
    };
    for (i, operation) in operations.iter().enumerate() {
        let op = match operation.get("op") {
            None | Some(Value::Null) => return fail(format!("The operations.{}.op field is required.", i)),
            Some(Value::String(op)) if OPS.contains(&op.as_str()) => op.as_str(),
            Some(_) => return fail(format!("The selected operations.{}.op is invalid.", i)),
        };
        let data = match operation.get("data") {
            None | Some(Value::Null) => return fail(format!("The operations.{}.data field is required.", i)),
            Some(data) => data,
        };
        match data.get("type") {
            None | Some(Value::Null) => return fail(format!("The operations.{}.data.type field is required.", i)),
            Some(Value::String(_)) => {}
            Some(_) => return fail(format!("The operations.{}.data.type must be a string.", i)),
        }
        match data.get("id") {
            None | Some(Value::Null) if op != "add" => {
                return fail(format!(
                    "The operations.{}.data.id field is required when operations.{}.op is {}.",
                    i, i, op
                ))
            }
            Some(id @ (Value::String(_) | Value::Number(_))) if !alpha_dash(&key_string(id)) => {
                return fail(format!(
                    "The operations.{}.data.id may only contain letters, numbers, dashes and underscores.",
                    i
                ))
            }
            Some(Value::Bool(_) | Value::Array(_) | Value::Object(_)) => {
                return fail(format!(
                    "The operations.{}.data.id may only contain letters, numbers, dashes and underscores.",
                    i
                ))
            }
            _ => {}
        }
        match data.get("attributes") {
            None | Some(Value::Null) if op != "delete" => {
                return fail(format!(
                    "The operations.{}.data.attributes field is required when operations.{}.op is {}.",
                    i, i, op
                ))
            }
            Some(v) if !v.is_null() && !v.is_object() => {
                return fail(format!("The operations.{}.data.attributes must be an array.", i))
            }
            _ => {}
        }
    }
    Ok(operations)
}

impl<'a> Engine<'a> {
    /// `PATCH /{type}` with `{operations: [...]}`. Operations run in order; a failing
    /// operation is reported in its result and does not stop the ones after it.
    pub async fn batch(&self, body: &Value) -> Result<JsonApiResponse<Vec<OperationResult>>, AppError> {
        let operations = validate_envelope(body)?;
        tracing::debug!(resource = %self.resource.type_name, operations = operations.len(), "batch");
        let mut results = Vec::with_capacity(operations.len());
        for (i, operation) in operations.iter().enumerate() {
            results.push(self.run_operation(i, operation).await);
        }
        Ok(JsonApiResponse::ok(results))
    }

    async fn run_operation(&self, i: usize, operation: &Value) -> OperationResult {
        let op = operation.get("op").and_then(Value::as_str).unwrap_or_default();
        let ctx = RequestContext::with_body(operation.clone());
        let id = operation
            .get("data")
            .and_then(|d| d.get("id"))
            .map(key_string)
            .unwrap_or_default();
        let outcome = match op {
            "add" => self.store(&ctx).await,
            "update" => self.update(&ctx, &id).await,
            "delete" => self.destroy(&id).await,
            other => Err(AppError::InvalidRequest(format!("Unknown op {}", other))),
        };
        match outcome {
            Ok(response) => OperationResult::done(op, response),
            Err(AppError::Validation(m)) | Err(AppError::InvalidRequest(m)) => OperationResult::failed(
                op,
                422,
                "ValidationException",
                format!("The operations.{}.data.attributes: {}", i, m),
                operation,
            ),
            Err(e @ (AppError::NotFound(_) | AppError::Db(sqlx::Error::RowNotFound))) => {
                OperationResult::failed(op, 404, "Not Found Exception", e.public_detail(), operation)
            }
            Err(AppError::NotImplemented(m)) => OperationResult::failed(
                op,
                501,
                "OperationNotImplemented",
                format!("The operations.{} : {}", i, m),
                operation,
            ),
            Err(e) => {
                tracing::error!(operation = i, error = %e, "batch operation failed");
                OperationResult::failed(
                    op,
                    500,
                    "Something went wrong",
                    "Please check the log file to see the exception".into(),
                    operation,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, resolve, ResolvedModel, Settings};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&parse_config(include_str!("../../tests/fixtures/billing.json")).unwrap()).unwrap()
    }

    fn message(err: AppError) -> String {
        match err {
            AppError::Validation(m) => m,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn envelope_failures() {
        assert_eq!(message(validate_envelope(&Value::Null).unwrap_err()), "Unable to decode body.");
        assert_eq!(
            message(validate_envelope(&json!({"operations": [{"op": "merge", "data": {}}]})).unwrap_err()),
            "The selected operations.0.op is invalid."
        );
        assert_eq!(
            message(
                validate_envelope(&json!({"operations": [{"op": "delete", "data": {"type": "user"}}]})).unwrap_err()
            ),
            "The operations.0.data.id field is required when operations.0.op is delete."
        );
        assert_eq!(
            message(
                validate_envelope(&json!({"operations": [{"op": "add", "data": {"type": "user"}}]})).unwrap_err()
            ),
            "The operations.0.data.attributes field is required when operations.0.op is add."
        );
        assert_eq!(
            message(
                validate_envelope(&json!({"operations": [{"op": "delete", "data": {"type": "user", "id": "a b"}}]}))
                    .unwrap_err()
            ),
            "The operations.0.data.id may only contain letters, numbers, dashes and underscores."
        );
        assert!(validate_envelope(&json!({"operations": []})).is_ok());
    }

    #[tokio::test]
    async fn failures_are_isolated_per_operation() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings::default();
        let users = Engine::for_path(&model, &store, &settings, "users").unwrap();
        let body = json!({"operations": [
            {"op": "add", "data": {"type": "user", "attributes": {"name": "ann"}}},
            {"op": "add", "data": {"type": "user", "attributes": {"nickname": "x"}}},
            {"op": "update", "data": {"type": "user", "id": "1", "attributes": {"email": "ann@x.io"}}},
            {"op": "delete", "data": {"type": "user", "id": "42"}},
            {"op": "delete", "data": {"type": "user", "id": "1"}}
        ]});
        let response = users.batch(&body).await.unwrap();
        assert_eq!(response.status, axum::http::StatusCode::OK);
        let results = serde_json::to_value(response.body.unwrap()).unwrap();
        let statuses: Vec<u64> = results.as_array().unwrap().iter().filter_map(|r| r["status"].as_u64()).collect();
        assert_eq!(statuses, vec![201, 422, 200, 404, 204]);

        assert_eq!(results[0]["data"]["data"]["attributes"]["name"], json!("ann"));
        assert_eq!(results[1]["title"], json!("ValidationException"));
        assert_eq!(
            results[1]["detail"],
            json!("The operations.1.data.attributes: The nickname field is not allowed here.")
        );
        assert_eq!(results[1]["original_data"]["data"]["attributes"], json!({"nickname": "x"}));
        assert_eq!(results[2]["data"]["data"]["attributes"]["email"], json!("ann@x.io"));
        assert_eq!(results[3]["title"], json!("Not Found Exception"));
        assert!(results[4].get("data").is_none());
    }

    #[tokio::test]
    async fn disabled_operation_is_not_implemented() {
        let model = model();
        let store = MemoryStore::new(&model);
        let settings = Settings::default();
        let tags = Engine::for_path(&model, &store, &settings, "tags").unwrap();
        let body = json!({"operations": [{"op": "delete", "data": {"type": "tag", "id": "1"}}]});
        let results = serde_json::to_value(tags.batch(&body).await.unwrap().body.unwrap()).unwrap();
        assert_eq!(results[0]["status"], json!(501));
        assert_eq!(results[0]["title"], json!("OperationNotImplemented"));
    }
}
