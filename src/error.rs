//! Typed errors and their JSON:API error document mapping.

use crate::response::JSONAPI_MEDIA_TYPE;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} id '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table_id} column {column}")]
    InvalidPrimaryKey { table_id: String, column: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("duplicate resource type: {0}")]
    DuplicateType(String),
    #[error("invalid relation {resource}.{relation}: {reason}")]
    InvalidRelation {
        resource: String,
        relation: String,
        reason: String,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Malformed filter/sort target, unknown relation name, bad query parameter.
    #[error("{0}")]
    InvalidRequest(String),
    /// Missing or malformed relationship refs, rule violations, type/id mismatch.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ClientGeneratedId(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    NotImplemented(String),
    /// Integrity violation reported by the store. The message stays server side.
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("too many bind parameters: {0}")]
    TooManyVariables(usize),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ClientGeneratedId(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Constraint(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TooManyVariables(_) => StatusCode::BAD_REQUEST,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Validation(_) => "validation_error",
            AppError::ClientGeneratedId(_) => "client_generated_id",
            AppError::NotFound(_) => "not_found",
            AppError::NotImplemented(_) => "not_implemented",
            AppError::Constraint(_) => "validation_error",
            AppError::TooManyVariables(_) => "invalid_request",
            AppError::Db(sqlx::Error::RowNotFound) => "not_found",
            AppError::Db(_) => "database_error",
        }
    }

    /// Message safe to hand to a client. Store and configuration internals are replaced.
    pub fn public_detail(&self) -> String {
        match self {
            AppError::Config(_) => "The server is misconfigured.".into(),
            AppError::Constraint(_) => "The request violates a data constraint.".into(),
            AppError::Db(sqlx::Error::RowNotFound) => "Resource not found.".into(),
            AppError::Db(_) => "A database error occurred.".into(),
            other => other.to_string(),
        }
    }

    fn title(&self) -> &'static str {
        self.status().canonical_reason().unwrap_or("Error")
    }
}

#[derive(Serialize)]
pub struct ErrorDocument {
    pub errors: Vec<ErrorObject>,
}

#[derive(Serialize)]
pub struct ErrorObject {
    pub status: String,
    pub code: String,
    pub title: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ErrorDocument {
    pub fn from_error(err: &AppError) -> Self {
        ErrorDocument {
            errors: vec![ErrorObject {
                status: err.status().as_u16().to_string(),
                code: err.code().to_string(),
                title: err.title().to_string(),
                detail: err.public_detail(),
                meta: None,
            }],
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::info!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ErrorDocument::from_error(&self);
        (status, [(header::CONTENT_TYPE, JSONAPI_MEDIA_TYPE)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_statuses() {
        assert_eq!(AppError::InvalidRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(AppError::ClientGeneratedId("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Constraint("x".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn store_messages_are_not_leaked() {
        let err = AppError::Constraint("null value in column \"account_id\" violates not-null".into());
        let doc = ErrorDocument::from_error(&err);
        assert_eq!(doc.errors[0].status, "422");
        assert!(!doc.errors[0].detail.contains("account_id"));
    }
}
