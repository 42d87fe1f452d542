//! JSON:API response envelope.

use crate::serializer::Document;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// Status, optional body and optional `Location` of one engine operation.
#[derive(Debug)]
pub struct JsonApiResponse<T = Document> {
    pub status: StatusCode,
    pub body: Option<T>,
    pub location: Option<String>,
}

impl<T> JsonApiResponse<T> {
    pub fn ok(body: T) -> Self {
        JsonApiResponse {
            status: StatusCode::OK,
            body: Some(body),
            location: None,
        }
    }

    pub fn created(body: T, location: String) -> Self {
        JsonApiResponse {
            status: StatusCode::CREATED,
            body: Some(body),
            location: Some(location),
        }
    }

    pub fn no_content() -> Self {
        JsonApiResponse {
            status: StatusCode::NO_CONTENT,
            body: None,
            location: None,
        }
    }
}

impl<T: Serialize> IntoResponse for JsonApiResponse<T> {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, [(header::CONTENT_TYPE, JSONAPI_MEDIA_TYPE)], Json(body)).into_response(),
            None => self.status.into_response(),
        };
        if let Some(location) = self.location.and_then(|l| l.parse().ok()) {
            response.headers_mut().insert(header::LOCATION, location);
        }
        response
    }
}
