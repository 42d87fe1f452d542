//! JSON:API SDK: configuration-driven JSON:API backend library.

pub mod config;
pub mod error;
pub mod handlers;
pub mod include;
pub mod migration;
pub mod query;
pub mod request;
pub mod response;
pub mod routes;
pub mod serializer;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_file, parse_config, resolve, FullConfig, ResolvedModel, ResolvedResource, Settings};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use request::{QueryParams, RequestContext};
pub use response::{JsonApiResponse, JSONAPI_MEDIA_TYPE};
pub use routes::{common_routes, resource_routes};
pub use serializer::{Document, Serializer};
pub use service::{Engine, Instance, OperationResult};
pub use state::AppState;
pub use store::{ensure_database_exists, MemoryStore, PgStore, Store};

use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body, in bytes.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Operational routes plus every declared resource, with a request body limit.
pub fn router(state: AppState) -> Router {
    common_routes(state.clone())
        .merge(resource_routes(state))
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(BODY_LIMIT)))
}
