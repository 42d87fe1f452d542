//! HTTP handlers for JSON:API resources and relationships.

pub mod resource;
pub use resource::*;
