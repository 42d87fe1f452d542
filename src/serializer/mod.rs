//! JSON:API documents built from loaded rows.

mod document;
mod jsonapi;
pub mod transformer;

pub use document::{Document, Identifier, Linkage, PrimaryData, RelationshipObject, ResourceObject};
pub use jsonapi::Serializer;
