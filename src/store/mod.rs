//! Storage contract used by the engine, with PostgreSQL and in-memory implementations.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::config::{JoinTable, ResolvedResource};
use crate::error::AppError;
use crate::query::ListQuery;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One stored row keyed by column name.
pub type Row = Map<String, Value>;

/// Relational store as seen by the engine. Every call is an independent statement.
#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch(&self, resource: &ResolvedResource, query: &ListQuery) -> Result<Vec<Row>, AppError>;

    /// Row count ignoring the query's window and ordering.
    async fn count(&self, resource: &ResolvedResource, query: &ListQuery) -> Result<u64, AppError>;

    async fn find(&self, resource: &ResolvedResource, id: &Value) -> Result<Option<Row>, AppError>;

    /// Bounded eager load: rows whose `column` is one of `values`.
    async fn fetch_where_in(
        &self,
        resource: &ResolvedResource,
        column: &str,
        values: &[Value],
    ) -> Result<Vec<Row>, AppError>;

    /// Insert and return the stored row, including generated keys.
    async fn insert(&self, resource: &ResolvedResource, values: &Row) -> Result<Row, AppError>;

    /// Update the given columns; `None` when no row has that id.
    async fn update(
        &self,
        resource: &ResolvedResource,
        id: &Value,
        values: &Row,
    ) -> Result<Option<Row>, AppError>;

    async fn delete(&self, resource: &ResolvedResource, id: &Value) -> Result<bool, AppError>;

    /// `(owner, related)` pairs of a join table, limited to `owners` when given.
    async fn pivot_rows(
        &self,
        join: &JoinTable,
        owners: Option<&[Value]>,
    ) -> Result<Vec<(Value, Value)>, AppError>;

    async fn attach(&self, join: &JoinTable, owner: &Value, related: &Value) -> Result<(), AppError>;

    /// Remove one join row, or all of `owner`'s rows when `related` is `None`. Returns rows removed.
    async fn detach(
        &self,
        join: &JoinTable,
        owner: &Value,
        related: Option<&Value>,
    ) -> Result<u64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}
