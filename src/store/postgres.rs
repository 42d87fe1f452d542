//! PostgreSQL store: parameterized statements from the SQL builder, executed with sqlx.

use super::{Row, Store};
use crate::config::{JoinTable, ResolvedModel, ResolvedResource};
use crate::error::{AppError, ConfigError};
use crate::query::ListQuery;
use crate::sql::{self, Catalog, PgBindValue, QueryBuf, MAX_BIND_PARAMS};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;

pub struct PgStore {
    pool: PgPool,
    catalog: Catalog,
}

impl PgStore {
    pub fn new(pool: PgPool, model: &ResolvedModel) -> Self {
        PgStore {
            pool,
            catalog: Catalog::from_model(model),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bound<'q>(q: &'q QueryBuf) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>, AppError> {
        if q.params.len() > MAX_BIND_PARAMS {
            return Err(AppError::TooManyVariables(q.params.len()));
        }
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        Ok(query)
    }

    async fn query_many(&self, q: &QueryBuf) -> Result<Vec<Row>, AppError> {
        let rows = Self::bound(q)?
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn query_optional(&self, q: &QueryBuf) -> Result<Option<Row>, AppError> {
        let row = Self::bound(q)?
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(row.as_ref().map(row_to_json))
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError> {
        let done = Self::bound(q)?
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(done.rows_affected())
    }
}

/// Integrity violations (SQLSTATE class 23) become `Constraint`; the rest stay raw.
fn map_db_error(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().map(|c| c.starts_with("23")).unwrap_or(false) {
            return AppError::Constraint(db.message().to_string());
        }
    }
    AppError::Db(e)
}

#[async_trait]
impl Store for PgStore {
    async fn fetch(&self, resource: &ResolvedResource, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        self.query_many(&sql::select_list(&self.catalog, resource, query)).await
    }

    async fn count(&self, resource: &ResolvedResource, query: &ListQuery) -> Result<u64, AppError> {
        use sqlx::Row as _;
        let q = sql::count(&self.catalog, resource, query);
        let row = Self::bound(&q)?
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        let n: i64 = row.try_get("count")?;
        Ok(n.max(0) as u64)
    }

    async fn find(&self, resource: &ResolvedResource, id: &Value) -> Result<Option<Row>, AppError> {
        self.query_optional(&sql::select_by_id(&self.catalog, resource, id)).await
    }

    async fn fetch_where_in(
        &self,
        resource: &ResolvedResource,
        column: &str,
        values: &[Value],
    ) -> Result<Vec<Row>, AppError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        self.query_many(&sql::select_by_column_in(&self.catalog, resource, column, values))
            .await
    }

    async fn insert(&self, resource: &ResolvedResource, values: &Row) -> Result<Row, AppError> {
        self.query_optional(&sql::insert(resource, values))
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        id: &Value,
        values: &Row,
    ) -> Result<Option<Row>, AppError> {
        self.query_optional(&sql::update(resource, id, values)).await
    }

    async fn delete(&self, resource: &ResolvedResource, id: &Value) -> Result<bool, AppError> {
        Ok(self.execute(&sql::delete(resource, id)).await? > 0)
    }

    async fn pivot_rows(
        &self,
        join: &JoinTable,
        owners: Option<&[Value]>,
    ) -> Result<Vec<(Value, Value)>, AppError> {
        let rows = self
            .query_many(&sql::select_pivot(&self.catalog, join, owners))
            .await?;
        Ok(rows
            .into_iter()
            .map(|mut r| {
                (
                    r.remove("owner").unwrap_or(Value::Null),
                    r.remove("related").unwrap_or(Value::Null),
                )
            })
            .collect())
    }

    async fn attach(&self, join: &JoinTable, owner: &Value, related: &Value) -> Result<(), AppError> {
        self.execute(&sql::insert_pivot(&self.catalog, join, owner, related))
            .await
            .map(|_| ())
    }

    async fn detach(
        &self,
        join: &JoinTable,
        owner: &Value,
        related: Option<&Value>,
    ) -> Result<u64, AppError> {
        self.execute(&sql::delete_pivot(&self.catalog, join, owner, related))
            .await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Row {
    use sqlx::Column;
    use sqlx::Row as _;
    let mut map = Row::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row as _;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Create the database named in `database_url` when it does not exist yet.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| ConfigError::Load(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name.replace('"', "\"\"")))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| ConfigError::Load("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_url_targets_postgres_database() {
        let (admin, name) = parse_db_name_from_url("postgres://u:p@localhost:5432/billing?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(name, "billing");
    }
}
