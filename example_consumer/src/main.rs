//! Example consumer: a separate Rust project that serves a JSON:API backend with jsonapi-sdk.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Without `DATABASE_URL` the declared resources are served from memory.

use jsonapi_sdk::{
    apply_migrations, ensure_database_exists, load_from_file, resolve, router, AppState, MemoryStore,
    PgStore, Settings, Store,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jsonapi_sdk=info")),
        )
        .init();

    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| concat!(env!("CARGO_MANIFEST_DIR"), "/resources.json").into());
    let config = load_from_file(&config_path)?;
    let model = resolve(&config)?;
    let settings = Settings::from_env();

    let store: Arc<dyn Store> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            ensure_database_exists(&database_url).await?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?;
            apply_migrations(&pool, &config).await?;
            Arc::new(PgStore::new(pool, &model))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, serving from memory");
            Arc::new(MemoryStore::new(&model))
        }
    };

    let app = router(AppState::new(store, model, settings));
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
