//! Configuration loading for the infrastructure backends.
//!
//! Configuration stays explicit and environment-based: `DATABASE_URL` for
//! the Postgres store, `RUST_LOG` for log filtering (consumed by the
//! observability crate). No global config framework.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::state_store::StoreError;

const DEFAULT_POOL_SIZE: u32 = 5;

/// Connection settings for [`crate::PostgresStateStore`].
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_POOL_SIZE,
        }
    }

    /// Read `DATABASE_URL` (required) and `CHANTIER_DB_POOL_SIZE` (optional).
    pub fn from_env() -> Result<Self, StoreError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| StoreError::Backend("DATABASE_URL is not set".to_string()))?;

        let max_connections = std::env::var("CHANTIER_DB_POOL_SIZE")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        Ok(Self {
            database_url,
            max_connections,
        })
    }

    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect: {e}")))
    }
}
