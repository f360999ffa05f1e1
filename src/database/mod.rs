pub mod error;
pub mod order_repository;
#[cfg(feature = "database")]
pub mod postgres_order_repository;

pub use order_repository::{InMemoryOrderStore, Order, OrderStore};

#[cfg(feature = "database")]
use sqlx::postgres::PgPoolOptions;
#[cfg(feature = "database")]
use sqlx::PgPool;
#[cfg(feature = "database")]
use std::time::Duration;
#[cfg(feature = "database")]
use tracing::{error as log_error, info};

#[cfg(feature = "database")]
use self::error::DatabaseError;
#[cfg(feature = "database")]
use crate::config::DatabaseConfig;

/// Initialize the database pool from application configuration
#[cfg(feature = "database")]
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
    info!(
        "Initializing database pool: max_connections={}, min_connections={}, connection_timeout={}s",
        config.max_connections, config.min_connections, config.connection_timeout
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await
        .map_err(|e| {
            log_error!("Failed to initialize database pool: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

    // Test the connection
    pool.acquire().await.map_err(|e| {
        log_error!("Failed to acquire test connection: {}", e);
        DatabaseError::from_sqlx(e)
    })?;

    info!("Database pool initialized successfully");
    Ok(pool)
}
