use mpesa_gateway::config::AppConfig;
use mpesa_gateway::database::{InMemoryOrderStore, OrderStore};
use mpesa_gateway::logging::init_tracing;
use mpesa_gateway::payments::providers::MpesaProvider;
use mpesa_gateway::{router, GatewayState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(feature = "database")]
async fn order_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    use mpesa_gateway::database::{init_pool, postgres_order_repository::PgOrderRepository};

    match &config.database {
        Some(database) => {
            let pool = init_pool(database).await?;
            info!("✅ Using PostgreSQL order store");
            Ok(Arc::new(PgOrderRepository::new(pool)))
        }
        None => {
            warn!("⚠️  DATABASE_URL not set, orders are kept in memory");
            Ok(Arc::new(InMemoryOrderStore::new()))
        }
    }
}

#[cfg(not(feature = "database"))]
async fn order_store(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderStore>> {
    if config.database.is_some() {
        warn!("⚠️  DATABASE_URL is set but the database feature is disabled");
    }
    Ok(Arc::new(InMemoryOrderStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!("🚀 Starting M-Pesa gateway");

    if config.gateway.shared_secret.is_none() {
        warn!("⚠️  GATEWAY_SHARED_SECRET not set, signed endpoints will reject every request");
    }

    let store = order_store(&config).await?;
    let provider = Arc::new(MpesaProvider::new(Arc::new(config.mpesa.clone()))?);
    let app = router(GatewayState::new(&config, store, provider));

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");

    Ok(())
}
