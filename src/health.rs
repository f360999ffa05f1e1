//! Health check module
//! Liveness for the process and readiness of the order store

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::OrderStore;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness response, `{"ok": true}`
#[derive(Debug, Serialize, Clone)]
pub struct Liveness {
    pub ok: bool,
}

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the gateway's dependencies
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn OrderStore>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub fn liveness(&self) -> Liveness {
        Liveness { ok: true }
    }

    /// Readiness: the order store must answer within the timeout.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let start = Instant::now();

        let component = match timeout(STORE_CHECK_TIMEOUT, self.store.ping()).await {
            Ok(Ok(())) => {
                let elapsed = start.elapsed().as_millis();
                info!("Order store health check: OK ({}ms)", elapsed);
                ComponentHealth::up(Some(elapsed))
            }
            Ok(Err(e)) => {
                error!("Order store health check failed: {}", e);
                ComponentHealth::down(Some("order store unavailable".to_string()))
            }
            Err(_) => {
                error!("Order store health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };

        if component.status == ComponentState::Down {
            health_status.status = HealthState::Unhealthy;
        }
        health_status
            .checks
            .insert("order_store".to_string(), component);

        health_status
    }
}
