//! M-Pesa payment gateway for the storefront.
//!
//! Signed storefront endpoints initiate, poll and reverse mobile-money
//! payments; the provider's unsigned callback confirms them asynchronously.
//! Order state lives in the storefront's order store and only changes through
//! its guarded, idempotent transitions.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;

pub use api::{router, GatewayState};
pub use config::AppConfig;
pub use error::GatewayError;
