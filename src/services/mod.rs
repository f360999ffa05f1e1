//! Services module for payment business logic

pub mod order_resolver;
pub mod payment_orchestrator;
pub mod webhook_processor;

pub use order_resolver::OrderResolver;
pub use payment_orchestrator::{PaymentOrchestrator, ProviderOutcome};
pub use webhook_processor::WebhookProcessor;
