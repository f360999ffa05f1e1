use crate::config::{AppConfig, GatewayConfig, MpesaConfig, MpesaOperation};
use crate::database::OrderStore;
use crate::error::GatewayError;
use crate::payments::provider::MobileMoneyProvider;
use crate::health::{HealthChecker, HealthStatus, Liveness};
use crate::payments::signature::{verify_at, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::payments::types::{CallbackAck, Payload};
use crate::services::{PaymentOrchestrator, WebhookProcessor};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the gateway routes
#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Arc<GatewayConfig>,
    pub mpesa: Arc<MpesaConfig>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub webhook_processor: Arc<WebhookProcessor>,
    pub health: HealthChecker,
}

impl GatewayState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn MobileMoneyProvider>,
    ) -> Self {
        Self {
            gateway: Arc::new(config.gateway.clone()),
            mpesa: Arc::new(config.mpesa.clone()),
            orchestrator: Arc::new(PaymentOrchestrator::new(
                store.clone(),
                provider,
                config.mpesa.country_code.clone(),
            )),
            webhook_processor: Arc::new(WebhookProcessor::new(store.clone())),
            health: HealthChecker::new(store),
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Signature check, then configuration check; nothing else runs before both pass.
fn authorize(
    state: &GatewayState,
    headers: &HeaderMap,
    body: &[u8],
    operation: MpesaOperation,
) -> Result<(), GatewayError> {
    verify_at(
        state.gateway.shared_secret.as_deref(),
        header(headers, TIMESTAMP_HEADER),
        header(headers, SIGNATURE_HEADER),
        body,
        Utc::now(),
        state.gateway.signature_tolerance_secs,
    )
    .into_result()?;

    state.mpesa.require(operation)?;
    Ok(())
}

fn parse_object(body: &[u8]) -> Result<Payload, GatewayError> {
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::validation(
            "request body must be a JSON object",
            "body",
        )),
        Err(_) => Err(GatewayError::validation(
            "request body is not valid JSON",
            "body",
        )),
    }
}

fn status_for(accepted: bool, rejected: StatusCode) -> StatusCode {
    if accepted {
        StatusCode::OK
    } else {
        rejected
    }
}

/// GET /health
pub async fn health(State(state): State<GatewayState>) -> Json<Liveness> {
    Json(state.health.liveness())
}

/// GET /health/ready
pub async fn ready(State(state): State<GatewayState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// POST /mpesa/initiate
pub async fn initiate(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    authorize(&state, &headers, &body, MpesaOperation::Initiate)?;
    let payload = parse_object(&body)?;

    let outcome = state.orchestrator.initiate(&payload).await?;
    Ok((
        status_for(outcome.accepted, StatusCode::BAD_REQUEST),
        Json(outcome.body),
    )
        .into_response())
}

/// POST /mpesa/status
pub async fn status(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    authorize(&state, &headers, &body, MpesaOperation::Status)?;
    let payload = parse_object(&body)?;

    let outcome = state.orchestrator.poll_status(&payload).await?;
    Ok((
        status_for(outcome.accepted, StatusCode::BAD_GATEWAY),
        Json(outcome.body),
    )
        .into_response())
}

/// POST /mpesa/reverse
pub async fn reverse(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    authorize(&state, &headers, &body, MpesaOperation::Reversal)?;
    let payload = parse_object(&body)?;

    let outcome = state.orchestrator.reverse(&payload).await?;
    Ok((
        status_for(outcome.accepted, StatusCode::BAD_GATEWAY),
        Json(outcome.body),
    )
        .into_response())
}

/// POST /mpesa/callback
///
/// Unsigned: the provider does not sign callbacks.
pub async fn callback(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<CallbackAck>, GatewayError> {
    let payload = match parse_object(&body) {
        Ok(payload) => payload,
        Err(_) => {
            warn!(bytes = body.len(), "Callback body is not a JSON object");
            return Ok(Json(CallbackAck::rejected(&Payload::new(), "Invalid payload")));
        }
    };

    info!("Received M-Pesa callback");
    let ack = state.webhook_processor.process_callback(&payload).await?;
    Ok(Json(ack))
}
