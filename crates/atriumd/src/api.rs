//! Gateway-facing HTTP surface.
//!
//! Every route except the invite-code listing requires the signed-request
//! scheme: HMAC-SHA256 over `METHOD\nPATH?QUERY\nTIMESTAMP\nBODY` carried in
//! the `x-gateway-signature` / `x-gateway-timestamp` headers. Ingestion
//! orchestrates authenticate → normalize → persist → evaluate → enqueue.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::{get, post};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{
    self, INVITE_LIST_LIMIT, REGISTER_LIMIT, RateLimiter, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::engine::{AckStatus, CommandQueue, DueCommand, RuleEvaluator};
use crate::error::Error;
use crate::measurements::MeasurementSink;
use crate::store::{Gateway, GatewayStatus, RegisterOutcome, Store};
use crate::telemetry;

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub limiter: Arc<dyn RateLimiter>,
    pub sink: Arc<dyn MeasurementSink>,
    pub queue: CommandQueue,
    pub evaluator: RuleEvaluator,
    pub shared_secret: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        limiter: Arc<dyn RateLimiter>,
        sink: Arc<dyn MeasurementSink>,
        shared_secret: Option<String>,
    ) -> Self {
        let queue = CommandQueue::new(store.clone());
        let evaluator = RuleEvaluator::new(store.clone(), queue.clone());
        Self {
            store,
            limiter,
            sink,
            queue,
            evaluator,
            shared_secret,
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

/// First entry of `x-forwarded-for`, or "unknown".
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn verify(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &str,
) -> Result<(), Error> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    auth::verify_signed_request(
        state.shared_secret.as_deref(),
        method.as_str(),
        path_and_query,
        signature,
        timestamp,
        body,
        now_seconds(),
    )
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, Error> {
    serde_json::from_str(raw).map_err(|e| Error::InvalidArgument(format!("invalid JSON payload: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    invite_code: String,
    identifier: String,
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    identifier: String,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: GatewayStatus,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest {
    identifier: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    gateway_identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest {
    command_id: String,
    gateway_identifier: String,
    status: AckStatus,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayQuery {
    #[serde(default)]
    gateway_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    #[serde(default)]
    invite_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PairedDevice {
    identifier: String,
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    last_seen: i64,
}

/// Handler for POST /gateways/register
#[tracing::instrument(skip_all)]
async fn register_gateway(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Json<RegisterOutcome>, Error> {
    let ip = client_ip(&headers);
    if state
        .limiter
        .consume(&format!("register:{ip}"), REGISTER_LIMIT, now_millis())
    {
        return Err(Error::RateLimited("too many register attempts".to_string()));
    }

    verify(&state, &method, &uri, &headers, &body)?;
    let req: RegisterRequest = parse_json(&body)?;

    let outcome = state
        .store
        .register_gateway(
            &req.invite_code,
            &req.identifier,
            &req.name,
            req.kind.as_deref(),
            now_millis(),
        )
        .await?;
    info!(gateway = %req.identifier, status = ?outcome.status, "gateway registered");
    Ok(Json(outcome))
}

/// Handler for POST /gateways/heartbeat
async fn heartbeat(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Json<HeartbeatResponse>, Error> {
    verify(&state, &method, &uri, &headers, &body)?;
    let req: HeartbeatRequest = parse_json(&body)?;

    let status = state
        .store
        .heartbeat_gateway(&req.identifier, now_millis())
        .await?;
    Ok(Json(HeartbeatResponse { status }))
}

/// Handler for POST /devices — the ingestion entry point.
///
/// Always succeeds once telemetry is recorded; automation failures are
/// logged server-side and never surfaced to the gateway.
#[tracing::instrument(skip_all)]
async fn ingest_device_data(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Json<SuccessResponse>, Error> {
    verify(&state, &method, &uri, &headers, &body)?;
    let req: IngestRequest = parse_json(&body)?;
    let now = now_millis();

    let Some(gateway) = state
        .store
        .gateway_by_identifier(&req.gateway_identifier)
        .await?
    else {
        // Do not reveal which identifiers are valid.
        warn!(gateway = %req.gateway_identifier, "telemetry from unknown gateway dropped");
        return Ok(Json(SuccessResponse { success: true }));
    };

    let payload = req.data.as_ref().and_then(Value::as_object).cloned();
    let device = state
        .store
        .upsert_device(
            &gateway,
            &req.identifier,
            req.kind.as_deref(),
            payload.clone(),
            now,
        )
        .await?;

    if let Some(payload) = &payload {
        if let Some(value) = telemetry::parse_temperature(payload) {
            state
                .sink
                .record(&device.home_id, &device.identifier, "temperature", value, now)
                .await;
        }
        if let Some(motion) = telemetry::parse_motion(payload) {
            let value = if motion { 1.0 } else { 0.0 };
            state
                .sink
                .record(&device.home_id, &device.identifier, "motion", value, now)
                .await;
        }

        // Best effort: ingestion response does not depend on automations.
        match state
            .evaluator
            .evaluate_device_update(&device, payload, now)
            .await
        {
            Ok(evaluation) => {
                if evaluation.queued > 0 {
                    info!(
                        device = %device.identifier,
                        queued = evaluation.queued,
                        "automation commands queued"
                    );
                }
            }
            Err(err) => error!(device = %device.identifier, %err, "automation evaluation failed"),
        }
    }

    Ok(Json(SuccessResponse { success: true }))
}

/// Handler for GET /gateways/commands
async fn poll_commands(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
) -> Result<Json<Vec<DueCommand>>, Error> {
    verify(&state, &method, &uri, &headers, "")?;
    let gateway_identifier = query.gateway_identifier.ok_or_else(|| {
        Error::InvalidArgument("missing gatewayIdentifier query parameter".to_string())
    })?;

    let due = state.queue.poll(&gateway_identifier, now_millis()).await?;
    Ok(Json(due))
}

/// Handler for POST /gateways/commands/ack
async fn ack_command(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Result<Json<SuccessResponse>, Error> {
    verify(&state, &method, &uri, &headers, &body)?;
    let req: AckRequest = parse_json(&body)?;

    state
        .queue
        .acknowledge(
            &req.command_id,
            &req.gateway_identifier,
            req.status,
            req.error,
            now_millis(),
        )
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Handler for GET /gateways/devices — paired devices for gateway re-sync.
async fn gateway_devices(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
) -> Result<Json<Vec<PairedDevice>>, Error> {
    verify(&state, &method, &uri, &headers, "")?;
    let gateway_identifier = query.gateway_identifier.ok_or_else(|| {
        Error::InvalidArgument("missing gatewayIdentifier query parameter".to_string())
    })?;

    let devices = state
        .store
        .paired_devices_for_gateway(&gateway_identifier)
        .await?;
    Ok(Json(
        devices
            .into_iter()
            .map(|d| PairedDevice {
                identifier: d.identifier,
                kind: d.kind,
                name: d.name,
                last_seen: d.last_seen,
            })
            .collect(),
    ))
}

/// Handler for GET /gateways — invite-code listing for onboarding.
///
/// Session-token listing belongs to the excluded auth subsystem; this
/// surface only answers invite-code queries, behind a rate limit.
async fn list_gateways(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Gateway>>, Error> {
    let invite_code = query
        .invite_code
        .ok_or_else(|| Error::InvalidArgument("missing inviteCode query parameter".to_string()))?;

    let ip = client_ip(&headers);
    if state.limiter.consume(
        &format!("list_gateways_invite:{ip}"),
        INVITE_LIST_LIMIT,
        now_millis(),
    ) {
        return Err(Error::RateLimited(
            "too many invite code attempts".to_string(),
        ));
    }

    let home = state
        .store
        .home_by_invite_code(&invite_code)
        .await?
        .ok_or_else(|| Error::Unauthenticated("invalid invite code".to_string()))?;
    let gateways = state.store.gateways_for_home(&home.id).await?;
    Ok(Json(gateways))
}

/// Create the router with all gateway-facing endpoints
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/gateways/register", post(register_gateway))
        .route("/gateways/heartbeat", post(heartbeat))
        .route("/devices", post(ingest_device_data))
        .route("/gateways/commands", get(poll_commands))
        .route("/gateways/commands/ack", post(ack_command))
        .route("/gateways/devices", get(gateway_devices))
        .route("/gateways", get(list_gateways))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// Binds the configured address and serves until the shutdown signal fires.
pub async fn serve(
    listen: String,
    port: u16,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("HTTP server shutting down gracefully");
        })
        .await?;

    Ok(())
}
