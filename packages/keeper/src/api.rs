//! Dashboard HTTP API
//!
//! The contracts the external observer dashboard consumes: status,
//! balances, cycle listings, P&L, pause controls, and server-sent event
//! streams of the structured logs. Every route except the liveness probe
//! sits behind HTTP basic auth with the dashboard password secret.

#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::Utc;
use futures::stream::Stream;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::accounting::{aggregate_pnl, is_same_utc_day};
use crate::db::models::{Cycle, LedgerEntry, Step};
use crate::db::Store;
use crate::gateway::ChainGateway;
use crate::logsink::{LogSinks, LogStream};
use crate::math::format_units;
use crate::reconciler::SharedControl;
use crate::types::CycleState;
use evmkit_rs::explorer;
use evmkit_rs::registry::TokenRegistry;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub gateway: Arc<dyn ChainGateway>,
    pub registry: Arc<TokenRegistry>,
    pub control: SharedControl,
    pub sinks: Arc<LogSinks>,
    pub password: String,
}

/// Build the router with auth applied to everything except /health.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/status", get(get_status))
        .route("/balances", get(get_balances))
        .route("/cycles", get(get_cycles))
        .route("/cycles/{id}", get(get_cycle))
        .route("/pnl", get(get_pnl))
        .route("/pause", post(post_pause))
        .route("/resume", post(post_resume))
        .route("/pause-token", post(post_pause_token))
        .route("/resume-token", post(post_resume_token))
        .route("/logs/stream", get(get_log_stream))
        .route("/metrics", get(get_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/health", get(get_health))
        .merge(protected)
        .with_state(state)
}

/// Serve the API until the process exits.
pub async fn serve(state: AppState, port: u16) -> eyre::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Dashboard API listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// HTTP basic auth: any username, password must match the secret.
async fn basic_auth(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()
        })
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .map(|credentials| {
            credentials
                .split_once(':')
                .map(|(_, password)| password == state.password)
                .unwrap_or(false)
        })
        .unwrap_or(false);

    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"keeper\"")],
            "unauthorized",
        )
            .into_response();
    }
    next.run(request).await
}

async fn get_health() -> &'static str {
    "OK"
}

async fn get_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buffer);
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn get_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let control = state.control.read().await;
    let active = state.store.count_active_cycles().await?;

    Ok(Json(json!({
        "running": true,
        "paused": control.paused,
        "pausedTokens": control.paused_tokens.iter().collect::<Vec<_>>(),
        "lastRun": control.last_run.map(|t| t.to_rfc3339()),
        "activeCycles": active,
    })))
}

async fn get_balances(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let registry = &state.registry;
    let mut chains = serde_json::Map::new();

    for (label, chain_id) in [("l1", registry.l1_chain_id), ("l2", registry.l2_chain_id)] {
        let native = state.gateway.native_balance(chain_id).await?;
        let mut tokens = serde_json::Map::new();

        let mut all = vec![registry.source_token().clone(), registry.usdc().clone()];
        all.extend(registry.targets().iter().cloned());
        for token in all {
            let Ok(address) = registry.address_on(&token, chain_id) else {
                continue;
            };
            let balance = state.gateway.token_balance(chain_id, address).await?;
            tokens.insert(
                token.symbol.to_string(),
                Value::String(format_units(balance, token.decimals)),
            );
        }

        chains.insert(
            label.to_string(),
            json!({
                "chainId": chain_id,
                "native": format_units(native, 18),
                "tokens": tokens,
            }),
        );
    }

    Ok(Json(Value::Object(chains)))
}

async fn get_cycles(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let cycles = state.store.get_recent_cycles(50).await?;
    let rendered: Vec<Value> = cycles.iter().map(render_cycle).collect();
    Ok(Json(json!({ "cycles": rendered })))
}

async fn get_cycle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let cycle = state
        .store
        .get_cycle(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let steps = state.store.get_steps_for_cycle(id).await?;
    let ledger = state.store.get_ledger_for_cycle(id).await?;

    Ok(Json(json!({
        "cycle": render_cycle(&cycle),
        "steps": steps.iter().map(render_step).collect::<Vec<_>>(),
        "ledger": ledger.iter().map(render_ledger).collect::<Vec<_>>(),
    })))
}

async fn get_pnl(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let registry = &state.registry;
    let mut rows: Vec<(Cycle, Vec<LedgerEntry>)> = Vec::new();

    for state_kind in [CycleState::Completed, CycleState::Failed] {
        for cycle in state.store.get_cycles_by_state(state_kind).await? {
            let ledger = state.store.get_ledger_for_cycle(cycle.id).await?;
            rows.push((cycle, ledger));
        }
    }

    let lifetime = aggregate_pnl(&rows, registry.l1_chain_id, registry.l2_chain_id, None)?;

    let now = Utc::now();
    let today_rows: Vec<(Cycle, Vec<LedgerEntry>)> = rows
        .into_iter()
        .filter(|(cycle, _)| is_same_utc_day(cycle.updated_at, now))
        .collect();
    let today = aggregate_pnl(&today_rows, registry.l1_chain_id, registry.l2_chain_id, None)?;

    Ok(Json(json!({
        "lifetime": render_aggregate(&lifetime),
        "today": render_aggregate(&today),
    })))
}

async fn post_pause(State(state): State<AppState>) -> Json<Value> {
    let mut control = state.control.write().await;
    control.paused = true;
    info!("Keeper paused via API");
    Json(json!({"paused": true}))
}

async fn post_resume(State(state): State<AppState>) -> Json<Value> {
    let mut control = state.control.write().await;
    control.paused = false;
    info!("Keeper resumed via API");
    Json(json!({"paused": false}))
}

#[derive(Deserialize)]
struct TokenBody {
    token: String,
}

async fn post_pause_token(
    State(state): State<AppState>,
    Json(body): Json<TokenBody>,
) -> Json<Value> {
    let mut control = state.control.write().await;
    control.paused_tokens.insert(body.token.clone());
    info!(token = %body.token, "Token paused via API");
    Json(json!({"pausedTokens": control.paused_tokens.iter().collect::<Vec<_>>()}))
}

async fn post_resume_token(
    State(state): State<AppState>,
    Json(body): Json<TokenBody>,
) -> Json<Value> {
    let mut control = state.control.write().await;
    control.paused_tokens.remove(&body.token);
    info!(token = %body.token, "Token resumed via API");
    Json(json!({"pausedTokens": control.paused_tokens.iter().collect::<Vec<_>>()}))
}

#[derive(Deserialize)]
struct StreamQuery {
    #[serde(rename = "type")]
    stream_type: Option<String>,
}

async fn get_log_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let wanted = match query.stream_type.as_deref() {
        None => LogStream::Diag,
        Some(raw) => LogStream::parse(raw).ok_or(ApiError::BadRequest)?,
    };

    let rx = state.sinks.subscribe();
    let stream = futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    if line.stream != wanted {
                        continue;
                    }
                    let event = Event::default().data(line.json);
                    return Some((Ok(event), rx));
                }
                // Lagged subscribers skip dropped lines and keep going
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn render_cycle(cycle: &Cycle) -> Value {
    json!({
        "id": cycle.id,
        "token": cycle.token,
        "inputAmount": cycle.input_amount,
        "xOut": cycle.x_out,
        "usdcOut": cycle.usdc_out,
        "vcredOut": cycle.vcred_out,
        "state": cycle.state,
        "lastError": cycle.last_error,
        "createdAt": cycle.created_at.to_rfc3339(),
        "updatedAt": cycle.updated_at.to_rfc3339(),
    })
}

fn render_step(step: &Step) -> Value {
    let explorer_url = step
        .tx_hash
        .as_deref()
        .and_then(|hash| explorer::tx_url(step.chain_id as u64, hash));
    json!({
        "id": step.id,
        "kind": step.kind,
        "chainId": step.chain_id,
        "txHash": step.tx_hash,
        "explorerUrl": explorer_url,
        "status": step.status,
        "gasUsed": step.gas_used,
        "effectiveGasPrice": step.effective_gas_price,
        "error": step.error,
        "withdrawalHash": step.withdrawal_hash,
        "messageGuid": step.message_guid,
        "createdAt": step.created_at.to_rfc3339(),
        "updatedAt": step.updated_at.to_rfc3339(),
    })
}

fn render_ledger(entry: &LedgerEntry) -> Value {
    json!({
        "id": entry.id,
        "stepId": entry.step_id,
        "kind": entry.kind,
        "chainId": entry.chain_id,
        "token": entry.token,
        "amount": entry.amount,
        "txHash": entry.tx_hash,
    })
}

fn render_aggregate(agg: &crate::accounting::AggregatePnl) -> Value {
    json!({
        "cyclesCompleted": agg.cycles_completed,
        "cyclesFailed": agg.cycles_failed,
        "totalInput": agg.total_input.to_string(),
        "totalOutput": agg.total_output.to_string(),
        "gross": agg.gross.to_string(),
        "gasL2": agg.gas_l2.to_string(),
        "gasL1": agg.gas_l1.to_string(),
        "net": agg.net.to_string(),
    })
}

/// API error mapped to a status code. Responses never carry error detail;
/// the full report goes to the diagnostic log.
pub enum ApiError {
    NotFound,
    BadRequest,
    Internal(eyre::Report),
}

impl From<eyre::Report> for ApiError {
    fn from(e: eyre::Report) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, "bad request").into_response(),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "API handler error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}
