//! Local control surface: policy pushes, lifecycle status and host bridging.

use crate::classifier::normalize_domain;
use crate::clock::Clock;
use crate::config::ApiConfig;
use crate::foreground::{ActionFeed, FocusEvent, FocusKind, ScreenNode, SnapshotScreen};
use crate::logger::BlockNotifier;
use crate::policy::{PolicyHandle, TemporaryUnlock};
use crate::sinkhole::Sinkhole;
use crate::stats::StatsCollector;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

/// Largest accepted distance between a pushed event time and the local clock.
const MAX_EVENT_SKEW_MS: u64 = 24 * 60 * 60 * 1000;

pub struct ApiState {
    pub policy: Arc<PolicyHandle>,
    pub stats: Arc<StatsCollector>,
    pub notifier: Arc<BlockNotifier>,
    pub sinkhole: Option<Arc<Sinkhole>>,
    pub focus_sender: Option<Sender<FocusEvent>>,
    pub screen: Arc<SnapshotScreen>,
    pub actions: Arc<ActionFeed>,
    pub clock: Arc<dyn Clock>,
    pub controlling_package: String,
    pub routes: Vec<String>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/flags", post(update_flags))
        .route("/api/blocked-apps", put(put_blocked_apps))
        .route("/api/blocked-domains", put(put_blocked_domains))
        .route("/api/whitelist", put(put_whitelist))
        .route("/api/keywords", put(put_keywords))
        .route("/api/dns/blacklist", put(put_dns_blacklist))
        .route("/api/dns/blacklist/add", post(add_dns_domain))
        .route("/api/dns/blacklist/remove", post(remove_dns_domain))
        .route("/api/dns/upstream", put(put_upstream))
        .route("/api/unlocks", post(add_unlock))
        .route("/api/unlocks/thirty-minutes", post(add_thirty_minutes))
        .route("/api/focus", post(post_focus))
        .route("/api/screen", put(put_screen).delete(clear_screen))
        .route("/api/actions", get(get_actions))
        .route("/api/blocked", get(get_blocked))
        .route("/api/classify", get(classify))
        .with_state(state)
}

pub async fn start_api_server(state: Arc<ApiState>, config: &ApiConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", addr))?;
    tracing::info!("API Server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .context("API server failed")
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

async fn get_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let now = state.clock.now_ms();
    let sinkhole = state
        .sinkhole
        .as_ref()
        .map(|s| json!(s.state()))
        .unwrap_or_else(|| json!("disabled"));

    Json(json!({
        "policy": state.policy.snapshot(),
        "sinkhole": sinkhole,
        "upstream_dns": state.policy.upstream_dns(),
        "dns_blacklist_size": state.policy.dns_blacklist().len(),
        "routes": state.routes,
        "last_foreground_package": state.policy.last_foreground(),
        "active_unlocks": state.policy.active_unlocks(now),
        "stats": state.stats.snapshot(),
    }))
}

#[derive(Deserialize, Default)]
struct FlagsUpdate {
    blocking_enabled: Option<bool>,
    anti_tampering_enabled: Option<bool>,
    rest_mode_active: Option<bool>,
    kill_switch_active: Option<bool>,
    url_blocking_enabled: Option<bool>,
}

async fn update_flags(
    State(state): State<Arc<ApiState>>,
    Json(update): Json<FlagsUpdate>,
) -> impl IntoResponse {
    let policy = &state.policy;
    if let Some(v) = update.blocking_enabled {
        policy.set_blocking_enabled(v);
    }
    if let Some(v) = update.anti_tampering_enabled {
        policy.set_anti_tampering(v);
    }
    if let Some(v) = update.rest_mode_active {
        policy.set_rest_mode(v);
    }
    if let Some(v) = update.kill_switch_active {
        policy.set_kill_switch(v);
    }
    if let Some(v) = update.url_blocking_enabled {
        policy.set_url_blocking(v);
    }
    Json(policy.snapshot())
}

async fn put_blocked_apps(
    State(state): State<Arc<ApiState>>,
    Json(items): Json<Vec<String>>,
) -> impl IntoResponse {
    state.policy.set_blocked_apps(&items);
    Json(json!({ "count": state.policy.blocked_apps().len() }))
}

async fn put_blocked_domains(
    State(state): State<Arc<ApiState>>,
    Json(items): Json<Vec<String>>,
) -> impl IntoResponse {
    state.policy.set_blocked_domains(&items);
    Json(json!({ "count": state.policy.snapshot().blocked_domains.len() }))
}

async fn put_whitelist(
    State(state): State<Arc<ApiState>>,
    Json(items): Json<Vec<String>>,
) -> impl IntoResponse {
    state.policy.set_whitelist(&items);
    Json(json!({ "count": state.policy.snapshot().whitelist_domains.len() }))
}

async fn put_keywords(
    State(state): State<Arc<ApiState>>,
    Json(items): Json<Vec<String>>,
) -> impl IntoResponse {
    state.policy.set_keywords(&items);
    Json(json!({ "count": state.policy.snapshot().blocked_keywords.len() }))
}

async fn put_dns_blacklist(
    State(state): State<Arc<ApiState>>,
    Json(items): Json<Vec<String>>,
) -> impl IntoResponse {
    state.policy.update_dns_blacklist(&items);
    Json(json!({ "count": state.policy.dns_blacklist().len() }))
}

#[derive(Deserialize)]
struct DomainRequest {
    domain: String,
}

async fn add_dns_domain(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DomainRequest>,
) -> impl IntoResponse {
    state.policy.add_to_dns_blacklist(&req.domain);
    Json(json!({ "count": state.policy.dns_blacklist().len() }))
}

async fn remove_dns_domain(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DomainRequest>,
) -> impl IntoResponse {
    state.policy.remove_from_dns_blacklist(&req.domain);
    Json(json!({ "count": state.policy.dns_blacklist().len() }))
}

#[derive(Deserialize)]
struct UpstreamRequest {
    upstream: String,
}

async fn put_upstream(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<UpstreamRequest>,
) -> impl IntoResponse {
    if !state.policy.set_upstream_dns(&req.upstream) {
        return bad_request("upstream must not be blank").into_response();
    }
    Json(json!({ "upstream_dns": state.policy.upstream_dns() })).into_response()
}

async fn add_unlock(
    State(state): State<Arc<ApiState>>,
    Json(unlock): Json<TemporaryUnlock>,
) -> impl IntoResponse {
    let now = state.clock.now_ms();
    if !state
        .policy
        .add_temporary_unlock(&unlock.package_id, unlock.expires_at_ms, now)
    {
        return bad_request("pkg must not be blank").into_response();
    }
    Json(state.policy.active_unlocks(now)).into_response()
}

async fn add_thirty_minutes(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let now = state.clock.now_ms();
    match state
        .policy
        .add_thirty_minutes(&state.controlling_package, now)
    {
        Some(unlock) => Json(json!(unlock)).into_response(),
        None => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "no eligible foreground app" })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct FocusRequest {
    package: String,
    #[serde(default = "default_focus_kind")]
    kind: FocusKind,
    #[serde(default)]
    at_ms: Option<i64>,
}

fn default_focus_kind() -> FocusKind {
    FocusKind::WindowFocused
}

async fn post_focus(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<FocusRequest>,
) -> impl IntoResponse {
    let Some(sender) = state.focus_sender.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "foreground engine disabled" })),
        )
            .into_response();
    };

    // Unlock expiries are epoch ms, so event times must be too
    let now = state.clock.now_ms();
    let at_ms = req.at_ms.unwrap_or(now);
    if at_ms.abs_diff(now) > MAX_EVENT_SKEW_MS {
        return bad_request("at_ms must be epoch milliseconds near the current time")
            .into_response();
    }

    let event = FocusEvent {
        package: req.package,
        kind: req.kind,
        at_ms,
    };
    if sender.send(event).await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "foreground engine stopped" })),
        )
            .into_response();
    }
    (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response()
}

async fn put_screen(
    State(state): State<Arc<ApiState>>,
    Json(root): Json<ScreenNode>,
) -> impl IntoResponse {
    state.screen.replace(root);
    StatusCode::NO_CONTENT
}

async fn clear_screen(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.screen.clear();
    StatusCode::NO_CONTENT
}

async fn get_actions(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.actions.recent())
}

async fn get_blocked(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    // Newest first
    let mut events = state.notifier.recent();
    events.reverse();
    Json(events)
}

#[derive(Deserialize)]
struct ClassifyParams {
    domain: String,
}

async fn classify(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ClassifyParams>,
) -> impl IntoResponse {
    Json(json!({
        "domain": normalize_domain(&params.domain),
        "dns": state.policy.dns_matcher().classify(&params.domain),
        "url": state.policy.url_matcher().classify(&params.domain),
    }))
}
