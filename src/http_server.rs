use crate::capture::Capture;
use crate::config::Config;
use crate::error::{ApiError, StoreError};
use crate::store::{self, SharedStore, WebhookStore};
use crate::stream::Watcher;
use crate::types::{CreateWebhook, EventRecord, Stats, UpdateWebhook, Webhook, WebhookSummary};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, ConnectInfo, DefaultBodyLimit, Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::sse::{Event, KeepAlive, Sse},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub keepalive: Duration,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            store: WebhookStore::new(config.event_capacity, config.stream_buffer).shared(),
            keepalive: config.keepalive,
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/api/webhooks/{id}",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route(
            "/api/webhooks/{id}/events",
            get(list_events).delete(clear_events),
        )
        .route(
            "/api/webhooks/{id}/events/{event_id}",
            get(get_event).delete(delete_event),
        )
        .route("/api/webhooks/{id}/stream", get(stream_events))
        .route("/w/{public_id}", any(ingest))
        .route("/w/{public_id}/{*rest}", any(ingest))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on an already-bound listener until `shutdown` resolves.
/// Peer addresses are made available to the ingestion handler.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

// ─── Ingestion ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IngressPath {
    public_id: String,
}

async fn ingest(
    State(state): State<AppState>,
    Path(target): Path<IngressPath>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let webhook = state
        .store
        .read()
        .await
        .resolve_by_public_id(&target.public_id)?;
    if !webhook.active {
        tracing::info!(webhook = webhook.internal_id, "rejected call to inactive webhook");
        return Err(store::inactive(&webhook).into());
    }

    let capture = Capture::new(&method, &uri, &headers, body, remote, webhook.secret.as_deref());
    let record = state
        .store
        .write()
        .await
        .append_event(webhook.internal_id, capture)?;

    tracing::info!(
        webhook = webhook.internal_id,
        event = record.id,
        method = %record.method,
        path = %record.path,
        "webhook received"
    );

    Ok(Json(json!({
        "success": true,
        "message": "Webhook received",
        "eventId": record.id,
        "webhook": webhook.name,
    })))
}

// ─── Webhooks ────────────────────────────────────────────────────────────────

async fn list_webhooks(State(state): State<AppState>) -> Json<Value> {
    let webhooks = state.store.read().await.list_with_stats();
    let total = webhooks.len();
    Json(json!({ "webhooks": webhooks, "total": total }))
}

async fn create_webhook(
    State(state): State<AppState>,
    payload: Result<Json<CreateWebhook>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Webhook>)> {
    let Json(input) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let webhook = state.store.write().await.register(input)?;
    tracing::info!(
        webhook = webhook.internal_id,
        name = %webhook.name,
        "webhook registered"
    );
    Ok((StatusCode::CREATED, Json(webhook)))
}

async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<WebhookSummary>> {
    Ok(Json(state.store.read().await.summary(id)?))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    payload: Result<Json<UpdateWebhook>, JsonRejection>,
) -> ApiResult<Json<Webhook>> {
    let Json(patch) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let webhook = state.store.write().await.update(id, patch)?;
    tracing::info!(webhook = id, active = webhook.active, "webhook updated");
    Ok(Json(webhook))
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    if !state.store.write().await.delete(id) {
        return Err(StoreError::webhook_not_found(id).into());
    }
    tracing::info!(webhook = id, "webhook deleted");
    Ok(Json(json!({ "success": true, "message": "Webhook deleted" })))
}

async fn stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.store.read().await.stats())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// ─── Events ──────────────────────────────────────────────────────────────────

async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let events = state.store.read().await.events(id)?;
    Ok(Json(json!({ "total": events.len(), "events": events })))
}

async fn clear_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Value>> {
    let removed = state.store.write().await.clear_events(id)?;
    tracing::info!(webhook = id, removed, "events cleared");
    Ok(Json(json!({
        "success": true,
        "removed": removed,
        "message": format!("{removed} events removed"),
    })))
}

async fn get_event(
    State(state): State<AppState>,
    Path((id, event_id)): Path<(u64, u64)>,
) -> ApiResult<Json<Arc<EventRecord>>> {
    Ok(Json(state.store.read().await.event(id, event_id)?))
}

async fn delete_event(
    State(state): State<AppState>,
    Path((id, event_id)): Path<(u64, u64)>,
) -> ApiResult<Json<Value>> {
    state.store.write().await.delete_event(id, event_id)?;
    Ok(Json(json!({ "success": true, "message": "Event deleted" })))
}

async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Sse<impl futures::Stream<Item = Result<Event, axum::Error>>>> {
    let watcher = Watcher::subscribe(&state.store, id).await?;

    let frames = futures::stream::unfold(watcher, |mut watcher| async move {
        let record = watcher.next().await?;
        Some((Event::default().json_data(&*record), watcher))
    });

    Ok(Sse::new(frames).keep_alive(KeepAlive::new().interval(state.keepalive).text("ping")))
}
