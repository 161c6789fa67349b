//! HTTP handlers for the roomcast server.
//!
//! REST endpoints write through the [`Store`] and publish live events on
//! success; the subscribe endpoint hands upgraded sockets to the
//! connection lifecycle.

use crate::config::Config;
use crate::error::{
    ApiError, MSG_FAILED_TO_UPGRADE, MSG_INVALID_JSON, MSG_INVALID_MESSAGE_ID,
    MSG_INVALID_ROOM_ID, MSG_MESSAGE_NOT_FOUND, MSG_ROOM_NOT_FOUND,
};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::store::{MemoryStore, Room, Store, StoredMessage};
use anyhow::Result;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::{header, request::Parts, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use roomcast_core::{
    dispatch_queue, DispatchHandle, Dispatcher, Event, Lifecycle, Registry, RoomId,
};
use roomcast_protocol::EventPayload;
use roomcast_transport::WebSocketConnection;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long the dispatch worker gets to drain after the server stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Rooms and messages.
    pub store: Arc<dyn Store>,
    /// Live subscriber connections.
    pub lifecycle: Lifecycle,
    /// Producer side of the dispatch queue.
    pub events: DispatchHandle,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state and spawn the dispatch worker.
    ///
    /// The worker exits once every clone of the state's [`DispatchHandle`]
    /// is dropped.
    #[must_use]
    pub fn start(config: Config, store: Arc<dyn Store>) -> (Arc<Self>, JoinHandle<()>) {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::with_config(registry.clone(), config.dispatcher());
        let (events, receiver) = dispatch_queue(config.dispatch.queue_capacity);

        let worker_registry = registry.clone();
        let worker = tokio::spawn(async move {
            dispatcher
                .run_with(receiver, |event, outcome| {
                    metrics::record_dispatch(event.kind(), outcome, event.created_at.elapsed());
                    metrics::set_active_rooms(worker_registry.stats().room_count);
                })
                .await;
        });

        let state = Self {
            store,
            lifecycle: Lifecycle::new(registry, config.lifecycle()),
            events,
            config,
        };
        (Arc::new(state), worker)
    }

    /// Queue a live event for a room's subscribers.
    ///
    /// Never fails the caller: the write it reports already happened.
    fn publish(&self, room: Uuid, payload: EventPayload) {
        let kind = payload.kind();
        if self.events.dispatch(Event::new(room.to_string(), payload)).is_err() {
            metrics::record_dropped_event(kind);
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _request: &Parts| {
                let origin = origin.as_bytes();
                origin.starts_with(b"http://") || origin.starts_with(b"https://")
            },
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([header::LINK])
        .max_age(Duration::from_secs(300));

    Router::new()
        .route(&state.config.subscribe_route(), get(subscribe_handler))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/:room_id", get(get_room))
        .route(
            "/api/rooms/:room_id/messages",
            get(list_messages).post(create_message),
        )
        .route("/api/rooms/:room_id/messages/:message_id", get(get_message))
        .route(
            "/api/rooms/:room_id/messages/:message_id/react",
            patch(react_to_message).delete(remove_reaction),
        )
        .route(
            "/api/rooms/:room_id/messages/:message_id/answer",
            patch(mark_answered),
        )
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve `state` on `listener` until `shutdown` resolves.
///
/// Live subscribers are terminated as soon as the shutdown signal fires
/// so graceful shutdown does not wait on idle sockets.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state.clone());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        state.lifecycle.shutdown();
    })
    .await
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let (state, worker) = AppState::start(config.clone(), Arc::new(MemoryStore::new()));

    let listener = TcpListener::bind(addr).await?;

    info!("Roomcast server listening on {}", addr);
    info!(
        "Subscribe endpoint: ws://{}{}",
        addr,
        config.subscribe_route()
    );

    serve(listener, state, shutdown_signal()).await?;

    if tokio::time::timeout(DRAIN_TIMEOUT, worker).await.is_err() {
        warn!("Dispatch worker did not drain before timeout");
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler for a room's live events.
async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_room_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;

    let ws = ws.map_err(|e| {
        warn!(room = %room.id, error = %e, "Rejected subscribe request");
        ApiError::Validation(MSG_FAILED_TO_UPGRADE)
    })?;

    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let room_id = RoomId::new(room.id.to_string());

    Ok(ws
        .on_failed_upgrade(|e| {
            warn!(error = %e, "Failed to upgrade to websocket connection");
            metrics::record_error("upgrade");
        })
        .on_upgrade(move |socket| async move {
            let _metrics_guard = ConnectionMetricsGuard::new();
            let conn = WebSocketConnection::new(socket, remote_addr);

            match state.lifecycle.accept(conn, room_id).await {
                Ok(reason) => metrics::record_close_reason(reason),
                Err(e) => {
                    debug!(error = %e, "Subscription refused");
                    metrics::record_error("subscribe");
                }
            }
        }))
}

#[derive(Debug, Deserialize)]
struct CreateRoomBody {
    theme: String,
}

#[derive(Debug, Deserialize)]
struct CreateMessageBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    count: i64,
}

fn parse_id(raw: &str, invalid: &'static str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(invalid))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(body)| body).map_err(|e| {
        debug!(error = %e, "Rejected request body");
        ApiError::Validation(MSG_INVALID_JSON)
    })
}

async fn read_room(state: &AppState, raw_room_id: &str) -> Result<Room, ApiError> {
    let id = parse_id(raw_room_id, MSG_INVALID_ROOM_ID)?;
    state
        .store
        .get_room(id)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_ROOM_NOT_FOUND, "failed to get room"))
}

/// Resolve a message addressed through `room`.
async fn read_message(
    state: &AppState,
    room: &Room,
    raw_message_id: &str,
) -> Result<StoredMessage, ApiError> {
    let id = parse_id(raw_message_id, MSG_INVALID_MESSAGE_ID)?;
    let message = state
        .store
        .get_message(id)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_MESSAGE_NOT_FOUND, "failed to get message"))?;

    if message.room_id != room.id {
        return Err(ApiError::NotFound(MSG_MESSAGE_NOT_FOUND));
    }
    Ok(message)
}

async fn list_rooms(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Room>>, ApiError> {
    state
        .store
        .list_rooms()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_store(e, MSG_ROOM_NOT_FOUND, "failed to list rooms"))
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateRoomBody>, JsonRejection>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let body = json_body(body)?;
    let id = state
        .store
        .create_room(&body.theme)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_ROOM_NOT_FOUND, "failed to insert room"))?;

    info!(room = %id, theme = %body.theme, "Room created");
    Ok(Json(CreatedResponse { id }))
}

async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(raw_room_id): Path<String>,
) -> Result<Json<Room>, ApiError> {
    read_room(&state, &raw_room_id).await.map(Json)
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(raw_room_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;
    state
        .store
        .list_messages(room.id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_store(e, MSG_ROOM_NOT_FOUND, "failed to list messages"))
}

async fn create_message(
    State(state): State<Arc<AppState>>,
    Path(raw_room_id): Path<String>,
    body: Result<Json<CreateMessageBody>, JsonRejection>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;
    let body = json_body(body)?;

    let id = state
        .store
        .create_message(room.id, &body.message)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_ROOM_NOT_FOUND, "failed to insert message"))?;

    state.publish(room.id, EventPayload::message_created(id.to_string(), body.message));
    Ok(Json(CreatedResponse { id }))
}

async fn get_message(
    State(state): State<Arc<AppState>>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<StoredMessage>, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;
    read_message(&state, &room, &raw_message_id).await.map(Json)
}

async fn react_to_message(
    State(state): State<Arc<AppState>>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<CountResponse>, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;
    let message = read_message(&state, &room, &raw_message_id).await?;

    let count = state
        .store
        .increment_reaction(message.id)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_MESSAGE_NOT_FOUND, "failed to react to message"))?;

    state.publish(
        room.id,
        EventPayload::reaction_increased(message.id.to_string(), count),
    );
    Ok(Json(CountResponse { count }))
}

async fn remove_reaction(
    State(state): State<Arc<AppState>>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<Json<CountResponse>, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;
    let message = read_message(&state, &room, &raw_message_id).await?;

    let count = state
        .store
        .decrement_reaction(message.id)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_MESSAGE_NOT_FOUND, "failed to remove reaction"))?;

    state.publish(
        room.id,
        EventPayload::reaction_decreased(message.id.to_string(), count),
    );
    Ok(Json(CountResponse { count }))
}

async fn mark_answered(
    State(state): State<Arc<AppState>>,
    Path((raw_room_id, raw_message_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let room = read_room(&state, &raw_room_id).await?;
    let message = read_message(&state, &room, &raw_message_id).await?;

    state
        .store
        .mark_answered(message.id)
        .await
        .map_err(|e| ApiError::from_store(e, MSG_MESSAGE_NOT_FOUND, "failed to mark message answered"))?;

    state.publish(room.id, EventPayload::message_answered(message.id.to_string()));
    Ok(StatusCode::OK)
}
