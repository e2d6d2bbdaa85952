//! Gateway HTTP/WebSocket server
//!
//! Routes:
//! - `GET /ws?session_id=<resume>` live connection
//! - `POST /api/v1/translate` job submission for an existing session
//! - `GET /health`, `GET /health/live`
//! - `GET /rooms/stats`, `GET /rooms/check/{room_id}`
//! - `POST /rooms/send/{room_id}` payload to the room's occupant
//! - `DELETE /rooms/kick/{session_id}`

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use super::connection::ConnectionHandle;
use super::protocol::{
    error_codes, parse_client_message, ClientMessage, ErrorMessage, ErrorResponse, JobAccepted,
    LivenessResponse, Pong, ServerMessage, SubmitResponse,
};
use super::router::SessionRouter;
use crate::config::GatewayConfig;
use crate::core::{JobSubmission, SessionId};
use crate::error::{Error, Result};

/// How long a closing connection's writer gets to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state behind every route
pub struct AppState {
    pub router: Arc<SessionRouter>,
    pub idle_timeout: Duration,
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(router: Arc<SessionRouter>, config: &GatewayConfig) -> Self {
        AppState {
            router,
            idle_timeout: config.idle_timeout,
            outbound_buffer: config.outbound_buffer,
        }
    }
}

/// Build the axum application
pub fn app(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/v1/translate", post(submit_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/rooms/stats", get(room_stats_handler))
        .route("/rooms/check/{room_id}", get(room_check_handler))
        .route("/rooms/send/{room_id}", post(room_send_handler))
        .route("/rooms/kick/{session_id}", delete(kick_handler))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
}

/// Serve until `shutdown` flips, then close every live connection
pub async fn serve(
    state: Arc<AppState>,
    config: &GatewayConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = app(state.clone(), &config.cors_origins);
    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        node_id = %state.router.node(),
        "gateway listening"
    );

    let router = state.router.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for(shutdown).await;
            info!("gateway shutting down");
            router.close_all().await;
        })
        .await?;
    Ok(())
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

// ============================================================================
// WebSocket
// ============================================================================

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let resume = params
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(SessionId::from);
    ws.on_upgrade(move |socket| handle_socket(socket, state, resume))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, resume: Option<SessionId>) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbound) = ConnectionHandle::channel(state.outbound_buffer);

    let connected = match state.router.connect(conn.clone(), resume).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(error = %e, "rejecting live connection");
            if let Ok(json) = ServerMessage::from(&e).to_json() {
                let _ = sender.send(Message::Text(json.into())).await;
            }
            let _ = sender.close().await;
            return;
        }
    };
    let session = connected.session_id;

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv_frame().await {
            let json = match frame.message().to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(kind = frame.message().kind(), error = %e, "failed to serialize frame");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            frame.confirm();
        }
        // Unwritten frames are dropped unconfirmed so their results get held
        outbound.close();
        let _ = sender.close().await;
    });

    loop {
        let frame = match tokio::time::timeout(state.idle_timeout, receiver.next()).await {
            Err(_) => {
                info!(session_id = %session, "idle timeout, closing connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(session_id = %session, error = %e, "websocket receive failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_text(&state, &session, &conn, text.as_str()).await,
            Message::Binary(_) => {
                let _ = conn
                    .send(ServerMessage::error(
                        error_codes::INVALID_MESSAGE_FORMAT,
                        "Binary frames are not supported",
                    ))
                    .await;
            }
            Message::Ping(_) | Message::Pong(_) => state.router.touch(&session).await,
            Message::Close(_) => break,
        }
    }

    state.router.disconnect(&session, conn.id()).await;
    drop(conn);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(session_id = %session, "writer did not drain in time");
    }
}

async fn handle_text(state: &AppState, session: &SessionId, conn: &ConnectionHandle, text: &str) {
    state.router.touch(session).await;

    let replies = match parse_client_message(text) {
        Err(err) => {
            debug!(session_id = %session, code = %err.error_code, "rejected client frame");
            vec![ServerMessage::Error(err)]
        }
        Ok(ClientMessage::Ping) => vec![ServerMessage::Pong(Pong::now())],
        Ok(ClientMessage::JoinRoom(req)) => state
            .router
            .join_room(session, &req.room_id)
            .await
            .unwrap_or_else(|e| vec![ServerMessage::from(&e)]),
        Ok(ClientMessage::LeaveRoom) => vec![state
            .router
            .leave_room(session)
            .await
            .unwrap_or_else(|e| ServerMessage::from(&e))],
        Ok(ClientMessage::Translate(req)) => {
            match state.router.submit(req.into_submission(session.clone())).await {
                Ok(job_id) => vec![ServerMessage::JobAccepted(JobAccepted { job_id })],
                Err(e) => {
                    warn!(session_id = %session, error = %e, "submission rejected");
                    vec![ServerMessage::from(&e)]
                }
            }
        }
    };

    for reply in replies {
        if conn.send(reply).await.is_err() {
            break;
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::SessionNotFound(_) | Error::RoomEmpty(_) | Error::NotInRoom(_) => {
            StatusCode::NOT_FOUND
        }
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::RoomOccupied(_) | Error::SessionConflict { .. } => StatusCode::CONFLICT,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        e if e.is_infrastructure() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, error: ErrorMessage) -> Response {
    (status, Json(ErrorResponse::from(error))).into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_response(status_for(&self), ErrorMessage::from(&self))
    }
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<JobSubmission>, JsonRejection>,
) -> Response {
    let Json(submission) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorMessage::new(error_codes::VALIDATION_ERROR, rejection.body_text()),
            )
        }
    };

    match state.router.submit(submission).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(SubmitResponse::accepted(job_id))).into_response(),
        Err(e) => {
            if e.is_client_error() {
                debug!(error = %e, "submission rejected");
            } else {
                warn!(error = %e, "submission failed");
            }
            e.into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let health = state.router.health().await;
    let status = if health.registry_reachable && health.queue_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse::alive())
}

async fn room_stats_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.router.stats().await).into_response()
}

async fn room_check_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Response {
    match state.router.room_check(&room_id).await {
        Ok(check) => Json(check).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn room_send_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    payload: std::result::Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let Json(message) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorMessage::new(error_codes::VALIDATION_ERROR, rejection.body_text()),
            )
        }
    };
    match state.router.send_to_room(&room_id, message).await {
        Ok(sent) => Json(sent).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn kick_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.router.kick(&SessionId::from(session_id)).await {
        Ok(kicked) if kicked.relayed => (StatusCode::ACCEPTED, Json(kicked)).into_response(),
        Ok(kicked) => Json(kicked).into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::core::store::RegistryStore;
    use crate::core::NodeId;
    use crate::gateway::router::RouterSettings;
    use crate::memory::{MemoryQueue, MemoryStore};
    use crate::queue::Queues;
    use crate::registry::{RoomDirectory, SessionRegistry};
    use crate::workers::HoldingArea;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> (Arc<AppState>, SessionRegistry) {
        let provider = Arc::new(MemoryQueue::new());
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
        let queues = Queues::new(provider, &QueueConfig::default());
        let registry = SessionRegistry::new(store, "t", Duration::from_secs(3600));
        let router = Arc::new(SessionRouter::new(
            NodeId::from("A"),
            registry.clone(),
            RoomDirectory::new(registry.clone(), "t"),
            queues,
            Arc::new(HoldingArea::new(10, Duration::from_secs(60))),
            RouterSettings::default(),
        ));
        let state = Arc::new(AppState::new(router, &GatewayConfig::default()));
        (state, registry)
    }

    fn test_app() -> (Router, SessionRegistry) {
        let (state, registry) = test_state();
        (app(state, &["*".to_string()]), registry)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_translate(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/translate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_accepted() {
        let (app, registry) = test_app();
        registry
            .register(&SessionId::from("S1"), &NodeId::from("A"))
            .await
            .unwrap();

        let response = app
            .oneshot(post_translate(
                r#"{"text":"hello","translatorBackend":"yandex","targetLang":"ru","sessionId":"S1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert!(body["jobId"].is_string());
    }

    #[tokio::test]
    async fn test_submit_unknown_session_is_404() {
        let (app, _) = test_app();
        let response = app
            .oneshot(post_translate(
                r#"{"text":"hello","translator_code":"yandex","target_lang":"ru","ws_session_id":"S2"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["errorCode"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_submit_malformed_is_422() {
        let (app, _) = test_app();
        let response = app.oneshot(post_translate(r#"{"text":"hello"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(response).await["errorCode"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_health_and_room_check() {
        let (app, _) = test_app();
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["nodeId"], "A");
        assert_eq!(body["queueReachable"], true);

        let response = app
            .oneshot(Request::get("/rooms/check/lobby").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["roomId"], "lobby");
        assert_eq!(body["occupied"], false);
    }

    #[tokio::test]
    async fn test_liveness() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "alive");
    }

    #[tokio::test]
    async fn test_send_to_empty_room_is_404() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::post("/rooms/send/lobby")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["errorCode"], "ROOM_EMPTY");
    }

    #[tokio::test]
    async fn test_room_send_and_kick() {
        let (state, _) = test_state();
        let app = app(state.clone(), &["*".to_string()]);
        let (conn, mut rx) = ConnectionHandle::channel(8);
        let session = state.router.connect(conn, None).await.unwrap().session_id;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::ConnectionEstablished(_)
        ));
        state.router.join_room(&session, "lobby").await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::post("/rooms/send/lobby")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sessionId"], session.as_str());
        assert_eq!(body["relayed"], false);
        match rx.recv().await.unwrap() {
            ServerMessage::RoomMessage(msg) => assert_eq!(msg.message["text"], "hi"),
            other => panic!("expected room_message, got {:?}", other),
        }

        let uri = format!("/rooms/kick/{}", session);
        let response = app
            .clone()
            .oneshot(Request::delete(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["roomId"], "lobby");
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::RoomLeft(_)));

        let response = app
            .oneshot(Request::delete(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["errorCode"], "NOT_IN_ROOM");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&Error::Unavailable("queue down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::Validation("empty".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::Capacity("full".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
