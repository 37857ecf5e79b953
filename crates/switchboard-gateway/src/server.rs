//! Gateway server: Axum HTTP + WebSocket front door

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use switchboard_channels::{Agent, BusError, Channel, Message};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::events::EventBus;
use crate::protocol::{
    self, ERR_INTERNAL, ERR_INVALID_METHOD, ERR_INVALID_PARAMS, GatewayError, GatewayRequest,
    GatewayResponse, SendMessageParams,
};
use crate::session::{DEFAULT_SESSION, SessionManager, USER_SPEAKER};

/// Shared state for every connection
#[derive(Clone)]
pub struct GatewayState {
    pub sessions: Arc<SessionManager>,
    pub events: EventBus,
    /// Where user messages are published
    pub human: Channel,
    pub auth_token: String,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(human: Channel, auth_token: String) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new()),
            events: EventBus::new(256),
            human,
            auth_token,
            start_time: Instant::now(),
        }
    }
}

pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, auth_token: String, human: Channel) -> Self {
        Self {
            state: GatewayState::new(human, auth_token),
            bind,
        }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// The agent that relays replies from `human` (and routing decisions
    /// from `agents`) to connected clients
    pub fn relay_agent(&self, agents: &Channel) -> Result<Agent, BusError> {
        crate::relay::relay_agent(&self.state, agents)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/status", get(status_handler))
            .route("/api/sessions", get(sessions_handler))
            .route("/api/messages", post(messages_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until the task is cancelled
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let router = self.router();
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

// ── HTTP Handlers ──

fn status(state: &GatewayState, sessions: usize) -> Value {
    serde_json::json!({
        "status": "ok",
        "sessions": sessions,
        "connected_clients": state.events.subscriber_count(),
        "channel": state.human.name(),
        "channel_subscribers": state.human.subscriber_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    })
}

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let sessions = state.sessions.count().await;
    Json(status(&state, sessions))
}

async fn sessions_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    if !auth::authorize(&state.auth_token, &headers, None) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let sessions = state.sessions.list().await;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

async fn messages_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(params): Json<SendMessageParams>,
) -> Result<Json<Value>, (StatusCode, Json<GatewayError>)> {
    if !auth::authorize(&state.auth_token, &headers, None) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(GatewayError::new(protocol::ERR_UNAUTHORIZED, "unauthorized")),
        ));
    }
    match send_message(&state, params).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            let status = if e.code == ERR_INTERNAL {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_REQUEST
            };
            Err((status, Json(e)))
        }
    }
}

// ── WebSocket Handler ──

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let query_token = query.get("token").map(String::as_str);
    if !auth::authorize(&state.auth_token, &headers, query_token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    info!("WebSocket connection from {}", addr);
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
        .into_response()
}

async fn handle_ws(socket: WebSocket, state: GatewayState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    // Responses go only to the client that asked
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

    let send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(json) => json,
                    None => break,
                },
                event = event_rx.recv() => match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} events", addr, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if ws_sender.send(WsMessage::Text(outgoing.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
        };

        let response = handle_request(&state, text.as_str()).await;
        match serde_json::to_string(&response) {
            Ok(json) => {
                if reply_tx.send(json).is_err() {
                    break;
                }
            }
            Err(e) => error!("Failed to serialize response: {}", e),
        }
    }

    drop(reply_tx);
    send_task.abort();
    info!("Client {} disconnected", addr);
}

pub(crate) async fn handle_request(state: &GatewayState, raw: &str) -> GatewayResponse {
    let req: GatewayRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => {
            return GatewayResponse::err(None, ERR_INVALID_PARAMS, format!("Invalid JSON: {}", e));
        }
    };

    let id = req.id.clone();
    debug!("Gateway request {}", req.method);

    match req.method.as_str() {
        protocol::methods::STATUS_GET => {
            let sessions = state.sessions.count().await;
            GatewayResponse::ok(id, status(state, sessions))
        }

        protocol::methods::SESSION_LIST => {
            let sessions = state.sessions.list().await;
            GatewayResponse::ok(id, serde_json::to_value(&sessions).unwrap_or_default())
        }

        protocol::methods::SESSION_NEW => {
            let name = req
                .params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Untitled");
            let session = state.sessions.create(name).await;
            let value = serde_json::to_value(&session).unwrap_or_default();
            state
                .events
                .emit(protocol::events::SESSION_CREATED, value.clone());
            GatewayResponse::ok(id, value)
        }

        protocol::methods::SESSION_HISTORY => {
            let session_id = req
                .params
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SESSION);

            match state.sessions.history(session_id).await {
                Some(messages) => GatewayResponse::ok(
                    id,
                    serde_json::json!({
                        "session_id": session_id,
                        "messages": messages,
                    }),
                ),
                None => GatewayResponse::err(
                    id,
                    ERR_INVALID_PARAMS,
                    format!("Session '{}' not found", session_id),
                ),
            }
        }

        protocol::methods::MESSAGE_SEND => {
            let result = match serde_json::from_value::<SendMessageParams>(req.params) {
                Ok(params) => send_message(state, params).await,
                Err(e) => Err(GatewayError::invalid_params(format!("Invalid params: {}", e))),
            };
            GatewayResponse::from_result(id, result)
        }

        _ => GatewayResponse::err(
            id,
            ERR_INVALID_METHOD,
            format!("Unknown method: {}", req.method),
        ),
    }
}

/// Append the user's line to the session and publish the whole transcript
/// on the human channel
async fn send_message(
    state: &GatewayState,
    params: SendMessageParams,
) -> Result<Value, GatewayError> {
    let content = params.content.trim();
    if content.is_empty() {
        return Err(GatewayError::invalid_params(
            "Missing or empty 'content' parameter",
        ));
    }
    let session_id = params.session_id.as_deref().unwrap_or(DEFAULT_SESSION);

    // The line is only kept in the transcript once it has been published
    let (message_id, delivered) = state
        .sessions
        .append_if(session_id, USER_SPEAKER, content, |chat_messages| {
            let msg = Message::user(chat_messages).with_field("session_id", session_id);
            let message_id = msg.id.clone();
            state.human.publish(msg).map(|delivered| (message_id, delivered))
        })
        .await
        .ok_or_else(|| {
            GatewayError::invalid_params(format!("Session '{}' not found", session_id))
        })?
        .map_err(|e| {
            error!("Failed to publish message for session {}: {}", session_id, e);
            GatewayError::new(ERR_INTERNAL, e.to_string())
        })?;

    state.events.emit(
        protocol::events::TYPING_START,
        serde_json::json!({ "session_id": session_id }),
    );

    Ok(serde_json::json!({
        "session_id": session_id,
        "message_id": message_id,
        "delivered": delivered,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_channels::{ChannelHub, Filter, kinds};

    fn state() -> (ChannelHub, GatewayState) {
        let hub = ChannelHub::new();
        let human = hub.channel("human").unwrap();
        (hub, GatewayState::new(human, String::new()))
    }

    #[tokio::test]
    async fn test_handle_request_status() {
        let (_hub, state) = state();
        let resp = handle_request(&state, r#"{"method":"status.get","params":{}}"#).await;
        let result = resp.result.unwrap();
        assert_eq!(result["status"], "ok");
        assert_eq!(result["channel"], "human");
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_handle_request_session_list() {
        let (_hub, state) = state();
        let resp = handle_request(&state, r#"{"method":"session.list","params":{}}"#).await;
        assert_eq!(resp.result.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_request_session_new() {
        let (_hub, state) = state();
        let resp = handle_request(
            &state,
            r#"{"method":"session.new","params":{"name":"Claims"},"id":"r1"}"#,
        )
        .await;
        assert_eq!(resp.id.as_deref(), Some("r1"));
        assert_eq!(resp.result.unwrap()["name"], "Claims");
        assert_eq!(state.sessions.count().await, 2);
    }

    #[tokio::test]
    async fn test_handle_request_unknown_method() {
        let (_hub, state) = state();
        let resp = handle_request(&state, r#"{"method":"unknown","params":{}}"#).await;
        assert_eq!(resp.error.unwrap().code, ERR_INVALID_METHOD);
    }

    #[tokio::test]
    async fn test_handle_request_invalid_json() {
        let (_hub, state) = state();
        let resp = handle_request(&state, "not json").await;
        assert_eq!(resp.error.unwrap().code, ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_message_send_publishes_transcript() {
        let (hub, state) = state();
        let mut sub = hub
            .channel("human")
            .unwrap()
            .subscribe("observer", Filter::of_type(kinds::USER_MESSAGE))
            .unwrap();

        handle_request(
            &state,
            r#"{"method":"message.send","params":{"content":"I need help with my policy"}}"#,
        )
        .await;
        state
            .sessions
            .append(DEFAULT_SESSION, "PolicyAgent", "Sure, which policy?")
            .await;
        let resp = handle_request(
            &state,
            r#"{"method":"message.send","params":{"content":"A-12345","session_id":"main"}}"#,
        )
        .await;

        let result = resp.result.unwrap();
        assert_eq!(result["session_id"], "main");
        assert_eq!(result["delivered"], 1);

        let first = sub.recv().await.unwrap();
        assert_eq!(first.payload_str("chat_messages"), Some("User: I need help with my policy"));
        let second = sub.recv().await.unwrap();
        assert_eq!(
            second.payload_str("chat_messages"),
            Some("User: I need help with my policy\nPolicyAgent: Sure, which policy?\nUser: A-12345")
        );
        assert_eq!(second.payload_str("session_id"), Some("main"));
        assert_eq!(result["message_id"], second.id.as_str());
    }

    #[tokio::test]
    async fn test_message_send_empty() {
        let (_hub, state) = state();
        let resp = handle_request(
            &state,
            r#"{"method":"message.send","params":{"content":"   "}}"#,
        )
        .await;
        assert_eq!(resp.error.unwrap().code, ERR_INVALID_PARAMS);
        assert_eq!(state.sessions.get("main").await.unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn test_message_send_unknown_session() {
        let (_hub, state) = state();
        let resp = handle_request(
            &state,
            r#"{"method":"message.send","params":{"content":"hi","session_id":"ghost"}}"#,
        )
        .await;
        assert!(resp.error.unwrap().message.contains("ghost"));
    }

    #[tokio::test]
    async fn test_message_send_after_hub_stop() {
        let (hub, state) = state();
        hub.stop();
        let resp = handle_request(
            &state,
            r#"{"method":"message.send","params":{"content":"hi"}}"#,
        )
        .await;
        assert_eq!(resp.error.unwrap().code, ERR_INTERNAL);
        // Nothing was routed, so nothing is remembered
        let session = state.sessions.get(DEFAULT_SESSION).await.unwrap();
        assert_eq!(session.message_count, 0);
        assert_eq!(session.chat_history(), "");
    }

    #[tokio::test]
    async fn test_session_history() {
        let (_hub, state) = state();
        handle_request(&state, r#"{"method":"message.send","params":{"content":"hello"}}"#).await;
        let resp = handle_request(&state, r#"{"method":"session.history","params":{}}"#).await;
        let result = resp.result.unwrap();
        assert_eq!(result["messages"][0]["speaker"], "User");
        assert_eq!(result["messages"][0]["content"], "hello");

        let missing =
            handle_request(&state, r#"{"method":"session.history","params":{"session_id":"x"}}"#)
                .await;
        assert!(missing.error.is_some());
    }
}
