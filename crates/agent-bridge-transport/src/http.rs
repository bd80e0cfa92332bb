//! HTTP, SSE and WebSocket transport.
//!
//! Routes:
//! - `GET /tools` - tool definitions
//! - `POST /sessions/{key}/tools/{name}` - invoke a tool with a JSON arguments body
//! - `POST /sessions/{key}/command` - run an `agent ...` text command
//! - `DELETE /sessions/{key}` - evict the session's binding
//! - `GET /sessions/{key}/ws` - WebSocket speaking `ClientMessage` / `ServerMessage`
//!
//! `send_message` answers as `text/event-stream`, one `StreamEvent` per
//! frame. Everything else answers with a JSON `ServerMessage`.

use std::sync::Arc;

use agent_bridge_core::{BridgeError, ErrorKind};
use agent_bridge_session::{Command, CommandDispatcher, DispatchOutput};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::{
    command_line::parse_command_line,
    protocol::{ClientMessage, ServerMessage},
    tool::{ToolCall, tool_definitions},
};

/// Shared router state.
#[derive(Clone)]
pub struct BridgeState {
    /// Command dispatcher.
    pub dispatcher: Arc<CommandDispatcher>,
}

impl BridgeState {
    /// Create new router state.
    #[must_use]
    pub const fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self { dispatcher }
    }
}

/// HTTP status for an error kind.
#[must_use]
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidCommand | ErrorKind::ValueTooLong => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Permanent | ErrorKind::Protocol | ErrorKind::ConnectionLost => {
            StatusCode::BAD_GATEWAY
        }
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: &BridgeError) -> Response {
    (status_for(err.kind()), Json(ServerMessage::error(err))).into_response()
}

async fn respond(state: &BridgeState, session_key: &str, command: Command) -> Response {
    let name = command.name();
    match state.dispatcher.dispatch(session_key, command).await {
        Ok(DispatchOutput::Stream(stream)) => {
            let events = stream.map(|event| Event::default().json_data(&event));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Ok(output) => match ServerMessage::result(name, &output) {
            Some(message) => Json(message).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
        Err(e) => error_response(&e),
    }
}

async fn list_tools() -> impl IntoResponse {
    Json(tool_definitions())
}

async fn invoke_tool(
    State(state): State<BridgeState>,
    Path((session_key, name)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let arguments = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                return error_response(&BridgeError::invalid(format!("invalid JSON arguments: {e}")));
            }
        }
    };

    match ToolCall::from_value(name, arguments).and_then(ToolCall::into_command) {
        Ok(command) => respond(&state, &session_key, command).await,
        Err(e) => error_response(&e),
    }
}

async fn run_command_line(
    State(state): State<BridgeState>,
    Path(session_key): Path<String>,
    body: String,
) -> Response {
    match parse_command_line(&body) {
        Ok(command) => respond(&state, &session_key, command).await,
        Err(e) => error_response(&e),
    }
}

async fn evict_session(
    State(state): State<BridgeState>,
    Path(session_key): Path<String>,
) -> Response {
    match state.dispatcher.registry().evict(&session_key).await {
        Ok(Some(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(None) => error_response(&BridgeError::NotFound {
            resource: "Session",
            id: session_key,
        }),
        Err(e) => error_response(&e),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
    Path(session_key): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_key))
}

async fn handle_socket(socket: WebSocket, state: BridgeState, session_key: String) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Commands from one socket run in arrival order
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::error(&BridgeError::invalid(format!(
                    "invalid message: {e}"
                ))));
                continue;
            }
        };

        match client_msg.into_command() {
            None => {
                let _ = tx.send(ServerMessage::Pong);
            }
            Some(Err(e)) => {
                let _ = tx.send(ServerMessage::error(&e));
            }
            Some(Ok(command)) => {
                if !forward(&state, &session_key, command, &tx).await {
                    break;
                }
            }
        }
    }

    send_task.abort();
}

/// Dispatch a command and forward its output. Returns `false` once the
/// client side is gone.
async fn forward(
    state: &BridgeState,
    session_key: &str,
    command: Command,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> bool {
    let name = command.name();
    match state.dispatcher.dispatch(session_key, command).await {
        Ok(DispatchOutput::Stream(mut stream)) => {
            while let Some(event) = stream.next().await {
                if tx.send(ServerMessage::Event { event }).is_err() {
                    // Dropping the stream releases the upstream connection
                    return false;
                }
            }
            true
        }
        Ok(output) => ServerMessage::result(name, &output).is_none_or(|m| tx.send(m).is_ok()),
        Err(e) => tx.send(ServerMessage::error(&e)).is_ok(),
    }
}

/// Create the bridge router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_router(dispatcher));
/// ```
#[must_use]
pub fn create_router(dispatcher: Arc<CommandDispatcher>) -> Router {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/sessions/{key}", delete(evict_session))
        .route("/sessions/{key}/tools/{name}", post(invoke_tool))
        .route("/sessions/{key}/command", post(run_command_line))
        .route("/sessions/{key}/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(BridgeState::new(dispatcher))
}
