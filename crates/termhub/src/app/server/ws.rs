//! One WebSocket per browser window.
//!
//! The window id is fixed at upgrade time from `?window=`. Every text frame
//! is parsed into a `ClientMessage` and dispatched to the hub, which keeps
//! slow spawns off this loop; everything the router queues for this
//! connection is written back as a JSON text frame.

use std::borrow::Cow;
use std::time::Duration;

use axum::extract::ws::close_code;
use axum::extract::ws::CloseFrame;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Deserialize;
use termhub_daemon::WindowId;
use termhub_protocol::ClientMessage;
use termhub_protocol::ErrorKind;
use termhub_protocol::ServerMessage;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::http_api::error_response;
use super::wait_for_shutdown;
use super::AppState;

const WS_RECV_TIMEOUT: Duration = Duration::from_secs(60);
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(15);
const WS_MAX_PARSE_ERRORS: u8 = 3;

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    window: Option<String>,
}

pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let window = match query.window.as_deref().map(str::trim) {
        Some(window) if !window.is_empty() => WindowId::new(window),
        _ => {
            return error_response(StatusCode::BAD_REQUEST, "missing window query parameter");
        }
    };
    let permit = match state.ws_limits.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "too many connections");
        }
    };
    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        handle_ws(socket, state, window).await;
    })
    .into_response()
}

enum Flow {
    Continue,
    Close,
}

async fn handle_ws(mut socket: WebSocket, state: AppState, window: WindowId) {
    let hub = state.hub;
    let shutdown = state.shutdown;
    let (connection_id, mut outbox) = hub.connect(window.clone());
    info!(connection_id = %connection_id, window_id = %window, "WebSocket connected");

    let mut parse_errors: u8 = 0;
    let mut awaiting_pong = false;
    loop {
        tokio::select! {
            _ = wait_for_shutdown(shutdown.clone()) => {
                let _ = close(&mut socket, close_code::AWAY, "server shutting down").await;
                break;
            }
            queued = outbox.recv() => {
                let Some(message) = queued else {
                    if outbox.is_overflowed() {
                        warn!(connection_id = %connection_id, "Client fell behind; closing");
                        let _ = close(&mut socket, close_code::AGAIN, "client too slow").await;
                    } else {
                        let _ = close(&mut socket, close_code::AWAY, "connection dropped").await;
                    }
                    break;
                };
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            received = tokio::time::timeout(WS_RECV_TIMEOUT, socket.recv()) => {
                let received = match received {
                    Ok(received) => received,
                    Err(_) if awaiting_pong => {
                        debug!(connection_id = %connection_id, "WebSocket idle; closing");
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Err(_) => {
                        awaiting_pong = true;
                        if send_with_timeout(&mut socket, Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                let Some(Ok(frame)) = received else {
                    break;
                };
                awaiting_pong = false;
                let flow = match frame {
                    Message::Text(text) => match ClientMessage::parse(&text) {
                        Ok(message) => {
                            parse_errors = 0;
                            hub.dispatch(connection_id, message).await;
                            Flow::Continue
                        }
                        Err(err) => {
                            parse_errors = parse_errors.saturating_add(1);
                            warn!(
                                connection_id = %connection_id,
                                error = %err,
                                consecutive = parse_errors,
                                "Invalid client message"
                            );
                            on_parse_error(&mut socket, parse_errors, err.to_string()).await
                        }
                    },
                    Message::Binary(_) => {
                        let _ = close(&mut socket, close_code::PROTOCOL, "binary frames are not supported").await;
                        Flow::Close
                    }
                    Message::Ping(payload) => {
                        if send_with_timeout(&mut socket, Message::Pong(payload)).await.is_err() {
                            Flow::Close
                        } else {
                            Flow::Continue
                        }
                    }
                    Message::Pong(_) => Flow::Continue,
                    Message::Close(_) => Flow::Close,
                };
                if matches!(flow, Flow::Close) {
                    break;
                }
            }
        }
    }

    hub.disconnect(connection_id).await;
    info!(connection_id = %connection_id, window_id = %window, "WebSocket disconnected");
}

async fn on_parse_error(socket: &mut WebSocket, parse_errors: u8, reason: String) -> Flow {
    let reply = ServerMessage::error(None, ErrorKind::InvalidMessage, reason);
    if send_message(socket, &reply).await.is_err() {
        return Flow::Close;
    }
    if parse_errors >= WS_MAX_PARSE_ERRORS {
        let _ = close(socket, close_code::POLICY, "too many invalid messages").await;
        return Flow::Close;
    }
    Flow::Continue
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let payload = serde_json::to_string(message).map_err(|err| {
        warn!(error = %err, "Failed to encode server message");
    })?;
    send_with_timeout(socket, Message::Text(payload)).await
}

async fn send_with_timeout(socket: &mut WebSocket, message: Message) -> Result<(), ()> {
    match tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(message)).await {
        Ok(result) => result.map_err(|_| ()),
        Err(_) => Err(()),
    }
}

async fn close(socket: &mut WebSocket, code: u16, reason: &'static str) -> Result<(), ()> {
    let frame = CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    };
    send_with_timeout(socket, Message::Close(Some(frame))).await
}
