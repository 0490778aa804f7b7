// ============================
// crates/relay-lib/src/ws_router.rs
// ============================
//! WebSocket router and per-connection actor.
//!
//! Each connection gets a writer task that owns the sink and a reader
//! loop that processes events in receipt order. Everything that touches
//! shared state goes through the relay; per-connection decode state
//! stays here, owned by this actor alone.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
    routing::get,
    Json, Router,
};
use chatrelay_common::{ClientEvent, ErrorCode, ServerEvent};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::bridge::StoredMessage;
use crate::error::RelayError;
use crate::metrics as keys;
use crate::validation;
use crate::AppState;

/// Close code sent when the bearer token is missing or invalid.
const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Close code sent when a member stops answering keepalive pings.
const CLOSE_PONG_TIMEOUT: u16 = 1001;

/// Query parameters for the WebSocket handshake. Browsers cannot set
/// headers on WebSocket requests, so `?token=` is accepted alongside
/// the `Authorization` header.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Create the relay router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/rooms/{room_id}/messages", get(room_history))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// `GET /ws` upgrade endpoint. The bearer token travels in the
/// handshake; admission happens before any client event is read.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers).or(query.token);
    counter!(keys::WS_CONNECTION).increment(1);

    ws.on_upgrade(move |socket| handle_connection(socket, state, token))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// `GET /rooms/{room_id}/messages`: room history through the
/// persistence bridge. The one lookup surface where an unknown room is
/// an error rather than an empty set.
async fn room_history(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, RelayError> {
    let room_id = validation::validate_room_id(&room_id)?;
    let messages = state.relay.bridge().list_messages(room_id).await?;
    Ok(Json(messages))
}

async fn handle_connection(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();

    let handle = match state.relay.admit(token.as_deref(), tx.clone()).await {
        Ok(handle) => handle,
        Err(err) => {
            counter!(keys::CONNECTIONS_REJECTED).increment(1);
            tracing::warn!(error = %err, "connection rejected");

            if let Some(event) = err.to_event() {
                if let Ok(json) = serde_json::to_string(&event) {
                    let _ = socket.send(Message::Text(json.into())).await;
                }
            }
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_UNAUTHORIZED,
                    reason: "invalid token".into(),
                })))
                .await;
            return;
        },
    };

    let (ws_sender, mut ws_receiver) = socket.split();
    let relay_settings = &state.settings.relay;
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    let mut writer_handle = tokio::spawn(writer_task(
        ws_sender,
        rx,
        Duration::from_millis(relay_settings.write_timeout_ms),
        Duration::from_secs(relay_settings.ping_interval_secs),
        Duration::from_secs(relay_settings.pong_timeout_secs),
        Arc::clone(&last_pong),
    ));

    // Reader loop: inbound events are processed strictly in receipt
    // order. The loop also ends when the writer dies (sink error or a
    // delivery that blew its budget).
    loop {
        tokio::select! {
            _ = &mut writer_handle => break,
            next = ws_receiver.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => state.relay.handle_event(handle.id, event).await,
                        Err(err) => {
                            tracing::debug!(
                                connection_id = %handle.id,
                                error = %err,
                                "malformed event"
                            );
                            let _ = tx.send(ServerEvent::Error {
                                code: ErrorCode::InvalidPayload,
                                message: format!("malformed event: {err}"),
                            });
                        },
                    }
                },
                Some(Ok(Message::Pong(_))) => {
                    *last_pong.lock().unwrap() = Instant::now();
                },
                // The lower layer answers pings for us.
                Some(Ok(Message::Ping(_))) => {},
                Some(Ok(Message::Binary(_))) => {
                    let _ = tx.send(ServerEvent::Error {
                        code: ErrorCode::InvalidPayload,
                        message: "binary frames are not part of this protocol".to_string(),
                    });
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %handle.id, frame = ?frame, "client closed");
                    break;
                },
                Some(Err(err)) => {
                    tracing::warn!(connection_id = %handle.id, error = %err, "receive error");
                    break;
                },
                None => break,
            },
        }
    }

    // Cleanup funnels through the relay so every room the connection
    // was in gets its leave notification exactly once.
    state.relay.disconnect(handle.id);
    writer_handle.abort();
}

/// Writer task: owns the sink. Applies the per-delivery write budget
/// (a member that cannot accept a write in time is treated as
/// disconnected) and drives the keepalive ping/pong cycle.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
    write_budget: Duration,
    ping_interval: Duration,
    pong_deadline: Duration,
    last_pong: Arc<Mutex<Instant>>,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the immediate first tick.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };

                match timeout(write_budget, sink.send(Message::Text(json.into()))).await {
                    Ok(Ok(())) => {},
                    Ok(Err(_)) => break,
                    Err(_) => {
                        let err = RelayError::DeliveryTimeout(write_budget.as_millis() as u64);
                        tracing::warn!(error = %err, "slow member dropped");
                        break;
                    },
                }
            },
            _ = ping_timer.tick() => {
                let silent_for = last_pong.lock().unwrap().elapsed();
                if silent_for > ping_interval + pong_deadline {
                    tracing::debug!("pong deadline missed, closing");
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_PONG_TIMEOUT,
                            reason: "pong timeout".into(),
                        })))
                        .await;
                    break;
                }

                match timeout(write_budget, sink.send(Message::Ping(Vec::new().into()))).await {
                    Ok(Ok(())) => {},
                    _ => break,
                }
            },
        }
    }
}
