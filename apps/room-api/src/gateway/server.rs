//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time;

use crate::engine::spawn_forward;
use crate::gateway::fanout::BroadcastPayload;
use crate::room::state::Command;
use crate::room::CommandError;
use crate::AppState;

use super::events::{
    ClientMessage, CommandPayload, EventName, GatewayMessage, HeartbeatPayload, JoinPayload,
    OP_COMMAND, OP_HEARTBEAT, OP_JOIN,
};
use super::session::GatewaySession;

/// Heartbeat interval sent to clients in the ROOM_STATE payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 30000;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_JOINED: u16 = 4003;
const CLOSE_JOIN_REJECTED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving JOIN after connection (seconds).
const JOIN_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: Wait for JOIN within timeout.
    let join_result = time::timeout(Duration::from_secs(JOIN_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during join");
                    return Err("read error");
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("client closed"),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => return Err("invalid json"),
            };

            if client_msg.op != OP_JOIN {
                return Err("expected JOIN");
            }
            let payload: JoinPayload =
                serde_json::from_value(client_msg.d).map_err(|_| "invalid join payload")?;
            return Ok(payload);
        }
        Err("connection closed before join")
    })
    .await;

    let payload = match join_result {
        Ok(Ok(payload)) => payload,
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "gateway handshake failed");
            let _ = send_close(&mut ws_tx, CLOSE_NOT_JOINED, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Subscribe before the join transition so no event between the join
    // broadcast and the loop start is missed.
    let Some(broadcast_rx) = state.fanout.subscribe(&payload.room_id) else {
        let msg = GatewayMessage::rejected(1, CommandError::RoomNotFound.code(), "Room not found");
        let _ = send_json(&mut ws_tx, &msg).await;
        let _ = send_close(&mut ws_tx, CLOSE_JOIN_REJECTED, "Room not found").await;
        return;
    };

    let join_cmd = Command::Join {
        user_id: payload.user_id.clone(),
        device_id: payload.device_id.clone(),
        nickname: payload.nickname.clone(),
        position: payload.position,
    };
    let applied = match state.rooms.apply(&payload.room_id, join_cmd, None) {
        Ok(applied) => applied,
        Err(err) => {
            let msg = GatewayMessage::rejected(1, err.code(), &err.to_string());
            let _ = send_json(&mut ws_tx, &msg).await;
            let _ = send_close(&mut ws_tx, CLOSE_JOIN_REJECTED, err.code()).await;
            return;
        }
    };

    let session = Arc::new(GatewaySession::new(
        chorus_common::id::prefixed_ulid(chorus_common::id::prefix::GATEWAY_SESSION),
        payload.room_id.clone(),
        payload.user_id.clone(),
        payload.device_id.clone(),
    ));

    tracing::info!(
        session_id = %session.session_id,
        room_id = %session.room_id,
        user_id = %session.user_id,
        "gateway session established"
    );

    for forward in applied.forwards {
        spawn_forward(
            state.engine.clone(),
            state.config.engine_timeout,
            session.room_id.clone(),
            applied.run_id.clone(),
            forward,
        );
    }

    // Send the initial ROOM_STATE.
    let seq = session.next_seq();
    let room_state_msg = GatewayMessage::dispatch(
        EventName::ROOM_STATE,
        seq,
        serde_json::json!({
            "session_id": session.session_id,
            "heartbeat_interval": HEARTBEAT_INTERVAL_MS,
            "room": applied.state,
        }),
    );
    if send_json(&mut ws_tx, &room_state_msg).await.is_err() {
        return;
    }

    run_session(&state, session.clone(), ws_tx, ws_rx, broadcast_rx).await;

    // Dropping the connection means leaving the room. A second leave after
    // an explicit one (or a terminated room) is harmlessly rejected.
    if let Ok(applied) = state.rooms.apply(
        &session.room_id,
        Command::Leave {
            user_id: session.user_id.clone(),
        },
        Some(&session.session_id),
    ) {
        for forward in applied.forwards {
            spawn_forward(
                state.engine.clone(),
                state.config.engine_timeout,
                session.room_id.clone(),
                applied.run_id.clone(),
                forward,
            );
        }
    }

    tracing::info!(
        session_id = %session.session_id,
        room_id = %session.room_id,
        user_id = %session.user_id,
        "gateway session ended"
    );
}

/// Main session event loop: read client commands, forward broadcasts,
/// enforce heartbeat.
async fn run_session(
    state: &AppState,
    session: Arc<GatewaySession>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<Arc<BroadcastPayload>>,
) {
    // Heartbeat deadline: client must heartbeat within 1.5× the interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload =
                                    serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
                                let ack = GatewayMessage::heartbeat_ack(payload.seq);
                                if send_json(&mut ws_tx, &ack).await.is_err() {
                                    break;
                                }
                            }
                            OP_COMMAND => {
                                let explicit_leave = matches!(
                                    handle_command(state, &session, &mut ws_tx, client_msg.d).await,
                                    CommandOutcome::Left | CommandOutcome::Closed
                                );
                                if explicit_leave {
                                    break;
                                }
                            }
                            OP_JOIN => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already joined").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.session_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Broadcast event from the room's channel.
            result = broadcast_rx.recv() => {
                match result {
                    Ok(payload) => {
                        if payload.exclude_session.as_deref() == Some(session.session_id.as_str()) {
                            continue;
                        }

                        let seq = session.next_seq();
                        let msg = GatewayMessage::dispatch(payload.event_name, seq, payload.data.clone());
                        if send_json(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }

                        // The room is gone; nothing further will arrive.
                        if payload.event_name == EventName::ROOM_TERMINATED
                            || payload.event_name == EventName::ROOM_CREATE_FAILED
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            session_id = %session.session_id,
                            skipped = n,
                            "gateway session lagged behind broadcast"
                        );
                        // Continue — we just drop the missed events.
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        session_id = %session.session_id,
                        "heartbeat timeout"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

enum CommandOutcome {
    Continue,
    Left,
    Closed,
}

/// Parse and apply one op=4 COMMAND frame. Rejections go back to this
/// connection only.
async fn handle_command(
    state: &AppState,
    session: &Arc<GatewaySession>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    data: serde_json::Value,
) -> CommandOutcome {
    let payload: CommandPayload = match serde_json::from_value(data) {
        Ok(p) => p,
        Err(e) => {
            let seq = session.next_seq();
            let msg = GatewayMessage::rejected(
                seq,
                "VALIDATION_ERROR",
                &format!("Malformed command: {e}"),
            );
            if send_json(ws_tx, &msg).await.is_err() {
                return CommandOutcome::Closed;
            }
            return CommandOutcome::Continue;
        }
    };

    let explicit_leave = matches!(payload, CommandPayload::Leave);
    let command = command_from_payload(session, payload);

    match state
        .rooms
        .apply(&session.room_id, command, Some(&session.session_id))
    {
        Ok(applied) => {
            for forward in applied.forwards {
                spawn_forward(
                    state.engine.clone(),
                    state.config.engine_timeout,
                    session.room_id.clone(),
                    applied.run_id.clone(),
                    forward,
                );
            }
            if explicit_leave {
                CommandOutcome::Left
            } else {
                CommandOutcome::Continue
            }
        }
        Err(err) => {
            tracing::debug!(
                session_id = %session.session_id,
                room_id = %session.room_id,
                code = err.code(),
                "command rejected"
            );
            let seq = session.next_seq();
            let msg = GatewayMessage::rejected(seq, err.code(), &err.to_string());
            if send_json(ws_tx, &msg).await.is_err() {
                return CommandOutcome::Closed;
            }
            CommandOutcome::Continue
        }
    }
}

fn command_from_payload(session: &GatewaySession, payload: CommandPayload) -> Command {
    let user_id = session.user_id.clone();
    match payload {
        CommandPayload::Vote { track_id } => Command::Vote { user_id, track_id },
        CommandPayload::Suggest {
            track_id,
            title,
            artist,
        } => Command::SuggestTrack {
            user_id,
            track: crate::room::queue::Track {
                id: track_id,
                title,
                artist,
            },
        },
        CommandPayload::Play => Command::Play { user_id },
        CommandPayload::Pause => Command::Pause { user_id },
        CommandPayload::NextTrack => Command::GoToNextTrack { user_id },
        CommandPayload::ChangeEmittingDevice { device_id } => {
            Command::ChangeEmittingDevice { user_id, device_id }
        }
        CommandPayload::Chat { text } => Command::Chat { user_id, text },
        CommandPayload::UpdatePosition { position } => Command::UpdatePosition {
            user_id,
            device_id: session.device_id.clone(),
            position,
        },
        CommandPayload::Leave => Command::Leave { user_id },
    }
}

async fn send_json(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: &GatewayMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
