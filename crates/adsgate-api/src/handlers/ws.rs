// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The WebSocket endpoint.
//!
//! Each client drives one hub registration: server pushes drain from the
//! client's bounded hub queue; inbound messages manage room membership,
//! request writes (acked by correlation id once the PLC session reports
//! success), and run history queries, ring buffer first.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::{debug, warn};

use adsgate_core::VariableId;
use adsgate_engine::{
    connection_room, topic_room, variable_room, ClientHandle, ClientMessage, ServerMessage,
};

use crate::state::{actor_from, AppState};

/// `GET /ws`: upgrade to the bidirectional channel.
pub async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let actor = actor_from(&headers);
    ws.on_upgrade(move |socket| client_loop(socket, state, actor))
}

async fn client_loop(mut socket: WebSocket, state: AppState, actor: String) {
    let handle = state.gateway.hub().register();
    debug!(client_id = %handle.id(), actor = %actor, "websocket client joined");

    loop {
        tokio::select! {
            outbound = handle.next_message() => {
                let Ok(text) = serde_json::to_string(&outbound) else {
                    warn!("server message failed to serialize");
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };

                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_message) => {
                                handle_message(&state, &handle, &actor, client_message).await;
                            }
                            Err(e) => {
                                handle.push(ServerMessage::SystemWarning {
                                    source: "websocket".to_string(),
                                    message: format!("invalid message: {}", e),
                                });
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    debug!(client_id = %handle.id(), "websocket client left");
    // The handle's Drop unregisters the client from the hub.
}

async fn handle_message(
    state: &AppState,
    handle: &ClientHandle,
    actor: &str,
    message: ClientMessage,
) {
    match message {
        ClientMessage::SubscribeConnection { id } => handle.join(connection_room(&id)),
        ClientMessage::SubscribeVariable { id } => handle.join(variable_room(&id)),
        ClientMessage::SubscribeTopic { topic } => handle.join(topic_room(&topic)),
        ClientMessage::UnsubscribeConnection { id } => handle.leave(&connection_room(&id)),
        ClientMessage::UnsubscribeVariable { id } => handle.leave(&variable_room(&id)),
        ClientMessage::UnsubscribeTopic { topic } => handle.leave(&topic_room(&topic)),

        ClientMessage::VariableWrite { id, value } => {
            let variable_id = VariableId::new(id);
            match state
                .gateway
                .write_variable_with_ack(&variable_id, value, "websocket", actor)
                .await
            {
                Ok((job_id, outcome_rx)) => {
                    // The ack arrives only at the job's terminal state;
                    // await it off to the side so the client loop keeps
                    // flowing.
                    let sender = handle.sender();
                    tokio::spawn(async move {
                        let message = match outcome_rx.await {
                            Ok(outcome) if outcome.success => ServerMessage::WriteAck {
                                job_id: job_id.to_string(),
                            },
                            Ok(outcome) => ServerMessage::WriteError {
                                job_id: job_id.to_string(),
                                error: outcome.error.unwrap_or_else(|| "write failed".to_string()),
                            },
                            Err(_) => ServerMessage::WriteError {
                                job_id: job_id.to_string(),
                                error: "engine shut down before completion".to_string(),
                            },
                        };
                        sender.push(message);
                    });
                }
                Err(e) => {
                    handle.push(ServerMessage::WriteError {
                        job_id: String::new(),
                        error: e.to_string(),
                    });
                }
            }
        }

        ClientMessage::VariableHistory {
            id,
            limit,
            start_ms,
            end_ms,
        } => {
            let variable_id = VariableId::new(id.clone());
            let limit = limit.unwrap_or(100).min(10_000);
            match state
                .gateway
                .read_history(&variable_id, start_ms, end_ms, limit)
                .await
            {
                Ok(mut entries) => {
                    entries.reverse(); // newest-first -> chronological
                    let samples = entries
                        .iter()
                        .map(|entry| adsgate_engine::value_payload(&entry.sample))
                        .collect();
                    handle.push(ServerMessage::HistoryResult { id, samples });
                }
                Err(e) => {
                    handle.push(ServerMessage::SystemWarning {
                        source: format!("variable:{}", variable_id),
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
