// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session WebSocket handler. One task per connection, driving C3–C9 against
//! the inbound/outbound event catalogue in `wire.rs` (spec.md §6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connections::ConnSignal;
use crate::messages::{publish_typing, MessageIngest};
use crate::model::{Message as ChatMessageRecord, MessageView, SenderView, User};
use crate::state::AppState;
use crate::wire::{BusEnvelope, InboundEvent, OutboundEvent, UserStatus};

/// Query parameters for the session WebSocket upgrade (spec.md §6 "Client
/// authenticates by providing `token` and `sessionId` in the opening
/// handshake").
#[derive(Debug, Clone, Deserialize)]
pub struct ChatWsQuery {
    pub token: String,
    pub session_id: String,
}

fn sender_view(user: &User) -> SenderView {
    SenderView { id: user.id.clone(), name: user.name.clone(), email: user.email.clone(), profile_image: user.profile_image.clone() }
}

/// `GET /ws` — authenticates eagerly so the handshake fails fast rather than
/// upgrading a socket it will immediately close (spec.md §5 "fails fast; no
/// indefinite waits").
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match state.authenticator.authenticate(&query.token, &query.session_id).await {
        Ok((user, session)) => ws.on_upgrade(move |socket| handle_session(socket, state, user, session.id)).into_response(),
        Err(err) => {
            (axum::http::StatusCode::UNAUTHORIZED, Json(err.to_error_body("authentication failed"))).into_response()
        }
    }
}

async fn handle_session(socket: WebSocket, state: Arc<AppState>, user: User, session_id: String) {
    let conn_id = Uuid::new_v4().to_string();
    let outcome = match state.connections.register(&user.id, conn_id.clone()).await {
        Ok(outcome) => outcome,
        Err(_) => return,
    };
    let mut signal_rx = outcome.signal_rx;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let sender = sender_view(&user);
    let mut room_rx: Option<mpsc::Receiver<String>> = None;
    let mut preempted = false;

    loop {
        let room_event = async {
            match &mut room_rx {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            signal = signal_rx.recv() => {
                match signal {
                    Some(ConnSignal::DuplicateLogin) => {
                        send_event(&mut ws_tx, OutboundEvent::DuplicateLogin { user_agent: None, ip: None, timestamp: state.clock.now_ms() }).await;
                    }
                    Some(ConnSignal::Preempted) | None => {
                        preempted = true;
                        send_event(&mut ws_tx, OutboundEvent::SessionEnded { reason: "duplicate_login".to_owned() }).await;
                        break;
                    }
                }
            }

            evt = room_event => {
                match evt {
                    Some(raw) => forward_bus_event(&mut ws_tx, &raw, &user.id).await,
                    None => { room_rx = None; }
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        state.connections.touch(&user.id).await;
                        match serde_json::from_str::<InboundEvent>(&text.to_string()) {
                            Ok(event) => {
                                handle_inbound(&state, &user, &session_id, &sender, event, &mut room_rx, &mut ws_tx).await;
                            }
                            Err(err) => {
                                warn_bad_frame(&err);
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    if preempted {
        state.presence.clear(&user.id).await;
    } else {
        let _ = state.presence.leave(&user.id).await;
    }
    state.connections.unregister(&user.id, &conn_id).await;
}

fn warn_bad_frame(err: &serde_json::Error) {
    tracing::warn!(err = %err, "dropped undecodable inbound frame");
}

async fn send_event(ws_tx: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin), event: OutboundEvent) {
    if let Ok(encoded) = serde_json::to_string(&event) {
        let _ = ws_tx.send(WsMessage::Text(encoded.into())).await;
    }
}

/// Forwards one bus event to this connection, unless `envelope.exclude_user`
/// names this connection's own user (spec.md §4.8 "excluding the caller").
async fn forward_bus_event(ws_tx: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin), raw: &str, user_id: &str) {
    if let Ok(envelope) = serde_json::from_str::<BusEnvelope>(raw) {
        if envelope.exclude_user.as_deref() == Some(user_id) {
            return;
        }
        if let Ok(encoded) = serde_json::to_string(&envelope.event) {
            let _ = ws_tx.send(WsMessage::Text(encoded.into())).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_inbound(
    state: &Arc<AppState>,
    user: &User,
    session_id: &str,
    sender: &SenderView,
    event: InboundEvent,
    room_rx: &mut Option<mpsc::Receiver<String>>,
    ws_tx: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
) {
    match event {
        InboundEvent::JoinRoom { room_id, password } => {
            match state.presence.join(&user.id, &room_id, password.as_deref()).await {
                Ok(outcome) => {
                    *room_rx = Some(state.ingest.subscribe_room(&room_id).await);
                    send_event(ws_tx, OutboundEvent::JoinRoomSuccess { room_id: room_id.clone(), participants: outcome.participants })
                        .await;
                    // Initial history load on join (spec.md §4.5).
                    fetch_and_send_page(state, user, ws_tx, &room_id, None).await;
                }
                Err(err) => {
                    send_event(ws_tx, OutboundEvent::JoinRoomError { error: err.to_error_body("unable to join room") }).await;
                }
            }
        }

        InboundEvent::ChatMessage { room, content, file_id } => {
            let result = if let Some(file_id) = file_id {
                match state.files.find_by_id(&file_id).await {
                    Ok(file) => state.ingest.send_file(&user.id, &room, file, sender.clone()).await,
                    Err(err) => Err(err),
                }
            } else {
                state.ingest.send(&user.id, &room, &content, sender.clone()).await
            };

            match result {
                Ok(outcome) => {
                    for model in &outcome.mentioned_models {
                        let _ = state.ai.start(&room, &user.id, model, &outcome.query_without_mentions).await;
                    }
                }
                Err(err) => {
                    send_event(ws_tx, OutboundEvent::Error(err.to_error_body("message send failed"))).await;
                }
            }
        }

        InboundEvent::FetchPreviousMessages { room_id, before } => {
            send_event(ws_tx, OutboundEvent::MessageLoadStart).await;
            fetch_and_send_page(state, user, ws_tx, &room_id, before).await;
        }

        InboundEvent::MarkMessagesAsRead { room_id, message_ids } => {
            // Silent success; no client response even on failure (spec.md §6).
            let _ = state.reactions.mark_read(&user.id, &room_id, &message_ids).await;
        }

        InboundEvent::MessageReaction { message_id, reaction, op } => {
            let Some(room_id) = state.presence.current_room_of(&user.id).await else { return };
            let add = matches!(op, crate::wire::ReactionOp::Add);
            if let Err(err) = state.reactions.set_reaction(&user.id, &room_id, &message_id, &reaction, add).await {
                send_event(ws_tx, OutboundEvent::Error(err.to_error_body("reaction failed"))).await;
            }
        }

        InboundEvent::Typing { room_id, is_typing } => {
            publish_typing(&state.pubsub, &state.instance_id, &room_id, &user.id, is_typing).await;
        }

        InboundEvent::UpdateUserStatus { status } => {
            if let Some(room_id) = state.presence.current_room_of(&user.id).await {
                publish_status(state, &room_id, &user.id, status).await;
            }
        }

        InboundEvent::ForceLogin { token } => {
            // Open question resolved: the requester must re-authenticate as
            // this session's own user (spec.md §9).
            match state.authenticator.authenticate(&token, session_id).await {
                Ok((reauthed, _)) if reauthed.id == user.id => {
                    send_event(ws_tx, OutboundEvent::SessionEnded { reason: "force_logout".to_owned() }).await;
                }
                Ok(_) => {
                    send_event(ws_tx, OutboundEvent::Error(crate::error::ChatError::AccessDenied.to_error_body("token belongs to a different user"))).await;
                }
                Err(err) => {
                    send_event(ws_tx, OutboundEvent::Error(err.to_error_body("force_login failed"))).await;
                }
            }
        }
    }
}

/// Loads one history page and sends it, then asynchronously bulk-marks the
/// fetched messages read by the requesting user (spec.md §4.6 step 5).
async fn fetch_and_send_page(
    state: &Arc<AppState>,
    user: &User,
    ws_tx: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    room_id: &str,
    before: Option<i64>,
) {
    match state.history.load_page(room_id, &user.id, before).await {
        Ok(mut page) => {
            let has_more = page.len() >= state.config.history_page_size;
            // Repo returns newest-first; the wire contract is ascending (spec.md §8 invariant 4).
            page.reverse();
            let oldest_timestamp = page.first().map(|m| m.timestamp);
            let message_ids: Vec<_> = page.iter().map(|m| m.id.clone()).collect();
            let messages = resolve_message_views(state, &page).await;
            send_event(ws_tx, OutboundEvent::PreviousMessagesLoaded { messages, has_more, oldest_timestamp }).await;

            if !message_ids.is_empty() {
                let reactions = Arc::clone(&state.reactions);
                let user_id = user.id.clone();
                let room_id = room_id.to_owned();
                tokio::spawn(async move {
                    let _ = reactions.mark_read(&user_id, &room_id, &message_ids).await;
                });
            }
        }
        Err(err) => {
            send_event(ws_tx, OutboundEvent::Error(err.to_error_body("failed to load history"))).await;
        }
    }
}

async fn publish_status(state: &Arc<AppState>, room_id: &str, user_id: &str, status: UserStatus) {
    let envelope = OutboundEvent::UserStatusUpdate { room_id: room_id.to_owned(), user_id: user_id.to_owned(), status }
        .to_envelope(&state.instance_id);
    if let Ok(encoded) = serde_json::to_string(&envelope) {
        state.pubsub.publish(&MessageIngest::room_topic(room_id), encoded).await;
    }
}

/// Resolve each distinct sender once per page rather than per message.
async fn resolve_message_views(state: &Arc<AppState>, messages: &[ChatMessageRecord]) -> Vec<MessageView> {
    let mut cache: HashMap<String, Option<SenderView>> = HashMap::new();
    let mut views = Vec::with_capacity(messages.len());
    for msg in messages {
        let sender = match &msg.sender_id {
            Some(id) => {
                if !cache.contains_key(id) {
                    let resolved = state.users.find_by_id(id).await.ok().map(|u| sender_view(&u));
                    cache.insert(id.clone(), resolved);
                }
                cache.get(id).cloned().flatten()
            }
            None => None,
        };
        views.push(MessageView::from_message(msg, sender));
    }
    views
}
