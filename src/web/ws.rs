use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RoomError;
use crate::game_logic::messages::{Ack, ClientFrame, parse_client_frame};
use crate::game_logic::{ClientEvent, ServerEvent};
use crate::registry::{RoomRegistryHandle, normalize_room_code};
use crate::room_actor::{JoinRequest, RoomActorHandle};
use crate::state::AppState;

const SESSION_OUTBOX_SIZE: usize = 128;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::debug!("WebSocket: Connection attempt to /ws endpoint");
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Routes the frames of one WebSocket session to the room it joined.
struct SessionRouter {
    session_id: Uuid,
    session_tx: mpsc::Sender<ws::Message>,
    registry: RoomRegistryHandle,
    current_room: Option<RoomActorHandle>,
}

impl SessionRouter {
    async fn handle_text(&mut self, text: &str) {
        let frame = match parse_client_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session.id = %self.session_id, error = %e, "Rejecting malformed frame");
                self.reply(e.ack_id, Err(RoomError::InvalidPayload));
                return;
            }
        };

        match frame {
            ClientFrame {
                ack_id,
                event:
                    ClientEvent::Join {
                        room_code,
                        name,
                        avatar,
                        player_key,
                    },
            } => {
                let request = JoinRequest {
                    name,
                    avatar,
                    player_key,
                };
                self.join(&room_code, request, ack_id).await;
            }
            ClientFrame { ack_id, event } => self.forward(event, ack_id).await,
        }
    }

    async fn join(&mut self, room_code: &str, request: JoinRequest, ack_id: Option<JsonValue>) {
        let code = normalize_room_code(room_code);
        let Some(room) = self.registry.get_room(&code).await else {
            tracing::info!(session.id = %self.session_id, room.code = %code, "Join for unknown room");
            self.reply(ack_id, Err(RoomError::RoomNotFound));
            return;
        };

        match room
            .join(self.session_id, self.session_tx.clone(), request, ack_id.clone())
            .await
        {
            Ok(Ok(())) => {
                // A session belongs to one room at a time.
                let joined_code = room.code.clone();
                if let Some(previous) = self.current_room.replace(room)
                    && previous.code != joined_code
                {
                    previous.session_closed(self.session_id).await;
                }
            }
            // The room already answered; the session stays where it was.
            Ok(Err(e)) => {
                tracing::debug!(session.id = %self.session_id, error = %e, "Join rejected by room");
            }
            Err(e) => {
                tracing::warn!(session.id = %self.session_id, error = %e, "Room went away during join");
                self.reply(ack_id, Err(RoomError::RoomNotFound));
            }
        }
    }

    async fn forward(&mut self, event: ClientEvent, ack_id: Option<JsonValue>) {
        let Some(room) = self.current_room.as_ref() else {
            if !event.is_drawing() {
                self.reply(ack_id, Err(RoomError::NotInRoom));
            }
            return;
        };

        let leaving = matches!(event, ClientEvent::Leave {});
        if let Err(e) = room
            .forward_event(self.session_id, self.session_tx.clone(), ack_id.clone(), event)
            .await
        {
            tracing::warn!(session.id = %self.session_id, error = %e, "Room went away");
            self.current_room = None;
            self.reply(ack_id, Err(RoomError::RoomNotFound));
            return;
        }
        if leaving {
            self.current_room = None;
        }
    }

    fn reply(&self, ack_id: Option<JsonValue>, outcome: Result<(), RoomError>) {
        let event = match (ack_id, outcome) {
            (Some(ack_id), Ok(())) => ServerEvent::Ack(Ack::ok(ack_id)),
            (Some(ack_id), Err(e)) => ServerEvent::Ack(Ack::rejected(ack_id, e)),
            (None, Ok(())) => return,
            (None, Err(e)) => ServerEvent::error(e),
        };
        send_direct(&self.session_tx, &event);
    }

    async fn close(self) {
        if let Some(room) = self.current_room {
            room.session_closed(self.session_id).await;
        }
    }
}

fn send_direct(session_tx: &mpsc::Sender<ws::Message>, event: &ServerEvent) {
    match event.to_ws_text() {
        Ok(ws_msg) => {
            if session_tx.try_send(ws_msg).is_err() {
                tracing::warn!("Session outbox unavailable, dropping reply");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
    }
}

#[tracing::instrument(skip(socket, app_state), fields(session.id))]
pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session.id", tracing::field::display(session_id));
    tracing::info!("WebSocket session opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (session_tx, mut session_rx) = mpsc::channel::<ws::Message>(SESSION_OUTBOX_SIZE);

    send_direct(&session_tx, &ServerEvent::Welcome { session_id });

    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = session_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::info!("WS send error, client likely disconnected");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut router = SessionRouter {
        session_id,
        session_tx,
        registry: app_state.room_registry.clone(),
        current_room: None,
    };

    loop {
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!("Send task finished, closing session");
                break;
            }
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(ws::Message::Text(text_msg))) => {
                    tracing::trace!(frame = text_msg.as_str(), "Received text frame");
                    router.handle_text(text_msg.as_str()).await;
                }
                Some(Ok(ws::Message::Binary(_))) => {
                    tracing::debug!("Received binary message (ignored)");
                }
                Some(Ok(ws::Message::Ping(_) | ws::Message::Pong(_))) => {}
                Some(Ok(ws::Message::Close(_))) => {
                    tracing::info!("WebSocket closed by client");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket error");
                    break;
                }
                None => {
                    tracing::info!("WebSocket connection closed");
                    break;
                }
            }
        }
    }

    send_task.abort();
    router.close().await;
    tracing::info!("WebSocket session fully closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn drain(rx: &mut mpsc::Receiver<ws::Message>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ws::Message::Text(text) = msg {
                frames.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        frames
    }

    fn acks(frames: &[Value]) -> Vec<Value> {
        frames
            .iter()
            .filter(|f| f["event"] == "ack")
            .map(|f| f["data"].clone())
            .collect()
    }

    #[tokio::test]
    async fn test_rejected_join_elsewhere_keeps_current_room() {
        let registry = RoomRegistryHandle::spawn(8, Arc::new(GameConfig::default()));
        let first = registry.create_room().await.unwrap();
        let second = registry.create_room().await.unwrap();
        let (session_tx, mut rx) = mpsc::channel(64);
        let mut router = SessionRouter {
            session_id: Uuid::new_v4(),
            session_tx,
            registry: registry.clone(),
            current_room: None,
        };

        router
            .handle_text(&json!({"event": "room:join", "data": {"roomCode": first, "name": "Ann", "playerKey": "ann"}, "ackId": 1}).to_string())
            .await;
        router
            .handle_text(&json!({"event": "room:join", "data": {"roomCode": second, "name": "<bad>"}, "ackId": 2}).to_string())
            .await;
        router
            .handle_text(&json!({"event": "chat:message", "data": {"text": "still here"}, "ackId": 3}).to_string())
            .await;

        let room = registry.get_room(&first).await.unwrap();
        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(router.current_room.as_ref().map(|r| r.code.clone()), Some(first));
        assert!(snapshot.players[0].connected);

        assert_eq!(
            acks(&drain(&mut rx)),
            vec![
                json!({"ackId": 1, "ok": true}),
                json!({"ackId": 2, "ok": false, "error": "invalid_payload"}),
                json!({"ackId": 3, "ok": true}),
            ]
        );
    }

    #[tokio::test]
    async fn test_frames_before_join_are_not_in_room() {
        let registry = RoomRegistryHandle::spawn(8, Arc::new(GameConfig::default()));
        let (session_tx, mut rx) = mpsc::channel(8);
        let mut router = SessionRouter {
            session_id: Uuid::new_v4(),
            session_tx,
            registry,
            current_room: None,
        };

        router
            .handle_text(r#"{"event":"game:start","ackId":5}"#)
            .await;
        router.handle_text(r#"{"event":"draw:clear"}"#).await;
        router.handle_text("not json").await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["data"], json!({"ackId": 5, "ok": false, "error": "not_in_room"}));
        assert_eq!(frames[1]["event"], "room:error");
        assert_eq!(frames[1]["data"]["error"], "invalid_payload");
    }
}
