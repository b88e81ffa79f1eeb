use axum::extract::ws;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::RoomError;
use crate::game_logic::{Effect, Room, ServerEvent};

/// Outbound channels of every session attached to one room.
///
/// Delivery never waits: a session whose buffer is full loses the message
/// instead of stalling the room for everyone else.
#[derive(Debug, Default)]
pub struct Sessions {
    senders: HashMap<Uuid, mpsc::Sender<ws::Message>>,
}

impl Sessions {
    pub fn attach(&mut self, session_id: Uuid, session_tx: mpsc::Sender<ws::Message>) {
        self.senders.insert(session_id, session_tx);
    }

    pub fn detach(&mut self, session_id: Uuid) -> bool {
        self.senders.remove(&session_id).is_some()
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.senders.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn send(&self, session_id: Uuid, event: &ServerEvent) {
        let Some(session_tx) = self.senders.get(&session_id) else {
            return;
        };
        if let Some(ws_msg) = encode(event) {
            deliver(session_id, session_tx, ws_msg);
        }
    }

    pub fn broadcast(&self, event: &ServerEvent) {
        self.broadcast_filtered(event, |_| true);
    }

    pub fn broadcast_except(&self, excluded: Uuid, event: &ServerEvent) {
        self.broadcast_filtered(event, |session_id| session_id != excluded);
    }

    fn broadcast_filtered(&self, event: &ServerEvent, include: impl Fn(Uuid) -> bool) {
        let Some(ws_msg) = encode(event) else {
            return;
        };
        for (session_id, session_tx) in &self.senders {
            if include(*session_id) {
                deliver(*session_id, session_tx, ws_msg.clone());
            }
        }
    }

    /// Sends each session the snapshot it is allowed to see.
    pub fn broadcast_state(&self, room: &Room, now_ms: i64) {
        for (session_id, session_tx) in &self.senders {
            let snapshot = room.snapshot(Some(*session_id), now_ms);
            if let Some(ws_msg) = encode(&ServerEvent::RoomState(snapshot)) {
                deliver(*session_id, session_tx, ws_msg);
            }
        }
    }

    /// Fans the effects of one room operation out to the sessions. A
    /// changed state is pushed once, after every other effect.
    pub fn dispatch(&mut self, room: &Room, effects: Vec<Effect>, now_ms: i64) {
        let room_code = room.code().to_string();
        let mut state_changed = false;

        for effect in effects {
            match effect {
                Effect::StateChanged => state_changed = true,
                Effect::Reveal { word } => self.broadcast(&ServerEvent::Reveal {
                    room_code: room_code.clone(),
                    word,
                }),
                Effect::BoardCleared => self.broadcast(&ServerEvent::DrawClear {
                    room_code: room_code.clone(),
                }),
                Effect::DrawChange { author, elements } => self.broadcast_except(
                    author,
                    &ServerEvent::DrawChange {
                        room_code: room_code.clone(),
                        elements,
                    },
                ),
                Effect::Chat(message) => self.broadcast(&ServerEvent::ChatMessage(message)),
                Effect::Notice {
                    session_id,
                    message,
                } => self.send(session_id, &ServerEvent::ChatMessage(message)),
                Effect::GuessCorrect { by, points } => self.broadcast(&ServerEvent::GuessCorrect {
                    room_code: room_code.clone(),
                    by,
                    points,
                }),
                Effect::SessionReplaced { session_id } => {
                    self.send(session_id, &ServerEvent::error(RoomError::SessionReplaced));
                    self.detach(session_id);
                    tracing::info!(
                        room.code = %room_code,
                        session.id = %session_id,
                        "Session replaced by a reconnect of the same player"
                    );
                }
            }
        }

        if state_changed {
            self.broadcast_state(room, now_ms);
        }
    }
}

fn encode(event: &ServerEvent) -> Option<ws::Message> {
    match event.to_ws_text() {
        Ok(ws_msg) => Some(ws_msg),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            None
        }
    }
}

fn deliver(session_id: Uuid, session_tx: &mpsc::Sender<ws::Message>, ws_msg: ws::Message) {
    match session_tx.try_send(ws_msg) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!(session.id = %session_id, "Session outbox full, dropping message");
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(session.id = %session_id, "Session outbox closed");
        }
    }
}
