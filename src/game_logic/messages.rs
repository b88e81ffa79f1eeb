use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use super::chat::ChatMessage;
use super::elements::DrawingElement;
use super::room::RoomSnapshot;
use super::votes::VoteTally;

/// Events sent from a game client to the server. On the wire each one is a
/// frame `{"event": "<name>", "data": {...}, "ackId"?: ...}`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "room:join")]
    Join {
        room_code: String,
        name: String,
        #[serde(default)]
        avatar: String,
        /// Stable identity used to reclaim a seat after reconnecting.
        #[serde(default)]
        player_key: String,
    },
    #[serde(rename = "room:leave")]
    Leave {},
    #[serde(rename = "profile:update")]
    UpdateProfile {
        name: String,
        #[serde(default)]
        avatar: String,
    },
    #[serde(rename = "room:set_round_duration")]
    SetRoundDuration { round_duration_sec: i64 },
    #[serde(rename = "room:set_rounds_per_match")]
    SetRoundsPerMatch { rounds_per_match: i64 },
    #[serde(rename = "room:transfer_owner")]
    TransferOwner { new_owner_id: String },
    #[serde(rename = "game:start")]
    StartMatch {
        #[serde(default)]
        custom_words: Vec<String>,
    },
    #[serde(rename = "game:choose_word")]
    ChooseWord { word: String },
    #[serde(rename = "game:abort")]
    AbortRound {},
    #[serde(rename = "game:abort_vote")]
    VoteAbortRound {},
    #[serde(rename = "game:abort_match")]
    AbortMatch {},
    #[serde(rename = "game:abort_match_vote")]
    VoteAbortMatch {},
    #[serde(rename = "draw:excalidraw_change")]
    DrawChange { elements: Vec<DrawingElement> },
    /// Full scene pushed by a drawer that reconnected with local edits.
    #[serde(rename = "draw:sync")]
    DrawSync { elements: Vec<DrawingElement> },
    #[serde(rename = "draw:clear")]
    DrawClear {},
    #[serde(rename = "guess:submit")]
    Guess { text: String },
    #[serde(rename = "chat:message")]
    Chat { text: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "room:join",
            ClientEvent::Leave {} => "room:leave",
            ClientEvent::UpdateProfile { .. } => "profile:update",
            ClientEvent::SetRoundDuration { .. } => "room:set_round_duration",
            ClientEvent::SetRoundsPerMatch { .. } => "room:set_rounds_per_match",
            ClientEvent::TransferOwner { .. } => "room:transfer_owner",
            ClientEvent::StartMatch { .. } => "game:start",
            ClientEvent::ChooseWord { .. } => "game:choose_word",
            ClientEvent::AbortRound {} => "game:abort",
            ClientEvent::VoteAbortRound {} => "game:abort_vote",
            ClientEvent::AbortMatch {} => "game:abort_match",
            ClientEvent::VoteAbortMatch {} => "game:abort_match_vote",
            ClientEvent::DrawChange { .. } => "draw:excalidraw_change",
            ClientEvent::DrawSync { .. } => "draw:sync",
            ClientEvent::DrawClear {} => "draw:clear",
            ClientEvent::Guess { .. } => "guess:submit",
            ClientEvent::Chat { .. } => "chat:message",
        }
    }

    /// Drawing traffic from anyone but the drawer is dropped without a reply.
    pub fn is_drawing(&self) -> bool {
        matches!(
            self,
            ClientEvent::DrawChange { .. } | ClientEvent::DrawSync { .. } | ClientEvent::DrawClear {}
        )
    }
}

#[derive(Debug)]
pub struct ClientFrame {
    pub ack_id: Option<JsonValue>,
    pub event: ClientEvent,
}

/// A frame that could not be decoded. The ack id is kept when the envelope
/// itself was readable so the rejection can still be acknowledged.
#[derive(Debug, thiserror::Error)]
#[error("invalid '{event}' frame: {source}")]
pub struct FrameError {
    pub ack_id: Option<JsonValue>,
    pub event: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    event: String,
    #[serde(default)]
    data: JsonValue,
    #[serde(default)]
    ack_id: Option<JsonValue>,
}

pub fn parse_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|source| FrameError {
        ack_id: None,
        event: String::new(),
        source,
    })?;
    let data = match envelope.data {
        JsonValue::Null => json!({}),
        data => data,
    };
    let tagged = json!({ "event": envelope.event, "data": data });
    match serde_json::from_value::<ClientEvent>(tagged) {
        Ok(event) => Ok(ClientFrame {
            ack_id: envelope.ack_id,
            event,
        }),
        Err(source) => Err(FrameError {
            ack_id: envelope.ack_id,
            event: envelope.event,
            source,
        }),
    }
}

/// Events sent from the server to game clients.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "session:welcome")]
    Welcome { session_id: Uuid },
    #[serde(rename = "room:state")]
    RoomState(RoomSnapshot),
    #[serde(rename = "room:error")]
    RoomError { error: String, message: String },
    #[serde(rename = "chat:message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "chat:sync")]
    ChatSync {
        room_code: String,
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "guess:correct")]
    GuessCorrect {
        room_code: String,
        by: Uuid,
        points: u32,
    },
    #[serde(rename = "game:tick")]
    Tick { room_code: String, now_ms: i64 },
    #[serde(rename = "game:reveal")]
    Reveal {
        room_code: String,
        word: Option<String>,
    },
    #[serde(rename = "draw:excalidraw_change")]
    DrawChange {
        room_code: String,
        elements: Vec<DrawingElement>,
    },
    #[serde(rename = "draw:clear")]
    DrawClear { room_code: String },
    #[serde(rename = "draw:sync")]
    DrawSync {
        room_code: String,
        elements: Vec<DrawingElement>,
    },
    #[serde(rename = "ack")]
    Ack(Ack),
}

impl ServerEvent {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn error(error: crate::error::RoomError) -> Self {
        ServerEvent::RoomError {
            error: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ack_id: JsonValue,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present on abort-vote acknowledgments.
    #[serde(flatten)]
    pub votes: Option<VoteTally>,
}

impl Ack {
    pub fn ok(ack_id: JsonValue) -> Self {
        Self {
            ack_id,
            ok: true,
            error: None,
            votes: None,
        }
    }

    pub fn rejected(ack_id: JsonValue, error: crate::error::RoomError) -> Self {
        Self {
            ack_id,
            ok: false,
            error: Some(error.code().to_string()),
            votes: None,
        }
    }
}
