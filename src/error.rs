use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Load(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Web server/handler error: {0}")]
    Web(#[from] crate::web::WebError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),
}

/// Rejections produced by room operations. Each variant maps to the stable
/// error code the client protocol carries in `room:error` and acks.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    #[error("malformed or invalid payload")]
    InvalidPayload,
    #[error("round duration must be between 10 and 300 seconds")]
    InvalidDuration,
    #[error("rounds per match must be between 1 and 20")]
    InvalidRounds,
    #[error("custom word list is invalid")]
    InvalidWords,
    #[error("target player is not connected to this room")]
    InvalidTarget,
    #[error("only the room owner may do this")]
    OnlyOwner,
    #[error("only the drawer may do this")]
    OnlyDrawer,
    #[error("session has not joined this room")]
    NotInRoom,
    #[error("room is not in the lobby")]
    NotInLobby,
    #[error("command is not valid in the current phase")]
    WrongPhase,
    #[error("word is not one of the offered choices")]
    ChooseNotAllowed,
    #[error("room does not exist")]
    RoomNotFound,
    #[error("player reconnected from another session")]
    SessionReplaced,
}

impl RoomError {
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::InvalidPayload => "invalid_payload",
            RoomError::InvalidDuration => "invalid_duration",
            RoomError::InvalidRounds => "invalid_rounds",
            RoomError::InvalidWords => "invalid_words",
            RoomError::InvalidTarget => "invalid_target",
            RoomError::OnlyOwner => "only_owner",
            RoomError::OnlyDrawer => "only_drawer",
            RoomError::NotInRoom => "not_in_room",
            RoomError::NotInLobby => "not_in_lobby",
            RoomError::WrongPhase => "wrong_phase",
            RoomError::ChooseNotAllowed => "choose_not_allowed",
            RoomError::RoomNotFound => "room_not_found",
            RoomError::SessionReplaced => "session_replaced",
        }
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
