pub mod chat;
pub mod elements;
pub mod messages;
pub mod players;
pub mod room;
pub mod utils;
pub mod votes;
pub mod words;

pub use messages::{ClientEvent, ServerEvent};
pub use room::{Effect, Phase, Room, RoomSnapshot};
