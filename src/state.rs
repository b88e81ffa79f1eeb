use std::sync::Arc;

use crate::config::GameConfig;
use crate::registry::RoomRegistryHandle;

#[derive(Clone)]
pub struct AppState {
    pub room_registry: RoomRegistryHandle,
    pub game_config: Arc<GameConfig>,
}
