use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dispatch;
mod error;
mod game_logic;
mod registry;
mod room_actor;
mod state;
mod web;

use crate::config::load_settings;
use crate::error::Result as AppResult;
use crate::registry::RoomRegistryHandle;
use crate::state::AppState;
use crate::web::run_server;

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app_settings = load_settings()?;
    tracing::info!(
        server.port = app_settings.server.port,
        game.round_duration_sec = app_settings.game.round_duration_sec,
        game.rounds_per_match = app_settings.game.rounds_per_match,
        game.word_pool.len = app_settings.game.word_pool.len(),
        "Configuration loaded"
    );

    let game_config = Arc::new(app_settings.game);
    let room_registry = RoomRegistryHandle::spawn(32, Arc::clone(&game_config));

    let app_state = AppState {
        room_registry,
        game_config,
    };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
