use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::error::{Result as WebResult, WebError};
use crate::game_logic::RoomSnapshot;
use crate::game_logic::words::{default_pool, sample_words, sanitize_custom_words};
use crate::state::AppState;

const MAX_WORDS_PER_REQUEST: usize = 20;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_code: String,
}

pub async fn create_room_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<CreateRoomResponse>> {
    tracing::info!("HTTP: Received create_room request");

    let room_code = app_state.room_registry.create_room().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to create room");
        WebError::InternalServerError(e)
    })?;

    Ok(Json(CreateRoomResponse { room_code }))
}

pub async fn get_room_handler(
    State(app_state): State<AppState>,
    Path(code): Path<String>,
) -> WebResult<Json<RoomSnapshot>> {
    let room = app_state
        .room_registry
        .get_room(&code)
        .await
        .ok_or_else(|| WebError::RoomNotFound(code.clone()))?;

    // The actor may have shut down between lookup and query.
    let snapshot = room
        .snapshot()
        .await
        .ok_or_else(|| WebError::RoomNotFound(code))?;
    Ok(Json(snapshot))
}

#[derive(Deserialize, Debug, Default)]
pub struct WordsQuery {
    pub count: Option<String>,
    pub custom: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct WordsResponse {
    pub words: Vec<String>,
}

/// Samples words from the comma separated `custom` list when given,
/// otherwise from the configured pool.
pub async fn words_handler(
    State(app_state): State<AppState>,
    Query(query): Query<WordsQuery>,
) -> WebResult<Json<WordsResponse>> {
    let count = query
        .count
        .as_deref()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(app_state.game_config.word_choices_count)
        .clamp(1, MAX_WORDS_PER_REQUEST);

    let custom: Vec<String> = query
        .custom
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::to_string)
        .collect();
    let custom = sanitize_custom_words(&custom)
        .ok_or_else(|| WebError::BadRequest("custom word list is invalid".to_string()))?;

    let pool = if !custom.is_empty() {
        custom
    } else if !app_state.game_config.word_pool.is_empty() {
        app_state.game_config.word_pool.clone()
    } else {
        default_pool()
    };

    let words = sample_words(&pool, count, &mut thread_rng());
    Ok(Json(WordsResponse { words }))
}

pub async fn health_handler() -> Json<JsonValue> {
    Json(json!({ "ok": true }))
}
