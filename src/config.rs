use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Timings, limits and scoring used by every room.
#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    pub round_duration_sec: u32,
    pub rounds_per_match: u32,
    pub choose_duration_sec: u32,
    pub reveal_duration_sec: u32,
    pub word_choices_count: usize,
    pub guess_points_max: u32,
    pub guess_points_min: u32,
    pub drawer_bonus: u32,
    pub max_elements: usize,
    pub chat_history_limit: usize,
    pub tick_interval_ms: u64,
    pub empty_room_grace_sec: u64,
    pub idle_timeout_sec: u64,
    pub avatar_url_template: String,
    /// Replaces the builtin word pool when non-empty.
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub word_pool: Vec<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_duration_sec: 60,
            rounds_per_match: 3,
            choose_duration_sec: 12,
            reveal_duration_sec: 6,
            word_choices_count: 3,
            guess_points_max: 100,
            guess_points_min: 20,
            drawer_bonus: 25,
            max_elements: 2000,
            chat_history_limit: 200,
            tick_interval_ms: 1000,
            empty_room_grace_sec: 10,
            idle_timeout_sec: 60 * 60,
            avatar_url_template: "https://q1.qlogo.cn/g?b=qq&nk={id}&s=640".to_string(),
            word_pool: Vec::new(),
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(10..=300).contains(&self.round_duration_sec) {
            return Err(ConfigError::InvalidValue(format!(
                "game.round_duration_sec must be within 10..=300, got {}",
                self.round_duration_sec
            )));
        }
        if !(1..=20).contains(&self.rounds_per_match) {
            return Err(ConfigError::InvalidValue(format!(
                "game.rounds_per_match must be within 1..=20, got {}",
                self.rounds_per_match
            )));
        }
        if self.word_choices_count == 0 {
            return Err(ConfigError::InvalidValue(
                "game.word_choices_count must be at least 1".to_string(),
            ));
        }
        if self.guess_points_min > self.guess_points_max {
            return Err(ConfigError::InvalidValue(
                "game.guess_points_min exceeds game.guess_points_max".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "game.tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub game: GameConfig,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let defaults = GameConfig::default();
    let builder = Config::builder()
        .set_default("server.port", 5000_i64)?
        .set_default("server.cors_origins", Vec::<String>::new())?
        .set_default("game.round_duration_sec", i64::from(defaults.round_duration_sec))?
        .set_default("game.rounds_per_match", i64::from(defaults.rounds_per_match))?
        .set_default("game.choose_duration_sec", i64::from(defaults.choose_duration_sec))?
        .set_default("game.reveal_duration_sec", i64::from(defaults.reveal_duration_sec))?
        .set_default("game.word_choices_count", defaults.word_choices_count as i64)?
        .set_default("game.guess_points_max", i64::from(defaults.guess_points_max))?
        .set_default("game.guess_points_min", i64::from(defaults.guess_points_min))?
        .set_default("game.drawer_bonus", i64::from(defaults.drawer_bonus))?
        .set_default("game.max_elements", defaults.max_elements as i64)?
        .set_default("game.chat_history_limit", defaults.chat_history_limit as i64)?
        .set_default("game.tick_interval_ms", defaults.tick_interval_ms as i64)?
        .set_default("game.empty_room_grace_sec", defaults.empty_room_grace_sec as i64)?
        .set_default("game.idle_timeout_sec", defaults.idle_timeout_sec as i64)?
        .set_default("game.avatar_url_template", defaults.avatar_url_template)?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("DRAWGUESS")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    app_settings.game.validate()?;
    Ok(app_settings)
}

fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    let mut words = Vec::new();

    match value {
        Value::Null => {}
        Value::String(s) => {
            for item in s.split(',') {
                let trimmed = item.trim();
                if !trimmed.is_empty() {
                    words.push(trimmed.to_string());
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                if let Value::String(s) = item {
                    let trimmed = s.trim();
                    if !trimmed.is_empty() {
                        words.push(trimmed.to_string());
                    }
                } else {
                    return Err(D::Error::custom("Array must contain only strings"));
                }
            }
        }
        _ => return Err(D::Error::custom("Expected string or array of strings")),
    }

    Ok(words)
}
