use serde::Serialize;
use uuid::Uuid;

pub const MAX_NAME_CHARS: usize = 16;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Session currently (or last) bound to this player.
    pub id: Uuid,
    /// Stable identity across reconnects. Never sent to clients.
    #[serde(skip)]
    pub key: String,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Reconnected {
        /// Session that was bound to the player before this join, if it is
        /// a different one. It no longer speaks for the player.
        replaced_session: Option<Uuid>,
    },
}

/// Players of one room in join order. Records are never dropped on
/// disconnect so scores survive reconnection.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    /// Resolves a join: a known key is a reconnection, anything else a new player.
    pub fn join(&mut self, session_id: Uuid, key: &str, name: &str, avatar: &str) -> JoinOutcome {
        if let Some(player) = self.players.iter_mut().find(|p| p.key == key) {
            let replaced_session = (player.id != session_id).then_some(player.id);
            player.id = session_id;
            player.name = name.to_string();
            player.avatar = avatar.to_string();
            player.connected = true;
            return JoinOutcome::Reconnected { replaced_session };
        }

        self.players.push(Player {
            id: session_id,
            key: key.to_string(),
            name: name.to_string(),
            avatar: avatar.to_string(),
            score: 0,
            connected: true,
        });
        JoinOutcome::Joined
    }

    /// Marks the player bound to `session_id` as disconnected and returns its
    /// key. A session that was superseded by a reconnect matches nobody.
    pub fn disconnect(&mut self, session_id: Uuid) -> Option<String> {
        let player = self
            .players
            .iter_mut()
            .find(|p| p.id == session_id && p.connected)?;
        player.connected = false;
        Some(player.key.clone())
    }

    pub fn by_session(&self, session_id: Uuid) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.id == session_id && p.connected)
    }

    pub fn by_session_mut(&mut self, session_id: Uuid) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.id == session_id && p.connected)
    }

    pub fn by_key(&self, key: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.key == key)
    }

    pub fn by_key_mut(&mut self, key: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.key == key)
    }

    pub fn is_connected(&self, key: &str) -> bool {
        self.by_key(key).is_some_and(|p| p.connected)
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected).count()
    }

    pub fn connected_keys(&self) -> impl Iterator<Item = &str> {
        self.players
            .iter()
            .filter(|p| p.connected)
            .map(|p| p.key.as_str())
    }

    pub fn first_connected(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.connected)
    }

    /// Next connected player after `previous` in join order, wrapping around.
    /// Without a usable anchor the first connected player is picked.
    pub fn next_connected_after(&self, previous: Option<&str>) -> Option<String> {
        let start = previous
            .and_then(|key| self.players.iter().position(|p| p.key == key))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let len = self.players.len();
        (0..len)
            .map(|offset| &self.players[(start + offset) % len])
            .find(|p| p.connected)
            .map(|p| p.key.clone())
    }

    pub fn reset_scores(&mut self) {
        for player in &mut self.players {
            player.score = 0;
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }
}

/// Display names: 1 to 16 characters, no angle brackets, no control characters.
pub fn validate_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return None;
    }
    if name.contains('<') || name.contains('>') || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}

/// Avatars are given as a numeric account id and expanded through the
/// configured URL template. Anything else yields no avatar.
pub fn normalize_avatar(raw: &str, url_template: &str) -> String {
    let id = raw.trim();
    let is_account_id = (5..=12).contains(&id.len()) && id.chars().all(|c| c.is_ascii_digit());
    if is_account_id {
        url_template.replace("{id}", id)
    } else {
        String::new()
    }
}
