use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::chat::{ChatLog, ChatMessage, truncate_message};
use super::elements::{DrawingElement, ElementStore};
use super::players::{JoinOutcome, Player, Roster, normalize_avatar, validate_name};
use super::utils::is_near_miss;
use super::votes::{AbortKind, VotePool, VoteTally};
use super::words::{
    contains_answer, default_pool, sample_words, sanitize_custom_words, word_hint,
};
use crate::config::GameConfig;
use crate::error::RoomError;

pub const ROUND_DURATION_RANGE_SEC: std::ops::RangeInclusive<i64> = 10..=300;
pub const ROUNDS_PER_MATCH_RANGE: std::ops::RangeInclusive<i64> = 1..=20;
const MAX_PLAYER_KEY_LEN: usize = 128;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Choosing,
    Playing,
    Reveal,
}

/// What members of the room need to hear about after an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The snapshot changed; everyone gets a fresh one.
    StateChanged,
    Reveal { word: Option<String> },
    BoardCleared,
    /// Accepted drawing edits, relayed to everyone but the author.
    DrawChange {
        author: Uuid,
        elements: Vec<DrawingElement>,
    },
    Chat(ChatMessage),
    /// A system line meant for one session only.
    Notice {
        session_id: Uuid,
        message: ChatMessage,
    },
    GuessCorrect { by: Uuid, points: u32 },
    SessionReplaced { session_id: Uuid },
}

pub type Effects = Vec<Effect>;

/// Full room state as one viewer is allowed to see it.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub owner_id: Option<Uuid>,
    pub state: Phase,
    pub round: u32,
    pub rounds_per_match: u32,
    pub match_round_index: u32,
    pub round_duration_sec: u32,
    pub drawer_id: Option<Uuid>,
    pub started_at_ms: Option<i64>,
    pub choose_ends_at_ms: Option<i64>,
    pub round_ends_at_ms: Option<i64>,
    pub reveal_ends_at_ms: Option<i64>,
    pub players: Vec<Player>,
    pub word_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_choices: Option<Vec<String>>,
    pub custom_words_count: usize,
    pub abort_votes_count: usize,
    pub abort_votes_needed: usize,
    pub match_abort_votes_count: usize,
    pub match_abort_votes_needed: usize,
    pub server_now_ms: i64,
}

/// The authoritative aggregate of one room. Every operation takes the
/// current wall-clock time explicitly and reports its consequences as
/// [`Effect`]s; nothing here performs I/O.
#[derive(Debug)]
pub struct Room {
    code: String,
    config: Arc<GameConfig>,
    phase: Phase,
    owner_key: Option<String>,
    drawer_key: Option<String>,
    last_drawer_key: Option<String>,
    round: u32,
    rounds_per_match: u32,
    match_round_index: u32,
    round_duration_sec: u32,
    word: Option<String>,
    word_choices: Vec<String>,
    custom_words: Vec<String>,
    started_at_ms: Option<i64>,
    choose_ends_at_ms: Option<i64>,
    round_ends_at_ms: Option<i64>,
    reveal_ends_at_ms: Option<i64>,
    correct_guessers: HashSet<String>,
    round_votes: VotePool,
    match_votes: VotePool,
    roster: Roster,
    elements: ElementStore,
    chat: ChatLog,
}

impl Room {
    pub fn new(code: String, config: Arc<GameConfig>) -> Self {
        Self {
            code,
            phase: Phase::Lobby,
            owner_key: None,
            drawer_key: None,
            last_drawer_key: None,
            round: 0,
            rounds_per_match: config.rounds_per_match,
            match_round_index: 0,
            round_duration_sec: config.round_duration_sec,
            word: None,
            word_choices: Vec::new(),
            custom_words: Vec::new(),
            started_at_ms: None,
            choose_ends_at_ms: None,
            round_ends_at_ms: None,
            reveal_ends_at_ms: None,
            correct_guessers: HashSet::new(),
            round_votes: VotePool::default(),
            match_votes: VotePool::default(),
            roster: Roster::default(),
            elements: ElementStore::new(config.max_elements),
            chat: ChatLog::new(config.chat_history_limit),
            config,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn elements(&self) -> &ElementStore {
        &self.elements
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn connected_count(&self) -> usize {
        self.roster.connected_count()
    }

    /// The pending phase deadline, if the current phase has one.
    pub fn next_deadline(&self) -> Option<(Phase, i64)> {
        let deadline = match self.phase {
            Phase::Lobby => None,
            Phase::Choosing => self.choose_ends_at_ms,
            Phase::Playing => self.round_ends_at_ms,
            Phase::Reveal => self.reveal_ends_at_ms,
        };
        deadline.map(|at| (self.phase, at))
    }

    pub fn has_active_timer(&self) -> bool {
        self.next_deadline().is_some()
    }

    // --- Player sessions ---

    pub fn join(
        &mut self,
        session_id: Uuid,
        name: &str,
        avatar: &str,
        player_key: &str,
        now_ms: i64,
    ) -> Result<Effects, RoomError> {
        let name = validate_name(name).ok_or(RoomError::InvalidPayload)?;
        let avatar = normalize_avatar(avatar, &self.config.avatar_url_template);
        let key = match player_key.trim() {
            "" => session_id.to_string(),
            key if key.len() > MAX_PLAYER_KEY_LEN => return Err(RoomError::InvalidPayload),
            key => key.to_string(),
        };

        let mut effects = Vec::new();

        // A session switching identity gives up the one it held before.
        let previous_key = self.roster.by_session(session_id).map(|p| p.key.clone());
        if previous_key.is_some_and(|previous| previous != key) {
            self.handle_departure(session_id, now_ms, &mut effects);
        }

        if let JoinOutcome::Reconnected {
            replaced_session: Some(old_session),
        } = self.roster.join(session_id, &key, &name, &avatar)
        {
            effects.push(Effect::SessionReplaced {
                session_id: old_session,
            });
        }

        let owner_present = self
            .owner_key
            .as_deref()
            .is_some_and(|owner| self.roster.is_connected(owner));
        if !owner_present {
            self.owner_key = Some(key);
        }

        effects.push(Effect::StateChanged);
        Ok(effects)
    }

    /// Explicit leave and transport loss are handled the same way: the
    /// player stays on the roster, disconnected.
    pub fn disconnect(&mut self, session_id: Uuid, now_ms: i64) -> Effects {
        let mut effects = Vec::new();
        self.handle_departure(session_id, now_ms, &mut effects);
        effects
    }

    pub fn update_profile(
        &mut self,
        session_id: Uuid,
        name: &str,
        avatar: &str,
    ) -> Result<Effects, RoomError> {
        let name = validate_name(name).ok_or(RoomError::InvalidPayload)?;
        let avatar = normalize_avatar(avatar, &self.config.avatar_url_template);
        let player = self
            .roster
            .by_session_mut(session_id)
            .ok_or(RoomError::NotInRoom)?;
        player.name = name;
        player.avatar = avatar;
        Ok(vec![Effect::StateChanged])
    }

    fn handle_departure(&mut self, session_id: Uuid, now_ms: i64, effects: &mut Effects) {
        let Some(key) = self.roster.disconnect(session_id) else {
            return;
        };
        effects.push(Effect::StateChanged);

        if self.owner_key.as_deref() == Some(key.as_str()) {
            if let Some(successor) = self.roster.first_connected() {
                self.owner_key = Some(successor.key.clone());
            }
        }

        let is_drawer = self.drawer_key.as_deref() == Some(key.as_str());
        match self.phase {
            Phase::Choosing | Phase::Playing if is_drawer => self.enter_reveal(now_ms, effects),
            Phase::Playing => self.reveal_if_all_guessed(now_ms, effects),
            _ => {}
        }
        self.abort_if_quorum_met(now_ms, effects);
    }

    /// Fewer connected players lowers the quorum, so votes already cast may
    /// now be enough.
    fn abort_if_quorum_met(&mut self, now_ms: i64, effects: &mut Effects) {
        let connected = self.roster.connected_count();
        if self.phase != Phase::Lobby && self.match_votes.tally(connected).aborted {
            tracing::info!(room.code = %self.code, "Match abort quorum reached after departure");
            self.reset_match(effects);
            return;
        }
        if matches!(self.phase, Phase::Choosing | Phase::Playing)
            && self.round_votes.tally(connected).aborted
        {
            tracing::info!(room.code = %self.code, "Round abort quorum reached after departure");
            self.enter_reveal(now_ms, effects);
        }
    }

    // --- Room configuration ---

    pub fn set_round_duration(
        &mut self,
        session_id: Uuid,
        duration_sec: i64,
    ) -> Result<Effects, RoomError> {
        self.require_owner(session_id)?;
        if !ROUND_DURATION_RANGE_SEC.contains(&duration_sec) {
            return Err(RoomError::InvalidDuration);
        }
        self.round_duration_sec = duration_sec as u32;

        // A running round keeps its start and adopts the new length.
        if self.phase == Phase::Playing {
            if let Some(started) = self.started_at_ms {
                self.round_ends_at_ms = Some(started + duration_sec * 1000);
            }
        }
        Ok(vec![Effect::StateChanged])
    }

    pub fn set_rounds_per_match(
        &mut self,
        session_id: Uuid,
        rounds: i64,
    ) -> Result<Effects, RoomError> {
        self.require_owner(session_id)?;
        if !ROUNDS_PER_MATCH_RANGE.contains(&rounds) {
            return Err(RoomError::InvalidRounds);
        }
        if self.phase != Phase::Lobby {
            return Err(RoomError::NotInLobby);
        }
        self.rounds_per_match = rounds as u32;
        Ok(vec![Effect::StateChanged])
    }

    pub fn transfer_owner(
        &mut self,
        session_id: Uuid,
        new_owner_id: &str,
    ) -> Result<Effects, RoomError> {
        self.require_owner(session_id)?;
        let target = Uuid::parse_str(new_owner_id.trim()).map_err(|_| RoomError::InvalidTarget)?;
        let target_key = self
            .roster
            .by_session(target)
            .map(|p| p.key.clone())
            .ok_or(RoomError::InvalidTarget)?;
        self.owner_key = Some(target_key);
        Ok(vec![Effect::StateChanged])
    }

    // --- Round and match flow ---

    pub fn start_match<R: Rng + ?Sized>(
        &mut self,
        session_id: Uuid,
        custom_words: &[String],
        now_ms: i64,
        rng: &mut R,
    ) -> Result<Effects, RoomError> {
        self.require_owner(session_id)?;
        if self.phase != Phase::Lobby {
            return Err(RoomError::NotInLobby);
        }
        let custom_words = sanitize_custom_words(custom_words).ok_or(RoomError::InvalidWords)?;

        self.custom_words = custom_words;
        self.roster.reset_scores();
        self.match_round_index = 0;
        self.match_votes.clear();

        let mut effects = Vec::new();
        self.enter_choosing(now_ms, rng, &mut effects);
        Ok(effects)
    }

    pub fn choose_word(
        &mut self,
        session_id: Uuid,
        word: &str,
        now_ms: i64,
    ) -> Result<Effects, RoomError> {
        let key = self.require_player(session_id)?.key.clone();
        if self.phase != Phase::Choosing {
            return Err(RoomError::WrongPhase);
        }
        if self.drawer_key.as_deref() != Some(key.as_str()) {
            return Err(RoomError::OnlyDrawer);
        }
        let word = word.trim();
        if word.is_empty() || !self.word_choices.iter().any(|choice| choice == word) {
            return Err(RoomError::ChooseNotAllowed);
        }

        let mut effects = Vec::new();
        self.start_playing(word.to_string(), now_ms, &mut effects);
        Ok(effects)
    }

    /// Fires whichever phase deadline has passed. Calls that arrive early or
    /// after the phase already moved on change nothing.
    pub fn on_timer<R: Rng + ?Sized>(&mut self, now_ms: i64, rng: &mut R) -> Effects {
        let mut effects = Vec::new();
        let Some((phase, deadline)) = self.next_deadline() else {
            return effects;
        };
        if now_ms < deadline {
            return effects;
        }

        match phase {
            Phase::Choosing => {
                let word = self
                    .word_choices
                    .first()
                    .cloned()
                    .or_else(|| sample_words(&default_pool(), 1, rng).pop());
                match word {
                    Some(word) => self.start_playing(word, now_ms, &mut effects),
                    None => self.enter_reveal(now_ms, &mut effects),
                }
            }
            Phase::Playing => self.enter_reveal(now_ms, &mut effects),
            Phase::Reveal => {
                if self.match_round_index < self.rounds_per_match {
                    self.enter_choosing(now_ms, rng, &mut effects);
                } else {
                    tracing::info!(room.code = %self.code, "Match finished");
                    self.enter_lobby(&mut effects);
                }
            }
            Phase::Lobby => {}
        }
        effects
    }

    fn enter_choosing<R: Rng + ?Sized>(&mut self, now_ms: i64, rng: &mut R, effects: &mut Effects) {
        self.elements.clear();
        effects.push(Effect::BoardCleared);
        self.correct_guessers.clear();
        self.round_votes.clear();
        self.word = None;
        self.started_at_ms = None;
        self.round_ends_at_ms = None;
        self.reveal_ends_at_ms = None;

        let Some(drawer) = self
            .roster
            .next_connected_after(self.last_drawer_key.as_deref())
        else {
            tracing::info!(room.code = %self.code, "No connected players left, returning to lobby");
            self.enter_lobby(effects);
            return;
        };

        self.word_choices = sample_words(&self.effective_pool(), self.config.word_choices_count, rng);
        self.drawer_key = Some(drawer);
        self.round += 1;
        self.match_round_index += 1;
        self.phase = Phase::Choosing;
        self.choose_ends_at_ms = Some(now_ms + i64::from(self.config.choose_duration_sec) * 1000);
        effects.push(Effect::StateChanged);
    }

    fn start_playing(&mut self, word: String, now_ms: i64, effects: &mut Effects) {
        self.phase = Phase::Playing;
        self.word = Some(word);
        self.word_choices.clear();
        self.choose_ends_at_ms = None;
        self.started_at_ms = Some(now_ms);
        self.round_ends_at_ms = Some(now_ms + i64::from(self.round_duration_sec) * 1000);
        self.reveal_ends_at_ms = None;
        self.correct_guessers.clear();
        effects.push(Effect::StateChanged);
    }

    fn enter_reveal(&mut self, now_ms: i64, effects: &mut Effects) {
        self.phase = Phase::Reveal;
        self.choose_ends_at_ms = None;
        self.round_ends_at_ms = None;
        self.started_at_ms = None;
        self.reveal_ends_at_ms = Some(now_ms + i64::from(self.config.reveal_duration_sec) * 1000);
        self.word_choices.clear();
        self.round_votes.clear();
        if let Some(drawer) = self.drawer_key.take() {
            self.last_drawer_key = Some(drawer);
        }
        effects.push(Effect::Reveal {
            word: self.word.clone(),
        });
        effects.push(Effect::StateChanged);
    }

    fn enter_lobby(&mut self, effects: &mut Effects) {
        self.phase = Phase::Lobby;
        self.word = None;
        self.word_choices.clear();
        self.started_at_ms = None;
        self.choose_ends_at_ms = None;
        self.round_ends_at_ms = None;
        self.reveal_ends_at_ms = None;
        if let Some(drawer) = self.drawer_key.take() {
            self.last_drawer_key = Some(drawer);
        }
        self.correct_guessers.clear();
        self.round_votes.clear();
        self.match_votes.clear();
        effects.push(Effect::StateChanged);
    }

    fn effective_pool(&self) -> Vec<String> {
        if !self.custom_words.is_empty() {
            self.custom_words.clone()
        } else if !self.config.word_pool.is_empty() {
            self.config.word_pool.clone()
        } else {
            default_pool()
        }
    }

    // --- Aborts ---

    pub fn abort_round(&mut self, session_id: Uuid, now_ms: i64) -> Result<Effects, RoomError> {
        self.require_owner(session_id)?;
        if !matches!(self.phase, Phase::Choosing | Phase::Playing) {
            return Err(RoomError::WrongPhase);
        }
        let mut effects = Vec::new();
        self.enter_reveal(now_ms, &mut effects);
        Ok(effects)
    }

    pub fn abort_match(&mut self, session_id: Uuid) -> Result<Effects, RoomError> {
        self.require_owner(session_id)?;
        let mut effects = Vec::new();
        self.reset_match(&mut effects);
        Ok(effects)
    }

    pub fn vote_abort(
        &mut self,
        kind: AbortKind,
        session_id: Uuid,
        now_ms: i64,
    ) -> Result<(VoteTally, Effects), RoomError> {
        let key = self.require_player(session_id)?.key.clone();
        let phase_allows = match kind {
            AbortKind::Round => matches!(self.phase, Phase::Choosing | Phase::Playing),
            AbortKind::Match => self.phase != Phase::Lobby,
        };
        if !phase_allows {
            return Err(RoomError::WrongPhase);
        }

        let connected = self.roster.connected_count();
        let pool = match kind {
            AbortKind::Round => &mut self.round_votes,
            AbortKind::Match => &mut self.match_votes,
        };
        if !pool.cast(&key) {
            tracing::debug!(room.code = %self.code, ?kind, "Duplicate abort vote ignored");
        }
        let tally = pool.tally(connected);

        let mut effects = Vec::new();
        if tally.aborted {
            tracing::info!(room.code = %self.code, ?kind, votes = tally.votes, "Abort quorum reached");
            match kind {
                AbortKind::Round => self.enter_reveal(now_ms, &mut effects),
                AbortKind::Match => self.reset_match(&mut effects),
            }
        } else {
            effects.push(Effect::StateChanged);
        }
        Ok((tally, effects))
    }

    fn reset_match(&mut self, effects: &mut Effects) {
        self.elements.clear();
        effects.push(Effect::BoardCleared);
        self.roster.reset_scores();
        self.match_round_index = 0;
        self.enter_lobby(effects);
    }

    // --- Drawing ---

    pub fn draw_change(
        &mut self,
        session_id: Uuid,
        elements: Vec<DrawingElement>,
    ) -> Result<Effects, RoomError> {
        self.require_drawer_playing(session_id)?;
        let accepted = self.elements.apply_local_change(elements);
        Ok(Self::relay_accepted(session_id, accepted))
    }

    pub fn draw_sync(
        &mut self,
        session_id: Uuid,
        elements: Vec<DrawingElement>,
    ) -> Result<Effects, RoomError> {
        self.require_drawer_playing(session_id)?;
        let accepted = self.elements.apply_remote_merge(elements);
        Ok(Self::relay_accepted(session_id, accepted))
    }

    pub fn draw_clear(&mut self, session_id: Uuid) -> Result<Effects, RoomError> {
        self.require_drawer_playing(session_id)?;
        self.elements.clear();
        Ok(vec![Effect::BoardCleared])
    }

    fn relay_accepted(author: Uuid, accepted: Vec<DrawingElement>) -> Effects {
        if accepted.is_empty() {
            return Vec::new();
        }
        vec![Effect::DrawChange {
            author,
            elements: accepted,
        }]
    }

    // --- Chat and guesses ---

    pub fn submit_guess(
        &mut self,
        session_id: Uuid,
        text: &str,
        now_ms: i64,
    ) -> Result<Effects, RoomError> {
        let (key, name) = {
            let player = self.require_player(session_id)?;
            (player.key.clone(), player.name.clone())
        };
        let text = truncate_message(text);
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let is_drawer = self.drawer_key.as_deref() == Some(key.as_str());
        let already_guessed = self.correct_guessers.contains(&key);
        let mut effects = Vec::new();

        if let Some(word) = self.word.clone() {
            let hits_answer = contains_answer(&text, &word);
            if hits_answer && is_drawer && matches!(self.phase, Phase::Choosing | Phase::Playing) {
                effects.push(self.notice(session_id, "The drawer can't send the answer"));
                return Ok(effects);
            }
            if hits_answer && self.phase == Phase::Playing {
                if already_guessed {
                    effects.push(self.notice(session_id, "You already guessed the word"));
                } else {
                    self.award_correct_guess(session_id, &key, &name, now_ms, &mut effects);
                }
                return Ok(effects);
            }
        }

        let message = ChatMessage {
            room_code: self.code.clone(),
            from: session_id.to_string(),
            text,
        };
        self.chat.push(message.clone());
        effects.push(Effect::Chat(message.clone()));

        let can_still_guess = self.phase == Phase::Playing && !is_drawer && !already_guessed;
        if can_still_guess {
            if let Some(word) = self.word.as_deref() {
                if is_near_miss(word, &message.text) {
                    let hint = format!("\"{}\" is close!", message.text);
                    effects.push(self.notice(session_id, hint));
                }
            }
        }
        Ok(effects)
    }

    fn award_correct_guess(
        &mut self,
        session_id: Uuid,
        key: &str,
        name: &str,
        now_ms: i64,
        effects: &mut Effects,
    ) {
        self.correct_guessers.insert(key.to_string());
        let points = self.guess_points(now_ms);

        if let Some(player) = self.roster.by_key_mut(key) {
            player.score = player.score.saturating_add(points);
        }
        let drawer_bonus = self.config.drawer_bonus;
        if let Some(drawer_key) = self.drawer_key.clone() {
            if let Some(drawer) = self.roster.by_key_mut(&drawer_key) {
                drawer.score = drawer.score.saturating_add(drawer_bonus);
            }
        }

        tracing::info!(room.code = %self.code, session.id = %session_id, points, "Correct guess");
        effects.push(Effect::GuessCorrect {
            by: session_id,
            points,
        });
        let announcement = ChatMessage::system(&self.code, format!("{name} guessed the word!"));
        self.chat.push(announcement.clone());
        effects.push(Effect::Chat(announcement));
        effects.push(Effect::StateChanged);

        self.reveal_if_all_guessed(now_ms, effects);
    }

    /// Guesser points fall linearly from the maximum at round start to the
    /// minimum at the deadline.
    fn guess_points(&self, now_ms: i64) -> u32 {
        let total_ms = i64::from(self.round_duration_sec) * 1000;
        let remaining_ms = self
            .round_ends_at_ms
            .map(|ends| (ends - now_ms).clamp(0, total_ms))
            .unwrap_or(0);
        let min = u64::from(self.config.guess_points_min);
        let span = u64::from(self.config.guess_points_max.saturating_sub(self.config.guess_points_min));
        if total_ms <= 0 {
            return min as u32;
        }
        let bonus = (span * remaining_ms as u64).div_ceil(total_ms as u64);
        (min + bonus) as u32
    }

    fn reveal_if_all_guessed(&mut self, now_ms: i64, effects: &mut Effects) {
        if self.phase != Phase::Playing {
            return;
        }
        let Some(drawer) = self.drawer_key.as_deref() else {
            return;
        };
        let everyone_guessed = {
            let mut guessers = self
                .roster
                .connected_keys()
                .filter(|key| *key != drawer)
                .peekable();
            guessers.peek().is_some() && guessers.all(|key| self.correct_guessers.contains(key))
        };
        if everyone_guessed {
            tracing::info!(room.code = %self.code, "Every guesser found the word, revealing early");
            self.enter_reveal(now_ms, effects);
        }
    }

    fn notice(&self, session_id: Uuid, text: impl Into<String>) -> Effect {
        Effect::Notice {
            session_id,
            message: ChatMessage::system(&self.code, text),
        }
    }

    // --- Views ---

    pub fn snapshot(&self, viewer: Option<Uuid>, now_ms: i64) -> RoomSnapshot {
        let viewer_is_drawer = match (viewer, self.drawer_key.as_deref()) {
            (Some(session), Some(drawer)) => self
                .roster
                .by_session(session)
                .is_some_and(|p| p.key == drawer),
            _ => false,
        };

        let word = match self.phase {
            Phase::Reveal => self.word.clone(),
            _ if viewer_is_drawer => self.word.clone(),
            _ => None,
        };
        let word_choices = (self.phase == Phase::Choosing && viewer_is_drawer)
            .then(|| self.word_choices.clone());
        let word_hint = match self.phase {
            Phase::Playing => self.word.as_deref().map(word_hint),
            _ => None,
        };
        let session_of = |key: Option<&str>| key.and_then(|k| self.roster.by_key(k)).map(|p| p.id);
        let connected = self.roster.connected_count();
        let round_tally = self.round_votes.tally(connected);
        let match_tally = self.match_votes.tally(connected);

        RoomSnapshot {
            code: self.code.clone(),
            owner_id: session_of(self.owner_key.as_deref()),
            state: self.phase,
            round: self.round,
            rounds_per_match: self.rounds_per_match,
            match_round_index: self.match_round_index,
            round_duration_sec: self.round_duration_sec,
            drawer_id: session_of(self.drawer_key.as_deref()),
            started_at_ms: self.started_at_ms,
            choose_ends_at_ms: self.choose_ends_at_ms,
            round_ends_at_ms: self.round_ends_at_ms,
            reveal_ends_at_ms: self.reveal_ends_at_ms,
            players: self.roster.players().to_vec(),
            word_hint,
            word,
            word_choices,
            custom_words_count: self.custom_words.len(),
            abort_votes_count: round_tally.votes,
            abort_votes_needed: round_tally.needed,
            match_abort_votes_count: match_tally.votes,
            match_abort_votes_needed: match_tally.needed,
            server_now_ms: now_ms,
        }
    }

    // --- Guards ---

    fn require_player(&self, session_id: Uuid) -> Result<&Player, RoomError> {
        self.roster.by_session(session_id).ok_or(RoomError::NotInRoom)
    }

    fn require_owner(&self, session_id: Uuid) -> Result<(), RoomError> {
        let player = self.require_player(session_id)?;
        if self.owner_key.as_deref() == Some(player.key.as_str()) {
            Ok(())
        } else {
            Err(RoomError::OnlyOwner)
        }
    }

    fn require_drawer_playing(&self, session_id: Uuid) -> Result<(), RoomError> {
        let player = self.require_player(session_id)?;
        if self.phase == Phase::Playing && self.drawer_key.as_deref() == Some(player.key.as_str()) {
            Ok(())
        } else {
            Err(RoomError::OnlyDrawer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::Map as JsonMap;

    const T0: i64 = 1_700_000_000_000;

    fn test_config() -> Arc<GameConfig> {
        Arc::new(GameConfig::default())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    /// Builds a room with `count` connected players; the first one owns it.
    fn room_with_players(count: usize) -> (Room, Vec<Uuid>) {
        let mut room = Room::new("ABCDEF".to_string(), test_config());
        let sessions: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
        for (i, session) in sessions.iter().enumerate() {
            room.join(*session, &format!("P{i}"), "", &format!("key-{i}"), T0)
                .unwrap();
        }
        (room, sessions)
    }

    fn assert_timer_invariant(room: &Room) {
        let snap = room.snapshot(None, T0);
        let set = [
            snap.choose_ends_at_ms.is_some(),
            snap.round_ends_at_ms.is_some(),
            snap.reveal_ends_at_ms.is_some(),
        ];
        let expected = match room.phase() {
            Phase::Lobby => [false, false, false],
            Phase::Choosing => [true, false, false],
            Phase::Playing => [false, true, false],
            Phase::Reveal => [false, false, true],
        };
        assert_eq!(set, expected, "timer fields do not match phase {:?}", room.phase());
    }

    fn drawer_session(room: &Room) -> Uuid {
        room.snapshot(None, T0).drawer_id.expect("room has a drawer")
    }

    /// Starts a match and lets the drawer pick the first offered word.
    fn start_playing(room: &mut Room, owner: Uuid) -> (Uuid, String) {
        room.start_match(owner, &[], T0, &mut rng()).unwrap();
        let drawer = drawer_session(room);
        let word = room.snapshot(Some(drawer), T0).word_choices.unwrap()[0].clone();
        room.choose_word(drawer, &word, T0).unwrap();
        (drawer, word)
    }

    fn element(id: &str, version: u64, nonce: i64) -> DrawingElement {
        DrawingElement {
            id: id.to_string(),
            version,
            version_nonce: nonce,
            payload: JsonMap::new(),
        }
    }

    #[test]
    fn test_first_joiner_owns_the_room() {
        let (room, sessions) = room_with_players(2);
        let snap = room.snapshot(None, T0);
        assert_eq!(snap.owner_id, Some(sessions[0]));
        assert_eq!(snap.players.len(), 2);
        assert_timer_invariant(&room);
    }

    #[test]
    fn test_join_rejects_bad_names() {
        let mut room = Room::new("ABCDEF".to_string(), test_config());
        let result = room.join(Uuid::new_v4(), "<b>", "", "k", T0);
        assert_eq!(result, Err(RoomError::InvalidPayload));
    }

    #[test]
    fn test_reconnect_never_duplicates_and_keeps_score() {
        let (mut room, sessions) = room_with_players(2);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guesser = if drawer == sessions[0] { sessions[1] } else { sessions[0] };
        room.submit_guess(guesser, &word, T0 + 1000).unwrap();
        let score_before = room
            .snapshot(None, T0)
            .players
            .iter()
            .find(|p| p.id == guesser)
            .unwrap()
            .score;
        assert!(score_before > 0);

        room.disconnect(guesser, T0 + 2000);
        let new_session = Uuid::new_v4();
        let guesser_key = if guesser == sessions[0] { "key-0" } else { "key-1" };
        let effects = room
            .join(new_session, "Back", "", guesser_key, T0 + 3000)
            .unwrap();

        let snap = room.snapshot(None, T0);
        assert_eq!(snap.players.len(), 2);
        let player = snap.players.iter().find(|p| p.id == new_session).unwrap();
        assert_eq!(player.score, score_before);
        assert!(player.connected);
        assert!(effects.contains(&Effect::SessionReplaced { session_id: guesser }));
    }

    #[test]
    fn test_round_duration_bounds() {
        let (mut room, sessions) = room_with_players(1);
        let owner = sessions[0];
        assert_eq!(room.set_round_duration(owner, 9), Err(RoomError::InvalidDuration));
        assert_eq!(room.set_round_duration(owner, 301), Err(RoomError::InvalidDuration));
        assert!(room.set_round_duration(owner, 10).is_ok());
        assert!(room.set_round_duration(owner, 300).is_ok());
        assert_eq!(room.snapshot(None, T0).round_duration_sec, 300);
    }

    #[test]
    fn test_owner_only_configuration() {
        let (mut room, sessions) = room_with_players(2);
        assert_eq!(room.set_round_duration(sessions[1], 60), Err(RoomError::OnlyOwner));
        assert_eq!(room.set_rounds_per_match(sessions[1], 5), Err(RoomError::OnlyOwner));
        assert_eq!(room.set_rounds_per_match(sessions[0], 0), Err(RoomError::InvalidRounds));
        assert_eq!(room.set_rounds_per_match(sessions[0], 21), Err(RoomError::InvalidRounds));
        assert!(room.set_rounds_per_match(sessions[0], 20).is_ok());

        room.start_match(sessions[0], &[], T0, &mut rng()).unwrap();
        assert_eq!(room.set_rounds_per_match(sessions[0], 5), Err(RoomError::NotInLobby));
    }

    #[test]
    fn test_round_duration_change_moves_running_deadline() {
        let (mut room, sessions) = room_with_players(2);
        start_playing(&mut room, sessions[0]);
        room.set_round_duration(sessions[0], 120).unwrap();
        assert_eq!(room.snapshot(None, T0).round_ends_at_ms, Some(T0 + 120_000));
    }

    #[test]
    fn test_transfer_owner_requires_connected_target() {
        let (mut room, sessions) = room_with_players(3);
        assert_eq!(
            room.transfer_owner(sessions[0], "not-a-uuid"),
            Err(RoomError::InvalidTarget)
        );
        room.disconnect(sessions[2], T0);
        assert_eq!(
            room.transfer_owner(sessions[0], &sessions[2].to_string()),
            Err(RoomError::InvalidTarget)
        );
        room.transfer_owner(sessions[0], &sessions[1].to_string()).unwrap();
        assert_eq!(room.snapshot(None, T0).owner_id, Some(sessions[1]));
        assert_eq!(
            room.transfer_owner(sessions[0], &sessions[0].to_string()),
            Err(RoomError::OnlyOwner)
        );
    }

    #[test]
    fn test_owner_disconnect_hands_over_ownership() {
        let (mut room, sessions) = room_with_players(2);
        room.disconnect(sessions[0], T0);
        assert_eq!(room.snapshot(None, T0).owner_id, Some(sessions[1]));
    }

    #[test]
    fn test_solo_choose_timeout_picks_first_word() {
        let (mut room, sessions) = room_with_players(1);
        room.start_match(sessions[0], &[], T0, &mut rng()).unwrap();
        assert_eq!(room.phase(), Phase::Choosing);
        assert_timer_invariant(&room);
        let first_choice = room.snapshot(Some(sessions[0]), T0).word_choices.unwrap()[0].clone();

        let choose_ends = room.snapshot(None, T0).choose_ends_at_ms.unwrap();
        assert!(room.on_timer(choose_ends - 1, &mut rng()).is_empty());

        room.on_timer(choose_ends, &mut rng());
        assert_eq!(room.phase(), Phase::Playing);
        assert_timer_invariant(&room);
        let snap = room.snapshot(Some(sessions[0]), choose_ends);
        assert_eq!(snap.word, Some(first_choice));
        assert_eq!(snap.round_ends_at_ms, Some(choose_ends + 60_000));
    }

    #[test]
    fn test_choose_word_rules() {
        let (mut room, sessions) = room_with_players(2);
        room.start_match(sessions[0], &[], T0, &mut rng()).unwrap();
        let drawer = drawer_session(&room);
        let other = if drawer == sessions[0] { sessions[1] } else { sessions[0] };
        let choice = room.snapshot(Some(drawer), T0).word_choices.unwrap()[0].clone();

        assert_eq!(room.choose_word(other, &choice, T0), Err(RoomError::OnlyDrawer));
        assert_eq!(
            room.choose_word(drawer, "definitely not offered", T0),
            Err(RoomError::ChooseNotAllowed)
        );
        room.choose_word(drawer, &choice, T0).unwrap();
        assert_eq!(room.choose_word(drawer, &choice, T0), Err(RoomError::WrongPhase));
    }

    #[test]
    fn test_custom_words_replace_default_pool() {
        let (mut room, sessions) = room_with_players(1);
        let custom = vec!["alpha".to_string(), "beta".to_string()];
        room.start_match(sessions[0], &custom, T0, &mut rng()).unwrap();
        let mut choices = room.snapshot(Some(sessions[0]), T0).word_choices.unwrap();
        choices.sort();
        assert_eq!(choices, custom);
    }

    #[test]
    fn test_word_is_hidden_from_guessers_until_reveal() {
        let (mut room, sessions) = room_with_players(2);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guesser = if drawer == sessions[0] { sessions[1] } else { sessions[0] };

        let guesser_view = room.snapshot(Some(guesser), T0);
        assert_eq!(guesser_view.word, None);
        assert_eq!(guesser_view.word_hint.as_ref().map(|h| h.chars().count()), Some(word.chars().count()));
        assert_eq!(room.snapshot(Some(drawer), T0).word, Some(word.clone()));

        room.abort_round(sessions[0], T0 + 5000).unwrap();
        let revealed = room.snapshot(Some(guesser), T0 + 5000);
        assert_eq!(revealed.word, Some(word));
        assert_eq!(revealed.word_hint, None);
        assert_eq!(revealed.drawer_id, None);
        assert_timer_invariant(&room);
    }

    #[test]
    fn test_quorum_needs_four_of_five() {
        let (mut room, sessions) = room_with_players(5);
        start_playing(&mut room, sessions[0]);

        for session in &sessions[..3] {
            let (tally, _) = room.vote_abort(AbortKind::Round, *session, T0).unwrap();
            assert!(!tally.aborted);
        }
        // Re-voting does not count twice.
        let (tally, _) = room.vote_abort(AbortKind::Round, sessions[0], T0).unwrap();
        assert_eq!(tally.votes, 3);
        assert_eq!(room.phase(), Phase::Playing);

        let (tally, effects) = room.vote_abort(AbortKind::Round, sessions[3], T0).unwrap();
        assert!(tally.aborted);
        assert_eq!(room.phase(), Phase::Reveal);
        assert!(effects.iter().any(|e| matches!(e, Effect::Reveal { .. })));
        assert_eq!(room.snapshot(None, T0).abort_votes_count, 0);
    }

    #[test]
    fn test_departure_that_lowers_quorum_aborts_round() {
        let (mut room, sessions) = room_with_players(5);
        let (drawer, _) = start_playing(&mut room, sessions[0]);
        let guessers: Vec<Uuid> = sessions.iter().copied().filter(|s| *s != drawer).collect();

        for session in [drawer, guessers[0], guessers[1]] {
            room.vote_abort(AbortKind::Round, session, T0).unwrap();
        }
        assert_eq!(room.phase(), Phase::Playing);

        let effects = room.disconnect(guessers[3], T0 + 1000);
        assert_eq!(room.phase(), Phase::Reveal);
        assert!(effects.iter().any(|e| matches!(e, Effect::Reveal { .. })));
        assert_eq!(room.snapshot(None, T0).abort_votes_count, 0);
    }

    #[test]
    fn test_departure_that_lowers_quorum_aborts_match() {
        let (mut room, sessions) = room_with_players(5);
        start_playing(&mut room, sessions[0]);
        for session in &sessions[..3] {
            room.vote_abort(AbortKind::Match, *session, T0).unwrap();
        }
        assert_ne!(room.phase(), Phase::Lobby);

        room.disconnect(sessions[4], T0 + 1000);
        assert_eq!(room.phase(), Phase::Lobby);
        assert_eq!(room.snapshot(None, T0).match_abort_votes_count, 0);
    }

    #[test]
    fn test_disconnect_keeps_cast_votes() {
        let (mut room, sessions) = room_with_players(5);
        let (drawer, _) = start_playing(&mut room, sessions[0]);
        let voter = sessions.iter().copied().find(|s| *s != drawer).unwrap();
        room.vote_abort(AbortKind::Round, voter, T0).unwrap();

        room.disconnect(voter, T0 + 1000);

        let snap = room.snapshot(None, T0 + 1000);
        assert_eq!(room.phase(), Phase::Playing);
        assert_eq!(snap.abort_votes_count, 1);
        assert_eq!(snap.abort_votes_needed, 3);
    }

    #[test]
    fn test_round_votes_rejected_outside_rounds() {
        let (mut room, sessions) = room_with_players(2);
        assert_eq!(
            room.vote_abort(AbortKind::Round, sessions[1], T0).map(|(t, _)| t),
            Err(RoomError::WrongPhase)
        );
        assert_eq!(
            room.vote_abort(AbortKind::Match, sessions[1], T0).map(|(t, _)| t),
            Err(RoomError::WrongPhase)
        );
    }

    #[test]
    fn test_match_abort_quorum_resets_to_lobby() {
        let (mut room, sessions) = room_with_players(3);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guesser = sessions.iter().copied().find(|s| *s != drawer).unwrap();
        room.submit_guess(guesser, &word, T0 + 1000).unwrap();
        room.draw_change(drawer, vec![element("a", 1, 1)]).ok();

        room.vote_abort(AbortKind::Match, sessions[1], T0).unwrap();
        let (tally, effects) = room.vote_abort(AbortKind::Match, sessions[2], T0).unwrap();

        assert!(tally.aborted);
        assert!(effects.contains(&Effect::BoardCleared));
        assert_eq!(room.phase(), Phase::Lobby);
        assert_timer_invariant(&room);
        let snap = room.snapshot(None, T0);
        assert!(snap.players.iter().all(|p| p.score == 0));
        assert_eq!(snap.match_round_index, 0);
        assert_eq!(snap.match_abort_votes_count, 0);
        assert!(room.elements().is_empty());
    }

    #[test]
    fn test_all_guessers_correct_reveals_early() {
        let (mut room, sessions) = room_with_players(3);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guessers: Vec<Uuid> = sessions.iter().copied().filter(|s| *s != drawer).collect();

        room.submit_guess(guessers[0], &word, T0 + 1000).unwrap();
        assert_eq!(room.phase(), Phase::Playing);

        let effects = room
            .submit_guess(guessers[1], &format!("is it {word}?"), T0 + 2000)
            .unwrap();
        assert_eq!(room.phase(), Phase::Reveal);
        assert!(effects.contains(&Effect::Reveal { word: Some(word) }));
        assert_timer_invariant(&room);
    }

    #[test]
    fn test_correct_guess_scores_once_and_is_not_relayed() {
        let (mut room, sessions) = room_with_players(3);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guesser = sessions.iter().copied().find(|s| *s != drawer).unwrap();

        let effects = room.submit_guess(guesser, &word, T0).unwrap();
        assert!(effects.contains(&Effect::GuessCorrect { by: guesser, points: 100 }));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Chat(m) if m.from == guesser.to_string())));

        let again = room.submit_guess(guesser, &word, T0 + 1000).unwrap();
        assert!(matches!(again.as_slice(), [Effect::Notice { .. }]));

        let snap = room.snapshot(None, T0);
        let score_of = |id: Uuid| snap.players.iter().find(|p| p.id == id).unwrap().score;
        assert_eq!(score_of(guesser), 100);
        assert_eq!(score_of(drawer), 25);
    }

    #[test]
    fn test_guess_points_decay_with_time() {
        let (mut room, sessions) = room_with_players(3);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guesser = sessions.iter().copied().find(|s| *s != drawer).unwrap();

        let effects = room.submit_guess(guesser, &word, T0 + 30_000).unwrap();
        assert!(effects.contains(&Effect::GuessCorrect { by: guesser, points: 60 }));
    }

    #[test]
    fn test_drawer_cannot_leak_answer() {
        let (mut room, sessions) = room_with_players(2);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let effects = room.submit_guess(drawer, &word, T0).unwrap();
        assert!(matches!(effects.as_slice(), [Effect::Notice { session_id, .. }] if *session_id == drawer));
        assert_eq!(room.chat().len(), 0);
    }

    #[test]
    fn test_ordinary_chat_is_relayed_and_kept() {
        let (mut room, sessions) = room_with_players(2);
        let effects = room.submit_guess(sessions[1], "hello there", T0).unwrap();
        assert!(matches!(effects.as_slice(), [Effect::Chat(m)] if m.text == "hello there"));
        assert_eq!(room.chat().history().len(), 1);
        assert_eq!(room.submit_guess(Uuid::new_v4(), "hi", T0), Err(RoomError::NotInRoom));
    }

    #[test]
    fn test_only_drawer_may_draw_while_playing() {
        let (mut room, sessions) = room_with_players(2);
        let (drawer, _) = start_playing(&mut room, sessions[0]);
        let other = sessions.iter().copied().find(|s| *s != drawer).unwrap();

        assert_eq!(
            room.draw_change(other, vec![element("x", 1, 0)]),
            Err(RoomError::OnlyDrawer)
        );
        let effects = room.draw_change(drawer, vec![element("a", 1, 5)]).unwrap();
        assert_eq!(effects.len(), 1);

        let stale = room.draw_change(drawer, vec![element("a", 1, 3)]).unwrap();
        assert!(stale.is_empty());
        assert_eq!(room.elements().get("a").unwrap().version_nonce, 5);

        assert_eq!(room.draw_clear(other), Err(RoomError::OnlyDrawer));
        assert_eq!(room.draw_clear(drawer).unwrap(), vec![Effect::BoardCleared]);
        assert!(room.elements().is_empty());
    }

    #[test]
    fn test_drawer_disconnect_ends_round() {
        let (mut room, sessions) = room_with_players(3);
        let (drawer, _) = start_playing(&mut room, sessions[0]);
        room.disconnect(drawer, T0 + 1000);
        assert_eq!(room.phase(), Phase::Reveal);
        assert_eq!(room.snapshot(None, T0).drawer_id, None);
        assert_timer_invariant(&room);
    }

    #[test]
    fn test_match_runs_its_rounds_then_returns_to_lobby() {
        let (mut room, sessions) = room_with_players(2);
        room.set_rounds_per_match(sessions[0], 2).unwrap();
        let mut rng = rng();
        room.start_match(sessions[0], &[], T0, &mut rng).unwrap();
        let first_drawer = drawer_session(&room);

        let mut now = T0;
        // choosing -> playing -> reveal -> choosing (round 2)
        for _ in 0..3 {
            now = room.next_deadline().unwrap().1;
            room.on_timer(now, &mut rng);
            assert_timer_invariant(&room);
        }
        assert_eq!(room.phase(), Phase::Choosing);
        assert_eq!(room.snapshot(None, now).match_round_index, 2);
        assert_ne!(drawer_session(&room), first_drawer);

        for _ in 0..3 {
            now = room.next_deadline().unwrap().1;
            room.on_timer(now, &mut rng);
        }
        assert_eq!(room.phase(), Phase::Lobby);
        assert_timer_invariant(&room);
        assert_eq!(room.snapshot(None, now).round, 2);
    }

    #[test]
    fn test_new_match_resets_scores() {
        let (mut room, sessions) = room_with_players(2);
        let (drawer, word) = start_playing(&mut room, sessions[0]);
        let guesser = sessions.iter().copied().find(|s| *s != drawer).unwrap();
        room.submit_guess(guesser, &word, T0).unwrap();
        room.abort_match(sessions[0]).unwrap();
        assert!(room.snapshot(None, T0).players.iter().all(|p| p.score == 0));
        assert_eq!(room.phase(), Phase::Lobby);
        assert_eq!(room.abort_match(sessions[1]), Err(RoomError::OnlyOwner));
    }

    #[test]
    fn test_stale_timer_call_is_ignored() {
        let (mut room, sessions) = room_with_players(2);
        room.start_match(sessions[0], &[], T0, &mut rng()).unwrap();
        let choose_deadline = room.next_deadline().unwrap().1;
        let drawer = drawer_session(&room);
        let word = room.snapshot(Some(drawer), T0).word_choices.unwrap()[0].clone();
        room.choose_word(drawer, &word, T0 + 1000).unwrap();

        // The old choose deadline passing must not end the fresh round.
        assert!(room.on_timer(choose_deadline, &mut rng()).is_empty());
        assert_eq!(room.phase(), Phase::Playing);
    }
}
