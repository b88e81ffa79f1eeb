use axum::extract::ws;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::dispatch::Sessions;
use crate::error::RoomError;
use crate::game_logic::messages::Ack;
use crate::game_logic::votes::{AbortKind, VoteTally};
use crate::game_logic::{ClientEvent, Effect, Phase, Room, RoomSnapshot, ServerEvent};
use crate::registry::RoomRegistryHandle;

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub name: String,
    pub avatar: String,
    pub player_key: String,
}

#[derive(Debug)]
pub enum RoomActorMessage {
    Join {
        session_id: Uuid,
        session_tx: mpsc::Sender<ws::Message>,
        request: JoinRequest,
        ack_id: Option<JsonValue>,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    ClientEvent {
        session_id: Uuid,
        reply_tx: mpsc::Sender<ws::Message>,
        ack_id: Option<JsonValue>,
        event: ClientEvent,
    },
    SessionClosed {
        session_id: Uuid,
    },
    PhaseTimerFired {
        generation: u64,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

impl RoomActorMessage {
    fn is_client_activity(&self) -> bool {
        matches!(
            self,
            RoomActorMessage::Join { .. } | RoomActorMessage::ClientEvent { .. }
        )
    }
}

/// Wall-clock milliseconds derived from the runtime clock, so deadlines and
/// tokio timers agree even when time is paused in tests.
#[derive(Debug, Clone, Copy)]
struct RoomClock {
    epoch_ms: i64,
    origin: Instant,
}

impl RoomClock {
    fn start() -> Self {
        Self {
            epoch_ms: chrono::Utc::now().timestamp_millis(),
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch_ms + self.origin.elapsed().as_millis() as i64
    }

    fn instant_at(&self, at_ms: i64) -> Instant {
        let offset_ms = (at_ms - self.epoch_ms).max(0) as u64;
        self.origin + StdDuration::from_millis(offset_ms)
    }
}

type EventOutcome = Result<(Option<VoteTally>, Vec<Effect>), RoomError>;

pub struct RoomActor {
    receiver: mpsc::Receiver<RoomActorMessage>,
    self_sender: mpsc::Sender<RoomActorMessage>,
    code: String,
    room: Room,
    sessions: Sessions,
    registry_handle: RoomRegistryHandle,
    config: Arc<GameConfig>,
    clock: RoomClock,
    rng: StdRng,
    phase_timer: Option<JoinHandle<()>>,
    scheduled_deadline: Option<(Phase, i64)>,
    timer_generation: u64,
    last_activity: Instant,
    empty_since: Option<Instant>,
}

impl RoomActor {
    fn new(
        receiver: mpsc::Receiver<RoomActorMessage>,
        self_sender: mpsc::Sender<RoomActorMessage>,
        code: String,
        registry_handle: RoomRegistryHandle,
        config: Arc<GameConfig>,
    ) -> Self {
        RoomActor {
            receiver,
            self_sender,
            room: Room::new(code.clone(), Arc::clone(&config)),
            code,
            sessions: Sessions::default(),
            registry_handle,
            config,
            clock: RoomClock::start(),
            rng: StdRng::from_entropy(),
            phase_timer: None,
            scheduled_deadline: None,
            timer_generation: 0,
            last_activity: Instant::now(),
            empty_since: None,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        room.code = %self.code,
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    fn handle_message(&mut self, msg: RoomActorMessage) {
        match msg {
            RoomActorMessage::Join {
                session_id,
                session_tx,
                request,
                ack_id,
                respond_to,
            } => {
                let result = self.handle_join(session_id, session_tx, request, ack_id);
                let _ = respond_to.send(result);
            }
            RoomActorMessage::ClientEvent {
                session_id,
                reply_tx,
                ack_id,
                event,
            } => self.handle_client_event(session_id, &reply_tx, ack_id, event),
            RoomActorMessage::SessionClosed { session_id } => {
                if self.sessions.detach(session_id) {
                    tracing::debug!(session.id = %session_id, "Session closed");
                    let now_ms = self.clock.now_ms();
                    let effects = self.room.disconnect(session_id, now_ms);
                    self.sessions.dispatch(&self.room, effects, now_ms);
                }
            }
            RoomActorMessage::PhaseTimerFired { generation } => {
                if generation != self.timer_generation {
                    tracing::trace!(generation, "Ignoring superseded phase timer");
                    return;
                }
                self.phase_timer = None;
                self.scheduled_deadline = None;
                tracing::debug!(phase = ?self.room.phase(), "Phase deadline reached");
                let now_ms = self.clock.now_ms();
                let effects = self.room.on_timer(now_ms, &mut self.rng);
                self.sessions.dispatch(&self.room, effects, now_ms);
            }
            RoomActorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.room.snapshot(None, self.clock.now_ms()));
            }
        }

        self.reschedule_phase_timer();
        self.update_presence();
    }

    fn handle_join(
        &mut self,
        session_id: Uuid,
        session_tx: mpsc::Sender<ws::Message>,
        request: JoinRequest,
        ack_id: Option<JsonValue>,
    ) -> Result<(), RoomError> {
        let now_ms = self.clock.now_ms();
        match self.room.join(
            session_id,
            &request.name,
            &request.avatar,
            &request.player_key,
            now_ms,
        ) {
            Ok(effects) => {
                tracing::info!(
                    session.id = %session_id,
                    player.name = %request.name,
                    "Session joined room"
                );
                self.sessions.attach(session_id, session_tx);
                self.reply(session_id, ack_id, Ok(None), false);
                self.sessions.send(
                    session_id,
                    &ServerEvent::DrawSync {
                        room_code: self.code.clone(),
                        elements: self.room.elements().snapshot(),
                    },
                );
                self.sessions.send(
                    session_id,
                    &ServerEvent::ChatSync {
                        room_code: self.code.clone(),
                        messages: self.room.chat().history(),
                    },
                );
                self.sessions.dispatch(&self.room, effects, now_ms);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(session.id = %session_id, error = %e, "Join rejected");
                // The session is not attached yet, so answer on its own channel.
                if let Some(event) = reply_event(ack_id, Err(e), false) {
                    send_on(&session_tx, &event);
                }
                Err(e)
            }
        }
    }

    fn handle_client_event(
        &mut self,
        session_id: Uuid,
        reply_tx: &mpsc::Sender<ws::Message>,
        ack_id: Option<JsonValue>,
        event: ClientEvent,
    ) {
        let is_drawing = event.is_drawing();
        if !self.sessions.contains(session_id) {
            tracing::debug!(
                session.id = %session_id,
                event.name = event.name(),
                "Rejecting event from a session that is not attached"
            );
            if let Some(reply) = reply_event(ack_id, Err(RoomError::NotInRoom), is_drawing) {
                send_on(reply_tx, &reply);
            }
            return;
        }
        tracing::debug!(session.id = %session_id, event.name = event.name(), "Processing client event");

        let now_ms = self.clock.now_ms();
        let leaving = matches!(event, ClientEvent::Leave {});

        let outcome = self.apply_event(session_id, event, now_ms);
        match outcome {
            Ok((votes, effects)) => {
                self.reply(session_id, ack_id, Ok(votes), is_drawing);
                if leaving {
                    self.sessions.detach(session_id);
                }
                self.sessions.dispatch(&self.room, effects, now_ms);
            }
            Err(e) => {
                tracing::debug!(session.id = %session_id, error.code = e.code(), "Event rejected");
                self.reply(session_id, ack_id, Err(e), is_drawing);
            }
        }
    }

    fn apply_event(&mut self, session_id: Uuid, event: ClientEvent, now_ms: i64) -> EventOutcome {
        let room = &mut self.room;
        let plain = |result: Result<Vec<Effect>, RoomError>| result.map(|effects| (None, effects));
        let voted = |result: Result<(VoteTally, Vec<Effect>), RoomError>| {
            result.map(|(tally, effects)| (Some(tally), effects))
        };

        match event {
            ClientEvent::Leave {} => Ok((None, room.disconnect(session_id, now_ms))),
            ClientEvent::UpdateProfile { name, avatar } => {
                plain(room.update_profile(session_id, &name, &avatar))
            }
            ClientEvent::SetRoundDuration { round_duration_sec } => {
                plain(room.set_round_duration(session_id, round_duration_sec))
            }
            ClientEvent::SetRoundsPerMatch { rounds_per_match } => {
                plain(room.set_rounds_per_match(session_id, rounds_per_match))
            }
            ClientEvent::TransferOwner { new_owner_id } => {
                plain(room.transfer_owner(session_id, &new_owner_id))
            }
            ClientEvent::StartMatch { custom_words } => plain(room.start_match(
                session_id,
                &custom_words,
                now_ms,
                &mut self.rng,
            )),
            ClientEvent::ChooseWord { word } => plain(room.choose_word(session_id, &word, now_ms)),
            ClientEvent::AbortRound {} => plain(room.abort_round(session_id, now_ms)),
            ClientEvent::VoteAbortRound {} => {
                voted(room.vote_abort(AbortKind::Round, session_id, now_ms))
            }
            ClientEvent::AbortMatch {} => plain(room.abort_match(session_id)),
            ClientEvent::VoteAbortMatch {} => {
                voted(room.vote_abort(AbortKind::Match, session_id, now_ms))
            }
            ClientEvent::DrawChange { elements } => plain(room.draw_change(session_id, elements)),
            ClientEvent::DrawSync { elements } => plain(room.draw_sync(session_id, elements)),
            ClientEvent::DrawClear {} => plain(room.draw_clear(session_id)),
            ClientEvent::Guess { text } | ClientEvent::Chat { text } => {
                plain(room.submit_guess(session_id, &text, now_ms))
            }
            // Joins carry the session channel and arrive as RoomActorMessage::Join.
            ClientEvent::Join { .. } => Err(RoomError::InvalidPayload),
        }
    }

    fn reply(
        &self,
        session_id: Uuid,
        ack_id: Option<JsonValue>,
        outcome: Result<Option<VoteTally>, RoomError>,
        quiet_on_error: bool,
    ) {
        if let Some(event) = reply_event(ack_id, outcome, quiet_on_error) {
            self.sessions.send(session_id, &event);
        }
    }

    /// Keeps exactly one sleeper task alive for the current phase deadline.
    fn reschedule_phase_timer(&mut self) {
        let deadline = self.room.next_deadline();
        if deadline == self.scheduled_deadline {
            return;
        }
        if let Some(task) = self.phase_timer.take() {
            task.abort();
        }
        self.timer_generation += 1;
        self.scheduled_deadline = deadline;

        let Some((phase, at_ms)) = deadline else {
            return;
        };
        tracing::debug!(?phase, deadline.ms = at_ms, "Scheduling phase timer");
        let generation = self.timer_generation;
        let sender = self.self_sender.clone();
        let wake_at = self.clock.instant_at(at_ms);
        self.phase_timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(wake_at).await;
            let _ = sender
                .send(RoomActorMessage::PhaseTimerFired { generation })
                .await;
        }));
    }

    fn update_presence(&mut self) {
        let has_members = !self.room.roster().players().is_empty();
        if self.room.connected_count() > 0 {
            self.empty_since = None;
        } else if has_members && self.empty_since.is_none() {
            tracing::debug!("Room has no connected players, starting grace period");
            self.empty_since = Some(Instant::now());
        }
    }

    /// A room that emptied out goes after the grace period; any room goes
    /// after a long stretch without client traffic.
    fn eviction_deadline(&self) -> Instant {
        let idle_deadline = self.last_activity + StdDuration::from_secs(self.config.idle_timeout_sec);
        match self.empty_since {
            Some(since) => {
                idle_deadline.min(since + StdDuration::from_secs(self.config.empty_room_grace_sec))
            }
            None => idle_deadline,
        }
    }

    fn broadcast_tick(&self) {
        self.sessions.broadcast(&ServerEvent::Tick {
            room_code: self.code.clone(),
            now_ms: self.clock.now_ms(),
        });
    }
}

/// Acknowledges when the client asked for it; otherwise only failures
/// are reported, except for drawing traffic which is dropped quietly.
fn reply_event(
    ack_id: Option<JsonValue>,
    outcome: Result<Option<VoteTally>, RoomError>,
    quiet_on_error: bool,
) -> Option<ServerEvent> {
    match (ack_id, outcome) {
        (Some(ack_id), Ok(votes)) => Some(ServerEvent::Ack(Ack {
            votes,
            ..Ack::ok(ack_id)
        })),
        (Some(ack_id), Err(e)) => Some(ServerEvent::Ack(Ack::rejected(ack_id, e))),
        (None, Ok(_)) => None,
        (None, Err(_)) if quiet_on_error => None,
        (None, Err(e)) => Some(ServerEvent::error(e)),
    }
}

/// Writes to a session channel the room does not track.
fn send_on(session_tx: &mpsc::Sender<ws::Message>, event: &ServerEvent) {
    match event.to_ws_text() {
        Ok(ws_msg) => {
            if session_tx.try_send(ws_msg).is_err() {
                tracing::debug!("Untracked session outbox unavailable, dropping reply");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize reply"),
    }
}

#[tracing::instrument(skip(actor), fields(room.code = %actor.code))]
pub async fn run_room_actor(mut actor: RoomActor) {
    tracing::info!("Room actor started");

    let mut ticker = tokio::time::interval(StdDuration::from_millis(actor.config.tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let eviction_deadline = actor.eviction_deadline();
        let timer_active = actor.room.has_active_timer();
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if msg.is_client_activity() {
                            actor.last_activity = Instant::now();
                        }
                        actor.handle_message(msg);
                    }
                    None => {
                        tracing::info!("Room actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            _ = ticker.tick(), if timer_active => {
                actor.broadcast_tick();
            }
            _ = tokio::time::sleep_until(eviction_deadline) => {
                tracing::info!(
                    room.sessions = actor.sessions.len(),
                    "Room evicted. Notifying registry"
                );
                if let Err(e) = actor.registry_handle.notify_room_shutdown(actor.code.clone()).await {
                    tracing::error!(error = %e, "Failed to notify registry of room shutdown");
                }
                break;
            }
        }
    }

    if let Some(task) = actor.phase_timer.take() {
        task.abort();
    }
    tracing::info!("Room actor stopped");
}

#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    pub sender: mpsc::Sender<RoomActorMessage>,
    pub code: String,
}

impl RoomActorHandle {
    pub fn spawn(
        code: String,
        buffer_size: usize,
        registry_handle: RoomRegistryHandle,
        config: Arc<GameConfig>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = RoomActor::new(receiver, sender.clone(), code.clone(), registry_handle, config);
        tokio::spawn(run_room_actor(actor));
        Self { sender, code }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn join(
        &self,
        session_id: Uuid,
        session_tx: mpsc::Sender<ws::Message>,
        request: JoinRequest,
        ack_id: Option<JsonValue>,
    ) -> Result<Result<(), RoomError>, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomActorMessage::Join {
                session_id,
                session_tx,
                request,
                ack_id,
                respond_to,
            })
            .await
            .map_err(|e| format!("Failed to send Join: {}", e))?;
        rx.await
            .map_err(|e| format!("Room dropped Join reply: {}", e))
    }

    pub async fn forward_event(
        &self,
        session_id: Uuid,
        reply_tx: mpsc::Sender<ws::Message>,
        ack_id: Option<JsonValue>,
        event: ClientEvent,
    ) -> Result<(), String> {
        self.sender
            .send(RoomActorMessage::ClientEvent {
                session_id,
                reply_tx,
                ack_id,
                event,
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    pub async fn session_closed(&self, session_id: Uuid) {
        if self
            .sender
            .send(RoomActorMessage::SessionClosed { session_id })
            .await
            .is_err()
        {
            tracing::debug!(room.code = %self.code, "Room gone before SessionClosed");
        }
    }

    pub async fn snapshot(&self) -> Option<RoomSnapshot> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomActorMessage::GetSnapshot { respond_to })
            .await
            .ok()?;
        rx.await.ok()
    }
}
