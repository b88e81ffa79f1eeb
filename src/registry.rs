use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::GameConfig;
use crate::room_actor::RoomActorHandle;

/// Unambiguous characters only: no 0/O or 1/I.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ROOM_CODE_LEN: usize = 6;
const MAX_CODE_ATTEMPTS: usize = 64;
const ROOM_INBOX_SIZE: usize = 64;

/// Room codes are matched case-insensitively.
pub fn normalize_room_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn generate_room_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug)]
pub enum RoomRegistryMessage {
    CreateRoom {
        respond_to: oneshot::Sender<Result<String, String>>,
    },
    GetRoomHandle {
        code: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },
    RoomShutdown {
        code: String,
    },
}

pub struct RoomRegistryActor {
    receiver: mpsc::Receiver<RoomRegistryMessage>,
    self_sender: mpsc::Sender<RoomRegistryMessage>,
    rooms: HashMap<String, RoomActorHandle>,
    game_config: Arc<GameConfig>,
    rng: StdRng,
}

impl RoomRegistryActor {
    fn new(
        receiver: mpsc::Receiver<RoomRegistryMessage>,
        self_sender: mpsc::Sender<RoomRegistryMessage>,
        game_config: Arc<GameConfig>,
    ) -> Self {
        RoomRegistryActor {
            receiver,
            self_sender,
            rooms: HashMap::new(),
            game_config,
            rng: StdRng::from_entropy(),
        }
    }

    fn unused_code(&mut self) -> Option<String> {
        (0..MAX_CODE_ATTEMPTS)
            .map(|_| generate_room_code(&mut self.rng))
            .find(|code| !self.rooms.contains_key(code))
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    fn handle_message(&mut self, msg: RoomRegistryMessage) {
        match msg {
            RoomRegistryMessage::CreateRoom { respond_to } => {
                let Some(code) = self.unused_code() else {
                    tracing::error!(
                        rooms.count = self.rooms.len(),
                        "Could not find a free room code"
                    );
                    let _ = respond_to.send(Err("No free room code available".to_string()));
                    return;
                };

                let registry_handle = RoomRegistryHandle {
                    sender: self.self_sender.clone(),
                };
                let room_handle = RoomActorHandle::spawn(
                    code.clone(),
                    ROOM_INBOX_SIZE,
                    registry_handle,
                    Arc::clone(&self.game_config),
                );
                self.rooms.insert(code.clone(), room_handle);

                tracing::info!(
                    room.code = %code,
                    rooms.count = self.rooms.len(),
                    "Created room"
                );
                let _ = respond_to.send(Ok(code));
            }
            RoomRegistryMessage::GetRoomHandle { code, respond_to } => {
                let code = normalize_room_code(&code);
                tracing::debug!(room.code = %code, "Received GetRoomHandle request");

                let closed = self.rooms.get(&code).is_some_and(|h| h.is_closed());
                if closed {
                    tracing::warn!(room.code = %code, "Dropping handle of a room actor that is gone");
                    self.rooms.remove(&code);
                }
                let _ = respond_to.send(self.rooms.get(&code).cloned());
            }
            RoomRegistryMessage::RoomShutdown { code } => {
                if self.rooms.remove(&code).is_some() {
                    tracing::info!(
                        room.code = %code,
                        rooms.count = self.rooms.len(),
                        "Cleaning up room after actor shutdown"
                    );
                } else {
                    tracing::warn!(room.code = %code, "Received shutdown for unknown room");
                }
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_room_registry_actor(mut actor: RoomRegistryActor) {
    tracing::info!("Room registry actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg);
    }
    tracing::info!("Room registry actor stopped");
}

#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RoomRegistryMessage>,
}

impl RoomRegistryHandle {
    pub fn spawn(buffer_size: usize, game_config: Arc<GameConfig>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = RoomRegistryActor::new(receiver, sender.clone(), game_config);
        tokio::spawn(run_room_registry_actor(actor));
        Self { sender }
    }

    pub async fn create_room(&self) -> Result<String, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomRegistryMessage::CreateRoom { respond_to })
            .await
            .map_err(|e| format!("Failed to send CreateRoom: {}", e))?;
        rx.await
            .map_err(|e| format!("RoomRegistry no response: {}", e))?
    }

    pub async fn get_room(&self, code: &str) -> Option<RoomActorHandle> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(RoomRegistryMessage::GetRoomHandle {
                code: code.to_string(),
                respond_to,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn notify_room_shutdown(&self, code: String) -> Result<(), String> {
        self.sender
            .send(RoomRegistryMessage::RoomShutdown { code })
            .await
            .map_err(|e| format!("Failed to send RoomShutdown: {}", e))
    }
}
