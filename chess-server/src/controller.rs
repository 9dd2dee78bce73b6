//! The games controller: a single task owning the games registry and the
//! identity counters. Every lifecycle operation funnels through its
//! mailbox, so registry and counters need no locks and operation order is
//! arrival order.
//!
//! Join and leave requests are validated against the registry and then
//! forwarded into the owning agent's mailbox with the caller's reply
//! channel attached; the agent answers the session directly, the
//! controller never waits on an agent.

use std::collections::HashMap;

use protocol::{CHANNEL_BUFFER_SIZE, GameId, PlayerId, SpectatorId};
use tokio::sync::{mpsc, oneshot};

use crate::errors::GameError;
use crate::game::{GameAgent, GameHandle, GameRequest, PlayerSeat, SpectatorSeat};

/// Registry entry for one live game.
#[derive(Clone)]
pub struct GameRef {
    pub game_id: GameId,
    pub white_player_id: PlayerId,
    pub black_player_id: PlayerId,
    pub handle: GameHandle,
}

enum ControllerRequest {
    CreateGame {
        reply: oneshot::Sender<GameRef>,
    },
    PlayerJoin {
        game_id: GameId,
        player_id: PlayerId,
        reply: oneshot::Sender<Result<PlayerSeat, GameError>>,
    },
    PlayerLeave {
        game_id: GameId,
        player_id: PlayerId,
    },
    SpectatorJoin {
        game_id: GameId,
        reply: oneshot::Sender<Result<SpectatorSeat, GameError>>,
    },
    SpectatorLeave {
        game_id: GameId,
        spectator_id: SpectatorId,
    },
    DestroyGame {
        game_id: GameId,
    },
}

/// Cloneable mailbox of the games controller.
#[derive(Clone)]
pub struct ControllerHandle {
    requests: mpsc::Sender<ControllerRequest>,
}

impl ControllerHandle {
    /// Allocates identities and starts a fresh game agent. `None` only if
    /// the controller task is gone, which happens during shutdown.
    pub async fn create_game(&self) -> Option<GameRef> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(ControllerRequest::CreateGame { reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// Connects a seat holder to their game. The reply comes straight from
    /// the game agent.
    pub async fn player_join(
        &self,
        game_id: GameId,
        player_id: PlayerId,
    ) -> Result<PlayerSeat, GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(ControllerRequest::PlayerJoin {
                game_id,
                player_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GameError::InvalidGameId)?;
        reply_rx.await.unwrap_or(Err(GameError::InvalidGameId))
    }

    /// Disconnects a seat. A game that is already gone is tolerated, it
    /// may have been reaped in the meantime.
    pub async fn player_leave(&self, game_id: GameId, player_id: PlayerId) {
        let _ = self
            .requests
            .send(ControllerRequest::PlayerLeave { game_id, player_id })
            .await;
    }

    pub async fn spectator_join(&self, game_id: GameId) -> Result<SpectatorSeat, GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(ControllerRequest::SpectatorJoin {
                game_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GameError::InvalidGameId)?;
        reply_rx.await.unwrap_or(Err(GameError::InvalidGameId))
    }

    pub async fn spectator_leave(&self, game_id: GameId, spectator_id: SpectatorId) {
        let _ = self
            .requests
            .send(ControllerRequest::SpectatorLeave {
                game_id,
                spectator_id,
            })
            .await;
    }

    /// One-way deletion request, sent by a game agent about itself once it
    /// is finished and unwatched.
    pub(crate) async fn destroy_game(&self, game_id: GameId) {
        let _ = self
            .requests
            .send(ControllerRequest::DestroyGame { game_id })
            .await;
    }
}

/// The task-owned side of the controller.
pub struct GamesController {
    games: HashMap<GameId, GameRef>,
    next_game_id: GameId,
    next_player_id: PlayerId,
    next_spectator_id: SpectatorId,
    requests: mpsc::Receiver<ControllerRequest>,
    handle: ControllerHandle,
}

impl GamesController {
    /// Starts the controller task and returns its handle.
    pub fn spawn() -> ControllerHandle {
        let (requests_tx, requests_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let handle = ControllerHandle {
            requests: requests_tx,
        };
        let controller = GamesController {
            games: HashMap::new(),
            next_game_id: 0,
            next_player_id: 0,
            next_spectator_id: 0,
            requests: requests_rx,
            handle: handle.clone(),
        };
        tokio::spawn(controller.run());
        handle
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            match request {
                ControllerRequest::CreateGame { reply } => {
                    let _ = reply.send(self.create_game());
                }
                ControllerRequest::PlayerJoin {
                    game_id,
                    player_id,
                    reply,
                } => {
                    self.player_join(game_id, player_id, reply).await;
                }
                ControllerRequest::PlayerLeave { game_id, player_id } => {
                    self.forward_leave(game_id, GameRequest::PlayerLeave { player_id })
                        .await;
                }
                ControllerRequest::SpectatorJoin { game_id, reply } => {
                    self.spectator_join(game_id, reply).await;
                }
                ControllerRequest::SpectatorLeave {
                    game_id,
                    spectator_id,
                } => {
                    self.forward_leave(game_id, GameRequest::SpectatorLeave { spectator_id })
                        .await;
                }
                ControllerRequest::DestroyGame { game_id } => {
                    if self.games.remove(&game_id).is_some() {
                        tracing::info!(game_id, "Removed game from the registry");
                    }
                }
            }
        }
    }

    /// Allocates a game id and a white/black id pair, spawns the agent and
    /// registers it. Ids are strictly increasing for the process lifetime.
    fn create_game(&mut self) -> GameRef {
        let game_id = self.next_game_id;
        self.next_game_id += 1;
        let white_player_id = self.next_player_id;
        let black_player_id = self.next_player_id + 1;
        self.next_player_id += 2;

        let handle = GameAgent::spawn(
            game_id,
            white_player_id,
            black_player_id,
            self.handle.clone(),
        );
        let game = GameRef {
            game_id,
            white_player_id,
            black_player_id,
            handle,
        };
        self.games.insert(game_id, game.clone());
        tracing::info!(game_id, white_player_id, black_player_id, "Created game");
        game
    }

    async fn player_join(
        &mut self,
        game_id: GameId,
        player_id: PlayerId,
        reply: oneshot::Sender<Result<PlayerSeat, GameError>>,
    ) {
        let Some(game) = self.games.get(&game_id) else {
            let _ = reply.send(Err(GameError::InvalidGameId));
            return;
        };
        let request = GameRequest::PlayerJoin { player_id, reply };
        if let Err(GameRequest::PlayerJoin { reply, .. }) = game.handle.forward(request).await {
            // The agent exited between the registry lookup and the send.
            let _ = reply.send(Err(GameError::InvalidGameId));
        }
    }

    async fn spectator_join(
        &mut self,
        game_id: GameId,
        reply: oneshot::Sender<Result<SpectatorSeat, GameError>>,
    ) {
        let Some(game) = self.games.get(&game_id) else {
            let _ = reply.send(Err(GameError::InvalidGameId));
            return;
        };
        let spectator_id = self.next_spectator_id;
        self.next_spectator_id += 1;
        let request = GameRequest::SpectatorJoin {
            spectator_id,
            reply,
        };
        if let Err(GameRequest::SpectatorJoin { reply, .. }) = game.handle.forward(request).await {
            let _ = reply.send(Err(GameError::InvalidGameId));
        }
    }

    async fn forward_leave(&mut self, game_id: GameId, request: GameRequest) {
        // Silently tolerated when the game is gone: the session may be
        // tearing down after the game was already reaped.
        if let Some(game) = self.games.get(&game_id) {
            let _ = game.handle.forward(request).await;
        }
    }
}
