//! The game agent: one task per live game, sole owner of the rule-checked
//! state, the subscriber streams and the seat connection flags. All
//! mutation goes through its mailbox, so move serialization and broadcast
//! ordering need no locks.
//!
//! Broadcasts deliver one update to every live stream in a fixed order
//! (white seat, black seat, spectators). Streams are lossless bounded
//! queues; a stalled consumer exerts backpressure on the agent once its
//! buffer fills up.

use std::collections::BTreeMap;

use protocol::{
    CHANNEL_BUFFER_SIZE, GameId, MoveUpdate, PlayerId, PlayerJoinedUpdate, PlayerLeftUpdate,
    ResultUpdate, SnapshotUpdate, SpectatorId, SpectatorJoinedUpdate, SpectatorLeftUpdate, Update,
};
use tokio::sync::{mpsc, oneshot};

use crate::controller::ControllerHandle;
use crate::errors::GameError;
use crate::rules::GameState;

/// Requests served by a game agent. Join and leave requests arrive through
/// the games controller; moves come straight from player sessions.
pub enum GameRequest {
    MakeMove {
        update: MoveUpdate,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    PlayerJoin {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<PlayerSeat, GameError>>,
    },
    PlayerLeave {
        player_id: PlayerId,
    },
    SpectatorJoin {
        spectator_id: SpectatorId,
        reply: oneshot::Sender<Result<SpectatorSeat, GameError>>,
    },
    SpectatorLeave {
        spectator_id: SpectatorId,
    },
}

/// What a player session gets back from a successful join: the game's
/// mailbox for entering moves and the seat's update stream.
pub struct PlayerSeat {
    pub game: GameHandle,
    pub updates: mpsc::Receiver<Update>,
}

/// What a spectator session gets back from a successful join.
pub struct SpectatorSeat {
    pub spectator_id: SpectatorId,
    pub updates: mpsc::Receiver<Update>,
}

/// Cloneable mailbox of one game agent.
#[derive(Clone)]
pub struct GameHandle {
    game_id: GameId,
    requests: mpsc::Sender<GameRequest>,
}

impl GameHandle {
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Enters a move. An agent that is already gone (the game was reaped)
    /// answers as an unknown game.
    pub async fn make_move(&self, update: MoveUpdate) -> Result<(), GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(GameRequest::MakeMove {
                update,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GameError::InvalidGameId)?;
        reply_rx.await.unwrap_or(Err(GameError::InvalidGameId))
    }

    /// Forwards a request as-is, handing it back if the agent is gone so
    /// the caller can answer the embedded reply channel itself.
    pub(crate) async fn forward(&self, request: GameRequest) -> Result<(), GameRequest> {
        self.requests.send(request).await.map_err(|error| error.0)
    }
}

/// The task-owned side of one game.
pub struct GameAgent {
    game_id: GameId,
    state: GameState,
    white_player_id: PlayerId,
    black_player_id: PlayerId,
    white_stream: Option<mpsc::Sender<Update>>,
    black_stream: Option<mpsc::Sender<Update>>,
    white_connected: bool,
    black_connected: bool,
    spectator_streams: BTreeMap<SpectatorId, mpsc::Sender<Update>>,
    requests: mpsc::Receiver<GameRequest>,
    handle: GameHandle,
    controller: ControllerHandle,
}

impl GameAgent {
    /// Creates the agent for a fresh game and starts its task.
    pub fn spawn(
        game_id: GameId,
        white_player_id: PlayerId,
        black_player_id: PlayerId,
        controller: ControllerHandle,
    ) -> GameHandle {
        let (requests_tx, requests_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let handle = GameHandle {
            game_id,
            requests: requests_tx,
        };
        let agent = GameAgent {
            game_id,
            state: GameState::new(),
            white_player_id,
            black_player_id,
            white_stream: None,
            black_stream: None,
            white_connected: false,
            black_connected: false,
            spectator_streams: BTreeMap::new(),
            requests: requests_rx,
            handle: handle.clone(),
            controller,
        };
        tokio::spawn(agent.run());
        handle
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            match request {
                GameRequest::MakeMove { update, reply } => {
                    let _ = reply.send(self.make_move(update).await);
                }
                GameRequest::PlayerJoin { player_id, reply } => {
                    let _ = reply.send(self.player_join(player_id).await);
                }
                GameRequest::PlayerLeave { player_id } => {
                    self.player_leave(player_id).await;
                }
                GameRequest::SpectatorJoin {
                    spectator_id,
                    reply,
                } => {
                    let _ = reply.send(self.spectator_join(spectator_id).await);
                }
                GameRequest::SpectatorLeave { spectator_id } => {
                    self.spectator_leave(spectator_id).await;
                }
            }
            if self.reap_ready() {
                break;
            }
        }
        // Refuse further requests before asking for deletion, so a request
        // racing the teardown fails fast instead of queueing behind a dead
        // agent.
        self.requests.close();
        tracing::info!(game_id = self.game_id, "Reaping finished game");
        self.controller.destroy_game(self.game_id).await;
    }

    /// A finished game with nobody watching has no reason to live.
    fn reap_ready(&self) -> bool {
        self.state.outcome().is_some()
            && !self.white_connected
            && !self.black_connected
            && self.spectator_streams.is_empty()
    }

    async fn make_move(&mut self, mut update: MoveUpdate) -> Result<(), GameError> {
        if update.game_id != self.game_id {
            return Err(GameError::InvalidGameId);
        }
        let seat_color = if update.player_id == self.white_player_id {
            protocol::Color::White
        } else if update.player_id == self.black_player_id {
            protocol::Color::Black
        } else {
            return Err(GameError::InvalidPlayerId);
        };
        if update.player_color != seat_color {
            return Err(GameError::InvalidPlayerColor);
        }
        if self.state.outcome().is_some() {
            return Err(GameError::GameFinished);
        }
        if self.state.turn() != update.player_color {
            return Err(GameError::WrongTurn);
        }
        self.state.apply_san(&update.san)?;

        update.fen = self.state.fen();
        self.broadcast(Update::MoveUpdate(update)).await;

        // A decided game gets one follow-up result broadcast. Afterwards
        // the agent keeps draining its mailbox until everybody has left.
        if let Some(result) = self.state.outcome() {
            tracing::info!(game_id = self.game_id, result = %result, "Game decided");
            self.broadcast(Update::ResultUpdate(ResultUpdate {
                result,
                fen: self.state.fen(),
            }))
            .await;
        }
        Ok(())
    }

    async fn player_join(&mut self, player_id: PlayerId) -> Result<PlayerSeat, GameError> {
        let connected = if player_id == self.white_player_id {
            self.white_connected
        } else if player_id == self.black_player_id {
            self.black_connected
        } else {
            return Err(GameError::InvalidPlayerId);
        };
        if connected {
            return Err(GameError::AlreadyJoined);
        }

        // Announce the join before the new stream exists, so the joining
        // seat never sees its own join event and the snapshot stays the
        // first message on the fresh stream.
        self.broadcast(Update::PlayerJoinedUpdate(PlayerJoinedUpdate {
            game_id: self.game_id,
            player_id,
        }))
        .await;

        let (stream_tx, stream_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let _ = stream_tx
            .send(Update::SnapshotUpdate(self.snapshot()))
            .await;
        if player_id == self.white_player_id {
            self.white_stream = Some(stream_tx);
            self.white_connected = true;
        } else {
            self.black_stream = Some(stream_tx);
            self.black_connected = true;
        }
        tracing::info!(game_id = self.game_id, player_id, "Player joined");
        Ok(PlayerSeat {
            game: self.handle.clone(),
            updates: stream_rx,
        })
    }

    async fn player_leave(&mut self, player_id: PlayerId) {
        // Close the departing stream first, then tell the others. The
        // leave event must not be delivered back to the leaving seat.
        if player_id == self.white_player_id && self.white_connected {
            self.white_stream = None;
            self.white_connected = false;
        } else if player_id == self.black_player_id && self.black_connected {
            self.black_stream = None;
            self.black_connected = false;
        } else {
            tracing::warn!(
                game_id = self.game_id,
                player_id,
                "Leave for a seat that is not connected"
            );
            return;
        }
        tracing::info!(game_id = self.game_id, player_id, "Player left");
        self.broadcast(Update::PlayerLeftUpdate(PlayerLeftUpdate {
            game_id: self.game_id,
            player_id,
        }))
        .await;
    }

    async fn spectator_join(
        &mut self,
        spectator_id: SpectatorId,
    ) -> Result<SpectatorSeat, GameError> {
        self.broadcast(Update::SpectatorJoinedUpdate(SpectatorJoinedUpdate {
            game_id: self.game_id,
            spectator_id,
        }))
        .await;

        let (stream_tx, stream_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let _ = stream_tx
            .send(Update::SnapshotUpdate(self.snapshot()))
            .await;
        self.spectator_streams.insert(spectator_id, stream_tx);
        tracing::info!(game_id = self.game_id, spectator_id, "Spectator joined");
        Ok(SpectatorSeat {
            spectator_id,
            updates: stream_rx,
        })
    }

    async fn spectator_leave(&mut self, spectator_id: SpectatorId) {
        if self.spectator_streams.remove(&spectator_id).is_none() {
            tracing::warn!(
                game_id = self.game_id,
                spectator_id,
                "Leave for an unknown spectator"
            );
            return;
        }
        tracing::info!(game_id = self.game_id, spectator_id, "Spectator left");
        self.broadcast(Update::SpectatorLeftUpdate(SpectatorLeftUpdate {
            game_id: self.game_id,
            spectator_id,
        }))
        .await;
    }

    fn snapshot(&self) -> SnapshotUpdate {
        SnapshotUpdate {
            game_id: self.game_id,
            white_player_id: self.white_player_id,
            black_player_id: self.black_player_id,
            fen: self.state.fen(),
        }
    }

    /// Same update to every live stream, seats before spectators. A send
    /// to a subscriber whose receiver is already gone is dropped; the
    /// pending leave request cleans that seat up.
    async fn broadcast(&mut self, update: Update) {
        if let Some(stream) = &self.white_stream {
            let _ = stream.send(update.clone()).await;
        }
        if let Some(stream) = &self.black_stream {
            let _ = stream.send(update.clone()).await;
        }
        for stream in self.spectator_streams.values() {
            let _ = stream.send(update.clone()).await;
        }
    }
}
