use thiserror::Error;

/// Validation failures of game and subscription operations. These are
/// answered synchronously over the caller's reply channel and never mutate
/// any game state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("invalid game id")]
    InvalidGameId,
    #[error("invalid player id")]
    InvalidPlayerId,
    #[error("invalid spectator id")]
    InvalidSpectatorId,
    #[error("invalid player color")]
    InvalidPlayerColor,
    #[error("wrong turn")]
    WrongTurn,
    #[error("illegal move")]
    IllegalMove,
    #[error("game finished")]
    GameFinished,
    #[error("seat already joined")]
    AlreadyJoined,
}
