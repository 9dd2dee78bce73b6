//! The update vocabulary of the chess service. These types are used
//! consistently across the HTTP layer, the websocket envelope and the
//! in-process event streams, so server and clients agree on one schema.
//!
//! Every websocket frame is the JSON form of [`Update`]:
//! `{ "type": <tag>, "update": <payload> }`. The tag is derived from the
//! variant, so a payload can never travel under the wrong label.

use serde::{Deserialize, Serialize};

/// The buffer size for subscriber streams and actor mailboxes.
pub const CHANNEL_BUFFER_SIZE: usize = 128;

/// Identifier of a game. Never reused within a process.
pub type GameId = u64;
/// Identifier of a seat holder. Allocated in pairs, white first.
pub type PlayerId = u64;
/// Identifier of a spectator.
pub type SpectatorId = u64;

/// The side a seat holder plays, "w" or "b" on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    #[serde(rename = "w")]
    White,
    #[serde(rename = "b")]
    Black,
}

/// A move entered by a player. On the way in the `fen` field is ignored;
/// on the way out it carries the position after the move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveUpdate {
    pub game_id: GameId,
    #[serde(rename = "move")]
    pub san: String,
    pub player_id: PlayerId,
    pub player_color: Color,
    #[serde(default)]
    pub fen: String,
}

/// Full position sync. The first message on every new subscriber stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotUpdate {
    pub game_id: GameId,
    pub white_player_id: PlayerId,
    pub black_player_id: PlayerId,
    pub fen: String,
}

/// Terminal outcome of a game, e.g. "1-0" with the final position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultUpdate {
    pub result: String,
    pub fen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerJoinedUpdate {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerLeftUpdate {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

/// Request of a spectator session to watch a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectatorJoinUpdate {
    pub game_id: GameId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectatorJoinedUpdate {
    pub game_id: GameId,
    pub spectator_id: SpectatorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectatorLeftUpdate {
    pub game_id: GameId,
    pub spectator_id: SpectatorId,
}

/// Everything that can travel on a websocket or a subscriber stream.
/// The serde attributes produce the `{ "type": ..., "update": ... }`
/// envelope with snake_case tags derived from the variant names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "update", rename_all = "snake_case")]
pub enum Update {
    MoveUpdate(MoveUpdate),
    SnapshotUpdate(SnapshotUpdate),
    ResultUpdate(ResultUpdate),
    PlayerJoinedUpdate(PlayerJoinedUpdate),
    PlayerLeftUpdate(PlayerLeftUpdate),
    SpectatorJoinUpdate(SpectatorJoinUpdate),
    SpectatorJoinedUpdate(SpectatorJoinedUpdate),
    SpectatorLeftUpdate(SpectatorLeftUpdate),
}

/// Payload of a successful matchmaking request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFound {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub player_color: Color,
}

/// Reply body of `GET /find_match`. Flat JSON with a "type" discriminator:
/// `{ "type": "match_found", "game_id": ..., "player_id": ..., "player_color": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchReply {
    MatchFound(MatchFound),
}
