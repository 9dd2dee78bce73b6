//! Thin wrapper around the chess rules engine. The rest of the service
//! treats this as an oracle: apply a SAN move, ask whose turn it is, read
//! the position, detect a terminal outcome. Only the owning game agent
//! ever touches an instance.

use chess::{BoardStatus, ChessMove, Game};
use protocol::Color;

use crate::errors::GameError;

/// The rule-checked state of one game.
pub struct GameState {
    game: Game,
}

impl GameState {
    /// A game in the standard starting position.
    pub fn new() -> Self {
        Self { game: Game::new() }
    }

    /// Applies a move given in standard algebraic notation. Illegal or
    /// unparseable moves leave the position untouched.
    pub fn apply_san(&mut self, san: &str) -> Result<(), GameError> {
        let chess_move = ChessMove::from_san(&self.game.current_position(), san)
            .map_err(|_| GameError::IllegalMove)?;
        if !self.game.make_move(chess_move) {
            return Err(GameError::IllegalMove);
        }
        Ok(())
    }

    /// The side to move.
    pub fn turn(&self) -> Color {
        match self.game.side_to_move() {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }

    /// The current position in Forsyth-Edwards notation.
    pub fn fen(&self) -> String {
        self.game.current_position().to_string()
    }

    /// The score string of a decided game ("1-0", "0-1", "1/2-1/2"), or
    /// `None` while the game is still in progress. The mated side is the
    /// side to move.
    pub fn outcome(&self) -> Option<String> {
        match self.game.current_position().status() {
            BoardStatus::Ongoing => {
                // Repetition and fifty-move draws are not part of the
                // board status; only the move history knows about them.
                if self.game.can_declare_draw() {
                    Some("1/2-1/2".to_string())
                } else {
                    None
                }
            }
            BoardStatus::Stalemate => Some("1/2-1/2".to_string()),
            BoardStatus::Checkmate => Some(
                match self.game.side_to_move() {
                    chess::Color::White => "0-1",
                    chess::Color::Black => "1-0",
                }
                .to_string(),
            ),
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}
