//! Pairs waiting players two-at-a-time in arrival order and sets their
//! game up before either of them hears back.

use protocol::{CHANNEL_BUFFER_SIZE, Color, MatchFound};
use tokio::sync::{mpsc, oneshot};

use crate::controller::ControllerHandle;

/// Cloneable mailbox of the matchmaker.
#[derive(Clone)]
pub struct MatchmakerHandle {
    requests: mpsc::Sender<MatchRequest>,
}

/// A pending pairing request, answered exactly once.
struct MatchRequest {
    reply: oneshot::Sender<MatchFound>,
}

impl MatchmakerHandle {
    /// Waits until a partner shows up and the game exists. `None` only if
    /// the matchmaker task is gone.
    pub async fn find_match(&self) -> Option<MatchFound> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(reply_tx).await;
        reply_rx.await.ok()
    }

    /// Queues a raw request. [`find_match`](Self::find_match) is the
    /// common path; callers that manage their own reply channel (or want
    /// to abandon a request) use this directly.
    pub async fn enqueue(&self, reply: oneshot::Sender<MatchFound>) {
        let _ = self.requests.send(MatchRequest { reply }).await;
    }
}

/// The task-owned side of matchmaking.
pub struct Matchmaker {
    requests: mpsc::Receiver<MatchRequest>,
    controller: ControllerHandle,
}

impl Matchmaker {
    /// Starts the matchmaker task and returns its handle.
    pub fn spawn(controller: ControllerHandle) -> MatchmakerHandle {
        let (requests_tx, requests_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let matchmaker = Matchmaker {
            requests: requests_rx,
            controller,
        };
        tokio::spawn(matchmaker.run());
        MatchmakerHandle {
            requests: requests_tx,
        }
    }

    async fn run(mut self) {
        loop {
            let Some(first) = self.next_live_request().await else {
                break;
            };
            let Some(second) = self.next_live_request().await else {
                break;
            };
            let Some(game) = self.controller.create_game().await else {
                tracing::error!("Games controller is gone, stopping matchmaking");
                break;
            };

            let (white, black) = if rand::random::<bool>() {
                (first, second)
            } else {
                (second, first)
            };
            // A requester that left after pairing started just loses its
            // reply; the partner keeps the game either way.
            let _ = white.reply.send(MatchFound {
                game_id: game.game_id,
                player_id: game.white_player_id,
                player_color: Color::White,
            });
            let _ = black.reply.send(MatchFound {
                game_id: game.game_id,
                player_id: game.black_player_id,
                player_color: Color::Black,
            });
            tracing::info!(game_id = game.game_id, "Paired two players");
        }
    }

    /// Pulls the next request whose caller is still listening. Abandoned
    /// requests are skipped so they cannot corrupt the pairing order.
    async fn next_live_request(&mut self) -> Option<MatchRequest> {
        loop {
            let request = self.requests.recv().await?;
            if request.reply.is_closed() {
                tracing::debug!("Skipping an abandoned match request");
                continue;
            }
            return Some(request);
        }
    }
}
