//! Bridges one websocket to the in-process event fabric.
//!
//! Per connection three pieces run: a reader task feeding decoded frames
//! inbound, a writer task draining the outbound queue onto the socket, and
//! the driver (player or spectator loop) in between. The driver owns the
//! teardown order: controller leave first, then the writer terminate
//! signal, then the transport closes; the reader notices the closure and
//! exits on its own.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{CHANNEL_BUFFER_SIZE, Update};
use tokio::sync::{mpsc, oneshot};

use crate::controller::ControllerHandle;
use crate::game::{PlayerSeat, SpectatorSeat};

/// Deadline for a single websocket write, to detect a stuck peer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Decodes one wire frame into an update envelope.
pub fn decode_frame(frame: &str) -> Result<Update, serde_json::Error> {
    serde_json::from_str(frame)
}

/// Encodes one update envelope into a wire frame.
pub fn encode_frame(update: &Update) -> Result<String, serde_json::Error> {
    serde_json::to_string(update)
}

/// Runs the player protocol over a freshly upgraded socket.
pub async fn run_player_session(socket: WebSocket, controller: ControllerHandle) {
    let (sink, stream) = socket.split();
    let (inbound_tx, mut inbound) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (terminate_tx, terminate_rx) = oneshot::channel();

    let reader = tokio::spawn(read_socket(stream, inbound_tx));
    let writer = tokio::spawn(write_socket(sink, outbound_rx, terminate_rx));

    player_loop(&controller, &mut inbound, &outbound_tx).await;

    let _ = terminate_tx.send(());
    let _ = writer.await;
    // The reader normally exits by observing the closed transport; a peer
    // that never answers the close frame gets cut off here.
    reader.abort();
}

/// Runs the spectator protocol over a freshly upgraded socket.
pub async fn run_spectator_session(socket: WebSocket, controller: ControllerHandle) {
    let (sink, stream) = socket.split();
    let (inbound_tx, mut inbound) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let (terminate_tx, terminate_rx) = oneshot::channel();

    let reader = tokio::spawn(read_socket(stream, inbound_tx));
    let writer = tokio::spawn(write_socket(sink, outbound_rx, terminate_rx));

    spectator_loop(&controller, &mut inbound, &outbound_tx).await;

    let _ = terminate_tx.send(());
    let _ = writer.await;
    reader.abort();
}

/// Pulls frames off the socket and feeds decoded updates inbound. Exits on
/// transport close, a decode failure, or a gone driver; dropping the
/// sender is the end-of-input signal for the driver.
async fn read_socket(mut receiver: SplitStream<WebSocket>, inbound: mpsc::Sender<Update>) {
    while let Some(frame) = receiver.next().await {
        let Ok(message) = frame else {
            // Connection lost.
            return;
        };
        match message {
            Message::Text(text) => match decode_frame(text.as_str()) {
                Ok(update) => {
                    if inbound.send(update).await.is_err() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(%error, "Failed to decode an inbound frame");
                    return;
                }
            },
            Message::Close(_) => return,
            // We do not care about other messages like ping pong messages.
            _ => {}
        }
    }
}

/// Drains the outbound queue onto the socket, one deadline-guarded write
/// per update. The terminate signal flushes what is already queued and
/// ends with a graceful close frame.
async fn write_socket(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Update>,
    mut terminate: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut terminate => {
                // The driver stopped producing before it signaled, so the
                // backlog is complete; anything after it is abandoned.
                while let Ok(update) = outbound.try_recv() {
                    if !write_update(&mut sender, &update).await {
                        return;
                    }
                }
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
            update = outbound.recv() => {
                let Some(update) = update else { return };
                if !write_update(&mut sender, &update).await {
                    return;
                }
            }
        }
    }
}

/// One encoded, deadline-guarded write. False means the session is beyond
/// saving and the writer should stop.
async fn write_update(sender: &mut SplitSink<WebSocket, Message>, update: &Update) -> bool {
    let frame = match encode_frame(update) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::error!(%error, "Failed to encode an outbound update");
            return false;
        }
    };
    match tokio::time::timeout(WRITE_TIMEOUT, sender.send(Message::Text(frame.into()))).await {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            tracing::error!(%error, "Error writing to the session peer");
            false
        }
        Err(_) => {
            tracing::error!("Write to the session peer timed out");
            false
        }
    }
}

/// The seat-holder protocol: a join announcement first, then moves in and
/// broadcasts out until the game is decided or either side hangs up.
async fn player_loop(
    controller: &ControllerHandle,
    inbound: &mut mpsc::Receiver<Update>,
    outbound: &mpsc::Sender<Update>,
) {
    let Some(first) = inbound.recv().await else {
        tracing::warn!("Session closed before a join request arrived");
        return;
    };
    let Update::PlayerJoinedUpdate(join) = first else {
        tracing::error!("Expected player_joined_update as the first frame");
        return;
    };
    let seat = match controller.player_join(join.game_id, join.player_id).await {
        Ok(seat) => seat,
        Err(error) => {
            tracing::error!(
                %error,
                game_id = join.game_id,
                player_id = join.player_id,
                "Player join rejected"
            );
            return;
        }
    };
    let PlayerSeat {
        game,
        updates: mut events,
    } = seat;

    loop {
        tokio::select! {
            event = events.recv() => {
                // A closed stream means the seat was vacated or the game
                // is gone; either way this session is over.
                let Some(event) = event else { break };
                let decided = matches!(event, Update::ResultUpdate(_));
                if outbound.send(event).await.is_err() {
                    break;
                }
                if decided {
                    break;
                }
            }
            frame = inbound.recv() => {
                let Some(frame) = frame else { break };
                match frame {
                    Update::MoveUpdate(entered) => {
                        match game.make_move(entered).await {
                            Ok(()) => tracing::debug!(player_id = join.player_id, "Move accepted"),
                            Err(error) => {
                                tracing::info!(%error, player_id = join.player_id, "Move rejected");
                            }
                        }
                    }
                    other => {
                        tracing::warn!(?other, "Unsupported update on a player session");
                    }
                }
            }
        }
    }

    controller.player_leave(join.game_id, join.player_id).await;
}

/// The watch-only protocol: a join request first, then broadcasts out
/// until the game is decided or either side hangs up.
async fn spectator_loop(
    controller: &ControllerHandle,
    inbound: &mut mpsc::Receiver<Update>,
    outbound: &mpsc::Sender<Update>,
) {
    let Some(first) = inbound.recv().await else {
        tracing::warn!("Session closed before a join request arrived");
        return;
    };
    let Update::SpectatorJoinUpdate(join) = first else {
        tracing::error!("Expected spectator_join_update as the first frame");
        return;
    };
    let seat = match controller.spectator_join(join.game_id).await {
        Ok(seat) => seat,
        Err(error) => {
            tracing::error!(%error, game_id = join.game_id, "Spectator join rejected");
            return;
        }
    };
    let SpectatorSeat {
        spectator_id,
        updates: mut events,
    } = seat;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let decided = matches!(event, Update::ResultUpdate(_));
                if outbound.send(event).await.is_err() {
                    break;
                }
                if decided {
                    break;
                }
            }
            frame = inbound.recv() => {
                let Some(frame) = frame else { break };
                tracing::warn!(?frame, "Spectator sessions cannot send updates");
            }
        }
    }

    controller
        .spectator_leave(join.game_id, spectator_id)
        .await;
}
