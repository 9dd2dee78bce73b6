use std::time::Duration;

use chess_server::controller::{ControllerHandle, GamesController};
use chess_server::errors::GameError;
use chess_server::game::PlayerSeat;
use chess_server::matchmaker::{Matchmaker, MatchmakerHandle};
use protocol::{
    Color, GameId, MatchFound, MoveUpdate, PlayerJoinedUpdate, PlayerLeftUpdate, Update,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::oneshot;
use tokio::time::timeout;

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
const FEN_AFTER_E4_PREFIX: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b";

fn start() -> (ControllerHandle, MatchmakerHandle) {
    let controller = GamesController::spawn();
    let matchmaker = Matchmaker::spawn(controller.clone());
    (controller, matchmaker)
}

/// Issues two concurrent match requests and hands the replies back sorted
/// as (white, black).
async fn pair(matchmaker: &MatchmakerHandle) -> (MatchFound, MatchFound) {
    let first = tokio::spawn({
        let matchmaker = matchmaker.clone();
        async move { matchmaker.find_match().await.unwrap() }
    });
    let second = tokio::spawn({
        let matchmaker = matchmaker.clone();
        async move { matchmaker.find_match().await.unwrap() }
    });
    let first = first.await.unwrap();
    let second = second.await.unwrap();
    if first.player_color == Color::White {
        (first, second)
    } else {
        (second, first)
    }
}

async fn next_update(stream: &mut mpsc::Receiver<Update>) -> Update {
    timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("timed out waiting for an update")
        .expect("update stream closed")
}

fn entered_move(game_id: GameId, san: &str, seat: &MatchFound) -> MoveUpdate {
    MoveUpdate {
        game_id,
        san: san.to_string(),
        player_id: seat.player_id,
        player_color: seat.player_color,
        fen: String::new(),
    }
}

/// Joins both seats and drains the deterministic stream prefixes: each
/// seat's snapshot, plus white's view of black arriving.
async fn join_both(
    controller: &ControllerHandle,
    white: &MatchFound,
    black: &MatchFound,
) -> (PlayerSeat, PlayerSeat) {
    let mut white_seat = controller
        .player_join(white.game_id, white.player_id)
        .await
        .unwrap();
    assert!(matches!(
        next_update(&mut white_seat.updates).await,
        Update::SnapshotUpdate(_)
    ));
    let mut black_seat = controller
        .player_join(black.game_id, black.player_id)
        .await
        .unwrap();
    assert!(matches!(
        next_update(&mut black_seat.updates).await,
        Update::SnapshotUpdate(_)
    ));
    assert_eq!(
        next_update(&mut white_seat.updates).await,
        Update::PlayerJoinedUpdate(PlayerJoinedUpdate {
            game_id: black.game_id,
            player_id: black.player_id,
        })
    );
    (white_seat, black_seat)
}

#[tokio::test]
async fn pair_and_play_one_move() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;

    assert_eq!(white.game_id, black.game_id);
    assert_eq!(white.player_color, Color::White);
    assert_eq!(black.player_color, Color::Black);
    assert_eq!(white.player_id + 1, black.player_id);

    let mut white_seat = controller
        .player_join(white.game_id, white.player_id)
        .await
        .unwrap();
    let Update::SnapshotUpdate(snapshot) = next_update(&mut white_seat.updates).await else {
        panic!("first message on a new stream must be the snapshot");
    };
    assert_eq!(snapshot.game_id, white.game_id);
    assert_eq!(snapshot.white_player_id, white.player_id);
    assert_eq!(snapshot.black_player_id, black.player_id);
    assert_eq!(snapshot.fen, START_FEN);

    let mut black_seat = controller
        .player_join(black.game_id, black.player_id)
        .await
        .unwrap();
    let Update::SnapshotUpdate(snapshot) = next_update(&mut black_seat.updates).await else {
        panic!("first message on a new stream must be the snapshot");
    };
    assert_eq!(snapshot.fen, START_FEN);

    // White was subscribed before black arrived, so white sees the join.
    assert_eq!(
        next_update(&mut white_seat.updates).await,
        Update::PlayerJoinedUpdate(PlayerJoinedUpdate {
            game_id: black.game_id,
            player_id: black.player_id,
        })
    );

    white_seat
        .game
        .make_move(entered_move(white.game_id, "e4", &white))
        .await
        .unwrap();

    let Update::MoveUpdate(seen_by_white) = next_update(&mut white_seat.updates).await else {
        panic!("expected the move broadcast");
    };
    let Update::MoveUpdate(seen_by_black) = next_update(&mut black_seat.updates).await else {
        panic!("expected the move broadcast");
    };
    assert_eq!(seen_by_white, seen_by_black);
    assert_eq!(seen_by_white.san, "e4");
    assert_eq!(seen_by_white.player_id, white.player_id);
    assert!(seen_by_white.fen.starts_with(FEN_AFTER_E4_PREFIX));
}

#[tokio::test]
async fn wrong_turn_is_rejected_without_a_broadcast() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;
    let (mut white_seat, mut black_seat) = join_both(&controller, &white, &black).await;

    let result = black_seat
        .game
        .make_move(entered_move(black.game_id, "e5", &black))
        .await;
    assert_eq!(result, Err(GameError::WrongTurn));

    assert_eq!(
        white_seat.updates.try_recv().unwrap_err(),
        TryRecvError::Empty
    );
    assert_eq!(
        black_seat.updates.try_recv().unwrap_err(),
        TryRecvError::Empty
    );
}

#[tokio::test]
async fn illegal_move_is_rejected_and_the_position_stands() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;
    let (mut white_seat, _black_seat) = join_both(&controller, &white, &black).await;

    let result = white_seat
        .game
        .make_move(entered_move(white.game_id, "e5", &white))
        .await;
    assert_eq!(result, Err(GameError::IllegalMove));
    assert_eq!(
        white_seat.updates.try_recv().unwrap_err(),
        TryRecvError::Empty
    );

    // The next legal move still starts from the initial position.
    white_seat
        .game
        .make_move(entered_move(white.game_id, "e4", &white))
        .await
        .unwrap();
    let Update::MoveUpdate(broadcast) = next_update(&mut white_seat.updates).await else {
        panic!("expected the move broadcast");
    };
    assert!(broadcast.fen.starts_with(FEN_AFTER_E4_PREFIX));
}

#[tokio::test]
async fn mismatched_identity_is_rejected() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;
    let (white_seat, _black_seat) = join_both(&controller, &white, &black).await;

    // Declared color does not match the seat of the declared player id.
    let mut disguised = entered_move(white.game_id, "e4", &white);
    disguised.player_color = Color::Black;
    assert_eq!(
        white_seat.game.make_move(disguised).await,
        Err(GameError::InvalidPlayerColor)
    );

    let mut unknown = entered_move(white.game_id, "e4", &white);
    unknown.player_id = 4242;
    assert_eq!(
        white_seat.game.make_move(unknown).await,
        Err(GameError::InvalidPlayerId)
    );

    let mut wrong_game = entered_move(white.game_id, "e4", &white);
    wrong_game.game_id = white.game_id + 1;
    assert_eq!(
        white_seat.game.make_move(wrong_game).await,
        Err(GameError::InvalidGameId)
    );
}

#[tokio::test]
async fn spectator_joins_mid_game() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;
    let (mut white_seat, mut black_seat) = join_both(&controller, &white, &black).await;

    white_seat
        .game
        .make_move(entered_move(white.game_id, "e4", &white))
        .await
        .unwrap();
    next_update(&mut white_seat.updates).await;
    next_update(&mut black_seat.updates).await;

    let mut spectator = controller.spectator_join(white.game_id).await.unwrap();

    // Both seats hear about the new spectator.
    for stream in [&mut white_seat.updates, &mut black_seat.updates] {
        let Update::SpectatorJoinedUpdate(joined) = next_update(stream).await else {
            panic!("expected the spectator join broadcast");
        };
        assert_eq!(joined.spectator_id, spectator.spectator_id);
    }

    // The spectator starts with a snapshot of the position as it is now.
    let Update::SnapshotUpdate(snapshot) = next_update(&mut spectator.updates).await else {
        panic!("first message on a new stream must be the snapshot");
    };
    assert!(snapshot.fen.starts_with(FEN_AFTER_E4_PREFIX));

    // And follows the game from there.
    black_seat
        .game
        .make_move(entered_move(black.game_id, "e5", &black))
        .await
        .unwrap();
    assert!(matches!(
        next_update(&mut spectator.updates).await,
        Update::MoveUpdate(_)
    ));
}

#[tokio::test]
async fn fools_mate_decides_the_game_and_reaps_it() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;
    let (mut white_seat, mut black_seat) = join_both(&controller, &white, &black).await;

    let moves = [
        ("f3", &white),
        ("e5", &black),
        ("g4", &white),
        ("Qh4#", &black),
    ];
    for (san, mover) in moves {
        white_seat
            .game
            .make_move(entered_move(white.game_id, san, mover))
            .await
            .unwrap();
    }

    for stream in [&mut white_seat.updates, &mut black_seat.updates] {
        for (san, _) in moves {
            let Update::MoveUpdate(broadcast) = next_update(stream).await else {
                panic!("expected the move broadcast");
            };
            assert_eq!(broadcast.san, san);
        }
        let Update::ResultUpdate(result) = next_update(stream).await else {
            panic!("expected the result broadcast");
        };
        assert_eq!(result.result, "0-1");
    }

    // Decided games refuse further moves and broadcast nothing for them.
    assert_eq!(
        white_seat
            .game
            .make_move(entered_move(white.game_id, "e4", &white))
            .await,
        Err(GameError::GameFinished)
    );
    assert_eq!(
        black_seat.updates.try_recv().unwrap_err(),
        TryRecvError::Empty
    );

    controller.player_leave(white.game_id, white.player_id).await;
    controller.player_leave(black.game_id, black.player_id).await;

    // Both seats gone, nobody watching: the game gets reaped and later
    // joins bounce off.
    assert_eq!(
        controller
            .player_join(white.game_id, white.player_id)
            .await
            .map(|_| ())
            .unwrap_err(),
        GameError::InvalidGameId
    );
}

#[tokio::test]
async fn seat_leave_is_broadcast_and_play_continues() {
    let (controller, matchmaker) = start();
    let (white, black) = pair(&matchmaker).await;
    let (mut white_seat, mut black_seat) = join_both(&controller, &white, &black).await;

    white_seat
        .game
        .make_move(entered_move(white.game_id, "e4", &white))
        .await
        .unwrap();
    next_update(&mut white_seat.updates).await;
    next_update(&mut black_seat.updates).await;

    // White's transport dropped; the session issues the leave on its way out.
    controller.player_leave(white.game_id, white.player_id).await;

    assert_eq!(
        next_update(&mut black_seat.updates).await,
        Update::PlayerLeftUpdate(PlayerLeftUpdate {
            game_id: white.game_id,
            player_id: white.player_id,
        })
    );
    // The departed seat's stream closes instead of receiving the event.
    assert!(
        timeout(Duration::from_secs(5), white_seat.updates.recv())
            .await
            .unwrap()
            .is_none()
    );

    // It is black's turn; the remaining seat keeps playing.
    black_seat
        .game
        .make_move(entered_move(black.game_id, "e5", &black))
        .await
        .unwrap();
    assert!(matches!(
        next_update(&mut black_seat.updates).await,
        Update::MoveUpdate(_)
    ));
}

#[tokio::test]
async fn identifiers_advance_monotonically() {
    let (_controller, matchmaker) = start();

    for round in 0u64..3 {
        let (white, black) = pair(&matchmaker).await;
        assert_eq!(white.game_id, round);
        assert_eq!(white.player_id, round * 2);
        assert_eq!(black.player_id, round * 2 + 1);
    }
}

#[tokio::test]
async fn duplicate_seat_join_is_rejected() {
    let (controller, matchmaker) = start();
    let (white, _black) = pair(&matchmaker).await;

    let _seat = controller
        .player_join(white.game_id, white.player_id)
        .await
        .unwrap();
    assert_eq!(
        controller
            .player_join(white.game_id, white.player_id)
            .await
            .map(|_| ())
            .unwrap_err(),
        GameError::AlreadyJoined
    );
}

#[tokio::test]
async fn joins_on_unknown_games_are_rejected() {
    let (controller, _matchmaker) = start();

    assert_eq!(
        controller.player_join(7, 0).await.map(|_| ()).unwrap_err(),
        GameError::InvalidGameId
    );
    assert_eq!(
        controller.spectator_join(7).await.map(|_| ()).unwrap_err(),
        GameError::InvalidGameId
    );
}

#[tokio::test]
async fn abandoned_match_request_is_skipped() {
    let (_controller, matchmaker) = start();

    // A requester that went away before pairing must not block or corrupt
    // the queue for the two live ones.
    let (dead_tx, dead_rx) = oneshot::channel();
    drop(dead_rx);
    matchmaker.enqueue(dead_tx).await;

    let (white, black) = timeout(Duration::from_secs(5), pair(&matchmaker))
        .await
        .expect("live requests were not paired");
    assert_eq!(white.game_id, black.game_id);
}
