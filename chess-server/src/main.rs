use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chess_server::controller::{ControllerHandle, GamesController};
use chess_server::matchmaker::{Matchmaker, MatchmakerHandle};
use chess_server::session::{run_player_session, run_spectator_session};
use protocol::MatchReply;

#[derive(Clone)]
struct AppState {
    controller: ControllerHandle,
    matchmaker: MatchmakerHandle,
}

#[tokio::main]
/// Activates error tracing, starts the controller and matchmaker tasks,
/// then sets up the routing system serving matchmaking over plain HTTP and
/// the play/spectate websockets. The server listens on port 1323.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true) // Thread-ID (helpful for Tokio)
                .with_thread_names(true),
        )
        .init();

    let controller = GamesController::spawn();
    let matchmaker = Matchmaker::spawn(controller.clone());
    let app_state = AppState {
        controller,
        matchmaker,
    };

    let app = Router::new()
        .route("/", get(hello_handler))
        .route("/find_match", get(find_match_handler))
        .route("/play", get(play_handler))
        .route("/spectate", get(spectate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:1323").await.unwrap();

    axum::serve(listener, app).await.unwrap();
}

async fn hello_handler() -> &'static str {
    "Hello, World!"
}

/// Blocks until the matchmaker has paired the caller with a partner, then
/// answers with the new game and the assigned seat.
async fn find_match_handler(State(state): State<AppState>) -> Response {
    match state.matchmaker.find_match().await {
        Some(found) => Json(MatchReply::MatchFound(found)).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Upgrades the response to a websocket running the player protocol.
async fn play_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_player_session(socket, state.controller))
}

/// Upgrades the response to a websocket running the spectator protocol.
async fn spectate_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_spectator_session(socket, state.controller))
}
