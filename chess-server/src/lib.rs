//! Real-time multiplayer core of a chess service: a matchmaker pairing
//! waiting players, a controller owning the games registry, one agent task
//! per live game, and session adapters bridging websockets to the
//! in-process event streams.

pub mod controller;
pub mod errors;
pub mod game;
pub mod matchmaker;
pub mod rules;
pub mod session;
