//! # Game Server Library
//!
//! Authoritative real-time server core for the multiplayer game. The process
//! splits into two cooperating schedulers:
//!
//! - the **transport scheduler** ([`transport`]) owns the listener socket and
//!   every client WebSocket, and knows nothing about the game;
//! - the **simulation scheduler** ([`simulation`]) owns the world and all
//!   game systems, and never touches a socket.
//!
//! The two sides share no mutable state. They communicate exclusively over
//! the ordered, lossless in-process channels defined in [`relay`]: transport
//! events flow inward, simulation commands flow outward, and either side
//! failing brings the whole process down rather than leaving a half-dead
//! server running.
//!
//! Inside the simulation, all logic lives in systems registered on the
//! [`dispatch`] scheduler. Systems communicate through typed events with
//! three delivery modes (immediate, tick-deferred, channel-batched); the
//! world store ([`world`]) is passed to every handler by mutable reference,
//! so no locks exist anywhere in the simulation.
//!
//! The wire protocol is isolated in the `shared` crate; the server treats
//! frames as opaque byte vectors outside the packet router.

pub mod combat;
pub mod config;
pub mod connection;
pub mod constants;
pub mod dispatch;
pub mod ids;
pub mod relay;
pub mod simulation;
pub mod spawn_grid;
pub mod support;
pub mod systems;
pub mod transport;
pub mod world;
