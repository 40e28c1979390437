//! Simulation systems, registered once at startup in a fixed order.

pub mod admin;
pub mod chat;
pub mod connections;
pub mod hit;
pub mod login;
pub mod players;
pub mod powerups;
