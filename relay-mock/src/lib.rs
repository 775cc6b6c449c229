//! relay-mock
//!
//! Deterministic, in-memory fixtures for the two external seams the relay
//! depends on: [`relay_core::Repository`] and [`relay_core::GatewayDecoder`].
//! No network, no filesystem, no real clock dependencies beyond `chrono::Utc::now`.

mod decoder;
mod repository;

pub use crate::decoder::ScriptedDecoder;
pub use crate::repository::InMemoryRepository;
