//! # Game Server - Multiverse Session Backend
//!
//! Real-time backend for cooperative and competitive game sessions. A session
//! (multiverse) groups worlds into universes; every world is one player's
//! progress replica. The server keeps the replicas consistent and drives the
//! session's game mode.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **State Synchronization** ([`sync`]) - Per-key merge policies and the
//!   engine that reconciles concurrent world updates into canonical values
//! * **Game Handlers** ([`handlers`]) - One state machine per game mode
//!   (normal, hide and seek, infection, league), wired from event buses, a
//!   periodic scheduler and the synchronization engine
//! * **Handler Registry** ([`GameHandlerRegistry`]) - Creates handlers on
//!   demand, restores and persists their snapshots and disposes idle ones
//! * **Seed Generator** ([`SeedGeneratorService`]) - Supervises the external
//!   content generator with a worker pool and a hard timeout
//!
//! ### Collaborators
//!
//! Durable storage and client transport live outside this crate, behind the
//! [`Storage`](storage::Storage) and
//! [`ConnectionDelivery`](connections::ConnectionDelivery) traits. In-memory
//! implementations of both ship with the crate.
//!
//! ### Message Flow
//!
//! 1. A client message reaches [`GameHandlerRegistry::on_message`]
//! 2. The registry resolves the sender's session and its live handler
//! 3. The handler dispatches the message on its message bus, one operation
//!    at a time
//! 4. Uber state updates are merged by the synchronization engine and the
//!    resulting deltas are delivered to every world that shares them
//!
//! ## Error Handling
//!
//! Failures are categorized by [`ServerError`]. Storage and generator errors
//! convert into it with `?`; errors escaping an event handler become bus
//! faults, and fatal ones make the registry reconsider the handler.

pub use config::ServerConfig;
pub use error::ServerError;
pub use handlers::{AnyGameHandler, GameHandler, GameHandlerType, HandlerContext, HandlerServices};
pub use registry::GameHandlerRegistry;
pub use seedgen::{SeedGenConfig, SeedGeneratorService};

pub mod config;
pub mod connections;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod model;
pub mod registry;
pub mod seedgen;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;
