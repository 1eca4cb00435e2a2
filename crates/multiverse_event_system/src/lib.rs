//! # Multiverse Event System
//!
//! Typed in-process event dispatch and tick scheduling for multiverse game
//! handlers. Every active game session owns its own buses and scheduler;
//! nothing here is shared between sessions.
//!
//! ## Core Features
//!
//! - **Type Safety**: Handlers are registered for one concrete Rust type and
//!   receive it by `Arc`, never as serialized bytes
//! - **Two Bus Flavors**: [`EventBus`] for anonymous session events and
//!   [`SenderEventBus`] for client messages tagged with their sender
//! - **Fault Isolation**: Failing or panicking handlers are reported as
//!   [`DispatchFault`]s and never stop delivery to their siblings
//! - **Owner Tracking**: Registration is idempotent per owner and event type;
//!   all handlers of an owner can be removed in one call
//! - **Scheduling**: [`Scheduler`] runs one periodic tick callback with a
//!   hard stop guarantee
//!
//! ## Quick Start Example
//!
//! ```rust
//! use multiverse_event_system::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct PlayerMoved { x: f32, y: f32 }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let messages: SenderEventBus<PlayerId> = SenderEventBus::new("messages");
//!
//! messages.register("example", |event: Arc<PlayerMoved>, sender: PlayerId| async move {
//!     tracing::info!("{} moved to ({}, {})", sender, event.x, event.y);
//!     Ok::<(), EventError>(())
//! }).await;
//!
//! messages.dispatch(PlayerMoved { x: 1.0, y: 2.0 }, PlayerId::new()).await;
//! # }
//! ```

pub mod bus;
pub mod events;
pub mod scheduler;
pub mod shutdown;
pub mod types;
pub mod utils;

pub use bus::{BusStats, EventBus, SenderEventBus, TypedEventHandler};
pub use events::{DispatchFault, Event, EventError, EventHandler, OwnerTag};
pub use scheduler::{Scheduler, TickFn};
pub use shutdown::ShutdownState;
pub use types::*;
pub use utils::current_timestamp_millis;
