//! # Event Traits and Errors
//!
//! This module defines the fundamental [`Event`] trait, the [`EventHandler`]
//! abstraction the buses store, and the error and fault types produced while
//! dispatching.
//!
//! ## Design Principles
//!
//! - **Type Safety**: Handlers are registered for one concrete event type and
//!   only ever see values of that type
//! - **In-process**: Events are passed by `Arc`, never serialized; every
//!   consumer is known when the owning game handler starts
//! - **Isolation**: A failing handler produces a [`DispatchFault`] instead of
//!   an error for the dispatching caller

use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

// ============================================================================
// Event Traits and Core Infrastructure
// ============================================================================

/// Core trait that all events must implement.
///
/// Most types will automatically implement this trait through the blanket
/// implementation: any `Send + Sync + Debug + 'static` type is an event.
///
/// ```rust
/// #[derive(Debug)]
/// struct MyEvent {
///     data: String,
/// }
/// // MyEvent now implements Event automatically!
/// ```
pub trait Event: Send + Sync + Any + Debug {
    /// Returns the type name of this event for debugging and logging.
    fn type_name() -> &'static str
    where
        Self: Sized;
}

impl<T> Event for T
where
    T: Send + Sync + Any + Debug + 'static,
{
    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Tag identifying who registered a handler.
///
/// Registration is idempotent per `(owner, event type)` and handlers can be
/// removed in bulk by owner when a game handler is disposed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerTag(pub String);

impl OwnerTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for OwnerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerTag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Handler trait for processing events asynchronously.
///
/// Abstracts over the type-specific handling logic so a bus can store
/// handlers for many event types side by side. `M` is the metadata passed
/// alongside each event (`()` for anonymous broadcast, the sender id for
/// sender-tagged buses).
///
/// Most users will not implement this trait directly, but instead register
/// closures through [`crate::EventBus::register`] or
/// [`crate::SenderEventBus::register`].
#[async_trait]
pub trait EventHandler<M>: Send + Sync + 'static + Debug {
    /// Handles one event. A bus only passes events of [`Self::expected_type_id`].
    async fn handle(&self, event: Arc<dyn Any + Send + Sync>, meta: M) -> Result<(), EventError>;

    /// Returns the TypeId of the event type this handler expects.
    fn expected_type_id(&self) -> TypeId;

    /// Returns a human-readable name for this handler for debugging.
    fn handler_name(&self) -> &str;

    /// Returns the tag of whoever registered this handler.
    fn owner(&self) -> &OwnerTag;
}

/// A handler failure captured during dispatch.
///
/// Faults never reach the caller of `dispatch`; they are logged and forwarded
/// to the fault channel of the bus (usually owned by a game handler).
#[derive(Debug, Clone)]
pub struct DispatchFault {
    /// Name of the bus that dispatched the event
    pub bus: &'static str,
    /// Owner of the failing handler
    pub owner: OwnerTag,
    /// Name of the failing handler
    pub handler: String,
    /// Type name of the event being delivered
    pub event_type: &'static str,
    /// The failure itself
    pub error: EventError,
}

/// Errors that can occur in the event system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EventError {
    /// Handler execution failed during event processing
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),
    /// Handler panicked while processing an event
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
    /// The handler's own invariants are broken; it should not keep running
    #[error("Fatal handler error: {0}")]
    Fatal(String),
    #[error("An unexpected error occurred: {0}")]
    Other(String),
}

impl EventError {
    /// Whether the error indicates unrecoverable handler corruption.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EventError::Fatal(_))
    }
}
