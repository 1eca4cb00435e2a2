/// Event bus module - the two bus flavors every game handler owns
mod core;
mod handlers;
mod stats;
mod tests;

pub use handlers::{BoxedHandlerFn, TypedEventHandler};
pub use stats::BusStats;

use crate::events::{DispatchFault, Event, EventError, OwnerTag};
use self::core::HandlerTable;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Anonymous broadcast bus.
///
/// Used for session-lifecycle events (worlds created or deleted, players
/// joining or leaving, developer commands) which carry no sender.
///
/// # Examples
///
/// ```rust
/// use multiverse_event_system::{EventBus, EventError};
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct WorldReset { world: u64 }
///
/// # #[tokio::main]
/// # async fn main() {
/// let bus = EventBus::new("session");
/// bus.register("docs", |event: Arc<WorldReset>| async move {
///     println!("world {} reset", event.world);
///     Ok::<(), EventError>(())
/// }).await;
///
/// assert_eq!(bus.dispatch(WorldReset { world: 7 }).await, 1);
/// # }
/// ```
#[derive(Debug)]
pub struct EventBus {
    table: HandlerTable<()>,
}

impl EventBus {
    /// Creates a bus whose faults are only logged.
    pub fn new(name: &'static str) -> Self {
        Self {
            table: HandlerTable::new(name, None),
        }
    }

    /// Creates a bus that also forwards every fault to `faults`.
    pub fn with_fault_channel(name: &'static str, faults: mpsc::UnboundedSender<DispatchFault>) -> Self {
        Self {
            table: HandlerTable::new(name, Some(faults)),
        }
    }

    /// Registers `handler` for events of type `E`.
    ///
    /// Registering again with the same owner for the same type replaces the
    /// earlier handler without changing its delivery position.
    pub async fn register<E, F, Fut>(&self, owner: impl Into<OwnerTag>, handler: F)
    where
        E: Event,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        let boxed: BoxedHandlerFn<E, ()> =
            Box::new(move |event: Arc<E>, _: ()| -> BoxFuture<'static, Result<(), EventError>> {
                Box::pin(handler(event))
            });
        self.table.register(owner.into(), boxed).await;
    }

    /// Delivers `event` to all handlers of its type in registration order.
    /// Returns the number of handlers that completed successfully.
    pub async fn dispatch<E: Event>(&self, event: E) -> usize {
        self.table.dispatch(event, ()).await
    }

    /// Removes every handler registered by `owner`.
    pub async fn unregister_owner(&self, owner: &OwnerTag) -> usize {
        self.table.unregister_owner(owner).await
    }

    pub fn handler_count<E: Event>(&self) -> usize {
        self.table.handler_count::<E>()
    }

    pub async fn stats(&self) -> BusStats {
        self.table.stats().await
    }
}

/// Sender-tagged broadcast bus.
///
/// Used for client-originated messages: every dispatch carries the identity
/// of the participant that sent the message, and every handler receives it.
#[derive(Debug)]
pub struct SenderEventBus<S> {
    table: HandlerTable<S>,
}

impl<S> SenderEventBus<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Creates a bus whose faults are only logged.
    pub fn new(name: &'static str) -> Self {
        Self {
            table: HandlerTable::new(name, None),
        }
    }

    /// Creates a bus that also forwards every fault to `faults`.
    pub fn with_fault_channel(name: &'static str, faults: mpsc::UnboundedSender<DispatchFault>) -> Self {
        Self {
            table: HandlerTable::new(name, Some(faults)),
        }
    }

    /// Registers `handler` for messages of type `E`; see [`EventBus::register`].
    pub async fn register<E, F, Fut>(&self, owner: impl Into<OwnerTag>, handler: F)
    where
        E: Event,
        F: Fn(Arc<E>, S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        let boxed: BoxedHandlerFn<E, S> =
            Box::new(move |event: Arc<E>, sender: S| -> BoxFuture<'static, Result<(), EventError>> {
                Box::pin(handler(event, sender))
            });
        self.table.register(owner.into(), boxed).await;
    }

    /// Delivers `event` sent by `sender` to all handlers of its type in registration order.
    pub async fn dispatch<E: Event>(&self, event: E, sender: S) -> usize {
        self.table.dispatch(event, sender).await
    }

    pub async fn unregister_owner(&self, owner: &OwnerTag) -> usize {
        self.table.unregister_owner(owner).await
    }

    pub fn handler_count<E: Event>(&self) -> usize {
        self.table.handler_count::<E>()
    }

    pub async fn stats(&self) -> BusStats {
        self.table.stats().await
    }
}
