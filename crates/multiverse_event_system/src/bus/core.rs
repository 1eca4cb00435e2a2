/// Core handler table shared by both bus flavors
use super::handlers::{BoxedHandlerFn, TypedEventHandler};
use super::stats::BusStats;
use crate::events::{DispatchFault, Event, EventError, EventHandler, OwnerTag};
use dashmap::DashMap;
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

/// Handler storage and synchronous-order dispatch.
///
/// Uses DashMap keyed by event `TypeId` so registration and lookup never
/// contend with each other; the handler list of one type is cloned out
/// before any handler runs, so handlers may register or unregister while a
/// dispatch is in flight without deadlocking.
pub(crate) struct HandlerTable<M> {
    name: &'static str,
    handlers: DashMap<TypeId, Vec<Arc<dyn EventHandler<M>>>>,
    stats: RwLock<BusStats>,
    faults: Option<mpsc::UnboundedSender<DispatchFault>>,
}

impl<M> std::fmt::Debug for HandlerTable<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("name", &self.name)
            .field("event_types", &self.handlers.len())
            .field("fault_channel", &self.faults.is_some())
            .finish()
    }
}

impl<M> HandlerTable<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str, faults: Option<mpsc::UnboundedSender<DispatchFault>>) -> Self {
        Self {
            name,
            handlers: DashMap::new(),
            stats: RwLock::new(BusStats::default()),
            faults,
        }
    }

    /// Registers a handler, replacing in place any handler the same owner
    /// already registered for `E` so the original delivery position is kept.
    pub(crate) async fn register<E: Event>(&self, owner: OwnerTag, handler: BoxedHandlerFn<E, M>) {
        let typed = TypedEventHandler::new(owner.clone(), handler);
        let handler_name = typed.handler_name().to_string();
        let handler_arc: Arc<dyn EventHandler<M>> = Arc::new(typed);

        let replaced = {
            let mut list = self.handlers.entry(TypeId::of::<E>()).or_default();
            match list.iter().position(|existing| existing.owner() == &owner) {
                Some(index) => {
                    list[index] = handler_arc;
                    true
                }
                None => {
                    list.push(handler_arc);
                    false
                }
            }
        };

        if !replaced {
            let mut stats = self.stats.write().await;
            stats.total_handlers += 1;
        }

        debug!("📝 [{}] Registered handler {}", self.name, handler_name);
    }

    /// Delivers `event` to every handler of its exact type, one after the other.
    ///
    /// Returns the number of handlers that completed successfully. Failures
    /// and panics are reported as [`DispatchFault`]s and never abort the
    /// delivery to later handlers.
    pub(crate) async fn dispatch<E: Event>(&self, event: E, meta: M) -> usize {
        let handlers = self
            .handlers
            .get(&TypeId::of::<E>())
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!("[{}] No handlers for event {}", self.name, E::type_name());
            let mut stats = self.stats.write().await;
            stats.events_dispatched += 1;
            stats.unhandled_events += 1;
            return 0;
        }

        let event: Arc<dyn Any + Send + Sync> = Arc::new(event);
        let mut delivered = 0usize;
        let mut failed = 0u64;

        for handler in handlers.iter() {
            debug_assert_eq!(
                handler.expected_type_id(),
                TypeId::of::<E>(),
                "handler {} filed under the wrong event type",
                handler.handler_name()
            );
            let outcome = AssertUnwindSafe(handler.handle(event.clone(), meta.clone()))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => {
                    delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e,
                Err(panic) => EventError::HandlerPanicked(panic_message(panic.as_ref())),
            };

            failed += 1;
            self.report_fault(handler.as_ref(), E::type_name(), error);
        }

        let mut stats = self.stats.write().await;
        stats.events_dispatched += 1;
        stats.deliveries += delivered as u64;
        stats.faults += failed;

        delivered
    }

    fn report_fault(&self, handler: &dyn EventHandler<M>, event_type: &'static str, error: EventError) {
        error!(
            "❌ [{}] Handler {} failed on {}: {}",
            self.name,
            handler.handler_name(),
            event_type,
            error
        );

        if let Some(faults) = &self.faults {
            let fault = DispatchFault {
                bus: self.name,
                owner: handler.owner().clone(),
                handler: handler.handler_name().to_string(),
                event_type,
                error,
            };
            if faults.send(fault).is_err() {
                debug!("[{}] Fault channel closed, fault only logged", self.name);
            }
        }
    }

    /// Removes every handler registered by `owner`, returning how many were removed.
    pub(crate) async fn unregister_owner(&self, owner: &OwnerTag) -> usize {
        let mut removed = 0usize;
        self.handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|handler| handler.owner() != owner);
            removed += before - list.len();
            !list.is_empty()
        });

        if removed > 0 {
            let mut stats = self.stats.write().await;
            stats.total_handlers = stats.total_handlers.saturating_sub(removed);
            info!("🗑️ [{}] Removed {} handlers owned by '{}'", self.name, removed, owner);
        }

        removed
    }

    pub(crate) fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    pub(crate) async fn stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
