/// Type-erased handler storage for the event buses
use crate::events::{Event, EventError, EventHandler, OwnerTag};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Boxed handler closure as stored inside a [`TypedEventHandler`].
pub type BoxedHandlerFn<E, M> =
    Box<dyn Fn(Arc<E>, M) -> BoxFuture<'static, Result<(), EventError>> + Send + Sync>;

/// Type-safe wrapper for event handlers.
///
/// Bridges between the generic [`EventHandler`] trait and one specific event
/// type, providing compile-time type safety at registration while the bus
/// stores handlers for many types side by side.
pub struct TypedEventHandler<E, M>
where
    E: Event,
{
    handler: BoxedHandlerFn<E, M>,
    name: String,
    owner: OwnerTag,
}

impl<E, M> std::fmt::Debug for TypedEventHandler<E, M>
where
    E: Event,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedEventHandler")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

impl<E, M> TypedEventHandler<E, M>
where
    E: Event,
{
    pub fn new(owner: OwnerTag, handler: BoxedHandlerFn<E, M>) -> Self {
        let name = format!("{}::{}", owner, E::type_name());
        Self { handler, name, owner }
    }
}

#[async_trait]
impl<E, M> EventHandler<M> for TypedEventHandler<E, M>
where
    E: Event,
    M: Send + 'static,
{
    async fn handle(&self, event: Arc<dyn Any + Send + Sync>, meta: M) -> Result<(), EventError> {
        let event = event.downcast::<E>().map_err(|_| {
            EventError::Other(format!(
                "handler '{}' received an event that is not a {}",
                self.name,
                E::type_name()
            ))
        })?;
        (self.handler)(event, meta).await
    }

    fn expected_type_id(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn handler_name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> &OwnerTag {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[derive(Debug)]
    struct Ping;

    #[derive(Debug)]
    struct Pong;

    fn ping_handler() -> TypedEventHandler<Ping, ()> {
        TypedEventHandler::new(OwnerTag::new("tests"), Box::new(|_event: Arc<Ping>, _meta: ()| async { Ok::<(), EventError>(()) }.boxed()))
    }

    #[tokio::test]
    async fn test_handler_reports_its_event_type() {
        let handler = ping_handler();
        assert_eq!(handler.expected_type_id(), TypeId::of::<Ping>());
        assert_ne!(handler.expected_type_id(), TypeId::of::<Pong>());
        assert!(handler.handler_name().starts_with("tests::"));
        assert!(handler.handle(Arc::new(Ping), ()).await.is_ok());
    }

    #[tokio::test]
    async fn test_foreign_event_is_an_error_not_a_panic() {
        let handler = ping_handler();
        let result = handler.handle(Arc::new(Pong), ()).await;
        assert!(matches!(result, Err(EventError::Other(_))));
    }
}
