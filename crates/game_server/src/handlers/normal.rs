//! Plain co-op: progression shared across each universe, nothing else.

use super::{on_uber_state_updates, GameHandler, GameHandlerType, HandlerContext, HandlerCore};
use crate::error::ServerError;
use crate::model::WorldRecord;
use crate::sync::{normal_world_sync_aggregation_strategy, AggregationStrategyRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

struct Inner {
    context: HandlerContext,
}

impl HandlerCore for Inner {
    fn context(&self) -> &HandlerContext {
        &self.context
    }
}

#[derive(Clone)]
pub struct NormalGameHandler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NormalGameHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalGameHandler")
            .field("multiverse_id", &self.inner.context.multiverse_id())
            .finish()
    }
}

impl NormalGameHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            inner: Arc::new(Inner { context }),
        }
    }
}

#[async_trait]
impl GameHandler for NormalGameHandler {
    type ClientInfo = ();

    fn context(&self) -> &HandlerContext {
        &self.inner.context
    }

    fn handler_type(&self) -> GameHandlerType {
        GameHandlerType::Normal
    }

    async fn start(&self) -> Result<(), ServerError> {
        on_uber_state_updates(&self.inner).await;
        info!("🎮 Normal game handler started for multiverse {}", self.inner.context.multiverse_id());
        Ok(())
    }

    async fn generate_state_aggregation_registry(&self, _world: &WorldRecord) -> AggregationStrategyRegistry {
        normal_world_sync_aggregation_strategy()
    }
}
