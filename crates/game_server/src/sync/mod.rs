//! # State Synchronization
//!
//! Per-key merge policies ([`AggregationStrategyRegistry`]) and the engine
//! that reconciles concurrent per-world updates into canonical values
//! ([`StateSynchronization`]).
//!
//! ## Flow
//!
//! 1. A client submits one or more uber state values for its world
//! 2. [`StateSynchronization::aggregate_states`] merges them against the
//!    canonical value of each key's share scope, as one transaction
//! 3. [`StateSynchronization::sync_states`] pushes the resulting deltas to
//!    the submitting world and to every world sharing the changed keys
//!
//! Keys without a policy are per-world copies and never leave their world.

mod defaults;
mod engine;
mod registry;
mod strategy;

pub use defaults::{
    is_pickup, normal_world_sync_aggregation_strategy, pickup_name, ABILITY_GROUP, COLLECTIBLE_COUNTER_GROUP,
    PICKUP_IDS, SHARD_GROUP, WORLD_PROGRESSION_GROUPS,
};
pub use engine::{AggregatedState, AggregationResult, StateSynchronization};
pub use registry::{sync, sync_group, AggregationStrategyEntry, AggregationStrategyRegistry, SyncBuilder, SyncTarget};
pub use strategy::{AggregationStrategy, MergeFn, ShareScope};
