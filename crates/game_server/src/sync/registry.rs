//! Aggregation strategy registry and its builder.

use super::strategy::{AggregationStrategy, ShareScope};
use multiverse_event_system::UberId;
use std::ops::Add;

/// Keys an entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTarget {
    State(UberId),
    /// Every state of one uber state group
    Group(i32),
}

impl SyncTarget {
    fn matches(&self, id: UberId) -> bool {
        match self {
            SyncTarget::State(state) => *state == id,
            SyncTarget::Group(group) => *group == id.group,
        }
    }
}

/// Merge policy and share scope of one key or group.
#[derive(Debug, Clone)]
pub struct AggregationStrategyEntry {
    pub target: SyncTarget,
    pub strategy: AggregationStrategy,
    pub scope: ShareScope,
}

impl AggregationStrategyEntry {
    /// Sets the share scope. Entries share across the universe unless told otherwise.
    pub fn across(mut self, scope: ShareScope) -> Self {
        self.scope = scope;
        self
    }
}

/// First half of the `sync(..).with(..)` builder.
#[derive(Debug, Clone, Copy)]
pub struct SyncBuilder {
    target: SyncTarget,
}

impl SyncBuilder {
    pub fn with(self, strategy: AggregationStrategy) -> AggregationStrategyEntry {
        AggregationStrategyEntry {
            target: self.target,
            strategy,
            scope: ShareScope::Universe,
        }
    }
}

/// Starts an entry for one uber state.
///
/// ```rust
/// use game_server::sync::{sync, AggregationStrategy, AggregationStrategyRegistry, ShareScope};
/// use multiverse_event_system::UberId;
///
/// let registry = AggregationStrategyRegistry::new()
///     .with(sync(UberId::new(6, 1115)).with(AggregationStrategy::Max))
///     .with(sync(UberId::new(6, 2000)).with(AggregationStrategy::Or).across(ShareScope::Multiverse));
///
/// assert_eq!(registry.resolve(UberId::new(6, 2000)).unwrap().scope, ShareScope::Multiverse);
/// ```
pub fn sync(uber_id: UberId) -> SyncBuilder {
    SyncBuilder {
        target: SyncTarget::State(uber_id),
    }
}

/// Starts an entry covering a whole uber state group.
pub fn sync_group(group: i32) -> SyncBuilder {
    SyncBuilder {
        target: SyncTarget::Group(group),
    }
}

/// The merge policies active for one world.
///
/// Exact-state entries win over group entries; among entries of the same
/// kind, the one registered last wins.
#[derive(Debug, Clone, Default)]
pub struct AggregationStrategyRegistry {
    entries: Vec<AggregationStrategyEntry>,
}

impl AggregationStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: AggregationStrategyEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn with(mut self, entry: AggregationStrategyEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Looks up the entry governing `id`, if any.
    pub fn resolve(&self, id: UberId) -> Option<&AggregationStrategyEntry> {
        let exact = self
            .entries
            .iter()
            .rev()
            .find(|entry| matches!(entry.target, SyncTarget::State(_)) && entry.target.matches(id));

        exact.or_else(|| {
            self.entries
                .iter()
                .rev()
                .find(|entry| matches!(entry.target, SyncTarget::Group(_)) && entry.target.matches(id))
        })
    }

    /// Strategy and scope for `id`; unregistered keys are per-world copies.
    pub fn policy_for(&self, id: UberId) -> (AggregationStrategy, ShareScope) {
        self.resolve(id)
            .map(|entry| (entry.strategy.clone(), entry.scope))
            .unwrap_or((AggregationStrategy::Copy, ShareScope::World))
    }

    /// Scope of `id` without cloning the strategy.
    pub fn scope_of(&self, id: UberId) -> ShareScope {
        self.resolve(id).map(|entry| entry.scope).unwrap_or(ShareScope::World)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Composes two registries; entries of the right-hand side override.
impl Add for AggregationStrategyRegistry {
    type Output = AggregationStrategyRegistry;

    fn add(mut self, rhs: AggregationStrategyRegistry) -> Self::Output {
        self.entries.extend(rhs.entries);
        self
    }
}
