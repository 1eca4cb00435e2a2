//! Merge policies and share scopes.

use crate::model::ScopeKey;
use multiverse_event_system::{MultiverseId, UniverseId, WorldId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which replicas converge on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareScope {
    /// Only the submitting world
    World,
    /// Every world of the submitting world's universe
    Universe,
    /// Every world of the session
    Multiverse,
}

impl ShareScope {
    /// The canonical store this scope resolves to for one world.
    pub fn key_for(self, world: WorldId, universe: UniverseId, multiverse: MultiverseId) -> ScopeKey {
        match self {
            ShareScope::World => ScopeKey::World(world),
            ShareScope::Universe => ScopeKey::Universe(universe),
            ShareScope::Multiverse => ScopeKey::Multiverse(multiverse),
        }
    }
}

/// Custom merge function: `(current canonical value, submitted value) -> merged value`.
pub type MergeFn = Arc<dyn Fn(Option<f64>, f64) -> f64 + Send + Sync>;

/// How a submitted value merges with the current canonical value.
#[derive(Clone)]
pub enum AggregationStrategy {
    /// Keeps the larger value
    Max,
    /// Keeps the smaller value
    Min,
    /// Logical OR: true (`1.0`) once either side is non-zero
    Or,
    /// Overwrites unconditionally; last submission wins
    Copy,
    /// Accumulates submissions
    Sum,
    /// Mode-specific merge
    Custom { name: &'static str, merge: MergeFn },
}

impl std::fmt::Debug for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationStrategy::Max => f.write_str("Max"),
            AggregationStrategy::Min => f.write_str("Min"),
            AggregationStrategy::Or => f.write_str("Or"),
            AggregationStrategy::Copy => f.write_str("Copy"),
            AggregationStrategy::Sum => f.write_str("Sum"),
            AggregationStrategy::Custom { name, .. } => write!(f, "Custom({name})"),
        }
    }
}

impl AggregationStrategy {
    pub fn custom(name: &'static str, merge: impl Fn(Option<f64>, f64) -> f64 + Send + Sync + 'static) -> Self {
        AggregationStrategy::Custom {
            name,
            merge: Arc::new(merge),
        }
    }

    /// Merges `submitted` into `current`. A missing current value is the
    /// first write of the key in its scope.
    pub fn merge(&self, current: Option<f64>, submitted: f64) -> f64 {
        match self {
            AggregationStrategy::Max => current.map_or(submitted, |current| current.max(submitted)),
            AggregationStrategy::Min => current.map_or(submitted, |current| current.min(submitted)),
            AggregationStrategy::Or => bool_value(current.unwrap_or(0.0) != 0.0 || submitted != 0.0),
            AggregationStrategy::Copy => submitted,
            AggregationStrategy::Sum => current.unwrap_or(0.0) + submitted,
            AggregationStrategy::Custom { merge, .. } => merge(current, submitted),
        }
    }
}

fn bool_value(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_takes_submitted_value() {
        assert_eq!(AggregationStrategy::Max.merge(None, 3.0), 3.0);
        assert_eq!(AggregationStrategy::Sum.merge(None, 3.0), 3.0);
        assert_eq!(AggregationStrategy::Or.merge(None, 5.0), 1.0);
        assert_eq!(AggregationStrategy::Or.merge(None, 0.0), 0.0);
    }

    #[test]
    fn test_merges_against_current_value() {
        assert_eq!(AggregationStrategy::Max.merge(Some(4.0), 2.0), 4.0);
        assert_eq!(AggregationStrategy::Min.merge(Some(4.0), 2.0), 2.0);
        assert_eq!(AggregationStrategy::Or.merge(Some(1.0), 0.0), 1.0);
        assert_eq!(AggregationStrategy::Copy.merge(Some(1.0), 0.0), 0.0);
        assert_eq!(AggregationStrategy::Sum.merge(Some(1.5), 2.0), 3.5);
    }

    #[test]
    fn test_custom_strategy_sees_missing_current() {
        let strategy = AggregationStrategy::custom("count_writes", |current, _| current.unwrap_or(0.0) + 1.0);
        assert_eq!(strategy.merge(None, 9.0), 1.0);
        assert_eq!(strategy.merge(Some(1.0), 9.0), 2.0);
        assert_eq!(format!("{strategy:?}"), "Custom(count_writes)");
    }

    #[test]
    fn test_scope_keys() {
        let (w, u, m) = (WorldId(1), UniverseId(2), MultiverseId(3));
        assert_eq!(ShareScope::World.key_for(w, u, m), ScopeKey::World(w));
        assert_eq!(ShareScope::Universe.key_for(w, u, m), ScopeKey::Universe(u));
        assert_eq!(ShareScope::Multiverse.key_for(w, u, m), ScopeKey::Multiverse(m));
    }
}
