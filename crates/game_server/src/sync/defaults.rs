//! Default progression sync policy and pickup classification.

use super::registry::{sync, sync_group, AggregationStrategyRegistry};
use super::strategy::AggregationStrategy;
use multiverse_event_system::UberId;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Ability unlock flags.
pub const ABILITY_GROUP: i32 = 6;
/// Spirit shard ownership flags.
pub const SHARD_GROUP: i32 = 7;
/// Map and area progression flags (doors, levers, cleared encounters).
pub const WORLD_PROGRESSION_GROUPS: &[i32] = &[21, 24, 28, 37, 42, 44, 48, 58, 937, 945];
/// Collectible counters (keystones, ore, quest items); only ever grow.
pub const COLLECTIBLE_COUNTER_GROUP: i32 = 5;

/// Named pickups whose ownership is announced in some game modes.
pub static PICKUP_IDS: Lazy<BTreeMap<&'static str, UberId>> = Lazy::new(|| {
    BTreeMap::from([
        ("Bash", UberId::new(ABILITY_GROUP, 1000)),
        ("Double Jump", UberId::new(ABILITY_GROUP, 1005)),
        ("Launch", UberId::new(ABILITY_GROUP, 1008)),
        ("Grapple", UberId::new(ABILITY_GROUP, 1031)),
        ("Glide", UberId::new(ABILITY_GROUP, 1014)),
        ("Water Breath", UberId::new(ABILITY_GROUP, 1023)),
        ("Dash", UberId::new(ABILITY_GROUP, 1102)),
        ("Light Burst", UberId::new(ABILITY_GROUP, 1051)),
        ("Flap", UberId::new(ABILITY_GROUP, 1118)),
        ("Triple Jump", UberId::new(SHARD_GROUP, 2)),
        ("Magnet", UberId::new(SHARD_GROUP, 8)),
        ("Ultra Grapple", UberId::new(SHARD_GROUP, 39)),
    ])
});

/// Whether `id` is one of the [`PICKUP_IDS`].
pub fn is_pickup(id: UberId) -> bool {
    PICKUP_IDS.values().any(|pickup| *pickup == id)
}

/// Display name of a pickup key.
pub fn pickup_name(id: UberId) -> Option<&'static str> {
    PICKUP_IDS
        .iter()
        .find(|(_, pickup)| **pickup == id)
        .map(|(name, _)| *name)
}

/// Co-op progression sharing used by every game mode as its base.
///
/// Abilities, shards and world progression are flags OR-ed across the
/// universe; collectible counters keep their maximum.
pub fn normal_world_sync_aggregation_strategy() -> AggregationStrategyRegistry {
    let mut registry = AggregationStrategyRegistry::new();
    registry
        .register(sync_group(ABILITY_GROUP).with(AggregationStrategy::Or))
        .register(sync_group(SHARD_GROUP).with(AggregationStrategy::Or))
        .register(sync_group(COLLECTIBLE_COUNTER_GROUP).with(AggregationStrategy::Max));

    for group in WORLD_PROGRESSION_GROUPS {
        registry.register(sync_group(*group).with(AggregationStrategy::Or));
    }

    for pickup in PICKUP_IDS.values() {
        registry.register(sync(*pickup).with(AggregationStrategy::Or));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ShareScope;

    #[test]
    fn test_pickups_are_classified() {
        let bash = PICKUP_IDS["Bash"];
        assert!(is_pickup(bash));
        assert_eq!(pickup_name(bash), Some("Bash"));
        assert!(!is_pickup(UberId::new(ABILITY_GROUP, 1115)));
    }

    #[test]
    fn test_default_registry_shares_progression_across_universe() {
        let registry = normal_world_sync_aggregation_strategy();

        assert_eq!(registry.scope_of(UberId::new(21, 100)), ShareScope::Universe);
        assert!(matches!(
            registry.resolve(UberId::new(COLLECTIBLE_COUNTER_GROUP, 3)).unwrap().strategy,
            AggregationStrategy::Max
        ));
        assert_eq!(registry.scope_of(UberId::new(3, 0)), ShareScope::World);
    }
}
