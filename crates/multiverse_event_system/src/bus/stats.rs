/// Statistics tracking for the event buses
use serde::{Deserialize, Serialize};

/// Per-bus statistics for monitoring dispatch health
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BusStats {
    /// Total number of registered handlers
    pub total_handlers: usize,
    /// Total number of events dispatched since creation
    pub events_dispatched: u64,
    /// Number of successful handler invocations
    pub deliveries: u64,
    /// Number of handler invocations that failed or panicked
    pub faults: u64,
    /// Events dispatched while no handler was registered for their type
    pub unhandled_events: u64,
}
