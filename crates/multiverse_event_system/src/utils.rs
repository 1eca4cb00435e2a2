//! # Utility Functions

/// Returns the current Unix timestamp in milliseconds.
///
/// A clock set before the Unix epoch yields `0` rather than panicking.
pub fn current_timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
