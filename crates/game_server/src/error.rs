//! Error types and handling for the game server.
//!
//! Every failure surfaced by the multiverse backend falls into one of the
//! [`ServerError`] categories. Storage and generator failures convert into it
//! with `?`, and it converts into [`EventError`] when it escapes an event
//! handler so that handler-fatal conditions stop the owning handler's
//! scheduler.

use crate::seedgen::SeedGenError;
use crate::storage::StorageError;
use multiverse_event_system::EventError;

/// Enumeration of possible server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Missing or invalid required configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A referenced session, world or player does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request or role mismatch; nothing was mutated
    #[error("Validation error: {0}")]
    Validation(String),

    /// An external process exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The seed generator failed
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// A handler invariant broke underneath an in-flight operation
    #[error("Fatal handler error: {0}")]
    HandlerFatal(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServerError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound { kind, id } => ServerError::NotFound(format!("{kind} {id}")),
            other => ServerError::Storage(other),
        }
    }
}

impl From<SeedGenError> for ServerError {
    fn from(error: SeedGenError) -> Self {
        match error {
            SeedGenError::Timeout { .. } => ServerError::Timeout(error.to_string()),
            other => ServerError::Generation(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(error: serde_json::Error) -> Self {
        ServerError::Internal(format!("serialization failed: {error}"))
    }
}

impl From<ServerError> for EventError {
    fn from(error: ServerError) -> Self {
        match error {
            ServerError::HandlerFatal(message) => EventError::Fatal(message),
            other => EventError::HandlerExecution(other.to_string()),
        }
    }
}

impl ServerError {
    /// Converts a not-found error into a handler-fatal one.
    ///
    /// Used when the record belongs to the handler's own session, so its
    /// absence means the session vanished underneath the handler.
    pub fn vanished(self) -> Self {
        match self {
            ServerError::NotFound(what) => ServerError::HandlerFatal(format!("{what} vanished during operation")),
            other => other,
        }
    }
}
