//! Shutdown coordination for graceful server shutdown.
//!
//! The application flips this state once a termination signal arrives; the
//! game handler registry checks it before creating new handlers, and the
//! final snapshot pass marks it complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across components.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    /// No new sessions or handlers may be started
    shutdown_initiated: Arc<AtomicBool>,
    /// Every live handler has been persisted and stopped
    shutdown_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Stops accepting new sessions.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - no new game handlers will be started");
        }
    }

    /// Marks every handler snapshot as persisted.
    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ All handler snapshots persisted - ready for final cleanup");
    }
}
