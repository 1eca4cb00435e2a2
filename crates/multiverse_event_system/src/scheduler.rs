//! # Periodic Tick Scheduler
//!
//! Every active game handler owns one [`Scheduler`]. It fires a single
//! zero-argument tick callback at a fixed period until stopped.
//!
//! ## Guarantees
//!
//! - A tick runs to completion before the next one starts; slow ticks delay
//!   the following firing instead of overlapping it
//! - Once [`Scheduler::stop`] returns, no tick is in flight and none will fire
//! - A tick returning an error is logged; only a fatal error halts the schedule

use crate::events::EventError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Tick callback invoked on each firing.
pub type TickFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), EventError>> + Send + Sync>;

/// Fixed-period tick timer.
///
/// ```rust
/// use multiverse_event_system::Scheduler;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let ticks = Arc::new(AtomicU32::new(0));
/// let counter = ticks.clone();
/// let scheduler = Scheduler::start("docs", Duration::from_millis(10), move || {
///     let counter = counter.clone();
///     async move {
///         counter.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     }
/// });
///
/// tokio::time::sleep(Duration::from_millis(35)).await;
/// scheduler.stop().await;
/// assert!(ticks.load(Ordering::SeqCst) >= 1);
/// # }
/// ```
pub struct Scheduler {
    name: String,
    period: Duration,
    /// `true` while the schedule is live. Held for the whole duration of a tick.
    running: Arc<Mutex<bool>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish()
    }
}

impl Scheduler {
    /// Starts ticking `tick` every `period`. The first tick fires one period from now.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(name: impl Into<String>, period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), EventError>> + Send + 'static,
    {
        let tick: TickFn = Arc::new(move || -> BoxFuture<'static, Result<(), EventError>> {
            Box::pin(tick())
        });
        Self::start_boxed(name.into(), period, tick)
    }

    fn start_boxed(name: String, period: Duration, tick: TickFn) -> Self {
        let running = Arc::new(Mutex::new(true));
        let task_running = running.clone();
        let task_name = name.clone();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let mut live = task_running.lock().await;
                if !*live {
                    break;
                }

                match tick().await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        error!("💀 Scheduler '{}' halted by fatal tick error: {}", task_name, e);
                        *live = false;
                        break;
                    }
                    Err(e) => {
                        warn!("⚠️ Scheduler '{}' tick failed: {}", task_name, e);
                    }
                }
            }

            debug!("Scheduler '{}' loop exited", task_name);
        });

        info!("⏱️ Scheduler '{}' started with period {:?}", name, period);

        Self {
            name,
            period,
            running,
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Stops the schedule.
    ///
    /// Waits for an in-flight tick to finish, so it must not be awaited from
    /// inside this scheduler's own tick callback. Calling it again is a no-op.
    pub async fn stop(&self) {
        {
            let mut live = self.running.lock().await;
            *live = false;
        }

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(task) = task {
            task.abort();
            info!("⏹️ Scheduler '{}' stopped", self.name);
        }
    }

    /// Whether ticks are still being scheduled.
    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let task = match self.task.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}
