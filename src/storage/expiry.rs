//! Background Expiry Sweeper
//!
//! Reads already treat an expired entry as absent, but an expired entry that
//! is never touched again would stay in memory forever. The sweeper reclaims
//! those entries.
//!
//! ## Design
//!
//! One Tokio task runs per shard, on the caller's runtime when there is one and
//! on a dedicated sweeper thread otherwise. Each task:
//! 1. Waits for the next tick of a fixed-period timer, or the stop signal
//! 2. On a tick, calls [`Shard::delete_expired`] on its shard
//! 3. On the stop signal (or if the signal sender is gone), exits
//!
//! ```text
//!   Idle ──(first task polled)──> Running ──(stop signal)──> Stopped
//! ```
//!
//! The stop signal is only consulted between sweeps, so a sweep in progress
//! always runs to completion.

use crate::storage::shard::Shard;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::{self, Handle};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace};

/// Lifecycle of a sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    /// Spawned, but no sweep task has started yet
    Idle,
    /// At least one sweep task is waiting for its next tick or sweeping
    Running,
    /// Every sweep task has exited. Terminal.
    Stopped,
}

impl SweeperState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SweeperState::Idle,
            1 => SweeperState::Running,
            _ => SweeperState::Stopped,
        }
    }
}

/// State shared between the handle and its tasks.
#[derive(Debug)]
struct Lifecycle {
    state: AtomicU8,
    live_tasks: AtomicUsize,
}

impl Lifecycle {
    fn enter(&self) {
        let _ = self.state.compare_exchange(
            SweeperState::Idle as u8,
            SweeperState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Marks the sweeper stopped without any task having run.
    fn abandon(&self) {
        self.live_tasks.store(0, Ordering::Release);
        self.state.store(SweeperState::Stopped as u8, Ordering::Release);
    }

    fn exit(&self) {
        if self.live_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.store(SweeperState::Stopped as u8, Ordering::Release);
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, every sweep task is stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    /// Shared lifecycle state
    lifecycle: Arc<Lifecycle>,
    /// Period between sweeps
    interval: Duration,
}

impl ExpirySweeper {
    /// Starts one sweep task per shard.
    ///
    /// Inside a Tokio runtime the tasks are spawned on it. Otherwise they run
    /// on a dedicated thread driving its own current-thread runtime, which
    /// exits once every task has stopped.
    pub fn start<V>(shards: &[Arc<Shard<V>>], interval: Duration) -> Self
    where
        V: Send + Sync + 'static,
    {
        let (shutdown_tx, _) = watch::channel(false);
        let lifecycle = Arc::new(Lifecycle {
            state: AtomicU8::new(SweeperState::Idle as u8),
            live_tasks: AtomicUsize::new(shards.len()),
        });

        let tasks: Vec<_> = shards
            .iter()
            .enumerate()
            .map(|(idx, shard)| {
                sweeper_loop(
                    idx,
                    Arc::clone(shard),
                    interval,
                    shutdown_tx.subscribe(),
                    Arc::clone(&lifecycle),
                )
            })
            .collect();

        match Handle::try_current() {
            Ok(handle) => {
                for task in tasks {
                    handle.spawn(task);
                }
            }
            Err(_) => spawn_dedicated(tasks, Arc::clone(&lifecycle)),
        }

        info!(
            shards = shards.len(),
            interval_ms = interval.as_millis() as u64,
            "Background expiry sweeper started"
        );

        Self {
            shutdown_tx,
            lifecycle,
            interval,
        }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped. Only the first
    /// call delivers the signal.
    pub fn stop(&self) {
        let delivered = self.shutdown_tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if delivered {
            info!("Background expiry sweeper stopped");
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SweeperState {
        SweeperState::from_u8(self.lifecycle.state.load(Ordering::Acquire))
    }

    /// Period between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs the sweep tasks on their own thread and runtime.
///
/// If the thread or runtime cannot be created, the sweeper is left stopped and
/// expired entries are only reclaimed by explicit sweeps.
fn spawn_dedicated<F>(tasks: Vec<F>, lifecycle: Arc<Lifecycle>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let thread_lifecycle = Arc::clone(&lifecycle);
    let spawned = thread::Builder::new()
        .name("chronocache-sweeper".into())
        .spawn(move || {
            let runtime = match runtime::Builder::new_current_thread().enable_time().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Failed to build expiry sweeper runtime");
                    thread_lifecycle.abandon();
                    return;
                }
            };
            runtime.block_on(async move {
                let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
                for handle in handles {
                    let _ = handle.await;
                }
            });
            debug!("Expiry sweeper thread exiting");
        });

    if let Err(e) = spawned {
        error!(error = %e, "Failed to spawn expiry sweeper thread");
        lifecycle.abandon();
    }
}

/// The main sweeper loop for one shard.
async fn sweeper_loop<V>(
    idx: usize,
    shard: Arc<Shard<V>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    lifecycle: Arc<Lifecycle>,
) {
    lifecycle.enter();

    // The first tick fires one full interval after start. An interval too
    // large to schedule never ticks; the task just waits to be stopped.
    let Some(first) = time::Instant::now().checked_add(interval) else {
        debug!(shard = idx, "Sweep interval out of range, waiting for shutdown");
        loop {
            if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                break;
            }
        }
        lifecycle.exit();
        return;
    };
    let mut ticker = time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!(shard = idx, "Expiry sweeper received shutdown signal");
                    break;
                }
                continue;
            }
        }

        let expired = shard.delete_expired();
        if expired > 0 {
            debug!(
                shard = idx,
                expired = expired,
                remaining = shard.item_count(),
                "Expired keys cleaned up"
            );
        } else {
            trace!(shard = idx, "Sweep found nothing to reclaim");
        }
    }

    lifecycle.exit();
}
