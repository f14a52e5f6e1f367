//! Periodic Scheduler - Background thread that ticks a target at regular intervals
//!
//! The target is held by `Weak` reference so the scheduler never keeps it
//! alive. When a tick reports `Idle` the thread stops itself; callers restart
//! it with `start` once new work appears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Busy,
    Idle,
}

/// Something that can be ticked from the background scheduler
pub trait Scheduled: Send + Sync + 'static {
    fn run_tick(&self) -> TickOutcome;

    /// Checked after an idle tick, before the thread exits
    fn has_work(&self) -> bool;
}

pub struct PeriodicScheduler {
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl PeriodicScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking `target`. Returns false if already running.
    pub fn start<T: Scheduled>(&mut self, target: Weak<T>) -> bool {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Restarted from inside our own tick; the loop carries on
                self.thread_handle = Some(handle);
                return true;
            }
            // A previous thread that went idle; it exits without ticking again
            let _ = handle.join();
        }

        debug!(interval_ms = self.interval.as_millis() as u64, "starting periodic scheduler");
        let running = Arc::clone(&self.is_running);
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name("itemstage-scheduler".into())
            .spawn(move || run_loop(target, running, interval));

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                true
            }
            Err(e) => {
                warn!("failed to spawn scheduler thread: {}", e);
                self.is_running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop ticking and wait for the thread to finish
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Dropped from within a tick; the loop sees the flag and exits
            return;
        }
        handle.thread().unpark();
        let _ = handle.join(); // Thread panic result intentionally ignored during shutdown
        info!("periodic scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<T: Scheduled>(target: Weak<T>, running: Arc<AtomicBool>, interval: Duration) {
    while running.load(Ordering::SeqCst) {
        let outcome = match target.upgrade() {
            Some(t) => t.run_tick(),
            None => {
                running.store(false, Ordering::SeqCst);
                break;
            }
        };

        if outcome == TickOutcome::Idle {
            running.store(false, Ordering::SeqCst);
            // Work that arrived between the tick and the store would not
            // have restarted us, so look once more before leaving
            let more = target.upgrade().map(|t| t.has_work()).unwrap_or(false);
            if more
                && running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                continue;
            }
            debug!("scheduler idle, stopping");
            break;
        }

        let deadline = Instant::now() + interval;
        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
}
