//! Graph-reorder debouncing
//!
//! The graph service raises a reorder pulse for every topology change, and an
//! application starting up can produce dozens of them in a few milliseconds.
//! `ReorderDebouncer` runs one dedicated waiter thread that turns each burst
//! into a single settle notification:
//!
//! ```text
//! pulse ─▶ wait(settle) ─pulse─▶ wait(settle) ─timeout─▶ run callbacks
//!   ▲                                                         │
//!   └──────────────────── block for next pulse ◀──────────────┘
//! ```
//!
//! A notification fires no earlier than one settle window after the last
//! pulse of its burst. `stop()` wakes the waiter, which checks the stop flag
//! at every wait boundary, and joins it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

/// Settle window used when none is configured.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);

type SettleCallback = dyn Fn() -> anyhow::Result<()> + Send + Sync;

#[derive(Debug, Default)]
struct PulseState {
    pulsed: bool,
    stopped: bool,
}

struct Shared {
    state: Mutex<PulseState>,
    signal: Condvar,
    callbacks: Mutex<Vec<(u64, Arc<SettleCallback>)>>,
    next_id: AtomicU64,
    settle: Duration,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, PulseState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, Vec<(u64, Arc<SettleCallback>)>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Coalesces bursts of reorder pulses into one settle notification.
pub struct ReorderDebouncer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps a settle callback registered; dropping it unregisters the callback.
#[must_use = "the callback is unregistered when the subscription is dropped"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock_callbacks().retain(|(id, _)| *id != self.id);
        }
    }
}

impl ReorderDebouncer {
    /// Start the waiter thread.
    pub fn start(settle: Duration) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(PulseState::default()),
            signal: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            settle,
        });

        let waiter = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("portman-reorder".to_string())
            .spawn(move || run_waiter(&waiter))?;

        debug!("Reorder debouncer started with {:?} settle window", settle);

        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn settle_window(&self) -> Duration {
        self.shared.settle
    }

    /// Signal that the graph changed. Cheap; safe to call from the graph
    /// service's callback thread.
    pub fn pulse(&self) {
        let mut state = self.shared.lock_state();
        if state.stopped {
            return;
        }
        state.pulsed = true;
        self.shared.signal.notify_all();
    }

    /// Register a callback to run on the waiter thread after each burst.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.lock_callbacks().push((id, Arc::new(callback)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock_state().stopped
    }

    /// Stop the waiter permanently and wait for it to exit.
    pub fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            state.stopped = true;
            self.shared.signal.notify_all();
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            // A settle callback may itself request shutdown
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Reorder debouncer thread panicked");
            }
            debug!("Reorder debouncer stopped");
        }
    }
}

impl Drop for ReorderDebouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_waiter(shared: &Shared) {
    loop {
        let mut state = shared.lock_state();
        while !state.pulsed && !state.stopped {
            state = shared
                .signal
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.stopped {
            return;
        }
        state.pulsed = false;

        // Re-arm the window on every pulse until it elapses quietly
        loop {
            let (guard, timeout) = shared
                .signal
                .wait_timeout_while(state, shared.settle, |s| !s.pulsed && !s.stopped)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
            if state.stopped {
                return;
            }
            if timeout.timed_out() {
                break;
            }
            state.pulsed = false;
        }
        drop(state);

        let callbacks: Vec<Arc<SettleCallback>> = shared
            .lock_callbacks()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        debug!("Graph settled, notifying {} subscriber(s)", callbacks.len());
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Settle callback failed: {:#}", e),
                Err(_) => error!("Settle callback panicked"),
            }
        }
    }
}
