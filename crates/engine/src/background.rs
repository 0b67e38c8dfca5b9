//! Periodic garbage collection
//!
//! One named thread per store runs a tail collection pass every
//! `gc_interval_ms`. The thread only holds a weak reference to the store, so
//! it never keeps a dropped store alive; it exits when stopped or when the
//! store is gone.

use crate::store::NodeStore;
use arbor_durability::CompactionError;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Signal {
    shutdown: Mutex<bool>,
    wake: Condvar,
}

/// Background thread running collection passes
pub(crate) struct GcScheduler {
    signal: Arc<Signal>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GcScheduler {
    /// Start collecting `store` every `interval`
    pub(crate) fn start(store: Weak<NodeStore>, interval: Duration) -> std::io::Result<Self> {
        let signal = Arc::new(Signal {
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("arbor-gc".to_string())
            .spawn(move || run(&thread_signal, &store, interval))?;
        info!(
            target: "arbor::compaction",
            interval_ms = interval.as_millis() as u64,
            "Background collection started"
        );
        Ok(Self {
            signal,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the thread and wait for a running pass to finish
    pub(crate) fn stop(&self) {
        {
            let mut shutdown = self.signal.shutdown.lock();
            *shutdown = true;
            self.signal.wake.notify_all();
        }
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // The last store reference can be released by the collection thread
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        let _ = handle.join();
    }
}

impl Drop for GcScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(signal: &Signal, store: &Weak<NodeStore>, interval: Duration) {
    loop {
        {
            let mut shutdown = signal.shutdown.lock();
            if !*shutdown {
                signal.wake.wait_for(&mut shutdown, interval);
            }
            if *shutdown {
                break;
            }
        }
        let Some(store) = store.upgrade() else {
            break;
        };
        match store.gc() {
            Ok(info) => debug!(target: "arbor::compaction", summary = %info.summary(), "Scheduled pass done"),
            Err(CompactionError::Paused) | Err(CompactionError::AlreadyRunning) => {}
            Err(e) => warn!(target: "arbor::compaction", error = %e, "Scheduled pass failed"),
        }
    }
    debug!(target: "arbor::compaction", "Background collection stopped");
}
