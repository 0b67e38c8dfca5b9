//! Delivery of root transitions to observers
//!
//! The [`ChangeDispatcher`] receives every `(before, after, info)` transition
//! published by a merge and fans it out to registered observers. Every
//! observer sits behind a [`BackgroundObserver`]: a bounded queue drained by
//! a dedicated worker thread, so a slow observer never blocks the commit
//! path. When the queue is full, further transitions collapse into one
//! coarse external transition that is delivered once the queue has drained.

use arbor_concurrency::CommitInfo;
use arbor_core::NodeRef;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Receiver of root transitions
pub trait Observer: Send + Sync {
    /// Called once per transition, in commit order
    fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo);
}

struct Registered {
    id: u64,
    background: Arc<BackgroundObserver>,
}

/// Fans root transitions out to observers
pub struct ChangeDispatcher {
    observers: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
}

impl Default for ChangeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeDispatcher {
    /// Dispatcher without observers
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer behind a queue of `queue_length` transitions
    ///
    /// An observer that panics is detached from the dispatcher.
    pub fn add_background_observer(
        self: &Arc<Self>,
        observer: Arc<dyn Observer>,
        queue_length: usize,
    ) -> std::io::Result<ObserverRegistration> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let background = Arc::new(BackgroundObserver::new(id, observer, queue_length)?);
        let dispatcher = Arc::downgrade(self);
        background.on_detach(move || {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.detach(id);
            }
        });
        self.observers.write().push(Registered { id, background });
        debug!(target: "arbor::observation", id, "Observer registered");
        Ok(ObserverRegistration {
            dispatcher: Arc::downgrade(self),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Queue one transition for every observer
    pub fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) {
        let targets: Vec<Arc<BackgroundObserver>> = self
            .observers
            .read()
            .iter()
            .map(|r| r.background.clone())
            .collect();
        for background in targets {
            background.content_changed(before, after, info);
        }
    }

    fn detach(&self, id: u64) -> bool {
        let removed = {
            let mut observers = self.observers.write();
            observers
                .iter()
                .position(|r| r.id == id)
                .map(|index| observers.remove(index))
        };
        match removed {
            Some(registered) => {
                registered.background.close();
                debug!(target: "arbor::observation", id, "Observer detached");
                true
            }
            None => false,
        }
    }

    /// Detach every observer and stop their workers
    pub fn close(&self) {
        let removed: Vec<Registered> = self.observers.write().drain(..).collect();
        for registered in removed {
            registered.background.close();
        }
    }
}

/// Handle of a registered observer; closing or dropping it unregisters
///
/// Once [`close`](ObserverRegistration::close) returns, the observer
/// receives no further transitions.
#[must_use = "dropping the registration unregisters the observer"]
pub struct ObserverRegistration {
    dispatcher: Weak<ChangeDispatcher>,
    id: u64,
    closed: AtomicBool,
}

impl ObserverRegistration {
    /// Unregister the observer
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.detach(self.id);
        }
    }

    /// True once closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ObserverRegistration {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Background delivery
// ============================================================================

struct Transition {
    before: NodeRef,
    after: NodeRef,
    info: CommitInfo,
}

type DetachHook = Box<dyn FnOnce() + Send>;

struct Shared {
    observer: Arc<dyn Observer>,
    closed: AtomicBool,
    /// Transitions collapsed while the queue was full
    overflow: Mutex<Option<(NodeRef, NodeRef)>>,
    /// Run once when the observer panics
    on_detach: Mutex<Option<DetachHook>>,
}

impl Shared {
    /// Deliver to the observer; false once the observer is detached
    fn deliver(&self, id: u64, before: &NodeRef, after: &NodeRef, info: &CommitInfo) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.observer.content_changed(before, after, info)
        }));
        if outcome.is_err() {
            error!(target: "arbor::observation", id, "Background observer panicked, detaching it");
            self.closed.store(true, Ordering::Release);
            let detach = self.on_detach.lock().take();
            if let Some(detach) = detach {
                detach();
            }
            return false;
        }
        true
    }
}

/// Observer decoupled from the committing thread by a bounded queue
pub struct BackgroundObserver {
    id: u64,
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Transition>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundObserver {
    /// Start the worker thread for `observer`
    pub fn new(id: u64, observer: Arc<dyn Observer>, queue_length: usize) -> std::io::Result<Self> {
        let (sender, receiver) = bounded(queue_length.max(1));
        let shared = Arc::new(Shared {
            observer,
            closed: AtomicBool::new(false),
            overflow: Mutex::new(None),
            on_detach: Mutex::new(None),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("arbor-observer-{}", id))
            .spawn(move || worker_loop(id, &worker_shared, &receiver))?;
        Ok(Self {
            id,
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Run `detach` on the worker thread if the observer panics
    pub fn on_detach(&self, detach: impl FnOnce() + Send + 'static) {
        *self.shared.on_detach.lock() = Some(Box::new(detach));
    }

    /// Transitions waiting in the queue
    pub fn pending(&self) -> usize {
        self.sender.lock().as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// True once closed or detached after a panic
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop delivery and wait for the worker
    ///
    /// Called from the observer's own thread, the worker is not joined; it
    /// exits after the current delivery returns.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.sender.lock().take();
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!(target: "arbor::observation", id = self.id, "Observer worker terminated abnormally");
        }
    }
}

impl Observer for BackgroundObserver {
    fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) {
        if self.is_closed() {
            return;
        }
        let mut overflow = self.shared.overflow.lock();
        if let Some((_, latest)) = overflow.as_mut() {
            *latest = after.clone();
            return;
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        let transition = Transition {
            before: before.clone(),
            after: after.clone(),
            info: info.clone(),
        };
        match sender.try_send(transition) {
            Ok(()) => {}
            Err(TrySendError::Full(transition)) => {
                warn!(
                    target: "arbor::observation",
                    id = self.id,
                    capacity = sender.capacity().unwrap_or(0),
                    "Observer queue full, collapsing pending changes"
                );
                *overflow = Some((transition.before, transition.after));
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for BackgroundObserver {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(id: u64, shared: &Shared, receiver: &Receiver<Transition>) {
    for transition in receiver.iter() {
        if !shared.deliver(id, &transition.before, &transition.after, &transition.info) {
            break;
        }
        // Producers enqueue under the overflow lock
        let collapsed = {
            let mut overflow = shared.overflow.lock();
            if receiver.is_empty() {
                overflow.take()
            } else {
                None
            }
        };
        if let Some((before, after)) = collapsed {
            if !shared.deliver(id, &before, &after, &CommitInfo::external()) {
                break;
            }
        }
    }
    debug!(target: "arbor::observation", id, "Observer worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{MemoryNodeState, PropertyState};
    use std::time::{Duration, Instant};

    fn node(v: i64) -> NodeRef {
        MemoryNodeState::builder().property("v", v).build()
    }

    fn value(node: &NodeRef) -> i64 {
        node.property("v").and_then(|p: PropertyState| p.as_long()).unwrap_or(-1)
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(i64, i64, bool)>>,
    }

    impl Observer for Recorder {
        fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) {
            self.seen.lock().push((value(before), value(after), info.external));
        }
    }

    struct Panicking;

    impl Observer for Panicking {
        fn content_changed(&self, _: &NodeRef, _: &NodeRef, _: &CommitInfo) {
            panic!("observer failure");
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // ========================================================================
    // Dispatcher
    // ========================================================================

    #[test]
    fn test_dispatch_to_all_observers() {
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let _a = dispatcher.add_background_observer(first.clone(), 10).unwrap();
        let _b = dispatcher.add_background_observer(second.clone(), 10).unwrap();

        dispatcher.content_changed(&node(0), &node(1), &CommitInfo::empty());
        wait_until(|| first.seen.lock().len() == 1 && second.seen.lock().len() == 1);
        assert_eq!(*first.seen.lock(), vec![(0, 1, false)]);
        assert_eq!(*second.seen.lock(), vec![(0, 1, false)]);
    }

    #[test]
    fn test_panicking_observer_is_removed() {
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        let _bad = dispatcher.add_background_observer(Arc::new(Panicking), 10).unwrap();
        let _good = dispatcher.add_background_observer(recorder.clone(), 10).unwrap();
        assert_eq!(dispatcher.observer_count(), 2);

        dispatcher.content_changed(&node(0), &node(1), &CommitInfo::empty());
        wait_until(|| dispatcher.observer_count() == 1);
        dispatcher.content_changed(&node(1), &node(2), &CommitInfo::empty());
        wait_until(|| recorder.seen.lock().len() == 2);
    }

    /// Sleeps in every delivery
    struct Slow(Recorder);

    impl Observer for Slow {
        fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) {
            std::thread::sleep(Duration::from_millis(200));
            self.0.content_changed(before, after, info);
        }
    }

    #[test]
    fn test_slow_observer_does_not_block_dispatch() {
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let slow = Arc::new(Slow(Recorder::default()));
        let _registration = dispatcher.add_background_observer(slow.clone(), 10).unwrap();

        let started = Instant::now();
        for i in 0..5 {
            dispatcher.content_changed(&node(i), &node(i + 1), &CommitInfo::empty());
        }
        assert!(started.elapsed() < Duration::from_millis(200));
        wait_until(|| slow.0.seen.lock().len() == 5);
    }

    #[test]
    fn test_registration_close_and_drop() {
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        let registration = dispatcher.add_background_observer(recorder.clone(), 10).unwrap();
        {
            let _temporary = dispatcher
                .add_background_observer(Arc::new(Recorder::default()), 10)
                .unwrap();
            assert_eq!(dispatcher.observer_count(), 2);
        }
        assert_eq!(dispatcher.observer_count(), 1);

        registration.close();
        registration.close();
        assert!(registration.is_closed());
        dispatcher.content_changed(&node(0), &node(1), &CommitInfo::empty());
        std::thread::sleep(Duration::from_millis(20));
        assert!(recorder.seen.lock().is_empty());
    }

    // ========================================================================
    // Background observers
    // ========================================================================

    #[test]
    fn test_background_delivery_in_order() {
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        let registration = dispatcher
            .add_background_observer(recorder.clone(), 100)
            .unwrap();
        for i in 0..20 {
            dispatcher.content_changed(&node(i), &node(i + 1), &CommitInfo::empty());
        }
        wait_until(|| recorder.seen.lock().len() == 20);
        let seen = recorder.seen.lock().clone();
        for (i, (before, after, _)) in seen.iter().enumerate() {
            assert_eq!(*before, i as i64);
            assert_eq!(*after, i as i64 + 1);
        }
        registration.close();
        assert_eq!(dispatcher.observer_count(), 0);
    }

    /// Blocks inside its first delivery until released
    struct Gated {
        entered: Sender<()>,
        release: Receiver<()>,
        recorder: Recorder,
        first: AtomicBool,
    }

    impl Observer for Gated {
        fn content_changed(&self, before: &NodeRef, after: &NodeRef, info: &CommitInfo) {
            if !self.first.swap(true, Ordering::AcqRel) {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            }
            self.recorder.content_changed(before, after, info);
        }
    }

    #[test]
    fn test_full_queue_collapses_transitions() {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let gated = Arc::new(Gated {
            entered: entered_tx,
            release: release_rx,
            recorder: Recorder::default(),
            first: AtomicBool::new(false),
        });
        let background = BackgroundObserver::new(7, gated.clone(), 1).unwrap();

        background.content_changed(&node(0), &node(1), &CommitInfo::empty());
        entered_rx.recv().unwrap();
        background.content_changed(&node(1), &node(2), &CommitInfo::empty());
        assert_eq!(background.pending(), 1);
        background.content_changed(&node(2), &node(3), &CommitInfo::empty());
        background.content_changed(&node(3), &node(4), &CommitInfo::empty());
        release_tx.send(()).unwrap();

        wait_until(|| gated.recorder.seen.lock().len() == 3);
        assert_eq!(
            *gated.recorder.seen.lock(),
            vec![(0, 1, false), (1, 2, false), (2, 4, true)]
        );
        background.close();
    }

    #[test]
    fn test_closed_background_observer_receives_nothing() {
        let recorder = Arc::new(Recorder::default());
        let background = BackgroundObserver::new(1, recorder.clone(), 10).unwrap();
        background.close();
        assert!(background.is_closed());
        background.content_changed(&node(0), &node(1), &CommitInfo::empty());
        std::thread::sleep(Duration::from_millis(20));
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn test_panicking_background_observer_stops() {
        let background = BackgroundObserver::new(3, Arc::new(Panicking), 10).unwrap();
        background.content_changed(&node(0), &node(1), &CommitInfo::empty());
        wait_until(|| background.is_closed());
        background.close();
    }

    #[test]
    fn test_dispatcher_close_stops_workers() {
        let dispatcher = Arc::new(ChangeDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        let registration = dispatcher.add_background_observer(recorder.clone(), 4).unwrap();
        dispatcher.close();
        assert_eq!(dispatcher.observer_count(), 0);
        dispatcher.content_changed(&node(0), &node(1), &CommitInfo::empty());
        registration.close();
        assert!(recorder.seen.lock().is_empty());
    }
}
