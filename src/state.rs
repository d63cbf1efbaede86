//! Reactive primitives: `State<T>`, `EventBus<T>`, `Watcher`, and the
//! `AppHandle` they're bound to.
//!
//! Bindings are deduplicated by a process-wide monotonic id inside a batch,
//! watchers are scheduled `tokio` tasks cancelled by a merged stop signal,
//! and the dirty flag that drives re-rendering lives on the shared
//! `AppHandle` every `State`/`EventBus` is bound to.

use crate::Error;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

//--------------------------------------------------------------------------------------------------
// Binding ids
//--------------------------------------------------------------------------------------------------

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

fn next_binding_id() -> u64 {
    NEXT_BINDING_ID.fetch_add(1, Ordering::SeqCst)
}

//--------------------------------------------------------------------------------------------------
// AppHandle
//--------------------------------------------------------------------------------------------------

type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct BatchState {
    order: Vec<u64>,
    jobs: HashMap<u64, Job>,
}

struct AppHandleInner {
    dirty: AtomicBool,
    batch_depth: AtomicUsize,
    batch: Mutex<BatchState>,
    event_tx: tokio::sync::mpsc::UnboundedSender<Job>,
    update_tx: tokio::sync::mpsc::UnboundedSender<Job>,
    error_tx: tokio::sync::mpsc::UnboundedSender<Error>,
    stop_tx: tokio::sync::watch::Sender<bool>,
}

/// A cheap, cloneable handle to the running `App`'s shared reactive state:
/// the dirty flag, the event/update queues, the error channel, and the
/// top-level stop signal. `State`, `EventBus`, and `Watcher` all operate
/// against a handle rather than the `App` itself.
#[derive(Clone)]
pub struct AppHandle {
    inner: Arc<AppHandleInner>,
}

static DEFAULT_APP: OnceLock<Mutex<Weak<AppHandleInner>>> = OnceLock::new();

impl AppHandle {
    pub(crate) fn new(
        event_tx: tokio::sync::mpsc::UnboundedSender<Job>,
        update_tx: tokio::sync::mpsc::UnboundedSender<Job>,
        error_tx: tokio::sync::mpsc::UnboundedSender<Error>,
        stop_tx: tokio::sync::watch::Sender<bool>,
    ) -> Self {
        let inner = Arc::new(AppHandleInner {
            dirty: AtomicBool::new(true),
            batch_depth: AtomicUsize::new(0),
            batch: Mutex::new(BatchState::default()),
            event_tx,
            update_tx,
            error_tx,
            stop_tx,
        });
        let slot = DEFAULT_APP.get_or_init(|| Mutex::new(Weak::new()));
        *slot.lock().unwrap() = Arc::downgrade(&inner);
        Self { inner }
    }

    /// The most recently constructed `App` in this process, if one is still
    /// alive. Convenience constructors for `State`/`EventBus` may fall back
    /// to this; the core never requires it.
    pub fn default_app() -> Option<AppHandle> {
        DEFAULT_APP
            .get()
            .and_then(|slot| slot.lock().unwrap().upgrade())
            .map(|inner| AppHandle { inner })
    }

    /// Marks the app dirty, requesting a re-render on the next loop tick.
    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    /// Atomically reads and clears the dirty flag.
    pub(crate) fn take_dirty(&self) -> bool {
        self.inner.dirty.swap(false, Ordering::SeqCst)
    }

    /// Schedules a closure onto the event queue (input-reader / watcher side).
    pub fn queue_event(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.inner.event_tx.send(Box::new(f));
    }

    /// Schedules a closure onto the update queue (cross-thread UI mutation).
    pub fn queue_update(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.inner.update_tx.send(Box::new(f));
    }

    /// Reports a non-fatal error (currently: dispatch-table validation
    /// failures) on the app's error channel.
    pub(crate) fn report_error(&self, err: Error) {
        let _ = self.inner.error_tx.send(err);
    }

    /// A receiver for the top-level stop signal, used to build a watcher's
    /// merged cancellation source.
    pub fn stop_signal(&self) -> tokio::sync::watch::Receiver<bool> {
        self.inner.stop_tx.subscribe()
    }

    /// Closes the top-level stop signal, which in turn closes every
    /// watcher's merged stop.
    pub fn stop(&self) {
        let _ = self.inner.stop_tx.send(true);
    }

    fn is_batching(&self) -> bool {
        self.inner.batch_depth.load(Ordering::SeqCst) > 0
    }

    fn record_job(&self, id: u64, job: Job) {
        let mut batch = self.inner.batch.lock().unwrap();
        batch.jobs.entry(id).or_insert_with(|| job);
        if !batch.order.contains(&id) {
            batch.order.push(id);
        }
    }

    /// Runs `f` inside a batch: state mutations are applied immediately but
    /// their bindings are deduplicated by binding id and invoked once, in
    /// first-enqueued order, only once the outermost batch exits. Batches
    /// nest; a panic inside `f` still unwinds the depth counter and drops
    /// any pending recordings for the outermost batch before propagating.
    pub fn batch(&self, f: impl FnOnce()) {
        self.inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        let depth_after = self.inner.batch_depth.fetch_sub(1, Ordering::SeqCst) - 1;

        match result {
            Ok(()) => {
                if depth_after == 0 {
                    self.drain_batch();
                }
            }
            Err(payload) => {
                if depth_after == 0 {
                    self.clear_batch();
                }
                std::panic::resume_unwind(payload);
            }
        }
    }

    fn drain_batch(&self) {
        let (order, mut jobs) = {
            let mut batch = self.inner.batch.lock().unwrap();
            (std::mem::take(&mut batch.order), std::mem::take(&mut batch.jobs))
        };
        for id in order {
            if let Some(job) = jobs.remove(&id) {
                job();
            }
        }
    }

    fn clear_batch(&self) {
        let mut batch = self.inner.batch.lock().unwrap();
        batch.order.clear();
        batch.jobs.clear();
    }
}

//--------------------------------------------------------------------------------------------------
// State<T>
//--------------------------------------------------------------------------------------------------

struct BindingEntry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    f: Mutex<Box<dyn FnMut(&T) + Send>>,
}

/// A handle returned by [`State::bind`]/[`EventBus::subscribe`] that can
/// deactivate (unbind) the callback.
#[derive(Clone)]
pub struct BindingHandle {
    active: Arc<AtomicBool>,
}

impl BindingHandle {
    pub fn unbind(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// A reactive value cell. Setting it marks the bound [`AppHandle`] dirty and
/// invokes (or, inside a batch, schedules) its bindings.
pub struct State<T> {
    value: Arc<RwLock<T>>,
    bindings: Arc<Mutex<Vec<BindingEntry<T>>>>,
    app: AppHandle,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            bindings: Arc::clone(&self.bindings),
            app: self.app.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> State<T> {
    pub fn new(app: &AppHandle, initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            bindings: Arc::new(Mutex::new(Vec::new())),
            app: app.clone(),
        }
    }

    /// Registers a binding, invoked with the new value on every `set`
    /// (directly, or once per batch if called from inside one). Returns a
    /// handle that can later unbind it.
    pub fn bind(&self, f: impl FnMut(&T) + Send + 'static) -> BindingHandle {
        let active = Arc::new(AtomicBool::new(true));
        let id = next_binding_id();
        self.bindings.lock().unwrap().push(BindingEntry {
            id,
            active: Arc::clone(&active),
            f: Mutex::new(Box::new(f)),
        });
        BindingHandle { active }
    }
}

impl<T: Clone + Send + Sync + 'static> State<T> {
    /// Reads a clone of the current value.
    pub fn get(&self) -> T {
        self.value.read().unwrap().clone()
    }

    /// Sets the value, purges any unbound bindings, marks the app dirty,
    /// and either invokes or schedules (if batching) every remaining
    /// binding.
    pub fn set(&self, v: T) {
        {
            let mut val = self.value.write().unwrap();
            *val = v;
        }
        {
            let mut bindings = self.bindings.lock().unwrap();
            bindings.retain(|b| b.active.load(Ordering::SeqCst));
        }
        self.app.mark_dirty();

        if self.app.is_batching() {
            let ids: Vec<u64> = self.bindings.lock().unwrap().iter().map(|b| b.id).collect();
            for id in ids {
                let bindings = Arc::clone(&self.bindings);
                let value = Arc::clone(&self.value);
                self.app.record_job(
                    id,
                    Box::new(move || {
                        let bindings = bindings.lock().unwrap();
                        if let Some(entry) = bindings.iter().find(|b| b.id == id) {
                            if entry.active.load(Ordering::SeqCst) {
                                let val = value.read().unwrap();
                                (entry.f.lock().unwrap())(&val);
                            }
                        }
                    }),
                );
            }
        } else {
            let val = self.value.read().unwrap().clone();
            let bindings = self.bindings.lock().unwrap();
            for entry in bindings.iter() {
                if entry.active.load(Ordering::SeqCst) {
                    (entry.f.lock().unwrap())(&val);
                }
            }
        }
    }

    /// Equivalent to `set(f(get()))`.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        let current = self.get();
        self.set(f(current));
    }
}

//--------------------------------------------------------------------------------------------------
// EventBus<T>
//--------------------------------------------------------------------------------------------------

/// A fan-out event channel. Unlike `State`, it carries no persistent value;
/// `emit` simply invokes every subscriber with the event in turn.
pub struct EventBus<T> {
    subscribers: Arc<Mutex<Vec<BindingEntry<T>>>>,
    app: Arc<Mutex<Option<AppHandle>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            app: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Send + Sync + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds this bus to an app. Idempotent: a second call is a no-op.
    pub fn bind(&self, app: &AppHandle) {
        let mut slot = self.app.lock().unwrap();
        if slot.is_none() {
            *slot = Some(app.clone());
        }
    }

    pub fn subscribe(&self, f: impl FnMut(&T) + Send + 'static) -> BindingHandle {
        let active = Arc::new(AtomicBool::new(true));
        let id = next_binding_id();
        self.subscribers.lock().unwrap().push(BindingEntry {
            id,
            active: Arc::clone(&active),
            f: Mutex::new(Box::new(f)),
        });
        BindingHandle { active }
    }

    /// Invokes every active subscriber with `event`, then marks the bound
    /// app dirty.
    ///
    /// # Panics
    ///
    /// Panics if called before [`EventBus::bind`] — emitting on an unbound
    /// bus has nowhere to route the resulting dirty flag.
    pub fn emit(&self, event: T) {
        {
            let mut subs = self.subscribers.lock().unwrap();
            subs.retain(|b| b.active.load(Ordering::SeqCst));
            for entry in subs.iter() {
                (entry.f.lock().unwrap())(&event);
            }
        }
        let app = self.app.lock().unwrap();
        match app.as_ref() {
            Some(app) => app.mark_dirty(),
            None => panic!("EventBus::emit called before EventBus::bind"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Watcher
//--------------------------------------------------------------------------------------------------

/// A receiver side of a watcher's cancellation source, merging the app-level
/// stop signal with a root-scoped one so that swapping the root kills the
/// old root's watchers without affecting the app as a whole.
#[derive(Clone)]
pub struct WatcherStop {
    app_stop: tokio::sync::watch::Receiver<bool>,
    root_stop: tokio::sync::watch::Receiver<bool>,
}

impl WatcherStop {
    pub(crate) fn new(
        app_stop: tokio::sync::watch::Receiver<bool>,
        root_stop: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self { app_stop, root_stop }
    }

    /// Resolves once either signal fires.
    pub async fn stopped(&mut self) {
        let mut app_stop = self.app_stop.clone();
        let mut root_stop = self.root_stop.clone();
        tokio::select! {
            _ = app_stop.changed() => {}
            _ = root_stop.changed() => {}
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.app_stop.borrow() || *self.root_stop.borrow()
    }
}

type WatcherFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A scheduled producer: a future that posts work onto the app's event
/// queue and must return within one cycle of observing its stop signal.
/// Declared by `Component::watchers()` and spawned by the app against the
/// current root's scope.
pub struct Watcher {
    run: Box<dyn FnOnce(AppHandle, WatcherStop) -> WatcherFuture + Send>,
}

impl Watcher {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(AppHandle, WatcherStop) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self { run: Box::new(move |app, stop| Box::pin(f(app, stop))) }
    }

    /// An interval watcher: invokes `f` every `period` until stopped.
    pub fn interval<F>(period: std::time::Duration, mut f: F) -> Self
    where
        F: FnMut(&AppHandle) + Send + 'static,
    {
        Self::new(move |app, mut stop| async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => f(&app),
                    _ = stop.stopped() => break,
                }
            }
        })
    }

    pub(crate) fn spawn(self, app: AppHandle, stop: WatcherStop) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn((self.run)(app, stop))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> AppHandle {
        let (etx, _erx) = tokio::sync::mpsc::unbounded_channel();
        let (utx, _urx) = tokio::sync::mpsc::unbounded_channel();
        let (errtx, _errrx) = tokio::sync::mpsc::unbounded_channel();
        let (stx, _srx) = tokio::sync::watch::channel(false);
        AppHandle::new(etx, utx, errtx, stx)
    }

    #[test]
    fn set_marks_dirty_and_invokes_binding() {
        let app = test_app();
        let state = State::new(&app, 0i32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        state.bind(move |v| seen2.lock().unwrap().push(*v));
        assert!(app.take_dirty()); // initial dirty = true
        state.set(5);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert!(app.take_dirty());
    }

    #[test]
    fn unbind_stops_further_invocations() {
        let app = test_app();
        let state = State::new(&app, 0i32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let handle = state.bind(move |v| seen2.lock().unwrap().push(*v));
        state.set(1);
        handle.unbind();
        state.set(2);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn scenario_d_batch_coalesces_to_latest_value() {
        let app = test_app();
        let state = State::new(&app, 0i32);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        state.bind(move |v| log2.lock().unwrap().push(*v));

        app.batch(|| {
            state.set(1);
            state.set(2);
            state.set(3);
        });

        assert_eq!(*log.lock().unwrap(), vec![3]);
    }

    #[test]
    fn nested_batches_drain_only_at_outermost_exit() {
        let app = test_app();
        let state = State::new(&app, 0i32);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        state.bind(move |v| log2.lock().unwrap().push(*v));

        app.batch(|| {
            state.set(1);
            app.batch(|| {
                state.set(2);
            });
            assert!(log.lock().unwrap().is_empty());
        });

        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn batch_dedup_is_by_binding_id_multiple_states() {
        let app = test_app();
        let a = State::new(&app, 0i32);
        let b = State::new(&app, 0i32);
        let log = Arc::new(Mutex::new(Vec::new()));
        let la = Arc::clone(&log);
        let lb = Arc::clone(&log);
        a.bind(move |v| la.lock().unwrap().push(("a", *v)));
        b.bind(move |v| lb.lock().unwrap().push(("b", *v)));

        app.batch(|| {
            a.set(10);
            b.set(20);
            a.set(11);
        });

        let result = log.lock().unwrap().clone();
        assert_eq!(result, vec![("a", 11), ("b", 20)]);
    }

    #[test]
    fn batch_panic_still_decrements_and_clears() {
        let app = test_app();
        let state = State::new(&app, 0i32);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        state.bind(move |v| log2.lock().unwrap().push(*v));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            app.batch(|| {
                state.set(1);
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        assert!(log.lock().unwrap().is_empty());

        // Batch depth must be back to 0: a fresh batch drains normally.
        app.batch(|| {
            state.set(2);
        });
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    #[should_panic(expected = "before EventBus::bind")]
    fn event_bus_emit_before_bind_panics() {
        let bus: EventBus<&'static str> = EventBus::new();
        bus.emit("hello");
    }

    #[test]
    fn event_bus_fans_out_to_subscribers() {
        let app = test_app();
        let bus: EventBus<i32> = EventBus::new();
        bus.bind(&app);
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = Arc::clone(&log);
        bus.subscribe(move |v| log2.lock().unwrap().push(*v));
        app.take_dirty();
        bus.emit(42);
        assert_eq!(*log.lock().unwrap(), vec![42]);
        assert!(app.take_dirty());
    }
}
