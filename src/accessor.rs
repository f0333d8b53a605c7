//! The accessor state machine (spec §3, §4.4): the live, per-scope cell a
//! resolved executor occupies. An accessor moves `Idle -> Resolving ->
//! Resolved | Rejected`, and can be pushed back to `Idle` by `release()`,
//! `reload()`, or reactive invalidation from an upstream source.
//!
//! The in-flight sharing here — several logical callers awaiting the same
//! resolution without kicking off the factory twice — has no direct teacher
//! analogue (leptos resources are driven by its own runtime scheduler); it is
//! a hand-rolled `Future` impl in the manner of `leptos_reactive::runtime`'s
//! own custom polling, using a waker list instead of a channel since this is
//! single-threaded and `RefCell`-friendly.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::CoreError;
use crate::node::NodeId;

pub(crate) type BoxResolveFuture<T> = Pin<Box<dyn Future<Output = Result<Rc<T>, CoreError>>>>;

enum AccessorState<T> {
    Idle,
    Resolving(BoxResolveFuture<T>),
    Resolved(Rc<T>),
    Rejected(CoreError),
}

/// A point-in-time read of an accessor's state, for `lookup()` callers that
/// want to inspect without triggering resolution.
pub enum AccessorSnapshot<T> {
    Idle,
    Pending,
    Resolved(Rc<T>),
    Rejected(CoreError),
}

pub(crate) struct AccessorCell<T: 'static> {
    state: RefCell<AccessorState<T>>,
    waiters: RefCell<Vec<Waker>>,
    subscribers: RefCell<Vec<Box<dyn Fn(&T)>>>,
    cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>>,
    node_id: NodeId,
    starter: Box<dyn Fn() -> BoxResolveFuture<T>>,
    label: Option<&'static str>,
    /// Set for the duration of a nested `fut.poll()` call so a true
    /// synchronous self-cycle (this accessor's own resolution, directly or
    /// transitively, needing itself again before yielding) is caught as a
    /// clean error instead of recursing forever or panicking on a re-borrow.
    polling: Cell<bool>,
    /// Invoked after `release()`, `set()`, or `update()` changes this cell's
    /// value or settles it back to `Idle`, set by the owning scope so any of
    /// the three paths cascades the reactive-invalidation walk to this node's
    /// subscribers identically.
    on_invalidate: RefCell<Option<Box<dyn Fn()>>>,
}

impl<T: 'static> AccessorCell<T> {
    pub(crate) fn new(
        node_id: NodeId,
        cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>>,
        starter: Box<dyn Fn() -> BoxResolveFuture<T>>,
        label: Option<&'static str>,
    ) -> Self {
        AccessorCell {
            state: RefCell::new(AccessorState::Idle),
            waiters: RefCell::new(Vec::new()),
            subscribers: RefCell::new(Vec::new()),
            cleanups,
            node_id,
            starter,
            label,
            polling: Cell::new(false),
            on_invalidate: RefCell::new(None),
        }
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub(crate) fn set_on_invalidate(&self, f: Box<dyn Fn()>) {
        *self.on_invalidate.borrow_mut() = Some(f);
    }

    fn invalidate_downstream(&self) {
        if let Some(hook) = self.on_invalidate.borrow().as_ref() {
            hook();
        }
    }

    fn notify_subscribers(&self, value: &Rc<T>) {
        for subscriber in self.subscribers.borrow().iter() {
            subscriber(value);
        }
    }

    fn wake_waiters(&self) {
        for waker in self.waiters.borrow_mut().drain(..) {
            waker.wake();
        }
    }

    pub(crate) fn snapshot(&self) -> AccessorSnapshot<T> {
        match &*self.state.borrow() {
            AccessorState::Idle => AccessorSnapshot::Idle,
            AccessorState::Resolving(_) => AccessorSnapshot::Pending,
            AccessorState::Resolved(v) => AccessorSnapshot::Resolved(v.clone()),
            AccessorState::Rejected(e) => AccessorSnapshot::Rejected(e.clone()),
        }
    }

    /// Returns a future resolving to the cached value, starting resolution if
    /// idle. `force` discards a settled (resolved or rejected) value first so
    /// a fresh resolution runs; an in-flight resolution is always awaited
    /// rather than restarted, even when `force` is set.
    pub(crate) fn request(self: &Rc<Self>, force: bool) -> ResolveFuture<T> {
        if force {
            let mut state = self.state.borrow_mut();
            if matches!(&*state, AccessorState::Resolved(_) | AccessorState::Rejected(_)) {
                *state = AccessorState::Idle;
            }
        }
        ResolveFuture { cell: self.clone() }
    }

    pub(crate) fn set(&self, value: T) {
        let value = Rc::new(value);
        *self.state.borrow_mut() = AccessorState::Resolved(value.clone());
        self.notify_subscribers(&value);
        self.invalidate_downstream();
    }

    pub(crate) fn update(&self, updater: impl FnOnce(&T) -> T) -> Result<(), CoreError> {
        let current = match &*self.state.borrow() {
            AccessorState::Resolved(v) => v.clone(),
            _ => {
                return Err(CoreError::factory_failed(
                    "update() requires a previously resolved accessor",
                ))
            }
        };
        let updated = Rc::new(updater(&current));
        *self.state.borrow_mut() = AccessorState::Resolved(updated.clone());
        self.notify_subscribers(&updated);
        self.invalidate_downstream();
        Ok(())
    }

    pub(crate) fn subscribe(self: &Rc<Self>, callback: Box<dyn Fn(&T)>) -> Unsubscribe {
        let index = {
            let mut subs = self.subscribers.borrow_mut();
            subs.push(callback);
            subs.len() - 1
        };
        let cell = self.clone();
        Unsubscribe(Some(Box::new(move || {
            if let Some(slot) = cell.subscribers.borrow_mut().get_mut(index) {
                *slot = Box::new(|_: &T| {});
            }
        })))
    }

    pub(crate) fn release(&self) -> Result<(), CoreError> {
        let mut cleanups = self.cleanups.borrow_mut();
        while let Some(cleanup) = cleanups.pop() {
            cleanup();
        }
        drop(cleanups);
        *self.state.borrow_mut() = AccessorState::Idle;
        self.invalidate_downstream();
        Ok(())
    }
}

pub(crate) struct ResolveFuture<T: 'static> {
    cell: Rc<AccessorCell<T>>,
}

impl<T: 'static> Future for ResolveFuture<T> {
    type Output = Result<Rc<T>, CoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Checked before the state `RefCell` is ever borrowed: a true
        // synchronous cycle re-enters this same cell's `poll` while the outer
        // call's `borrow_mut()` below is still held, so the check has to run
        // first or the inner call would panic on a double borrow instead of
        // returning this error.
        if self.cell.polling.get() {
            let label = self.cell.label.unwrap_or("<unnamed>").to_string();
            return Poll::Ready(Err(CoreError::DependencyResolution {
                cycle: vec![label],
                path: Vec::new(),
            }));
        }
        loop {
            let mut state = self.cell.state.borrow_mut();
            match &mut *state {
                AccessorState::Resolved(v) => return Poll::Ready(Ok(v.clone())),
                AccessorState::Rejected(e) => return Poll::Ready(Err(e.clone())),
                AccessorState::Idle => {
                    let fut = (self.cell.starter)();
                    *state = AccessorState::Resolving(fut);
                    continue;
                }
                AccessorState::Resolving(fut) => {
                    self.cell.polling.set(true);
                    let poll_result = fut.as_mut().poll(cx);
                    self.cell.polling.set(false);
                    match poll_result {
                        Poll::Ready(Ok(value)) => {
                            *state = AccessorState::Resolved(value.clone());
                            drop(state);
                            self.cell.notify_subscribers(&value);
                            self.cell.wake_waiters();
                            return Poll::Ready(Ok(value));
                        }
                        Poll::Ready(Err(error)) => {
                            *state = AccessorState::Rejected(error.clone());
                            drop(state);
                            self.cell.wake_waiters();
                            return Poll::Ready(Err(error));
                        }
                        Poll::Pending => {
                            self.cell.waiters.borrow_mut().push(cx.waker().clone());
                            return Poll::Pending;
                        }
                    }
                }
            }
        }
    }
}

/// A one-shot unsubscribe handle returned by [`Accessor::subscribe`].
pub struct Unsubscribe(Option<Box<dyn FnOnce()>>);

impl Unsubscribe {
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Type-erased accessor operations a scope needs regardless of the cached
/// `T`: graph bookkeeping, invalidation, and disposal.
pub(crate) trait AccessorDyn: Any {
    fn node_id(&self) -> NodeId;
    fn invalidate(&self);
    fn release_dyn(&self) -> Result<(), CoreError>;
    fn is_settled(&self) -> bool;
}

impl<T: 'static> AccessorDyn for AccessorCell<T> {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn invalidate(&self) {
        let _ = self.release();
    }

    fn release_dyn(&self) -> Result<(), CoreError> {
        self.release()
    }

    fn is_settled(&self) -> bool {
        matches!(&*self.state.borrow(), AccessorState::Resolved(_) | AccessorState::Rejected(_))
    }
}

/// A live, resolvable handle to one executor's cached value within one
/// scope. Obtained from [`crate::scope::Scope::resolve`].
pub struct Accessor<T: 'static> {
    pub(crate) cell: Rc<AccessorCell<T>>,
}

impl<T: 'static> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Accessor {
            cell: self.cell.clone(),
        }
    }
}

impl<T: 'static> Accessor<T> {
    pub(crate) fn from_cell(cell: Rc<AccessorCell<T>>) -> Self {
        Accessor { cell }
    }

    /// Awaits the cached value, resolving it if not already settled.
    pub async fn get(&self) -> Result<Rc<T>, CoreError> {
        self.cell.request(false).await
    }

    /// Awaits the cached value. When `force` is true, a settled value is
    /// discarded first so this call re-resolves; an in-flight resolution is
    /// always awaited through to completion rather than restarted.
    pub async fn resolve(&self, force: bool) -> Result<Rc<T>, CoreError> {
        self.cell.request(force).await
    }

    /// A non-blocking read of the current state.
    pub fn lookup(&self) -> AccessorSnapshot<T> {
        self.cell.snapshot()
    }

    /// Replaces the cached value unconditionally, notifying subscribers.
    pub fn set(&self, value: T) {
        self.cell.set(value);
    }

    /// Transforms the currently resolved value in place. Fails if the
    /// accessor has not yet resolved.
    #[tracing::instrument(level = "trace", skip_all, fields(node = ?self.cell.node_id()))]
    pub fn update(&self, updater: impl FnOnce(&T) -> T) -> Result<(), CoreError> {
        self.cell.update(updater)
    }

    /// Registers a callback invoked whenever the cached value changes (via
    /// `set`, `update`, or a completed resolution). Returns a handle to
    /// unsubscribe.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Unsubscribe {
        self.cell.subscribe(Box::new(callback))
    }

    /// Runs registered cleanups and discards the cached value; the next
    /// access re-resolves from scratch.
    pub fn release(&self) -> Result<(), CoreError> {
        self.cell.release()
    }
}
