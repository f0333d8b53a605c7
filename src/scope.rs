//! The scope (spec §3, §4.4): an owning, disposable arena that caches
//! resolved executors, tracks their reactive graph edges, and runs the
//! resolution algorithm. Grounded on `leptos_reactive::scope`'s `Scope`/
//! `ScopeDisposer`/`run_child_scope` shape
//! (`examples/leptos-rs-leptos/leptos_reactive/src/scope.rs`) and
//! `leptos_reactive::runtime::Runtime`'s `Rc<RefCell<dyn Any>>`-keyed node
//! store for the cache itself.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use crate::accessor::{Accessor, AccessorCell, AccessorDyn, BoxResolveFuture};
use crate::controller::Controller;
use crate::dependencies::Dependencies;
use crate::error::CoreError;
use crate::executor::{Executor, ExecutorInner, ExecutorKey};
use crate::extension::{Extension, NextFn, ResolveOperation};
use crate::node::{NodeGraph, NodeId};
use crate::tag::{Store, Tag, TagStore};

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

struct CacheEntry {
    node_id: NodeId,
    any: Rc<dyn Any>,
    dyn_accessor: Rc<dyn AccessorDyn>,
}

struct ScopeInner {
    id: u64,
    parent: Option<Weak<ScopeInner>>,
    children: RefCell<Vec<Scope>>,
    store: TagStore,
    graph: NodeGraph,
    nodes: RefCell<SlotMap<NodeId, ()>>,
    node_index: RefCell<FxHashMap<NodeId, ExecutorKey>>,
    cache: RefCell<FxHashMap<ExecutorKey, CacheEntry>>,
    extensions: RefCell<Vec<Rc<dyn Extension>>>,
    disposed: Cell<bool>,
    on_change: RefCell<Vec<Box<dyn Fn(ExecutorKey)>>>,
    on_release: RefCell<Vec<Box<dyn Fn(ExecutorKey)>>>,
    on_error: RefCell<Vec<Box<dyn Fn(&CoreError)>>>,
}

/// A dependency-injection arena. Cloning a `Scope` is cheap and yields a
/// handle to the same underlying state (`Rc`); there is only ever one actual
/// scope behind any number of clones.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Scope {
            inner: self.inner.clone(),
        }
    }
}

impl Scope {
    /// Creates a fresh root scope with no parent.
    pub fn new() -> Self {
        Scope::new_with_parent(None)
    }

    fn new_with_parent(parent: Option<Weak<ScopeInner>>) -> Self {
        Scope {
            inner: Rc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                children: RefCell::new(Vec::new()),
                store: TagStore::new(),
                graph: NodeGraph::default(),
                nodes: RefCell::new(SlotMap::with_key()),
                node_index: RefCell::new(FxHashMap::default()),
                cache: RefCell::new(FxHashMap::default()),
                extensions: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
                on_change: RefCell::new(Vec::new()),
                on_release: RefCell::new(Vec::new()),
                on_error: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Creates a child scope. The child is disposed automatically when its
    /// parent is, before the parent's own accessors are released.
    pub fn child(&self) -> Scope {
        let child = Scope::new_with_parent(Some(Rc::downgrade(&self.inner)));
        self.inner.children.borrow_mut().push(child.clone());
        child
    }

    pub fn parent(&self) -> Option<Scope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Scope { inner })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// This scope's own tag store (no hierarchical lookup).
    pub fn store(&self) -> &TagStore {
        &self.inner.store
    }

    /// Looks a tag up through this scope and its ancestors, nearest first.
    pub fn find_tag<T: Clone + 'static>(&self, tag: &Tag<T>) -> Result<Option<T>, CoreError> {
        let mut owned_chain = Vec::new();
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            current = scope.parent();
            owned_chain.push(scope);
        }
        let refs: Vec<&dyn Store> = owned_chain
            .iter()
            .map(|scope| &scope.inner.store as &dyn Store)
            .collect();
        tag.read_chain(&refs)
    }

    /// As [`Scope::find_tag`], but fails with [`CoreError::TagMissing`] if
    /// nothing in the chain has a value and the tag has no default.
    pub fn extract_tag<T: Clone + 'static>(&self, tag: &Tag<T>) -> Result<T, CoreError> {
        self.find_tag(tag)?.ok_or(CoreError::TagMissing {
            label: tag.label(),
            path: Vec::new(),
        })
    }

    /// Installs an extension, calling its `init` hook immediately. Extensions
    /// registered earlier wrap closer to the real operation; ones registered
    /// later wrap around them. Returns a callback that deregisters it.
    pub fn use_extension(&self, extension: impl Extension + 'static) -> Box<dyn FnOnce()> {
        let extension: Rc<dyn Extension> = Rc::new(extension);
        extension.init(self);
        self.inner.extensions.borrow_mut().push(extension.clone());
        let inner = self.inner.clone();
        Box::new(move || {
            let mut extensions = inner.extensions.borrow_mut();
            if let Some(pos) = extensions.iter().position(|e| Rc::ptr_eq(e, &extension)) {
                extensions.remove(pos);
            }
        })
    }

    pub(crate) fn extensions_snapshot(&self) -> Vec<Rc<dyn Extension>> {
        self.inner.extensions.borrow().clone()
    }

    pub fn on_change(&self, callback: impl Fn(ExecutorKey) + 'static) {
        self.inner.on_change.borrow_mut().push(Box::new(callback));
    }

    pub fn on_release(&self, callback: impl Fn(ExecutorKey) + 'static) {
        self.inner.on_release.borrow_mut().push(Box::new(callback));
    }

    pub fn on_error(&self, callback: impl Fn(&CoreError) + 'static) {
        self.inner.on_error.borrow_mut().push(Box::new(callback));
    }

    fn notify_change(&self, key: ExecutorKey) {
        for cb in self.inner.on_change.borrow().iter() {
            cb(key);
        }
    }

    fn notify_error(&self, error: &CoreError) {
        for cb in self.inner.on_error.borrow().iter() {
            cb(error);
        }
        for ext in self.inner.extensions.borrow().iter() {
            ext.on_error(self, error);
        }
    }

    /// Applies a preset built by [`crate::executor::preset`] /
    /// [`crate::executor::preset_with`], overriding its target executor's
    /// resolution for this scope's lifetime. Must be called before the
    /// target executor has been resolved on this scope.
    pub fn apply_preset<T: 'static>(&self, preset: crate::executor::Preset<T>) {
        preset.into_erased().install(self);
    }

    pub(crate) fn seed_preset_value<T: 'static>(&self, target: ExecutorKey, value: Rc<T>) {
        let node_id = self.inner.nodes.borrow_mut().insert(());
        let cleanups = Rc::new(RefCell::new(Vec::new()));
        let starter: Box<dyn Fn() -> BoxResolveFuture<T>> = {
            let value = value.clone();
            Box::new(move || {
                let value = value.clone();
                Box::pin(async move { Ok(value) })
            })
        };
        let cell = Rc::new(AccessorCell::new(node_id, cleanups, starter, None));
        self.wire_on_invalidate(&cell, node_id);
        self.insert_cache_entry(target, node_id, cell);
    }

    pub(crate) fn seed_preset_executor<T: 'static>(&self, target: ExecutorKey, replacement: Executor<T>) {
        let node_id = self.inner.nodes.borrow_mut().insert(());
        let cleanups = Rc::new(RefCell::new(Vec::new()));
        let scope = self.clone();
        let starter: Box<dyn Fn() -> BoxResolveFuture<T>> = Box::new(move || {
            let scope = scope.clone();
            let replacement = replacement.clone();
            Box::pin(async move { scope.resolve_rc(&replacement).await })
        });
        let cell = Rc::new(AccessorCell::new(node_id, cleanups, starter, None));
        self.wire_on_invalidate(&cell, node_id);
        self.insert_cache_entry(target, node_id, cell);
    }

    /// Hooks an accessor cell so any `release()`, `set()`, or `update()` of
    /// it, whichever path it comes through, cascades to invalidate its
    /// reactive subscribers.
    fn wire_on_invalidate<T: 'static>(&self, cell: &Rc<AccessorCell<T>>, node_id: NodeId) {
        let scope = self.clone();
        cell.set_on_invalidate(Box::new(move || scope.propagate_invalidation(node_id)));
    }

    fn insert_cache_entry<T: 'static>(&self, key: ExecutorKey, node_id: NodeId, cell: Rc<AccessorCell<T>>) {
        let dyn_accessor: Rc<dyn AccessorDyn> = cell.clone();
        let any: Rc<dyn Any> = cell;
        self.inner.node_index.borrow_mut().insert(node_id, key);
        self.inner
            .cache
            .borrow_mut()
            .insert(key, CacheEntry { node_id, any, dyn_accessor });
    }

    /// Obtains the [`Accessor`] for `executor` on this scope, creating its
    /// cache slot on first access. Lazy: this does not itself trigger
    /// resolution, it only guarantees a handle exists to resolve against.
    #[tracing::instrument(level = "trace", skip_all, fields(scope = self.inner.id, executor = executor.key().0))]
    pub fn resolve<T: 'static>(&self, executor: &Executor<T>) -> Result<Accessor<T>, CoreError> {
        if self.inner.disposed.get() {
            return Err(CoreError::ScopeDisposed);
        }
        let key = executor.key();
        if let Some(entry) = self.inner.cache.borrow().get(&key) {
            let cell = entry
                .any
                .clone()
                .downcast::<AccessorCell<T>>()
                .expect("cache entry type mismatch for this executor key");
            return Ok(Accessor::from_cell(cell));
        }
        Ok(self.create_accessor(executor))
    }

    /// The `.lazy` modifier view: an alias for [`Scope::resolve`] itself,
    /// since resolving already returns an accessor without forcing
    /// resolution. Spelled out separately so call sites can say what they
    /// mean.
    pub fn resolve_lazy<T: 'static>(&self, executor: &Executor<T>) -> Result<Accessor<T>, CoreError> {
        self.resolve(executor)
    }

    /// The `.static` modifier view: forces resolution, then returns the
    /// settled accessor for further value/lifecycle access.
    pub async fn resolve_static<T: 'static>(&self, executor: &Executor<T>) -> Result<Accessor<T>, CoreError> {
        let accessor = self.resolve(executor)?;
        accessor.get().await?;
        Ok(accessor)
    }

    /// The `.reactive` modifier view: forces resolution and links `consumer`
    /// as a reactive subscriber of `executor`, so a later release or reload
    /// of `executor` invalidates `consumer` too.
    pub async fn resolve_reactive<T: 'static, U: 'static>(
        &self,
        executor: &Executor<T>,
        consumer: &Accessor<U>,
    ) -> Result<Rc<T>, CoreError> {
        let accessor = self.resolve(executor)?;
        self.link_reactive(&accessor, consumer);
        accessor.get().await
    }

    /// One-shot convenience: resolves an ad-hoc dependency shape then hands
    /// it to `cb`, without registering a cached executor for it. For a
    /// result worth caching and sharing across calls, declare a real
    /// executor with [`crate::executor::derive`] instead.
    pub async fn run<D, F, Fut, R>(&self, deps: D, cb: F) -> Result<R, CoreError>
    where
        D: Dependencies,
        F: FnOnce(D::Output) -> Fut,
        Fut: Future<Output = Result<R, CoreError>>,
    {
        let resolved = deps.resolve(self.clone()).await?;
        cb(resolved).await
    }

    fn create_accessor<T: 'static>(&self, executor: &Executor<T>) -> Accessor<T> {
        let node_id = self.inner.nodes.borrow_mut().insert(());
        let cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
        let scope = self.clone();
        let executor_inner = executor.inner.clone();
        let executor_key = executor.key();
        let label = executor.label();
        let cleanups_for_starter = cleanups.clone();
        let starter: Box<dyn Fn() -> BoxResolveFuture<T>> = Box::new(move || {
            let scope = scope.clone();
            let executor_inner = executor_inner.clone();
            let controller = Controller::new(scope.clone(), node_id, cleanups_for_starter.clone());
            Box::pin(async move {
                let deps_result = (executor_inner.resolve_deps)(scope.clone()).await;
                let deps = match deps_result {
                    Ok(deps) => deps,
                    Err(e) => {
                        let e = e.enrich_path(label.unwrap_or("<unnamed>"));
                        scope.notify_error(&e);
                        return Err(e);
                    }
                };
                match scope
                    .invoke_through_extensions(executor_key, executor_inner.as_ref(), deps, controller)
                    .await
                {
                    Ok(value) => Ok(Rc::new(value)),
                    Err(e) => {
                        let e = e.enrich_path(label.unwrap_or("<unnamed>"));
                        scope.notify_error(&e);
                        Err(e)
                    }
                }
            })
        });
        let cell = Rc::new(AccessorCell::new(node_id, cleanups, starter, label));
        self.wire_on_invalidate(&cell, node_id);
        self.insert_cache_entry(executor.key(), node_id, cell.clone());
        Accessor::from_cell(cell)
    }

    /// Resolves `executor` to its cached value directly, the form
    /// [`crate::dependencies::Dependencies`] implementations use internally.
    pub(crate) async fn resolve_rc<T: 'static>(&self, executor: &Executor<T>) -> Result<Rc<T>, CoreError> {
        let accessor = self.resolve(executor)?;
        let value = accessor.get().await?;
        self.notify_change(executor.key());
        Ok(value)
    }

    async fn invoke_through_extensions<T: 'static>(
        &self,
        executor_key: ExecutorKey,
        executor_inner: &ExecutorInner<T>,
        deps: Box<dyn Any>,
        controller: Controller,
    ) -> Result<T, CoreError> {
        let op = ResolveOperation {
            executor_key,
            executor_label: *executor_inner.label.borrow(),
        };
        let factory = &executor_inner.factory;
        let invoke_fut = factory.invoke(deps, controller);
        let base: NextFn = Box::new(move || {
            Box::pin(async move { invoke_fut.await.map(|v| Box::new(v) as Box<dyn Any>) })
        });
        let extensions = self.inner.extensions.borrow().clone();
        let mut chain = base;
        for ext in extensions.into_iter() {
            let scope = self.clone();
            let op = op;
            let prev = chain;
            chain = Box::new(move || ext.wrap_resolve(&scope, &op, prev));
        }
        let boxed = chain().await?;
        Ok(*boxed
            .downcast::<T>()
            .expect("extension pipeline must preserve the factory's output type"))
    }

    pub(crate) fn release_node(&self, node: NodeId) {
        let key = self.inner.node_index.borrow().get(&node).copied();
        if let Some(key) = key {
            let dyn_accessor = self.inner.cache.borrow().get(&key).map(|e| e.dyn_accessor.clone());
            if let Some(dyn_accessor) = dyn_accessor {
                // `release_dyn` runs the accessor's `on_released` hook, which
                // itself calls `propagate_invalidation` for this node.
                let _ = dyn_accessor.release_dyn();
                for cb in self.inner.on_release.borrow().iter() {
                    cb(key);
                }
            }
        }
    }

    pub(crate) fn reload_node(&self, node: NodeId) {
        self.release_node(node);
    }

    fn propagate_invalidation(&self, node: NodeId) {
        let mut stack = self.inner.graph.subscribers_of(node);
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            let key = self.inner.node_index.borrow().get(&n).copied();
            if let Some(key) = key {
                if let Some(entry) = self.inner.cache.borrow().get(&key) {
                    entry.dyn_accessor.invalidate();
                }
            }
            stack.extend(self.inner.graph.subscribers_of(n));
        }
    }

    /// Registers `consumer` as a reactive subscriber of `source`: releasing
    /// or reloading `source` will cascade to invalidate `consumer`.
    pub fn link_reactive<T: 'static, U: 'static>(&self, source: &Accessor<T>, consumer: &Accessor<U>) {
        self.inner
            .graph
            .subscribe(source.cell.node_id(), consumer.cell.node_id());
    }

    /// Releases every cached accessor on this scope and its children
    /// (children first), then marks the scope disposed. Idempotent.
    #[tracing::instrument(level = "trace", skip_all, fields(scope = self.inner.id))]
    pub fn dispose(&self) -> Result<(), CoreError> {
        if self.inner.disposed.get() {
            return Ok(());
        }
        let mut causes = Vec::new();
        for child in self.inner.children.borrow_mut().drain(..) {
            if let Err(CoreError::ReleaseError { causes: mut c, .. }) = child.dispose() {
                causes.append(&mut c);
            }
        }
        for entry in self.inner.cache.borrow().values() {
            if let Err(e) = entry.dyn_accessor.release_dyn() {
                causes.push(e);
            }
        }
        for ext in self.inner.extensions.borrow().iter().rev() {
            ext.dispose(self);
        }
        self.inner.disposed.set(true);
        if causes.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ReleaseError {
                causes,
                path: Vec::new(),
            })
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}
