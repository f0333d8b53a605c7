//! The execution context (spec §4.7): the per-call object a flow handler
//! receives, carrying a hierarchical tag store, a journal for idempotent
//! replay of keyed sub-steps, cooperative cancellation that cascades to
//! children, and a simple `active -> closing -> closed` lifecycle. Grounded
//! on `leptos_reactive::context`'s owner-chain tag walk
//! (`examples/leptos-rs-leptos/leptos_reactive/src/context.rs`) for the tag
//! half, and on `leptos_reactive::runtime::Runtime::serialization_resolvers`'s
//! use of `FuturesUnordered` for the logically-concurrent `parallel` half.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use rustc_hash::FxHashMap;

use crate::error::CoreError;
use crate::extension::{ErasedOpFuture, ExecutionMode, ExecutionOperation, LifecyclePhase, NextFn};
use crate::schema::any;
use crate::scope::Scope;
use crate::tag::{Store, Tag, TagStore};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static DEPTH_TAG: Tag<u32> = Tag::new(any(), "depth");
    static FLOW_NAME_TAG: Tag<String> = Tag::new(any(), "flow_name");
    static PARENT_FLOW_NAME_TAG: Tag<String> = Tag::new(any(), "parent_flow_name");
    static IS_PARALLEL_TAG: Tag<bool> = Tag::new(any(), "is_parallel");
}

/// How a context (and, cascading, its subtree) is asked to close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseMode {
    /// Let in-flight children settle on their own before transitioning.
    Graceful,
    /// Cancel the whole subtree as part of the transition.
    Abort,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ContextState {
    Active,
    Closing,
    Closed,
}

struct Journal {
    entries: RefCell<FxHashMap<String, Rc<dyn Any>>>,
}

impl Journal {
    fn new() -> Self {
        Journal {
            entries: RefCell::new(FxHashMap::default()),
        }
    }

    fn get<T: Clone + 'static>(&self, key: &str) -> Option<Result<T, CoreError>> {
        self.entries.borrow().get(key).map(|rc| {
            rc.downcast_ref::<Result<T, CoreError>>()
                .expect("journal entry type mismatch for this key")
                .clone()
        })
    }

    fn record<T: Clone + 'static>(&self, key: &str, result: Result<T, CoreError>) {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), Rc::new(result));
    }
}

struct CancellationInner {
    aborted: Cell<bool>,
    reason: RefCell<Option<String>>,
}

/// Observable bookkeeping about a context's run, exposed to extensions via
/// the `Closing`/`Closed` lifecycle events and to callers via
/// [`ExecutionContext::started_at`]/[`ExecutionContext::completed_at`]/
/// [`ExecutionContext::error`].
struct ContextDetails {
    started_at: Instant,
    completed_at: Option<Instant>,
    error: Option<CoreError>,
    metadata: FxHashMap<String, String>,
}

impl ContextDetails {
    fn new() -> Self {
        ContextDetails {
            started_at: Instant::now(),
            completed_at: None,
            error: None,
            metadata: FxHashMap::default(),
        }
    }
}

struct ExecutionContextInner {
    id: u64,
    scope: Scope,
    parent: Option<ExecutionContext>,
    store: TagStore,
    depth: u32,
    flow_name: &'static str,
    is_parallel: bool,
    state: Cell<ContextState>,
    journal: Journal,
    cancellation: CancellationInner,
    children: RefCell<Vec<ExecutionContext>>,
    details: RefCell<ContextDetails>,
}

/// A live execution of one flow (or a nested sub-call within one). Cloning
/// shares the same underlying state (`Rc`).
pub struct ExecutionContext {
    inner: Rc<ExecutionContextInner>,
}

impl Clone for ExecutionContext {
    fn clone(&self) -> Self {
        ExecutionContext {
            inner: self.inner.clone(),
        }
    }
}

impl ExecutionContext {
    fn new_inner(
        scope: Scope,
        parent: Option<ExecutionContext>,
        depth: u32,
        flow_name: &'static str,
        is_parallel: bool,
    ) -> Self {
        ExecutionContext {
            inner: Rc::new(ExecutionContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                scope,
                parent,
                store: TagStore::new(),
                depth,
                flow_name,
                is_parallel,
                state: Cell::new(ContextState::Active),
                journal: Journal::new(),
                cancellation: CancellationInner {
                    aborted: Cell::new(false),
                    reason: RefCell::new(None),
                },
                children: RefCell::new(Vec::new()),
                details: RefCell::new(ContextDetails::new()),
            }),
        }
    }

    /// Creates a fresh top-level context for running `flow_name` against
    /// `scope`.
    pub fn new_root(scope: Scope, flow_name: &'static str) -> Self {
        let ctx = Self::new_inner(scope, None, 0, flow_name, false);
        ctx.populate_well_known_tags();
        ctx.fire_lifecycle(LifecyclePhase::Create, None);
        ctx
    }

    /// Creates a nested context for calling `flow_name` from within this one.
    /// The child inherits cancellation cascade from its parent and is closed
    /// automatically when the parent closes. Fails with
    /// [`CoreError::ContextClosed`] if this context is no longer active — a
    /// closing or closed context must not spawn new children.
    pub fn child(&self, flow_name: &'static str, is_parallel: bool) -> Result<Self, CoreError> {
        self.require_active()?;
        let child = Self::new_inner(
            self.inner.scope.clone(),
            Some(self.clone()),
            self.inner.depth + 1,
            flow_name,
            is_parallel,
        );
        child.populate_well_known_tags();
        child.fire_lifecycle(LifecyclePhase::Create, None);
        self.inner.children.borrow_mut().push(child.clone());
        Ok(child)
    }

    fn fire_lifecycle(&self, phase: LifecyclePhase, mode: Option<CloseMode>) {
        let op = crate::extension::ContextLifecycleOperation {
            phase,
            context: self.clone(),
            mode,
        };
        for ext in self.inner.scope.extensions_snapshot() {
            ext.on_context_lifecycle(&self.inner.scope, &op);
        }
    }

    fn populate_well_known_tags(&self) {
        DEPTH_TAG.with(|t| t.write_to_store(&self.inner.store, self.inner.depth));
        FLOW_NAME_TAG.with(|t| t.write_to_store(&self.inner.store, self.inner.flow_name.to_string()));
        IS_PARALLEL_TAG.with(|t| t.write_to_store(&self.inner.store, self.inner.is_parallel));
        if let Some(parent) = &self.inner.parent {
            PARENT_FLOW_NAME_TAG
                .with(|t| t.write_to_store(&self.inner.store, parent.inner.flow_name.to_string()));
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn parent(&self) -> Option<ExecutionContext> {
        self.inner.parent.clone()
    }

    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    pub fn flow_name(&self) -> &'static str {
        self.inner.flow_name
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.get() == ContextState::Active
    }

    pub fn started_at(&self) -> Instant {
        self.inner.details.borrow().started_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.inner.details.borrow().completed_at
    }

    pub fn error(&self) -> Option<CoreError> {
        self.inner.details.borrow().error.clone()
    }

    /// Attaches a piece of user-supplied metadata to this context's
    /// observable details, surfaced to extensions via the lifecycle events.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .details
            .borrow_mut()
            .metadata
            .insert(key.into(), value.into());
    }

    pub fn metadata(&self) -> FxHashMap<String, String> {
        self.inner.details.borrow().metadata.clone()
    }

    /// Looks a tag up through this context's own store, then its owning
    /// scope's chain, then its parent contexts nearest-first.
    pub fn find_tag<T: Clone + 'static>(&self, tag: &Tag<T>) -> Result<Option<T>, CoreError> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(ctx) = current {
            current = ctx.parent();
            ancestors.push(ctx);
        }
        let mut refs: Vec<&dyn Store> = vec![&self.inner.store, self.inner.scope.store()];
        refs.extend(ancestors.iter().map(|ctx| &ctx.inner.store as &dyn Store));
        tag.read_chain(&refs)
    }

    pub fn extract_tag<T: Clone + 'static>(&self, tag: &Tag<T>) -> Result<T, CoreError> {
        self.find_tag(tag)?.ok_or(CoreError::TagMissing {
            label: tag.label(),
            path: Vec::new(),
        })
    }

    pub fn set_tag<T: Clone + 'static>(&self, tag: &Tag<T>, value: T) {
        tag.write_to_store(&self.inner.store, value);
    }

    fn require_active(&self) -> Result<(), CoreError> {
        if self.inner.state.get() == ContextState::Active {
            Ok(())
        } else {
            Err(CoreError::ContextClosed {
                context_id: self.inner.id,
            })
        }
    }

    pub fn is_cancelled(&self) -> bool {
        let mut current = Some(self.clone());
        while let Some(ctx) = current {
            if ctx.inner.cancellation.aborted.get() {
                return true;
            }
            current = ctx.parent();
        }
        false
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.inner.cancellation.aborted.set(true);
        *self.inner.cancellation.reason.borrow_mut() = Some(reason.clone());
        for child in self.inner.children.borrow().iter() {
            child.cancel(reason.clone());
        }
    }

    /// Runs `op` once per distinct `key` within this context's lifetime,
    /// journaling the outcome so a repeated call with the same key (a retry,
    /// or a replay) returns the recorded result instead of re-running it.
    #[tracing::instrument(level = "trace", skip_all, fields(context = self.inner.id, key))]
    pub async fn exec<T, F, Fut>(&self, key: &str, op: F) -> Result<T, CoreError>
    where
        T: Clone + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        self.require_active()?;
        if let Some(cached) = self.inner.journal.get::<T>(key) {
            return cached;
        }
        if self.is_cancelled() {
            let reason = self
                .inner
                .cancellation
                .reason
                .borrow()
                .clone()
                .unwrap_or_else(|| "context cancelled".to_string());
            return Err(CoreError::aborted(reason));
        }
        let result = op().await;
        self.inner.journal.record(key, result.clone());
        result
    }

    async fn invoke_through_extensions(
        &self,
        op: ExecutionOperation,
        base: NextFn,
    ) -> Result<Box<dyn Any>, CoreError> {
        let extensions = self.inner.scope.extensions_snapshot();
        let mut chain = base;
        for ext in extensions.into_iter() {
            let scope = self.inner.scope.clone();
            let op = op.clone();
            let prev = chain;
            chain = Box::new(move || ext.wrap_execution(&scope, &op, prev));
        }
        chain().await
    }

    fn execution_op(&self, mode: ExecutionMode, count: usize) -> ExecutionOperation {
        ExecutionOperation {
            flow_name: self.inner.flow_name,
            depth: self.inner.depth,
            mode,
            key: None,
            context: self.clone(),
            count: Some(count),
        }
    }

    /// Runs every future to completion, logically concurrently (via
    /// `FuturesUnordered`, not OS threads), failing as soon as the first one
    /// rejects. Routed through the extension pipeline as an
    /// `ExecutionOperation` with `mode: Parallel` and `count` set to the
    /// batch size.
    pub async fn parallel<T: 'static>(
        &self,
        futures: Vec<Pin<Box<dyn Future<Output = Result<T, CoreError>>>>>,
    ) -> Result<Vec<T>, CoreError> {
        self.require_active()?;
        let op = self.execution_op(ExecutionMode::Parallel, futures.len());
        let base: NextFn = Box::new(move || {
            Box::pin(async move {
                run_parallel(futures)
                    .await
                    .map(|v| Box::new(v) as Box<dyn Any>)
            }) as ErasedOpFuture
        });
        let boxed = self.invoke_through_extensions(op, base).await?;
        Ok(*boxed
            .downcast::<Vec<T>>()
            .expect("extension pipeline must preserve the parallel batch's output type"))
    }

    /// As [`ExecutionContext::parallel`], but never short-circuits: every
    /// outcome (success or failure) is returned, alongside a summary of how
    /// many fulfilled vs. rejected. Routed through the extension pipeline as
    /// an `ExecutionOperation` with `mode: ParallelSettled`.
    pub async fn parallel_settled<T: 'static>(
        &self,
        futures: Vec<Pin<Box<dyn Future<Output = Result<T, CoreError>>>>>,
    ) -> (Vec<Result<T, CoreError>>, ParallelSettledStats) {
        let total = futures.len();
        let op = self.execution_op(ExecutionMode::ParallelSettled, total);
        let base: NextFn = Box::new(move || {
            Box::pin(async move {
                let results = run_parallel_settled(futures).await;
                Ok(Box::new(results) as Box<dyn Any>)
            }) as ErasedOpFuture
        });
        // `parallel_settled` never rejects by contract; a well-behaved
        // extension wrapping it only observes or delays, it does not turn the
        // batch itself into an error.
        let boxed = self
            .invoke_through_extensions(op, base)
            .await
            .expect("parallel_settled's underlying batch never rejects");
        let results = *boxed
            .downcast::<Vec<Result<T, CoreError>>>()
            .expect("extension pipeline must preserve the parallel batch's output type");
        let stats = results.iter().fold(
            ParallelSettledStats {
                total,
                fulfilled: 0,
                rejected: 0,
            },
            |mut stats, result| {
                if result.is_ok() {
                    stats.fulfilled += 1;
                } else {
                    stats.rejected += 1;
                }
                stats
            },
        );
        (results, stats)
    }

    /// Transitions `active -> closing -> closed`, cascading to children
    /// first. `mode: Abort` cancels the whole subtree as part of the
    /// transition, so every descendant observes cancellation before it
    /// settles into `closed`. Idempotent.
    pub fn close(&self, mode: CloseMode) -> Result<(), CoreError> {
        if self.inner.state.get() == ContextState::Closed {
            return Ok(());
        }
        if mode == CloseMode::Abort {
            self.cancel("context closed with mode=abort");
        }
        self.inner.state.set(ContextState::Closing);
        self.fire_lifecycle(LifecyclePhase::Closing, Some(mode));
        for child in self.inner.children.borrow_mut().drain(..) {
            child.close(mode)?;
        }
        self.inner.state.set(ContextState::Closed);
        {
            let mut details = self.inner.details.borrow_mut();
            details.completed_at = Some(Instant::now());
            if let Some(reason) = self.inner.cancellation.reason.borrow().clone() {
                details.error = Some(CoreError::aborted(reason));
            }
        }
        self.fire_lifecycle(LifecyclePhase::Closed, Some(mode));
        Ok(())
    }
}

/// Summary counts returned alongside [`ExecutionContext::parallel_settled`]'s
/// per-item results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParallelSettledStats {
    pub total: usize,
    pub fulfilled: usize,
    pub rejected: usize,
}

async fn run_parallel<T: 'static>(
    futures: Vec<Pin<Box<dyn Future<Output = Result<T, CoreError>>>>>,
) -> Result<Vec<T>, CoreError> {
    let len = futures.len();
    let mut unordered: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, fut)| async move { (index, fut.await) })
        .collect();
    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    while let Some((index, result)) = unordered.next().await {
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(error) => return Err(error),
        }
    }
    Ok(slots
        .into_iter()
        .map(|slot| slot.expect("every parallel slot is filled before completion"))
        .collect())
}

async fn run_parallel_settled<T: 'static>(
    futures: Vec<Pin<Box<dyn Future<Output = Result<T, CoreError>>>>>,
) -> Vec<Result<T, CoreError>> {
    let len = futures.len();
    let mut unordered: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, fut)| async move { (index, fut.await) })
        .collect();
    let mut slots: Vec<Option<Result<T, CoreError>>> = (0..len).map(|_| None).collect();
    while let Some((index, result)) = unordered.next().await {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .map(|slot| slot.expect("every parallel_settled slot is filled before completion"))
        .collect()
}
