//! The extension pipeline (spec §4.6): AOP-style interception around
//! resolution, execution, and context lifecycle. An extension's `wrap` hook
//! receives a `next` thunk for the operation it is wrapping and composes
//! outer-to-inner in *registration* order — the first extension registered on
//! a scope sits innermost (closest to the real operation), the last sits
//! outermost. Grounded on the `Observers`/hook shape in
//! `examples/other_examples/3304556a_s1ntropy-ferrous-di__src-provider-mod.rs.rs`,
//! reworked from that crate's fixed dispose/resolve callbacks into a
//! composable middleware chain.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;

use crate::context::{CloseMode, ExecutionContext};
use crate::error::CoreError;
use crate::executor::ExecutorKey;
use crate::scope::Scope;

pub(crate) type ErasedOpFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Any>, CoreError>>>>;
pub(crate) type NextFn = Box<dyn FnOnce() -> ErasedOpFuture>;

/// Describes the resolution currently being intercepted.
#[derive(Clone, Copy, Debug)]
pub struct ResolveOperation {
    /// Identity of the executor being resolved; stable across the executor's
    /// clones, so an extension can key its own state off it.
    pub executor_key: ExecutorKey,
    pub executor_label: Option<&'static str>,
}

/// The fan-out shape of an execution-context run currently being intercepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    ParallelSettled,
}

/// Describes an execution-context run currently being intercepted: a flow's
/// own handler invocation, or an `ExecutionContext::parallel`/`parallel_settled`
/// batch running underneath it.
#[derive(Clone)]
pub struct ExecutionOperation {
    pub flow_name: &'static str,
    pub depth: u32,
    pub mode: ExecutionMode,
    /// The journal key this call was made with, if it was a keyed
    /// `call_nested_with` — lets an extension correlate retries/replays.
    pub key: Option<String>,
    pub context: ExecutionContext,
    /// Number of sibling items in this batch, set only for `parallel` and
    /// `parallel_settled` runs.
    pub count: Option<usize>,
}

/// Which point in a context's lifecycle is being observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Create,
    Closing,
    Closed,
}

/// Describes a context lifecycle transition currently being intercepted:
/// fired once when a context is created, then once each as `close()` enters
/// `Closing` and again once it settles into `Closed`.
#[derive(Clone)]
pub struct ContextLifecycleOperation {
    pub phase: LifecyclePhase,
    pub context: ExecutionContext,
    /// Set on the `Closing`/`Closed` phases to the mode `close()` was called
    /// with; `None` on `Create`.
    pub mode: Option<CloseMode>,
}

/// A pluggable interceptor installed on a [`Scope`] with
/// [`Scope::use_extension`]. Every hook has a passthrough default, so an
/// extension can implement only the hooks it cares about.
pub trait Extension {
    fn name(&self) -> &'static str;

    /// Runs once, at registration time (`Scope::use_extension`).
    fn init(&self, _scope: &Scope) {}

    /// Wraps a single executor resolution. The default simply calls `next`.
    fn wrap_resolve(&self, _scope: &Scope, _op: &ResolveOperation, next: NextFn) -> ErasedOpFuture {
        next()
    }

    /// Wraps a flow execution, or a parallel/parallel-settled batch. The
    /// default simply calls `next`.
    fn wrap_execution(&self, _scope: &Scope, _op: &ExecutionOperation, next: NextFn) -> ErasedOpFuture {
        next()
    }

    /// Observes a context lifecycle transition (create/closing/closed);
    /// cannot veto it.
    fn on_context_lifecycle(&self, _scope: &Scope, _op: &ContextLifecycleOperation) {}

    /// Observes an error surfaced anywhere in a resolution or execution this
    /// extension wrapped. Does not suppress its propagation.
    fn on_error(&self, _scope: &Scope, _error: &CoreError) {}

    /// Runs once, during `Scope::dispose`, in reverse-registration order.
    fn dispose(&self, _scope: &Scope) {}
}
