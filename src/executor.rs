//! The executor model (spec §3, §4.3): the declarative description of "how to
//! produce a value", before any scope has resolved it into a live accessor.
//!
//! Spec.md's JS original lets a runtime inspect a factory's source to decide
//! whether it reads `controller.cleanup`/`release`/`reload`/`scope`, and skips
//! building an `Analysis` when that inspection isn't possible. Rust has no
//! such reflection, so per the spec's own DESIGN NOTES this is reworked as:
//! the factory's sync/async-ness is known from which constructor the caller
//! used (`provide` vs `provide_async`), and `skip_reason` is unconditionally
//! [`SkipReason::NotApplicable`] — there is no codegen step to skip.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;

use crate::controller::Controller;
use crate::dependencies::{Dependencies, DependencyShapeDescriptor};
use crate::error::CoreError;
use crate::tag::TaggedValue;

/// Identity of an [`Executor`], used as a cache key and for cycle detection.
/// Two clones of the same `Executor` compare equal; two independently
/// constructed executors never do, even if their factories are identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ExecutorKey(pub(crate) usize);

pub(crate) type BoxFactoryFuture<T> = Pin<Box<dyn Future<Output = Result<T, CoreError>>>>;

pub(crate) trait ErasedFactory<T> {
    fn invoke(&self, deps: Box<dyn Any>, controller: Controller) -> BoxFactoryFuture<T>;
}

struct SyncFactory<D, T, F> {
    f: F,
    _marker: PhantomData<(D, T)>,
}

impl<D, T, F> ErasedFactory<T> for SyncFactory<D, T, F>
where
    D: 'static,
    T: 'static,
    F: Fn(D, &Controller) -> Result<T, CoreError> + 'static,
{
    fn invoke(&self, deps: Box<dyn Any>, controller: Controller) -> BoxFactoryFuture<T> {
        let deps = *deps
            .downcast::<D>()
            .expect("dependency output type must match the shape declared at derive() time");
        let result = (self.f)(deps, &controller);
        Box::pin(async move { result })
    }
}

struct AsyncFactory<D, T, F> {
    f: F,
    _marker: PhantomData<(D, T)>,
}

impl<D, T, F, Fut> ErasedFactory<T> for AsyncFactory<D, T, F>
where
    D: 'static,
    T: 'static,
    F: Fn(D, &Controller) -> Fut + 'static,
    Fut: Future<Output = Result<T, CoreError>> + 'static,
{
    fn invoke(&self, deps: Box<dyn Any>, controller: Controller) -> BoxFactoryFuture<T> {
        let deps = *deps
            .downcast::<D>()
            .expect("dependency output type must match the shape declared at derive() time");
        Box::pin(async move {
            let _controller = controller;
            (self.f)(deps, &_controller).await
        })
    }
}

pub(crate) type ErasedDepsResolver =
    Box<dyn Fn(crate::scope::Scope) -> Pin<Box<dyn Future<Output = Result<Box<dyn Any>, CoreError>>>>>;

fn erase_deps_resolver<D: Dependencies>(deps: D) -> ErasedDepsResolver {
    let deps = Rc::new(deps);
    Box::new(move |scope: crate::scope::Scope| {
        let deps = deps.clone();
        Box::pin(async move {
            let output = deps.resolve(scope).await?;
            Ok(Box::new(output) as Box<dyn Any>)
        })
    })
}

/// Why an [`Analysis`] field couldn't be determined. Rust's static sync/async
/// split means the shape and async-ness are always known; the single variant
/// here documents that there is, structurally, nothing left to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotApplicable,
}

/// Static metadata about an executor, gathered at construction time rather
/// than by inspecting the factory's source.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub is_async: bool,
    pub dependency_shape: DependencyShapeDescriptor,
    pub skip_reason: SkipReason,
}

impl Analysis {
    fn new(is_async: bool, dependency_shape: DependencyShapeDescriptor) -> Self {
        Analysis {
            is_async,
            dependency_shape,
            skip_reason: SkipReason::NotApplicable,
        }
    }
}

pub(crate) struct ExecutorInner<T: 'static> {
    pub(crate) factory: Box<dyn ErasedFactory<T>>,
    pub(crate) resolve_deps: ErasedDepsResolver,
    pub(crate) tags: Vec<TaggedValue>,
    pub(crate) analysis: Analysis,
    pub(crate) label: RefCell<Option<&'static str>>,
}

/// A declarative description of how to produce a `T`: a factory plus its
/// dependency shape. Resolving it against a [`crate::scope::Scope`] produces a
/// live [`crate::accessor::Accessor`]. Cloning an `Executor` is cheap (`Rc`)
/// and preserves identity — `a.clone().key() == a.key()`.
pub struct Executor<T: 'static> {
    pub(crate) inner: Rc<ExecutorInner<T>>,
}

impl<T: 'static> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Executor {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Executor<T> {
    /// This executor's identity, stable across clones.
    pub fn key(&self) -> ExecutorKey {
        ExecutorKey(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Attaches a tagged value to this executor's metadata, as the
    /// `...tags` trailing arguments spec.md passes to `provide`/`derive`.
    ///
    /// # Panics
    /// Panics if called after this executor has already been cloned and
    /// shared elsewhere. Chain `.tagged(...)` immediately after
    /// `provide`/`derive`, before handing the executor out, as the examples
    /// throughout this crate do.
    pub fn tagged(mut self, tagged: TaggedValue) -> Self {
        Rc::get_mut(&mut self.inner)
            .expect("tagged() must be called before the executor is cloned/shared")
            .tags
            .push(tagged);
        self
    }

    /// Attaches a human-readable label, surfaced in error paths and journals.
    pub fn named(self, label: &'static str) -> Self {
        *self.inner.label.borrow_mut() = Some(label);
        self
    }

    pub fn label(&self) -> Option<&'static str> {
        *self.inner.label.borrow()
    }

    pub fn analysis(&self) -> &Analysis {
        &self.inner.analysis
    }
}

/// Declares a leaf executor with no dependencies and a synchronous factory.
pub fn provide<T: 'static>(
    factory: impl Fn(&Controller) -> Result<T, CoreError> + 'static,
) -> Executor<T> {
    derive((), move |(), controller| factory(controller))
}

/// Declares a leaf executor with no dependencies and an async factory.
pub fn provide_async<T, Fut>(
    factory: impl Fn(&Controller) -> Fut + 'static,
) -> Executor<T>
where
    T: 'static,
    Fut: Future<Output = Result<T, CoreError>> + 'static,
{
    derive_async((), move |(), controller| factory(controller))
}

/// Declares an executor whose value depends on `deps`, produced synchronously.
pub fn derive<D, T>(
    deps: D,
    factory: impl Fn(D::Output, &Controller) -> Result<T, CoreError> + 'static,
) -> Executor<T>
where
    D: Dependencies,
    T: 'static,
{
    let shape = deps.shape();
    let resolve_deps = erase_deps_resolver(deps);
    let erased: Box<dyn ErasedFactory<T>> = Box::new(SyncFactory {
        f: factory,
        _marker: PhantomData,
    });
    Executor {
        inner: Rc::new(ExecutorInner {
            factory: erased,
            resolve_deps,
            tags: Vec::new(),
            analysis: Analysis::new(false, shape),
            label: RefCell::new(None),
        }),
    }
}

/// Declares an executor whose value depends on `deps`, produced asynchronously.
pub fn derive_async<D, T, Fut>(
    deps: D,
    factory: impl Fn(D::Output, &Controller) -> Fut + 'static,
) -> Executor<T>
where
    D: Dependencies,
    T: 'static,
    Fut: Future<Output = Result<T, CoreError>> + 'static,
{
    let shape = deps.shape();
    let resolve_deps = erase_deps_resolver(deps);
    let erased: Box<dyn ErasedFactory<T>> = Box::new(AsyncFactory {
        f: factory,
        _marker: PhantomData,
    });
    Executor {
        inner: Rc::new(ExecutorInner {
            factory: erased,
            resolve_deps,
            tags: Vec::new(),
            analysis: Analysis::new(true, shape),
            label: RefCell::new(None),
        }),
    }
}

enum PresetValue<T: 'static> {
    Value(Rc<T>),
    Executor(Executor<T>),
}

/// A scope-time substitution for `target`, as `preset(executor, value)` or
/// `preset(executor, replacementExecutor)` (spec §3).
pub struct Preset<T: 'static> {
    target: ExecutorKey,
    replacement: PresetValue<T>,
}

/// Overrides `executor`'s value with a fixed `value` for the lifetime of the
/// scope the preset is registered on.
pub fn preset<T: 'static>(executor: &Executor<T>, value: T) -> Preset<T> {
    Preset {
        target: executor.key(),
        replacement: PresetValue::Value(Rc::new(value)),
    }
}

/// Overrides `executor` so it resolves through `replacement` instead, for the
/// lifetime of the scope the preset is registered on.
pub fn preset_with<T: 'static>(executor: &Executor<T>, replacement: Executor<T>) -> Preset<T> {
    Preset {
        target: executor.key(),
        replacement: PresetValue::Executor(replacement),
    }
}

/// Type-erased preset installation, so a scope can hold `Vec<Box<dyn
/// ErasedPreset>>` across differing `T`.
pub(crate) trait ErasedPreset {
    fn target(&self) -> ExecutorKey;
    fn install(self: Box<Self>, scope: &crate::scope::Scope);
}

impl<T: 'static> ErasedPreset for Preset<T> {
    fn target(&self) -> ExecutorKey {
        self.target
    }

    fn install(self: Box<Self>, scope: &crate::scope::Scope) {
        match self.replacement {
            PresetValue::Value(value) => scope.seed_preset_value(self.target, value),
            PresetValue::Executor(executor) => {
                scope.seed_preset_executor(self.target, executor)
            }
        }
    }
}

impl<T: 'static> Preset<T> {
    pub(crate) fn into_erased(self) -> Box<dyn ErasedPreset> {
        Box::new(self)
    }
}
