//! Explicit, statically typed dependency shapes for `derive()` (spec §3,
//! §4.3). Rust has no runtime access to a factory's source, so — per the
//! DESIGN NOTES' own guidance — the shape is declared up front through the
//! constructor arity used (`derive1`, the tuple forms, `derive_labeled`)
//! rather than discovered by reflection. The tuple forms are generated by
//! macro, the same idiom `next_tuple` (`examples/leptos-rs-leptos/next_tuple`)
//! uses elsewhere in the teacher's own workspace for variadic arity.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::error::CoreError;
use crate::executor::{Executor, ExecutorKey};
use crate::scope::Scope;

/// Static description of an executor's dependency shape, recorded on
/// [`crate::executor::Analysis`] for introspection.
#[derive(Debug, Clone)]
pub enum DependencyShapeDescriptor {
    None,
    Single(ExecutorKey),
    Seq(Vec<ExecutorKey>),
    Labeled(Vec<(&'static str, ExecutorKey)>),
}

/// A declared set of dependencies that can resolve itself against a scope.
/// Implemented for `()`, `Executor<D>`, tuples of executors (ordered
/// sequence), and [`Labeled`] (label -> executor mapping).
pub trait Dependencies: 'static {
    type Output: 'static;

    fn shape(&self) -> DependencyShapeDescriptor;

    fn resolve(&self, scope: Scope) -> Pin<Box<dyn Future<Output = Result<Self::Output, CoreError>>>>;
}

impl Dependencies for () {
    type Output = ();

    fn shape(&self) -> DependencyShapeDescriptor {
        DependencyShapeDescriptor::None
    }

    fn resolve(&self, _scope: Scope) -> Pin<Box<dyn Future<Output = Result<(), CoreError>>>> {
        Box::pin(async { Ok(()) })
    }
}

impl<D: 'static> Dependencies for Executor<D> {
    type Output = Rc<D>;

    fn shape(&self) -> DependencyShapeDescriptor {
        DependencyShapeDescriptor::Single(self.key())
    }

    fn resolve(&self, scope: Scope) -> Pin<Box<dyn Future<Output = Result<Rc<D>, CoreError>>>> {
        let executor = self.clone();
        Box::pin(async move { scope.resolve_rc(&executor).await })
    }
}

macro_rules! impl_dependencies_for_tuple {
    ($($idx:tt : $ty:ident),+) => {
        impl<$($ty: 'static),+> Dependencies for ($(Executor<$ty>,)+) {
            type Output = ($(Rc<$ty>,)+);

            fn shape(&self) -> DependencyShapeDescriptor {
                DependencyShapeDescriptor::Seq(vec![$(self.$idx.key()),+])
            }

            fn resolve(
                &self,
                scope: Scope,
            ) -> Pin<Box<dyn Future<Output = Result<Self::Output, CoreError>>>> {
                $(let $ty = self.$idx.clone();)+
                let scope = scope;
                Box::pin(async move {
                    Ok(($(scope.resolve_rc(&$ty).await?,)+))
                })
            }
        }
    };
}

impl_dependencies_for_tuple!(0: A, 1: B);
impl_dependencies_for_tuple!(0: A, 1: B, 2: C);
impl_dependencies_for_tuple!(0: A, 1: B, 2: C, 3: D);
impl_dependencies_for_tuple!(0: A, 1: B, 2: C, 3: D, 4: E);
impl_dependencies_for_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F);
impl_dependencies_for_tuple!(0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G);

/// Type-erased handle to a single labeled dependency, so [`Labeled`] can hold
/// executors of differing `T` in one `Vec`.
pub(crate) trait AnyExecutor {
    fn key(&self) -> ExecutorKey;
    fn resolve_any(
        &self,
        scope: Scope,
    ) -> Pin<Box<dyn Future<Output = Result<Rc<dyn Any>, CoreError>>>>;
}

impl<T: 'static> AnyExecutor for Executor<T> {
    fn key(&self) -> ExecutorKey {
        Executor::key(self)
    }

    fn resolve_any(
        &self,
        scope: Scope,
    ) -> Pin<Box<dyn Future<Output = Result<Rc<dyn Any>, CoreError>>>> {
        let executor = self.clone();
        Box::pin(async move {
            let value = scope.resolve_rc(&executor).await?;
            Ok(value as Rc<dyn Any>)
        })
    }
}

/// A mapping from label to executor, the `derive(deps, ...)` form where
/// `deps` is "a mapping from label to executor" (spec §3).
pub struct Labeled {
    entries: Vec<(&'static str, Rc<dyn AnyExecutor>)>,
}

impl Labeled {
    pub fn new() -> Self {
        Labeled { entries: Vec::new() }
    }

    pub fn with<T: 'static>(mut self, label: &'static str, executor: Executor<T>) -> Self {
        self.entries.push((label, Rc::new(executor)));
        self
    }
}

impl Default for Labeled {
    fn default() -> Self {
        Labeled::new()
    }
}

/// The resolved output of a [`Labeled`] dependency set: a label -> value map,
/// with a typed getter so the factory doesn't have to downcast by hand.
pub struct LabeledValues {
    values: Vec<(&'static str, Rc<dyn Any>)>,
}

impl LabeledValues {
    /// Retrieves and downcasts the value registered under `label`.
    ///
    /// # Panics
    /// Panics if `label` was not registered on the originating [`Labeled`] set
    /// or if `T` does not match the type the executor under that label
    /// produces — both are declaration-site programmer errors, not runtime
    /// conditions a caller should need to recover from.
    pub fn get<T: 'static>(&self, label: &str) -> Rc<T> {
        self.values
            .iter()
            .find(|(l, _)| *l == label)
            .unwrap_or_else(|| panic!("no labeled dependency registered under {label:?}"))
            .1
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("labeled dependency {label:?} has a different type than requested"))
    }
}

impl Dependencies for Labeled {
    type Output = LabeledValues;

    fn shape(&self) -> DependencyShapeDescriptor {
        DependencyShapeDescriptor::Labeled(
            self.entries.iter().map(|(l, e)| (*l, e.key())).collect(),
        )
    }

    fn resolve(&self, scope: Scope) -> Pin<Box<dyn Future<Output = Result<LabeledValues, CoreError>>>> {
        let entries = self.entries.clone();
        Box::pin(async move {
            let mut values = Vec::with_capacity(entries.len());
            for (label, executor) in entries {
                let value = executor.resolve_any(scope.clone()).await?;
                values.push((label, value));
            }
            Ok(LabeledValues { values })
        })
    }
}

impl Clone for Labeled {
    fn clone(&self) -> Self {
        Labeled {
            entries: self.entries.clone(),
        }
    }
}
