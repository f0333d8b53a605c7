//! The validation substrate (spec §4.1): a minimal, library-agnostic schema
//! contract plus a synchronous `validate` free function and a `Promised<T>`
//! helper for representing "eventual or immediate" values uniformly across
//! the extension pipeline.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::{CoreError, ValidationIssue};

/// What a [`Schema::validate`] call found.
pub enum Validated<T> {
    Value(T),
    Issues(Vec<ValidationIssue>),
}

/// A vendor-neutral schema contract. Any validation library can be adapted to
/// this trait with a small wrapper; the core never depends on a specific
/// schema crate.
pub trait Schema<T> {
    /// The schema vendor's name (e.g. `"custom"`, or whatever an adapter
    /// reports for the library it wraps).
    fn vendor(&self) -> &'static str;

    /// The vendor's schema format version, for diagnostics only.
    fn version(&self) -> &'static str {
        "1"
    }

    /// Validates `data` and returns either the validated value or a
    /// non-empty issue list. This method **must not** be implemented in terms
    /// of an async validator; schemas that only validate asynchronously
    /// should report that by having `validate` always return
    /// [`Validated::Issues`] and documenting the limitation, since this
    /// crate's `validate()` free function has no way to await a result.
    fn validate(&self, data: T) -> Validated<T>;
}

/// Runs `schema.validate(data)` and converts the outcome into a `Result`,
/// aggregating issues into a single [`CoreError::SchemaInvalid`].
///
/// This is the one synchronous validation boundary spec §4.1 requires: there
/// is deliberately no async variant. A schema that needs to validate
/// asynchronously is a contract violation the core cannot support; such a
/// schema should be wrapped so it reports [`CoreError::SchemaAsyncUnsupported`]
/// itself rather than ever reaching here with a pending result.
pub fn validate<T, S: Schema<T> + ?Sized>(schema: &S, data: T) -> Result<T, CoreError> {
    match schema.validate(data) {
        Validated::Value(value) => Ok(value),
        Validated::Issues(issues) => Err(CoreError::SchemaInvalid {
            issues,
            path: Vec::new(),
        }),
    }
}

/// A schema with a caller-supplied validation closure, for ad hoc schemas
/// that don't warrant a dedicated type. Passing `None` produces a schema that
/// accepts anything, useful as the `custom::<T>(None)` "any" schema used by
/// flows/tags that opt out of validation.
pub struct CustomSchema<T> {
    validator: Option<Box<dyn Fn(&T) -> Vec<ValidationIssue>>>,
}

impl<T> CustomSchema<T> {
    pub fn new(validator: impl Fn(&T) -> Vec<ValidationIssue> + 'static) -> Self {
        CustomSchema {
            validator: Some(Box::new(validator)),
        }
    }

    pub fn any() -> Self {
        CustomSchema { validator: None }
    }
}

impl<T> Schema<T> for CustomSchema<T> {
    fn vendor(&self) -> &'static str {
        "custom"
    }

    fn validate(&self, data: T) -> Validated<T> {
        match &self.validator {
            None => Validated::Value(data),
            Some(validator) => {
                let issues = validator(&data);
                if issues.is_empty() {
                    Validated::Value(data)
                } else {
                    Validated::Issues(issues)
                }
            }
        }
    }
}

/// Mints a schema with no external validation library. `validator` receives
/// a shared reference to the candidate value and returns the issues found
/// (empty means valid).
pub fn custom<T>(validator: impl Fn(&T) -> Vec<ValidationIssue> + 'static) -> CustomSchema<T> {
    CustomSchema::new(validator)
}

/// A schema that accepts any value of `T` unconditionally — the default used
/// by flows and tags that don't specify one.
pub fn any<T>() -> CustomSchema<T> {
    CustomSchema::any()
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Represents an "eventual or immediate" value uniformly, the way the
/// extension pipeline needs to treat a factory/handler result whether or not
/// it happened to be async. Not `Send`: this runtime is single-threaded
/// cooperative (spec §5).
pub struct Promised<'a, T> {
    inner: PromisedInner<'a, T>,
}

enum PromisedInner<'a, T> {
    Ready(Result<T, CoreError>),
    Pending(BoxFuture<'a, Result<T, CoreError>>),
}

impl<'a, T: 'a> Promised<'a, T> {
    /// Wraps an already-available result.
    pub fn ready(value: Result<T, CoreError>) -> Self {
        Promised {
            inner: PromisedInner::Ready(value),
        }
    }

    /// Wraps a future that will eventually produce a result.
    pub fn pending(fut: impl Future<Output = Result<T, CoreError>> + 'a) -> Self {
        Promised {
            inner: PromisedInner::Pending(Box::pin(fut)),
        }
    }

    /// Runs `f` and converts its outcome into a `Promised`, the `try`-style
    /// constructor named for the JS `Promised.try` idiom spec.md borrows
    /// its vocabulary from.
    pub fn try_sync(f: impl FnOnce() -> Result<T, CoreError>) -> Self {
        Promised::ready(f())
    }

    /// Awaits to a plain value or error — the boundary where a `Promised` is
    /// collapsed back into a concrete `Result`, as spec.md §4.1 describes.
    pub async fn resolve(self) -> Result<T, CoreError> {
        match self.inner {
            PromisedInner::Ready(value) => value,
            PromisedInner::Pending(fut) => fut.await,
        }
    }

    /// Transforms the eventual value, preserving sync/async shape.
    pub fn map<U: 'a>(self, f: impl FnOnce(T) -> U + 'a) -> Promised<'a, U> {
        match self.inner {
            PromisedInner::Ready(value) => Promised::ready(value.map(f)),
            PromisedInner::Pending(fut) => {
                Promised::pending(async move { fut.await.map(f) })
            }
        }
    }

    /// Transforms the eventual error, preserving sync/async shape.
    pub fn map_error(self, f: impl FnOnce(CoreError) -> CoreError + 'a) -> Promised<'a, T> {
        match self.inner {
            PromisedInner::Ready(value) => Promised::ready(value.map_err(f)),
            PromisedInner::Pending(fut) => {
                Promised::pending(async move { fut.await.map_err(f) })
            }
        }
    }
}

impl<'a, T> fmt::Debug for Promised<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            PromisedInner::Ready(_) => f.write_str("Promised::Ready(..)"),
            PromisedInner::Pending(_) => f.write_str("Promised::Pending(..)"),
        }
    }
}
