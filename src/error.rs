//! The error taxonomy (spec §7): one variant per failure kind, each carrying
//! enough context (message, cause, path) to be re-thrown, logged, or matched
//! on by an extension's `on_error` hook.

use std::fmt;

/// One issue produced by a failed [`crate::schema::Schema::validate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
    pub path: Vec<String>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// The resolution path recorded when an error is enriched as it propagates
/// back out through `Scope::resolve`. Each entry is the name of an executor
/// (or the label it was resolved under) on the path from the failing node
/// back to the original caller.
pub type ResolutionPath = Vec<String>;

/// The full error taxonomy. Every fallible operation in this crate returns
/// `Result<T, CoreError>` rather than panicking, with the single exception of
/// "use after scope disposal" style programmer errors that are documented as
/// panics on the offending function.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("schema validation failed: {}", issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    SchemaInvalid {
        issues: Vec<ValidationIssue>,
        path: ResolutionPath,
    },

    #[error("schema validate() returned a future; validate() must be synchronous")]
    SchemaAsyncUnsupported { path: ResolutionPath },

    #[error("required tag {label:?} was not found on this context/scope chain")]
    TagMissing {
        label: &'static str,
        path: ResolutionPath,
    },

    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    DependencyResolution {
        cycle: Vec<String>,
        path: ResolutionPath,
    },

    #[error("factory failed: {message}")]
    FactoryFailed {
        message: String,
        #[source]
        cause: Option<Box<CoreError>>,
        path: ResolutionPath,
    },

    #[error("{} cleanup(s) threw during release", causes.len())]
    ReleaseError {
        causes: Vec<CoreError>,
        path: ResolutionPath,
    },

    #[error("operation attempted on a disposed scope")]
    ScopeDisposed,

    #[error("operation attempted on a closing or closed context")]
    ContextClosed { context_id: u64 },

    #[error("aborted: {reason}")]
    Aborted { reason: String },

    #[error("extension {name:?} failed: {message}")]
    ExtensionError {
        name: String,
        message: String,
        #[source]
        cause: Option<Box<CoreError>>,
    },

    #[error("journal corrupted: {message}")]
    JournalError { message: String },
}

impl CoreError {
    /// Returns the resolution path recorded on this error, if the variant
    /// carries one.
    pub fn path(&self) -> Option<&[String]> {
        match self {
            CoreError::SchemaInvalid { path, .. }
            | CoreError::SchemaAsyncUnsupported { path }
            | CoreError::TagMissing { path, .. }
            | CoreError::DependencyResolution { path, .. }
            | CoreError::FactoryFailed { path, .. }
            | CoreError::ReleaseError { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Enriches the error's resolution path by pushing `segment` onto the
    /// front (the path reads caller-to-callee, so the newest frame added as
    /// an error propagates upward is prepended).
    pub fn enrich_path(mut self, segment: impl Into<String>) -> Self {
        let segment = segment.into();
        match &mut self {
            CoreError::SchemaInvalid { path, .. }
            | CoreError::SchemaAsyncUnsupported { path }
            | CoreError::TagMissing { path, .. }
            | CoreError::DependencyResolution { path, .. }
            | CoreError::FactoryFailed { path, .. }
            | CoreError::ReleaseError { path, .. } => path.insert(0, segment),
            _ => {}
        }
        self
    }

    pub fn factory_failed(message: impl Into<String>) -> Self {
        CoreError::FactoryFailed {
            message: message.into(),
            cause: None,
            path: Vec::new(),
        }
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        CoreError::Aborted {
            reason: reason.into(),
        }
    }
}
