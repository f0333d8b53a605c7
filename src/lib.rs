//! A dependency-injection runtime with a schema-validated flow orchestrator
//! and a pluggable extension pipeline.
//!
//! The whole runtime is single-threaded and cooperative: nothing here is
//! `Send` or `Sync`, values are shared with `Rc`/`RefCell`, and concurrency
//! within one scope is expressed as logically-concurrent futures driven by a
//! local executor, never OS threads.
//!
//! ```
//! use scopeflow::{derive, provide, Scope};
//!
//! # fn main() {
//! let scope = Scope::new();
//! let greeting = provide(|_| Ok("hello".to_string())).named("greeting");
//! let shout = derive(greeting.clone(), |g, _| Ok(g.to_uppercase())).named("shout");
//! let accessor = scope.resolve(&shout).unwrap();
//! let _ = accessor;
//! # }
//! ```

mod accessor;
mod context;
mod controller;
mod dependencies;
mod error;
mod executor;
mod extension;
mod flow;
mod node;
mod schema;
mod scope;
mod tag;

pub use accessor::{Accessor, AccessorSnapshot, Unsubscribe};
pub use context::{CloseMode, ExecutionContext, ParallelSettledStats};
pub use controller::Controller;
pub use dependencies::{Dependencies, DependencyShapeDescriptor, Labeled, LabeledValues};
pub use error::{CoreError, ResolutionPath, ValidationIssue};
pub use executor::{
    derive, derive_async, preset, preset_with, provide, provide_async, Analysis, Executor,
    ExecutorKey, Preset, SkipReason,
};
pub use extension::{
    ContextLifecycleOperation, Extension, ExecutionMode, ExecutionOperation, LifecyclePhase,
    ResolveOperation,
};
pub use flow::{flow, FlowDefinition};
pub use node::NodeId;
pub use schema::{any, custom, validate, CustomSchema, Promised, Schema, Validated};
pub use scope::Scope;
pub use tag::{tag, Store, Tag, TagKey, TagStore, TaggedValue};
