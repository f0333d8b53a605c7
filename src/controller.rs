//! The `Controller` handed to every factory (spec §4.3): the interface a
//! factory uses to register cleanup, and to request release/reload of its own
//! cached value. Grounded on `leptos_reactive::scope`'s `on_cleanup` /
//! disposer pattern (`examples/leptos-rs-leptos/leptos_reactive/src/scope.rs`),
//! narrowed to the per-accessor (rather than per-scope) granularity spec.md
//! describes.

use std::cell::RefCell;
use std::rc::Rc;

use crate::node::NodeId;
use crate::scope::Scope;

/// Passed by reference to every factory invocation. Cheap to clone (`Rc`
/// internals); factories that move it into an async block do so routinely.
#[derive(Clone)]
pub struct Controller {
    pub(crate) scope: Scope,
    pub(crate) node: NodeId,
    pub(crate) cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>>,
}

impl Controller {
    pub(crate) fn new(scope: Scope, node: NodeId, cleanups: Rc<RefCell<Vec<Box<dyn FnOnce()>>>>) -> Self {
        Controller {
            scope,
            node,
            cleanups,
        }
    }

    /// Registers a cleanup callback, run LIFO when this accessor is released
    /// or its scope disposed.
    pub fn cleanup(&self, f: impl FnOnce() + 'static) {
        self.cleanups.borrow_mut().push(Box::new(f));
    }

    /// Requests that this accessor's cached value be released (cleanups run,
    /// next access re-resolves from scratch).
    pub fn release(&self) {
        self.scope.release_node(self.node);
    }

    /// Requests that this accessor's cached value be released and immediately
    /// re-resolved, notifying subscribers of the new value.
    pub fn reload(&self) {
        self.scope.reload_node(self.node);
    }

    /// The scope this factory is executing within.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}
