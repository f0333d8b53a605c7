//! Per-scope arena of graph nodes: one slot per cached accessor, with
//! `subscribers`/`sources` edges for reactive invalidation. Grounded on
//! `leptos_reactive::node`/`runtime` (`NodeId` via `slotmap::new_key_type!`,
//! `FxIndexSet`-backed subscriber/source maps) — the same shape, narrowed to
//! what explicit (not read-tracked) reactive consumers need: an edge is
//! created only when a consumer resolves an executor's `.reactive` view, not
//! on every read.

use std::cell::RefCell;
use std::hash::BuildHasherDefault;

use indexmap::IndexSet;
use rustc_hash::FxHasher;
use slotmap::SecondaryMap;

slotmap::new_key_type! {
    /// Unique id assigned to one accessor's slot in a scope's arena.
    pub struct NodeId;
}

pub(crate) type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Tracks, per node, which other nodes reactively depend on it
/// (`subscribers`) and which other nodes it reactively depends on
/// (`sources`, the inverse edge, kept so a released node can unsubscribe
/// itself from everything it was listening to).
#[derive(Default)]
pub(crate) struct NodeGraph {
    subscribers: RefCell<SecondaryMap<NodeId, FxIndexSet<NodeId>>>,
    sources: RefCell<SecondaryMap<NodeId, FxIndexSet<NodeId>>>,
}

impl NodeGraph {
    /// Registers `consumer` as a reactive subscriber of `source`.
    pub fn subscribe(&self, source: NodeId, consumer: NodeId) {
        self.subscribers
            .borrow_mut()
            .entry(source)
            .unwrap()
            .or_default()
            .insert(consumer);
        self.sources
            .borrow_mut()
            .entry(consumer)
            .unwrap()
            .or_default()
            .insert(source);
    }

    /// Returns a snapshot of `source`'s current reactive subscribers.
    pub fn subscribers_of(&self, source: NodeId) -> Vec<NodeId> {
        self.subscribers
            .borrow()
            .get(source)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes `node` from the graph entirely: drops its subscriber list and
    /// unsubscribes it from everything it was a consumer of.
    pub fn remove(&self, node: NodeId) {
        let sources = self.sources.borrow_mut().remove(node);
        if let Some(sources) = sources {
            let mut subscribers = self.subscribers.borrow_mut();
            for source in sources.iter() {
                if let Some(subs) = subscribers.get_mut(*source) {
                    subs.remove(&node);
                }
            }
        }
        self.subscribers.borrow_mut().remove(node);
    }
}
