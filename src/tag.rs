//! Tag & schema substrate, tag-store half (spec §4.2): typed, keyed values
//! attachable to any container implementing a minimal [`Store`] contract.
//! Hierarchical lookup (own store -> scope -> parent context chain) is
//! implemented here as a plain chain walk over `&dyn Store` references —
//! the explicit alternative DESIGN NOTES calls for in place of prototype-chain
//! walking.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::CoreError;
use crate::schema::{validate, Schema};

/// A tag's private key. Unique per [`tag`] call, the closest stand-in Rust
/// has for the JS `Symbol` spec.md describes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagKey(u64);

impl fmt::Debug for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagKey({})", self.0)
    }
}

static NEXT_TAG_KEY: AtomicU64 = AtomicU64::new(1);

fn next_tag_key() -> TagKey {
    TagKey(NEXT_TAG_KEY.fetch_add(1, Ordering::Relaxed))
}

/// Anything that can hold keyed typed values: `get`/`set` over a type-erased
/// key. Scopes and execution contexts each embed one; a raw [`TagStore`] can
/// also be used standalone.
pub trait Store {
    fn get_raw(&self, key: TagKey) -> Option<Rc<dyn Any>>;
    fn set_raw(&self, key: TagKey, value: Rc<dyn Any>);
}

/// The concrete leaf store implementation. `Scope` and `ExecutionContext`
/// each own one of these for their own values; hierarchical lookup then
/// chains several `&dyn Store`s together.
#[derive(Default)]
pub struct TagStore {
    values: RefCell<FxHashMap<TagKey, Rc<dyn Any>>>,
}

impl TagStore {
    pub fn new() -> Self {
        TagStore::default()
    }
}

impl Store for TagStore {
    fn get_raw(&self, key: TagKey) -> Option<Rc<dyn Any>> {
        self.values.borrow().get(&key).cloned()
    }

    fn set_raw(&self, key: TagKey, value: Rc<dyn Any>) {
        self.values.borrow_mut().insert(key, value);
    }
}

/// Metadata attached to an executor at declaration time: a tag paired with
/// the value it carries, type-erased so a `Vec<TaggedValue>` can hold tags of
/// differing `T`.
#[derive(Clone)]
pub struct TaggedValue {
    pub key: TagKey,
    pub label: &'static str,
    pub(crate) value: Rc<dyn Any>,
}

/// A keyed typed value factory: `tag(schema, {label, default?})` in spec.md's
/// vocabulary. Cloning a `Tag` is cheap and yields a handle to the same
/// underlying key.
pub struct Tag<T: 'static> {
    key: TagKey,
    label: &'static str,
    schema: Rc<dyn Schema<T>>,
    default: Option<Rc<dyn Fn() -> T>>,
}

impl<T: 'static> Clone for Tag<T> {
    fn clone(&self) -> Self {
        Tag {
            key: self.key,
            label: self.label,
            schema: self.schema.clone(),
            default: self.default.clone(),
        }
    }
}

impl<T: Clone + 'static> Tag<T> {
    /// Creates a fresh tag with a unique key, as `tag(schema, { label })`.
    pub fn new(schema: impl Schema<T> + 'static, label: &'static str) -> Self {
        Tag {
            key: next_tag_key(),
            label,
            schema: Rc::new(schema),
            default: None,
        }
    }

    /// Attaches a default value producer, as `tag(schema, { label, default })`.
    pub fn with_default(mut self, default: impl Fn() -> T + 'static) -> Self {
        self.default = Some(Rc::new(default));
        self
    }

    pub fn key(&self) -> TagKey {
        self.key
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Produces a [`TaggedValue`] pairing this tag with `value`, for
    /// attaching as executor/flow declaration metadata.
    pub fn value(&self, value: T) -> TaggedValue {
        TaggedValue {
            key: self.key,
            label: self.label,
            value: Rc::new(value),
        }
    }

    /// Writes `value` to the leaf store only — setters never reach through
    /// to parent stores.
    pub fn write_to_store(&self, store: &dyn Store, value: T) {
        store.set_raw(self.key, Rc::new(value));
    }

    /// Looks the tag up in a single store (no chain walk), validating the
    /// stored value against the tag's schema. Returns the default (if any)
    /// when nothing is stored.
    pub fn read_from(&self, store: &dyn Store) -> Result<Option<T>, CoreError> {
        match store.get_raw(self.key) {
            Some(raw) => {
                let value = downcast_clone::<T>(&raw);
                Ok(Some(validate(self.schema.as_ref(), value)?))
            }
            None => Ok(self.default.as_ref().map(|f| f())),
        }
    }

    /// Looks the tag up in a single store, failing [`CoreError::TagMissing`]
    /// if nothing was found and no default exists.
    pub fn extract_from(&self, store: &dyn Store) -> Result<T, CoreError> {
        self.read_from(store)?.ok_or(CoreError::TagMissing {
            label: self.label,
            path: Vec::new(),
        })
    }

    /// Hierarchical lookup across an ordered chain of stores (own store
    /// first, outward from there), returning the first hit. Used by
    /// [`crate::context::ExecutionContext::find`]/`get` to walk
    /// context -> scope -> parent context chain.
    pub fn read_chain(&self, chain: &[&dyn Store]) -> Result<Option<T>, CoreError> {
        for store in chain {
            if let Some(raw) = store.get_raw(self.key) {
                let value = downcast_clone::<T>(&raw);
                return Ok(Some(validate(self.schema.as_ref(), value)?));
            }
        }
        Ok(self.default.as_ref().map(|f| f()))
    }

    /// Hierarchical lookup that fails [`CoreError::TagMissing`] if no store
    /// in the chain has a value and no default exists.
    pub fn extract_chain(&self, chain: &[&dyn Store]) -> Result<T, CoreError> {
        self.read_chain(chain)?.ok_or(CoreError::TagMissing {
            label: self.label,
            path: Vec::new(),
        })
    }
}

fn downcast_clone<T: Clone + 'static>(raw: &Rc<dyn Any>) -> T {
    raw.downcast_ref::<T>()
        .expect("tag value stored under its own key must downcast to its own type")
        .clone()
}

/// Mints a tag, the free-function form of [`Tag::new`] matching spec.md's
/// `tag(schema, { label, default? })` signature.
pub fn tag<T: Clone + 'static>(schema: impl Schema<T> + 'static, label: &'static str) -> Tag<T> {
    Tag::new(schema, label)
}
