//! Callback registries and continuation types.
//!
//! Registrations are keyed by a library-wide monotonic id so a single
//! `remove_callback` works no matter which registry holds the entry.
//! Firing always snapshots the keys first: removals and additions made by a
//! running callback take effect on the next firing pass.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::namespace::{Namespace, NodeId};
use crate::state::{NamespaceObject, NamespaceState, NamespaceValidateState};

/// Library-wide unique callback registration id.
pub type CallbackId = u64;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the next callback id; safe to call from any thread.
pub fn next_callback_id() -> CallbackId {
    NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Fired on every state change of a node or its descendants.
pub type OnStateChangedFn = dyn FnMut(&mut Namespace, NodeId, NodeId, NamespaceState);
/// Fired on every validate-state change of a node or its descendants.
pub type OnValidateStateChangedFn = dyn FnMut(&mut Namespace, NodeId, NodeId, NamespaceValidateState);
/// Asked whether a local producer will supply the needed object.
pub type OnObjectNeededFn = dyn FnMut(&mut Namespace, NodeId, NodeId) -> bool;
/// Asked to interpret arriving content bytes for a descendant node.
pub type OnDeserializeNeededFn =
    dyn FnMut(&mut Namespace, NodeId, &[u8], &mut Option<DeserializeDone>) -> bool;
/// One-shot continuation run after a deserialized object is attached.
pub type OnObjectSet = Box<dyn FnOnce(&mut Namespace, NodeId)>;

/// Obligation token handed to `OnDeserializeNeeded` callbacks.
///
/// The callback that accepts responsibility takes the token and must
/// eventually call [`DeserializeDone::finish`] with the constructed object.
pub struct DeserializeDone {
    node: NodeId,
    on_object_set: Option<OnObjectSet>,
}

impl DeserializeDone {
    pub(crate) fn new(node: NodeId, on_object_set: Option<OnObjectSet>) -> Self {
        Self {
            node,
            on_object_set,
        }
    }

    /// The node whose content is being deserialized.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Attaches the constructed object and runs the completion chain.
    pub fn finish(self, namespace: &mut Namespace, object: NamespaceObject) {
        namespace.finish_deserialize(self.node, object, self.on_object_set);
    }
}

/// One keyed registry of shared callbacks.
pub(crate) struct CallbackRegistry<F: ?Sized> {
    entries: BTreeMap<CallbackId, Rc<RefCell<F>>>,
}

impl<F: ?Sized> Default for CallbackRegistry<F> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<F: ?Sized> CallbackRegistry<F> {
    pub fn add(&mut self, callback: Rc<RefCell<F>>) -> CallbackId {
        let id = next_callback_id();
        self.entries.insert(id, callback);
        id
    }

    pub fn remove(&mut self, id: CallbackId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Clones the current entries for a firing pass.
    pub fn snapshot(&self) -> Vec<(CallbackId, Rc<RefCell<F>>)> {
        self.entries
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{next_callback_id, CallbackRegistry};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = next_callback_id();
        let b = next_callback_id();
        assert!(b > a);
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let mut registry: CallbackRegistry<dyn FnMut() -> u32> = CallbackRegistry::default();
        let id_a = registry.add(Rc::new(RefCell::new(|| 1_u32)));
        let id_b = registry.add(Rc::new(RefCell::new(|| 2_u32)));

        let snapshot = registry.snapshot();
        assert!(registry.remove(id_a));
        assert_eq!(snapshot.len(), 2);
        assert!(!registry.contains(id_a));
        assert!(registry.contains(id_b));
    }
}
