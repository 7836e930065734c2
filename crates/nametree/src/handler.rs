use crate::error::TreeError;
use crate::namespace::{Namespace, NodeId};

/// A processor that extends the behavior of a subtree.
///
/// Handlers are cheaply cloneable facades over shared state; attaching one
/// registers tree callbacks, detaching removes every registration it made.
/// A handler binds to exactly one node at a time.
pub trait Handler {
    /// The node this handler is bound to, if any.
    fn bound_node(&self) -> Option<NodeId>;

    /// Binds to `node` and registers the handler's tree callbacks.
    ///
    /// Fails if the handler is already bound elsewhere.
    fn attach(&mut self, namespace: &mut Namespace, node: NodeId) -> Result<(), TreeError>;

    /// Unbinds and removes every callback this handler registered.
    fn detach(&mut self, namespace: &mut Namespace);
}
