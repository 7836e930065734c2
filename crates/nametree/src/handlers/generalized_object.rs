//! `_meta`-coordinated generalized objects: small payloads ride inline in
//! the `ContentMetaInfo`, large ones fan out into manifest-backed segments.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use nametree_codec::ContentMetaInfo;
use nametree_core::conventions::{
    manifest_component, meta_component, DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH,
};
use nametree_core::NameComponent;

use crate::callbacks::CallbackId;
use crate::error::TreeError;
use crate::handler::Handler;
use crate::handlers::segment_stream::SegmentStreamHandler;
use crate::handlers::segmented_object::SegmentedObjectHandler;
use crate::namespace::{Namespace, NodeId};
use crate::state::{NamespaceObject, NamespaceState};

type OnGeneralizedObjectFn = dyn FnMut(&mut Namespace, ContentMetaInfo, NodeId);

struct GeneralizedObjectState {
    node: Option<NodeId>,
    n_components_after_object_namespace: usize,
    max_segment_payload_length: usize,
    on_generalized_object: Option<Box<OnGeneralizedObjectFn>>,
    segmented: Option<SegmentedObjectHandler>,
    object_needed_hook: Option<(NodeId, CallbackId)>,
    registered: Vec<(NodeId, CallbackId)>,
    meta_requested: bool,
}

/// Consumer and producer of a generalized object: `_meta` describes the
/// payload, which is either inline (`other`) or segmented with an optional
/// `_manifest`.
#[derive(Clone)]
pub struct GeneralizedObjectHandler {
    inner: Rc<RefCell<GeneralizedObjectState>>,
}

impl Default for GeneralizedObjectHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneralizedObjectHandler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(GeneralizedObjectState {
                node: None,
                n_components_after_object_namespace: 0,
                max_segment_payload_length: DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH,
                on_generalized_object: None,
                segmented: None,
                object_needed_hook: None,
                registered: Vec::new(),
                meta_requested: false,
            })),
        }
    }

    /// Creates a handler that reports completed objects to `callback`.
    pub fn with_callback(
        callback: impl FnMut(&mut Namespace, ContentMetaInfo, NodeId) + 'static,
    ) -> Self {
        let handler = Self::new();
        handler.inner.borrow_mut().on_generalized_object = Some(Box::new(callback));
        handler
    }

    /// Number of name components between the handler's node and the object
    /// namespace (for example a version component). With a nonzero value the
    /// handler cannot predict the object name, so it never requests `_meta`
    /// speculatively; the caller issues the outer request instead.
    pub fn set_n_components_after_object_namespace(&self, count: usize) -> Result<(), TreeError> {
        if self.inner.borrow().node.is_some() {
            return Err(TreeError::InvalidConfiguration(
                "component count must be set before attaching",
            ));
        }
        self.inner.borrow_mut().n_components_after_object_namespace = count;
        Ok(())
    }

    pub fn n_components_after_object_namespace(&self) -> usize {
        self.inner.borrow().n_components_after_object_namespace
    }

    /// Threshold above which a produced object is segmented.
    pub fn set_max_segment_payload_length(&self, length: usize) -> Result<(), TreeError> {
        if length < 1 {
            return Err(TreeError::InvalidConfiguration(
                "max segment payload length must be at least 1",
            ));
        }
        self.inner.borrow_mut().max_segment_payload_length = length;
        Ok(())
    }

    pub fn max_segment_payload_length(&self) -> usize {
        self.inner.borrow().max_segment_payload_length
    }

    /// Publishes `content` at `node` as a generalized object.
    ///
    /// Builds and signs the `_meta` packet; a payload larger than the
    /// segment threshold is delegated to manifest-backed segmentation. The
    /// blob becomes the node's object without a packet at the node's own
    /// name.
    pub fn set_object(
        &self,
        namespace: &mut Namespace,
        node: NodeId,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), TreeError> {
        let max_payload = self.inner.borrow().max_segment_payload_length;
        let has_segments = content.len() > max_payload;

        let meta = ContentMetaInfo {
            content_type: content_type.to_string(),
            timestamp: namespace.now(node),
            has_segments,
            other: if has_segments {
                Vec::new()
            } else {
                content.to_vec()
            },
        };
        let meta_node = namespace.get_child(node, meta_component());
        namespace.serialize_object(meta_node, NamespaceObject::ContentMeta(meta))?;

        if has_segments {
            let stream = SegmentStreamHandler::new();
            stream.set_max_segment_payload_length(max_payload)?;
            stream.set_object(namespace, node, content, true)?;
        }

        namespace.set_object(node, NamespaceObject::Blob(content.to_vec()));
        Ok(())
    }
}

impl Handler for GeneralizedObjectHandler {
    fn bound_node(&self) -> Option<NodeId> {
        self.inner.borrow().node
    }

    fn attach(&mut self, namespace: &mut Namespace, node: NodeId) -> Result<(), TreeError> {
        {
            let mut state = self.inner.borrow_mut();
            if state.node.is_some() {
                return Err(TreeError::HandlerAlreadyAttached);
            }
            state.node = Some(node);
        }

        let hook = self.inner.clone();
        let needed_id = namespace.add_on_object_needed(node, move |ns, _subscriber, needed| {
            GeneralizedObjectState::handle_object_needed(&hook, ns, needed)
        });
        let hook = self.inner.clone();
        let deserialize_id =
            namespace.add_on_deserialize_needed(node, move |ns, target, blob, done| {
                GeneralizedObjectState::handle_deserialize_needed(&hook, ns, target, blob, done)
            });
        let hook = self.inner.clone();
        let state_id =
            namespace.add_on_state_changed(node, move |ns, _subscriber, changed, state| {
                GeneralizedObjectState::handle_state_changed(&hook, ns, changed, state);
            });

        let mut state = self.inner.borrow_mut();
        state.object_needed_hook = Some((node, needed_id));
        state.registered.push((node, needed_id));
        state.registered.push((node, deserialize_id));
        state.registered.push((node, state_id));
        Ok(())
    }

    fn detach(&mut self, namespace: &mut Namespace) {
        let (registered, segmented) = {
            let mut state = self.inner.borrow_mut();
            state.node = None;
            state.object_needed_hook = None;
            (
                std::mem::take(&mut state.registered),
                state.segmented.take(),
            )
        };
        for (node, id) in registered {
            namespace.remove_callback(node, id);
        }
        if let Some(mut segmented) = segmented {
            segmented.detach(namespace);
        }
    }
}

impl GeneralizedObjectState {
    /// One-shot consumer entry: request `_meta` below the attached node,
    /// then drop the hook so repeats do not re-trigger.
    fn handle_object_needed(
        inner: &Rc<RefCell<GeneralizedObjectState>>,
        namespace: &mut Namespace,
        needed: NodeId,
    ) -> bool {
        let (node, extra) = {
            let state = inner.borrow();
            (state.node, state.n_components_after_object_namespace)
        };
        let Some(node) = node else { return false };
        if needed != node {
            return false;
        }
        if extra > 0 {
            // The object name is unknown until a packet arrives; the outer
            // request travels to the network unchanged.
            return false;
        }

        let hook = inner.borrow_mut().object_needed_hook.take();
        if let Some((hook_node, id)) = hook {
            namespace.remove_callback(hook_node, id);
        }
        inner.borrow_mut().meta_requested = true;

        let meta_node = namespace.get_child(node, meta_component());
        if let Err(error) = namespace.object_needed(meta_node, false) {
            debug!(%error, "cannot request _meta");
        }
        true
    }

    /// Decodes `_meta` at the expected depth and drives the rest of the
    /// object: inline `other` bytes, or segments plus `_manifest`.
    fn handle_deserialize_needed(
        inner: &Rc<RefCell<GeneralizedObjectState>>,
        namespace: &mut Namespace,
        target: NodeId,
        blob: &[u8],
        done: &mut Option<crate::callbacks::DeserializeDone>,
    ) -> bool {
        let (node, extra) = {
            let state = inner.borrow();
            (state.node, state.n_components_after_object_namespace)
        };
        let Some(node) = node else { return false };

        let node_len = namespace.name(node).len();
        let target_name = namespace.name(target).clone();
        if target_name.len() != node_len + extra + 1
            || target_name.last() != Some(&meta_component())
        {
            return false;
        }

        let meta = match ContentMetaInfo::decode(blob) {
            Ok(meta) => meta,
            Err(error) => {
                warn!(%error, "cannot decode _meta content");
                return false;
            }
        };

        let object_name = target_name.prefix(target_name.len() - 1);
        let object_node = match namespace.get_descendant(node, &object_name) {
            Ok(found) => found,
            Err(_) => return false,
        };
        let Some(done) = done.take() else { return false };

        done.finish(namespace, NamespaceObject::ContentMeta(meta.clone()));

        if meta.has_segments {
            if inner.borrow().segmented.is_some() {
                // A repeated _meta answer; reassembly is already running.
                return true;
            }
            let segmented = SegmentedObjectHandler::new();
            let hook = inner.clone();
            let reported_meta = meta.clone();
            segmented.add_on_segmented_object(move |ns, finished_node| {
                GeneralizedObjectState::fire_generalized_object(
                    &hook,
                    ns,
                    reported_meta.clone(),
                    finished_node,
                );
            });
            let mut hooks = segmented.clone();
            if let Err(error) = hooks.attach(namespace, object_node) {
                warn!(%error, "cannot attach segment reassembly");
                return true;
            }
            inner.borrow_mut().segmented = Some(segmented);

            // Request segment 0 directly so the node-level hook does not
            // re-request _meta, then fetch the manifest.
            let first_segment = namespace.get_child(object_node, NameComponent::from_segment(0));
            if let Err(error) = namespace.object_needed(first_segment, false) {
                debug!(%error, "cannot request first segment");
            }
            let manifest_node = namespace.get_child(object_node, manifest_component());
            if let Err(error) = namespace.object_needed(manifest_node, false) {
                debug!(%error, "cannot request _manifest");
            }
        } else {
            let hook = inner.clone();
            let reported_meta = meta.clone();
            namespace.deserialize(
                object_node,
                meta.other.clone(),
                Some(Box::new(move |ns, set_node| {
                    GeneralizedObjectState::fire_generalized_object(
                        &hook,
                        ns,
                        reported_meta,
                        set_node,
                    );
                })),
            );
        }
        true
    }

    /// A segment or `_manifest` that shows up before `_meta` was requested
    /// reveals the object name; fetch the sibling `_meta` lazily.
    fn handle_state_changed(
        inner: &Rc<RefCell<GeneralizedObjectState>>,
        namespace: &mut Namespace,
        changed: NodeId,
        new_state: NamespaceState,
    ) {
        if new_state != NamespaceState::DataReceived {
            return;
        }
        let (node, extra, meta_requested) = {
            let state = inner.borrow();
            (
                state.node,
                state.n_components_after_object_namespace,
                state.meta_requested,
            )
        };
        let Some(node) = node else { return };
        if meta_requested {
            return;
        }

        let node_len = namespace.name(node).len();
        let changed_name = namespace.name(changed).clone();
        if changed_name.len() != node_len + extra + 1 {
            return;
        }
        let Some(last) = changed_name.last() else { return };
        if !last.is_segment() && *last != manifest_component() {
            return;
        }

        inner.borrow_mut().meta_requested = true;
        let object_name = changed_name.prefix(changed_name.len() - 1);
        let object_node = match namespace.get_descendant(node, &object_name) {
            Ok(found) => found,
            Err(_) => return,
        };
        let meta_node = namespace.get_child(object_node, meta_component());
        if let Err(error) = namespace.object_needed(meta_node, false) {
            debug!(%error, "cannot request late _meta");
        }
    }

    fn fire_generalized_object(
        inner: &Rc<RefCell<GeneralizedObjectState>>,
        namespace: &mut Namespace,
        meta: ContentMetaInfo,
        object_node: NodeId,
    ) {
        let callback = inner.borrow_mut().on_generalized_object.take();
        if let Some(mut callback) = callback {
            callback(namespace, meta, object_node);
            let mut state = inner.borrow_mut();
            if state.on_generalized_object.is_none() {
                state.on_generalized_object = Some(callback);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GeneralizedObjectHandler;
    use crate::namespace::Namespace;
    use nametree_core::conventions::{manifest_component, meta_component};
    use nametree_core::{Name, NameComponent};
    use nametree_crypto::Ed25519KeyChain;
    use std::rc::Rc;

    fn producer_tree() -> (Namespace, crate::namespace::NodeId) {
        let mut ns = Namespace::new(Name::parse("/x"));
        let root = ns.root();
        ns.set_key_chain(
            root,
            Rc::new(Ed25519KeyChain::from_secret([4_u8; 32], Name::parse("/keys/p"))),
        );
        (ns, root)
    }

    #[test]
    fn small_object_rides_inline_in_meta() {
        let (mut ns, root) = producer_tree();
        let handler = GeneralizedObjectHandler::new();

        handler
            .set_object(&mut ns, root, b"tiny", "text/plain")
            .expect("publishes");

        let meta_node = ns.find_child(root, &meta_component()).expect("meta exists");
        let meta = ns
            .object(meta_node)
            .and_then(|o| o.as_content_meta())
            .expect("decoded meta");
        assert!(!meta.has_segments);
        assert_eq!(meta.other, b"tiny");
        assert_eq!(meta.content_type, "text/plain");

        // No segments, no manifest, no packet at the object's own name.
        assert!(ns
            .find_child(root, &NameComponent::from_segment(0))
            .is_none());
        assert!(ns.find_child(root, &manifest_component()).is_none());
        assert!(ns.data(root).is_none());
        assert_eq!(ns.object(root).expect("blob").as_blob(), Some(&b"tiny"[..]));
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let (mut ns, root) = producer_tree();
        let handler = GeneralizedObjectHandler::new();
        handler.set_max_segment_payload_length(8).expect("valid");

        let exactly_at = vec![7_u8; 8];
        handler
            .set_object(&mut ns, root, &exactly_at, "application/octet-stream")
            .expect("publishes");

        let meta_node = ns.find_child(root, &meta_component()).expect("meta exists");
        let meta = ns
            .object(meta_node)
            .and_then(|o| o.as_content_meta())
            .expect("decoded meta");
        assert!(!meta.has_segments);
        assert_eq!(meta.other, exactly_at);
        assert!(ns
            .find_child(root, &NameComponent::from_segment(0))
            .is_none());
    }

    #[test]
    fn large_object_segments_with_a_manifest() {
        let (mut ns, root) = producer_tree();
        let handler = GeneralizedObjectHandler::new();
        handler.set_max_segment_payload_length(8).expect("valid");

        let payload = vec![0xAB_u8; 20];
        handler
            .set_object(&mut ns, root, &payload, "application/octet-stream")
            .expect("publishes");

        let meta_node = ns.find_child(root, &meta_component()).expect("meta exists");
        let meta = ns
            .object(meta_node)
            .and_then(|o| o.as_content_meta())
            .expect("decoded meta");
        assert!(meta.has_segments);
        assert!(meta.other.is_empty());

        for index in 0..3_u64 {
            assert!(ns
                .find_child(root, &NameComponent::from_segment(index))
                .is_some());
        }
        assert!(ns.find_child(root, &manifest_component()).is_some());
        assert_eq!(
            ns.object(root).expect("blob").as_blob(),
            Some(payload.as_slice())
        );
    }

    #[test]
    fn component_count_is_locked_after_attach() {
        let mut ns = Namespace::new(Name::parse("/x"));
        let root = ns.root();
        let handler = GeneralizedObjectHandler::new();
        handler
            .set_n_components_after_object_namespace(1)
            .expect("before attach");
        ns.set_handler(root, Box::new(handler.clone())).expect("attaches");
        assert!(handler.set_n_components_after_object_namespace(2).is_err());
        assert_eq!(handler.n_components_after_object_namespace(), 1);
    }
}
