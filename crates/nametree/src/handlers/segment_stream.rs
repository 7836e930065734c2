//! Sliding-window fetch and producer-side segmentation of `seg=i` children.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use nametree_codec::{Data, SignatureValue};
use nametree_core::conventions::{
    manifest_component, DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH, DEFAULT_PIPELINE_SIZE,
};
use nametree_core::NameComponent;

use crate::callbacks::{CallbackId, CallbackRegistry};
use crate::error::TreeError;
use crate::handler::Handler;
use crate::namespace::{Namespace, NodeId};
use crate::state::{NamespaceObject, NamespaceState};

type OnSegmentFn = dyn FnMut(&mut Namespace, Option<NodeId>);

pub(crate) struct SegmentStreamState {
    node: Option<NodeId>,
    max_reported_segment: Option<u64>,
    final_segment_number: Option<u64>,
    interest_pipeline_size: usize,
    initial_interest_count: usize,
    max_segment_payload_length: usize,
    manifest_requested: bool,
    finished: bool,
    on_segment: CallbackRegistry<OnSegmentFn>,
    registered: Vec<(NodeId, CallbackId)>,
}

/// Fetches `seg=i` children with a pipeline of outstanding Interests and
/// reports them upward in strictly contiguous order; in producer mode it
/// splits a blob into signed segment packets, optionally coordinated by a
/// digest `_manifest`.
#[derive(Clone)]
pub struct SegmentStreamHandler {
    inner: Rc<RefCell<SegmentStreamState>>,
}

impl Default for SegmentStreamHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStreamHandler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SegmentStreamState {
                node: None,
                max_reported_segment: None,
                final_segment_number: None,
                interest_pipeline_size: DEFAULT_PIPELINE_SIZE,
                initial_interest_count: 1,
                max_segment_payload_length: DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH,
                manifest_requested: false,
                finished: false,
                on_segment: CallbackRegistry::default(),
                registered: Vec::new(),
            })),
        }
    }

    /// Creates a handler with an initial `on_segment` callback.
    pub fn with_on_segment(
        callback: impl FnMut(&mut Namespace, Option<NodeId>) + 'static,
    ) -> Self {
        let handler = Self::new();
        handler.add_on_segment(callback);
        handler
    }

    /// Registers a callback fired per in-order segment, then once with
    /// `None` after the final segment.
    pub fn add_on_segment(
        &self,
        callback: impl FnMut(&mut Namespace, Option<NodeId>) + 'static,
    ) -> CallbackId {
        let shared: Rc<RefCell<OnSegmentFn>> = Rc::new(RefCell::new(callback));
        self.inner.borrow_mut().on_segment.add(shared)
    }

    pub fn remove_callback(&self, id: CallbackId) {
        self.inner.borrow_mut().on_segment.remove(id);
    }

    /// Window of outstanding segment Interests; at least 1.
    pub fn set_interest_pipeline_size(&self, size: usize) -> Result<(), TreeError> {
        if size < 1 {
            return Err(TreeError::InvalidConfiguration(
                "interest pipeline size must be at least 1",
            ));
        }
        self.inner.borrow_mut().interest_pipeline_size = size;
        Ok(())
    }

    /// Size of the first request burst; at least 1.
    pub fn set_initial_interest_count(&self, count: usize) -> Result<(), TreeError> {
        if count < 1 {
            return Err(TreeError::InvalidConfiguration(
                "initial interest count must be at least 1",
            ));
        }
        self.inner.borrow_mut().initial_interest_count = count;
        Ok(())
    }

    /// Largest payload placed in one produced segment; at least 1.
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

    /// Splits `content` into signed `seg=i` packets under `node`.
    ///
    /// Every segment carries `FinalBlockId`. With `use_signature_manifest`
    /// the segments get placeholder digest signatures and one keychain-signed
    /// `_manifest` carries their implicit digests; otherwise each segment is
    /// keychain-signed. Segments publish first (satisfying pending
    /// Interests), then the manifest, then the node's own object.
    pub fn set_object(
        &self,
        namespace: &mut Namespace,
        node: NodeId,
        content: &[u8],
        use_signature_manifest: bool,
    ) -> Result<(), TreeError> {
        let max_payload = self.inner.borrow().max_segment_payload_length;
        let key_chain = namespace.key_chain(node).ok_or(TreeError::NoKeyChain)?;

        let chunks: Vec<&[u8]> = if content.is_empty() {
            vec![&[][..]]
        } else {
            content.chunks(max_payload).collect()
        };
        let final_index = (chunks.len() - 1) as u64;
        let template = namespace.new_data_meta_info(node).unwrap_or_default();
        let mut digests: Vec<u8> = Vec::with_capacity(chunks.len() * 32);

        for (index, chunk) in chunks.iter().enumerate() {
            let child = namespace.get_child(node, NameComponent::from_segment(index as u64));
            let mut data = Data::new(namespace.name(child).clone(), chunk.to_vec());
            let mut meta_info = template.clone();
            meta_info.set_final_block_id(Some(NameComponent::from_segment(final_index)));
            data.set_meta_info(meta_info);

            if use_signature_manifest {
                data.set_signature(SignatureValue::digest_placeholder());
                digests.extend_from_slice(&data.implicit_digest()?);
            } else {
                namespace.set_state(child, NamespaceState::Signing);
                if let Err(error) = key_chain.sign(&mut data) {
                    namespace.set_error_message(child, error.to_string());
                    namespace.set_state(child, NamespaceState::SigningError);
                    return Err(TreeError::Signing(error.to_string()));
                }
            }
            namespace.set_data(child, data)?;
        }

        if use_signature_manifest {
            let manifest_node = namespace.get_child(node, manifest_component());
            let mut manifest = Data::new(namespace.name(manifest_node).clone(), digests);
            namespace.set_state(manifest_node, NamespaceState::Signing);
            if let Err(error) = key_chain.sign(&mut manifest) {
                namespace.set_error_message(manifest_node, error.to_string());
                namespace.set_state(manifest_node, NamespaceState::SigningError);
                return Err(TreeError::Signing(error.to_string()));
            }
            namespace.set_data(manifest_node, manifest)?;
        }

        namespace.set_object(node, NamespaceObject::Blob(content.to_vec()));
        Ok(())
    }

    /// Checks every segment's implicit digest against the `_manifest`.
    ///
    /// True iff the manifest length is a whole number of 32-byte digests and
    /// each `seg=i` below the manifest's count carries matching Data.
    pub fn verify_with_manifest(namespace: &Namespace, node: NodeId) -> Result<bool, TreeError> {
        let manifest_node = match namespace.find_child(node, &manifest_component()) {
            Some(found) => found,
            None => return Ok(false),
        };
        let digests = match namespace.data(manifest_node) {
            Some(data) => data.content().to_vec(),
            None => return Ok(false),
        };
        if digests.is_empty() || digests.len() % 32 != 0 {
            return Ok(false);
        }

        for index in 0..digests.len() / 32 {
            let component = NameComponent::from_segment(index as u64);
            let child = match namespace.find_child(node, &component) {
                Some(found) => found,
                None => return Ok(false),
            };
            let data = match namespace.data(child) {
                Some(data) => data,
                None => return Ok(false),
            };
            if data.implicit_digest()?.as_slice() != &digests[index * 32..(index + 1) * 32] {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn attach_hooks(
        &self,
        namespace: &mut Namespace,
        node: NodeId,
    ) -> Result<(), TreeError> {
        {
            let mut state = self.inner.borrow_mut();
            if state.node.is_some() {
                return Err(TreeError::HandlerAlreadyAttached);
            }
            state.node = Some(node);
        }

        let hook = self.inner.clone();
        let needed_id = namespace.add_on_object_needed(node, move |ns, _subscriber, needed| {
            SegmentStreamState::handle_object_needed(&hook, ns, needed)
        });
        let hook = self.inner.clone();
        let state_id = namespace.add_on_state_changed(node, move |ns, _subscriber, changed, state| {
            SegmentStreamState::handle_state_changed(&hook, ns, changed, state);
        });

        let mut state = self.inner.borrow_mut();
        state.registered.push((node, needed_id));
        state.registered.push((node, state_id));
        Ok(())
    }

    pub(crate) fn detach_hooks(&self, namespace: &mut Namespace) {
        let registered = {
            let mut state = self.inner.borrow_mut();
            state.node = None;
            state.on_segment.clear();
            std::mem::take(&mut state.registered)
        };
        for (node, id) in registered {
            namespace.remove_callback(node, id);
        }
    }
}

impl Handler for SegmentStreamHandler {
    fn bound_node(&self) -> Option<NodeId> {
        self.inner.borrow().node
    }

    fn attach(&mut self, namespace: &mut Namespace, node: NodeId) -> Result<(), TreeError> {
        self.attach_hooks(namespace, node)
    }

    fn detach(&mut self, namespace: &mut Namespace) {
        self.detach_hooks(namespace);
    }
}

impl SegmentStreamState {
    fn handle_object_needed(
        inner: &Rc<RefCell<SegmentStreamState>>,
        namespace: &mut Namespace,
        needed: NodeId,
    ) -> bool {
        let (node, initial) = {
            let state = inner.borrow();
            (state.node, state.initial_interest_count)
        };
        if node != Some(needed) {
            return false;
        }
        Self::request_new_segments(inner, namespace, initial);
        true
    }

    fn handle_state_changed(
        inner: &Rc<RefCell<SegmentStreamState>>,
        namespace: &mut Namespace,
        changed: NodeId,
        new_state: NamespaceState,
    ) {
        let (node, finished) = {
            let state = inner.borrow();
            (state.node, state.finished)
        };
        let Some(node) = node else { return };
        if finished || new_state != NamespaceState::ObjectReady {
            return;
        }

        let parent_len = namespace.name(node).len();
        let changed_name = namespace.name(changed).clone();
        let is_direct_segment = changed_name.len() == parent_len + 1
            && changed_name.last().is_some_and(|c| c.is_segment());
        if !is_direct_segment {
            return;
        }

        let mut request_manifest = false;
        if let Some(data) = namespace.data(changed) {
            if let Some(final_block) = data.meta_info().final_block_id() {
                if final_block.is_segment() {
                    if let Ok(number) = final_block.to_segment() {
                        inner.borrow_mut().final_segment_number = Some(number);
                    }
                }
            }
            if data.signature().is_digest_only() {
                let mut state = inner.borrow_mut();
                if !state.manifest_requested {
                    state.manifest_requested = true;
                    request_manifest = true;
                }
            }
        }
        if request_manifest {
            let manifest_node = namespace.get_child(node, manifest_component());
            if let Err(error) = namespace.object_needed(manifest_node, false) {
                debug!(%error, "cannot request manifest");
            }
        }

        // Report every contiguously available segment.
        loop {
            let next = {
                let state = inner.borrow();
                state.max_reported_segment.map_or(0, |m| m + 1)
            };
            let component = NameComponent::from_segment(next);
            if !namespace.has_child(node, &component) {
                break;
            }
            let child = namespace.get_child(node, component);
            if namespace.object(child).is_none() {
                break;
            }

            inner.borrow_mut().max_reported_segment = Some(next);
            Self::fire_on_segment(inner, namespace, Some(child));

            let is_final = inner.borrow().final_segment_number == Some(next);
            if is_final {
                Self::fire_on_segment(inner, namespace, None);
                Self::finish(inner, namespace);
                return;
            }
        }

        let pipeline = inner.borrow().interest_pipeline_size;
        Self::request_new_segments(inner, namespace, pipeline);
    }

    /// Refills the window of outstanding segment Interests up to
    /// `max_requested`, skipping segments already received or in flight.
    fn request_new_segments(
        inner: &Rc<RefCell<SegmentStreamState>>,
        namespace: &mut Namespace,
        max_requested: usize,
    ) {
        let max_requested = max_requested.max(1);
        let (node, max_reported, final_number) = {
            let state = inner.borrow();
            (state.node, state.max_reported_segment, state.final_segment_number)
        };
        let Some(node) = node else { return };

        let mut outstanding = 0_usize;
        for component in namespace.child_components(node) {
            if !component.is_segment() {
                continue;
            }
            let child = namespace.get_child(node, component);
            if namespace.object(child).is_none()
                && namespace.state(child) >= NamespaceState::InterestExpressed
            {
                outstanding += 1;
                if outstanding >= max_requested {
                    return;
                }
            }
        }

        let mut next = max_reported.map_or(0, |m| m + 1);
        while outstanding < max_requested {
            if final_number.is_some_and(|f| next > f) {
                break;
            }
            let component = NameComponent::from_segment(next);
            let already = match namespace.find_child(node, &component) {
                Some(child) => {
                    namespace.object(child).is_some()
                        || namespace.state(child) >= NamespaceState::InterestExpressed
                }
                None => false,
            };
            if already {
                next += 1;
                continue;
            }

            let child = namespace.get_child(node, component);
            outstanding += 1;
            if let Err(error) = namespace.object_needed(child, false) {
                debug!(%error, "cannot request segment");
            }
            next += 1;
        }
    }

    fn fire_on_segment(
        inner: &Rc<RefCell<SegmentStreamState>>,
        namespace: &mut Namespace,
        segment: Option<NodeId>,
    ) {
        let snapshot = inner.borrow().on_segment.snapshot();
        for (id, callback) in snapshot {
            if !inner.borrow().on_segment.contains(id) {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut f) => (*f)(namespace, segment),
                Err(_) => debug!(callback = id, "skipping re-entrant segment callback"),
            }
        }
    }

    /// Completion: free the callback registrations so the finished pipeline
    /// holds no tree hooks.
    fn finish(inner: &Rc<RefCell<SegmentStreamState>>, namespace: &mut Namespace) {
        let registered = {
            let mut state = inner.borrow_mut();
            state.finished = true;
            state.on_segment.clear();
            std::mem::take(&mut state.registered)
        };
        for (node, id) in registered {
            namespace.remove_callback(node, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SegmentStreamHandler;
    use crate::namespace::Namespace;
    use nametree_codec::SignatureValue;
    use nametree_core::conventions::manifest_component;
    use nametree_core::{Name, NameComponent};
    use nametree_crypto::Ed25519KeyChain;
    use std::rc::Rc;

    fn producer_tree() -> (Namespace, crate::namespace::NodeId) {
        let mut ns = Namespace::new(Name::parse("/doc"));
        let root = ns.root();
        ns.set_key_chain(
            root,
            Rc::new(Ed25519KeyChain::from_secret([9_u8; 32], Name::parse("/keys/p"))),
        );
        (ns, root)
    }

    #[test]
    fn set_object_segments_and_marks_the_final_block() {
        let (mut ns, root) = producer_tree();
        let handler = SegmentStreamHandler::new();
        handler.set_max_segment_payload_length(4).expect("valid");

        handler
            .set_object(&mut ns, root, b"0123456789", false)
            .expect("publishes");

        // 10 bytes over 4-byte segments: 4 + 4 + 2.
        for (index, expected) in [&b"0123"[..], b"4567", b"89"].iter().enumerate() {
            let child = ns
                .find_child(root, &NameComponent::from_segment(index as u64))
                .expect("segment exists");
            let data = ns.data(child).expect("segment data");
            assert_eq!(data.content(), *expected);
            assert_eq!(
                data.meta_info().final_block_id().expect("final block"),
                &NameComponent::from_segment(2)
            );
            assert!(matches!(data.signature(), SignatureValue::Ed25519 { .. }));
        }
        assert!(ns.find_child(root, &manifest_component()).is_none());
        assert_eq!(ns.object(root).expect("blob").as_blob(), Some(&b"0123456789"[..]));
    }

    #[test]
    fn manifest_mode_uses_placeholder_signatures_and_verifies() {
        let (mut ns, root) = producer_tree();
        let handler = SegmentStreamHandler::new();
        handler.set_max_segment_payload_length(4).expect("valid");

        handler
            .set_object(&mut ns, root, b"abcdefgh", true)
            .expect("publishes");

        let manifest = ns
            .find_child(root, &manifest_component())
            .expect("manifest exists");
        let manifest_data = ns.data(manifest).expect("manifest data");
        assert_eq!(manifest_data.content().len(), 64);
        assert!(matches!(
            manifest_data.signature(),
            SignatureValue::Ed25519 { .. }
        ));

        let seg0 = ns
            .find_child(root, &NameComponent::from_segment(0))
            .expect("segment exists");
        assert!(ns.data(seg0).expect("segment data").signature().is_digest_only());

        assert!(SegmentStreamHandler::verify_with_manifest(&ns, root).expect("verifies"));
    }

    #[test]
    fn empty_object_publishes_one_empty_segment() {
        let (mut ns, root) = producer_tree();
        let handler = SegmentStreamHandler::new();

        handler.set_object(&mut ns, root, b"", false).expect("publishes");

        let seg0 = ns
            .find_child(root, &NameComponent::from_segment(0))
            .expect("segment exists");
        let data = ns.data(seg0).expect("segment data");
        assert!(data.content().is_empty());
        assert_eq!(
            data.meta_info().final_block_id().expect("final block"),
            &NameComponent::from_segment(0)
        );
    }

    #[test]
    fn pipeline_size_must_be_positive() {
        let handler = SegmentStreamHandler::new();
        assert!(handler.set_interest_pipeline_size(0).is_err());
        assert!(handler.set_interest_pipeline_size(3).is_ok());
        assert!(handler.set_max_segment_payload_length(0).is_err());
    }

    #[test]
    fn verify_fails_when_a_segment_is_altered() {
        let (mut ns, root) = producer_tree();
        let handler = SegmentStreamHandler::new();
        handler.set_max_segment_payload_length(4).expect("valid");
        handler
            .set_object(&mut ns, root, b"abcdefgh", true)
            .expect("publishes");

        // Rewrite segment 1 in place under a child with the same name.
        let seg1_name = Name::parse("/doc/seg=1");
        let altered = {
            let mut data = nametree_codec::Data::new(seg1_name, b"EFGH".to_vec());
            data.set_signature(SignatureValue::digest_placeholder());
            data
        };
        let seg1 = ns
            .find_child(root, &NameComponent::from_segment(1))
            .expect("segment exists");
        // set_data refuses replacement, so swap through a fresh subtree.
        assert!(!ns.set_data(seg1, altered.clone()).expect("ignored"));

        let mut fresh = Namespace::new(Name::parse("/doc"));
        let fresh_root = fresh.root();
        fresh
            .set_key_chain(
                fresh_root,
                Rc::new(Ed25519KeyChain::from_secret([9_u8; 32], Name::parse("/keys/p"))),
            );
        for index in 0..2_u64 {
            let child = fresh.get_child(fresh_root, NameComponent::from_segment(index));
            let original = ns
                .data(ns.find_child(root, &NameComponent::from_segment(index)).expect("exists"))
                .expect("data")
                .clone();
            let packet = if index == 1 { altered.clone() } else { original };
            fresh.set_data(child, packet).expect("accepts");
        }
        let manifest_node = fresh.get_child(fresh_root, manifest_component());
        let manifest = ns
            .data(ns.find_child(root, &manifest_component()).expect("exists"))
            .expect("data")
            .clone();
        fresh.set_data(manifest_node, manifest).expect("accepts");

        assert!(!SegmentStreamHandler::verify_with_manifest(&fresh, fresh_root).expect("verifies"));
    }
}
