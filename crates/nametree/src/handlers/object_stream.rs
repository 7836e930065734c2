//! Sequence-numbered stream of generalized objects keyed by `_latest`.
//!
//! The producer answers `_latest` with a short-freshness delegation to its
//! newest `seq=N`; the consumer follows that pointer and keeps a pipeline
//! of whole objects in flight, or polls `_latest` when the pipeline is
//! disabled.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use nametree_codec::{ContentMetaInfo, Data, DelegationSet};
use nametree_core::conventions::{
    latest_component, meta_component, DEFAULT_LATEST_PACKET_FRESHNESS,
    DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH, DEFAULT_PIPELINE_SIZE,
};
use nametree_core::NameComponent;

use crate::callbacks::CallbackId;
use crate::error::TreeError;
use crate::handler::Handler;
use crate::handlers::generalized_object::GeneralizedObjectHandler;
use crate::namespace::{Namespace, NodeId};
use crate::state::NamespaceState;

type OnSequencedObjectFn = dyn FnMut(&mut Namespace, u64, ContentMetaInfo, NodeId);

struct ObjectStreamState {
    node: Option<NodeId>,
    pipeline_size: usize,
    latest_packet_freshness: Duration,
    max_segment_payload_length: usize,
    on_sequenced_object: Option<Box<OnSequencedObjectFn>>,
    produced_sequence_number: Option<u64>,
    max_reported_sequence_number: Option<u64>,
    reported_count: usize,
    requested_count: usize,
    highest_requested: Option<u64>,
    in_flight: HashMap<u64, NodeId>,
    registered: Vec<(NodeId, CallbackId)>,
    latest_version: u64,
}

/// Producer/consumer of `seq=N` generalized objects under one stream node.
#[derive(Clone)]
pub struct GeneralizedObjectStreamHandler {
    inner: Rc<RefCell<ObjectStreamState>>,
}

impl Default for GeneralizedObjectStreamHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneralizedObjectStreamHandler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObjectStreamState {
                node: None,
                pipeline_size: DEFAULT_PIPELINE_SIZE,
                latest_packet_freshness: DEFAULT_LATEST_PACKET_FRESHNESS,
                max_segment_payload_length: DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH,
                on_sequenced_object: None,
                produced_sequence_number: None,
                max_reported_sequence_number: None,
                reported_count: 0,
                requested_count: 0,
                highest_requested: None,
                in_flight: HashMap::new(),
                registered: Vec::new(),
                latest_version: 0,
            })),
        }
    }

    /// Creates a handler that reports each arriving sequence to `callback`.
    pub fn with_callback(
        callback: impl FnMut(&mut Namespace, u64, ContentMetaInfo, NodeId) + 'static,
    ) -> Self {
        let handler = Self::new();
        handler.inner.borrow_mut().on_sequenced_object = Some(Box::new(callback));
        handler
    }

    /// Number of whole objects kept in flight; zero polls `_latest` instead.
    pub fn set_pipeline_size(&self, size: usize) {
        self.inner.borrow_mut().pipeline_size = size;
    }

    pub fn pipeline_size(&self) -> usize {
        self.inner.borrow().pipeline_size
    }

    /// Freshness period stamped on produced `_latest` packets; also paces
    /// consumer-side retries.
    pub fn set_latest_packet_freshness_period(&self, period: Duration) {
        self.inner.borrow_mut().latest_packet_freshness = period;
    }

    pub fn latest_packet_freshness_period(&self) -> Duration {
        self.inner.borrow().latest_packet_freshness
    }

    pub fn set_max_segment_payload_length(&self, length: usize) -> Result<(), TreeError> {
        if length < 1 {
            return Err(TreeError::InvalidConfiguration(
                "max segment payload length must be at least 1",
            ));
        }
        self.inner.borrow_mut().max_segment_payload_length = length;
        Ok(())
    }

    /// The newest sequence this producer has published.
    pub fn produced_sequence_number(&self) -> Option<u64> {
        self.inner.borrow().produced_sequence_number
    }

    /// Publishes `content` as the generalized object at `seq=sequence`.
    pub fn set_object(
        &self,
        namespace: &mut Namespace,
        sequence: u64,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), TreeError> {
        let (node, max_payload) = {
            let state = self.inner.borrow();
            (state.node, state.max_segment_payload_length)
        };
        let node = node.ok_or(TreeError::InvalidConfiguration(
            "stream handler is not attached",
        ))?;

        let sequence_node =
            namespace.get_child(node, NameComponent::from_sequence_number(sequence));
        let producer = GeneralizedObjectHandler::new();
        producer.set_max_segment_payload_length(max_payload)?;
        producer.set_object(namespace, sequence_node, content, content_type)?;

        self.inner.borrow_mut().produced_sequence_number = Some(sequence);
        Ok(())
    }

    /// Publishes `content` at the next sequence number.
    pub fn add_object(
        &self,
        namespace: &mut Namespace,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), TreeError> {
        let next = self
            .inner
            .borrow()
            .produced_sequence_number
            .map_or(0, |produced| produced + 1);
        self.set_object(namespace, next, content, content_type)
    }
}

impl Handler for GeneralizedObjectStreamHandler {
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
            ObjectStreamState::handle_object_needed(&hook, ns, needed)
        });
        let hook = self.inner.clone();
        let state_id =
            namespace.add_on_state_changed(node, move |ns, _subscriber, changed, state| {
                ObjectStreamState::handle_state_changed(&hook, ns, changed, state);
            });

        let mut state = self.inner.borrow_mut();
        state.registered.push((node, needed_id));
        state.registered.push((node, state_id));
        Ok(())
    }

    fn detach(&mut self, namespace: &mut Namespace) {
        let (registered, in_flight) = {
            let mut state = self.inner.borrow_mut();
            state.node = None;
            (
                std::mem::take(&mut state.registered),
                std::mem::take(&mut state.in_flight),
            )
        };
        for (node, id) in registered {
            namespace.remove_callback(node, id);
        }
        for (_, sequence_node) in in_flight {
            namespace.clear_handler(sequence_node);
        }
    }
}

impl ObjectStreamState {
    /// Consumer entry (`needed` is the stream node) fetches `_latest`;
    /// producer entry (`needed` is the `_latest` child) answers it.
    fn handle_object_needed(
        inner: &Rc<RefCell<ObjectStreamState>>,
        namespace: &mut Namespace,
        needed: NodeId,
    ) -> bool {
        let (node, produced) = {
            let state = inner.borrow();
            (state.node, state.produced_sequence_number)
        };
        let Some(node) = node else { return false };

        if needed == node {
            Self::request_latest(inner, namespace);
            return true;
        }

        let latest_name = namespace.name(node).child(latest_component());
        if namespace.name(needed) == &latest_name {
            if produced.is_some() {
                Self::produce_latest(inner, namespace);
                return true;
            }
            return false;
        }
        false
    }

    fn request_latest(inner: &Rc<RefCell<ObjectStreamState>>, namespace: &mut Namespace) {
        let Some(node) = inner.borrow().node else { return };
        if namespace.is_shut_down(node) {
            return;
        }
        let latest_node = namespace.get_child(node, latest_component());
        if let Err(error) = namespace.object_needed(latest_node, true) {
            debug!(%error, "cannot request _latest");
        }
    }

    /// Builds a versioned `_latest` packet delegating to the newest
    /// `seq=N`, with the configured short freshness period.
    fn produce_latest(inner: &Rc<RefCell<ObjectStreamState>>, namespace: &mut Namespace) {
        let (node, produced, freshness) = {
            let state = inner.borrow();
            (
                state.node,
                state.produced_sequence_number,
                state.latest_packet_freshness,
            )
        };
        let (Some(node), Some(produced)) = (node, produced) else {
            return;
        };

        let now = namespace.now(node).as_millis();
        let version = {
            let mut state = inner.borrow_mut();
            let version = now.max(state.latest_version + 1);
            state.latest_version = version;
            version
        };

        let latest_node = namespace.get_child(node, latest_component());
        let version_node = namespace.get_child(latest_node, NameComponent::from_version(version));
        let target = namespace
            .name(node)
            .child(NameComponent::from_sequence_number(produced));
        let content = match DelegationSet::single(0, target).encode() {
            Ok(content) => content,
            Err(error) => {
                warn!(%error, "cannot encode _latest delegation");
                return;
            }
        };

        let mut data = Data::new(namespace.name(version_node).clone(), content);
        let mut meta_info = namespace.new_data_meta_info(node).unwrap_or_default();
        meta_info.set_freshness_period(Some(freshness));
        data.set_meta_info(meta_info);

        let Some(key_chain) = namespace.key_chain(node) else {
            warn!("no keychain for _latest packet");
            return;
        };
        if let Err(error) = key_chain.sign(&mut data) {
            warn!(%error, "cannot sign _latest packet");
            return;
        }
        if let Err(error) = namespace.set_data(version_node, data) {
            warn!(%error, "cannot attach _latest packet");
        }
    }

    fn handle_state_changed(
        inner: &Rc<RefCell<ObjectStreamState>>,
        namespace: &mut Namespace,
        changed: NodeId,
        new_state: NamespaceState,
    ) {
        let (node, freshness) = {
            let state = inner.borrow();
            (state.node, state.latest_packet_freshness)
        };
        let Some(node) = node else { return };
        let node_len = namespace.name(node).len();
        let changed_name = namespace.name(changed).clone();

        // A versioned `_latest` answer became readable.
        if new_state == NamespaceState::ObjectReady
            && changed_name.len() == node_len + 2
            && changed_name.components()[node_len] == latest_component()
            && changed_name.last().is_some_and(|c| c.is_version())
        {
            Self::handle_latest(inner, namespace, changed);
            return;
        }

        // The `_latest` request itself failed: retry on the freshness cadence.
        if (new_state == NamespaceState::InterestTimeout
            || new_state == NamespaceState::InterestNetworkNack)
            && changed_name.len() == node_len + 1
            && changed_name.last() == Some(&latest_component())
        {
            let hook = inner.clone();
            let scheduled = namespace.call_later(
                node,
                freshness,
                Box::new(move |ns| ObjectStreamState::request_latest(&hook, ns)),
            );
            if let Err(error) = scheduled {
                debug!(%error, "cannot schedule _latest retry");
            }
            return;
        }

        // The top requested sequence timed out: the producer is not that
        // far yet, so learn the real top from `_latest`.
        if new_state == NamespaceState::InterestTimeout && changed_name.len() == node_len + 2 {
            let sequence_component = &changed_name.components()[node_len];
            if sequence_component.is_sequence_number()
                && changed_name.last() == Some(&meta_component())
            {
                if let Ok(sequence) = sequence_component.to_sequence_number() {
                    let is_top = inner.borrow().highest_requested == Some(sequence);
                    if is_top {
                        Self::request_latest(inner, namespace);
                    }
                }
            }
        }
    }

    /// Decodes the delegation and either starts a single fetch (polling
    /// mode) or advances the object pipeline.
    fn handle_latest(
        inner: &Rc<RefCell<ObjectStreamState>>,
        namespace: &mut Namespace,
        version_node: NodeId,
    ) {
        let Some(blob) = namespace
            .object(version_node)
            .and_then(|object| object.as_blob())
            .map(|bytes| bytes.to_vec())
        else {
            return;
        };
        let delegations = match DelegationSet::decode(&blob) {
            Ok(delegations) => delegations,
            Err(error) => {
                warn!(%error, "cannot decode _latest delegation");
                return;
            }
        };
        let Some(first) = delegations.first() else { return };
        let target = first.name.clone();

        let (node, pipeline_size, freshness) = {
            let state = inner.borrow();
            (state.node, state.pipeline_size, state.latest_packet_freshness)
        };
        let Some(node) = node else { return };
        let node_len = namespace.name(node).len();

        let valid_target = target.len() == node_len + 1
            && namespace.name(node).is_prefix_of(&target)
            && target.last().is_some_and(|c| c.is_sequence_number());
        if !valid_target {
            warn!(target = %target, "malformed _latest target name");
            return;
        }
        let sequence = match target.last().map(|c| c.to_sequence_number()) {
            Some(Ok(sequence)) => sequence,
            _ => return,
        };

        if pipeline_size == 0 {
            let already = {
                let state = inner.borrow();
                state
                    .max_reported_sequence_number
                    .is_some_and(|reported| reported >= sequence)
                    || state.in_flight.contains_key(&sequence)
            };
            if !already {
                Self::request_sequence(inner, namespace, sequence);
            }
            let hook = inner.clone();
            let scheduled = namespace.call_later(
                node,
                freshness / 2,
                Box::new(move |ns| ObjectStreamState::request_latest(&hook, ns)),
            );
            if let Err(error) = scheduled {
                debug!(%error, "cannot schedule _latest poll");
            }
            return;
        }

        {
            // The stream starts (or resumes) at the producer's current top;
            // the floor only moves forward.
            let mut state = inner.borrow_mut();
            let floor = sequence.checked_sub(1);
            state.max_reported_sequence_number = state.max_reported_sequence_number.max(floor);
        }
        Self::refill_pipeline(inner, namespace);
    }

    /// Attaches a one-shot object handler for `sequence` and requests its
    /// `_meta`.
    fn request_sequence(
        inner: &Rc<RefCell<ObjectStreamState>>,
        namespace: &mut Namespace,
        sequence: u64,
    ) {
        let Some(node) = inner.borrow().node else { return };
        let sequence_node =
            namespace.get_child(node, NameComponent::from_sequence_number(sequence));
        if namespace.has_handler(sequence_node) {
            return;
        }

        let hook = inner.clone();
        let handler = GeneralizedObjectHandler::with_callback(move |ns, meta, object_node| {
            ObjectStreamState::report(&hook, ns, sequence, meta, object_node);
        });
        if let Err(error) = namespace.set_handler(sequence_node, Box::new(handler)) {
            debug!(%error, sequence, "cannot attach per-sequence handler");
            return;
        }

        {
            let mut state = inner.borrow_mut();
            state.in_flight.insert(sequence, sequence_node);
            state.requested_count += 1;
            state.highest_requested = Some(
                state
                    .highest_requested
                    .map_or(sequence, |highest| highest.max(sequence)),
            );
        }

        let meta_node = namespace.get_child(sequence_node, meta_component());
        if let Err(error) = namespace.object_needed(meta_node, false) {
            debug!(%error, sequence, "cannot request sequence _meta");
        }
    }

    /// Keeps `(requested - reported)` at the pipeline size, skipping
    /// sequences already answered or in flight.
    fn refill_pipeline(inner: &Rc<RefCell<ObjectStreamState>>, namespace: &mut Namespace) {
        let (node, pipeline_size) = {
            let state = inner.borrow();
            (state.node, state.pipeline_size)
        };
        let Some(node) = node else { return };

        let mut sequence = {
            let state = inner.borrow();
            state.max_reported_sequence_number.map_or(0, |m| m + 1)
        };
        loop {
            let outstanding = {
                let state = inner.borrow();
                state.requested_count - state.reported_count
            };
            if outstanding >= pipeline_size {
                break;
            }

            let skip = {
                let state = inner.borrow();
                if state.in_flight.contains_key(&sequence) {
                    true
                } else {
                    match namespace
                        .find_child(node, &NameComponent::from_sequence_number(sequence))
                    {
                        Some(sequence_node) => {
                            match namespace.find_child(sequence_node, &meta_component()) {
                                Some(meta_node) => {
                                    namespace.data(meta_node).is_some()
                                        || namespace.state(meta_node)
                                            >= NamespaceState::InterestExpressed
                                }
                                None => namespace.has_handler(sequence_node),
                            }
                        }
                        None => false,
                    }
                }
            };
            if skip {
                sequence += 1;
                continue;
            }

            Self::request_sequence(inner, namespace, sequence);
            sequence += 1;
        }
    }

    /// Reports a completed object exactly once, frees its handler, and
    /// refills the pipeline.
    fn report(
        inner: &Rc<RefCell<ObjectStreamState>>,
        namespace: &mut Namespace,
        sequence: u64,
        meta: ContentMetaInfo,
        object_node: NodeId,
    ) {
        let sequence_node = {
            let mut state = inner.borrow_mut();
            match state.in_flight.remove(&sequence) {
                Some(sequence_node) => {
                    state.reported_count += 1;
                    state.max_reported_sequence_number =
                        state.max_reported_sequence_number.max(Some(sequence));
                    Some(sequence_node)
                }
                None => None,
            }
        };
        let Some(sequence_node) = sequence_node else {
            return;
        };

        namespace.clear_handler(sequence_node);
        Self::fire_sequenced_object(inner, namespace, sequence, meta, object_node);

        let pipeline_size = inner.borrow().pipeline_size;
        if pipeline_size > 0 {
            Self::refill_pipeline(inner, namespace);
        }
    }

    fn fire_sequenced_object(
        inner: &Rc<RefCell<ObjectStreamState>>,
        namespace: &mut Namespace,
        sequence: u64,
        meta: ContentMetaInfo,
        object_node: NodeId,
    ) {
        let callback = inner.borrow_mut().on_sequenced_object.take();
        if let Some(mut callback) = callback {
            callback(namespace, sequence, meta, object_node);
            let mut state = inner.borrow_mut();
            if state.on_sequenced_object.is_none() {
                state.on_sequenced_object = Some(callback);
            }
        }
    }
}
