//! The name tree itself: an arena of per-name nodes with state machines,
//! callback registries, inherited configuration and producer/consumer
//! mediation toward attached faces.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use nametree_codec::{Data, Interest, MetaInfo, NetworkNack};
use nametree_core::conventions::{DEFAULT_INTEREST_LIFETIME, DEFAULT_MAX_INTEREST_LIFETIME};
use nametree_core::{Name, NameComponent, Timestamp};
use nametree_crypto::{Decryptor, KeyChain, Validator};
use nametree_face::{Face, InterestId, RegistrationId, TimerId};

use crate::callbacks::{
    CallbackId, CallbackRegistry, DeserializeDone, OnDeserializeNeededFn, OnObjectNeededFn,
    OnObjectSet, OnStateChangedFn, OnValidateStateChangedFn,
};
use crate::error::TreeError;
use crate::handler::Handler;
use crate::pit::PendingInterestTable;
use crate::state::{NamespaceObject, NamespaceState, NamespaceValidateState};

/// Index of one node within its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

pub(crate) struct NodeEntry {
    pub(crate) name: Name,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: BTreeMap<NameComponent, NodeId>,
    pub(crate) state: NamespaceState,
    pub(crate) validate_state: NamespaceValidateState,
    pub(crate) data: Option<Data>,
    pub(crate) object: Option<NamespaceObject>,
    pub(crate) freshness_deadline: Option<Timestamp>,
    pub(crate) network_nack: Option<NetworkNack>,
    pub(crate) error_message: Option<String>,
    pub(crate) on_state_changed: CallbackRegistry<OnStateChangedFn>,
    pub(crate) on_validate_state_changed: CallbackRegistry<OnValidateStateChangedFn>,
    pub(crate) on_object_needed: CallbackRegistry<OnObjectNeededFn>,
    pub(crate) on_deserialize_needed: CallbackRegistry<OnDeserializeNeededFn>,
    handler: Option<Box<dyn Handler>>,
    face_slot: Option<usize>,
    registration: Option<(usize, RegistrationId)>,
    key_chain: Option<Rc<dyn KeyChain>>,
    decryptor: Option<Rc<dyn Decryptor>>,
    validator: Option<Rc<dyn Validator>>,
    new_data_meta_info: Option<MetaInfo>,
    interest_lifetime: Option<Duration>,
    max_interest_lifetime: Option<Duration>,
    sync_depth: Option<usize>,
    is_shut_down: bool,
    shutdown_cache: (u64, bool),
}

impl NodeEntry {
    fn new(name: Name, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: BTreeMap::new(),
            state: NamespaceState::NameExists,
            validate_state: NamespaceValidateState::WaitingForData,
            data: None,
            object: None,
            freshness_deadline: None,
            network_nack: None,
            error_message: None,
            on_state_changed: CallbackRegistry::default(),
            on_validate_state_changed: CallbackRegistry::default(),
            on_object_needed: CallbackRegistry::default(),
            on_deserialize_needed: CallbackRegistry::default(),
            handler: None,
            face_slot: None,
            registration: None,
            key_chain: None,
            decryptor: None,
            validator: None,
            new_data_meta_info: None,
            interest_lifetime: None,
            max_interest_lifetime: None,
            sync_depth: None,
            is_shut_down: false,
            shutdown_cache: (0, false),
        }
    }
}

pub(crate) struct FaceSlot {
    pub(crate) face: Rc<RefCell<dyn Face>>,
}

pub(crate) struct ExpressedInterest {
    pub(crate) node: NodeId,
    pub(crate) interest: Interest,
    pub(crate) lifetime: Duration,
}

pub(crate) struct RegisterWaiter {
    pub(crate) node: NodeId,
    pub(crate) on_failed: Option<Box<dyn FnOnce(&mut Namespace, NodeId, String)>>,
    pub(crate) on_success: Option<Box<dyn FnOnce(&mut Namespace, NodeId)>>,
}

/// The name tree runtime. Owns every node, attached faces, the pending
/// incoming Interest table and all timers.
pub struct Namespace {
    pub(crate) nodes: Vec<NodeEntry>,
    pub(crate) faces: Vec<FaceSlot>,
    pub(crate) pit: Option<PendingInterestTable>,
    pub(crate) shutdown_counter: u64,
    pub(crate) expressed: HashMap<(usize, InterestId), ExpressedInterest>,
    pub(crate) registrations: HashMap<(usize, RegistrationId), NodeId>,
    pub(crate) register_waiters: HashMap<(usize, RegistrationId), RegisterWaiter>,
    pub(crate) timers: HashMap<(usize, TimerId), Box<dyn FnOnce(&mut Namespace)>>,
}

impl Namespace {
    /// Creates a tree whose root has `name`.
    pub fn new(name: Name) -> Self {
        Self {
            nodes: vec![NodeEntry::new(name, None)],
            faces: Vec::new(),
            pit: None,
            shutdown_counter: 0,
            expressed: HashMap::new(),
            registrations: HashMap::new(),
            register_waiters: HashMap::new(),
            timers: HashMap::new(),
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// The node's full name.
    pub fn name(&self, node: NodeId) -> &Name {
        &self.nodes[node.0].name
    }

    /// The node's parent; the root has none.
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn state(&self, node: NodeId) -> NamespaceState {
        self.nodes[node.0].state
    }

    pub fn validate_state(&self, node: NodeId) -> NamespaceValidateState {
        self.nodes[node.0].validate_state
    }

    /// The attached Data packet, if one arrived or was produced here.
    pub fn data(&self, node: NodeId) -> Option<&Data> {
        self.nodes[node.0].data.as_ref()
    }

    /// The deserialized object, if ready.
    pub fn object(&self, node: NodeId) -> Option<&NamespaceObject> {
        self.nodes[node.0].object.as_ref()
    }

    /// When the attached Data stops being fresh; `None` means never.
    pub fn freshness_deadline(&self, node: NodeId) -> Option<Timestamp> {
        self.nodes[node.0].freshness_deadline
    }

    /// The retained NACK after an `InterestNetworkNack` transition.
    pub fn network_nack(&self, node: NodeId) -> Option<&NetworkNack> {
        self.nodes[node.0].network_nack.as_ref()
    }

    /// Human-readable message from a decrypt/sign/validate failure.
    pub fn error_message(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].error_message.as_deref()
    }

    pub(crate) fn set_error_message(&mut self, node: NodeId, message: String) {
        self.nodes[node.0].error_message = Some(message);
    }

    // ---- tree navigation ----------------------------------------------

    pub fn has_child(&self, node: NodeId, component: &NameComponent) -> bool {
        self.nodes[node.0].children.contains_key(component)
    }

    /// Finds the immediate child for `component` without creating it.
    pub fn find_child(&self, node: NodeId, component: &NameComponent) -> Option<NodeId> {
        self.nodes[node.0].children.get(component).copied()
    }

    /// Finds a descendant without creating nodes.
    pub fn find_descendant(&self, node: NodeId, name: &Name) -> Option<NodeId> {
        if !self.nodes[node.0].name.is_prefix_of(name) {
            return None;
        }
        let mut current = node;
        while self.nodes[current.0].name.len() < name.len() {
            let next = &name.components()[self.nodes[current.0].name.len()];
            current = *self.nodes[current.0].children.get(next)?;
        }
        Some(current)
    }

    pub fn has_descendant(&self, node: NodeId, name: &Name) -> bool {
        self.find_descendant(node, name).is_some()
    }

    /// Returns the child for `component`, creating it if needed.
    ///
    /// A newly created child fires its `NameExists` transition.
    pub fn get_child(&mut self, node: NodeId, component: NameComponent) -> NodeId {
        if let Some(existing) = self.nodes[node.0].children.get(&component) {
            return *existing;
        }
        self.create_child(node, component, true)
    }

    /// Returns the descendant for `name`, creating intermediate nodes.
    ///
    /// Only a newly created final leaf fires `NameExists`; intermediates are
    /// created silently.
    pub fn get_descendant(&mut self, node: NodeId, name: &Name) -> Result<NodeId, TreeError> {
        if !self.nodes[node.0].name.is_prefix_of(name) {
            return Err(TreeError::NotADescendant);
        }
        let mut current = node;
        while self.nodes[current.0].name.len() < name.len() {
            let depth = self.nodes[current.0].name.len();
            let next = name.components()[depth].clone();
            let is_leaf = depth == name.len() - 1;
            current = match self.nodes[current.0].children.get(&next) {
                Some(child) => *child,
                None => self.create_child(current, next, is_leaf),
            };
        }
        Ok(current)
    }

    /// `get_descendant` from the root.
    pub fn node(&mut self, name: &Name) -> Result<NodeId, TreeError> {
        self.get_descendant(self.root(), name)
    }

    /// The components of all children, in canonical order.
    pub fn child_components(&self, node: NodeId) -> Vec<NameComponent> {
        self.nodes[node.0].children.keys().cloned().collect()
    }

    fn create_child(&mut self, parent: NodeId, component: NameComponent, fire: bool) -> NodeId {
        let name = self.nodes[parent.0].name.child(component.clone());
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeEntry::new(name, Some(parent)));
        self.nodes[parent.0].children.insert(component, id);
        if fire {
            self.set_state(id, NamespaceState::NameExists);
        }
        id
    }

    // ---- callback registration ----------------------------------------

    pub fn add_on_state_changed(
        &mut self,
        node: NodeId,
        callback: impl FnMut(&mut Namespace, NodeId, NodeId, NamespaceState) + 'static,
    ) -> CallbackId {
        let shared: Rc<RefCell<OnStateChangedFn>> = Rc::new(RefCell::new(callback));
        self.nodes[node.0].on_state_changed.add(shared)
    }

    pub fn add_on_validate_state_changed(
        &mut self,
        node: NodeId,
        callback: impl FnMut(&mut Namespace, NodeId, NodeId, NamespaceValidateState) + 'static,
    ) -> CallbackId {
        let shared: Rc<RefCell<OnValidateStateChangedFn>> = Rc::new(RefCell::new(callback));
        self.nodes[node.0].on_validate_state_changed.add(shared)
    }

    pub fn add_on_object_needed(
        &mut self,
        node: NodeId,
        callback: impl FnMut(&mut Namespace, NodeId, NodeId) -> bool + 'static,
    ) -> CallbackId {
        let shared: Rc<RefCell<OnObjectNeededFn>> = Rc::new(RefCell::new(callback));
        self.nodes[node.0].on_object_needed.add(shared)
    }

    pub fn add_on_deserialize_needed(
        &mut self,
        node: NodeId,
        callback: impl FnMut(&mut Namespace, NodeId, &[u8], &mut Option<DeserializeDone>) -> bool
            + 'static,
    ) -> CallbackId {
        let shared: Rc<RefCell<OnDeserializeNeededFn>> = Rc::new(RefCell::new(callback));
        self.nodes[node.0].on_deserialize_needed.add(shared)
    }

    /// Removes a registration from whichever registry of `node` holds it.
    pub fn remove_callback(&mut self, node: NodeId, id: CallbackId) {
        let entry = &mut self.nodes[node.0];
        entry.on_state_changed.remove(id);
        entry.on_validate_state_changed.remove(id);
        entry.on_object_needed.remove(id);
        entry.on_deserialize_needed.remove(id);
    }

    // ---- inherited configuration --------------------------------------

    pub fn set_key_chain(&mut self, node: NodeId, key_chain: Rc<dyn KeyChain>) {
        self.nodes[node.0].key_chain = Some(key_chain);
    }

    /// The nearest-ancestor keychain.
    pub fn key_chain(&self, node: NodeId) -> Option<Rc<dyn KeyChain>> {
        self.walk_up(node, |entry| entry.key_chain.clone())
    }

    pub fn set_decryptor(&mut self, node: NodeId, decryptor: Rc<dyn Decryptor>) {
        self.nodes[node.0].decryptor = Some(decryptor);
    }

    /// The nearest-ancestor decryptor.
    pub fn decryptor(&self, node: NodeId) -> Option<Rc<dyn Decryptor>> {
        self.walk_up(node, |entry| entry.decryptor.clone())
    }

    pub fn set_validator(&mut self, node: NodeId, validator: Rc<dyn Validator>) {
        self.nodes[node.0].validator = Some(validator);
    }

    /// The nearest-ancestor validator.
    pub fn validator(&self, node: NodeId) -> Option<Rc<dyn Validator>> {
        self.walk_up(node, |entry| entry.validator.clone())
    }

    pub fn set_new_data_meta_info(&mut self, node: NodeId, meta_info: MetaInfo) {
        self.nodes[node.0].new_data_meta_info = Some(meta_info);
    }

    /// The nearest-ancestor template applied to produced Data packets.
    pub fn new_data_meta_info(&self, node: NodeId) -> Option<MetaInfo> {
        self.walk_up(node, |entry| entry.new_data_meta_info.clone())
    }

    pub fn set_interest_lifetime(&mut self, node: NodeId, lifetime: Duration) {
        self.nodes[node.0].interest_lifetime = Some(lifetime);
    }

    /// The nearest-ancestor first-attempt Interest lifetime.
    pub fn interest_lifetime(&self, node: NodeId) -> Duration {
        self.walk_up(node, |entry| entry.interest_lifetime)
            .unwrap_or(DEFAULT_INTEREST_LIFETIME)
    }

    pub fn set_max_interest_lifetime(&mut self, node: NodeId, lifetime: Duration) {
        self.nodes[node.0].max_interest_lifetime = Some(lifetime);
    }

    /// The nearest-ancestor re-express lifetime cap.
    pub fn max_interest_lifetime(&self, node: NodeId) -> Duration {
        self.walk_up(node, |entry| entry.max_interest_lifetime)
            .unwrap_or(DEFAULT_MAX_INTEREST_LIFETIME)
    }

    pub fn set_sync_depth(&mut self, node: NodeId, depth: usize) {
        self.nodes[node.0].sync_depth = Some(depth);
    }

    /// The nearest-ancestor announcement depth for an external sync overlay.
    pub fn sync_depth(&self, node: NodeId) -> Option<usize> {
        self.walk_up(node, |entry| entry.sync_depth)
    }

    fn walk_up<T>(&self, node: NodeId, read: impl Fn(&NodeEntry) -> Option<T>) -> Option<T> {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if let Some(value) = read(&self.nodes[current.0]) {
                return Some(value);
            }
            cursor = self.nodes[current.0].parent;
        }
        None
    }

    // ---- faces ---------------------------------------------------------

    /// Attaches a face to this node; descendants inherit it.
    pub fn set_face(&mut self, node: NodeId, face: Rc<RefCell<dyn Face>>) {
        let slot = match self.faces.iter().position(|s| Rc::ptr_eq(&s.face, &face)) {
            Some(existing) => existing,
            None => {
                self.faces.push(FaceSlot { face });
                self.faces.len() - 1
            }
        };
        self.nodes[node.0].face_slot = Some(slot);
    }

    /// Removes the node's face and any prefix registration made through it.
    pub fn clear_face(&mut self, node: NodeId) {
        self.remove_registration(node);
        self.nodes[node.0].face_slot = None;
    }

    /// Registers this node's name as an Interest-answering prefix with the
    /// inherited face, creating the root pending-Interest table lazily.
    pub fn register_prefix(
        &mut self,
        node: NodeId,
        on_register_failed: Option<Box<dyn FnOnce(&mut Namespace, NodeId, String)>>,
        on_register_success: Option<Box<dyn FnOnce(&mut Namespace, NodeId)>>,
    ) -> Result<(), TreeError> {
        let slot = self.face_slot(node).ok_or(TreeError::NoFace)?;
        if self.pit.is_none() {
            self.pit = Some(PendingInterestTable::new());
        }
        let prefix = self.nodes[node.0].name.clone();
        let face = self.faces[slot].face.clone();
        let registration_id = face.borrow_mut().register_prefix(prefix);
        self.nodes[node.0].registration = Some((slot, registration_id));
        self.registrations.insert((slot, registration_id), node);
        self.register_waiters.insert(
            (slot, registration_id),
            RegisterWaiter {
                node,
                on_failed: on_register_failed,
                on_success: on_register_success,
            },
        );
        Ok(())
    }

    fn remove_registration(&mut self, node: NodeId) {
        if let Some((slot, registration_id)) = self.nodes[node.0].registration.take() {
            let face = self.faces[slot].face.clone();
            face.borrow_mut().remove_registered_prefix(registration_id);
            self.registrations.remove(&(slot, registration_id));
            self.register_waiters.remove(&(slot, registration_id));
        }
    }

    /// The nearest-ancestor face slot.
    pub(crate) fn face_slot(&self, node: NodeId) -> Option<usize> {
        self.walk_up(node, |entry| entry.face_slot)
    }

    pub(crate) fn face_now_slot(&self, slot: usize) -> Timestamp {
        self.faces[slot].face.borrow().now()
    }

    /// The clock of the node's inherited face; zero if no face is set.
    pub fn now(&self, node: NodeId) -> Timestamp {
        match self.face_slot(node) {
            Some(slot) => self.face_now_slot(slot),
            None => Timestamp::from_millis(0),
        }
    }

    fn any_now(&self) -> Timestamp {
        self.faces
            .first()
            .map(|slot| slot.face.borrow().now())
            .unwrap_or_else(|| Timestamp::from_millis(0))
    }

    /// Schedules `callback` on the node's inherited face clock.
    pub fn call_later(
        &mut self,
        node: NodeId,
        delay: Duration,
        callback: Box<dyn FnOnce(&mut Namespace)>,
    ) -> Result<(), TreeError> {
        let slot = self.face_slot(node).ok_or(TreeError::NoFace)?;
        let face = self.faces[slot].face.clone();
        let timer_id = face.borrow_mut().call_later(delay);
        self.timers.insert((slot, timer_id), callback);
        Ok(())
    }

    // ---- handlers ------------------------------------------------------

    /// Attaches a handler to this node's single handler slot.
    pub fn set_handler(&mut self, node: NodeId, mut handler: Box<dyn Handler>) -> Result<(), TreeError> {
        if self.nodes[node.0].handler.is_some() {
            return Err(TreeError::HandlerAlreadySet);
        }
        handler.attach(self, node)?;
        self.nodes[node.0].handler = Some(handler);
        Ok(())
    }

    pub fn has_handler(&self, node: NodeId) -> bool {
        self.nodes[node.0].handler.is_some()
    }

    /// Detaches and drops the node's handler, if any.
    pub fn clear_handler(&mut self, node: NodeId) {
        if let Some(mut handler) = self.nodes[node.0].handler.take() {
            handler.detach(self);
        }
    }

    // ---- state machine -------------------------------------------------

    /// Sets the node state and fires state-changed callbacks on the node and
    /// every ancestor, node first.
    pub(crate) fn set_state(&mut self, node: NodeId, state: NamespaceState) {
        if self.is_shut_down(node) {
            return;
        }
        self.nodes[node.0].state = state;
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            self.fire_on_state_changed(current, node, state);
            cursor = self.nodes[current.0].parent;
        }
    }

    pub(crate) fn set_validate_state(&mut self, node: NodeId, state: NamespaceValidateState) {
        if self.is_shut_down(node) {
            return;
        }
        self.nodes[node.0].validate_state = state;
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            self.fire_on_validate_state_changed(current, node, state);
            cursor = self.nodes[current.0].parent;
        }
    }

    fn fire_on_state_changed(&mut self, subscriber: NodeId, changed: NodeId, state: NamespaceState) {
        let snapshot = self.nodes[subscriber.0].on_state_changed.snapshot();
        for (id, callback) in snapshot {
            if !self.nodes[subscriber.0].on_state_changed.contains(id) {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut f) => (*f)(self, subscriber, changed, state),
                Err(_) => debug!(callback = id, "skipping re-entrant state-changed callback"),
            }
        }
    }

    fn fire_on_validate_state_changed(
        &mut self,
        subscriber: NodeId,
        changed: NodeId,
        state: NamespaceValidateState,
    ) {
        let snapshot = self.nodes[subscriber.0].on_validate_state_changed.snapshot();
        for (id, callback) in snapshot {
            if !self.nodes[subscriber.0].on_validate_state_changed.contains(id) {
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut f) => (*f)(self, subscriber, changed, state),
                Err(_) => {
                    debug!(callback = id, "skipping re-entrant validate-state callback")
                }
            }
        }
    }

    fn fire_object_needed_walk(&mut self, needed: NodeId) -> bool {
        let mut can_produce = false;
        let mut cursor = Some(needed);
        while let Some(current) = cursor {
            let snapshot = self.nodes[current.0].on_object_needed.snapshot();
            for (id, callback) in snapshot {
                if !self.nodes[current.0].on_object_needed.contains(id) {
                    continue;
                }
                match callback.try_borrow_mut() {
                    Ok(mut f) => {
                        if (*f)(self, current, needed) {
                            can_produce = true;
                        }
                    }
                    Err(_) => debug!(callback = id, "skipping re-entrant object-needed callback"),
                }
            }
            cursor = self.nodes[current.0].parent;
        }
        can_produce
    }

    // ---- core operations ----------------------------------------------

    /// Attaches a Data packet whose name equals this node's name.
    ///
    /// Returns whether the packet was accepted: a second packet at the same
    /// node is ignored. Pending incoming Interests are satisfied before any
    /// state-changed callback fires.
    pub fn set_data(&mut self, node: NodeId, data: Data) -> Result<bool, TreeError> {
        if self.is_shut_down(node) {
            return Ok(false);
        }
        if data.name() != &self.nodes[node.0].name {
            return Err(TreeError::DataNameMismatch);
        }
        if self.nodes[node.0].data.is_some() {
            return Ok(false);
        }

        let deadline = data.meta_info().freshness_period().and_then(|period| {
            self.face_slot(node)
                .map(|slot| self.face_now_slot(slot) + period)
        });
        self.nodes[node.0].data = Some(data.clone());
        self.nodes[node.0].freshness_deadline = deadline;

        self.satisfy_pending_interests(&data);
        self.set_state(node, NamespaceState::DataReceived);
        Ok(true)
    }

    fn satisfy_pending_interests(&mut self, data: &Data) {
        let now = self.any_now();
        let mut pit = self.pit.take();
        if let Some(table) = pit.as_mut() {
            let faces = &self.faces;
            table.satisfy(data, now, |slot, packet| {
                faces[slot].face.borrow_mut().put_data(packet)
            });
        }
        self.pit = pit;
    }

    /// Attaches a deserialized object and reports `ObjectReady`.
    pub fn set_object(&mut self, node: NodeId, object: NamespaceObject) {
        if self.is_shut_down(node) {
            return;
        }
        self.nodes[node.0].object = Some(object);
        self.set_state(node, NamespaceState::ObjectReady);
    }

    /// Serializes, signs and attaches `object` as this node's packet.
    ///
    /// A keychain failure is captured as `SigningError` state rather than an
    /// error return; a missing keychain fails fast.
    pub fn serialize_object(&mut self, node: NodeId, object: NamespaceObject) -> Result<(), TreeError> {
        if self.is_shut_down(node) {
            return Ok(());
        }
        let key_chain = self.key_chain(node).ok_or(TreeError::NoKeyChain)?;

        self.set_state(node, NamespaceState::Serializing);
        let content = match &object {
            NamespaceObject::Blob(bytes) => bytes.clone(),
            NamespaceObject::ContentMeta(meta) => meta.encode()?,
        };
        let mut data = Data::new(self.nodes[node.0].name.clone(), content);
        if let Some(meta_info) = self.new_data_meta_info(node) {
            data.set_meta_info(meta_info);
        }

        self.set_state(node, NamespaceState::Signing);
        if let Err(error) = key_chain.sign(&mut data) {
            self.nodes[node.0].error_message = Some(error.to_string());
            self.set_state(node, NamespaceState::SigningError);
            return Ok(());
        }

        self.set_data(node, data)?;
        self.set_object(node, object);
        Ok(())
    }

    /// Requests this node's object: re-announces a ready object, invites
    /// local producers, or expresses an Interest with re-expression.
    pub fn object_needed(&mut self, node: NodeId, must_be_fresh: bool) -> Result<(), TreeError> {
        if self.is_shut_down(node) {
            return Ok(());
        }

        if self.nodes[node.0].object.is_some() {
            let stale = match self.nodes[node.0].freshness_deadline {
                Some(deadline) => self.now(node) >= deadline,
                None => false,
            };
            if !stale {
                self.set_state(node, NamespaceState::ObjectReady);
                return Ok(());
            }
            self.set_state(node, NamespaceState::ObjectReadyButStale);
            if !must_be_fresh {
                return Ok(());
            }
        }

        if self.fire_object_needed_walk(node) {
            self.set_state(node, NamespaceState::ProducingObject);
            return Ok(());
        }

        self.express_interest_for(node, must_be_fresh)
    }

    pub(crate) fn express_interest_for(
        &mut self,
        node: NodeId,
        must_be_fresh: bool,
    ) -> Result<(), TreeError> {
        let slot = self.face_slot(node).ok_or(TreeError::NoFace)?;
        let lifetime = self.interest_lifetime(node);
        let mut interest = Interest::new(self.nodes[node.0].name.clone());
        interest.set_must_be_fresh(must_be_fresh);
        interest.set_lifetime(Some(lifetime));

        let face = self.faces[slot].face.clone();
        let interest_id = face.borrow_mut().express_interest(interest.clone());
        self.expressed.insert(
            (slot, interest_id),
            ExpressedInterest {
                node,
                interest,
                lifetime,
            },
        );
        self.set_state(node, NamespaceState::InterestExpressed);
        Ok(())
    }

    /// Offers content bytes to deserialize-needed listeners up the tree.
    ///
    /// The node reports `Deserializing`; the first listener that accepts is
    /// obligated to finish the handed-over [`DeserializeDone`]. With no
    /// listener the bytes become the node's blob object immediately.
    pub fn deserialize(&mut self, node: NodeId, blob: Vec<u8>, on_object_set: Option<OnObjectSet>) {
        if self.is_shut_down(node) {
            return;
        }
        self.set_state(node, NamespaceState::Deserializing);

        let mut done = Some(DeserializeDone::new(node, on_object_set));
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            let snapshot = self.nodes[current.0].on_deserialize_needed.snapshot();
            for (id, callback) in snapshot {
                if !self.nodes[current.0].on_deserialize_needed.contains(id) {
                    continue;
                }
                let accepted = match callback.try_borrow_mut() {
                    Ok(mut f) => (*f)(self, node, &blob, &mut done),
                    Err(_) => {
                        debug!(callback = id, "skipping re-entrant deserialize callback");
                        false
                    }
                };
                if accepted {
                    return;
                }
            }
            cursor = self.nodes[current.0].parent;
        }

        if let Some(done) = done.take() {
            done.finish(self, NamespaceObject::Blob(blob));
        }
    }

    pub(crate) fn finish_deserialize(
        &mut self,
        node: NodeId,
        object: NamespaceObject,
        on_object_set: Option<OnObjectSet>,
    ) {
        if self.is_shut_down(node) {
            return;
        }
        self.set_object(node, object);
        if let Some(callback) = on_object_set {
            callback(self, node);
        }
    }

    // ---- shutdown ------------------------------------------------------

    /// Marks this node and every descendant shut down: the prefix
    /// registration is removed, callback registries and handlers are
    /// dropped, and later mutating operations on the subtree are no-ops.
    pub fn shutdown(&mut self, node: NodeId) {
        self.shutdown_counter += 1;
        self.nodes[node.0].is_shut_down = true;
        self.remove_registration(node);

        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let entry = &mut self.nodes[current.0];
            entry.on_state_changed.clear();
            entry.on_validate_state_changed.clear();
            entry.on_object_needed.clear();
            entry.on_deserialize_needed.clear();
            entry.handler = None;
            stack.extend(entry.children.values().copied());
        }
    }

    /// Whether this node or an ancestor has been shut down.
    ///
    /// Cached per node against the root's shutdown counter so the common
    /// not-shut-down case is one comparison.
    pub fn is_shut_down(&mut self, node: NodeId) -> bool {
        let (seen, cached) = self.nodes[node.0].shutdown_cache;
        if seen == self.shutdown_counter {
            return cached;
        }

        let mut value = false;
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if self.nodes[current.0].is_shut_down {
                value = true;
                break;
            }
            cursor = self.nodes[current.0].parent;
        }
        self.nodes[node.0].shutdown_cache = (self.shutdown_counter, value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::{Namespace, NodeId};
    use crate::state::{NamespaceObject, NamespaceState};
    use nametree_codec::Data;
    use nametree_core::{Name, NameComponent};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn tree(uri: &str) -> Namespace {
        Namespace::new(Name::parse(uri))
    }

    #[test]
    fn get_descendant_creates_intermediates_silently() {
        let mut ns = tree("/a");
        let seen: Rc<RefCell<Vec<Name>>> = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let root = ns.root();
        ns.add_on_state_changed(root, move |ns, _subscriber, changed, state| {
            if state == NamespaceState::NameExists {
                log.borrow_mut().push(ns.name(changed).clone());
            }
        });

        let leaf = ns.node(&Name::parse("/a/b/c/d")).expect("descendant");
        assert_eq!(ns.name(leaf), &Name::parse("/a/b/c/d"));
        // Only the final leaf fires NameExists.
        assert_eq!(seen.borrow().as_slice(), &[Name::parse("/a/b/c/d")]);

        // Intermediates exist without having fired.
        assert!(ns.has_descendant(root, &Name::parse("/a/b/c")));
    }

    #[test]
    fn get_child_fires_name_exists_once() {
        let mut ns = tree("/a");
        let count = Rc::new(RefCell::new(0_usize));
        let log = count.clone();
        let root = ns.root();
        ns.add_on_state_changed(root, move |_, _, _, state| {
            if state == NamespaceState::NameExists {
                *log.borrow_mut() += 1;
            }
        });

        let first = ns.get_child(root, NameComponent::generic(b"x".to_vec()));
        let second = ns.get_child(root, NameComponent::generic(b"x".to_vec()));
        assert_eq!(first, second);
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn set_data_rejects_wrong_name_and_ignores_duplicates() {
        let mut ns = tree("/a");
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");

        let wrong = Data::new(Name::parse("/a/other"), Vec::new());
        assert!(ns.set_data(node, wrong).is_err());

        let right = Data::new(Name::parse("/a/b"), b"one".to_vec());
        assert!(ns.set_data(node, right).expect("accepts"));
        assert_eq!(ns.state(node), NamespaceState::DataReceived);

        let replacement = Data::new(Name::parse("/a/b"), b"two".to_vec());
        assert!(!ns.set_data(node, replacement).expect("ignored"));
        assert_eq!(ns.data(node).expect("kept").content(), b"one");
    }

    #[test]
    fn state_changes_fire_node_first_then_ancestors() {
        let mut ns = tree("/a");
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let root = ns.root();
        let child = ns.get_child(root, NameComponent::generic(b"b".to_vec()));

        let log = order.clone();
        ns.add_on_state_changed(child, move |_, _, _, _| log.borrow_mut().push("child"));
        let log = order.clone();
        ns.add_on_state_changed(root, move |_, _, _, _| log.borrow_mut().push("root"));

        ns.set_object(child, NamespaceObject::Blob(Vec::new()));
        assert_eq!(order.borrow().as_slice(), &["child", "root"]);
    }

    #[test]
    fn object_ready_refires_on_repeated_object_needed() {
        let mut ns = tree("/a");
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");
        ns.set_object(node, NamespaceObject::Blob(b"x".to_vec()));

        let count = Rc::new(RefCell::new(0_usize));
        let log = count.clone();
        ns.add_on_state_changed(node, move |_, _, _, state| {
            if state == NamespaceState::ObjectReady {
                *log.borrow_mut() += 1;
            }
        });

        ns.object_needed(node, false).expect("ready object");
        ns.object_needed(node, false).expect("ready object");
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn object_needed_prefers_local_producer() {
        let mut ns = tree("/a");
        let root = ns.root();
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");
        ns.add_on_object_needed(root, |_, _, _| true);

        ns.object_needed(node, false).expect("producer accepts");
        assert_eq!(ns.state(node), NamespaceState::ProducingObject);
    }

    #[test]
    fn object_needed_without_face_or_producer_fails_fast() {
        let mut ns = tree("/a");
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");
        assert!(ns.object_needed(node, false).is_err());
    }

    #[test]
    fn inherited_config_walks_to_the_nearest_ancestor() {
        let mut ns = tree("/a");
        let root = ns.root();
        let mid = ns.node(&Name::parse("/a/b")).expect("descendant");
        let leaf = ns.node(&Name::parse("/a/b/c")).expect("descendant");

        ns.set_interest_lifetime(root, std::time::Duration::from_millis(100));
        ns.set_interest_lifetime(mid, std::time::Duration::from_millis(250));

        assert_eq!(
            ns.interest_lifetime(leaf),
            std::time::Duration::from_millis(250)
        );
        assert_eq!(
            ns.interest_lifetime(root),
            std::time::Duration::from_millis(100)
        );
        assert_eq!(ns.sync_depth(leaf), None);
    }

    #[test]
    fn deserialize_defaults_to_a_blob_object() {
        let mut ns = tree("/a");
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");
        let done: Rc<RefCell<Option<NodeId>>> = Rc::new(RefCell::new(None));
        let log = done.clone();

        ns.deserialize(
            node,
            b"bytes".to_vec(),
            Some(Box::new(move |_, set_node| {
                *log.borrow_mut() = Some(set_node);
            })),
        );

        assert_eq!(*done.borrow(), Some(node));
        assert_eq!(ns.state(node), NamespaceState::ObjectReady);
        assert_eq!(
            ns.object(node).expect("blob").as_blob(),
            Some(&b"bytes"[..])
        );
    }

    #[test]
    fn deserialize_listener_can_take_over() {
        let mut ns = tree("/a");
        let root = ns.root();
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");

        ns.add_on_deserialize_needed(root, |ns, target, blob, done| {
            let mut upper = blob.to_vec();
            upper.make_ascii_uppercase();
            let done = done.take().expect("token available");
            assert_eq!(done.node(), target);
            done.finish(ns, NamespaceObject::Blob(upper));
            true
        });

        ns.deserialize(node, b"abc".to_vec(), None);
        assert_eq!(ns.object(node).expect("set").as_blob(), Some(&b"ABC"[..]));
    }

    #[test]
    fn shutdown_silences_the_subtree() {
        let mut ns = tree("/a");
        let root = ns.root();
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");
        let fired = Rc::new(RefCell::new(0_usize));
        let log = fired.clone();
        ns.add_on_state_changed(root, move |_, _, _, _| *log.borrow_mut() += 1);

        ns.shutdown(root);
        assert!(ns.is_shut_down(node));

        ns.set_object(node, NamespaceObject::Blob(Vec::new()));
        assert_eq!(ns.state(node), NamespaceState::NameExists);
        assert_eq!(*fired.borrow(), 0);
        assert!(!ns
            .set_data(node, Data::new(Name::parse("/a/b"), Vec::new()))
            .expect("no-op"));
    }

    #[test]
    fn callbacks_registered_during_a_pass_fire_next_pass() {
        let mut ns = tree("/a");
        let node = ns.node(&Name::parse("/a/b")).expect("descendant");
        let late_fired = Rc::new(RefCell::new(0_usize));

        let late = late_fired.clone();
        ns.add_on_state_changed(node, move |ns, subscriber, _, _| {
            let late = late.clone();
            ns.add_on_state_changed(subscriber, move |_, _, _, _| {
                *late.borrow_mut() += 1;
            });
        });

        ns.set_object(node, NamespaceObject::Blob(Vec::new()));
        assert_eq!(*late_fired.borrow(), 0);

        ns.set_object(node, NamespaceObject::Blob(Vec::new()));
        assert!(*late_fired.borrow() >= 1);
    }
}
