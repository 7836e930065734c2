//! Face event dispatch: one turn of the cooperative event loop.
//!
//! Completions drained from attached faces drive the per-node state
//! machines; arriving Interests run the producer-side mediation path
//! (best-match answer, or buffer in the pending table and invite
//! producers).

use tracing::{debug, warn};

use nametree_codec::{Data, Interest};
use nametree_core::Timestamp;
use nametree_face::FaceEvent;

use crate::namespace::{ExpressedInterest, Namespace, NodeId};
use crate::state::{NamespaceState, NamespaceValidateState};

impl Namespace {
    /// Drains every attached face and dispatches until no events remain.
    pub fn process_events(&mut self) {
        loop {
            let mut progressed = false;
            for slot in 0..self.faces.len() {
                loop {
                    let event = {
                        let face = self.faces[slot].face.clone();
                        let polled = face.borrow_mut().poll();
                        polled
                    };
                    let Some(event) = event else { break };
                    progressed = true;
                    self.dispatch_face_event(slot, event);
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn dispatch_face_event(&mut self, slot: usize, event: FaceEvent) {
        match event {
            FaceEvent::Data { interest_id, data } => {
                if let Some(expressed) = self.expressed.remove(&(slot, interest_id)) {
                    self.handle_data(expressed.node, data);
                }
            }
            FaceEvent::Timeout {
                interest_id,
                interest: _,
            } => {
                if let Some(expressed) = self.expressed.remove(&(slot, interest_id)) {
                    self.handle_timeout(slot, expressed);
                }
            }
            FaceEvent::Nack {
                interest_id,
                interest: _,
                nack,
            } => {
                if let Some(expressed) = self.expressed.remove(&(slot, interest_id)) {
                    let node = expressed.node;
                    if self.is_shut_down(node) {
                        return;
                    }
                    self.nodes[node.0].network_nack = Some(nack);
                    self.set_state(node, NamespaceState::InterestNetworkNack);
                }
            }
            FaceEvent::IncomingInterest {
                registration_id,
                interest,
            } => {
                if let Some(node) = self.registrations.get(&(slot, registration_id)).copied() {
                    if !self.is_shut_down(node) {
                        self.handle_incoming_interest(node, slot, interest);
                    }
                }
            }
            FaceEvent::TimerFired { timer_id } => {
                if let Some(callback) = self.timers.remove(&(slot, timer_id)) {
                    callback(self);
                }
            }
            FaceEvent::RegisterStatus {
                registration_id,
                success,
                reason,
            } => {
                if let Some(waiter) = self.register_waiters.remove(&(slot, registration_id)) {
                    if success {
                        debug!(node = %self.nodes[waiter.node.0].name, "prefix registered");
                        if let Some(on_success) = waiter.on_success {
                            on_success(self, waiter.node);
                        }
                    } else {
                        warn!(node = %self.nodes[waiter.node.0].name, %reason, "prefix registration failed");
                        if let Some(on_failed) = waiter.on_failed {
                            on_failed(self, waiter.node, reason);
                        }
                    }
                }
            }
        }
    }

    /// Routes an arriving Data packet to its node: attach, validate,
    /// decrypt if configured, then deserialize.
    fn handle_data(&mut self, requested: NodeId, data: Data) {
        if self.is_shut_down(requested) {
            return;
        }
        let root = self.root();
        if !self.nodes[root.0].name.is_prefix_of(data.name()) {
            warn!(name = %data.name(), "dropping data outside the tree root");
            return;
        }
        let name = data.name().clone();
        let target = match self.get_descendant(root, &name) {
            Ok(target) => target,
            Err(error) => {
                warn!(name = %data.name(), %error, "cannot place arriving data");
                return;
            }
        };

        let accepted = match self.set_data(target, data) {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "rejecting arriving data");
                return;
            }
        };

        if accepted {
            if let Some(validator) = self.validator(target) {
                self.set_validate_state(target, NamespaceValidateState::Validating);
                let packet = self.nodes[target.0].data.clone();
                if let Some(packet) = packet {
                    match validator.validate(&packet) {
                        Ok(()) => {
                            self.set_validate_state(target, NamespaceValidateState::ValidateSuccess)
                        }
                        Err(error) => {
                            self.nodes[target.0].error_message = Some(error.to_string());
                            self.set_validate_state(target, NamespaceValidateState::ValidateFailure);
                        }
                    }
                }
            }
        }

        // A repeated answer still re-runs the deserialize chain so listeners
        // observe ObjectReady again.
        let content = match self.nodes[target.0].data.as_ref() {
            Some(packet) => packet.content().to_vec(),
            None => return,
        };

        if let Some(decryptor) = self.decryptor(target) {
            self.set_state(target, NamespaceState::Decrypting);
            let packet = match self.nodes[target.0].data.clone() {
                Some(packet) => packet,
                None => return,
            };
            match decryptor.decrypt(&packet) {
                Ok(plaintext) => self.deserialize(target, plaintext, None),
                Err(error) => {
                    self.nodes[target.0].error_message = Some(error.to_string());
                    self.set_state(target, NamespaceState::DecryptionError);
                }
            }
        } else {
            self.deserialize(target, content, None);
        }
    }

    /// Exponential re-express: double the lifetime up to the inherited cap,
    /// then surface the final timeout.
    fn handle_timeout(&mut self, slot: usize, expressed: ExpressedInterest) {
        let node = expressed.node;
        if self.is_shut_down(node) {
            return;
        }
        let doubled = expressed.lifetime * 2;
        let cap = self.max_interest_lifetime(node);
        if doubled > cap {
            debug!(name = %self.nodes[node.0].name, "final interest timeout");
            self.set_state(node, NamespaceState::InterestTimeout);
            return;
        }

        let mut interest = expressed.interest;
        interest.set_lifetime(Some(doubled));
        debug!(name = %self.nodes[node.0].name, lifetime_ms = doubled.as_millis() as u64, "re-expressing interest");
        let face = self.faces[slot].face.clone();
        let interest_id = face.borrow_mut().express_interest(interest.clone());
        self.expressed.insert(
            (slot, interest_id),
            ExpressedInterest {
                node,
                interest,
                lifetime: doubled,
            },
        );
    }

    /// Producer-side mediation for an Interest arriving under a registered
    /// prefix: answer from the best matching cached Data, or buffer the
    /// Interest and invite producers at the addressed node.
    fn handle_incoming_interest(&mut self, registered: NodeId, slot: usize, interest: Interest) {
        let name = interest.name().without_implicit_digest();
        if !self.nodes[registered.0].name.is_prefix_of(&name) {
            return;
        }
        let now = self.face_now_slot(slot);

        if let Some(existing) = self.find_descendant(self.root(), &name) {
            if let Some(best) = self.find_best_match(existing, &interest, now) {
                if let Some(data) = self.nodes[best.0].data.clone() {
                    debug!(name = %data.name(), "answering interest from cached data");
                    let face = self.faces[slot].face.clone();
                    if let Err(error) = face.borrow_mut().put_data(&data) {
                        warn!(name = %data.name(), %error, "failed to send matched data");
                    }
                    return;
                }
            }
        }

        let target = match self.get_descendant(self.root(), &name) {
            Ok(target) => target,
            Err(_) => return,
        };
        if let Some(pit) = self.pit.as_mut() {
            pit.add(interest, slot, now);
        }
        if let Err(error) = self.object_needed(target, false) {
            debug!(name = %self.nodes[target.0].name, %error, "no producer for buffered interest");
        }
    }

    /// Finds the node whose Data best matches `interest`.
    ///
    /// Children are searched before the node itself, in reverse canonical
    /// order, so the deepest rightmost candidate wins. A candidate must
    /// still be fresh when the Interest demands freshness, and its Data
    /// must actually match the Interest.
    pub(crate) fn find_best_match(
        &self,
        node: NodeId,
        interest: &Interest,
        now: Timestamp,
    ) -> Option<NodeId> {
        let children: Vec<NodeId> = self.nodes[node.0].children.values().rev().copied().collect();
        for child in children {
            if let Some(found) = self.find_best_match(child, interest, now) {
                return Some(found);
            }
        }

        let entry = &self.nodes[node.0];
        let data = entry.data.as_ref()?;
        if interest.must_be_fresh() {
            if let Some(deadline) = entry.freshness_deadline {
                if now >= deadline {
                    return None;
                }
            }
        }
        if interest.matches_data(data).unwrap_or(false) {
            return Some(node);
        }
        None
    }
}
