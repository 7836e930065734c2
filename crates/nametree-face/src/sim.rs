//! In-memory simulated network for tests and examples.
//!
//! A [`SimHub`] owns the clock and the routing state; each [`SimFace`] is a
//! cheap handle attached to the hub. Interests route to faces that
//! registered a matching prefix, Data routes back to faces with a matching
//! pending Interest, and time only moves when a test advances it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use nametree_codec::{Data, Interest, NackReason, NetworkNack};
use nametree_core::conventions::DEFAULT_INTEREST_LIFETIME;
use nametree_core::{Name, Timestamp};

use crate::{Face, FaceError, FaceEvent, InterestId, RegistrationId, TimerId};

struct PendingInterest {
    face_index: usize,
    interest_id: InterestId,
    interest: Interest,
    deadline: Timestamp,
}

struct Registration {
    face_index: usize,
    registration_id: RegistrationId,
    prefix: Name,
    active: bool,
}

struct PendingTimer {
    face_index: usize,
    timer_id: TimerId,
    due: Timestamp,
}

struct FaceState {
    inbox: VecDeque<FaceEvent>,
    fail_put_data: bool,
}

struct HubState {
    clock: Timestamp,
    next_id: u64,
    faces: Vec<FaceState>,
    pending: Vec<PendingInterest>,
    registrations: Vec<Registration>,
    timers: Vec<PendingTimer>,
    nack_prefixes: Vec<(Name, NackReason)>,
    reject_registrations: bool,
    sent_data: Vec<Name>,
    expressed: Vec<Interest>,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn route_interest(&mut self, from_face: usize, id: InterestId, interest: Interest) {
        for (prefix, reason) in &self.nack_prefixes {
            if prefix.is_prefix_of(interest.name()) {
                self.faces[from_face].inbox.push_back(FaceEvent::Nack {
                    interest_id: id,
                    interest,
                    nack: NetworkNack::new(*reason),
                });
                return;
            }
        }

        let lifetime = interest.lifetime().unwrap_or(DEFAULT_INTEREST_LIFETIME);
        self.pending.push(PendingInterest {
            face_index: from_face,
            interest_id: id,
            interest: interest.clone(),
            deadline: self.clock + lifetime,
        });

        for registration in &self.registrations {
            // Loopback delivery to the expressing face would echo every
            // request straight back to its own producer table.
            if !registration.active || registration.face_index == from_face {
                continue;
            }
            if registration.prefix.is_prefix_of(interest.name()) {
                self.faces[registration.face_index]
                    .inbox
                    .push_back(FaceEvent::IncomingInterest {
                        registration_id: registration.registration_id,
                        interest: interest.clone(),
                    });
            }
        }
    }

    fn route_data(&mut self, data: &Data) {
        let mut satisfied = Vec::new();
        for (index, pending) in self.pending.iter().enumerate() {
            if pending.interest.matches_data(data).unwrap_or(false) {
                satisfied.push(index);
            }
        }
        for index in satisfied.iter().rev() {
            let pending = self.pending.remove(*index);
            self.faces[pending.face_index]
                .inbox
                .push_back(FaceEvent::Data {
                    interest_id: pending.interest_id,
                    data: data.clone(),
                });
        }
        if !satisfied.is_empty() {
            debug!(name = %data.name(), n = satisfied.len(), "sim data satisfied interests");
        }
    }

    fn advance(&mut self, delta: Duration) {
        self.clock = self.clock + delta;
        let now = self.clock;

        let mut index = 0;
        while index < self.pending.len() {
            if self.pending[index].deadline <= now {
                let pending = self.pending.remove(index);
                self.faces[pending.face_index]
                    .inbox
                    .push_back(FaceEvent::Timeout {
                        interest_id: pending.interest_id,
                        interest: pending.interest,
                    });
            } else {
                index += 1;
            }
        }

        let mut index = 0;
        while index < self.timers.len() {
            if self.timers[index].due <= now {
                let timer = self.timers.remove(index);
                self.faces[timer.face_index]
                    .inbox
                    .push_back(FaceEvent::TimerFired {
                        timer_id: timer.timer_id,
                    });
            } else {
                index += 1;
            }
        }
    }
}

/// Owner of a simulated network: clock, routes and attached faces.
#[derive(Clone)]
pub struct SimHub {
    state: Rc<RefCell<HubState>>,
}

impl Default for SimHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHub {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HubState {
                clock: Timestamp::from_millis(0),
                next_id: 0,
                faces: Vec::new(),
                pending: Vec::new(),
                registrations: Vec::new(),
                timers: Vec::new(),
                nack_prefixes: Vec::new(),
                reject_registrations: false,
                sent_data: Vec::new(),
                expressed: Vec::new(),
            })),
        }
    }

    /// Attaches a new face to the hub.
    pub fn face(&self) -> SimFace {
        let mut state = self.state.borrow_mut();
        state.faces.push(FaceState {
            inbox: VecDeque::new(),
            fail_put_data: false,
        });
        SimFace {
            hub: self.state.clone(),
            face_index: state.faces.len() - 1,
        }
    }

    /// Moves the clock forward, firing timeouts and timers that come due.
    pub fn advance(&self, delta: Duration) {
        self.state.borrow_mut().advance(delta);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// The current simulated time.
    pub fn now(&self) -> Timestamp {
        self.state.borrow().clock
    }

    /// Makes the hub NACK every Interest under `prefix`.
    pub fn nack_prefix(&self, prefix: Name, reason: NackReason) {
        self.state.borrow_mut().nack_prefixes.push((prefix, reason));
    }

    /// Stops NACKing a previously failed prefix.
    pub fn clear_nack_prefixes(&self) {
        self.state.borrow_mut().nack_prefixes.clear();
    }

    /// Makes subsequent `register_prefix` calls fail.
    pub fn reject_registrations(&self, reject: bool) {
        self.state.borrow_mut().reject_registrations = reject;
    }

    /// Makes `put_data` on `face` return an error.
    pub fn fail_put_data(&self, face: &SimFace, fail: bool) {
        self.state.borrow_mut().faces[face.face_index].fail_put_data = fail;
    }

    /// Drains the log of Data names transmitted by any face.
    pub fn take_sent_data(&self) -> Vec<Name> {
        std::mem::take(&mut self.state.borrow_mut().sent_data)
    }

    /// Drains the log of Interests expressed by any face.
    pub fn take_expressed_interests(&self) -> Vec<Interest> {
        std::mem::take(&mut self.state.borrow_mut().expressed)
    }
}

/// One endpoint attached to a [`SimHub`].
#[derive(Clone)]
pub struct SimFace {
    hub: Rc<RefCell<HubState>>,
    face_index: usize,
}

impl Face for SimFace {
    fn express_interest(&mut self, interest: Interest) -> InterestId {
        let mut state = self.hub.borrow_mut();
        let id = state.next_id();
        state.expressed.push(interest.clone());
        state.route_interest(self.face_index, id, interest);
        id
    }

    fn register_prefix(&mut self, prefix: Name) -> RegistrationId {
        let mut state = self.hub.borrow_mut();
        let id = state.next_id();
        let success = !state.reject_registrations;
        state.registrations.push(Registration {
            face_index: self.face_index,
            registration_id: id,
            prefix,
            active: success,
        });
        state.faces[self.face_index]
            .inbox
            .push_back(FaceEvent::RegisterStatus {
                registration_id: id,
                success,
                reason: if success {
                    String::new()
                } else {
                    "registration rejected by hub".to_string()
                },
            });
        id
    }

    fn remove_registered_prefix(&mut self, registration_id: RegistrationId) {
        let mut state = self.hub.borrow_mut();
        state
            .registrations
            .retain(|r| r.registration_id != registration_id);
    }

    fn put_data(&mut self, data: &Data) -> Result<(), FaceError> {
        let mut state = self.hub.borrow_mut();
        if state.faces[self.face_index].fail_put_data {
            return Err(FaceError::Send("simulated link failure".to_string()));
        }
        state.sent_data.push(data.name().clone());
        state.route_data(data);
        Ok(())
    }

    fn call_later(&mut self, delay: Duration) -> TimerId {
        let mut state = self.hub.borrow_mut();
        let id = state.next_id();
        let due = state.clock + delay;
        state.timers.push(PendingTimer {
            face_index: self.face_index,
            timer_id: id,
            due,
        });
        id
    }

    fn now(&self) -> Timestamp {
        self.hub.borrow().clock
    }

    fn poll(&mut self) -> Option<FaceEvent> {
        self.hub.borrow_mut().faces[self.face_index].inbox.pop_front()
    }
}
