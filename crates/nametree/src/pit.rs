//! Producer-side pending incoming Interest table.
//!
//! Interests that arrive before matching Data exists wait here; every
//! `set_data` anywhere under a registered prefix consults the table before
//! any callback fires, so waiting consumers see the packet with minimum
//! latency.

use tracing::{debug, warn};

use nametree_codec::{Data, Interest};
use nametree_core::Timestamp;
use nametree_face::FaceError;

struct PendingEntry {
    interest: Interest,
    face_slot: usize,
    deadline: Option<Timestamp>,
}

impl PendingEntry {
    fn is_timed_out(&self, now: Timestamp) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }
}

/// Table of unmatched incoming Interests, retired on timeout or match.
#[derive(Default)]
pub struct PendingInterestTable {
    entries: Vec<PendingEntry>,
}

impl PendingInterestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an Interest received on `face_slot` at `now`.
    ///
    /// The entry expires after the Interest's lifetime; no lifetime means it
    /// waits indefinitely.
    pub fn add(&mut self, interest: Interest, face_slot: usize, now: Timestamp) {
        let deadline = interest.lifetime().map(|lifetime| now + lifetime);
        self.entries.push(PendingEntry {
            interest,
            face_slot,
            deadline,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sends `data` for every matching entry and drops expired ones.
    ///
    /// Walks the table in reverse so removal is cheap; send failures are
    /// logged and the entry is still retired.
    pub fn satisfy(
        &mut self,
        data: &Data,
        now: Timestamp,
        mut send: impl FnMut(usize, &Data) -> Result<(), FaceError>,
    ) {
        for index in (0..self.entries.len()).rev() {
            if self.entries[index].is_timed_out(now) {
                self.entries.remove(index);
                continue;
            }

            let matches = self.entries[index]
                .interest
                .matches_data(data)
                .unwrap_or(false);
            if !matches {
                continue;
            }

            let entry = self.entries.remove(index);
            debug!(name = %data.name(), "satisfying pending interest");
            if let Err(error) = send(entry.face_slot, data) {
                warn!(name = %data.name(), %error, "failed to send data for pending interest");
            }
        }
    }
}
