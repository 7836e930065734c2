use serde::{Deserialize, Serialize};

use nametree_core::Name;

use crate::error::CodecError;

/// One `(preference, name)` pair in a delegation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub preference: i32,
    pub name: Name,
}

/// Payload of a `_latest` packet: an ordered list of delegations.
///
/// The first entry is authoritative; further entries are advisory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelegationSet {
    delegations: Vec<Delegation>,
}

impl DelegationSet {
    /// Creates a one-entry set pointing at `name`.
    pub fn single(preference: i32, name: Name) -> Self {
        Self {
            delegations: vec![Delegation { preference, name }],
        }
    }

    /// Appends a delegation, keeping the list sorted by preference.
    pub fn push(&mut self, preference: i32, name: Name) {
        let at = self
            .delegations
            .partition_point(|d| d.preference <= preference);
        self.delegations.insert(at, Delegation { preference, name });
    }

    /// The authoritative first entry.
    pub fn first(&self) -> Option<&Delegation> {
        self.delegations.first()
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    /// Encodes in the canonical CBOR form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.delegations.is_empty() {
            return Err(CodecError::InvalidPacket("empty delegation set"));
        }
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from the canonical CBOR form; at least one entry is required.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let set: DelegationSet =
            ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        if set.delegations.is_empty() {
            return Err(CodecError::InvalidPacket("empty delegation set"));
        }
        Ok(set)
    }
}
