use serde::{Deserialize, Serialize};

use nametree_core::Timestamp;

use crate::error::CodecError;

/// Payload of a generalized object's `_meta` packet.
///
/// When `has_segments` is false, `other` carries the entire object inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetaInfo {
    pub content_type: String,
    pub timestamp: Timestamp,
    pub has_segments: bool,
    pub other: Vec<u8>,
}

impl ContentMetaInfo {
    /// Encodes in the canonical CBOR form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from the canonical CBOR form.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
