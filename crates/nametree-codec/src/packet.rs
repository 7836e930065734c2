use std::time::Duration;

use serde::{Deserialize, Serialize};

use nametree_core::hash::sha256_32;
use nametree_core::{Name, NameComponent};

use crate::error::CodecError;

/// Signature carried by a Data packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureValue {
    /// No signature attached yet (packet under construction).
    Unsigned,
    /// Digest-only signature; a zero digest is the manifest-mode placeholder.
    DigestSha256 { digest: [u8; 32] },
    /// Ed25519 signature by the named key.
    Ed25519 { key_name: Name, signature: Vec<u8> },
}

impl SignatureValue {
    /// The all-zero digest placeholder used before a manifest covers a segment.
    pub fn digest_placeholder() -> Self {
        SignatureValue::DigestSha256 { digest: [0_u8; 32] }
    }

    /// Whether this is a digest-only signature (manifest-coordinated).
    pub fn is_digest_only(&self) -> bool {
        matches!(self, SignatureValue::DigestSha256 { .. })
    }
}

/// Data packet metadata: freshness and final-block marker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaInfo {
    freshness_period_ms: Option<u64>,
    final_block_id: Option<NameComponent>,
}

impl MetaInfo {
    /// How long a cached copy may satisfy `must_be_fresh` Interests.
    pub fn freshness_period(&self) -> Option<Duration> {
        self.freshness_period_ms.map(Duration::from_millis)
    }

    pub fn set_freshness_period(&mut self, period: Option<Duration>) {
        self.freshness_period_ms = period.map(|p| p.as_millis() as u64);
    }

    /// The component value of the last block in a segmented object.
    pub fn final_block_id(&self) -> Option<&NameComponent> {
        self.final_block_id.as_ref()
    }

    pub fn set_final_block_id(&mut self, component: Option<NameComponent>) {
        self.final_block_id = component;
    }
}

/// A named, signed content packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    name: Name,
    meta_info: MetaInfo,
    content: Vec<u8>,
    signature: SignatureValue,
}

/// Canonical signed subset: everything except the signature itself.
#[derive(Serialize)]
struct SignedPortion<'a> {
    name: &'a Name,
    meta_info: &'a MetaInfo,
    content: &'a [u8],
}

impl Data {
    /// Creates an unsigned Data packet with empty metadata.
    pub fn new(name: Name, content: Vec<u8>) -> Self {
        Self {
            name,
            meta_info: MetaInfo::default(),
            content,
            signature: SignatureValue::Unsigned,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn meta_info(&self) -> &MetaInfo {
        &self.meta_info
    }

    pub fn meta_info_mut(&mut self) -> &mut MetaInfo {
        &mut self.meta_info
    }

    pub fn set_meta_info(&mut self, meta_info: MetaInfo) {
        self.meta_info = meta_info;
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn signature(&self) -> &SignatureValue {
        &self.signature
    }

    pub fn set_signature(&mut self, signature: SignatureValue) {
        self.signature = signature;
    }

    /// Encodes the canonical signed subset used as a signature preimage.
    pub fn signed_portion_cbor(&self) -> Result<Vec<u8>, CodecError> {
        let portion = SignedPortion {
            name: &self.name,
            meta_info: &self.meta_info,
            content: &self.content,
        };
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&portion, &mut bytes)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// SHA-256 of the canonical full encoding, the packet's implicit digest.
    pub fn implicit_digest(&self) -> Result<[u8; 32], CodecError> {
        Ok(sha256_32(&encode_data_cbor(self)?))
    }

    /// The packet name with the implicit digest appended.
    pub fn full_name(&self) -> Result<Name, CodecError> {
        Ok(self
            .name
            .child(NameComponent::from_implicit_digest(self.implicit_digest()?)))
    }
}

/// Encodes a Data packet in the canonical CBOR form.
pub fn encode_data_cbor(data: &Data) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(data, &mut bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a Data packet from the canonical CBOR form.
pub fn decode_data_cbor(bytes: &[u8]) -> Result<Data, CodecError> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// A request for a Data packet under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    name: Name,
    can_be_prefix: bool,
    must_be_fresh: bool,
    lifetime_ms: Option<u64>,
}

impl Interest {
    /// Creates a prefix-matching Interest with no lifetime set.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            can_be_prefix: true,
            must_be_fresh: false,
            lifetime_ms: None,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn can_be_prefix(&self) -> bool {
        self.can_be_prefix
    }

    pub fn set_can_be_prefix(&mut self, can_be_prefix: bool) {
        self.can_be_prefix = can_be_prefix;
    }

    pub fn must_be_fresh(&self) -> bool {
        self.must_be_fresh
    }

    pub fn set_must_be_fresh(&mut self, must_be_fresh: bool) {
        self.must_be_fresh = must_be_fresh;
    }

    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime_ms.map(Duration::from_millis)
    }

    pub fn set_lifetime(&mut self, lifetime: Option<Duration>) {
        self.lifetime_ms = lifetime.map(|l| l.as_millis() as u64);
    }

    /// Prefix/exact name matching, ignoring any trailing implicit digest.
    pub fn matches_name(&self, name: &Name) -> bool {
        let own = self.name.without_implicit_digest();
        if self.can_be_prefix {
            own.is_prefix_of(name)
        } else {
            own == *name
        }
    }

    /// Whether `data` satisfies this Interest, including digest verification
    /// when the Interest name carries a trailing implicit digest.
    pub fn matches_data(&self, data: &Data) -> Result<bool, CodecError> {
        match self.name.last() {
            Some(last) if last.is_implicit_digest() => {
                if self.name.prefix(self.name.len() - 1) != *data.name() {
                    return Ok(false);
                }
                Ok(last.value() == data.implicit_digest()?.as_slice())
            }
            _ => Ok(self.matches_name(data.name())),
        }
    }
}

/// Reason reported with a network-level NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackReason {
    Congestion,
    Duplicate,
    NoRoute,
    Unspecified,
}

/// A network-level negative acknowledgement for an Interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkNack {
    pub reason: NackReason,
}

impl NetworkNack {
    pub fn new(reason: NackReason) -> Self {
        Self { reason }
    }
}
