use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Typed name component kinds, ordered by their numeric convention codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    /// SHA-256 digest of a packet's canonical encoding.
    ImplicitSha256Digest = 1,
    /// Opaque application bytes.
    Generic = 8,
    /// Unsigned segment number.
    Segment = 50,
    /// Unsigned version number.
    Version = 54,
    /// Unsigned sequence number.
    SequenceNumber = 58,
}

/// One component of a hierarchical name: a type tag plus opaque bytes.
///
/// Number-typed components store the value as minimal big-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameComponent {
    typ: ComponentType,
    value: Vec<u8>,
}

fn encode_number(mut number: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    loop {
        out.push((number & 0xff) as u8);
        number >>= 8;
        if number == 0 {
            break;
        }
    }
    out.reverse();
    out
}

fn decode_number(bytes: &[u8]) -> Result<u64, CoreError> {
    if bytes.len() > 8 {
        return Err(CoreError::NumberOverflow);
    }
    let mut number = 0_u64;
    for byte in bytes {
        number = (number << 8) | u64::from(*byte);
    }
    Ok(number)
}

impl NameComponent {
    /// Creates a generic component from raw bytes.
    pub fn generic(value: impl Into<Vec<u8>>) -> Self {
        Self {
            typ: ComponentType::Generic,
            value: value.into(),
        }
    }

    /// Creates a segment-number component.
    pub fn from_segment(segment: u64) -> Self {
        Self {
            typ: ComponentType::Segment,
            value: encode_number(segment),
        }
    }

    /// Creates a sequence-number component.
    pub fn from_sequence_number(sequence: u64) -> Self {
        Self {
            typ: ComponentType::SequenceNumber,
            value: encode_number(sequence),
        }
    }

    /// Creates a version component.
    pub fn from_version(version: u64) -> Self {
        Self {
            typ: ComponentType::Version,
            value: encode_number(version),
        }
    }

    /// Creates an implicit SHA-256 digest component.
    pub fn from_implicit_digest(digest: [u8; 32]) -> Self {
        Self {
            typ: ComponentType::ImplicitSha256Digest,
            value: digest.to_vec(),
        }
    }

    /// The component's type tag.
    pub fn component_type(&self) -> ComponentType {
        self.typ
    }

    /// The component's raw value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_generic(&self) -> bool {
        self.typ == ComponentType::Generic
    }

    pub fn is_segment(&self) -> bool {
        self.typ == ComponentType::Segment
    }

    pub fn is_sequence_number(&self) -> bool {
        self.typ == ComponentType::SequenceNumber
    }

    pub fn is_version(&self) -> bool {
        self.typ == ComponentType::Version
    }

    pub fn is_implicit_digest(&self) -> bool {
        self.typ == ComponentType::ImplicitSha256Digest
    }

    /// Decodes the segment number; errors if this is not a segment component.
    pub fn to_segment(&self) -> Result<u64, CoreError> {
        if !self.is_segment() {
            return Err(CoreError::WrongComponentType("segment"));
        }
        decode_number(&self.value)
    }

    /// Decodes the sequence number; errors if this is not a sequence component.
    pub fn to_sequence_number(&self) -> Result<u64, CoreError> {
        if !self.is_sequence_number() {
            return Err(CoreError::WrongComponentType("sequence number"));
        }
        decode_number(&self.value)
    }

    /// Decodes the version number; errors if this is not a version component.
    pub fn to_version(&self) -> Result<u64, CoreError> {
        if !self.is_version() {
            return Err(CoreError::WrongComponentType("version"));
        }
        decode_number(&self.value)
    }

    /// Returns the next component of the same type in canonical order.
    ///
    /// The value is treated as an unsigned big-endian integer; a carry out of
    /// the highest byte grows the value by one byte.
    pub fn successor(&self) -> NameComponent {
        let mut value = self.value.clone();
        let mut carry = true;
        for byte in value.iter_mut().rev() {
            let (next, overflowed) = byte.overflowing_add(1);
            *byte = next;
            if !overflowed {
                carry = false;
                break;
            }
        }
        if carry {
            value.insert(0, 1);
        }
        NameComponent {
            typ: self.typ,
            value,
        }
    }
}

impl PartialOrd for NameComponent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NameComponent {
    /// Canonical order: type code, then value length, then value bytes.
    fn cmp(&self, other: &Self) -> Ordering {
        self.typ
            .cmp(&other.typ)
            .then_with(|| self.value.len().cmp(&other.value.len()))
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.typ {
            ComponentType::Generic => {
                for byte in &self.value {
                    if byte.is_ascii_graphic() && *byte != b'%' && *byte != b'/' {
                        write!(f, "{}", *byte as char)?;
                    } else {
                        write!(f, "%{byte:02X}")?;
                    }
                }
                Ok(())
            }
            ComponentType::Segment => write!(f, "seg={}", decode_number(&self.value).unwrap_or(0)),
            ComponentType::SequenceNumber => {
                write!(f, "seq={}", decode_number(&self.value).unwrap_or(0))
            }
            ComponentType::Version => write!(f, "v={}", decode_number(&self.value).unwrap_or(0)),
            ComponentType::ImplicitSha256Digest => {
                write!(f, "sha256digest=")?;
                for byte in &self.value {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// An ordered sequence of typed components identifying one tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    /// Creates an empty name (the conventional root).
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a URI-style name such as `/alice/files/report`.
    ///
    /// Path parts with a `seg=`, `seq=` or `v=` prefix and a decimal value
    /// parse as typed number components; everything else is generic bytes.
    pub fn parse(uri: &str) -> Self {
        let mut components = Vec::new();
        for part in uri.split('/') {
            if part.is_empty() {
                continue;
            }
            let component = typed_part(part, "seg=", NameComponent::from_segment)
                .or_else(|| typed_part(part, "seq=", NameComponent::from_sequence_number))
                .or_else(|| typed_part(part, "v=", NameComponent::from_version))
                .unwrap_or_else(|| NameComponent::generic(part.as_bytes()));
            components.push(component);
        }
        Self { components }
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The component at `index`, if in range.
    pub fn component(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    /// The final component, if any.
    pub fn last(&self) -> Option<&NameComponent> {
        self.components.last()
    }

    /// All components in order.
    pub fn components(&self) -> &[NameComponent] {
        &self.components
    }

    /// Returns a new name with `component` appended.
    pub fn child(&self, component: NameComponent) -> Name {
        let mut components = self.components.clone();
        components.push(component);
        Name { components }
    }

    /// Appends a component in place.
    pub fn push(&mut self, component: NameComponent) {
        self.components.push(component);
    }

    /// Returns the first `count` components as a new name.
    pub fn prefix(&self, count: usize) -> Name {
        Name {
            components: self.components[..count.min(self.components.len())].to_vec(),
        }
    }

    /// Returns a copy without a trailing implicit digest component.
    pub fn without_implicit_digest(&self) -> Name {
        match self.last() {
            Some(last) if last.is_implicit_digest() => self.prefix(self.len() - 1),
            _ => self.clone(),
        }
    }

    /// Whether every component of `self` prefixes `other` in order.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len() && self.components[..] == other.components[..self.len()]
    }
}

fn typed_part(
    part: &str,
    prefix: &str,
    build: fn(u64) -> NameComponent,
) -> Option<NameComponent> {
    part.strip_prefix(prefix)
        .and_then(|rest| rest.parse::<u64>().ok())
        .map(build)
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    /// Canonical order: component-wise, with a proper prefix sorting first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl From<&str> for Name {
    fn from(uri: &str) -> Self {
        Name::parse(uri)
    }
}
