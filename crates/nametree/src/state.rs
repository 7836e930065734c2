use nametree_codec::ContentMetaInfo;

/// Per-node lifecycle state.
///
/// The declaration order is meaningful: pipeline code relies on
/// `state >= InterestExpressed` to mean "a request for this node has been
/// issued or resolved".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamespaceState {
    /// The node exists in the tree; nothing has been requested or produced.
    NameExists,
    /// An Interest for this name is outstanding.
    InterestExpressed,
    /// The final re-expression attempt timed out.
    InterestTimeout,
    /// The network refused the Interest; the NACK is retained on the node.
    InterestNetworkNack,
    /// A Data packet with this node's name was attached.
    DataReceived,
    /// A deserializer accepted the content and has not finished yet.
    Deserializing,
    /// An inherited decryptor is processing the content.
    Decrypting,
    /// Decryption failed; the message is retained on the node.
    DecryptionError,
    /// A local producer accepted responsibility for this name.
    ProducingObject,
    /// The object is being serialized into packet content.
    Serializing,
    Encrypting,
    EncryptionError,
    /// The inherited keychain is signing the packet.
    Signing,
    /// Signing failed; the message is retained on the node.
    SigningError,
    /// The deserialized object is attached and current.
    ObjectReady,
    /// The object is attached but its freshness deadline has passed.
    ObjectReadyButStale,
}

/// Validation track, independent of the fetch/deserialize lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamespaceValidateState {
    WaitingForData,
    Validating,
    ValidateSuccess,
    ValidateFailure,
}

/// A node's deserialized application object.
///
/// The default variant is a byte blob; handlers introduce richer variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceObject {
    /// Raw content bytes.
    Blob(Vec<u8>),
    /// A decoded `_meta` payload.
    ContentMeta(ContentMetaInfo),
}

impl NamespaceObject {
    /// The blob bytes, if this is the blob variant.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            NamespaceObject::Blob(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The decoded meta info, if this is the content-meta variant.
    pub fn as_content_meta(&self) -> Option<&ContentMetaInfo> {
        match self {
            NamespaceObject::ContentMeta(meta) => Some(meta),
            _ => None,
        }
    }
}
