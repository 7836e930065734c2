use thiserror::Error;

use nametree_codec::CodecError;

/// Errors returned by tree operations.
///
/// Configuration mistakes fail fast here; transient network and
/// cryptographic failures surface as node state instead.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The given name does not extend this node's name.
    #[error("name is not a descendant of this node")]
    NotADescendant,
    /// A Data packet's name does not equal the node name.
    #[error("data name does not equal the node name")]
    DataNameMismatch,
    /// No Face is set on the node or any ancestor.
    #[error("no face is set on this node or an ancestor")]
    NoFace,
    /// No KeyChain is set on the node or any ancestor.
    #[error("no keychain is set on this node or an ancestor")]
    NoKeyChain,
    /// The node already has an attached handler.
    #[error("this node already has a handler")]
    HandlerAlreadySet,
    /// The handler is already bound to another node.
    #[error("the handler is already attached to a namespace node")]
    HandlerAlreadyAttached,
    /// A handler or tree parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// Signing failed while producing a packet.
    #[error("signing failed: {0}")]
    Signing(String),
    /// Packet encoding/decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
