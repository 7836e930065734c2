use thiserror::Error;

/// Errors returned by packet validation and CBOR codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Semantic validation failure on an otherwise well-formed packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    /// CBOR serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR deserialization failure.
    #[error("decode error: {0}")]
    Decode(String),
}
