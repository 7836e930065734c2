//! Packet types and canonical CBOR codecs.
//!
//! The surrounding system treats packet encoding as replaceable; this crate
//! pins one canonical CBOR form so implicit digests and signature preimages
//! are well defined.

pub mod content_meta;
pub mod delegation;
pub mod error;
pub mod packet;

pub use content_meta::ContentMetaInfo;
pub use delegation::{Delegation, DelegationSet};
pub use error::CodecError;
pub use packet::{Data, Interest, MetaInfo, NetworkNack, NackReason, SignatureValue};
