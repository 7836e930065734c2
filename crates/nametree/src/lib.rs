//! Name-tree runtime: a lazily populated hierarchical node tree where each
//! node is an active endpoint that can fetch, produce, sign, verify,
//! decrypt and reassemble application objects on demand.
//!
//! The tree is an arena owned by [`Namespace`]; nodes are addressed by
//! copyable [`NodeId`]s and all work happens on a single-threaded event
//! loop driven by [`Namespace::process_events`]. Handlers extend subtrees
//! with segment pipelining, object reassembly, `_meta`-coordinated
//! generalized objects and `_latest`-keyed streams.

pub mod callbacks;
mod dispatch;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod namespace;
pub mod pit;
pub mod state;

pub use callbacks::{next_callback_id, CallbackId, DeserializeDone};
pub use error::TreeError;
pub use handler::Handler;
pub use handlers::generalized_object::GeneralizedObjectHandler;
pub use handlers::object_stream::GeneralizedObjectStreamHandler;
pub use handlers::segment_stream::SegmentStreamHandler;
pub use handlers::segmented_object::SegmentedObjectHandler;
pub use namespace::{Namespace, NodeId};
pub use state::{NamespaceObject, NamespaceState, NamespaceValidateState};
