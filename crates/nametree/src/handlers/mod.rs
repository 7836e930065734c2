//! Attachable processors layered over the name tree.
//!
//! Composition order mirrors the wire layout: segment pipelining at the
//! bottom, whole-object reassembly above it, `_meta`-coordinated
//! generalized objects above that, and `_latest`-keyed streams on top.

pub mod generalized_object;
pub mod object_stream;
pub mod segment_stream;
pub mod segmented_object;
