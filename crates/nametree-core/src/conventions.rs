use std::time::Duration;

use crate::name::NameComponent;

/// Child name carrying a generalized object's `ContentMetaInfo`.
pub const META: &str = "_meta";
/// Child name carrying the flat concatenation of segment implicit digests.
pub const MANIFEST: &str = "_manifest";
/// Child name carrying the delegation that points at a stream's newest entry.
pub const LATEST: &str = "_latest";

/// Lifetime for a first-attempt Interest.
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_millis(4_000);
/// Cap for the exponential re-express lifetime doubling.
pub const DEFAULT_MAX_INTEREST_LIFETIME: Duration = Duration::from_millis(16_000);
/// Largest payload placed in one segment packet.
pub const DEFAULT_MAX_SEGMENT_PAYLOAD_LENGTH: usize = 8192;
/// Outstanding-Interest window for segment and object pipelines.
pub const DEFAULT_PIPELINE_SIZE: usize = 8;
/// Freshness period stamped on produced `_latest` packets.
pub const DEFAULT_LATEST_PACKET_FRESHNESS: Duration = Duration::from_millis(1_000);

/// The `_meta` component.
pub fn meta_component() -> NameComponent {
    NameComponent::generic(META.as_bytes())
}

/// The `_manifest` component.
pub fn manifest_component() -> NameComponent {
    NameComponent::generic(MANIFEST.as_bytes())
}

/// The `_latest` component.
pub fn latest_component() -> NameComponent {
    NameComponent::generic(LATEST.as_bytes())
}
