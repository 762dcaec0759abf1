//! Subtitle identity across engines that rebuild their track lists.
//!
//! Server descriptors are matched to engine tracks either directly (native
//! engine track ids, embedded discovery, external attach) or through
//! composite keys for engines that only expose (group, track) positions.

pub mod cache;
pub mod composite_key;
pub mod descriptor;
pub mod embedded;
pub mod fetch;
pub mod identity;
pub mod language;
pub mod resolver;

pub use cache::{CacheKey, SubtitleCache};
pub use composite_key::{CompositeKey, TrackFlags};
pub use descriptor::SubtitleDescriptor;
pub use embedded::DiscoveryConfig;
pub use fetch::SubtitleFetcher;
pub use identity::{SubtitleIdentityMap, TrackListing};
pub use resolver::{GroupedTrackEngine, SelectionScope, SubtitleResolver, SubtitleSource};
