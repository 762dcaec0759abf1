use std::collections::HashMap;
use tracing::{debug, warn};

use super::composite_key::{CompositeKey, FallbackKey, TrackFlags};
use super::descriptor::SubtitleDescriptor;

/// One subtitle track as listed by a grouped-track engine
#[derive(Debug, Clone, PartialEq)]
pub struct TrackListing {
    pub group: usize,
    pub track: usize,
    pub language: Option<String>,
    pub label: String,
    pub external: bool,
    pub is_text: bool,
}

impl TrackListing {
    pub fn flags(&self) -> TrackFlags {
        TrackFlags::from_label(&self.label, self.external)
    }

    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.group, self.track, self.language.as_deref(), self.flags())
    }
}

/// Bidirectional map between composite keys and server descriptors.
///
/// Built once per session from the first concrete track listing.
#[derive(Debug, Default)]
pub struct SubtitleIdentityMap {
    by_key: HashMap<CompositeKey, SubtitleDescriptor>,
    by_index: HashMap<i64, CompositeKey>,
    fallback: HashMap<FallbackKey, i64>,
    registered: bool,
}

impl SubtitleIdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Pair text tracks with text descriptors in delivery order.
    ///
    /// Only the first call per session registers anything; later calls
    /// return 0.
    pub fn register(&mut self, listing: &[TrackListing], descriptors: &[SubtitleDescriptor]) -> usize {
        if self.registered {
            return 0;
        }
        if listing.is_empty() {
            debug!("Empty track listing, deferring subtitle registration");
            return 0;
        }

        let tracks = listing.iter().filter(|t| t.is_text);
        let texts = descriptors.iter().filter(|d| d.is_text());

        let mut count = 0;
        for (track, descriptor) in tracks.zip(texts) {
            let key = track.key();
            self.fallback.insert(key.fallback(), descriptor.index);
            self.by_index.insert(descriptor.index, key.clone());
            self.by_key.insert(key, descriptor.clone());
            count += 1;
        }

        self.registered = true;
        debug!("Registered {} subtitle identities", count);
        count
    }

    /// Exact key first, then the fallback key; otherwise nothing is selected
    pub fn resolve(
        &self,
        group: usize,
        track: usize,
        language: Option<&str>,
        flags: TrackFlags,
    ) -> Option<&SubtitleDescriptor> {
        let key = CompositeKey::new(group, track, language, flags);
        let found = self.lookup(&key);
        if found.is_none() {
            warn!(
                "No subtitle identity for group {} track {} ({:?})",
                group, track, key.language
            );
        }
        found
    }

    /// Same as [`resolve`](Self::resolve) without logging misses
    pub fn resolve_listing(&self, listing: &TrackListing) -> Option<&SubtitleDescriptor> {
        self.lookup(&listing.key())
    }

    fn lookup(&self, key: &CompositeKey) -> Option<&SubtitleDescriptor> {
        if let Some(descriptor) = self.by_key.get(key) {
            return Some(descriptor);
        }
        self.fallback
            .get(&key.fallback())
            .and_then(|index| self.by_index.get(index))
            .and_then(|key| self.by_key.get(key))
    }

    pub fn key_for(&self, descriptor_index: i64) -> Option<&CompositeKey> {
        self.by_index.get(&descriptor_index)
    }

    pub fn reset(&mut self) {
        self.by_key.clear();
        self.by_index.clear();
        self.fallback.clear();
        self.registered = false;
    }
}
