//! Rebuild-resistant subtitle track identity.
//!
//! Engines that rebuild their track objects (for instance after a
//! renegotiation) hand out fresh handles every time, so identity is derived
//! from attributes that survive a rebuild: group and track position, declared
//! language, and flags parsed from the label.

use super::language;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TrackFlags {
    pub forced: bool,
    pub external: bool,
    pub closed_captions: bool,
}

impl TrackFlags {
    /// Parse flags from a track label, plus the engine's own external bit
    pub fn from_label(label: &str, external: bool) -> Self {
        let lower = label.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |word: &str| tokens.contains(&word);

        Self {
            forced: has("forced"),
            external: external || has("external"),
            closed_captions: has("sdh")
                || has("cc")
                || lower.contains("closed caption")
                || lower.contains("hearing impaired"),
        }
    }

    pub fn bits(self) -> u8 {
        (self.forced as u8) | ((self.external as u8) << 1) | ((self.closed_captions as u8) << 2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub group: usize,
    pub track: usize,
    /// Normalized 2-letter language, if declared
    pub language: Option<String>,
    pub flags: u8,
}

/// Looser key used when the label-derived flags changed across a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FallbackKey {
    pub language: Option<String>,
    pub group: usize,
    pub track: usize,
}

impl CompositeKey {
    pub fn new(group: usize, track: usize, language: Option<&str>, flags: TrackFlags) -> Self {
        Self {
            group,
            track,
            language: language.and_then(language::normalize),
            flags: flags.bits(),
        }
    }

    pub fn fallback(&self) -> FallbackKey {
        FallbackKey {
            language: self.language.clone(),
            group: self.group,
            track: self.track,
        }
    }
}
