//! Language code normalization (ISO 639-2 B/T to ISO 639-1)

const THREE_TO_TWO: &[(&str, &str)] = &[
    ("ara", "ar"),
    ("bul", "bg"),
    ("cat", "ca"),
    ("ces", "cs"),
    ("chi", "zh"),
    ("cze", "cs"),
    ("dan", "da"),
    ("deu", "de"),
    ("dut", "nl"),
    ("ell", "el"),
    ("eng", "en"),
    ("est", "et"),
    ("fas", "fa"),
    ("fin", "fi"),
    ("fra", "fr"),
    ("fre", "fr"),
    ("ger", "de"),
    ("gre", "el"),
    ("heb", "he"),
    ("hin", "hi"),
    ("hrv", "hr"),
    ("hun", "hu"),
    ("ice", "is"),
    ("ind", "id"),
    ("isl", "is"),
    ("ita", "it"),
    ("jpn", "ja"),
    ("kor", "ko"),
    ("lav", "lv"),
    ("lit", "lt"),
    ("may", "ms"),
    ("msa", "ms"),
    ("nld", "nl"),
    ("nob", "nb"),
    ("nor", "no"),
    ("per", "fa"),
    ("pol", "pl"),
    ("por", "pt"),
    ("ron", "ro"),
    ("rum", "ro"),
    ("rus", "ru"),
    ("slk", "sk"),
    ("slo", "sk"),
    ("slv", "sl"),
    ("spa", "es"),
    ("srp", "sr"),
    ("swe", "sv"),
    ("tha", "th"),
    ("tur", "tr"),
    ("ukr", "uk"),
    ("vie", "vi"),
    ("zho", "zh"),
];

/// Lowercase, strip any region suffix, and map 3-letter codes to 2-letter.
///
/// Returns `None` for empty or undetermined (`und`) languages. Unknown codes
/// pass through lowercased.
pub fn normalize(lang: &str) -> Option<String> {
    let lang = lang.trim().to_ascii_lowercase();
    let primary = lang.split(['-', '_']).next().unwrap_or_default();
    if primary.is_empty() || primary == "und" {
        return None;
    }
    let mapped = THREE_TO_TWO
        .iter()
        .find(|(three, _)| *three == primary)
        .map(|(_, two)| *two)
        .unwrap_or(primary);
    Some(mapped.to_string())
}

/// Whether an engine-reported language satisfies the wanted one
pub fn matches(track_lang: &str, wanted: &str) -> bool {
    match (normalize(track_lang), normalize(wanted)) {
        (Some(track), Some(wanted)) => track.starts_with(&wanted),
        _ => false,
    }
}
