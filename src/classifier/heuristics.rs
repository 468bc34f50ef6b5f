//! Built-in safety net applied after the user-managed lists.

/// Keywords blocked regardless of the user keyword list.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "porn", "xxx", "erotic", "nude", "onlyfans", "xvideos", "pornhub", "xnxx", "xhamster",
    "redtube", "casino", "apostas",
];

/// Lower-cases, trims and strips the trailing root dot.
pub fn normalize_domain(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_lowercase()
}

/// Gambling catch-all.
///
/// Any domain merely containing "bet" matches, with "alphabet" as the only
/// exception. This is broad and will produce false positives (e.g. "between").
/// URL checks also run it over the whole lower-cased URL.
pub fn looks_like_gambling(domain: &str) -> bool {
    if domain == "bet.br" || domain.ends_with(".bet.br") {
        return true;
    }
    if domain.ends_with(".bet") || domain.starts_with("bet.") || domain.contains(".bet.") {
        return true;
    }
    domain.contains("bet") && !domain.contains("alphabet")
}
