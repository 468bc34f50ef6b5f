use super::heuristics::{looks_like_gambling, normalize_domain, DEFAULT_KEYWORDS};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;

/// Normalised set of domains, keywords or package ids.
pub type StringSet = FxHashSet<Box<str>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Blacklist,
    Keyword,
    DefaultKeyword,
    Gambling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Block(BlockReason),
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block(_))
    }
}

/// Immutable view over one whitelist/blacklist/keyword triple.
///
/// Built from `Arc` snapshots, so constructing one per lookup is cheap and a
/// concurrent list replacement never changes a matcher that is already in use.
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    whitelist: Arc<StringSet>,
    blacklist: Arc<StringSet>,
    keywords: Arc<StringSet>,
}

impl DomainMatcher {
    pub fn new(
        whitelist: Arc<StringSet>,
        blacklist: Arc<StringSet>,
        keywords: Arc<StringSet>,
    ) -> Self {
        Self {
            whitelist,
            blacklist,
            keywords,
        }
    }

    /// Classifies a bare domain; keywords are matched against the domain itself.
    pub fn classify(&self, domain: &str) -> Verdict {
        let domain = normalize_domain(domain);
        self.classify_normalized(&domain, &domain)
    }

    /// Classifies a domain observed as part of a URL; keywords are matched
    /// against the full URL.
    pub fn classify_url(&self, url: &str, domain: &str) -> Verdict {
        let domain = normalize_domain(domain);
        self.classify_normalized(&domain, &url.to_lowercase())
    }

    fn classify_normalized(&self, domain: &str, observed: &str) -> Verdict {
        if domain.is_empty() {
            return Verdict::Allow;
        }

        // 1. Whitelist wins unconditionally
        if suffix_hit(&self.whitelist, domain) {
            return Verdict::Allow;
        }

        // 2. Blacklist, in both directions
        if suffix_hit(&self.blacklist, domain) || broader_hit(&self.blacklist, domain) {
            return Verdict::Block(BlockReason::Blacklist);
        }

        // 3. User keywords
        if self
            .keywords
            .iter()
            .any(|kw| !kw.is_empty() && observed.contains(&**kw))
        {
            return Verdict::Block(BlockReason::Keyword);
        }

        // 4. Built-in safety net
        if DEFAULT_KEYWORDS.iter().any(|kw| observed.contains(kw)) {
            return Verdict::Block(BlockReason::DefaultKeyword);
        }
        if looks_like_gambling(domain) || (observed != domain && looks_like_gambling(observed)) {
            return Verdict::Block(BlockReason::Gambling);
        }

        Verdict::Allow
    }
}

/// Exact or subdomain match: walks `a.b.c` -> `b.c` -> `c`.
fn suffix_hit(set: &StringSet, domain: &str) -> bool {
    let mut part = domain;
    loop {
        if set.contains(part) {
            return true;
        }

        match part.find('.') {
            Some(idx) => {
                part = &part[idx + 1..];
                if part.is_empty() {
                    break;
                }
            }
            None => break,
        }
    }

    false
}

/// A more specific entry matching a broader observed domain
/// (entry `cdn.bet365.com` matches observed `bet365.com`).
fn broader_hit(set: &StringSet, domain: &str) -> bool {
    set.iter().any(|entry| {
        entry.len() > domain.len()
            && entry.ends_with(domain)
            && entry.as_bytes()[entry.len() - domain.len() - 1] == b'.'
    })
}
