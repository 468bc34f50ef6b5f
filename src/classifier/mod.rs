mod heuristics;
mod matcher;

pub use heuristics::{looks_like_gambling, normalize_domain, DEFAULT_KEYWORDS};
pub use matcher::{BlockReason, DomainMatcher, StringSet, Verdict};
