//! Shared policy state read by both enforcement engines.
//!
//! Every field is held independently and replaced as a whole (`ArcSwap` for
//! collections, atomics for flags), so readers on the engine threads never see
//! a half-applied update. Each update is written through to the backing
//! [`KeyValueStore`]; a failed write is logged and the in-memory value still
//! takes effect.

pub mod keys;
mod sqlite;
mod store;
mod unlock;

pub use sqlite::SqliteStore;
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use unlock::{has_active_unlock, prune_expired, TemporaryUnlock};

use crate::classifier::{DomainMatcher, StringSet};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::{encode_set, read_bool, read_set, read_string, read_unlocks};
use tracing::{info, warn};

/// Gambling domains sunk by the DNS engine out of the box.
pub const DEFAULT_DNS_BLACKLIST: &[&str] = &[
    "bet365.com",
    "betano.com",
    "sportingbet.com",
    "betfair.com",
    "pixbet.com",
    "estrela.bet",
    "esportesdasorte.com",
    "bet7k.com",
    "blaze.com",
    "kto.com",
    "7games.bet",
    "vaidebet.com",
    "novibet.com",
    "superbet.com",
    "parimatch.com",
    "galera.bet",
    "f12.bet",
    "betmotion.com",
    "bodog.com",
    "1xbet.com",
];

/// Installed when a DNS blacklist push arrives empty.
pub const FALLBACK_DNS_BLACKLIST: &[&str] =
    &["bet365.com", "betano.com", "sportingbet.com", "betfair.com"];

pub const DEFAULT_UPSTREAM_DNS: &str = "8.8.8.8";

pub const THIRTY_MINUTES_MS: i64 = 30 * 60 * 1000;

/// Point-in-time copy of the app/URL policy, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BlockPolicy {
    pub blocking_enabled: bool,
    pub blocked_apps: Vec<String>,
    pub anti_tampering_enabled: bool,
    pub rest_mode_active: bool,
    pub kill_switch_active: bool,
    pub url_blocking_enabled: bool,
    pub blocked_domains: Vec<String>,
    pub whitelist_domains: Vec<String>,
    pub blocked_keywords: Vec<String>,
}

pub struct PolicyHandle {
    store: Arc<dyn KeyValueStore>,

    blocking_enabled: AtomicBool,
    anti_tampering: AtomicBool,
    rest_mode: AtomicBool,
    kill_switch: AtomicBool,
    url_blocking: AtomicBool,

    blocked_apps: ArcSwap<StringSet>,
    blocked_domains: ArcSwap<StringSet>,
    whitelist: ArcSwap<StringSet>,
    keywords: ArcSwap<StringSet>,
    unlocks: ArcSwap<Vec<TemporaryUnlock>>,
    last_foreground: ArcSwap<String>,

    dns_blacklist: ArcSwap<StringSet>,
    upstream_dns: ArcSwap<String>,
}

fn normalize_package(raw: &str) -> String {
    raw.trim().to_string()
}

fn normalize_entry(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn normalize_keyword(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn build_set<I, S>(items: I, normalize: fn(&str) -> String) -> StringSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| normalize(s.as_ref()))
        .filter(|s| !s.is_empty())
        .map(String::into_boxed_str)
        .collect()
}

fn sorted(set: &StringSet) -> Vec<String> {
    let mut items: Vec<String> = set.iter().map(|s| s.to_string()).collect();
    items.sort_unstable();
    items
}

impl PolicyHandle {
    /// Loads every field from `store`, falling back to defaults for missing keys.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let s = store.as_ref();

        let dns_blacklist = read_set(s, keys::DNS_BLACKLIST, normalize_entry)
            .filter(|set| !set.is_empty())
            .unwrap_or_else(|| build_set(DEFAULT_DNS_BLACKLIST, normalize_entry));
        let upstream =
            read_string(s, keys::UPSTREAM_DNS).unwrap_or_else(|| DEFAULT_UPSTREAM_DNS.to_string());

        let handle = Self {
            blocking_enabled: AtomicBool::new(read_bool(s, keys::BLOCKING_ENABLED, false)),
            anti_tampering: AtomicBool::new(read_bool(s, keys::ANTI_TAMPERING_ENABLED, true)),
            rest_mode: AtomicBool::new(read_bool(s, keys::REST_MODE_ACTIVE, false)),
            kill_switch: AtomicBool::new(read_bool(s, keys::FORCE_BLOCK_NOW, false)),
            url_blocking: AtomicBool::new(read_bool(s, keys::URL_BLOCKING_ENABLED, false)),
            blocked_apps: ArcSwap::from_pointee(
                read_set(s, keys::BLOCKED_PACKAGES, normalize_package).unwrap_or_default(),
            ),
            blocked_domains: ArcSwap::from_pointee(
                read_set(s, keys::BLOCKED_DOMAINS, normalize_entry).unwrap_or_default(),
            ),
            whitelist: ArcSwap::from_pointee(
                read_set(s, keys::WHITELIST_DOMAINS, normalize_entry).unwrap_or_default(),
            ),
            keywords: ArcSwap::from_pointee(
                read_set(s, keys::BLOCKED_KEYWORDS, normalize_keyword).unwrap_or_default(),
            ),
            unlocks: ArcSwap::from_pointee(read_unlocks(s)),
            last_foreground: ArcSwap::from_pointee(
                read_string(s, keys::LAST_FOREGROUND_PACKAGE).unwrap_or_default(),
            ),
            dns_blacklist: ArcSwap::from_pointee(dns_blacklist),
            upstream_dns: ArcSwap::from_pointee(upstream),
            store,
        };

        info!(
            "Policy loaded: {} blocked apps, {} blocked domains, {} whitelisted, {} keywords, {} DNS blacklist entries",
            handle.blocked_apps.load().len(),
            handle.blocked_domains.load().len(),
            handle.whitelist.load().len(),
            handle.keywords.load().len(),
            handle.dns_blacklist.load().len(),
        );
        handle
    }

    /// Policy backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryStore::new()))
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!("Failed to persist policy key '{}': {}", key, e);
        }
    }

    fn persist_set(&self, key: &str, set: &StringSet) {
        match encode_set(set) {
            Ok(value) => self.persist(key, &value),
            Err(e) => warn!("Failed to encode policy key '{}': {}", key, e),
        }
    }

    fn store_flag(&self, flag: &AtomicBool, key: &str, value: bool) {
        flag.store(value, Ordering::Relaxed);
        self.persist(key, if value { "true" } else { "false" });
    }

    fn replace_set(&self, slot: &ArcSwap<StringSet>, key: &str, set: StringSet) {
        self.persist_set(key, &set);
        slot.store(Arc::new(set));
    }

    // Flags

    pub fn blocking_enabled(&self) -> bool {
        self.blocking_enabled.load(Ordering::Relaxed)
    }

    pub fn set_blocking_enabled(&self, enabled: bool) {
        self.store_flag(&self.blocking_enabled, keys::BLOCKING_ENABLED, enabled);
    }

    pub fn anti_tampering_enabled(&self) -> bool {
        self.anti_tampering.load(Ordering::Relaxed)
    }

    pub fn set_anti_tampering(&self, enabled: bool) {
        self.store_flag(&self.anti_tampering, keys::ANTI_TAMPERING_ENABLED, enabled);
    }

    pub fn rest_mode_active(&self) -> bool {
        self.rest_mode.load(Ordering::Relaxed)
    }

    pub fn set_rest_mode(&self, active: bool) {
        self.store_flag(&self.rest_mode, keys::REST_MODE_ACTIVE, active);
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::Relaxed)
    }

    pub fn set_kill_switch(&self, active: bool) {
        self.store_flag(&self.kill_switch, keys::FORCE_BLOCK_NOW, active);
    }

    pub fn url_blocking_enabled(&self) -> bool {
        self.url_blocking.load(Ordering::Relaxed)
    }

    pub fn set_url_blocking(&self, enabled: bool) {
        self.store_flag(&self.url_blocking, keys::URL_BLOCKING_ENABLED, enabled);
    }

    // App blocklist and unlocks

    pub fn set_blocked_apps<I, S>(&self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = build_set(packages, normalize_package);
        self.replace_set(&self.blocked_apps, keys::BLOCKED_PACKAGES, set);
    }

    pub fn blocked_apps(&self) -> Arc<StringSet> {
        self.blocked_apps.load_full()
    }

    pub fn has_active_unlock(&self, package_id: &str, now_ms: i64) -> bool {
        has_active_unlock(&self.unlocks.load(), package_id, now_ms)
    }

    /// True when `package_id` is on the blocklist and not temporarily unlocked.
    pub fn is_app_blocked(&self, package_id: &str, now_ms: i64) -> bool {
        self.blocked_apps.load().contains(package_id)
            && !self.has_active_unlock(package_id, now_ms)
    }

    pub fn active_unlocks(&self, now_ms: i64) -> Vec<TemporaryUnlock> {
        prune_expired(&self.unlocks.load(), now_ms)
    }

    /// Prunes expired entries and appends a new unlock. Returns `false` (and
    /// changes nothing) for an empty package id.
    pub fn add_temporary_unlock(&self, package_id: &str, expires_at_ms: i64, now_ms: i64) -> bool {
        let package_id = package_id.trim();
        if package_id.is_empty() {
            return false;
        }

        self.unlocks.rcu(|current| {
            let mut kept = prune_expired(current, now_ms);
            kept.push(TemporaryUnlock::new(package_id, expires_at_ms));
            kept
        });

        match serde_json::to_string(&**self.unlocks.load()) {
            Ok(value) => self.persist(keys::TEMP_APP_UNLOCKS, &value),
            Err(e) => warn!("Failed to encode temporary unlocks: {}", e),
        }
        info!(
            package = %package_id,
            expires_at_ms,
            "Temporary unlock granted"
        );
        true
    }

    /// Unlocks the last foreground package for thirty minutes, unless nothing
    /// was recorded yet or it is the controlling app itself.
    pub fn add_thirty_minutes(&self, controlling_package: &str, now_ms: i64) -> Option<TemporaryUnlock> {
        let package_id = self.last_foreground();
        if package_id.is_empty() || package_id == controlling_package {
            return None;
        }
        let expires_at_ms = now_ms + THIRTY_MINUTES_MS;
        self.add_temporary_unlock(&package_id, expires_at_ms, now_ms)
            .then(|| TemporaryUnlock::new(package_id, expires_at_ms))
    }

    pub fn record_foreground(&self, package_id: &str) {
        if self.last_foreground.load().as_str() == package_id {
            return;
        }
        self.last_foreground
            .store(Arc::new(package_id.to_string()));
        self.persist(keys::LAST_FOREGROUND_PACKAGE, package_id);
    }

    pub fn last_foreground(&self) -> String {
        self.last_foreground.load().as_str().to_string()
    }

    // URL lists

    pub fn set_blocked_domains<I, S>(&self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = build_set(domains, normalize_entry);
        self.replace_set(&self.blocked_domains, keys::BLOCKED_DOMAINS, set);
    }

    pub fn set_whitelist<I, S>(&self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = build_set(domains, normalize_entry);
        self.replace_set(&self.whitelist, keys::WHITELIST_DOMAINS, set);
    }

    pub fn set_keywords<I, S>(&self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = build_set(keywords, normalize_keyword);
        self.replace_set(&self.keywords, keys::BLOCKED_KEYWORDS, set);
    }

    /// Classifier for URLs observed in the foreground browser.
    pub fn url_matcher(&self) -> DomainMatcher {
        DomainMatcher::new(
            self.whitelist.load_full(),
            self.blocked_domains.load_full(),
            self.keywords.load_full(),
        )
    }

    // DNS sinkhole state

    /// Replaces the DNS blacklist. An empty push installs the fallback list.
    pub fn update_dns_blacklist<I, S>(&self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = build_set(domains, normalize_entry);
        if set.is_empty() {
            set = build_set(FALLBACK_DNS_BLACKLIST, normalize_entry);
        }
        info!("DNS blacklist replaced ({} entries)", set.len());
        self.replace_set(&self.dns_blacklist, keys::DNS_BLACKLIST, set);
    }

    pub fn add_to_dns_blacklist(&self, domain: &str) {
        let domain = normalize_entry(domain);
        if domain.is_empty() {
            return;
        }
        self.dns_blacklist.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(domain.clone().into_boxed_str());
            next
        });
        self.persist_set(keys::DNS_BLACKLIST, &self.dns_blacklist.load());
    }

    pub fn remove_from_dns_blacklist(&self, domain: &str) {
        let domain = normalize_entry(domain);
        self.dns_blacklist.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(domain.as_str());
            next
        });
        self.persist_set(keys::DNS_BLACKLIST, &self.dns_blacklist.load());
    }

    pub fn dns_blacklist(&self) -> Arc<StringSet> {
        self.dns_blacklist.load_full()
    }

    /// Classifier for queries seen by the sinkhole.
    pub fn dns_matcher(&self) -> DomainMatcher {
        DomainMatcher::new(
            self.whitelist.load_full(),
            self.dns_blacklist.load_full(),
            self.keywords.load_full(),
        )
    }

    /// Sets the upstream resolver. Blank input is ignored.
    pub fn set_upstream_dns(&self, upstream: &str) -> bool {
        let trimmed = upstream.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.upstream_dns.store(Arc::new(trimmed.to_string()));
        self.persist(keys::UPSTREAM_DNS, trimmed);
        info!("Upstream DNS set to {}", trimmed);
        true
    }

    pub fn upstream_dns(&self) -> String {
        self.upstream_dns.load().as_str().to_string()
    }

    pub fn snapshot(&self) -> BlockPolicy {
        BlockPolicy {
            blocking_enabled: self.blocking_enabled(),
            blocked_apps: sorted(&self.blocked_apps.load()),
            anti_tampering_enabled: self.anti_tampering_enabled(),
            rest_mode_active: self.rest_mode_active(),
            kill_switch_active: self.kill_switch_active(),
            url_blocking_enabled: self.url_blocking_enabled(),
            blocked_domains: sorted(&self.blocked_domains.load()),
            whitelist_domains: sorted(&self.whitelist.load()),
            blocked_keywords: sorted(&self.keywords.load()),
        }
    }
}
