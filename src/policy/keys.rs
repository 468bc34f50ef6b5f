//! String keys shared with the host's persistent store.

pub const BLOCKING_ENABLED: &str = "blocking_enabled";
pub const BLOCKED_PACKAGES: &str = "blocked_packages";
pub const ANTI_TAMPERING_ENABLED: &str = "anti_tampering_enabled";
pub const REST_MODE_ACTIVE: &str = "rest_mode_active";
/// Kill switch.
pub const FORCE_BLOCK_NOW: &str = "force_block_now";
pub const LAST_FOREGROUND_PACKAGE: &str = "last_foreground_package";
pub const URL_BLOCKING_ENABLED: &str = "url_blocking_enabled";
pub const BLOCKED_DOMAINS: &str = "blocked_domains";
pub const WHITELIST_DOMAINS: &str = "whitelist_domains";
pub const BLOCKED_KEYWORDS: &str = "blocked_keywords";
pub const TEMP_APP_UNLOCKS: &str = "temp_app_unlocks";
pub const DNS_BLACKLIST: &str = "dns_blacklist";
pub const UPSTREAM_DNS: &str = "upstream_dns";
