use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sinkhole: SinkholeConfig,

    #[serde(default)]
    pub foreground: ForegroundConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SinkholeConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Already-configured TUN descriptor handed over by the host.
    #[serde(default)]
    pub tun_fd: Option<i32>,
    #[serde(default = "default_local_address")]
    pub local_address: String,
    /// Resolver addresses the host routes (as /32) into the interface.
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    #[serde(default = "default_blocked_ttl")]
    pub blocked_ttl: u32,
    #[serde(default = "default_max_packet")]
    pub max_packet: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForegroundConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_controlling_package")]
    pub controlling_package: String,
    /// Lower-cased on use; matched against settings screens by anti-tampering.
    #[serde(default = "default_app_label")]
    pub app_label: String,
    #[serde(default)]
    pub launcher_package: Option<String>,
    #[serde(default)]
    pub ime_package: Option<String>,
    #[serde(default = "default_settings_package")]
    pub settings_package: String,
    #[serde(default = "default_system_ui_package")]
    pub system_ui_package: String,
    #[serde(default = "default_alarm_packages")]
    pub alarm_packages: Vec<String>,
    #[serde(default = "default_browser_packages")]
    pub browser_packages: Vec<String>,
    #[serde(default = "default_block_debounce_ms")]
    pub block_debounce_ms: i64,
    #[serde(default = "default_url_check_debounce_ms")]
    pub url_check_debounce_ms: i64,
    #[serde(default = "default_url_check_delays_ms")]
    pub url_check_delays_ms: Vec<u64>,
    #[serde(default = "default_anti_tamper_delay_ms")]
    pub anti_tamper_delay_ms: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    /// "sqlite" or "memory".
    #[serde(default = "default_policy_backend")]
    pub backend: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub log_blocked: bool,
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_log_interval")]
    pub log_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Defaults
fn default_true() -> bool {
    true
}
fn default_local_address() -> String {
    "10.0.0.2".to_string()
}
fn default_routes() -> Vec<String> {
    [
        "8.8.8.8",
        "8.8.4.4",
        "1.1.1.1",
        "1.0.0.1",
        "208.67.222.222",
        "208.67.220.220",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_upstream_port() -> u16 {
    53
}
fn default_upstream_timeout_ms() -> u64 {
    3000
}
fn default_blocked_ttl() -> u32 {
    60
}
fn default_max_packet() -> usize {
    32767
}
fn default_controlling_package() -> String {
    "com.kidguard".to_string()
}
fn default_app_label() -> String {
    "kidguard".to_string()
}
fn default_settings_package() -> String {
    "com.android.settings".to_string()
}
fn default_system_ui_package() -> String {
    "com.android.systemui".to_string()
}
fn default_alarm_packages() -> Vec<String> {
    [
        "com.android.deskclock",
        "com.google.android.deskclock",
        "com.samsung.android.app.clock",
        "com.samsung.android.app.clockpackage",
        "com.miui.clock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_browser_packages() -> Vec<String> {
    [
        "com.android.chrome",
        "org.mozilla.firefox",
        "org.mozilla.fennec_fdroid",
        "org.mozilla.fenix",
        "com.sec.android.app.sbrowser",
        "com.microsoft.emmx",
        "com.opera.browser",
        "com.opera.mini.native",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_block_debounce_ms() -> i64 {
    2500
}
fn default_url_check_debounce_ms() -> i64 {
    1500
}
fn default_url_check_delays_ms() -> Vec<u64> {
    vec![100, 500, 1000, 2000, 3000]
}
fn default_anti_tamper_delay_ms() -> u64 {
    150
}
fn default_event_buffer() -> usize {
    256
}
fn default_policy_backend() -> String {
    "sqlite".to_string()
}
fn default_sqlite_path() -> String {
    "kidguard.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_recent_capacity() -> usize {
    100
}
fn default_log_interval() -> u64 {
    300
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8080
}

impl Default for SinkholeConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            tun_fd: None,
            local_address: default_local_address(),
            routes: default_routes(),
            upstream_port: default_upstream_port(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            blocked_ttl: default_blocked_ttl(),
            max_packet: default_max_packet(),
        }
    }
}

impl Default for ForegroundConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            controlling_package: default_controlling_package(),
            app_label: default_app_label(),
            launcher_package: None,
            ime_package: None,
            settings_package: default_settings_package(),
            system_ui_package: default_system_ui_package(),
            alarm_packages: default_alarm_packages(),
            browser_packages: default_browser_packages(),
            block_debounce_ms: default_block_debounce_ms(),
            url_check_debounce_ms: default_url_check_debounce_ms(),
            url_check_delays_ms: default_url_check_delays_ms(),
            anti_tamper_delay_ms: default_anti_tamper_delay_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            backend: default_policy_backend(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_blocked: default_true(),
            recent_capacity: default_recent_capacity(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            log_interval_seconds: default_log_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable: default_true(),
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.sinkhole.upstream_timeout_ms, 3000);
        assert_eq!(config.sinkhole.max_packet, 32767);
        assert_eq!(config.sinkhole.routes.len(), 6);
        assert_eq!(config.foreground.block_debounce_ms, 2500);
        assert_eq!(config.foreground.url_check_delays_ms, vec![100, 500, 1000, 2000, 3000]);
        assert_eq!(config.policy.backend, "sqlite");
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [sinkhole]
            tun_fd = 7
            blocked_ttl = 30

            [foreground]
            controlling_package = "org.example.guard"
            launcher_package = "com.example.launcher"

            [policy]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.sinkhole.tun_fd, Some(7));
        assert_eq!(config.sinkhole.blocked_ttl, 30);
        assert_eq!(config.sinkhole.upstream_port, 53);
        assert_eq!(config.foreground.controlling_package, "org.example.guard");
        assert_eq!(
            config.foreground.launcher_package.as_deref(),
            Some("com.example.launcher")
        );
        assert_eq!(config.foreground.browser_packages.len(), 8);
        assert_eq!(config.policy.backend, "memory");
    }
}
