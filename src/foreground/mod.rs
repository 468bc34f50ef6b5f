//! Foreground enforcement: reacts to "package gained focus" events.
//!
//! [`ForegroundEngine`] is a synchronous state machine. It never sleeps;
//! delayed re-checks are returned to the caller as [`ScheduledCheck`]s and fed
//! back through [`ForegroundEngine::run_check`] once due. [`dispatcher`] drives
//! both from a single tokio task.

pub mod bridge;
pub mod dispatcher;
pub mod host;
pub mod url;

pub use bridge::{ActionFeed, HostAction, IssuedAction, SnapshotScreen};
pub use dispatcher::{spawn_dispatcher, ForegroundDispatcher};
pub use host::{HostActions, ScreenNode, ScreenSource};

use crate::classifier::{BlockReason, StringSet, Verdict};
use crate::config::ForegroundConfig;
use crate::policy::PolicyHandle;
use crate::stats::StatsCollector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TAMPER_MARKER: &str = "vpn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusKind {
    /// A new window took focus.
    WindowFocused,
    /// Content of the focused window changed.
    ContentChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusEvent {
    pub package: String,
    pub kind: FocusKind,
    pub at_ms: i64,
}

impl FocusEvent {
    pub fn focused(package: impl Into<String>, at_ms: i64) -> Self {
        Self {
            package: package.into(),
            kind: FocusKind::WindowFocused,
            at_ms,
        }
    }

    pub fn content_changed(package: impl Into<String>, at_ms: i64) -> Self {
        Self {
            package: package.into(),
            kind: FocusKind::ContentChanged,
            at_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Url,
    AntiTamper,
}

/// A delayed re-check, bound to the package that was in front when scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCheck {
    pub package: String,
    pub kind: CheckKind,
    pub delay: Duration,
    /// Event time plus `delay`, in the same time base as [`FocusEvent::at_ms`].
    pub due_at_ms: i64,
}

/// What a focus event resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ignored,
    SelfFocus,
    KillSwitchCleared,
    Debounced,
    KillSwitch,
    RestMode,
    BlockedApp,
    Unlocked,
    Scheduled,
    NoAction,
}

impl Outcome {
    /// True when the event sent the user home.
    pub fn is_block(&self) -> bool {
        matches!(self, Outcome::KillSwitch | Outcome::RestMode | Outcome::BlockedApp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub checks: Vec<ScheduledCheck>,
}

impl Decision {
    fn only(outcome: Outcome) -> Self {
        Self {
            outcome,
            checks: Vec::new(),
        }
    }
}

/// What a delayed check resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another package took the foreground meanwhile.
    Stale,
    NoScreen,
    NoUrl,
    Allowed,
    UrlBlocked(BlockReason),
    TamperBlocked,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForegroundState {
    pub last_foreground_package: String,
    pub last_block_action_at_ms: Option<i64>,
    last_url_check: Option<(String, i64)>,
}

pub struct ForegroundEngine {
    config: ForegroundConfig,
    app_label: String,
    alarm_packages: StringSet,
    browser_packages: StringSet,
    policy: Arc<PolicyHandle>,
    host: Arc<dyn HostActions>,
    screen: Arc<dyn ScreenSource>,
    stats: Arc<StatsCollector>,
    state: ForegroundState,
}

fn due_at(at_ms: i64, delay_ms: u64) -> i64 {
    at_ms.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX))
}

fn to_set(items: &[String]) -> StringSet {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Box::from)
        .collect()
}

impl ForegroundEngine {
    pub fn new(
        config: ForegroundConfig,
        policy: Arc<PolicyHandle>,
        host: Arc<dyn HostActions>,
        screen: Arc<dyn ScreenSource>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        let state = ForegroundState {
            last_foreground_package: policy.last_foreground(),
            ..Default::default()
        };
        Self {
            app_label: config.app_label.trim().to_lowercase(),
            alarm_packages: to_set(&config.alarm_packages),
            browser_packages: to_set(&config.browser_packages),
            config,
            policy,
            host,
            screen,
            stats,
            state,
        }
    }

    pub fn state(&self) -> &ForegroundState {
        &self.state
    }

    pub fn is_browser(&self, package: &str) -> bool {
        self.browser_packages.contains(package)
    }

    /// Packages that stay usable while rest mode is on.
    pub fn is_allowed_in_rest_mode(&self, package: &str) -> bool {
        if package.is_empty() {
            return false;
        }
        package == self.config.controlling_package
            || package == self.config.system_ui_package
            || self.alarm_packages.contains(package)
            || self.config.launcher_package.as_deref() == Some(package)
            || self.config.ime_package.as_deref() == Some(package)
    }

    pub fn handle_event(&mut self, event: FocusEvent) -> Decision {
        let FocusEvent {
            package,
            kind,
            at_ms,
        } = event;
        let package = package.trim();
        if package.is_empty() {
            return Decision::only(Outcome::Ignored);
        }

        if kind == FocusKind::ContentChanged {
            return self.handle_content_change(package, at_ms);
        }

        self.record_foreground(package);

        // 1. Controlling app in front
        if package == self.config.controlling_package {
            if self.policy.kill_switch_active() {
                self.policy.set_kill_switch(false);
                info!("Kill switch cleared: controlling app in foreground");
                return Decision::only(Outcome::KillSwitchCleared);
            }
            return Decision::only(Outcome::SelfFocus);
        }

        // 2. Debounce
        if self.within_debounce(at_ms) {
            debug!(package = %package, "Focus event inside block debounce window");
            return Decision::only(Outcome::Debounced);
        }

        // 3. Kill switch
        if self.policy.kill_switch_active() {
            self.enforce(package, "kill_switch", at_ms, true);
            self.stats.inc_app_block();
            return Decision::only(Outcome::KillSwitch);
        }

        // 4. Rest mode
        if self.policy.rest_mode_active() && !self.is_allowed_in_rest_mode(package) {
            self.enforce(package, "rest_mode", at_ms, false);
            self.stats.inc_app_block();
            return Decision::only(Outcome::RestMode);
        }

        // 5. App blocklist
        if self.policy.blocking_enabled() && self.policy.blocked_apps().contains(package) {
            if self.policy.has_active_unlock(package, at_ms) {
                debug!(package = %package, "Blocked app has an active temporary unlock");
                return Decision::only(Outcome::Unlocked);
            }
            self.enforce(package, "blocked_app", at_ms, false);
            self.stats.inc_app_block();
            return Decision::only(Outcome::BlockedApp);
        }

        // 6. + 7. Delayed checks
        let mut checks = Vec::new();
        if self.policy.url_blocking_enabled()
            && self.is_browser(package)
            && self.claim_url_checks(package, at_ms)
        {
            checks.extend(self.url_checks(package, at_ms));
        }
        if self.policy.anti_tampering_enabled() && package == self.config.settings_package {
            let delay_ms = self.config.anti_tamper_delay_ms;
            checks.push(ScheduledCheck {
                package: package.to_string(),
                kind: CheckKind::AntiTamper,
                delay: Duration::from_millis(delay_ms),
                due_at_ms: due_at(at_ms, delay_ms),
            });
        }

        if checks.is_empty() {
            Decision::only(Outcome::NoAction)
        } else {
            Decision {
                outcome: Outcome::Scheduled,
                checks,
            }
        }
    }

    fn handle_content_change(&mut self, package: &str, at_ms: i64) -> Decision {
        if !self.policy.url_blocking_enabled()
            || !self.is_browser(package)
            || !self.claim_url_checks(package, at_ms)
        {
            return Decision::only(Outcome::NoAction);
        }
        self.record_foreground(package);
        Decision {
            outcome: Outcome::Scheduled,
            checks: self.url_checks(package, at_ms),
        }
    }

    /// Runs a check previously handed out by [`handle_event`](Self::handle_event).
    pub fn run_check(&mut self, check: &ScheduledCheck) -> CheckOutcome {
        if self.state.last_foreground_package != check.package {
            return CheckOutcome::Stale;
        }

        let root = match self.screen.root() {
            Ok(Some(root)) => root,
            Ok(None) => return CheckOutcome::NoScreen,
            Err(e) => {
                warn!("Failed to read screen content for {}: {:#}", check.package, e);
                return CheckOutcome::NoScreen;
            }
        };

        match check.kind {
            CheckKind::Url => {
                let Some(found) = url::extract_url(&root) else {
                    return CheckOutcome::NoUrl;
                };
                let Some(domain) = url::extract_domain(&found) else {
                    return CheckOutcome::NoUrl;
                };
                match self.policy.url_matcher().classify_url(&found, &domain) {
                    Verdict::Allow => CheckOutcome::Allowed,
                    Verdict::Block(reason) => {
                        info!(
                            target: "kidguard::block",
                            package = %check.package,
                            domain = %domain,
                            reason = ?reason,
                            "Blocked URL in browser"
                        );
                        self.enforce(&check.package, "url", check.due_at_ms, true);
                        self.stats.inc_url_block();
                        CheckOutcome::UrlBlocked(reason)
                    }
                }
            }
            CheckKind::AntiTamper => {
                let text = root.gather_text().to_lowercase();
                let hit = (!self.app_label.is_empty() && text.contains(&self.app_label))
                    || text.contains(TAMPER_MARKER);
                if !hit {
                    return CheckOutcome::Allowed;
                }
                info!(
                    target: "kidguard::block",
                    package = %check.package,
                    reason = "anti_tamper",
                    "Sensitive settings screen closed"
                );
                if let Err(e) = self.host.go_home() {
                    warn!("go_home failed: {:#}", e);
                }
                self.stats.inc_tamper_block();
                CheckOutcome::TamperBlocked
            }
        }
    }

    fn record_foreground(&mut self, package: &str) {
        if self.state.last_foreground_package != package {
            self.state.last_foreground_package = package.to_string();
        }
        self.policy.record_foreground(package);
    }

    fn within_debounce(&self, at_ms: i64) -> bool {
        self.state
            .last_block_action_at_ms
            .is_some_and(|last| at_ms.saturating_sub(last) < self.config.block_debounce_ms)
    }

    /// Secondary debounce: at most one URL check burst per package per window.
    fn claim_url_checks(&mut self, package: &str, at_ms: i64) -> bool {
        if let Some((last_pkg, last_at)) = &self.state.last_url_check {
            if last_pkg == package
                && at_ms.saturating_sub(*last_at) <= self.config.url_check_debounce_ms
            {
                return false;
            }
        }
        self.state.last_url_check = Some((package.to_string(), at_ms));
        true
    }

    fn url_checks(&self, package: &str, at_ms: i64) -> Vec<ScheduledCheck> {
        self.config
            .url_check_delays_ms
            .iter()
            .map(|ms| ScheduledCheck {
                package: package.to_string(),
                kind: CheckKind::Url,
                delay: Duration::from_millis(*ms),
                due_at_ms: due_at(at_ms, *ms),
            })
            .collect()
    }

    fn enforce(&mut self, package: &str, reason: &'static str, at_ms: i64, bring_to_front: bool) {
        self.state.last_block_action_at_ms = Some(at_ms);
        info!(
            target: "kidguard::block",
            package = %package,
            reason,
            "Sending foreground app home"
        );
        if let Err(e) = self.host.go_home() {
            warn!("go_home failed: {:#}", e);
        }
        if bring_to_front {
            if let Err(e) = self.host.bring_to_front() {
                warn!("bring_to_front failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::THIRTY_MINUTES_MS;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHost {
        actions: Mutex<Vec<&'static str>>,
    }

    impl RecordingHost {
        fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.actions.lock().unwrap())
        }
    }

    impl HostActions for RecordingHost {
        fn go_home(&self) -> anyhow::Result<()> {
            self.actions.lock().unwrap().push("home");
            Ok(())
        }

        fn bring_to_front(&self) -> anyhow::Result<()> {
            self.actions.lock().unwrap().push("front");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FixedScreen(Option<Arc<ScreenNode>>);

    impl ScreenSource for FixedScreen {
        fn root(&self) -> anyhow::Result<Option<Arc<ScreenNode>>> {
            Ok(self.0.clone())
        }
    }

    fn engine_with(
        screen: FixedScreen,
    ) -> (ForegroundEngine, Arc<PolicyHandle>, Arc<RecordingHost>) {
        let policy = Arc::new(PolicyHandle::in_memory());
        let host = Arc::new(RecordingHost::default());
        let engine = ForegroundEngine::new(
            ForegroundConfig::default(),
            policy.clone(),
            host.clone(),
            Arc::new(screen),
            StatsCollector::new(),
        );
        (engine, policy, host)
    }

    fn engine() -> (ForegroundEngine, Arc<PolicyHandle>, Arc<RecordingHost>) {
        engine_with(FixedScreen::default())
    }

    #[test]
    fn test_temporary_unlock_window() {
        let (mut engine, policy, host) = engine();
        policy.set_blocking_enabled(true);
        policy.set_blocked_apps(["com.example.social"]);
        policy.add_temporary_unlock("com.example.social", THIRTY_MINUTES_MS, 0);

        let d = engine.handle_event(FocusEvent::focused("com.example.social", 60_000));
        assert_eq!(d.outcome, Outcome::Unlocked);
        assert!(host.take().is_empty());

        let d = engine.handle_event(FocusEvent::focused("com.example.social", THIRTY_MINUTES_MS));
        assert_eq!(d.outcome, Outcome::BlockedApp);
        assert_eq!(host.take(), vec!["home"]);
    }

    #[test]
    fn test_kill_switch_and_self_focus() {
        let (mut engine, policy, host) = engine();
        policy.set_kill_switch(true);

        let d = engine.handle_event(FocusEvent::focused("com.example.game", 0));
        assert_eq!(d.outcome, Outcome::KillSwitch);
        assert_eq!(host.take(), vec!["home", "front"]);

        let d = engine.handle_event(FocusEvent::focused("com.kidguard", 100));
        assert_eq!(d.outcome, Outcome::KillSwitchCleared);
        assert!(!policy.kill_switch_active());
        assert!(host.take().is_empty());

        let d = engine.handle_event(FocusEvent::focused("com.kidguard", 200));
        assert_eq!(d.outcome, Outcome::SelfFocus);
    }

    #[test]
    fn test_debounce_suppresses_second_block() {
        let (mut engine, policy, host) = engine();
        policy.set_blocking_enabled(true);
        policy.set_blocked_apps(["com.a", "com.b"]);

        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.a", 10_000)).outcome,
            Outcome::BlockedApp
        );
        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.b", 10_500)).outcome,
            Outcome::Debounced
        );
        assert_eq!(host.take(), vec!["home"]);

        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.b", 12_500)).outcome,
            Outcome::BlockedApp
        );
    }

    #[test]
    fn test_rest_mode_allow_set() {
        let (mut engine, policy, host) = engine();
        policy.set_rest_mode(true);

        for pkg in ["com.android.systemui", "com.google.android.deskclock"] {
            assert_eq!(
                engine.handle_event(FocusEvent::focused(pkg, 0)).outcome,
                Outcome::NoAction
            );
        }
        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.example.video", 0)).outcome,
            Outcome::RestMode
        );
        assert_eq!(host.take(), vec!["home"]);
    }

    #[test]
    fn test_browser_schedules_url_burst_once() {
        let (mut engine, policy, _host) = engine();
        policy.set_url_blocking(true);

        let d = engine.handle_event(FocusEvent::focused("com.android.chrome", 0));
        assert_eq!(d.outcome, Outcome::Scheduled);
        let delays: Vec<u64> = d.checks.iter().map(|c| c.delay.as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 500, 1000, 2000, 3000]);

        let d = engine.handle_event(FocusEvent::content_changed("com.android.chrome", 1_000));
        assert_eq!(d.outcome, Outcome::NoAction);

        let d = engine.handle_event(FocusEvent::content_changed("com.android.chrome", 1_501));
        assert_eq!(d.checks.len(), 5);
    }

    #[test]
    fn test_content_change_outside_browser_keeps_foreground() {
        let (mut engine, policy, _host) = engine();
        policy.set_url_blocking(true);
        engine.handle_event(FocusEvent::focused("com.android.chrome", 0));
        engine.handle_event(FocusEvent::content_changed("com.android.systemui", 50));
        assert_eq!(engine.state().last_foreground_package, "com.android.chrome");
    }

    #[test]
    fn test_url_check_blocks_and_debounces() {
        let screen = FixedScreen(Some(Arc::new(ScreenNode {
            view_id: Some("com.android.chrome:id/url_bar".into()),
            text: Some("https://www.bet365.com/live".into()),
            ..Default::default()
        })));
        let (mut engine, policy, host) = engine_with(screen);
        policy.set_url_blocking(true);
        policy.set_blocked_domains(["bet365.com"]);

        let d = engine.handle_event(FocusEvent::focused("com.android.chrome", 999_000));
        let outcome = engine.run_check(&d.checks[0]);
        assert_eq!(outcome, CheckOutcome::UrlBlocked(BlockReason::Blacklist));
        assert_eq!(host.take(), vec!["home", "front"]);
        assert_eq!(engine.state().last_block_action_at_ms, Some(999_100));
    }

    #[test]
    fn test_url_block_stays_in_event_time_base() {
        let screen = FixedScreen(Some(Arc::new(ScreenNode {
            view_id: Some("com.android.chrome:id/url_bar".into()),
            text: Some("https://bet365.com/".into()),
            ..Default::default()
        })));
        let (mut engine, policy, host) = engine_with(screen);
        policy.set_url_blocking(true);
        policy.set_blocking_enabled(true);
        policy.set_blocked_domains(["bet365.com"]);
        policy.set_blocked_apps(["com.example.game"]);

        // Host timestamps on an uptime clock, far from wall-clock epoch
        let d = engine.handle_event(FocusEvent::focused("com.android.chrome", 50_000));
        assert_eq!(d.checks[0].due_at_ms, 50_100);
        assert_eq!(
            engine.run_check(&d.checks[0]),
            CheckOutcome::UrlBlocked(BlockReason::Blacklist)
        );
        assert_eq!(engine.state().last_block_action_at_ms, Some(50_100));
        host.take();

        let d = engine.handle_event(FocusEvent::focused("com.example.game", 50_000 + 3_600_000));
        assert_eq!(d.outcome, Outcome::BlockedApp);
        assert_eq!(host.take(), vec!["home"]);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let (mut engine, policy, _host) = engine();
        policy.set_blocking_enabled(true);
        policy.set_url_blocking(true);
        policy.set_blocked_apps(["com.a"]);

        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.a", 1_000)).outcome,
            Outcome::BlockedApp
        );
        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.a", i64::MIN)).outcome,
            Outcome::Debounced
        );
        assert_eq!(
            engine.handle_event(FocusEvent::focused("com.a", i64::MAX)).outcome,
            Outcome::BlockedApp
        );

        let (mut engine, policy, _host) = self::engine();
        policy.set_url_blocking(true);
        let d = engine.handle_event(FocusEvent::focused("com.android.chrome", i64::MAX));
        assert_eq!(d.checks.len(), 5);
        assert!(d.checks.iter().all(|c| c.due_at_ms == i64::MAX));
        let d = engine.handle_event(FocusEvent::content_changed("com.android.chrome", i64::MIN));
        assert_eq!(d.outcome, Outcome::NoAction);
    }

    #[test]
    fn test_stale_check_is_skipped() {
        let (mut engine, policy, host) = engine();
        policy.set_url_blocking(true);
        let d = engine.handle_event(FocusEvent::focused("com.android.chrome", 0));
        engine.handle_event(FocusEvent::focused("com.example.notes", 10));
        assert_eq!(engine.run_check(&d.checks[0]), CheckOutcome::Stale);
        assert!(host.take().is_empty());
    }

    #[test]
    fn test_anti_tamper() {
        let screen = FixedScreen(Some(Arc::new(ScreenNode {
            children: vec![ScreenNode {
                text: Some("App info: KidGuard".into()),
                ..Default::default()
            }],
            ..Default::default()
        })));
        let (mut engine, _policy, host) = engine_with(screen);

        let d = engine.handle_event(FocusEvent::focused("com.android.settings", 0));
        assert_eq!(d.checks.len(), 1);
        assert_eq!(d.checks[0].kind, CheckKind::AntiTamper);
        assert_eq!(d.checks[0].delay, Duration::from_millis(150));

        assert_eq!(engine.run_check(&d.checks[0]), CheckOutcome::TamperBlocked);
        assert_eq!(host.take(), vec!["home"]);
        assert_eq!(engine.state().last_block_action_at_ms, None);
    }
}
