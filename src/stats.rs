use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::info;

#[derive(Debug, Default)]
pub struct StatsCollector {
    // Sinkhole
    packets_read: AtomicU64,
    dns_queries: AtomicU64,
    blocked_queries: AtomicU64,
    forwarded_queries: AtomicU64,
    upstream_failures: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unsupported: AtomicU64,

    // Foreground
    app_blocks: AtomicU64,
    url_blocks: AtomicU64,
    tamper_blocks: AtomicU64,
}

/// Plain copy of the counters, for the control API.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_read: u64,
    pub dns_queries: u64,
    pub blocked_queries: u64,
    pub forwarded_queries: u64,
    pub upstream_failures: u64,
    pub dropped_malformed: u64,
    pub dropped_unsupported: u64,
    pub app_blocks: u64,
    pub url_blocks: u64,
    pub tamper_blocks: u64,
}

impl StatsCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawns the periodic dump task. Must be called inside a tokio runtime.
    pub fn spawn_logger(self: &Arc<Self>, log_interval_sec: u64) -> JoinHandle<()> {
        let stats = self.clone();
        let log_interval = Duration::from_secs(log_interval_sec.max(1));
        tokio::spawn(async move {
            stats.run_logger(log_interval).await;
        })
    }

    pub fn inc_packets(&self) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_queries(&self) {
        self.dns_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blocked(&self) {
        self.blocked_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_forwarded(&self) {
        self.forwarded_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self, malformed: bool) {
        if malformed {
            self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dropped_unsupported.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_app_block(&self) {
        self.app_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_url_block(&self) {
        self.url_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tamper_block(&self) {
        self.tamper_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            dns_queries: self.dns_queries.load(Ordering::Relaxed),
            blocked_queries: self.blocked_queries.load(Ordering::Relaxed),
            forwarded_queries: self.forwarded_queries.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unsupported: self.dropped_unsupported.load(Ordering::Relaxed),
            app_blocks: self.app_blocks.load(Ordering::Relaxed),
            url_blocks: self.url_blocks.load(Ordering::Relaxed),
            tamper_blocks: self.tamper_blocks.load(Ordering::Relaxed),
        }
    }

    async fn run_logger(&self, log_interval: Duration) {
        let mut interval = time::interval(log_interval);
        // First tick is immediate
        interval.tick().await;
        loop {
            interval.tick().await;
            self.dump_stats();
        }
    }

    fn dump_stats(&self) {
        let s = self.snapshot();
        let blocked_pct = if s.dns_queries > 0 {
            (s.blocked_queries as f64 / s.dns_queries as f64) * 100.0
        } else {
            0.0
        };

        info!(
            "STATS DUMP: Packets: {}, Queries: {}, Blocked: {} ({:.1}%), Forwarded: {}, UpstreamFailures: {}, Dropped: [malformed: {}, unsupported: {}], Foreground: [apps: {}, urls: {}, tamper: {}]",
            s.packets_read,
            s.dns_queries,
            s.blocked_queries,
            blocked_pct,
            s.forwarded_queries,
            s.upstream_failures,
            s.dropped_malformed,
            s.dropped_unsupported,
            s.app_blocks,
            s.url_blocks,
            s.tamper_blocks,
        );
    }
}
