//! Split-tunnel DNS sinkhole.
//!
//! Owns a virtual interface on a dedicated thread and answers every UDP/53
//! query it sees: blocked names get a synthesized `0.0.0.0` answer, everything
//! else is relayed to the upstream resolver. One packet in, at most one out.

pub mod device;
pub mod dns;
pub mod forward;
pub mod packet;

pub use device::{channel_interface, ChannelInterface, ChannelPeer, FdInterface, VirtualInterface};
pub use forward::{resolve_upstream, Forwarder, UdpForwarder};
pub use packet::PacketError;

use crate::classifier::Verdict;
use crate::config::SinkholeConfig;
use crate::logger::BlockNotifier;
use crate::policy::PolicyHandle;
use crate::stats::StatsCollector;
use anyhow::{bail, Context, Result};
use packet::{Ipv4Packet, UdpDatagram, DNS_PORT, DOT_PORT, PROTO_TCP, PROTO_UDP};
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkholeState {
    Idle,
    Establishing,
    Running,
    Stopping,
}

impl SinkholeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SinkholeState::Establishing,
            2 => SinkholeState::Running,
            3 => SinkholeState::Stopping,
            _ => SinkholeState::Idle,
        }
    }
}

/// Per-packet decision logic, independent of any device or thread.
pub struct PacketProcessor {
    policy: Arc<PolicyHandle>,
    notifier: Arc<BlockNotifier>,
    stats: Arc<StatsCollector>,
    blocked_ttl: u32,
    upstream_port: u16,
    upstream: Option<(String, SocketAddr)>,
}

impl PacketProcessor {
    pub fn new(
        config: &SinkholeConfig,
        policy: Arc<PolicyHandle>,
        notifier: Arc<BlockNotifier>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            policy,
            notifier,
            stats,
            blocked_ttl: config.blocked_ttl,
            upstream_port: config.upstream_port,
            upstream: None,
        }
    }

    /// Returns the reply packet to write back, `Ok(None)` when the upstream
    /// produced nothing, or the reason the packet was dropped.
    pub fn process(
        &mut self,
        packet: &[u8],
        forwarder: &mut dyn Forwarder,
    ) -> Result<Option<Vec<u8>>, PacketError> {
        let ip = Ipv4Packet::parse(packet)?;

        let protocol = ip.protocol();
        if protocol != PROTO_UDP && protocol != PROTO_TCP {
            return Err(PacketError::UnsupportedProtocol(protocol));
        }
        if ip.is_fragment() {
            return Err(PacketError::Fragmented);
        }

        let port = ip.destination_port()?;
        if port == DOT_PORT {
            return Err(PacketError::EncryptedDns);
        }
        if protocol == PROTO_TCP {
            return Err(PacketError::UnsupportedProtocol(PROTO_TCP));
        }
        if port != DNS_PORT {
            return Err(PacketError::NotDns(port));
        }

        let udp = UdpDatagram::parse(ip.payload())?;
        let query = dns::parse_query(udp.payload())?;
        self.stats.inc_queries();
        debug!(domain = %query.domain, qtype = %query.query_type, "DNS query");

        let response = match self.policy.dns_matcher().classify(&query.domain) {
            Verdict::Block(reason) => {
                self.stats.inc_blocked();
                self.notifier.notify(&query.domain, reason);
                dns::sinkhole_response(&query, self.blocked_ttl)?
            }
            Verdict::Allow => match self.forward(udp.payload(), forwarder) {
                Some(reply) => reply,
                None => return Ok(None),
            },
        };

        packet::build_udp_reply(&ip, &udp, &response).map(Some)
    }

    fn forward(&mut self, query: &[u8], forwarder: &mut dyn Forwarder) -> Option<Vec<u8>> {
        let upstream = match self.upstream_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Cannot resolve upstream DNS '{}': {}", self.policy.upstream_dns(), e);
                self.stats.inc_upstream_failure();
                return None;
            }
        };

        match forwarder.forward(query, upstream) {
            Ok(reply) => {
                self.stats.inc_forwarded();
                Some(reply)
            }
            Err(e) => {
                debug!("Upstream {} gave no answer: {}", upstream, e);
                self.stats.inc_upstream_failure();
                None
            }
        }
    }

    /// Re-resolves only when the configured upstream changed.
    fn upstream_addr(&mut self) -> io::Result<SocketAddr> {
        let configured = self.policy.upstream_dns();
        if let Some((name, addr)) = &self.upstream {
            if *name == configured {
                return Ok(*addr);
            }
        }
        let addr = resolve_upstream(&configured, self.upstream_port)?;
        info!("Upstream DNS resolved: {} -> {}", configured, addr);
        self.upstream = Some((configured, addr));
        Ok(addr)
    }
}

/// Lifecycle owner of the worker thread.
pub struct Sinkhole {
    config: SinkholeConfig,
    policy: Arc<PolicyHandle>,
    notifier: Arc<BlockNotifier>,
    stats: Arc<StatsCollector>,
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Sinkhole {
    pub fn new(
        config: SinkholeConfig,
        policy: Arc<PolicyHandle>,
        notifier: Arc<BlockNotifier>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            config,
            policy,
            notifier,
            stats,
            state: Arc::new(AtomicU8::new(SinkholeState::Idle as u8)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SinkholeState {
        SinkholeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SinkholeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Binds the upstream socket and starts the loop on `device`.
    pub fn start<D>(&self, device: D) -> Result<()>
    where
        D: VirtualInterface + 'static,
    {
        let forwarder = UdpForwarder::bind(
            Duration::from_millis(self.config.upstream_timeout_ms),
            self.config.max_packet,
        )
        .context("Failed to bind upstream DNS socket")?;
        self.start_with_forwarder(device, forwarder)
    }

    pub fn start_with_forwarder<D, F>(&self, mut device: D, mut forwarder: F) -> Result<()>
    where
        D: VirtualInterface + 'static,
        F: Forwarder + 'static,
    {
        let mut worker = self
            .worker
            .lock()
            .map_err(|_| anyhow::anyhow!("sinkhole worker lock poisoned"))?;
        if let Some(handle) = worker.take() {
            if !handle.is_finished() {
                *worker = Some(handle);
                bail!("Sinkhole is already running");
            }
            let _ = handle.join();
        }

        self.set_state(SinkholeState::Establishing);

        if let Some(socket) = forwarder.socket() {
            if !device.protect(socket) {
                device.close();
                self.set_state(SinkholeState::Idle);
                bail!("Host refused to protect the upstream DNS socket");
            }
        }

        let mut processor = PacketProcessor::new(
            &self.config,
            self.policy.clone(),
            self.notifier.clone(),
            self.stats.clone(),
        );
        let running = self.running.clone();
        let state = self.state.clone();
        let stats = self.stats.clone();
        let max_packet = self.config.max_packet.max(packet::IPV4_HEADER_LEN);

        running.store(true, Ordering::Release);
        self.set_state(SinkholeState::Running);

        let spawned = thread::Builder::new()
            .name("sinkhole-loop".to_string())
            .spawn(move || {
                run_loop(&mut device, &mut forwarder, &mut processor, &running, &stats, max_packet);
                state.store(SinkholeState::Stopping as u8, Ordering::Release);
                device.close();
                running.store(false, Ordering::Release);
                state.store(SinkholeState::Idle as u8, Ordering::Release);
                info!("Sinkhole loop exited");
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("Sinkhole running");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.set_state(SinkholeState::Idle);
                Err(e).context("Failed to spawn sinkhole thread")
            }
        }
    }

    /// Stops the loop and waits for it. Safe to call when not running.
    pub fn stop(&self) {
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        self.running.store(false, Ordering::Release);
        self.set_state(SinkholeState::Stopping);
        if handle.join().is_err() {
            error!("Sinkhole thread panicked");
        }
        self.set_state(SinkholeState::Idle);
        info!("Sinkhole stopped");
    }
}

impl Drop for Sinkhole {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    device: &mut dyn VirtualInterface,
    forwarder: &mut dyn Forwarder,
    processor: &mut PacketProcessor,
    running: &AtomicBool,
    stats: &StatsCollector,
    max_packet: usize,
) {
    let mut buf = vec![0u8; max_packet];

    while running.load(Ordering::Acquire) {
        let n = match device.read_packet(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    error!("Virtual interface read failed: {}", e);
                }
                break;
            }
        };
        stats.inc_packets();

        match processor.process(&buf[..n], forwarder) {
            Ok(Some(reply)) => {
                if let Err(e) = device.write_packet(&reply) {
                    warn!("Virtual interface write failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                stats.inc_dropped(e.is_malformed());
                debug!("Dropped packet: {}", e);
            }
        }
    }
}
