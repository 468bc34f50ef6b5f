use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};
use tracing::debug;

/// Sends an allowed query upstream and waits for the single reply.
pub trait Forwarder: Send {
    fn forward(&mut self, query: &[u8], upstream: SocketAddr) -> io::Result<Vec<u8>>;

    /// Outbound socket that must be exempted from the tunnel, if any.
    fn socket(&self) -> Option<&UdpSocket> {
        None
    }
}

pub struct UdpForwarder {
    socket: UdpSocket,
    timeout: Duration,
    buf: Vec<u8>,
}

impl UdpForwarder {
    pub fn bind(timeout: Duration, max_packet: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        Ok(Self {
            socket,
            timeout,
            buf: vec![0u8; max_packet.max(512)],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Forwarder for UdpForwarder {
    /// Accepts only a datagram from `upstream` carrying the query's DNS id;
    /// anything else arriving before the deadline is discarded.
    fn forward(&mut self, query: &[u8], upstream: SocketAddr) -> io::Result<Vec<u8>> {
        if query.len() < 2 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "query too short"));
        }
        let id = [query[0], query[1]];

        self.socket.send_to(query, upstream)?;
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "upstream DNS did not answer in time",
                ));
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (n, from) = self.socket.recv_from(&mut self.buf)?;
            if from == upstream && n >= 2 && self.buf[..2] == id {
                return Ok(self.buf[..n].to_vec());
            }
            debug!("Discarding stray datagram ({} bytes) from {}", n, from);
        }
    }

    fn socket(&self) -> Option<&UdpSocket> {
        Some(&self.socket)
    }
}

/// Resolves the configured upstream (`ip`, `ip:port` or hostname) to a socket
/// address, using `default_port` when none is given.
pub fn resolve_upstream(upstream: &str, default_port: u16) -> io::Result<SocketAddr> {
    let upstream = upstream.trim();
    if let Ok(addr) = upstream.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = upstream.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    (upstream, default_port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IPv4 address for upstream '{}'", upstream),
            )
        })
}
