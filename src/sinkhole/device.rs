//! Virtual network interfaces the sinkhole can own.

use std::io;
use std::net::UdpSocket;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Upper bound on how long a read waits before reporting "nothing yet".
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A TUN-like device carrying raw IPv4 datagrams.
pub trait VirtualInterface: Send {
    /// Reads one datagram into `buf`. `Ok(0)` means none arrived within a
    /// short wait; implementations must not block indefinitely.
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes one complete datagram.
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Exempts `socket` from the interface's routes. `false` if refused.
    fn protect(&mut self, socket: &UdpSocket) -> bool {
        let _ = socket;
        true
    }

    /// Releases the underlying handle. Later reads and writes fail.
    fn close(&mut self) {}
}

type Protector = Box<dyn FnMut(RawFd) -> bool + Send>;

/// Interface backed by a host-provided TUN file descriptor.
pub struct FdInterface {
    fd: Option<OwnedFd>,
    protector: Option<Protector>,
}

impl FdInterface {
    /// Takes ownership of `fd` and switches it to non-blocking mode.
    pub fn from_owned_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            fd: Some(fd),
            protector: None,
        })
    }

    /// # Safety
    ///
    /// `fd` must be an open descriptor not owned by anything else; it is
    /// closed when the interface is closed or dropped.
    pub unsafe fn from_raw_fd(fd: RawFd) -> io::Result<Self> {
        Self::from_owned_fd(OwnedFd::from_raw_fd(fd))
    }

    /// Installs the host hook that exempts a socket from the tunnel.
    pub fn with_protector(mut self, protector: impl FnMut(RawFd) -> bool + Send + 'static) -> Self {
        self.protector = Some(Box::new(protector));
        self
    }

    fn raw_fd(&self) -> io::Result<RawFd> {
        self.fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "interface closed"))
    }
}

impl VirtualInterface for FdInterface {
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.raw_fd()?;
        if !wait_readable(fd, POLL_INTERVAL)? {
            return Ok(0);
        }
        match read_fd(fd, buf) {
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                Ok(0)
            }
            other => other,
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let fd = self.raw_fd()?;
        let n = write_fd(fd, packet)?;
        if n != packet.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", n, packet.len()),
            ));
        }
        Ok(())
    }

    fn protect(&mut self, socket: &UdpSocket) -> bool {
        match self.protector.as_mut() {
            Some(protect) => protect(socket.as_raw_fd()),
            None => true,
        }
    }

    fn close(&mut self) {
        self.fd = None;
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: reading into our buffer from a valid fd.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn write_fd(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    // SAFETY: writing from our buffer to a valid fd.
    let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd on the stack.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a valid fd.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fcntl on a valid fd.
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// In-process interface: packets travel over a pair of channels.
pub struct ChannelInterface {
    inbound: Receiver<Vec<u8>>,
    outbound: Option<Sender<Vec<u8>>>,
    allow_protect: bool,
}

/// The far side of a [`ChannelInterface`].
pub struct ChannelPeer {
    inbound: Sender<Vec<u8>>,
    outbound: Receiver<Vec<u8>>,
}

pub fn channel_interface() -> (ChannelInterface, ChannelPeer) {
    let (in_tx, in_rx) = mpsc::channel();
    let (out_tx, out_rx) = mpsc::channel();
    (
        ChannelInterface {
            inbound: in_rx,
            outbound: Some(out_tx),
            allow_protect: true,
        },
        ChannelPeer {
            inbound: in_tx,
            outbound: out_rx,
        },
    )
}

impl ChannelInterface {
    /// Makes [`VirtualInterface::protect`] fail, as a host refusing the socket would.
    pub fn refuse_protect(mut self) -> Self {
        self.allow_protect = false;
        self
    }
}

impl VirtualInterface for ChannelInterface {
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.recv_timeout(POLL_INTERVAL) {
            Ok(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "interface peer disconnected",
            )),
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "interface closed"))?;
        outbound
            .send(packet.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "interface peer disconnected"))
    }

    fn protect(&mut self, _socket: &UdpSocket) -> bool {
        self.allow_protect
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}

impl ChannelPeer {
    /// Injects a packet as if it arrived on the interface.
    pub fn send(&self, packet: Vec<u8>) -> bool {
        self.inbound.send(packet).is_ok()
    }

    /// Next packet the sinkhole wrote, if one arrives within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.outbound.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Creates a SOCK_DGRAM socketpair, returning (fd_a, fd_b) as OwnedFds.
    fn socketpair() -> (OwnedFd, OwnedFd) {
        let mut fds: [i32; 2] = [0; 2];
        // SAFETY: valid pointer to 2-element array.
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "socketpair() failed");
        // SAFETY: fds are valid file descriptors from socketpair.
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn test_fd_interface_roundtrip() {
        let (a, b) = socketpair();
        let mut iface = FdInterface::from_owned_fd(a).unwrap();
        let mut buf = [0u8; 64];

        // Nothing queued yet
        assert_eq!(iface.read_packet(&mut buf).unwrap(), 0);

        write_fd(b.as_raw_fd(), b"ping").unwrap();
        assert_eq!(iface.read_packet(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");

        iface.write_packet(b"pong").unwrap();
        let n = read_fd(b.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");

        iface.close();
        assert!(iface.read_packet(&mut buf).is_err());
    }

    #[test]
    fn test_fd_interface_protector() {
        let (a, _b) = socketpair();
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut iface = FdInterface::from_owned_fd(a).unwrap().with_protector(|_| false);
        assert!(!iface.protect(&socket));
    }

    #[test]
    fn test_channel_interface() {
        let (mut iface, peer) = channel_interface();
        let mut buf = [0u8; 8];
        assert_eq!(iface.read_packet(&mut buf).unwrap(), 0);

        assert!(peer.send(vec![1, 2, 3]));
        assert_eq!(iface.read_packet(&mut buf).unwrap(), 3);

        iface.write_packet(&[9]).unwrap();
        assert_eq!(peer.recv_timeout(Duration::from_millis(10)), Some(vec![9]));

        drop(peer);
        assert!(iface.read_packet(&mut buf).is_err());
    }
}
