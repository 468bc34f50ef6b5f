//! IPv4 / UDP framing for the sinkhole.
//!
//! Parsing borrows from the read buffer; nothing is copied until a reply is
//! assembled.

use std::net::Ipv4Addr;
use thiserror::Error;

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const DNS_PORT: u16 = 53;
/// DNS-over-TLS.
pub const DOT_PORT: u16 = 853;

const REPLY_TTL: u8 = 64;
const MAX_IPV4_LEN: usize = u16::MAX as usize;

/// Why a packet was dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("not an IPv4 packet (version {0})")]
    NotIpv4(u8),
    #[error("invalid IPv4 header length {0}")]
    BadHeaderLength(usize),
    #[error("declared length {declared} inconsistent with {available} bytes")]
    LengthMismatch { declared: usize, available: usize },
    #[error("fragmented datagram")]
    Fragmented,
    #[error("unsupported protocol {0}")]
    UnsupportedProtocol(u8),
    #[error("DNS-over-TLS traffic")]
    EncryptedDns,
    #[error("UDP to port {0} is not DNS")]
    NotDns(u16),
    #[error("malformed DNS message: {0}")]
    Dns(String),
    #[error("DNS message carries no question")]
    NoQuestion,
    #[error("DNS message is not a query")]
    NotQuery,
    #[error("reply of {0} bytes exceeds the IPv4 length limit")]
    Oversized(usize),
}

impl PacketError {
    /// Malformed input, as opposed to well-formed traffic we do not handle.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            PacketError::Truncated { .. }
                | PacketError::NotIpv4(_)
                | PacketError::BadHeaderLength(_)
                | PacketError::LengthMismatch { .. }
                | PacketError::Dns(_)
                | PacketError::NoQuestion
                | PacketError::Oversized(_)
        )
    }
}

fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Folds a 32-bit sum into a 16-bit checksum.
#[inline(always)]
pub fn checksum_fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}

/// Ones' complement sum of 16-bit big-endian words; an odd trailing byte is
/// padded with zero.
#[inline]
pub fn checksum_add(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Internet checksum over `data`. Over a header that already carries a valid
/// checksum this yields zero.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    checksum_fold(checksum_add(data))
}

/// Header checksum computed with the checksum field (bytes 10..12) taken as zero.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let sum = checksum_add(&header[..10]).wrapping_add(checksum_add(&header[12..]));
    checksum_fold(sum)
}

/// Borrowed view of a validated IPv4 packet, trimmed to its declared length.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Packet<'a> {
    data: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4Packet<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, PacketError> {
        if buf.len() < IPV4_HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: IPV4_HEADER_LEN,
                available: buf.len(),
            });
        }

        let version = buf[0] >> 4;
        if version != 4 {
            return Err(PacketError::NotIpv4(version));
        }

        let header_len = (buf[0] & 0x0F) as usize * 4;
        if header_len < IPV4_HEADER_LEN {
            return Err(PacketError::BadHeaderLength(header_len));
        }

        let total_len = be16(buf, 2) as usize;
        if total_len < header_len || total_len > buf.len() {
            return Err(PacketError::LengthMismatch {
                declared: total_len,
                available: buf.len(),
            });
        }

        Ok(Self {
            data: &buf[..total_len],
            header_len,
        })
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn protocol(&self) -> u8 {
        self.data[9]
    }

    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[12], self.data[13], self.data[14], self.data[15])
    }

    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.data[16], self.data[17], self.data[18], self.data[19])
    }

    /// More-fragments set or a non-zero fragment offset.
    pub fn is_fragment(&self) -> bool {
        be16(self.data, 6) & 0x3FFF != 0
    }

    pub fn header(&self) -> &'a [u8] {
        &self.data[..self.header_len]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.header_len..]
    }

    /// Destination port of a TCP or UDP payload.
    pub fn destination_port(&self) -> Result<u16, PacketError> {
        let payload = self.payload();
        if payload.len() < 4 {
            return Err(PacketError::Truncated {
                needed: self.header_len + 4,
                available: self.data.len(),
            });
        }
        Ok(be16(payload, 2))
    }
}

/// Borrowed view of a UDP datagram, trimmed to its declared length.
#[derive(Debug, Clone, Copy)]
pub struct UdpDatagram<'a> {
    data: &'a [u8],
}

impl<'a> UdpDatagram<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, PacketError> {
        if buf.len() < UDP_HEADER_LEN {
            return Err(PacketError::Truncated {
                needed: UDP_HEADER_LEN,
                available: buf.len(),
            });
        }
        let len = be16(buf, 4) as usize;
        if len < UDP_HEADER_LEN || len > buf.len() {
            return Err(PacketError::LengthMismatch {
                declared: len,
                available: buf.len(),
            });
        }
        Ok(Self { data: &buf[..len] })
    }

    pub fn source_port(&self) -> u16 {
        be16(self.data, 0)
    }

    pub fn destination_port(&self) -> u16 {
        be16(self.data, 2)
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[UDP_HEADER_LEN..]
    }
}

/// Builds the IPv4/UDP packet answering `request`: addresses and ports
/// swapped, fresh 20-byte header with TTL 64, UDP checksum disabled.
pub fn build_udp_reply(
    request: &Ipv4Packet<'_>,
    datagram: &UdpDatagram<'_>,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IPV4_HEADER_LEN + udp_len;
    if total_len > MAX_IPV4_LEN {
        return Err(PacketError::Oversized(total_len));
    }

    let mut pkt = Vec::with_capacity(total_len);

    // IPv4 header
    pkt.extend_from_slice(&[0x45, 0x00]);
    pkt.extend_from_slice(&(total_len as u16).to_be_bytes());
    pkt.extend_from_slice(&[0, 0, 0, 0]); // id, flags, fragment offset
    pkt.push(REPLY_TTL);
    pkt.push(PROTO_UDP);
    pkt.extend_from_slice(&[0, 0]);
    pkt.extend_from_slice(&request.destination().octets());
    pkt.extend_from_slice(&request.source().octets());
    let csum = ipv4_header_checksum(&pkt[..IPV4_HEADER_LEN]);
    pkt[10..12].copy_from_slice(&csum.to_be_bytes());

    // UDP header
    pkt.extend_from_slice(&datagram.destination_port().to_be_bytes());
    pkt.extend_from_slice(&datagram.source_port().to_be_bytes());
    pkt.extend_from_slice(&(udp_len as u16).to_be_bytes());
    pkt.extend_from_slice(&[0, 0]);

    pkt.extend_from_slice(payload);
    Ok(pkt)
}
