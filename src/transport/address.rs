//! Destination address record sent as the first bytes of every relay stream.
//!
//! ```text
//! +------+----------+------+
//! | ATYP |   ADDR   | PORT |
//! +------+----------+------+
//! |  1   | variable |  2   |
//! +------+----------+------+
//! ```
//!
//! `0x01` IPv4 (4 bytes), `0x03` domain (length byte + name), `0x04` IPv6
//! (16 bytes). The port is big-endian.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use super::error::AddressError;

/// Record type for an IPv4 address.
pub const ATYP_IPV4: u8 = 0x01;
/// Record type for a length-prefixed domain name.
pub const ATYP_DOMAIN: u8 = 0x03;
/// Record type for an IPv6 address.
pub const ATYP_IPV6: u8 = 0x04;

/// Longest domain the one-byte length prefix can carry.
pub const MAX_DOMAIN_LEN: usize = 255;

/// A logical destination as seen by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 literal and port.
    Ipv4(SocketAddrV4),
    /// IPv6 literal and port.
    Ipv6(SocketAddrV6),
    /// Domain name, resolved by the relay, and port.
    Domain(String, u16),
}

impl Address {
    /// Parse `host:port`. IPv6 literals must be bracketed.
    pub fn parse(addr: &str) -> Result<Self, AddressError> {
        let invalid = |reason| AddressError::Invalid {
            addr: addr.to_string(),
            reason,
        };

        let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

        if let Some(inner) = host.strip_prefix('[') {
            let ip = inner
                .strip_suffix(']')
                .and_then(|ip| ip.parse::<Ipv6Addr>().ok())
                .ok_or_else(|| invalid("invalid IPv6 literal"))?;
            return Ok(Address::Ipv6(SocketAddrV6::new(ip, port, 0, 0)));
        }

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(Address::Ipv4(SocketAddrV4::new(ip, port)));
        }
        if host.contains(':') {
            return Err(invalid("IPv6 literal must be bracketed"));
        }
        if host.len() > MAX_DOMAIN_LEN {
            return Err(AddressError::DomainTooLong(host.len()));
        }

        Ok(Address::Domain(host.to_string(), port))
    }

    /// Destination port.
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(addr) => addr.port(),
            Address::Ipv6(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// Encoded length in bytes.
    pub fn serialized_len(&self) -> usize {
        match self {
            Address::Ipv4(_) => 1 + 4 + 2,
            Address::Ipv6(_) => 1 + 16 + 2,
            Address::Domain(host, _) => 1 + 1 + host.len() + 2,
        }
    }

    /// Append the address record to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<(), AddressError> {
        buf.reserve(self.serialized_len());
        match self {
            Address::Ipv4(addr) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Ipv6(addr) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            Address::Domain(host, port) => {
                let len = u8::try_from(host.len())
                    .map_err(|_| AddressError::DomainTooLong(host.len()))?;
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(len);
                buf.put_slice(host.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    /// The address record as a fresh buffer.
    pub fn encode(&self) -> Result<BytesMut, AddressError> {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Decode an address record from the front of `buf`.
    ///
    /// Returns the address and the number of bytes consumed, or `None` if
    /// `buf` does not yet hold a complete record.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, AddressError> {
        let Some(&atyp) = buf.first() else {
            return Ok(None);
        };

        match atyp {
            ATYP_IPV4 => {
                if buf.len() < 7 {
                    return Ok(None);
                }
                let ip = Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]);
                let port = u16::from_be_bytes([buf[5], buf[6]]);
                Ok(Some((Address::Ipv4(SocketAddrV4::new(ip, port)), 7)))
            }
            ATYP_IPV6 => {
                if buf.len() < 19 {
                    return Ok(None);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[1..17]);
                let port = u16::from_be_bytes([buf[17], buf[18]]);
                let addr = SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0);
                Ok(Some((Address::Ipv6(addr), 19)))
            }
            ATYP_DOMAIN => {
                let Some(&len) = buf.get(1) else {
                    return Ok(None);
                };
                let end = 2 + usize::from(len);
                if buf.len() < end + 2 {
                    return Ok(None);
                }
                let host = String::from_utf8_lossy(&buf[2..end]).into_owned();
                let port = u16::from_be_bytes([buf[end], buf[end + 1]]);
                Ok(Some((Address::Domain(host, port), end + 2)))
            }
            other => Err(AddressError::UnknownType(other)),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(addr) => write!(f, "{addr}"),
            Address::Ipv6(addr) => write!(f, "{addr}"),
            Address::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}
