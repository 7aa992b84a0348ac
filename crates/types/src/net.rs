use std::{
    fmt::{Display, Formatter},
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use tokio::net::TcpStream;

use crate::error::AddressError;

pub const MAX_DOMAIN_LEN: usize = 255;

/// Host part of an endpoint.
///
/// A `Domain` produced by [`NetworkAddress::parse`] or by the wire decoder
/// never holds an IP literal; those are promoted to `Ipv4`/`Ipv6`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetworkAddress {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl NetworkAddress {
    /// Parses host text with the same rules the decoder applies to a
    /// domain field.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        Self::from_domain_bytes(text.as_bytes())
    }

    pub(crate) fn from_domain_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.is_empty() {
            return Err(AddressError::InvalidDomain);
        }
        if bytes.len() > MAX_DOMAIN_LEN {
            return Err(AddressError::DomainTooLong(bytes.len()));
        }

        if looks_like_ip(bytes) {
            if let Some(ip) = parse_ip_literal(bytes) {
                return Ok(ip.into());
            }
        }

        if !bytes.iter().copied().all(is_domain_byte) {
            return Err(AddressError::InvalidDomain);
        }
        // every accepted byte is ascii
        let domain = String::from_utf8(bytes.to_vec()).map_err(|_| AddressError::InvalidDomain)?;
        Ok(NetworkAddress::Domain(domain))
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, NetworkAddress::Domain(_))
    }
}

fn looks_like_ip(bytes: &[u8]) -> bool {
    matches!(bytes.first(), Some(b'0'..=b'9') | Some(b'['))
}

fn parse_ip_literal(bytes: &[u8]) -> Option<IpAddr> {
    let text = std::str::from_utf8(bytes).ok()?;
    let text = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(text);
    text.parse().ok()
}

fn is_domain_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')
}

impl From<IpAddr> for NetworkAddress {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(ip) => NetworkAddress::Ipv4(ip),
            IpAddr::V6(ip) => NetworkAddress::Ipv6(ip),
        }
    }
}

impl From<Ipv4Addr> for NetworkAddress {
    fn from(ip: Ipv4Addr) -> Self {
        NetworkAddress::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for NetworkAddress {
    fn from(ip: Ipv6Addr) -> Self {
        NetworkAddress::Ipv6(ip)
    }
}

impl Display for NetworkAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkAddress::Ipv4(ip) => write!(f, "{}", ip),
            NetworkAddress::Ipv6(ip) => write!(f, "{}", ip),
            NetworkAddress::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// An address together with its port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub address: NetworkAddress,
    pub port: u16,
}

impl Destination {
    pub fn new(address: impl Into<NetworkAddress>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Dials the destination over TCP, resolving domains with the system
    /// resolver.
    pub async fn connect(&self) -> io::Result<TcpStream> {
        match &self.address {
            NetworkAddress::Ipv4(ip) => TcpStream::connect((*ip, self.port)).await,
            NetworkAddress::Ipv6(ip) => TcpStream::connect((*ip, self.port)).await,
            NetworkAddress::Domain(domain) => {
                TcpStream::connect((domain.as_str(), self.port)).await
            }
        }
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Destination::new(addr.ip(), addr.port())
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.address {
            NetworkAddress::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            address => write!(f, "{}:{}", address, self.port),
        }
    }
}
