use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::AddressError,
    net::{NetworkAddress, MAX_DOMAIN_LEN},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Domain,
    Ipv6,
}

/// Discriminator byte of every address family for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressFamilyMap {
    ipv4: u8,
    domain: u8,
    ipv6: u8,
}

impl AddressFamilyMap {
    pub const VMESS: Self = Self {
        ipv4: 0x01,
        domain: 0x02,
        ipv6: 0x03,
    };

    pub const SOCKS: Self = Self {
        ipv4: 0x01,
        domain: 0x03,
        ipv6: 0x04,
    };

    pub fn new(ipv4: u8, domain: u8, ipv6: u8) -> Result<Self, AddressError> {
        if ipv4 == domain || ipv4 == ipv6 || domain == ipv6 {
            return Err(AddressError::AmbiguousFamilyMap);
        }
        Ok(Self { ipv4, domain, ipv6 })
    }

    pub fn family(&self, byte: u8) -> Option<AddressFamily> {
        match byte {
            b if b == self.ipv4 => Some(AddressFamily::Ipv4),
            b if b == self.domain => Some(AddressFamily::Domain),
            b if b == self.ipv6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    pub fn byte(&self, family: AddressFamily) -> u8 {
        match family {
            AddressFamily::Ipv4 => self.ipv4,
            AddressFamily::Domain => self.domain,
            AddressFamily::Ipv6 => self.ipv6,
        }
    }
}

/// Where the 2-byte big endian port sits relative to the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortOrder {
    #[default]
    AddressFirst,
    PortFirst,
}

/// Reads `[port] family address [port]` from `reader`.
///
/// Short reads come back as `AddressError::Io` untouched.
pub async fn read_address_port<R>(
    reader: &mut R,
    families: &AddressFamilyMap,
    order: PortOrder,
) -> Result<(NetworkAddress, u16), AddressError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let leading_port = match order {
        PortOrder::PortFirst => Some(reader.read_u16().await?),
        PortOrder::AddressFirst => None,
    };

    let family_byte = reader.read_u8().await?;
    let family = families
        .family(family_byte)
        .ok_or(AddressError::UnknownAddressFamily(family_byte))?;

    let address = match family {
        AddressFamily::Ipv4 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf).await?;
            NetworkAddress::Ipv4(Ipv4Addr::from(buf))
        }
        AddressFamily::Ipv6 => {
            let mut buf = [0u8; 16];
            reader.read_exact(&mut buf).await?;
            NetworkAddress::Ipv6(Ipv6Addr::from(buf))
        }
        AddressFamily::Domain => {
            let len = reader.read_u8().await? as usize;
            if len == 0 {
                return Err(AddressError::InvalidDomain);
            }
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await?;
            NetworkAddress::from_domain_bytes(&buf)?
        }
    };

    let port = match leading_port {
        Some(port) => port,
        None => reader.read_u16().await?,
    };

    Ok((address, port))
}

/// Appends the encoded address and port to `buf`.
///
/// A `Domain` is held to the decoder's rules: bad characters and IP
/// literals give `InvalidDomain`. Nothing is appended when the address
/// cannot be encoded.
pub fn encode_address_port(
    buf: &mut Vec<u8>,
    address: &NetworkAddress,
    port: u16,
    families: &AddressFamilyMap,
    order: PortOrder,
) -> Result<(), AddressError> {
    // a domain must decode back to itself, so IP literals are refused here
    if let NetworkAddress::Domain(domain) = address {
        if !NetworkAddress::from_domain_bytes(domain.as_bytes())?.is_domain() {
            return Err(AddressError::InvalidDomain);
        }
    }

    if order == PortOrder::PortFirst {
        buf.extend_from_slice(&port.to_be_bytes());
    }

    match address {
        NetworkAddress::Ipv4(ip) => {
            buf.push(families.byte(AddressFamily::Ipv4));
            buf.extend_from_slice(&ip.octets());
        }
        NetworkAddress::Ipv6(ip) => {
            buf.push(families.byte(AddressFamily::Ipv6));
            buf.extend_from_slice(&ip.octets());
        }
        NetworkAddress::Domain(domain) => {
            buf.push(families.byte(AddressFamily::Domain));
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
        }
    }

    if order == PortOrder::AddressFirst {
        buf.extend_from_slice(&port.to_be_bytes());
    }

    Ok(())
}

/// Writes the encoded address and port to `writer` in a single write.
pub async fn write_address_port<W>(
    writer: &mut W,
    address: &NetworkAddress,
    port: u16,
    families: &AddressFamilyMap,
    order: PortOrder,
) -> Result<(), AddressError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(2 + 2 + MAX_DOMAIN_LEN);
    encode_address_port(&mut buf, address, port, families, order)?;
    writer.write_all(&buf).await?;
    Ok(())
}
