use types::{AddressError, AddressFamilyMap, Destination, NetworkAddress};
use uuid::Uuid;

use crate::{
    crypto::fnv1a32,
    error::{Error, Result},
};

pub(crate) const VERSION: u8 = 1;

pub(crate) const ADDRESS_FAMILIES: AddressFamilyMap = AddressFamilyMap::VMESS;

/// Largest payload carried by one body chunk.
pub(crate) const MAX_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RequestCommand {
    #[default]
    Tcp = 0x01,
    Udp = 0x02,
}

impl TryFrom<u8> for RequestCommand {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(RequestCommand::Tcp),
            0x02 => Ok(RequestCommand::Udp),
            other => Err(Error::UnsupportedCommand(other)),
        }
    }
}

bitflags::bitflags! {
    /// Option bits of a request header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestOption: u8 {
        /// Body is split into length-prefixed, checksummed chunks.
        const CHUNK_STREAM = 0x01;
        const CONNECTION_REUSE = 0x02;
    }
}

/// Plaintext content of a request header that callers choose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub version: u8,
    pub command: RequestCommand,
    pub option: RequestOption,
    pub destination: Destination,
}

impl RequestHeader {
    /// A TCP request with chunked body framing.
    pub fn tcp(destination: Destination) -> Self {
        Self {
            version: VERSION,
            command: RequestCommand::Tcp,
            option: RequestOption::CHUNK_STREAM,
            destination,
        }
    }
}

/// Plaintext content of a response header, minus the echo byte.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHeader {
    pub option: u8,
    pub command: Option<ResponseCommand>,
}

/// Directive a server can attach to its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCommand {
    SwitchAccount(SwitchAccount),
}

/// Asks the client to use another endpoint and secret for a while.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchAccount {
    /// `None` keeps the host of the endpoint that sent the directive.
    pub host: Option<NetworkAddress>,
    pub port: u16,
    pub id: Uuid,
    pub alter_ids: u16,
    pub level: u8,
    pub valid_minutes: u8,
}

const SWITCH_ACCOUNT: u8 = 0x01;

// port, uuid, alter_ids, level, valid_minutes
const SWITCH_ACCOUNT_TAIL: usize = 2 + 16 + 2 + 1 + 1;

// the directive length byte covers the checksum and the body
const MAX_DIRECTIVE_BODY: usize = u8::MAX as usize - 4;

impl ResponseCommand {
    /// Appends `id | len | fnv | body`.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let (id, body) = match self {
            ResponseCommand::SwitchAccount(switch) => (SWITCH_ACCOUNT, switch.encode()?),
        };
        buf.push(id);
        buf.push((4 + body.len()) as u8);
        buf.extend_from_slice(&fnv1a32(&body).to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// `Ok(None)` for a directive id this side does not know.
    pub(crate) fn decode(id: u8, body: &[u8]) -> Result<Option<Self>> {
        match id {
            SWITCH_ACCOUNT => Ok(Some(ResponseCommand::SwitchAccount(SwitchAccount::decode(
                body,
            )?))),
            _ => Ok(None),
        }
    }
}

impl SwitchAccount {
    fn encode(&self) -> Result<Vec<u8>> {
        let host = match &self.host {
            None => String::new(),
            Some(NetworkAddress::Ipv6(ip)) => format!("[{}]", ip),
            Some(address) => address.to_string(),
        };
        if host.len() + 1 + SWITCH_ACCOUNT_TAIL > MAX_DIRECTIVE_BODY {
            return Err(AddressError::DomainTooLong(host.len()).into());
        }

        let mut body = Vec::with_capacity(1 + host.len() + SWITCH_ACCOUNT_TAIL);
        body.push(host.len() as u8);
        body.extend_from_slice(host.as_bytes());
        body.extend_from_slice(&self.port.to_be_bytes());
        body.extend_from_slice(self.id.as_bytes());
        body.extend_from_slice(&self.alter_ids.to_be_bytes());
        body.push(self.level);
        body.push(self.valid_minutes);
        Ok(body)
    }

    fn decode(body: &[u8]) -> Result<Self> {
        let (&host_len, rest) = body.split_first().ok_or(Error::CorruptedPacket)?;
        let host_len = host_len as usize;
        if rest.len() < host_len + SWITCH_ACCOUNT_TAIL {
            return Err(Error::CorruptedPacket);
        }
        let (host, tail) = rest.split_at(host_len);

        let host = match host {
            [] => None,
            bytes => {
                let text = std::str::from_utf8(bytes).map_err(|_| AddressError::InvalidDomain)?;
                Some(NetworkAddress::parse(text)?)
            }
        };

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&tail[2..18]);
        Ok(Self {
            host,
            port: u16::from_be_bytes([tail[0], tail[1]]),
            id: Uuid::from_bytes(uuid),
            alter_ids: u16::from_be_bytes([tail[18], tail[19]]),
            level: tail[20],
            valid_minutes: tail[21],
        })
    }

    /// Where the client should connect, given the endpoint it heard from.
    pub fn destination(&self, current: &Destination) -> Destination {
        let address = match &self.host {
            Some(host) => host.clone(),
            None => current.address.clone(),
        };
        Destination::new(address, self.port)
    }
}
