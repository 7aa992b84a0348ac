mod auth;
mod server;
mod socks5;

use std::{fmt, io};

pub use server::{Reply, SocksServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Version {
    Socks4 = 4,
    #[default]
    Socks5 = 5,
}

impl TryFrom<u8> for Version {
    type Error = io::Error;

    fn try_from(version: u8) -> io::Result<Self> {
        match version {
            4 => Ok(Self::Socks4),
            5 => Ok(Self::Socks5),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown socks version: {version}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Command {
    #[default]
    Connect = 1,
    Bind = 2,
    UdpAssociate = 3,
}

impl TryFrom<u8> for Command {
    /// The unrecognised byte.
    type Error = u8;

    fn try_from(command: u8) -> Result<Self, u8> {
        match command {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Bind),
            3 => Ok(Self::UdpAssociate),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => write!(f, "CONNECT"),
            Command::Bind => write!(f, "BIND"),
            Command::UdpAssociate => write!(f, "UDP_ASSOCIATE"),
        }
    }
}
