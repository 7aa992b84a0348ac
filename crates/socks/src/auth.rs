use std::{
    fmt::{Display, Formatter},
    io,
};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::Version;

/// Client greeting: `VER NMETHODS METHODS...`.
#[derive(Debug, Clone)]
pub(crate) struct HandshakeRequest {
    pub(crate) methods: Vec<u8>,
}

impl HandshakeRequest {
    pub(crate) async fn read_from<R>(stream: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;
        let version = Version::try_from(buf[0])?;
        if version != Version::Socks5 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid version: {:?}", version),
            ));
        }
        let mut methods = vec![0u8; buf[1] as usize];
        stream.read_exact(&mut methods).await?;
        Ok(Self { methods })
    }

    pub(crate) fn offers(&self, method: AuthMethod) -> bool {
        self.methods.contains(&(method as u8))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HandshakeResponse {
    pub(crate) version: Version,
    pub(crate) method: AuthMethod,
}

impl HandshakeResponse {
    pub(crate) fn new(method: AuthMethod) -> Self {
        Self {
            version: Version::Socks5,
            method,
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; 2] {
        [self.version as u8, self.method as u8]
    }
}

impl Display for HandshakeResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:?}", self.version, self.method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub(crate) enum AuthMethod {
    #[default]
    NoAuth = 0x00,
    NoAcceptable = 0xff,
}
