use std::{
    fmt::{Display, Formatter},
    io::{self, ErrorKind, Result},
    net::SocketAddr,
    sync::Arc,
};

use common::Outbound;
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::socks5::Socks5TcpHandler;

pub struct SocksServer {
    listener: TcpListener,
    outbound: Arc<Outbound>,
}

impl SocksServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, outbound: Arc<Outbound>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("socks server listening on {}", listener.local_addr()?);
        Ok(Self { listener, outbound })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            debug!("accepted connection from {}", peer_addr);
            let outbound = Arc::clone(&self.outbound);
            tokio::spawn(async move {
                if let Err(e) = SocksServer::handle_tcp_client(stream, peer_addr, outbound).await
                {
                    warn!("socks client {} failed: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_tcp_client(
        stream: TcpStream,
        peer: SocketAddr,
        outbound: Arc<Outbound>,
    ) -> io::Result<()> {
        let mut version_buf = [0u8; 1];
        let n = stream.peek(&mut version_buf).await?;
        if n == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "EOF"));
        }

        match version_buf[0] {
            0x04 => Err(io::Error::new(
                ErrorKind::InvalidData,
                "socks4 is not supported",
            )),
            0x05 => Socks5TcpHandler::new(outbound).handle(stream, peer).await,
            version => Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("unknown socks version: {version}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Reply {
    #[default]
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TTLExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Reply for a failed attempt to reach the destination.
    pub(crate) fn for_connect_error(e: &io::Error) -> Self {
        match e.kind() {
            ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            ErrorKind::PermissionDenied => Reply::ConnectionNotAllowed,
            ErrorKind::TimedOut | ErrorKind::NotFound => Reply::HostUnreachable,
            _ => Reply::GeneralFailure,
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::GeneralFailure => write!(f, "general failure"),
            Self::ConnectionNotAllowed => write!(f, "connection not allowed"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::HostUnreachable => write!(f, "host unreachable"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TTLExpired => write!(f, "ttl expired"),
            Self::CommandNotSupported => write!(f, "command not supported"),
            Self::AddressTypeNotSupported => write!(f, "address type not supported"),
        }
    }
}
