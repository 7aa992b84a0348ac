use std::{
    fmt::Display,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use common::Outbound;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use types::{
    encode_address_port, read_address_port, AddressError, AddressFamilyMap, Destination,
    PortOrder,
};

use crate::{
    auth::{AuthMethod, HandshakeRequest, HandshakeResponse},
    server::Reply,
    Command, Version,
};

pub(crate) struct Socks5TcpHandler {
    outbound: Arc<Outbound>,
}

impl Socks5TcpHandler {
    pub(crate) fn new(outbound: Arc<Outbound>) -> Self {
        Self { outbound }
    }

    pub(crate) async fn handle<S>(&self, mut stream: S, peer_addr: SocketAddr) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // 1. handshake
        let handshake_request = HandshakeRequest::read_from(&mut stream).await?;
        trace!("handshake request from {}: {:?}", peer_addr, handshake_request);

        // 2. auth
        self.handle_auth(&mut stream, &handshake_request).await?;

        // 3. request
        let header = match TcpRequestHeader::read_from(&mut stream).await? {
            Ok(header) => header,
            Err(reply) => {
                write_reply(&mut stream, reply, unspecified()).await?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, reply.to_string()));
            }
        };
        debug!("request from {}: {}", peer_addr, header);

        match header.command {
            Command::Connect => self.handle_tcp_connect(stream, header.destination).await,
            command => {
                write_reply(&mut stream, Reply::CommandNotSupported, unspecified()).await?;
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{command} is not supported"),
                ))
            }
        }
    }

    async fn handle_tcp_connect<S>(&self, mut stream: S, target: Destination) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let remote = match self.outbound.connect(&target).await {
            Ok(remote) => remote,
            Err(e) => {
                write_reply(&mut stream, Reply::for_connect_error(&e), unspecified()).await?;
                return Err(e);
            }
        };
        write_reply(&mut stream, Reply::Succeeded, remote.local_addr()?).await?;

        match remote.relay(&mut stream).await {
            Ok((up, down)) => {
                debug!("TCP connection to {} closed, {} up, {} down", target, up, down);
            }
            Err(e) => {
                debug!("TCP connection to {} closed with error: {}", target, e);
            }
        }
        Ok(())
    }

    async fn handle_auth<S>(
        &self,
        stream: &mut S,
        handshake_request: &HandshakeRequest,
    ) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let method = if handshake_request.offers(AuthMethod::NoAuth) {
            AuthMethod::NoAuth
        } else {
            AuthMethod::NoAcceptable
        };
        let handshake_response = HandshakeResponse::new(method);
        trace!("handshake response: {}", handshake_response);
        stream.write_all(&handshake_response.to_bytes()).await?;

        if method == AuthMethod::NoAcceptable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "client offered no acceptable auth method",
            ));
        }
        Ok(())
    }
}

fn unspecified() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
}

async fn write_reply<S>(stream: &mut S, reply: Reply, bound: SocketAddr) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = TcpResponseHeader::new(reply, bound.into());
    trace!("reply: {}", response);
    stream.write_all(&response.to_bytes()?).await
}

/// tcp request header after auth
#[derive(Debug, Clone)]
pub(crate) struct TcpRequestHeader {
    command: Command,
    destination: Destination,
}

impl Display for TcpRequestHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.command, self.destination)
    }
}

impl TcpRequestHeader {
    /// Reads `VER CMD RSV ATYP DST.ADDR DST.PORT`. Requests that deserve a
    /// failure reply come back as `Ok(Err(reply))`.
    pub(crate) async fn read_from<R>(
        stream: &mut R,
    ) -> io::Result<std::result::Result<TcpRequestHeader, Reply>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut req_buf = [0u8; 3];
        stream.read_exact(&mut req_buf).await?;

        let version = Version::try_from(req_buf[0])?;
        if version != Version::Socks5 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid version: {:?}", version),
            ));
        }

        let (address, port) =
            match read_address_port(stream, &AddressFamilyMap::SOCKS, PortOrder::AddressFirst)
                .await
            {
                Ok(address) => address,
                Err(AddressError::UnknownAddressFamily(atyp)) => {
                    debug!("unknown address type {:#04x}", atyp);
                    return Ok(Err(Reply::AddressTypeNotSupported));
                }
                Err(e) => return Err(e.into()),
            };

        let command = match Command::try_from(req_buf[1]) {
            Ok(command) => command,
            Err(byte) => {
                debug!("unknown command {:#04x}", byte);
                return Ok(Err(Reply::CommandNotSupported));
            }
        };

        Ok(Ok(TcpRequestHeader {
            command,
            destination: Destination::new(address, port),
        }))
    }
}

pub(crate) struct TcpResponseHeader {
    reply: Reply,
    address: Destination,
}

impl TcpResponseHeader {
    pub(crate) fn new(reply: Reply, address: Destination) -> Self {
        Self { reply, address }
    }

    pub(crate) fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![Version::Socks5 as u8, self.reply as u8, 0x00];
        encode_address_port(
            &mut buf,
            &self.address.address,
            self.address.port,
            &AddressFamilyMap::SOCKS,
            PortOrder::AddressFirst,
        )?;
        Ok(buf)
    }
}

impl Display for TcpResponseHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.reply, self.address)
    }
}
