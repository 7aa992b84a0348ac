use std::{io, net::SocketAddr, sync::Arc};

use log::trace;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use types::Destination;
use vmess::{VmessClientStream, VmessOutbound};

/// How inbound connections reach their destination.
pub enum Outbound {
    Direct,
    Vmess(Arc<VmessOutbound>),
}

impl Outbound {
    pub async fn connect(&self, destination: &Destination) -> io::Result<ProxyClientStream> {
        match self {
            Outbound::Direct => {
                trace!("dialing {} directly", destination);
                Ok(ProxyClientStream::Direct(destination.connect().await?))
            }
            Outbound::Vmess(outbound) => {
                trace!("dialing {} through vmess", destination);
                Ok(ProxyClientStream::Vmess(outbound.connect(destination).await?))
            }
        }
    }
}

pub enum ProxyClientStream {
    Direct(TcpStream),
    Vmess(VmessClientStream),
}

impl ProxyClientStream {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            ProxyClientStream::Direct(stream) => stream.local_addr(),
            ProxyClientStream::Vmess(stream) => stream.local_addr(),
        }
    }

    /// Relays `inbound` to the destination until both directions are done.
    /// Returns the byte counts sent and received.
    pub async fn relay<S>(self, mut inbound: S) -> io::Result<(u64, u64)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            ProxyClientStream::Direct(mut stream) => {
                tokio::io::copy_bidirectional(&mut inbound, &mut stream).await
            }
            ProxyClientStream::Vmess(stream) => Ok(stream.relay(inbound).await?),
        }
    }
}
