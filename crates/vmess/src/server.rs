use std::{io, net::SocketAddr, sync::Arc};

use futures::future::try_join;
use log::{debug, info, warn};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, ToSocketAddrs},
};

use crate::{
    encoding::{decode_request, DecodedRequest, ServerBody},
    error::{Error, Result},
    protocol::{RequestCommand, ResponseCommand, ResponseHeader},
    relay::{decrypt_copy, encrypt_copy},
    validator::AuthCache,
};

/// Accepts VMess connections and relays them to their destinations over
/// direct TCP.
pub struct VmessServer {
    listener: TcpListener,
    cache: Arc<AuthCache>,
    directive: Option<ResponseCommand>,
}

impl VmessServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, cache: Arc<AuthCache>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("vmess server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            cache,
            directive: None,
        })
    }

    /// Attaches `command` to every response.
    pub fn with_directive(mut self, command: ResponseCommand) -> Self {
        self.directive = Some(command);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("accepted vmess connection from {}", peer);
            let cache = Arc::clone(&self.cache);
            let directive = self.directive.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &cache, directive).await {
                    warn!("vmess connection from {} failed: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    cache: &AuthCache,
    directive: Option<ResponseCommand>,
) -> Result<()> {
    let DecodedRequest { header, body, .. } = decode_request(cache, &mut stream).await?;
    if header.command != RequestCommand::Tcp {
        return Err(Error::UnsupportedCommand(header.command as u8));
    }

    let mut remote = header.destination.connect().await?;
    debug!("connected to {}", header.destination);

    let ServerBody {
        mut reader,
        response,
    } = body;
    let (response, mut writer) = response.encode_response(&ResponseHeader {
        option: 0,
        command: directive,
    })?;
    stream.write_all(&response).await?;

    let (mut client_read, mut client_write) = stream.split();
    let (mut remote_read, mut remote_write) = remote.split();
    let (sent, received) = try_join(
        decrypt_copy(&mut client_read, &mut remote_write, &mut reader),
        encrypt_copy(&mut remote_read, &mut client_write, &mut writer),
    )
    .await?;

    debug!(
        "closed relay to {}: {} bytes up, {} bytes down",
        header.destination, sent, received
    );
    Ok(())
}
