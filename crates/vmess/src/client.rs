use std::{io, net::SocketAddr, sync::Arc};

use futures::future::try_join;
use log::{debug, info};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{tcp::ReadHalf, TcpStream},
};
use types::Destination;

use crate::{
    clock::Clock,
    encoding::{ClientBody, ClientSession, ResponseDecoder},
    error::Result,
    identity::Identity,
    protocol::{RequestHeader, ResponseCommand, SwitchAccount},
    relay::{decrypt_copy, encrypt_copy},
    selector::{Endpoint, EndpointSelector, EndpointSpec},
};

/// Reaches destinations through VMess endpoints chosen by a selector.
pub struct VmessOutbound {
    selector: Arc<EndpointSelector>,
    clock: Arc<dyn Clock>,
}

impl VmessOutbound {
    pub fn new(selector: Arc<EndpointSelector>, clock: Arc<dyn Clock>) -> Self {
        Self { selector, clock }
    }

    /// Dials the next endpoint. Nothing is sent until [`VmessClientStream::relay`].
    pub async fn connect(&self, destination: &Destination) -> Result<VmessClientStream> {
        let endpoint = self.selector.pick()?;
        let stream = endpoint.destination.connect().await?;
        debug!(
            "connected to vmess endpoint {} for {}",
            endpoint.destination, destination
        );
        Ok(VmessClientStream {
            stream,
            endpoint,
            destination: destination.clone(),
            selector: Arc::clone(&self.selector),
            clock: Arc::clone(&self.clock),
        })
    }
}

/// An open connection to a VMess endpoint, not yet carrying a request.
pub struct VmessClientStream {
    stream: TcpStream,
    endpoint: Endpoint,
    destination: Destination,
    selector: Arc<EndpointSelector>,
    clock: Arc<dyn Clock>,
}

impl VmessClientStream {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn endpoint(&self) -> &Destination {
        &self.endpoint.destination
    }

    /// Sends the request header and relays `inbound` through the endpoint
    /// until both directions have finished. Returns the plaintext byte
    /// counts sent and received.
    pub async fn relay<S>(mut self, inbound: S) -> Result<(u64, u64)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let header = RequestHeader::tcp(self.destination.clone());
        let (request, body) = ClientSession::new().encode_request(
            &self.endpoint.identity,
            &header,
            self.clock.now(),
        )?;
        self.stream.write_all(&request).await?;

        let ClientBody {
            mut writer,
            response,
        } = body;
        let (mut inbound_read, mut inbound_write) = tokio::io::split(inbound);
        let (mut server_read, mut server_write) = self.stream.split();

        let upstream = encrypt_copy(&mut inbound_read, &mut server_write, &mut writer);
        let downstream = receive(
            &mut server_read,
            &mut inbound_write,
            response,
            &self.endpoint.destination,
            &self.selector,
            self.clock.as_ref(),
        );
        let (sent, received) = try_join(upstream, downstream).await?;

        debug!(
            "closed relay to {} via {}: {} bytes up, {} bytes down",
            self.destination, self.endpoint.destination, sent, received
        );
        Ok((sent, received))
    }
}

async fn receive<W>(
    server: &mut ReadHalf<'_>,
    inbound: &mut W,
    response: ResponseDecoder,
    current: &Destination,
    selector: &EndpointSelector,
    clock: &dyn Clock,
) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let (header, mut reader) = response.read_response(server).await?;
    if let Some(ResponseCommand::SwitchAccount(switch)) = header.command {
        switch_account(selector, clock, current, &switch);
    }
    decrypt_copy(server, inbound, &mut reader).await
}

fn switch_account(
    selector: &EndpointSelector,
    clock: &dyn Clock,
    current: &Destination,
    switch: &SwitchAccount,
) {
    let destination = switch.destination(current);
    let identity = Identity::new(switch.id, switch.alter_ids).with_level(u32::from(switch.level));
    let deadline = clock.now() + i64::from(switch.valid_minutes) * 60;
    let spec = EndpointSpec::new(destination.clone(), vec![Arc::new(identity)]).until(deadline);
    if selector.add_if_absent(spec) {
        info!(
            "endpoint {} offered {} for {} minutes",
            current, destination, switch.valid_minutes
        );
    } else {
        debug!("endpoint {} repeated its offer of {}", current, destination);
    }
}

#[cfg(test)]
mod tests {
    use types::NetworkAddress;
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn repeated_directive_keeps_one_entry() {
        let clock = Arc::new(ManualClock::new(1000));
        let current = Destination::new(NetworkAddress::Domain("a.example".into()), 443);
        let selector = EndpointSelector::new(
            clock.clone(),
            vec![EndpointSpec::new(
                current.clone(),
                vec![Arc::new(Identity::new(Uuid::new_v4(), 0))],
            )],
        );
        let switch = SwitchAccount {
            host: None,
            port: 8443,
            id: Uuid::new_v4(),
            alter_ids: 2,
            level: 0,
            valid_minutes: 10,
        };

        for _ in 0..5 {
            switch_account(&selector, clock.as_ref(), &current, &switch);
        }
        assert_eq!(selector.len(), 2);

        let ports: Vec<u16> = (0..4).map(|_| selector.pick().unwrap().destination.port).collect();
        assert_eq!(ports, vec![443, 8443, 443, 8443]);
    }
}
