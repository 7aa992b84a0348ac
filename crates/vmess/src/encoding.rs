//! Request and response headers.
//!
//! A request is `lookup hash(16)` in clear followed by the header encrypted
//! with the primary ID's command key:
//!
//! ```text
//! version(1) | body iv(16) | body key(16) | echo(1) | option(1) | reserved(2)
//! | command(1) | port(2) | family(1) | address | fnv1a32(4)
//! ```
//!
//! The response key and IV are MD5 of the request body key and IV. A
//! response is `echo(1) | option(1) | directive id(1) | directive len(1) |
//! directive`, encrypted together with the response body as one stream.

use std::{io, sync::Arc};

use log::{debug, trace, warn};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt};
use types::{encode_address_port, read_address_port, AddressError, Destination, PortOrder};

use crate::{
    body::{BodyReader, BodyWriter, HeaderReader},
    crypto::{decryptor, encryptor, fnv1a32, response_key_iv, timestamp_iv},
    error::{Error, Result},
    identity::Identity,
    protocol::{
        RequestCommand, RequestHeader, RequestOption, ResponseCommand, ResponseHeader,
        ADDRESS_FAMILIES, VERSION,
    },
    validator::{AuthCache, AuthMatch},
};

/// Timestamps sent by clients are drawn from `now ± TIMESTAMP_JITTER_SECS`.
pub const TIMESTAMP_JITTER_SECS: i64 = 30;

// version, body iv, body key, echo, option, reserved, command
const FIXED_PREFIX_LEN: usize = 1 + 16 + 16 + 1 + 1 + 2 + 1;

/// Client state before the request header is written.
pub struct ClientSession {
    body_key: [u8; 16],
    body_iv: [u8; 16],
    echo: u8,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    /// Draws a fresh body key, IV and echo byte.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            body_key: rng.gen(),
            body_iv: rng.gen(),
            echo: rng.gen(),
        }
    }

    pub fn encode_request(
        self,
        identity: &Identity,
        header: &RequestHeader,
        now: i64,
    ) -> Result<(Vec<u8>, ClientBody)> {
        let timestamp =
            now + rand::thread_rng().gen_range(-TIMESTAMP_JITTER_SECS..=TIMESTAMP_JITTER_SECS);

        let mut plain = Vec::with_capacity(FIXED_PREFIX_LEN + 4 + 2 + 255 + 4);
        plain.push(header.version);
        plain.extend_from_slice(&self.body_iv);
        plain.extend_from_slice(&self.body_key);
        plain.push(self.echo);
        plain.push(header.option.bits());
        plain.extend_from_slice(&[0, 0]);
        plain.push(header.command as u8);
        encode_address_port(
            &mut plain,
            &header.destination.address,
            header.destination.port,
            &ADDRESS_FAMILIES,
            PortOrder::PortFirst,
        )?;
        let checksum = fnv1a32(&plain);
        plain.extend_from_slice(&checksum.to_be_bytes());

        encryptor(&identity.primary().cmd_key(), &timestamp_iv(timestamp)).encrypt(&mut plain);

        let mut wire = Vec::with_capacity(16 + plain.len());
        wire.extend_from_slice(&identity.any_id().auth_hash(timestamp));
        wire.extend_from_slice(&plain);

        trace!(
            "encoded {:?} request to {}, {} bytes",
            header.command,
            header.destination,
            wire.len()
        );

        let chunked = header.option.contains(RequestOption::CHUNK_STREAM);
        let (response_key, response_iv) = response_key_iv(&self.body_key, &self.body_iv);
        let body = ClientBody {
            writer: BodyWriter::new(encryptor(&self.body_key, &self.body_iv), chunked),
            response: ResponseDecoder {
                key: response_key,
                iv: response_iv,
                echo: self.echo,
                chunked,
            },
        };
        Ok((wire, body))
    }
}

/// Client state once the request header is on the wire.
pub struct ClientBody {
    pub writer: BodyWriter,
    pub response: ResponseDecoder,
}

/// Reads the server's response header.
pub struct ResponseDecoder {
    key: [u8; 16],
    iv: [u8; 16],
    echo: u8,
    chunked: bool,
}

impl ResponseDecoder {
    pub async fn read_response<R>(self, reader: &mut R) -> Result<(ResponseHeader, BodyReader)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut cipher = decryptor(&self.key, &self.iv);

        let mut fixed = [0u8; 4];
        reader.read_exact(&mut fixed).await?;
        cipher.decrypt(&mut fixed);
        let [echo, option, id, len] = fixed;
        if echo != self.echo {
            return Err(Error::InvalidResponse);
        }

        let mut command = None;
        if len > 0 {
            if len < 4 {
                return Err(Error::CorruptedPacket);
            }
            let mut directive = vec![0u8; len as usize];
            reader.read_exact(&mut directive).await?;
            cipher.decrypt(&mut directive);
            let body = directive.split_off(4);
            if directive[..] != fnv1a32(&body).to_be_bytes() {
                return Err(Error::CorruptedPacket);
            }
            command = ResponseCommand::decode(id, &body)?;
            if command.is_none() {
                warn!("skipping unknown response directive {:#04x}", id);
            }
        }

        let header = ResponseHeader { option, command };
        Ok((header, BodyReader::new(cipher, self.chunked)))
    }
}

/// A request whose header authenticated and passed its checksum.
pub struct DecodedRequest {
    pub header: RequestHeader,
    pub identity: Arc<Identity>,
    pub timestamp: i64,
    pub body: ServerBody,
}

/// Server side body handles, available only after a successful decode.
pub struct ServerBody {
    pub reader: BodyReader,
    pub response: ResponseEncoder,
}

/// Writes the response header.
pub struct ResponseEncoder {
    key: [u8; 16],
    iv: [u8; 16],
    echo: u8,
    chunked: bool,
}

impl ResponseEncoder {
    pub fn encode_response(self, header: &ResponseHeader) -> Result<(Vec<u8>, BodyWriter)> {
        let mut buf = Vec::with_capacity(4 + 64);
        buf.push(self.echo);
        buf.push(header.option);
        match &header.command {
            Some(command) => command.encode(&mut buf)?,
            None => buf.extend_from_slice(&[0, 0]),
        }

        let mut cipher = encryptor(&self.key, &self.iv);
        cipher.encrypt(&mut buf);
        Ok((buf, BodyWriter::new(cipher, self.chunked)))
    }
}

/// Reads and verifies one request header from `reader`.
///
/// Consumes exactly the header bytes. An unknown lookup hash fails before
/// anything else is read.
pub async fn decode_request<R>(cache: &AuthCache, reader: &mut R) -> Result<DecodedRequest>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut auth = [0u8; 16];
    reader.read_exact(&mut auth).await?;
    let AuthMatch {
        identity,
        timestamp,
    } = cache.get(&auth).ok_or(Error::InvalidUser)?;

    let cipher = decryptor(&identity.primary().cmd_key(), &timestamp_iv(timestamp));
    let mut header = HeaderReader::new(reader, cipher);

    let mut prefix = [0u8; FIXED_PREFIX_LEN];
    header.read_exact(&mut prefix).await.map_err(truncated)?;
    let version = prefix[0];
    if version != VERSION {
        return Err(Error::InvalidVersion(version));
    }

    let (address, port) = read_address_port(&mut header, &ADDRESS_FAMILIES, PortOrder::PortFirst)
        .await
        .map_err(|e| match e {
            AddressError::Io(e) => truncated(e),
            _ => Error::CorruptedPacket,
        })?;

    let expected = fnv1a32(header.transcript());
    let mut checksum = [0u8; 4];
    header.read_exact(&mut checksum).await.map_err(truncated)?;
    if u32::from_be_bytes(checksum) != expected {
        return Err(Error::CorruptedPacket);
    }

    // only now is the rest of the prefix trustworthy
    let command = RequestCommand::try_from(prefix[37])?;
    let option = RequestOption::from_bits_retain(prefix[34]);

    let mut body_iv = [0u8; 16];
    body_iv.copy_from_slice(&prefix[1..17]);
    let mut body_key = [0u8; 16];
    body_key.copy_from_slice(&prefix[17..33]);
    let echo = prefix[33];

    let destination = Destination::new(address, port);
    debug!(
        "accepted {:?} request to {} from {}",
        command,
        destination,
        identity.label().unwrap_or("<unlabeled>")
    );

    let chunked = option.contains(RequestOption::CHUNK_STREAM);
    let (response_key, response_iv) = response_key_iv(&body_key, &body_iv);
    Ok(DecodedRequest {
        header: RequestHeader {
            version,
            command,
            option,
            destination,
        },
        identity,
        timestamp,
        body: ServerBody {
            reader: BodyReader::new(decryptor(&body_key, &body_iv), chunked),
            response: ResponseEncoder {
                key: response_key,
                iv: response_iv,
                echo,
                chunked,
            },
        },
    })
}

// a short read inside the encrypted header looks like tampering
fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::CorruptedPacket
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use md5::{Digest, Md5};
    use types::NetworkAddress;
    use uuid::Uuid;

    use super::*;
    use crate::{
        clock::ManualClock,
        protocol::SwitchAccount,
        validator::CACHE_WINDOW_SECS,
    };

    const T0: i64 = 1000;

    fn example() -> Destination {
        Destination::new(NetworkAddress::Domain("example.com".into()), 443)
    }

    fn cache_with(identity: &Identity) -> (Arc<ManualClock>, AuthCache) {
        let clock = Arc::new(ManualClock::new(T0));
        let cache = AuthCache::new(clock.clone());
        cache.add(identity.clone()).unwrap();
        (clock, cache)
    }

    fn encode(identity: &Identity, header: &RequestHeader) -> (Vec<u8>, ClientBody) {
        ClientSession::new()
            .encode_request(identity, header, T0)
            .unwrap()
    }

    async fn decode(cache: &AuthCache, wire: &[u8]) -> Result<DecodedRequest> {
        decode_request(cache, &mut Cursor::new(wire.to_vec())).await
    }

    // encrypts an arbitrary header plaintext the way a client would
    fn seal_raw(identity: &Identity, timestamp: i64, mut plain: Vec<u8>) -> Vec<u8> {
        let checksum = fnv1a32(&plain);
        plain.extend_from_slice(&checksum.to_be_bytes());
        encryptor(&identity.primary().cmd_key(), &timestamp_iv(timestamp)).encrypt(&mut plain);
        [identity.primary().auth_hash(timestamp).to_vec(), plain].concat()
    }

    fn raw_prefix(version: u8, command: u8) -> Vec<u8> {
        let mut plain = vec![version];
        plain.extend_from_slice(&[0x11; 32]);
        plain.extend_from_slice(&[0x22, 0x01, 0, 0, command]);
        encode_address_port(
            &mut plain,
            &example().address,
            443,
            &ADDRESS_FAMILIES,
            PortOrder::PortFirst,
        )
        .unwrap();
        plain
    }

    #[tokio::test]
    async fn request_decodes_to_what_was_encoded() {
        let identity = Identity::new(Uuid::new_v4(), 2).with_label("alice");
        let (_, cache) = cache_with(&identity);
        let header = RequestHeader::tcp(example());

        let (wire, _) = encode(&identity, &header);
        let decoded = decode(&cache, &wire).await.unwrap();

        assert_eq!(decoded.header, header);
        assert_eq!(decoded.identity.label(), Some("alice"));
        assert!((T0 - TIMESTAMP_JITTER_SECS..=T0 + TIMESTAMP_JITTER_SECS)
            .contains(&decoded.timestamp));
    }

    #[tokio::test]
    async fn every_address_family_survives() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        for dest in [
            Destination::new(std::net::Ipv4Addr::new(93, 184, 216, 34), 80),
            Destination::new(std::net::Ipv6Addr::LOCALHOST, 8443),
            Destination::new(NetworkAddress::Domain("a".repeat(255)), 1),
        ] {
            let mut header = RequestHeader::tcp(dest);
            header.command = RequestCommand::Udp;
            header.option = RequestOption::empty();
            let (wire, _) = encode(&identity, &header);
            assert_eq!(decode(&cache, &wire).await.unwrap().header, header);
        }
    }

    #[tokio::test]
    async fn oversized_domain_is_rejected_at_encode() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let dest = Destination::new(NetworkAddress::Domain("a".repeat(256)), 1);
        let result = ClientSession::new().encode_request(&identity, &RequestHeader::tcp(dest), T0);
        assert!(matches!(
            result,
            Err(Error::Address(AddressError::DomainTooLong(256)))
        ));
    }

    #[test]
    fn bad_domain_is_rejected_before_sending() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        for domain in ["bad host", "10.0.0.1"] {
            let dest = Destination::new(NetworkAddress::Domain(domain.into()), 1);
            let result =
                ClientSession::new().encode_request(&identity, &RequestHeader::tcp(dest), T0);
            assert!(
                matches!(result, Err(Error::Address(AddressError::InvalidDomain))),
                "{domain}"
            );
        }
    }

    #[test]
    fn request_layout_is_bit_exact() {
        let identity = Identity::new(
            Uuid::parse_str("b831381d-6324-4d53-ad4f-8cda48b30811").unwrap(),
            0,
        );
        let session = ClientSession {
            body_key: [0xa1; 16],
            body_iv: [0xb2; 16],
            echo: 0x5c,
        };
        let dest = Destination::new(std::net::Ipv4Addr::new(1, 2, 3, 4), 8080);
        let header = RequestHeader::tcp(dest);
        let (wire, _) = session.encode_request(&identity, &header, T0).unwrap();

        let timestamp = (T0 - TIMESTAMP_JITTER_SECS..=T0 + TIMESTAMP_JITTER_SECS)
            .find(|&ts| wire[..16] == identity.primary().auth_hash(ts))
            .unwrap();
        let mut plain = wire[16..].to_vec();
        decryptor(&identity.primary().cmd_key(), &timestamp_iv(timestamp)).decrypt(&mut plain);

        assert_eq!(plain.len(), 49);
        assert_eq!(plain[0], VERSION);
        assert_eq!(&plain[1..17], &[0xb2; 16]);
        assert_eq!(&plain[17..33], &[0xa1; 16]);
        assert_eq!(plain[33], 0x5c);
        assert_eq!(plain[34], RequestOption::CHUNK_STREAM.bits());
        assert_eq!(&plain[35..37], &[0, 0]);
        assert_eq!(plain[37], 0x01);
        assert_eq!(&plain[38..40], &8080u16.to_be_bytes());
        assert_eq!(plain[40], 0x01);
        assert_eq!(&plain[41..45], &[1, 2, 3, 4]);
        assert_eq!(&plain[45..], &fnv1a32(&plain[..45]).to_be_bytes());
    }

    #[test]
    fn every_session_draws_fresh_keys() {
        let a = ClientSession::new();
        let b = ClientSession::new();
        assert_ne!(a.body_key, b.body_key);
        assert_ne!(a.body_iv, b.body_iv);
        assert_ne!(a.body_key, a.body_iv);
    }

    #[tokio::test]
    async fn response_is_keyed_by_md5_of_body_key_and_iv() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let session = ClientSession {
            body_key: [0x01; 16],
            body_iv: [0x02; 16],
            echo: 0x77,
        };
        let (request, _) = session
            .encode_request(&identity, &RequestHeader::tcp(example()), T0)
            .unwrap();
        let decoded = decode(&cache, &request).await.unwrap();
        let (mut wire, _) = decoded
            .body
            .response
            .encode_response(&ResponseHeader::default())
            .unwrap();

        let key: [u8; 16] = Md5::digest([0x01; 16]).into();
        let iv: [u8; 16] = Md5::digest([0x02; 16]).into();
        assert_eq!(response_key_iv(&[0x01; 16], &[0x02; 16]), (key, iv));

        decryptor(&key, &iv).decrypt(&mut wire);
        assert_eq!(wire, [0x77, 0, 0, 0]);
    }

    #[tokio::test]
    async fn jitter_stays_within_bounds() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let header = RequestHeader::tcp(example());
        for _ in 0..50 {
            let (wire, _) = encode(&identity, &header);
            let ts = decode(&cache, &wire).await.unwrap().timestamp;
            assert!((ts - T0).abs() <= TIMESTAMP_JITTER_SECS);
        }
    }

    #[tokio::test]
    async fn unknown_identity_is_invalid_user() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let stranger = Identity::new(Uuid::new_v4(), 0);
        let (wire, _) = encode(&stranger, &RequestHeader::tcp(example()));
        assert!(matches!(
            decode(&cache, &wire).await,
            Err(Error::InvalidUser)
        ));
    }

    #[tokio::test]
    async fn stale_request_is_invalid_user() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (clock, cache) = cache_with(&identity);
        let (wire, _) = encode(&identity, &RequestHeader::tcp(example()));

        clock.advance(TIMESTAMP_JITTER_SECS + CACHE_WINDOW_SECS + 1);
        cache.sweep();
        assert!(matches!(
            decode(&cache, &wire).await,
            Err(Error::InvalidUser)
        ));
    }

    #[tokio::test]
    async fn every_flipped_bit_is_caught() {
        let identity = Identity::new(Uuid::new_v4(), 1);
        let (_, cache) = cache_with(&identity);
        let (wire, _) = encode(&identity, &RequestHeader::tcp(example()));

        for bit in 0..wire.len() * 8 {
            let mut tampered = wire.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            match decode(&cache, &tampered).await {
                Err(Error::InvalidUser) => assert!(bit < 128, "bit {bit}"),
                Err(Error::CorruptedPacket) | Err(Error::InvalidVersion(_)) => {
                    assert!(bit >= 128, "bit {bit}")
                }
                Err(e) => panic!("bit {bit}: unexpected error {e:?}"),
                Ok(_) => panic!("bit {bit}: tampered request decoded"),
            }
        }
    }

    #[tokio::test]
    async fn wrong_version_is_reported() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let wire = seal_raw(&identity, T0, raw_prefix(2, 0x01));
        assert!(matches!(
            decode(&cache, &wire).await,
            Err(Error::InvalidVersion(2))
        ));
    }

    #[tokio::test]
    async fn unknown_command_is_checked_after_checksum() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);

        let wire = seal_raw(&identity, T0, raw_prefix(VERSION, 0x03));
        assert!(matches!(
            decode(&cache, &wire).await,
            Err(Error::UnsupportedCommand(0x03))
        ));

        let mut wire = wire;
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(matches!(
            decode(&cache, &wire).await,
            Err(Error::CorruptedPacket)
        ));
    }

    #[tokio::test]
    async fn truncated_header_is_corrupted() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let (wire, _) = encode(&identity, &RequestHeader::tcp(example()));
        for len in [16 + 10, 16 + FIXED_PREFIX_LEN + 3, wire.len() - 1] {
            assert!(matches!(
                decode(&cache, &wire[..len]).await,
                Err(Error::CorruptedPacket)
            ));
        }
    }

    #[tokio::test]
    async fn response_and_body_travel_back() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let (request, client) = encode(&identity, &RequestHeader::tcp(example()));
        let decoded = decode(&cache, &request).await.unwrap();

        let switch = SwitchAccount {
            host: None,
            port: 20000,
            id: Uuid::new_v4(),
            alter_ids: 4,
            level: 0,
            valid_minutes: 5,
        };
        let response = ResponseHeader {
            option: 0,
            command: Some(ResponseCommand::SwitchAccount(switch.clone())),
        };
        let (mut wire, mut writer) = decoded.body.response.encode_response(&response).unwrap();
        writer.seal(b"pong", &mut wire);
        writer.seal_end(&mut wire);

        let mut cursor = Cursor::new(wire);
        let (header, mut reader) = client.response.read_response(&mut cursor).await.unwrap();
        assert_eq!(header, response);
        assert_eq!(reader.read_chunk(&mut cursor).await.unwrap().unwrap(), b"pong");
        assert!(reader.read_chunk(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn response_echo_must_match() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let (request, client) = encode(&identity, &RequestHeader::tcp(example()));
        let decoded = decode(&cache, &request).await.unwrap();
        let (wire, _) = decoded
            .body
            .response
            .encode_response(&ResponseHeader::default())
            .unwrap();

        let mut decoder = client.response;
        decoder.echo ^= 0xff;
        assert!(matches!(
            decoder.read_response(&mut Cursor::new(wire)).await,
            Err(Error::InvalidResponse)
        ));
    }

    #[tokio::test]
    async fn tampered_directive_is_corrupted() {
        let identity = Identity::new(Uuid::new_v4(), 0);
        let (_, cache) = cache_with(&identity);
        let (request, client) = encode(&identity, &RequestHeader::tcp(example()));
        let decoded = decode(&cache, &request).await.unwrap();

        let response = ResponseHeader {
            option: 0,
            command: Some(ResponseCommand::SwitchAccount(SwitchAccount {
                host: Some(NetworkAddress::Domain("b.example".into())),
                port: 1,
                id: Uuid::new_v4(),
                alter_ids: 0,
                level: 0,
                valid_minutes: 1,
            })),
        };
        let (mut wire, _) = decoded.body.response.encode_response(&response).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x80;

        assert!(matches!(
            client.response.read_response(&mut Cursor::new(wire)).await,
            Err(Error::CorruptedPacket)
        ));
    }
}
