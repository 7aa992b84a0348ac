//! VMess protocol core: request authentication, header codec, body framing,
//! endpoint selection, and the TCP inbound/outbound built on them.

mod body;
pub mod client;
pub mod clock;
mod crypto;
pub mod encoding;
pub mod error;
pub mod id;
pub mod identity;
pub mod protocol;
pub mod relay;
pub mod selector;
pub mod server;
pub mod validator;

pub use body::{BodyReader, BodyWriter};
pub use client::{VmessClientStream, VmessOutbound};
pub use clock::{Clock, ManualClock, SystemClock};
pub use encoding::{
    decode_request, ClientBody, ClientSession, DecodedRequest, ResponseDecoder, ResponseEncoder,
    ServerBody,
};
pub use error::{Error, Result};
pub use id::ID;
pub use identity::Identity;
pub use protocol::{
    RequestCommand, RequestHeader, RequestOption, ResponseCommand, ResponseHeader, SwitchAccount,
};
pub use selector::{Endpoint, EndpointSelector, EndpointSpec, Validity};
pub use server::VmessServer;
pub use validator::{AuthCache, AuthMatch, CACHE_WINDOW_SECS, SWEEP_INTERVAL};
