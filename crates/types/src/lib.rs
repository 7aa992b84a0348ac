//! Network addresses shared by every protocol in the workspace, and the
//! binary codec that moves them on and off the wire.
//!
//! Protocols disagree on the discriminator byte for each address family
//! and on whether the port comes first, so both are parameters of the
//! codec rather than constants.

pub mod codec;
pub mod error;
pub mod net;

pub use codec::{
    encode_address_port, read_address_port, write_address_port, AddressFamily, AddressFamilyMap,
    PortOrder,
};
pub use error::AddressError;
pub use net::{Destination, NetworkAddress, MAX_DOMAIN_LEN};
