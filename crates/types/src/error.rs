use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("domain name is {0} bytes long, at most 255 fit")]
    DomainTooLong(usize),

    #[error("invalid domain name")]
    InvalidDomain,

    #[error("unknown address family {0:#04x}")]
    UnknownAddressFamily(u8),

    #[error("address family bytes must be distinct")]
    AmbiguousFamilyMap,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<AddressError> for io::Error {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
