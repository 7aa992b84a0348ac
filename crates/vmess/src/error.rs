use std::io;

use thiserror::Error;
use types::AddressError;

pub type Result<T> = std::result::Result<T, Error>;

/// Every error ends the connection it happened on; nothing here is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// Lookup miss. Unknown identity and stale timestamp look the same.
    #[error("invalid user")]
    InvalidUser,

    #[error("unsupported version {0}")]
    InvalidVersion(u8),

    #[error("corrupted packet")]
    CorruptedPacket,

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("unexpected response header")]
    InvalidResponse,

    #[error("label {0:?} is already registered")]
    DuplicateLabel(String),

    #[error("no valid endpoint available")]
    Empty,

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::Address(AddressError::Io(e)) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
