use std::io;

use thiserror::Error as ThisError;

use crate::rendezvous::Role;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

#[derive(Debug, ThisError)]
pub enum ErrorKind {
    #[error("slot count must be a non-zero power of two, got {0}")]
    Capacity(usize),
    #[error("slot size must be greater than zero")]
    SlotSize,
    #[error("message must be exactly {expected} bytes, got {actual}")]
    MessageSize { expected: usize, actual: usize },
    #[error("shared memory segment is {actual} bytes, expected {expected}")]
    SegmentSize { expected: usize, actual: usize },
    #[error("shared memory segment is closed")]
    Closed,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("operation is not available to the {0:?} role")]
    Role(Role),
    #[error("a benchmark peer exited unsuccessfully")]
    PeerFailed,
    #[error("timed out while spinning")]
    Timeout,
    #[error("unexpected payload for message {sequence}")]
    Protocol { sequence: u64 },
    #[error("io error: {0}")]
    Io(io::Error),
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::new(ErrorKind::Io(value))
    }
}

impl From<nix::Error> for Error {
    fn from(value: nix::Error) -> Self {
        Error::new(ErrorKind::Io(value.into()))
    }
}
