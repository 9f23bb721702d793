use core::fmt;

use crate::packet::{ErrorCode, Type};

#[cfg(feature = "std")]
use smoltcp::wire::IpEndpoint;
#[cfg(feature = "std")]
use std::io::Error as IoError;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A datagram that is not a well-formed TFTP packet.
    Malformed,
    /// A well-formed packet of a kind the transfer did not expect.
    UnexpectedPacket(Type),
    /// A well-formed packet carrying the wrong block number.
    UnexpectedBlock { expected: u16, received: u16 },
    /// The peer aborted the transfer with an error packet.
    Remote(ErrorCode),
    /// The packet does not fit in a single datagram.
    Exhausted,
    /// The requested path escapes the root or cannot be resolved.
    #[cfg(feature = "std")]
    AccessViolation,
    #[cfg(feature = "std")]
    FileNotFound(IoError),
    /// Retransmissions ran out while waiting for the peer.
    #[cfg(feature = "std")]
    TimedOut,
    /// Too many datagrams from unknown TIDs; carries the last one seen.
    #[cfg(feature = "std")]
    Abandoned(IpEndpoint),
    #[cfg(feature = "std")]
    Config(String),
    #[cfg(feature = "std")]
    Io(IoError),
}

impl From<ErrorCode> for Error {
    fn from(value: ErrorCode) -> Self {
        Self::Remote(value)
    }
}

#[cfg(feature = "std")]
impl From<IoError> for Error {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed => write!(f, "malformed packet"),
            Error::UnexpectedPacket(type_) => write!(f, "unexpected {type_:?} packet"),
            Error::UnexpectedBlock { expected, received } => {
                write!(f, "expected block {expected}, received block {received}")
            }
            Error::Remote(code) => write!(f, "peer aborted the transfer ({code:?})"),
            Error::Exhausted => write!(f, "packet exceeds the datagram buffer"),
            #[cfg(feature = "std")]
            Error::AccessViolation => write!(f, "access violation"),
            #[cfg(feature = "std")]
            Error::FileNotFound(err) => write!(f, "file not found: {err}"),
            #[cfg(feature = "std")]
            Error::TimedOut => write!(f, "transfer timed out"),
            #[cfg(feature = "std")]
            Error::Abandoned(last) => {
                write!(f, "too many datagrams from unknown TIDs, last from {last}")
            }
            #[cfg(feature = "std")]
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            #[cfg(feature = "std")]
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FileNotFound(err) | Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
