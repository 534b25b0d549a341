//! Error taxonomy for the engine (see spec §7).
//!
//! Codec and socket errors are meant to be recovered from locally (drop the
//! packet, keep going); state-machine errors are returned to callers.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Unified error type for the mDNS engine.
#[derive(Error, Debug)]
pub enum MdnsError {
    /// The buffer ended before a complete field could be read.
    #[error("truncated packet")]
    TruncatedPacket,

    /// A label sequence violated RFC 1035 §4.1.4 compression rules.
    #[error("malformed name: {0}")]
    MalformedName(String),

    /// A record's `RDATA` could not be parsed as its declared type.
    #[error("malformed {0:?} record: {1}")]
    MalformedRecord(crate::codec::Type, String),

    /// The reader encountered a record type it does not know how to decode.
    /// The reader's policy is to skip the record's `rdlength` bytes and
    /// continue; this variant exists so callers can observe that it happened.
    #[error("unknown record type {0}")]
    UnknownRecordType(u16),

    /// The writer's destination buffer could not hold the encoded message.
    #[error("buffer full")]
    BufferFull,

    /// `Writer::rewind` was called while a previous rewind was still open.
    #[error("invalid rewind: nested rewinds are not supported")]
    InvalidRewind,

    /// A transient OS-level error on send/receive. The socket stays open.
    #[error("socket io error on {addr:?}: {source}")]
    SocketIo {
        addr: Option<SocketAddr>,
        #[source]
        source: io::Error,
    },

    /// `addService` was called with a name already owned by a non-exiting
    /// registration.
    #[error("service name already registered by service {0}")]
    NameConflict(u32),

    /// A public method that must run on its owning worker thread was called
    /// from elsewhere.
    #[error("called from the wrong thread")]
    WrongThread,

    /// A conflicting record was observed during probing and no automatic
    /// rename was possible.
    #[error("probing conflict for service {0}")]
    ProbingConflict(u32),

    /// No registration exists for the given service id.
    #[error("no such service {0}")]
    NoSuchService(u32),
}

impl From<io::Error> for MdnsError {
    fn from(source: io::Error) -> Self {
        MdnsError::SocketIo { addr: None, source }
    }
}

pub type Result<T> = std::result::Result<T, MdnsError>;
