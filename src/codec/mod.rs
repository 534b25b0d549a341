//! DNS/mDNS wire-format encoder and decoder (spec §4.1).

pub mod message;
pub mod reader;
pub mod record;
pub mod writer;

pub use message::{Message, Qr, Question};
pub use record::{Record, RecordData, TxtEntry, Type};

/// Maximum size of an mDNS UDP payload this engine will ever construct.
/// RFC 6762 §17 permits larger messages when the path MTU is known to
/// support it, but 9000 covers jumbo frames without ever requiring an
/// embedder to special-case path MTU discovery.
pub const MAX_PACKET_LEN: usize = 9000;

/// Standard (non-jumbo) datagram budget, used for outbound queries and
/// probes where the wire size should stay within the conventional 1232-byte
/// no-EDNS payload ceiling most stacks assume.
pub const DEFAULT_PACKET_LEN: usize = 1232;
