//! mdns-engine is a per-interface multicast DNS (RFC 6762) / DNS-SD (RFC
//! 6763) discovery and advertising engine.
//!
//! # Features
//! * A zero-copy-ish [`codec`] for the mDNS wire format, including name
//!   compression with forward-pointer support.
//! * [`socket`]: one multicast UDP endpoint per network interface, joined to
//!   `224.0.0.251:5353` / `[ff02::fb]:5353` with hop limit 255.
//! * [`provider`]: a single worker thread owning the map from network
//!   identity to live socket, fed by host lifecycle events.
//! * [`discovery`]: browsing for `<type>.<protocol>.local` instances with
//!   RFC 6762 §5.2 burst/backoff query pacing and incremental completion.
//! * [`advertise`]: registering local services with RFC 6762 §8 probing and
//!   announcing, including conflict detection and graceful goodbye.
//!
//! DNSSEC, unicast DNS resolution, responding on behalf of foreign hosts,
//! full "One-Shot Multicast DNS" resolution, and legacy-responder interop
//! beyond RFC 6762 §6 are out of scope for this crate.
//!
//! # Usage (low-level codec)
//!
//! ```rust
//! use mdns_engine::codec::{Message, Question, Type};
//! use mdns_engine::label::Name;
//!
//! let mut query = Message::query(0);
//! query.questions.push(Question::new(Name::from("_printer._tcp.local"), Type::PTR));
//! let bytes = query.to_bytes(mdns_engine::codec::DEFAULT_PACKET_LEN).unwrap();
//!
//! let decoded = Message::from_bytes(&bytes).unwrap();
//! assert_eq!(decoded.questions.len(), 1);
//! ```

pub mod advertise;
pub mod codec;
pub mod collab;
pub mod discovery;
pub mod error;
pub mod label;
pub mod provider;
pub mod scheduler;
pub mod socket;
pub mod transport;
pub mod worker;

#[doc(inline)]
pub use crate::codec::Message;
#[doc(inline)]
pub use crate::error::{MdnsError, Result};
#[doc(inline)]
pub use crate::label::Name;
#[doc(inline)]
pub use crate::worker::{spawn, WorkerEvent, WorkerHandle};
