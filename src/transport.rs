//! The `Transport` sum type named in spec §9's design notes: the one seam
//! between the codec/scheduling logic in [`crate::worker`] and an actual
//! multicast socket, expressed as a trait so tests can substitute an
//! in-memory transport instead of opening real sockets (same idiom as
//! [`crate::collab::Clock`] / [`crate::collab::Random`]).

use std::net::SocketAddr;

use crate::error::Result;
use crate::socket::InterfaceSocket;

/// Everything an [`crate::worker::InterfaceWorker`] needs from a socket: send
/// a packet to the multicast group(s) this interface has joined, and receive
/// one inbound datagram. Real production code talks to an
/// [`InterfaceSocket`]; tests talk to an in-process loopback pair.
pub trait Transport: Send {
    fn send_multicast(&self, packet: &[u8]) -> Result<()>;

    /// Blocks until a datagram arrives, returning its payload length and the
    /// sender's address.
    fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;
}

impl Transport for InterfaceSocket {
    fn send_multicast(&self, packet: &[u8]) -> Result<()> {
        InterfaceSocket::send_multicast(self, packet)
    }

    fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        InterfaceSocket::receive(self, buf)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod loopback {
    //! An in-memory `Transport` pair used by unit and integration tests to
    //! exercise the discovery/advertiser logic without binding real sockets
    //! (spec §9: "prefer... not pointers" applies equally to tests not
    //! depending on OS multicast routing being available in a sandboxed
    //! runner). Gated behind the `test-util` feature rather than plain
    //! `cfg(test)` so `tests/`-directory integration tests, which compile
    //! against the crate as an external dependency, can reach it too.

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::Transport;
    use crate::error::{MdnsError, Result};

    /// One endpoint of a loopback pair: packets sent on one end arrive on
    /// the other's `receive`, tagged with a fixed fake peer address.
    pub struct LoopbackTransport {
        peer_addr: SocketAddr,
        outbox: Sender<Vec<u8>>,
        inbox: Mutex<Receiver<Vec<u8>>>,
    }

    impl LoopbackTransport {
        /// Builds a connected pair: `a`'s sends are `b`'s receives and
        /// vice versa, each observed as coming from `fake_peer`.
        pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
            let (tx_ab, rx_ab) = mpsc::channel();
            let (tx_ba, rx_ba) = mpsc::channel();
            let fake_peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 5353);
            (
                LoopbackTransport {
                    peer_addr: fake_peer,
                    outbox: tx_ab,
                    inbox: Mutex::new(rx_ba),
                },
                LoopbackTransport {
                    peer_addr: fake_peer,
                    outbox: tx_ba,
                    inbox: Mutex::new(rx_ab),
                },
            )
        }
    }

    impl Transport for LoopbackTransport {
        fn send_multicast(&self, packet: &[u8]) -> Result<()> {
            self.outbox
                .send(packet.to_vec())
                .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone")))
        }

        fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
            // Integration tests run in lockstep and never actually block
            // forever; bound the wait so a logic bug surfaces as a test
            // failure instead of a hang.
            let packet = self
                .inbox
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| {
                    MdnsError::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "no datagram"))
                })?;
            let len = packet.len().min(buf.len());
            buf[..len].copy_from_slice(&packet[..len]);
            Ok((len, self.peer_addr))
        }
    }
}
