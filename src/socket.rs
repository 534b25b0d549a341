//! A UDP multicast endpoint bound to one OS network interface (spec §4.2).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, UdpSocket};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{MdnsError, Result};

/// IPv4 mDNS multicast group, per RFC 6762 §3.
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
/// IPv6 mDNS multicast group, per RFC 6762 §3.
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x00fb);
/// mDNS UDP port, per RFC 6762 §3.
pub const MDNS_PORT: u16 = 5353;
/// Required hop limit / TTL for all mDNS traffic, per RFC 6762 §11.
const MDNS_HOP_LIMIT: u32 = 255;

#[derive(Default)]
struct JoinedGroups {
    v4: bool,
    v6: bool,
}

/// One multicast endpoint bound to a single named interface. Not
/// thread-safe except for `send`/`receive`, which may be called
/// concurrently from a different thread than every other method (spec
/// §4.2).
pub struct InterfaceSocket {
    interface_name: String,
    interface_index: u32,
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    joined: JoinedGroups,
}

impl InterfaceSocket {
    /// Opens sockets for both address families on `interface_name`/`interface_index`,
    /// bound to the wildcard address on `port`, with hop limit 255.
    pub fn new(interface_name: &str, interface_index: u32, port: u16) -> Result<InterfaceSocket> {
        let v4 = Self::open_v4(interface_name, port).ok();
        let v6 = Self::open_v6(interface_name, interface_index, port).ok();

        if v4.is_none() && v6.is_none() {
            return Err(MdnsError::from(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("could not open any multicast socket on {}", interface_name),
            )));
        }

        Ok(InterfaceSocket {
            interface_name: interface_name.to_string(),
            interface_index,
            v4,
            v6,
            joined: JoinedGroups::default(),
        })
    }

    fn open_v4(interface_name: &str, port: u16) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(target_os = "linux")]
        socket.bind_device(Some(interface_name.as_bytes()))?;
        #[cfg(not(target_os = "linux"))]
        let _ = interface_name;
        socket.set_multicast_ttl_v4(MDNS_HOP_LIMIT)?;
        socket.set_ttl(MDNS_HOP_LIMIT)?;
        socket.set_nonblocking(false)?;
        let addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into();
        socket.bind(&SockAddr::from(addr))?;
        Ok(socket.into())
    }

    fn open_v6(interface_name: &str, interface_index: u32, port: u16) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_only_v6(true)?;
        #[cfg(target_os = "linux")]
        socket.bind_device(Some(interface_name.as_bytes()))?;
        #[cfg(not(target_os = "linux"))]
        let _ = interface_name;
        socket.set_multicast_hops_v6(MDNS_HOP_LIMIT)?;
        socket.set_unicast_hops_v6(MDNS_HOP_LIMIT)?;
        socket.set_multicast_if_v6(interface_index)?;
        socket.set_nonblocking(false)?;
        let addr: SocketAddr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0).into();
        socket.bind(&SockAddr::from(addr))?;
        Ok(socket.into())
    }

    /// Joins the multicast group for each address family present in
    /// `families`. Idempotent per family; a family with no socket open is
    /// silently skipped.
    pub fn join_group(&mut self, has_v4: bool, has_v6: bool) -> Result<()> {
        if has_v4 && !self.joined.v4 {
            if let Some(socket) = &self.v4 {
                let socket2 = socket2::SockRef::from(socket);
                socket2.join_multicast_v4(&MDNS_GROUP_V4, &Ipv4Addr::UNSPECIFIED)?;
                self.joined.v4 = true;
            }
        }
        if !has_v4 && self.joined.v4 {
            if let Some(socket) = &self.v4 {
                let socket2 = socket2::SockRef::from(socket);
                let _ = socket2.leave_multicast_v4(&MDNS_GROUP_V4, &Ipv4Addr::UNSPECIFIED);
            }
            self.joined.v4 = false;
        }

        if has_v6 && !self.joined.v6 {
            if let Some(socket) = &self.v6 {
                let socket2 = socket2::SockRef::from(socket);
                socket2.join_multicast_v6(&MDNS_GROUP_V6, self.interface_index)?;
                self.joined.v6 = true;
            }
        }
        if !has_v6 && self.joined.v6 {
            if let Some(socket) = &self.v6 {
                let socket2 = socket2::SockRef::from(socket);
                let _ = socket2.leave_multicast_v6(&MDNS_GROUP_V6, self.interface_index);
            }
            self.joined.v6 = false;
        }

        Ok(())
    }

    /// Sends `packet` to `destination`, using whichever family's socket
    /// matches the destination address.
    pub fn send(&self, packet: &[u8], destination: SocketAddr) -> Result<usize> {
        let socket = match destination.ip() {
            IpAddr::V4(_) => self.v4.as_ref(),
            IpAddr::V6(_) => self.v6.as_ref(),
        };
        let socket = socket.ok_or_else(|| {
            MdnsError::from(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!(
                    "no socket open for address family of {} on {}",
                    destination, self.interface_name
                ),
            ))
        })?;
        Ok(socket.send_to(packet, destination)?)
    }

    /// Sends `packet` to the mDNS multicast group(s) this socket has joined.
    pub fn send_multicast(&self, packet: &[u8]) -> Result<()> {
        if self.joined.v4 {
            self.send(packet, SocketAddrV4::new(MDNS_GROUP_V4, MDNS_PORT).into())?;
        }
        if self.joined.v6 {
            self.send(
                packet,
                SocketAddrV6::new(MDNS_GROUP_V6, MDNS_PORT, 0, self.interface_index).into(),
            )?;
        }
        Ok(())
    }

    /// Blocks until a datagram arrives on either family's socket, returning
    /// its payload and sender. Only ever called from the receive loop.
    pub fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        // Both sockets are blocking; a single-threaded receive loop should
        // use `receive_v4`/`receive_v6` directly, or run one thread per
        // family. This convenience method prefers IPv4 when both exist,
        // purely so callers with only one family configured don't need to
        // branch.
        if let Some(socket) = &self.v4 {
            return Ok(socket.recv_from(buf)?);
        }
        if let Some(socket) = &self.v6 {
            return Ok(socket.recv_from(buf)?);
        }
        Err(MdnsError::from(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "no socket open",
        )))
    }

    pub fn v4(&self) -> Option<&UdpSocket> {
        self.v4.as_ref()
    }

    pub fn v6(&self) -> Option<&UdpSocket> {
        self.v6.as_ref()
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn interface_index(&self) -> u32 {
        self.interface_index
    }

    /// Leaves any joined groups and closes the socket.
    pub fn destroy(mut self) {
        let _ = self.join_group(false, false);
        // Sockets are dropped (and thus closed) when `self` goes out of
        // scope at the end of this function.
    }
}
