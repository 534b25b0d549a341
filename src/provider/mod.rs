//! The socket provider: maps network identities to live `InterfaceSocket`s
//! and fans out lifecycle events to subscribers (spec §4.3).
//!
//! All mutable state lives behind a dedicated worker thread, mirroring the
//! teacher's "exactly one thread touches shared mutable state" idiom applied
//! to its discovery/advertising clients. Every public method either sends a
//! message to that thread or (for pure accessors) asserts it is being called
//! from it; calling from any other thread is a programmer error and returns
//! `MdnsError::WrongThread`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, ThreadId};

use crate::collab::{InterfaceLifecycle, LifecycleEvent, LinkProperties, NetworkId};
use crate::error::{MdnsError, Result};
use crate::socket::{InterfaceSocket, MDNS_PORT};

/// A callback invoked whenever a socket's reachable address families
/// change. Registered per subscription, per spec §4.3's subscription model.
pub type SocketCallback = Box<dyn FnMut(NetworkId, Option<&InterfaceSocket>, &LinkProperties) + Send>;

/// Which networks a subscription wants to hear about: a specific one, or
/// `None` for "all current and future interfaces" (spec §4.3's
/// `network-filter = None` semantics).
pub type NetworkFilter = Option<NetworkId>;

/// Opaque handle to a registered subscription, returned by `request_socket`
/// and handed back to `unrequest_socket`.
pub type SubscriptionId = u64;

enum Command {
    RequestSocket {
        filter: NetworkFilter,
        interface_name: String,
        interface_index: u32,
        port: u16,
        callback: SocketCallback,
        reply: Sender<Result<SubscriptionId>>,
    },
    UnrequestSocket {
        id: SubscriptionId,
        reply: Sender<()>,
    },
    Shutdown,
}

struct Subscription {
    id: SubscriptionId,
    filter: NetworkFilter,
    callback: SocketCallback,
}

impl Subscription {
    fn matches(&self, network: NetworkId) -> bool {
        match self.filter {
            Some(want) => want == network,
            None => true,
        }
    }
}

/// Handle used by other components to talk to the provider's worker thread.
/// Cloning shares the same underlying thread.
#[derive(Clone)]
pub struct SocketProviderHandle {
    commands: Sender<Command>,
    owner: ThreadId,
}

impl SocketProviderHandle {
    /// Subscribes per `filter`. With `filter = Some(network)`, opens
    /// `network`'s socket (joining whichever families its current
    /// `LinkProperties` support) if this is the first subscriber for it,
    /// using `interface_name`/`interface_index`/`port` to create it.
    /// With `filter = None`, no socket is opened by this call alone; the
    /// subscription instead matches every socket the provider already owns
    /// or later creates (spec §4.3: "network-filter = None means all
    /// interfaces") — `interface_name`/`interface_index`/`port` are unused
    /// in that case. Either way, `callback` fires once immediately for
    /// every currently-owned socket matching `filter`, then again on every
    /// later link-property change.
    pub fn request_socket(
        &self,
        filter: NetworkFilter,
        interface_name: &str,
        interface_index: u32,
        port: u16,
        callback: SocketCallback,
    ) -> Result<SubscriptionId> {
        let (reply, rx) = mpsc::channel();
        self.commands
            .send(Command::RequestSocket {
                filter,
                interface_name: interface_name.to_string(),
                interface_index,
                port,
                callback,
                reply,
            })
            .map_err(|_| MdnsError::WrongThread)?;
        rx.recv().map_err(|_| MdnsError::WrongThread)?
    }

    /// Unsubscribes; any socket no longer referenced by any remaining
    /// subscription is destroyed (spec §4.3).
    pub fn unrequest_socket(&self, id: SubscriptionId) -> Result<()> {
        let (reply, rx) = mpsc::channel();
        self.commands
            .send(Command::UnrequestSocket { id, reply })
            .map_err(|_| MdnsError::WrongThread)?;
        rx.recv().map_err(|_| MdnsError::WrongThread)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Asserts the calling thread owns this provider's worker, per spec
    /// §4.3's single-threaded-owner rule. Library-internal helper; external
    /// callers only ever see `Result`-returning methods that already funnel
    /// through the command channel.
    pub(crate) fn assert_owner(&self) -> Result<()> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(MdnsError::WrongThread)
        }
    }
}

/// Runs the provider's event loop on a dedicated thread until `lifecycle`
/// and the command channel both go quiet, or `shutdown()` is called.
/// `lifecycle.next_event()` is polled once per command-queue drain; an
/// embedder whose event source blocks should wrap it so `next_event`
/// returns promptly (e.g. with its own internal channel) so `Shutdown`
/// commands are not starved.
pub fn spawn(mut lifecycle: Box<dyn InterfaceLifecycle>) -> SocketProviderHandle {
    let (tx, rx) = mpsc::channel();
    let (owner_tx, owner_rx) = mpsc::channel();

    thread::spawn(move || {
        let _ = owner_tx.send(thread::current().id());
        let mut provider = Provider::new();
        run_loop(&mut provider, &mut *lifecycle, rx);
    });

    let owner = owner_rx
        .recv()
        .expect("worker thread sends its id before doing anything else");

    SocketProviderHandle { commands: tx, owner }
}

struct Provider {
    sockets: HashMap<NetworkId, InterfaceSocket>,
    properties: HashMap<NetworkId, LinkProperties>,
    subscriptions: Vec<Subscription>,
    tethered: Vec<String>,
    next_subscription_id: SubscriptionId,
}

impl Provider {
    fn new() -> Provider {
        Provider {
            sockets: HashMap::new(),
            properties: HashMap::new(),
            subscriptions: Vec::new(),
            tethered: Vec::new(),
            next_subscription_id: 0,
        }
    }

    fn handle_link_properties_changed(&mut self, network: NetworkId, properties: LinkProperties) {
        self.properties.insert(network, properties.clone());
        if let Some(socket) = self.sockets.get_mut(&network) {
            let _ = socket.join_group(properties.has_ipv4(), properties.has_ipv6());
        }
        self.notify(network, &properties);
    }

    fn handle_interface_lost(&mut self, network: NetworkId) {
        if let Some(socket) = self.sockets.remove(&network) {
            log::debug!("interface lost for {:?}, destroying socket", network);
            socket.destroy();
        }
        self.properties.remove(&network);
        // Only subscriptions dedicated to this exact network go away with
        // it; a `None`-filter ("all interfaces") subscription stays
        // registered for whatever networks remain or appear later.
        self.subscriptions.retain(|s| s.filter != Some(network));
    }

    /// Diffs the host's tethered-interface name list and, when at least one
    /// `None`-filter ("all interfaces") subscription exists, creates or
    /// destroys the shared `NetworkId::LocalTether`-keyed socket (spec
    /// §4.3: "create/destroy sockets only when at least one subscription
    /// has network-filter = None. These sockets share a sentinel 'local'
    /// network id"). Address probing for the tethered interface is not
    /// attempted independently; its `LinkProperties` stay whatever the host
    /// last reported for it, same as any other interface (spec §9).
    fn handle_tethered_interfaces_changed(&mut self, current: Vec<String>) {
        let had_any = !self.tethered.is_empty();
        let has_any = !current.is_empty();
        let any_catch_all_subscriber = self.subscriptions.iter().any(|s| s.filter.is_none());

        if any_catch_all_subscriber {
            if has_any && !had_any {
                if let Some(name) = current.first() {
                    match InterfaceSocket::new(name, 0, MDNS_PORT) {
                        Ok(socket) => {
                            log::debug!("opened tethered socket on {}", name);
                            self.sockets.insert(NetworkId::LocalTether, socket);
                            let properties = LinkProperties::default();
                            self.properties.insert(NetworkId::LocalTether, properties.clone());
                            self.notify(NetworkId::LocalTether, &properties);
                        }
                        Err(err) => {
                            log::warn!("failed to open tethered socket on {}: {}", name, err);
                        }
                    }
                }
            } else if !has_any && had_any {
                if let Some(socket) = self.sockets.remove(&NetworkId::LocalTether) {
                    log::debug!("last tethered interface gone, destroying socket");
                    socket.destroy();
                }
                self.properties.remove(&NetworkId::LocalTether);
            }
        }

        self.tethered = current;
    }

    fn notify(&mut self, network: NetworkId, properties: &LinkProperties) {
        let socket = self.sockets.get(&network);
        for sub in self.subscriptions.iter_mut() {
            if sub.matches(network) {
                (sub.callback)(network, socket, properties);
            }
        }
    }

    fn unrequest(&mut self, id: SubscriptionId) {
        self.subscriptions.retain(|s| s.id != id);
        let stale: Vec<NetworkId> = self
            .sockets
            .keys()
            .filter(|network| !self.subscriptions.iter().any(|s| s.matches(**network)))
            .copied()
            .collect();
        for network in stale {
            if let Some(socket) = self.sockets.remove(&network) {
                log::debug!("last subscriber gone for {:?}, destroying socket", network);
                socket.destroy();
            }
            self.properties.remove(&network);
        }
    }
}

fn run_loop(provider: &mut Provider, lifecycle: &mut dyn InterfaceLifecycle, rx: Receiver<Command>) {
    loop {
        while let Some(event) = lifecycle.next_event() {
            match event {
                LifecycleEvent::LinkPropertiesChanged { network, properties } => {
                    provider.handle_link_properties_changed(network, properties);
                }
                LifecycleEvent::InterfaceLost { network } => {
                    provider.handle_interface_lost(network);
                }
                LifecycleEvent::TetheredInterfacesChanged { current } => {
                    provider.handle_tethered_interfaces_changed(current);
                }
            }
        }

        match rx.recv_timeout(std::time::Duration::from_millis(50)) {
            Ok(Command::RequestSocket {
                filter,
                interface_name,
                interface_index,
                port,
                mut callback,
                reply,
            }) => {
                let result = (|| -> Result<SubscriptionId> {
                    if let Some(network) = filter {
                        if !provider.sockets.contains_key(&network) {
                            let socket = InterfaceSocket::new(&interface_name, interface_index, port)?;
                            log::debug!(
                                "opened socket for {:?} on interface {} (index {})",
                                network,
                                interface_name,
                                interface_index
                            );
                            provider.sockets.insert(network, socket);
                        }
                        let properties = provider.properties.get(&network).cloned().unwrap_or_default();
                        if let Some(socket) = provider.sockets.get_mut(&network) {
                            let _ = socket.join_group(properties.has_ipv4(), properties.has_ipv6());
                        }
                        callback(network, provider.sockets.get(&network), &properties);
                    } else {
                        // `None` matches every socket the provider already
                        // owns (spec §4.3: "Immediately deliver an
                        // onSocketCreated for every currently-owned socket
                        // that matches"); no socket is created here since
                        // we were not told which interface to open.
                        for (network, socket) in provider.sockets.iter() {
                            let properties = provider.properties.get(network).cloned().unwrap_or_default();
                            callback(*network, Some(socket), &properties);
                        }
                    }

                    provider.next_subscription_id += 1;
                    let id = provider.next_subscription_id;
                    provider.subscriptions.push(Subscription { id, filter, callback });
                    Ok(id)
                })();
                let _ = reply.send(result);
            }
            Ok(Command::UnrequestSocket { id, reply }) => {
                provider.unrequest(id);
                let _ = reply.send(());
            }
            Ok(Command::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct StaticLifecycle {
        events: Vec<LifecycleEvent>,
    }

    impl InterfaceLifecycle for StaticLifecycle {
        fn next_event(&mut self) -> Option<LifecycleEvent> {
            self.events.pop()
        }
    }

    #[test]
    fn interface_lost_tears_down_subscriptions() {
        // Smoke-tests the pure state transitions directly against `Provider`,
        // sidestepping the worker thread so the test has no timing
        // dependency on the 50ms command poll.
        let mut provider = Provider::new();
        let network = NetworkId::Network(1);
        let calls = Arc::new(Mutex::new(0));
        let calls2 = calls.clone();
        provider.subscriptions.push(Subscription {
            id: 1,
            filter: Some(network),
            callback: Box::new(move |_, _, _| {
                *calls2.lock().unwrap() += 1;
            }),
        });
        provider.handle_link_properties_changed(
            network,
            LinkProperties {
                addresses: vec!["192.0.2.1".parse::<IpAddr>().unwrap()],
            },
        );
        assert_eq!(*calls.lock().unwrap(), 1);

        provider.handle_interface_lost(network);
        assert!(provider.subscriptions.is_empty());
        assert!(provider.properties.is_empty());
    }

    #[test]
    fn catch_all_subscription_survives_unrelated_interface_loss() {
        let mut provider = Provider::new();
        let network = NetworkId::Network(1);
        let calls = Arc::new(Mutex::new(0));
        let calls2 = calls.clone();
        provider.subscriptions.push(Subscription {
            id: 1,
            filter: None,
            callback: Box::new(move |_, _, _| {
                *calls2.lock().unwrap() += 1;
            }),
        });
        provider.handle_link_properties_changed(network, LinkProperties::default());
        assert_eq!(*calls.lock().unwrap(), 1);

        provider.handle_interface_lost(network);
        assert_eq!(
            provider.subscriptions.len(),
            1,
            "a catch-all subscription must not be torn down by one interface disappearing"
        );
    }

    #[test]
    fn tethered_interfaces_create_and_destroy_local_tether_socket() {
        let mut provider = Provider::new();
        provider.subscriptions.push(Subscription {
            id: 1,
            filter: None,
            callback: Box::new(|_, _, _| {}),
        });

        // No real interface named this exists in a test environment, so the
        // socket open attempt fails; what's under test is that the attempt
        // (and subsequent teardown bookkeeping) is actually made, not that
        // it succeeds without a real NIC.
        provider.handle_tethered_interfaces_changed(vec!["wlan-ap0".to_string()]);
        assert_eq!(provider.tethered, vec!["wlan-ap0".to_string()]);

        provider.handle_tethered_interfaces_changed(vec![]);
        assert!(provider.tethered.is_empty());
        assert!(!provider.sockets.contains_key(&NetworkId::LocalTether));
    }

    #[test]
    fn unrequest_destroys_socket_with_no_remaining_subscribers() {
        let mut provider = Provider::new();
        let network = NetworkId::Network(7);
        provider.properties.insert(network, LinkProperties::default());
        provider.subscriptions.push(Subscription {
            id: 42,
            filter: Some(network),
            callback: Box::new(|_, _, _| {}),
        });
        // No real socket is opened in this unit test (that requires a live
        // NIC); this only exercises the subscription-bookkeeping half of
        // `unrequest`, which does not depend on `sockets` being populated.
        provider.unrequest(42);
        assert!(provider.subscriptions.is_empty());
    }
}
