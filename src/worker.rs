//! Per-interface worker: owns one socket-like [`Transport`] and drives the
//! [`DiscoveryManager`] and any registered [`InterfaceAdvertiser`]s sharing
//! it, per spec §2's "Control flow" and §5's one-thread-per-worker-role
//! model. This is the glue the lower layers (codec, discovery, advertiser)
//! are deliberately ignorant of; everything below this module is pure state
//! transitions over values, and this module is the only place that touches
//! a live socket.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::advertise::repository::ServiceRegistration;
use crate::advertise::{
    AdvertiserAction, AdvertiserState, InterfaceAdvertiser, RecordRepository, SendKind, ServiceId,
};
use crate::codec::{Message, RecordData, TxtEntry, DEFAULT_PACKET_LEN};
use crate::collab::{Clock, Random};
use crate::discovery::{DiscoveryEvent, DiscoveryManager, MdnsSearchOptions};
use crate::error::{MdnsError, Result};
use crate::label::Name;
use crate::scheduler::{Scheduler, TaskKey};
use crate::transport::Transport;

/// Discovery and advertiser task keys share one [`Scheduler`]; advertiser
/// keys are offset into the upper half of the `u64` key space so the two
/// series can never collide (`DiscoveryManager` mints keys starting at 1).
const ADVERTISER_KEY_BASE: TaskKey = 1 << 32;

/// Events an embedder observes from a running worker (spec §6 "Callbacks
/// exposed to clients").
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerEvent {
    Discovery(Name, DiscoveryEvent),
    /// `onRegisterServiceSucceeded`: probing finished, the service is now
    /// in its announcement sequence.
    RegisterServiceSucceeded(ServiceId),
    /// `onServiceConflict`: a competing record was seen for one of our
    /// owned names. The registration has already been renamed and a fresh
    /// probe started under the new name (spec §9: rename-on-conflict); this
    /// event is purely informational.
    ServiceConflict(ServiceId),
    /// `onDestroyed`: a service's goodbye sequence finished and it has been
    /// fully removed.
    Destroyed(ServiceId),
    /// `onDiscoveryQuerySent`: a browse registration's scheduled query burst
    /// just went out on the wire (spec §6).
    QuerySent(Name),
    /// `onFailedToParseMdnsResponse`: an inbound datagram could not be
    /// decoded and was dropped (spec §6, §7). `packet_number` counts
    /// inbound datagrams received on this worker since it started, valid or
    /// not; `error` is the decode failure's message (`MdnsError` itself
    /// isn't `Clone`/`PartialEq`, since it wraps `std::io::Error`).
    FailedToParse { packet_number: u64, error: String },
}

enum Command {
    RegisterDiscovery {
        service_type: Name,
        options: MdnsSearchOptions,
        passive_mode: bool,
    },
    UnregisterDiscovery {
        service_type: Name,
    },
    AddService {
        instance_name: Name,
        service_type: Name,
        subtypes: Vec<Name>,
        port: u16,
        txt: Vec<TxtEntry>,
        reply: Sender<Result<ServiceId>>,
    },
    RemoveService {
        id: ServiceId,
    },
    UpdateAddresses {
        addresses: Vec<std::net::IpAddr>,
    },
    Shutdown,
}

enum WorkerInput {
    Inbound(Message),
    ParseFailed { packet_number: u64, error: String },
    Cmd(Command),
}

/// A handle to a running worker's command channel. Cloning shares the same
/// underlying worker thread (spec §4.3's subscription-handle idiom, reused
/// here for the per-interface worker).
#[derive(Clone)]
pub struct WorkerHandle {
    commands: Sender<WorkerInput>,
}

impl WorkerHandle {
    pub fn register_discovery(&self, service_type: Name, options: MdnsSearchOptions, passive_mode: bool) -> Result<()> {
        self.commands
            .send(WorkerInput::Cmd(Command::RegisterDiscovery {
                service_type,
                options,
                passive_mode,
            }))
            .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker gone")))
    }

    pub fn unregister_discovery(&self, service_type: Name) -> Result<()> {
        self.commands
            .send(WorkerInput::Cmd(Command::UnregisterDiscovery { service_type }))
            .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker gone")))
    }

    /// Registers a new local service and begins probing it. The returned id
    /// names the registration for a later `remove_service`; success/conflict
    /// during probing itself arrives later as a [`WorkerEvent`].
    pub fn add_service(
        &self,
        instance_name: Name,
        service_type: Name,
        subtypes: Vec<Name>,
        port: u16,
        txt: Vec<TxtEntry>,
    ) -> Result<ServiceId> {
        let (reply, rx) = mpsc::channel();
        self.commands
            .send(WorkerInput::Cmd(Command::AddService {
                instance_name,
                service_type,
                subtypes,
                port,
                txt,
                reply,
            }))
            .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker gone")))?;
        rx.recv()
            .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker gone")))?
    }

    /// Begins withdrawing a service: a goodbye announcement is sent and the
    /// registration is dropped once it completes (`WorkerEvent::Destroyed`).
    pub fn remove_service(&self, id: ServiceId) -> Result<()> {
        self.commands
            .send(WorkerInput::Cmd(Command::RemoveService { id }))
            .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker gone")))
    }

    pub fn update_addresses(&self, addresses: Vec<std::net::IpAddr>) -> Result<()> {
        self.commands
            .send(WorkerInput::Cmd(Command::UpdateAddresses { addresses }))
            .map_err(|_| MdnsError::from(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker gone")))
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(WorkerInput::Cmd(Command::Shutdown));
    }
}

struct WorkerState {
    random: Arc<dyn Random>,
    scheduler: Scheduler,
    discovery: DiscoveryManager,
    repository: RecordRepository,
    advertisers: HashMap<ServiceId, InterfaceAdvertiser>,
}

impl WorkerState {
    fn advertiser_key(id: ServiceId) -> TaskKey {
        ADVERTISER_KEY_BASE + id as TaskKey
    }

    fn fire_due(&mut self, key: TaskKey, transport: &dyn Transport, events: &Sender<WorkerEvent>, now: Instant) {
        if key >= ADVERTISER_KEY_BASE {
            let id = (key - ADVERTISER_KEY_BASE) as ServiceId;
            self.fire_advertiser(id, transport, events, now);
            return;
        }

        if let Some((service_type, query, discovery_events)) = self.discovery.fire(key, &mut self.scheduler, now) {
            if let Ok(bytes) = query.to_bytes(DEFAULT_PACKET_LEN) {
                let _ = transport.send_multicast(&bytes);
                let _ = events.send(WorkerEvent::QuerySent(service_type));
            }
            for (service_type, event) in discovery_events {
                let _ = events.send(WorkerEvent::Discovery(service_type, event));
            }
        }
    }

    fn fire_advertiser(&mut self, id: ServiceId, transport: &dyn Transport, events: &Sender<WorkerEvent>, now: Instant) {
        let key = Self::advertiser_key(id);
        let prior_state = match self.advertisers.get(&id) {
            Some(adv) => adv.state(),
            None => return,
        };

        let action = {
            let adv = self.advertisers.get_mut(&id).expect("checked above");
            adv.fire(&mut self.scheduler, key, now)
        };

        let adv = self.advertisers.get(&id).expect("checked above");
        if prior_state == AdvertiserState::Probing && adv.state() == AdvertiserState::Announcing {
            let _ = self.repository.on_probing_succeeded(id);
        }

        match action {
            AdvertiserAction::Send(kind) => self.send_advertiser_packet(id, &kind, transport),
            AdvertiserAction::Conflict | AdvertiserAction::Done => {}
        }

        let adv = self.advertisers.get(&id).expect("checked above");
        match adv.state() {
            AdvertiserState::Announcing if prior_state == AdvertiserState::Announcing => {
                // Still mid-announcement; nothing to report yet.
            }
            AdvertiserState::Registered if prior_state == AdvertiserState::Announcing => {
                let _ = events.send(WorkerEvent::RegisterServiceSucceeded(id));
            }
            AdvertiserState::Idle if prior_state == AdvertiserState::Exiting => {
                self.advertisers.remove(&id);
                let _ = self.repository.remove_service(id);
                let _ = events.send(WorkerEvent::Destroyed(id));
            }
            _ => {}
        }
    }

    fn send_advertiser_packet(&self, id: ServiceId, kind: &SendKind, transport: &dyn Transport) {
        let adv = match self.advertisers.get(&id) {
            Some(a) => a,
            None => return,
        };
        let message = match kind {
            SendKind::Probe => adv.build_probe(&self.repository),
            SendKind::Announcement | SendKind::Goodbye => adv.build_response(&self.repository),
        };
        let message = match message {
            Ok(m) => m,
            Err(_) => return,
        };
        if let Ok(bytes) = message.to_bytes(DEFAULT_PACKET_LEN) {
            let _ = transport.send_multicast(&bytes);
        }
    }

    fn handle_inbound(&mut self, message: &Message, transport: &dyn Transport, events: &Sender<WorkerEvent>, now: Instant) {
        if message.is_response() {
            for (service_type, event) in self.discovery.handle_packet(message, now) {
                let _ = events.send(WorkerEvent::Discovery(service_type, event));
            }
            self.check_conflicts(message, events, now);
        } else {
            self.answer_query(message, transport);
        }
    }

    /// Looks for a record, in any section, whose name matches one of our
    /// probing or already-registered services but whose data differs from
    /// what we intend to publish — the conflict condition of spec §4.5.3.
    /// On a hit, renames the registration and restarts probing under the new
    /// name (spec §9: rename-on-conflict, resolved in DESIGN.md), matching
    /// `renameServiceForConflict` + `restartProbingForConflict` from spec
    /// §4.5.5.
    fn check_conflicts(&mut self, message: &Message, events: &Sender<WorkerEvent>, now: Instant) {
        let host_name = self.repository.host_name().clone();
        let candidates: Vec<ServiceId> = self
            .advertisers
            .iter()
            .filter(|(_, a)| matches!(a.state(), AdvertiserState::Probing | AdvertiserState::Registered))
            .map(|(id, _)| *id)
            .collect();

        for id in candidates {
            let service = match self.repository.service(id) {
                Ok(s) => s.clone(),
                Err(_) => continue,
            };
            let conflicts = message
                .answers
                .iter()
                .chain(message.authority.iter())
                .chain(message.additional.iter())
                .any(|r| r.name == service.instance_name && record_conflicts(&r.data, &service, &host_name));
            if !conflicts {
                continue;
            }

            let key = Self::advertiser_key(id);
            let new_name = crate::advertise::next_conflict_name(&service.instance_name, &service.service_type);
            log::debug!(
                "conflict for service {} ({}); renaming to {}",
                id,
                service.instance_name,
                new_name
            );
            if self.repository.rename_service(id, new_name).is_ok() {
                if let Some(adv) = self.advertisers.get_mut(&id) {
                    adv.restart_probing_for_conflict(&mut self.scheduler, key, now, &*self.random);
                }
            }
            let _ = events.send(WorkerEvent::ServiceConflict(id));
        }
    }

    /// Answers an inbound query immediately for any already-`Registered`
    /// service it asks about. RFC 6762 §6 prescribes a jittered delay and
    /// duplicate-answer suppression across simultaneous responders; this
    /// worker always answers at once, a simplification recorded in
    /// DESIGN.md rather than guessed at here.
    fn answer_query(&self, message: &Message, transport: &dyn Transport) {
        let host_name = self.repository.host_name();
        for (id, adv) in &self.advertisers {
            if adv.state() != AdvertiserState::Registered {
                continue;
            }
            let service = match self.repository.service(*id) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let asked = message.questions.iter().any(|q| {
                q.name == service.instance_name || q.name == service.service_type || &q.name == host_name
            });
            if !asked {
                continue;
            }
            if let Ok(response) = adv.build_response(&self.repository) {
                if let Ok(bytes) = response.to_bytes(DEFAULT_PACKET_LEN) {
                    let _ = transport.send_multicast(&bytes);
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command, now: Instant) {
        match cmd {
            Command::RegisterDiscovery {
                service_type,
                options,
                passive_mode,
            } => {
                self.discovery
                    .register(service_type, options, passive_mode, &mut self.scheduler, now);
            }
            Command::UnregisterDiscovery { service_type } => {
                self.discovery.unregister(&service_type, &mut self.scheduler);
            }
            Command::AddService {
                instance_name,
                service_type,
                subtypes,
                port,
                txt,
                reply,
            } => {
                let result = self.repository.add_service(instance_name, service_type, subtypes, port, txt);
                if let Ok(id) = &result {
                    let id = *id;
                    let mut adv = InterfaceAdvertiser::new(id);
                    adv.start_probing(&mut self.scheduler, Self::advertiser_key(id), now, &*self.random);
                    self.advertisers.insert(id, adv);
                }
                let _ = reply.send(result);
            }
            Command::RemoveService { id } => {
                if self.advertisers.contains_key(&id) {
                    let _ = self.repository.exit_service(id);
                    let key = Self::advertiser_key(id);
                    let adv = self.advertisers.get_mut(&id).expect("just checked");
                    adv.start_exiting(&mut self.scheduler, key, now);
                }
            }
            Command::UpdateAddresses { addresses } => {
                self.repository.update_addresses(addresses);
            }
            Command::Shutdown => unreachable!("handled by the caller before dispatch"),
        }
    }
}

fn record_conflicts(data: &RecordData, service: &ServiceRegistration, host_name: &Name) -> bool {
    match data {
        RecordData::Srv { port, target, .. } => *port != service.port || target != host_name,
        RecordData::Txt(entries) => entries != &service.txt,
        _ => false,
    }
}

/// Starts a worker on a dedicated thread, returning a handle to drive it and
/// a channel of the events it emits. `host_name` is this interface's
/// randomly-generated `Android_<hex>.local`-style name (spec §4.5.1, §9);
/// callers mint it once per interface appearance, matching the privacy
/// rationale in the design notes.
pub fn spawn(
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn Random>,
    host_name: Name,
) -> (WorkerHandle, Receiver<WorkerEvent>) {
    let (input_tx, input_rx) = mpsc::channel::<WorkerInput>();
    let (event_tx, event_rx) = mpsc::channel::<WorkerEvent>();

    {
        let transport = transport.clone();
        let input_tx = input_tx.clone();
        thread::spawn(move || {
            let mut buf = vec![0u8; crate::codec::MAX_PACKET_LEN];
            let mut packet_number: u64 = 0;
            loop {
                match transport.receive(&mut buf) {
                    Ok((len, peer)) => {
                        packet_number += 1;
                        match Message::from_bytes(&buf[..len]) {
                            Ok(message) => {
                                if input_tx.send(WorkerInput::Inbound(message)).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                log::warn!("dropping malformed packet from {}: {}", peer, err);
                                if input_tx
                                    .send(WorkerInput::ParseFailed {
                                        packet_number,
                                        error: err.to_string(),
                                    })
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        // A transient `SocketIo` error: spec §7 says drop
                        // the packet and keep the socket open, so just
                        // retry rather than tearing down the loop.
                        log::trace!("transient socket error, retrying: {}", err);
                        continue;
                    }
                }
            }
        });
    }

    thread::spawn(move || {
        let mut state = WorkerState {
            random,
            scheduler: Scheduler::new(),
            discovery: DiscoveryManager::new(),
            repository: RecordRepository::new(host_name),
            advertisers: HashMap::new(),
        };
        run_loop(&mut state, &*transport, &*clock, input_rx, event_tx);
    });

    (WorkerHandle { commands: input_tx }, event_rx)
}

fn run_loop(
    state: &mut WorkerState,
    transport: &dyn Transport,
    clock: &dyn Clock,
    rx: Receiver<WorkerInput>,
    events: Sender<WorkerEvent>,
) {
    loop {
        let now = clock.now();
        while let Some(key) = state.scheduler.pop_due(now) {
            state.fire_due(key, transport, &events, now);
        }

        let timeout = match state.scheduler.peek_deadline() {
            Some(deadline) => deadline.saturating_duration_since(clock.now()).min(Duration::from_millis(200)),
            None => Duration::from_millis(200),
        };

        match rx.recv_timeout(timeout) {
            Ok(WorkerInput::Inbound(message)) => {
                let now = clock.now();
                state.handle_inbound(&message, transport, &events, now);
            }
            Ok(WorkerInput::ParseFailed { packet_number, error }) => {
                let _ = events.send(WorkerEvent::FailedToParse { packet_number, error });
            }
            Ok(WorkerInput::Cmd(Command::Shutdown)) => break,
            Ok(WorkerInput::Cmd(cmd)) => {
                let now = clock.now();
                state.handle_command(cmd, now);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::OsRandom;
    use crate::transport::loopback::LoopbackTransport;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Drains every due scheduler entry by repeatedly asking "what's due" at
    /// a `now` far past any real delay, the same fast-forwarding idiom the
    /// advertiser's own tests use instead of sleeping in real time.
    fn fire_everything_due(state: &mut WorkerState, transport: &dyn Transport, events: &Sender<WorkerEvent>, start: Instant) {
        for step in 1..=64u64 {
            let virtual_now = start + Duration::from_secs(1000 * step);
            match state.scheduler.pop_due(virtual_now) {
                Some(key) => state.fire_due(key, transport, events, virtual_now),
                None => return,
            }
        }
        panic!("scheduler never drained; a task is rescheduling itself forever");
    }

    fn new_state(host_name: &str) -> WorkerState {
        WorkerState {
            random: Arc::new(OsRandom),
            scheduler: Scheduler::new(),
            discovery: DiscoveryManager::new(),
            repository: RecordRepository::new(Name::from(host_name)),
            advertisers: HashMap::new(),
        }
    }

    #[test]
    fn registering_a_service_probes_then_announces_then_registers() {
        let (transport, _peer) = LoopbackTransport::pair();
        let mut state = new_state("TestHost-worker.local");
        let (events_tx, events_rx) = mpsc::channel();
        let now = Instant::now();

        state
            .repository
            .update_addresses(vec![std::net::IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9))]);

        let (reply_tx, reply_rx) = mpsc::channel();
        state.handle_command(
            Command::AddService {
                instance_name: Name::from("TestPrinter._printer._tcp.local"),
                service_type: Name::from("_printer._tcp.local"),
                subtypes: vec![],
                port: 631,
                txt: vec![],
                reply: reply_tx,
            },
            now,
        );
        let id = reply_rx.recv().unwrap().unwrap();
        assert_eq!(state.advertisers.get(&id).unwrap().state(), AdvertiserState::Probing);

        fire_everything_due(&mut state, &transport, &events_tx, now);

        assert_eq!(state.advertisers.get(&id).unwrap().state(), AdvertiserState::Registered);
        assert!(!state.repository.service(id).unwrap().probing);

        let registered = events_rx
            .try_iter()
            .any(|e| e == WorkerEvent::RegisterServiceSucceeded(id));
        assert!(registered, "expected a RegisterServiceSucceeded event");
    }

    #[test]
    fn removing_a_service_exits_and_is_destroyed() {
        let (transport, _peer) = LoopbackTransport::pair();
        let mut state = new_state("TestHost-worker.local");
        let (events_tx, events_rx) = mpsc::channel();
        let now = Instant::now();

        let (reply_tx, reply_rx) = mpsc::channel();
        state.handle_command(
            Command::AddService {
                instance_name: Name::from("TestPrinter._printer._tcp.local"),
                service_type: Name::from("_printer._tcp.local"),
                subtypes: vec![],
                port: 631,
                txt: vec![],
                reply: reply_tx,
            },
            now,
        );
        let id = reply_rx.recv().unwrap().unwrap();
        fire_everything_due(&mut state, &transport, &events_tx, now);
        let _ = events_rx.try_iter().count();

        state.handle_command(Command::RemoveService { id }, now);
        fire_everything_due(&mut state, &transport, &events_tx, now + Duration::from_secs(100_000));

        assert!(!state.advertisers.contains_key(&id));
        assert!(state.repository.service(id).is_err());
        let destroyed = events_rx.try_iter().any(|e| e == WorkerEvent::Destroyed(id));
        assert!(destroyed, "expected a Destroyed event");
    }

    #[test]
    fn conflicting_record_during_probing_renames_and_reprobes() {
        let (transport, _peer) = LoopbackTransport::pair();
        let mut state = new_state("TestHost-worker.local");
        let (events_tx, events_rx) = mpsc::channel();
        let now = Instant::now();
        let instance_name = Name::from("TestPrinter._printer._tcp.local");

        let (reply_tx, reply_rx) = mpsc::channel();
        state.handle_command(
            Command::AddService {
                instance_name: instance_name.clone(),
                service_type: Name::from("_printer._tcp.local"),
                subtypes: vec![],
                port: 631,
                txt: vec![],
                reply: reply_tx,
            },
            now,
        );
        let id = reply_rx.recv().unwrap().unwrap();

        let mut conflicting = Message::response(1);
        conflicting.answers.push(crate::codec::Record::new(
            instance_name,
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 9999,
                target: Name::from("someone-else.local"),
            },
        ));
        state.handle_inbound(&conflicting, &transport, &events_tx, now);

        // A fresh probe sequence has begun under a renamed instance.
        assert_eq!(state.advertisers.get(&id).unwrap().state(), AdvertiserState::Probing);
        assert_eq!(
            state.repository.service(id).unwrap().instance_name,
            Name::from("TestPrinter (2)._printer._tcp.local")
        );
        let conflict = events_rx.try_iter().any(|e| e == WorkerEvent::ServiceConflict(id));
        assert!(conflict, "expected a ServiceConflict event");
    }

    #[test]
    fn registering_discovery_fires_query_sent() {
        let (transport, _peer) = LoopbackTransport::pair();
        let mut state = new_state("TestHost-worker.local");
        let (events_tx, events_rx) = mpsc::channel();
        let now = Instant::now();
        let service_type = Name::from("_printer._tcp.local");

        state.handle_command(
            Command::RegisterDiscovery {
                service_type: service_type.clone(),
                options: crate::discovery::MdnsSearchOptions::default(),
                passive_mode: false,
            },
            now,
        );
        let key = state.scheduler.pop_due(now).expect("first query is scheduled immediately");
        state.fire_due(key, &transport, &events_tx, now);

        let sent = events_rx
            .try_iter()
            .any(|e| e == WorkerEvent::QuerySent(service_type.clone()));
        assert!(sent, "expected a QuerySent event");
    }

    #[test]
    fn malformed_inbound_packet_fires_failed_to_parse() {
        let (worker_transport, peer) = LoopbackTransport::pair();
        let (handle, events) = spawn(
            Arc::new(worker_transport),
            Arc::new(crate::collab::SystemClock),
            Arc::new(OsRandom),
            Name::from("TestHost-parse.local"),
        );

        // Two header bytes are nowhere near a complete 12-byte DNS header.
        peer.send_multicast(&[0xAB, 0xCD]).unwrap();

        let event = events
            .recv_timeout(Duration::from_secs(1))
            .expect("a FailedToParse event should be delivered");
        match event {
            WorkerEvent::FailedToParse { packet_number, .. } => assert_eq!(packet_number, 1),
            other => panic!("expected FailedToParse, got {:?}", other),
        }
        handle.shutdown();
    }
}
