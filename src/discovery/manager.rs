//! Dispatches inbound packets to the right `ServiceTypeClient` and owns the
//! register/unregister lifecycle for active browse sessions (spec §4.4.1,
//! §4.4.4).

use std::collections::HashMap;
use std::time::Instant;

use crate::codec::{Message, RecordData};
use crate::discovery::client::{DiscoveryEvent, ServiceTypeClient};
use crate::discovery::matches_service_type;
use crate::discovery::options::MdnsSearchOptions;
use crate::label::Name;
use crate::scheduler::{Scheduler, TaskKey};

/// A registered browse. `key` is this client's slot in the shared
/// `Scheduler`; `service_type` is matched either directly or, for a
/// subtype browse (`_printer._sub._ipp._tcp.local`), via the subtype
/// pattern recognized in `matches` below (spec §3, §4.4.1).
struct Registration {
    key: TaskKey,
    client: ServiceTypeClient,
}

#[derive(Default)]
pub struct DiscoveryManager {
    registrations: HashMap<Name, Registration>,
    next_key: TaskKey,
}

impl DiscoveryManager {
    pub fn new() -> DiscoveryManager {
        DiscoveryManager::default()
    }

    /// Begins browsing `service_type`, starting its query burst immediately.
    pub fn register(
        &mut self,
        service_type: Name,
        options: MdnsSearchOptions,
        passive_mode: bool,
        scheduler: &mut Scheduler,
        now: Instant,
    ) -> TaskKey {
        self.next_key += 1;
        let key = self.next_key;
        let mut client = ServiceTypeClient::new(service_type.clone(), options, passive_mode);
        client.start(scheduler, key, now);
        self.registrations.insert(service_type, Registration { key, client });
        key
    }

    pub fn unregister(&mut self, service_type: &Name, scheduler: &mut Scheduler) {
        if let Some(mut reg) = self.registrations.remove(service_type) {
            reg.client.stop(scheduler, reg.key);
        }
    }

    /// Dispatches one inbound message to the first registration whose
    /// service type it concerns (spec §4.4.1): the name of the first PTR
    /// record present, matched either directly or as a subtype
    /// (`_<sub>._sub.<type>.local`) of a registered type. A response with no
    /// PTR record at all (e.g. a TXT/address-only continuation packet for an
    /// instance already under resolution) falls back to matching any
    /// section's record name directly against a registered type.
    pub fn handle_packet(&mut self, message: &Message, now: Instant) -> Vec<(Name, DiscoveryEvent)> {
        let first_ptr_name = message
            .answers
            .iter()
            .chain(message.additional.iter())
            .find(|r| matches!(r.data, RecordData::Ptr(_)))
            .map(|r| r.name.clone());

        let target = match &first_ptr_name {
            Some(name) => self
                .registrations
                .keys()
                .find(|service_type| matches_service_type(name, service_type))
                .cloned(),
            None => {
                let names: std::collections::HashSet<&Name> = message
                    .answers
                    .iter()
                    .chain(message.authority.iter())
                    .chain(message.additional.iter())
                    .map(|r| &r.name)
                    .collect();
                self.registrations
                    .keys()
                    .find(|service_type| names.contains(service_type))
                    .cloned()
            }
        };

        match target {
            Some(service_type) => {
                let reg = self.registrations.get_mut(&service_type).expect("just located by key");
                reg.client
                    .receive_response(message, now)
                    .into_iter()
                    .map(|event| (service_type.clone(), event))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Advances the registration whose scheduled query came due: builds the
    /// query packet the caller must transmit, reschedules the next burst
    /// step, and runs the periodic TTL expiry scan. Returns `None` if `key`
    /// does not belong to any live registration (it was already
    /// unregistered out from under a still-queued scheduler entry).
    /// Callers should invoke this whenever `scheduler.pop_due` yields one of
    /// this manager's keys.
    pub fn fire(
        &mut self,
        key: TaskKey,
        scheduler: &mut Scheduler,
        now: Instant,
    ) -> Option<(Name, Message, Vec<(Name, DiscoveryEvent)>)> {
        for (service_type, reg) in self.registrations.iter_mut() {
            if reg.key == key {
                let query = reg.client.build_query(now);
                let session = reg.client.session();
                reg.client.schedule_next(scheduler, key, session, now);
                let events = reg
                    .client
                    .expire(now)
                    .into_iter()
                    .map(|event| (service_type.clone(), event))
                    .collect();
                return Some((service_type.clone(), query, events));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Record, RecordData};
    use crate::scheduler::Scheduler;

    #[test]
    fn register_then_unregister_cancels_scheduler_entry() {
        let mut manager = DiscoveryManager::new();
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        let service_type = Name::from("_printer._tcp.local");
        manager.register(service_type.clone(), MdnsSearchOptions::default(), false, &mut scheduler, now);
        assert!(!scheduler.is_empty());

        manager.unregister(&service_type, &mut scheduler);
        assert!(scheduler.pop_due(now + std::time::Duration::from_secs(120)).is_none());
    }

    #[test]
    fn packet_routes_only_to_matching_registration() {
        let mut manager = DiscoveryManager::new();
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        manager.register(
            Name::from("_printer._tcp.local"),
            MdnsSearchOptions::default(),
            false,
            &mut scheduler,
            now,
        );
        manager.register(
            Name::from("_http._tcp.local"),
            MdnsSearchOptions::default(),
            false,
            &mut scheduler,
            now,
        );

        let mut message = Message::response(1);
        message.answers.push(Record::new(
            Name::from("_printer._tcp.local"),
            4500,
            RecordData::Ptr(Name::from("MyPrinter._printer._tcp.local")),
        ));

        let events = manager.handle_packet(&message, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, Name::from("_printer._tcp.local"));
    }

    #[test]
    fn subtype_response_routes_to_base_type_registration() {
        let mut manager = DiscoveryManager::new();
        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        manager.register(
            Name::from("_ipp._tcp.local"),
            MdnsSearchOptions::default(),
            false,
            &mut scheduler,
            now,
        );

        let mut message = Message::response(1);
        message.answers.push(Record::new(
            Name::from("_printer._sub._ipp._tcp.local"),
            4500,
            RecordData::Ptr(Name::from("MyPrinter._ipp._tcp.local")),
        ));

        let events = manager.handle_packet(&message, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, Name::from("_ipp._tcp.local"));
    }
}
