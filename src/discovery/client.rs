//! One `<type>.<protocol>.local` browse session: query pacing, known-answer
//! tracking, and response integration (spec §4.4.2, §4.4.3).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::{Message, Question, Record, RecordData, Type};
use crate::discovery::instance::ServiceInstance;
use crate::discovery::matches_service_type;
use crate::discovery::options::MdnsSearchOptions;
use crate::label::Name;
use crate::scheduler::{Scheduler, TaskKey};

#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryEvent {
    ServiceFound(Name),
    ServiceUpdated(Name),
    ServiceLost(Name),
}

/// Tracks one browse session's scheduling state and its view of the
/// service's instance set. `session` is the generation-counter style id
/// from spec §4.4.2/§5: restarting a browse bumps it, so any query still
/// in flight under the old id is recognized as stale and does not
/// reschedule itself.
pub struct ServiceTypeClient {
    service_type: Name,
    options: MdnsSearchOptions,
    passive_mode: bool,
    session: u64,
    queries_sent_in_burst: u32,
    /// Number of bursts fully completed since the last `start`. Passive
    /// mode needs this to tell its first burst (still `QUERIES_PER_BURST`
    /// queries, per spec §4.4.2) from every burst after it (dropping to
    /// `QUERIES_PER_BURST_PASSIVE_MODE`).
    bursts_completed: u32,
    current_burst_interval: Duration,
    /// Next outbound transaction id; increments per query and wraps from
    /// 65535 back to 1, never 0 (spec §4.4.2).
    next_transaction_id: u16,
    instances: HashMap<Name, ServiceInstance>,
    ptr_ttls: HashMap<Name, (u32, Instant)>,
}

impl ServiceTypeClient {
    pub fn new(service_type: Name, options: MdnsSearchOptions, passive_mode: bool) -> ServiceTypeClient {
        ServiceTypeClient {
            service_type,
            current_burst_interval: options.initial_time_between_bursts,
            options,
            passive_mode,
            session: 0,
            queries_sent_in_burst: 0,
            bursts_completed: 0,
            next_transaction_id: 1,
            instances: HashMap::new(),
            ptr_ttls: HashMap::new(),
        }
    }

    /// Current session id; schedulers pass this back in so a reply to an
    /// old session can be recognized as stale (spec §4.4.2).
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Starts (or restarts) browsing: bumps the session id, resets burst
    /// state, and schedules the first query for "now".
    pub fn start(&mut self, scheduler: &mut Scheduler, key: TaskKey, now: Instant) {
        self.session += 1;
        self.queries_sent_in_burst = 0;
        self.bursts_completed = 0;
        self.current_burst_interval = self.options.initial_time_between_bursts;
        scheduler.schedule(key, now);
    }

    pub fn stop(&mut self, scheduler: &mut Scheduler, key: TaskKey) {
        self.session += 1;
        scheduler.cancel(key);
    }

    /// Builds the next outbound query, including known-answer suppression
    /// for PTR records whose remaining TTL is still above half their
    /// original value (RFC 6762 §7.1). Consumes (and advances) this
    /// client's transaction id counter.
    pub fn build_query(&mut self, now: Instant) -> Message {
        let id = self.next_transaction_id;
        self.next_transaction_id = if id == 65535 { 1 } else { id + 1 };

        let mut message = Message::query(id);
        let mut question = Question::new(self.service_type.clone(), Type::PTR);
        question.unicast_response = self.queries_sent_in_burst == 0;
        message.questions.push(question);

        for (target, (ttl, received_at)) in &self.ptr_ttls {
            let elapsed = now.saturating_duration_since(*received_at).as_secs() as u32;
            let remaining = ttl.saturating_sub(elapsed);
            if remaining * 2 > *ttl {
                message.answers.push(Record::new(
                    self.service_type.clone(),
                    remaining,
                    RecordData::Ptr(target.clone()),
                ));
            }
        }

        message
    }

    /// Schedules the next query per this client's burst/backoff state
    /// (spec §4.4.2), returning nothing if `session` no longer matches
    /// (the caller should treat this as "this task is cancelled").
    pub fn schedule_next(&mut self, scheduler: &mut Scheduler, key: TaskKey, session: u64, now: Instant) {
        if session != self.session {
            return;
        }

        // Passive mode only drops to the smaller burst size starting with
        // the *second* burst; the very first burst is full-size in both
        // modes (spec §4.4.2).
        let burst_size = if self.passive_mode && self.bursts_completed > 0 {
            self.options.queries_per_burst_passive_mode
        } else {
            self.options.queries_per_burst
        };

        self.queries_sent_in_burst += 1;
        if self.queries_sent_in_burst < burst_size {
            scheduler.schedule(key, now + self.options.time_between_queries_in_burst);
        } else {
            self.queries_sent_in_burst = 0;
            self.bursts_completed += 1;
            if self.passive_mode {
                // Passive mode's inter-burst spacing is fixed, not ramped
                // (spec §4.4.2: "every subsequent burst... spaced at a
                // fixed TIME_BETWEEN_BURSTS_MS").
                scheduler.schedule(key, now + self.options.time_between_bursts);
            } else {
                scheduler.schedule(key, now + self.current_burst_interval);
                self.current_burst_interval =
                    (self.current_burst_interval * 2).min(self.options.time_between_bursts);
            }
        }
    }

    /// Integrates a received message's answer/additional records, returning
    /// the set of caller-visible events this caused.
    pub fn receive_response(&mut self, message: &Message, now: Instant) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        for record in message.answers.iter().chain(message.additional.iter()) {
            self.integrate_record(record, now, &mut events);
        }
        events
    }

    fn integrate_record(&mut self, record: &Record, now: Instant, events: &mut Vec<DiscoveryEvent>) {
        match &record.data {
            RecordData::Ptr(target) if matches_service_type(&record.name, &self.service_type) => {
                if record.is_goodbye() {
                    self.ptr_ttls.remove(target);
                    if self.instances.remove(target).is_some() {
                        events.push(DiscoveryEvent::ServiceLost(target.clone()));
                    }
                    return;
                }
                self.ptr_ttls
                    .insert(target.clone(), (record.ttl.max(1), now));
                self.instances
                    .entry(target.clone())
                    .or_insert_with(|| ServiceInstance::new(target.clone()));
            }
            RecordData::Srv { .. } | RecordData::Txt(_) => {
                if let Some(instance) = self.instances.get_mut(&record.name) {
                    let was_complete = instance.is_complete();
                    instance.apply(record, now);
                    self.emit_completion_event(&record.name.clone(), was_complete, events);
                }
            }
            RecordData::A(_) | RecordData::Aaaa(_) => {
                if record.is_goodbye() {
                    let mut changed_names = Vec::new();
                    for (name, instance) in self.instances.iter_mut() {
                        if instance.remove_address_from_goodbye(record) {
                            changed_names.push(name.clone());
                        }
                    }
                    for name in changed_names {
                        events.push(DiscoveryEvent::ServiceUpdated(name));
                    }
                    return;
                }
                let names: Vec<Name> = self
                    .instances
                    .iter()
                    .filter(|(_, inst)| inst.host_target.as_ref() == Some(&record.name))
                    .map(|(name, _)| name.clone())
                    .collect();
                for name in names {
                    let instance = self.instances.get_mut(&name).expect("just looked up");
                    let was_complete = instance.is_complete();
                    instance.apply(record, now);
                    self.emit_completion_event(&name, was_complete, events);
                }
            }
            _ => {}
        }
    }

    fn emit_completion_event(&self, name: &Name, was_complete: bool, events: &mut Vec<DiscoveryEvent>) {
        if let Some(instance) = self.instances.get(name) {
            if instance.is_complete() {
                events.push(if was_complete {
                    DiscoveryEvent::ServiceUpdated(name.clone())
                } else {
                    DiscoveryEvent::ServiceFound(name.clone())
                });
            }
        }
    }

    /// Sweeps instances whose backing PTR record's TTL has fully elapsed,
    /// per spec §4.4.3's TTL expiry scan. Should be called periodically
    /// (e.g. whenever the scheduler reports no sooner deadline).
    pub fn expire(&mut self, now: Instant) -> Vec<DiscoveryEvent> {
        let mut expired = Vec::new();
        self.ptr_ttls.retain(|target, (ttl, received_at)| {
            let elapsed = now.saturating_duration_since(*received_at).as_secs() as u32;
            let alive = elapsed < *ttl;
            if !alive {
                expired.push(target.clone());
            }
            alive
        });
        let mut events = Vec::new();
        for target in expired {
            if self.instances.remove(&target).is_some() {
                events.push(DiscoveryEvent::ServiceLost(target));
            }
        }
        events
    }

    pub fn instances(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.instances.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::net::Ipv4Addr;

    fn client() -> ServiceTypeClient {
        ServiceTypeClient::new(
            Name::from("_printer._tcp.local"),
            MdnsSearchOptions::default(),
            false,
        )
    }

    #[test]
    fn burst_then_backoff_scheduling_matches_configured_counts() {
        let mut c = client();
        let mut scheduler = Scheduler::new();
        let base = Instant::now();
        c.start(&mut scheduler, 1, base);
        let session = c.session();

        // First burst: 3 queries total, so 2 more reschedules at the
        // intra-burst spacing before falling back to burst spacing.
        c.schedule_next(&mut scheduler, 1, session, base);
        assert_eq!(c.queries_sent_in_burst, 1);
        c.schedule_next(&mut scheduler, 1, session, base);
        assert_eq!(c.queries_sent_in_burst, 2);
        c.schedule_next(&mut scheduler, 1, session, base);
        assert_eq!(c.queries_sent_in_burst, 0, "burst completed, counter resets");
    }

    #[test]
    fn stale_session_is_not_rescheduled() {
        let mut c = client();
        let mut scheduler = Scheduler::new();
        let base = Instant::now();
        c.start(&mut scheduler, 1, base);
        let stale_session = c.session();
        c.stop(&mut scheduler, 1);
        let before = c.queries_sent_in_burst;
        c.schedule_next(&mut scheduler, 1, stale_session, base);
        assert_eq!(c.queries_sent_in_burst, before, "stale session must no-op");
    }

    #[test]
    fn ptr_then_srv_then_address_yields_found_once() {
        let mut c = client();
        let now = Instant::now();
        let instance_name = Name::from("MyPrinter._printer._tcp.local");
        let host = Name::from("printer.local");

        let mut m1 = Message::response(1);
        m1.answers.push(Record::new(
            c.service_type.clone(),
            4500,
            RecordData::Ptr(instance_name.clone()),
        ));
        assert!(c.receive_response(&m1, now).is_empty());

        let mut m2 = Message::response(2);
        m2.answers.push(Record::new(
            instance_name.clone(),
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 631,
                target: host.clone(),
            },
        ));
        assert!(c.receive_response(&m2, now).is_empty(), "still missing address");

        let mut m3 = Message::response(3);
        m3.answers.push(Record::new(
            host,
            120,
            RecordData::A(Ipv4Addr::new(192, 0, 2, 7)),
        ));
        let events = c.receive_response(&m3, now);
        assert_eq!(events, vec![DiscoveryEvent::ServiceFound(instance_name)]);
    }

    #[test]
    fn goodbye_ptr_removes_instance() {
        let mut c = client();
        let now = Instant::now();
        let instance_name = Name::from("MyPrinter._printer._tcp.local");

        let mut m1 = Message::response(1);
        m1.answers.push(Record::new(
            c.service_type.clone(),
            4500,
            RecordData::Ptr(instance_name.clone()),
        ));
        c.receive_response(&m1, now);
        assert!(c.instances.contains_key(&instance_name));

        let mut goodbye = Message::response(2);
        goodbye.answers.push(Record::new(
            c.service_type.clone(),
            0,
            RecordData::Ptr(instance_name.clone()),
        ));
        let events = c.receive_response(&goodbye, now);
        assert_eq!(events, vec![DiscoveryEvent::ServiceLost(instance_name.clone())]);
        assert!(!c.instances.contains_key(&instance_name));
    }

    #[test]
    fn expired_ptr_ttl_removes_instance() {
        let mut c = client();
        let now = Instant::now();
        let instance_name = Name::from("MyPrinter._printer._tcp.local");

        let mut m1 = Message::response(1);
        m1.answers.push(Record::new(
            c.service_type.clone(),
            1,
            RecordData::Ptr(instance_name.clone()),
        ));
        c.receive_response(&m1, now);

        let events = c.expire(now + Duration::from_secs(2));
        assert_eq!(events, vec![DiscoveryEvent::ServiceLost(instance_name)]);
    }
}
