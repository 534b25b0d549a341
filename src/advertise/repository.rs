//! Owns the set of locally-advertised services and builds the record set
//! for each (spec §4.5.1, §3's `ServiceRegistration`).

use std::collections::HashMap;
use std::net::IpAddr;

use crate::codec::{Record, RecordData, TxtEntry, Type};
use crate::error::{MdnsError, Result};
use crate::label::Name;

/// Address records expire quickly so a host that moves networks is not
/// stale for long; service records are long-lived since they rarely change
/// (RFC 6762 §10, matching common responder behavior).
pub const HOST_ADDRESS_TTL: u32 = 120;
pub const SERVICE_RECORD_TTL: u32 = 75 * 60;

/// The well-known meta-service name every registered service type is also
/// advertised under, so a browse of "_services._dns-sd._udp.local" enumerates
/// every service type a responder offers (RFC 6763 §9).
pub fn meta_service_name() -> Name {
    Name::from("_services._dns-sd._udp.local")
}

/// Generates the next candidate instance name after a probing conflict, by
/// appending or incrementing a numeric "(n)" suffix on the leading label
/// (RFC 6762 §9; exact tiebreaking against the conflicting host is left
/// unspecified there and is not attempted here — see DESIGN.md).
pub fn next_conflict_name(instance_name: &Name, service_type: &Name) -> Name {
    let first = instance_name
        .labels()
        .first()
        .map(|l| l.as_ref())
        .unwrap_or("Unnamed");
    service_type.prepend(&increment_suffix(first))
}

fn increment_suffix(label: &str) -> String {
    if let Some(open) = label.rfind(" (") {
        if let Some(inner) = label.strip_suffix(')') {
            if let Ok(n) = inner[open + 2..].parse::<u32>() {
                return format!("{} ({})", &label[..open], n + 1);
            }
        }
    }
    format!("{} (2)", label)
}

pub type ServiceId = u32;

#[derive(Clone, Debug)]
pub struct ServiceRegistration {
    pub id: ServiceId,
    pub instance_name: Name,
    pub service_type: Name,
    pub subtypes: Vec<Name>,
    pub port: u16,
    pub txt: Vec<TxtEntry>,
    /// True while this service's uniqueness is still being probed; its
    /// records must not be advertised as answers until this clears (spec
    /// §4.5.2).
    pub probing: bool,
    /// True once `exitService` has been called; a goodbye announcement is
    /// pending or has already gone out (spec §3 lifecycle).
    pub exiting: bool,
}

/// The set of services advertised on one interface, plus the shared host
/// name and address set every SRV/NSEC record points at.
pub struct RecordRepository {
    host_name: Name,
    addresses: Vec<IpAddr>,
    services: HashMap<ServiceId, ServiceRegistration>,
    next_id: ServiceId,
}

impl RecordRepository {
    pub fn new(host_name: Name) -> RecordRepository {
        RecordRepository {
            host_name,
            addresses: Vec::new(),
            services: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn update_addresses(&mut self, addresses: Vec<IpAddr>) {
        self.addresses = addresses;
    }

    /// Registers a new service, initially in the probing state (spec
    /// §4.5.2: every new registration must be probed before it is
    /// announced).
    ///
    /// Fails with `NameConflict` if another non-exiting registration already
    /// owns `instance_name`; if the existing owner is exiting, it is
    /// replaced outright (spec §4.5.1, §3 invariant: "at most one
    /// non-exiting registration per instance name per interface").
    pub fn add_service(
        &mut self,
        instance_name: Name,
        service_type: Name,
        subtypes: Vec<Name>,
        port: u16,
        txt: Vec<TxtEntry>,
    ) -> Result<ServiceId> {
        if let Some(existing) = self
            .services
            .values()
            .find(|s| s.instance_name == instance_name)
        {
            if !existing.exiting {
                return Err(MdnsError::NameConflict(existing.id));
            }
            let stale_id = existing.id;
            self.services.remove(&stale_id);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.services.insert(
            id,
            ServiceRegistration {
                id,
                instance_name,
                service_type,
                subtypes,
                port,
                txt,
                probing: true,
                exiting: false,
            },
        );
        Ok(id)
    }

    /// Marks a service as exiting; the caller should send one more
    /// announcement with every record at TTL=0 (spec §4.5.1 `exitService`).
    /// Returns `Ok(())` even if the service is already exiting; fails only
    /// if `id` is unknown.
    pub fn exit_service(&mut self, id: ServiceId) -> Result<()> {
        self.service_mut(id)?.exiting = true;
        Ok(())
    }

    /// Renames a registration after a probing conflict (spec §4.5.5
    /// `renameServiceForConflict`). Fails with `NameConflict` if another
    /// non-exiting registration already owns `new_instance_name`.
    pub fn rename_service(&mut self, id: ServiceId, new_instance_name: Name) -> Result<()> {
        if let Some(existing) = self
            .services
            .values()
            .find(|s| s.id != id && s.instance_name == new_instance_name && !s.exiting)
        {
            return Err(MdnsError::NameConflict(existing.id));
        }
        self.service_mut(id)?.instance_name = new_instance_name;
        Ok(())
    }

    pub fn set_service_probing(&mut self, id: ServiceId, probing: bool) -> Result<()> {
        self.service_mut(id)?.probing = probing;
        Ok(())
    }

    /// Transitions a service from probing to announced; a no-op convenience
    /// wrapper spelled out separately because it is the one call site
    /// `InterfaceAdvertiser` uses when its `Prober` reports success.
    pub fn on_probing_succeeded(&mut self, id: ServiceId) -> Result<()> {
        self.set_service_probing(id, false)
    }

    pub fn remove_service(&mut self, id: ServiceId) -> Result<ServiceRegistration> {
        self.services.remove(&id).ok_or(MdnsError::NoSuchService(id))
    }

    pub fn service(&self, id: ServiceId) -> Result<&ServiceRegistration> {
        self.services.get(&id).ok_or(MdnsError::NoSuchService(id))
    }

    fn service_mut(&mut self, id: ServiceId) -> Result<&mut ServiceRegistration> {
        self.services.get_mut(&id).ok_or(MdnsError::NoSuchService(id))
    }

    pub fn host_name(&self) -> &Name {
        &self.host_name
    }

    /// Builds every answer-section record this service would publish, at
    /// `ttl` (normally `SERVICE_RECORD_TTL`/`HOST_ADDRESS_TTL`, or `0` for a
    /// goodbye per RFC 6762 §10.1). The NSEC uniqueness assertion is *not*
    /// included here — spec §4.5.1 places it in the additional section; use
    /// `uniqueness_nsec_for` for that.
    pub fn service_records(&self, id: ServiceId, ttl_override: Option<u32>) -> Result<Vec<Record>> {
        let service = self.service(id)?;
        let service_ttl = ttl_override.unwrap_or(SERVICE_RECORD_TTL);
        let host_ttl = ttl_override.unwrap_or(HOST_ADDRESS_TTL);

        let mut records = Vec::new();
        records.push(Record::new(
            service.service_type.clone(),
            service_ttl,
            RecordData::Ptr(service.instance_name.clone()),
        ));
        records.push(Record::new(
            meta_service_name(),
            service_ttl,
            RecordData::Ptr(service.service_type.clone()),
        ));
        for subtype in &service.subtypes {
            records.push(Record::new(
                subtype.clone(),
                service_ttl,
                RecordData::Ptr(service.instance_name.clone()),
            ));
        }

        let mut srv = Record::new(
            service.instance_name.clone(),
            host_ttl,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: service.port,
                target: self.host_name.clone(),
            },
        );
        srv.cache_flush = true;
        records.push(srv);

        let mut txt = Record::new(
            service.instance_name.clone(),
            service_ttl,
            RecordData::Txt(service.txt.clone()),
        );
        txt.cache_flush = true;
        records.push(txt);

        for addr in &self.addresses {
            records.push(self.host_address_record(*addr, host_ttl));
        }

        Ok(records)
    }

    /// The single record a probe asserts ownership of (spec §4.5.1
    /// `ProbingInfo`: "the SRV record only"; probing a type, not every
    /// record, is sufficient since RFC 6762 §8.1 probes query `ANY` at the
    /// name). TTL matches the eventual announcement's, but cache-flush is
    /// cleared per RFC 6762 §10.2 ("probing... records MUST NOT have the
    /// cache-flush bit set").
    pub fn probing_record(&self, id: ServiceId) -> Result<Record> {
        let service = self.service(id)?;
        Ok(Record::new(
            service.instance_name.clone(),
            HOST_ADDRESS_TTL,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: service.port,
                target: self.host_name.clone(),
            },
        ))
    }

    fn host_address_record(&self, addr: IpAddr, ttl: u32) -> Record {
        let data = match addr {
            IpAddr::V4(v4) => RecordData::A(v4),
            IpAddr::V6(v6) => RecordData::Aaaa(v6),
        };
        let mut record = Record::new(self.host_name.clone(), ttl, data);
        record.cache_flush = true;
        record
    }

    /// RFC 6762 §6.1 NSEC "this exact name has no other records of these
    /// types" uniqueness assertion, proving no competing instance owns an A
    /// record at this name while probing. Spec §4.5.1 places this in the
    /// additional section of a probe/announcement, not the answer section
    /// `service_records` builds.
    pub fn uniqueness_nsec_for(&self, id: ServiceId, ttl_override: Option<u32>) -> Result<Record> {
        let service = self.service(id)?;
        let ttl = ttl_override.unwrap_or(SERVICE_RECORD_TTL);
        Ok(Record::new(
            service.instance_name.clone(),
            ttl,
            RecordData::Nsec {
                next_name: service.instance_name.clone(),
                types: vec![Type::SRV, Type::TXT],
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn repo() -> RecordRepository {
        let mut repo = RecordRepository::new(Name::from("host.local"));
        repo.update_addresses(vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))]);
        repo
    }

    #[test]
    fn new_service_starts_in_probing_state() {
        let mut repo = repo();
        let id = repo
            .add_service(
                Name::from("MyPrinter._printer._tcp.local"),
                Name::from("_printer._tcp.local"),
                vec![],
                631,
                vec![],
            )
            .unwrap();
        assert!(repo.service(id).unwrap().probing);
    }

    #[test]
    fn announced_service_records_use_service_ttl_and_flush_bit() {
        let mut repo = repo();
        let id = repo
            .add_service(
                Name::from("MyPrinter._printer._tcp.local"),
                Name::from("_printer._tcp.local"),
                vec![],
                631,
                vec![TxtEntry::new("txtvers")],
            )
            .unwrap();
        repo.on_probing_succeeded(id).unwrap();
        assert!(!repo.service(id).unwrap().probing);

        let records = repo.service_records(id, None).unwrap();
        let srv = records
            .iter()
            .find(|r| r.record_type() == Type::SRV)
            .unwrap();
        // SRV is a "name-record" binding the instance to a host name, so it
        // shares the host address TTL (spec §4.5.1's "name-records 120s"),
        // matching the concrete scenario in spec §8 (SRV TTL 120).
        assert_eq!(srv.ttl, HOST_ADDRESS_TTL);
        assert!(srv.cache_flush);

        let ptr = records
            .iter()
            .find(|r| r.record_type() == Type::PTR && r.name == Name::from("_printer._tcp.local"))
            .unwrap();
        assert_eq!(ptr.ttl, SERVICE_RECORD_TTL);

        let a = records.iter().find(|r| r.record_type() == Type::A).unwrap();
        assert_eq!(a.ttl, HOST_ADDRESS_TTL);

        let meta = records
            .iter()
            .find(|r| r.name == meta_service_name())
            .expect("meta-service PTR must be published alongside the instance PTR");
        assert_eq!(meta.data, RecordData::Ptr(Name::from("_printer._tcp.local")));
    }

    #[test]
    fn goodbye_records_use_zero_ttl() {
        let mut repo = repo();
        let id = repo
            .add_service(
                Name::from("MyPrinter._printer._tcp.local"),
                Name::from("_printer._tcp.local"),
                vec![],
                631,
                vec![],
            )
            .unwrap();
        let records = repo.service_records(id, Some(0)).unwrap();
        assert!(records.iter().all(|r| r.ttl == 0));
    }

    #[test]
    fn conflict_name_appends_then_increments_numeric_suffix() {
        let ty = Name::from("_printer._tcp.local");
        let first = next_conflict_name(&Name::from("MyPrinter._printer._tcp.local"), &ty);
        assert_eq!(first, Name::from("MyPrinter (2)._printer._tcp.local"));
        let second = next_conflict_name(&first, &ty);
        assert_eq!(second, Name::from("MyPrinter (3)._printer._tcp.local"));
    }

    #[test]
    fn rename_service_updates_instance_name() {
        let mut repo = repo();
        let ty = Name::from("_printer._tcp.local");
        let id = repo
            .add_service(Name::from("MyPrinter._printer._tcp.local"), ty.clone(), vec![], 631, vec![])
            .unwrap();
        repo.rename_service(id, Name::from("MyPrinter (2)._printer._tcp.local")).unwrap();
        assert_eq!(repo.service(id).unwrap().instance_name, Name::from("MyPrinter (2)._printer._tcp.local"));
    }

    #[test]
    fn removing_unknown_service_errors() {
        let mut repo = repo();
        assert!(matches!(repo.remove_service(999), Err(MdnsError::NoSuchService(999))));
    }

    #[test]
    fn second_registration_of_the_same_name_conflicts() {
        let mut repo = repo();
        let name = Name::from("MyPrinter._printer._tcp.local");
        let ty = Name::from("_printer._tcp.local");
        let first = repo
            .add_service(name.clone(), ty.clone(), vec![], 631, vec![])
            .unwrap();

        let err = repo
            .add_service(name, ty, vec![], 631, vec![])
            .expect_err("a non-exiting registration already owns this name");
        assert!(matches!(err, MdnsError::NameConflict(id) if id == first));
    }

    #[test]
    fn exiting_registration_is_replaced_instead_of_conflicting() {
        let mut repo = repo();
        let name = Name::from("MyPrinter._printer._tcp.local");
        let ty = Name::from("_printer._tcp.local");
        let first = repo
            .add_service(name.clone(), ty.clone(), vec![], 631, vec![])
            .unwrap();
        repo.exit_service(first).unwrap();

        let second = repo
            .add_service(name, ty, vec![], 631, vec![])
            .expect("an exiting registration must be replaced, not conflict");
        assert_ne!(first, second);
        assert!(repo.service(first).is_err(), "stale registration was removed");
    }
}
