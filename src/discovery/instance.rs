//! A discovered service instance and the completeness rule that decides
//! when it is ready to hand to a caller (spec §4.4.3).

use std::net::IpAddr;
use std::time::Instant;

use crate::codec::{Record, RecordData, TxtEntry};
use crate::label::Name;

/// Everything known about one `<instance>.<type>.local` service at a point
/// in time. Fields are filled in incrementally as PTR/SRV/TXT/A/AAAA
/// answers arrive; `is_complete` gates when this is presentable.
#[derive(Clone, Debug, Default)]
pub struct ServiceInstance {
    /// The full PTR target, e.g. `MyPrinter._printer._tcp.local`.
    pub instance_name: Name,
    pub host_target: Option<Name>,
    pub port: Option<u16>,
    pub priority: u16,
    pub weight: u16,
    pub txt: Vec<TxtEntry>,
    pub addresses: Vec<IpAddr>,
    pub last_updated: Option<Instant>,
}

impl ServiceInstance {
    pub fn new(instance_name: Name) -> ServiceInstance {
        ServiceInstance {
            instance_name,
            ..Default::default()
        }
    }

    /// A caller-visible instance needs a resolved host, port, and at least
    /// one address (spec §4.4.3: "SRV, TXT, and at least one address
    /// record"). TXT is optional data, not a completeness gate — RFC 6763
    /// §6.1 treats an absent TXT record as equivalent to a single empty
    /// string.
    pub fn is_complete(&self) -> bool {
        self.host_target.is_some() && self.port.is_some() && !self.addresses.is_empty()
    }

    /// Merges one newly-received record into this instance's state.
    /// Unrelated record types (wrong target name) are ignored rather than
    /// erroring, matching the reader's "skip what you don't recognize"
    /// posture elsewhere in the codec.
    pub fn apply(&mut self, record: &Record, now: Instant) {
        match &record.data {
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } if record.name == self.instance_name => {
                // A retarget (SRV now points somewhere other than the
                // previously stored host) invalidates any address records
                // resolved against the old host name (spec §4.4.2).
                if matches!(&self.host_target, Some(prev) if prev != target) {
                    self.addresses.clear();
                }
                self.priority = *priority;
                self.weight = *weight;
                self.port = Some(*port);
                self.host_target = Some(target.clone());
            }
            RecordData::Txt(entries) if record.name == self.instance_name => {
                self.txt = entries.clone();
            }
            RecordData::A(addr) if Some(&record.name) == self.host_target.as_ref() => {
                let addr = IpAddr::from(*addr);
                if !self.addresses.contains(&addr) {
                    self.addresses.push(addr);
                }
            }
            RecordData::Aaaa(addr) if Some(&record.name) == self.host_target.as_ref() => {
                let addr = IpAddr::from(*addr);
                if !self.addresses.contains(&addr) {
                    self.addresses.push(addr);
                }
            }
            _ => return,
        }
        self.last_updated = Some(now);
    }

    /// Drops the address belonging to a goodbye (TTL=0) A/AAAA record,
    /// returning whether anything changed.
    pub fn remove_address_from_goodbye(&mut self, record: &Record) -> bool {
        let addr = match &record.data {
            RecordData::A(addr) => IpAddr::from(*addr),
            RecordData::Aaaa(addr) => IpAddr::from(*addr),
            _ => return false,
        };
        let before = self.addresses.len();
        self.addresses.retain(|a| *a != addr);
        self.addresses.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn srv(instance: &Name, target: &Name, port: u16) -> Record {
        Record::new(
            instance.clone(),
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port,
                target: target.clone(),
            },
        )
    }

    #[test]
    fn incomplete_until_srv_and_address_both_present() {
        let instance_name = Name::from("MyPrinter._printer._tcp.local");
        let host = Name::from("printer.local");
        let mut instance = ServiceInstance::new(instance_name.clone());
        assert!(!instance.is_complete());

        instance.apply(&srv(&instance_name, &host, 631), Instant::now());
        assert!(!instance.is_complete(), "needs an address too");

        let a = Record::new(host.clone(), 120, RecordData::A(Ipv4Addr::new(192, 0, 2, 7)));
        instance.apply(&a, Instant::now());
        assert!(instance.is_complete());
    }

    #[test]
    fn retargeting_srv_drops_stale_addresses() {
        let instance_name = Name::from("MyPrinter._printer._tcp.local");
        let old_host = Name::from("printer.local");
        let new_host = Name::from("printer2.local");
        let mut instance = ServiceInstance::new(instance_name.clone());
        instance.apply(&srv(&instance_name, &old_host, 631), Instant::now());
        instance.apply(
            &Record::new(old_host, 120, RecordData::A(Ipv4Addr::new(192, 0, 2, 7))),
            Instant::now(),
        );
        assert!(instance.is_complete());

        instance.apply(&srv(&instance_name, &new_host, 631), Instant::now());
        assert!(
            instance.addresses.is_empty(),
            "addresses resolved against the old host name must be dropped on retarget"
        );
        assert_eq!(instance.host_target, Some(new_host));
    }

    #[test]
    fn goodbye_address_removes_just_that_address() {
        let instance_name = Name::from("MyPrinter._printer._tcp.local");
        let host = Name::from("printer.local");
        let mut instance = ServiceInstance::new(instance_name.clone());
        instance.apply(&srv(&instance_name, &host, 631), Instant::now());
        instance.apply(
            &Record::new(host.clone(), 120, RecordData::A(Ipv4Addr::new(192, 0, 2, 7))),
            Instant::now(),
        );
        assert!(instance.is_complete());

        let mut goodbye = Record::new(host, 0, RecordData::A(Ipv4Addr::new(192, 0, 2, 7)));
        goodbye.ttl = 0;
        assert!(instance.remove_address_from_goodbye(&goodbye));
        assert!(!instance.is_complete());
    }
}
