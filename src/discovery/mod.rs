//! Service discovery: browsing for instances of a service type and
//! resolving each into a complete `ServiceInstance` (spec §4.4).

pub mod client;
pub mod instance;
pub mod manager;
pub mod options;

pub use client::DiscoveryEvent;
pub use instance::ServiceInstance;
pub use manager::DiscoveryManager;
pub use options::{MdnsSearchOptions, DEFAULT_SEARCH_OPTIONS};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Recognizes a DNS-SD subtype browse name, `_<sub>._sub.<type>.local`
    /// (RFC 6763 §7.1). Built once since compiling a `Regex` is not free and
    /// this is checked on every browse registration.
    static ref SUBTYPE_PATTERN: Regex =
        Regex::new(r"(?i)^_[^.]+\._sub\.(_[^.]+\._(tcp|udp)\.local\.?)$").unwrap();
}

/// Splits a subtype browse name like `_printer._sub._ipp._tcp.local` into
/// its base service type, `_ipp._tcp.local`, or `None` if `name` is not a
/// subtype browse name.
pub fn base_service_type(name: &str) -> Option<String> {
    SUBTYPE_PATTERN
        .captures(name)
        .map(|caps| caps[1].trim_end_matches('.').to_string())
}

/// True if `name` is `service_type` itself, or names a subtype of it (spec
/// §3, §4.4.1): the shared predicate `ServiceTypeClient` uses to accept a
/// PTR answer and `DiscoveryManager` uses to route an inbound packet to the
/// right client.
pub fn matches_service_type(name: &crate::label::Name, service_type: &crate::label::Name) -> bool {
    if name == service_type {
        return true;
    }
    base_service_type(&name.to_string())
        .map(|base| crate::label::Name::from(base.as_str()) == *service_type)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_subtype_names() {
        assert_eq!(
            base_service_type("_printer._sub._ipp._tcp.local"),
            Some("_ipp._tcp.local".to_string())
        );
    }

    #[test]
    fn rejects_plain_service_types() {
        assert_eq!(base_service_type("_ipp._tcp.local"), None);
    }
}
