//! Service advertisement: probing, announcing, and goodbye for locally
//! registered services (spec §4.5).

pub mod interface_advertiser;
pub mod repeater;
pub mod repository;

pub use interface_advertiser::{AdvertiserAction, AdvertiserState, InterfaceAdvertiser, SendKind};
pub use repeater::PacketRepeater;
pub use repository::{
    meta_service_name, next_conflict_name, RecordRepository, ServiceId, ServiceRegistration,
    HOST_ADDRESS_TTL, SERVICE_RECORD_TTL,
};
