//! Record types and their `RDATA` (de)serialization (spec §4.1, §6).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use strum_macros::Display;

use crate::error::{MdnsError, Result};
use crate::label::Name;

use super::reader::Reader;
use super::writer::Writer;

/// Resource record type, restricted to the set mDNS/DNS-SD actually uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, FromPrimitive, ToPrimitive, Display)]
#[allow(clippy::upper_case_acronyms)]
pub enum Type {
    A = 1,
    PTR = 12,
    TXT = 16,
    AAAA = 28,
    SRV = 33,
    NSEC = 47,
    /// Only ever valid as a question type, never as answer data.
    ANY = 255,
}

impl Type {
    pub fn from_u16(v: u16) -> Option<Type> {
        FromPrimitive::from_u16(v)
    }

    pub fn as_u16(self) -> u16 {
        self.to_u16().expect("Type always fits in u16")
    }
}

/// A single TXT record entry: `key` or `key=value`. Keys are compared
/// case-insensitively and must be unique within a record (spec §3); the
/// value, when present, is an arbitrary byte string (RFC 6763 §6.4).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxtEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl TxtEntry {
    pub fn new(key: impl Into<String>) -> TxtEntry {
        TxtEntry {
            key: key.into(),
            value: None,
        }
    }

    pub fn with_value(key: impl Into<String>, value: impl Into<Vec<u8>>) -> TxtEntry {
        TxtEntry {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    fn encode(&self, w: &mut Writer) -> Result<()> {
        let mut bytes = self.key.clone().into_bytes();
        if let Some(value) = &self.value {
            bytes.push(b'=');
            bytes.extend_from_slice(value);
        }
        w.write_char_string(&bytes)
    }

    fn decode(raw: &[u8]) -> TxtEntry {
        match raw.iter().position(|&b| b == b'=') {
            Some(i) => TxtEntry {
                key: String::from_utf8_lossy(&raw[..i]).into_owned(),
                value: Some(raw[i + 1..].to_vec()),
            },
            None => TxtEntry {
                key: String::from_utf8_lossy(raw).into_owned(),
                value: None,
            },
        }
    }
}

impl fmt::Display for TxtEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.key, String::from_utf8_lossy(v)),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Resource record data, one variant per type this engine understands.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(Name),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Txt(Vec<TxtEntry>),
    /// Negative assertion that `next_name` has no records of the listed
    /// types (RFC 4034 §4, reused by RFC 6762 §6.1 for uniqueness proofs).
    Nsec {
        next_name: Name,
        types: Vec<Type>,
    },
}

impl RecordData {
    pub fn record_type(&self) -> Type {
        match self {
            RecordData::A(_) => Type::A,
            RecordData::Aaaa(_) => Type::AAAA,
            RecordData::Ptr(_) => Type::PTR,
            RecordData::Srv { .. } => Type::SRV,
            RecordData::Txt(_) => Type::TXT,
            RecordData::Nsec { .. } => Type::NSEC,
        }
    }

    pub(crate) fn encode(&self, w: &mut Writer) -> Result<()> {
        let rewind = w.rewind()?;
        match self {
            RecordData::A(ip) => w.write_bytes(&ip.octets())?,
            RecordData::Aaaa(ip) => w.write_bytes(&ip.octets())?,
            RecordData::Ptr(name) => w.write_name(name)?,
            RecordData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                w.write_u16(*priority)?;
                w.write_u16(*weight)?;
                w.write_u16(*port)?;
                w.write_name(target)?;
            }
            RecordData::Txt(entries) => {
                if entries.is_empty() {
                    w.write_char_string(&[])?;
                } else {
                    for entry in entries {
                        entry.encode(w)?;
                    }
                }
            }
            RecordData::Nsec { next_name, types } => {
                w.write_name(next_name)?;
                encode_type_bitmap(w, types)?;
            }
        }
        w.unrewind(rewind)
    }

    pub(crate) fn decode(r: &mut Reader, rtype: Type, rdlength: usize) -> Result<RecordData> {
        let start = r.position();
        let data = match rtype {
            Type::A => {
                let bytes = r.read_bytes(4)?;
                RecordData::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            Type::AAAA => {
                let bytes = r.read_bytes(16)?;
                let octets: [u8; 16] = bytes.try_into().expect("read_bytes(16) returns 16 bytes");
                RecordData::Aaaa(Ipv6Addr::from(octets))
            }
            Type::PTR => RecordData::Ptr(r.read_name()?),
            Type::SRV => {
                let priority = r.read_u16()?;
                let weight = r.read_u16()?;
                let port = r.read_u16()?;
                let target = r.read_name()?;
                RecordData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                }
            }
            Type::TXT => {
                let end = start + rdlength;
                let mut entries = Vec::new();
                while r.position() < end {
                    let raw = r.read_char_string()?;
                    if !raw.is_empty() {
                        entries.push(TxtEntry::decode(raw));
                    }
                }
                RecordData::Txt(entries)
            }
            Type::NSEC => {
                let next_name = r.read_name()?;
                let end = start + rdlength;
                let types = decode_type_bitmap(r, end)?;
                RecordData::Nsec { next_name, types }
            }
            Type::ANY => {
                return Err(MdnsError::MalformedRecord(
                    Type::ANY,
                    "ANY is not a valid answer record type".to_string(),
                ))
            }
        };

        let consumed = r.position() - start;
        if consumed != rdlength {
            return Err(MdnsError::MalformedRecord(
                rtype,
                format!(
                    "rdata consumed {} bytes, rdlength declared {}",
                    consumed, rdlength
                ),
            ));
        }
        Ok(data)
    }
}

fn encode_type_bitmap(w: &mut Writer, types: &[Type]) -> Result<()> {
    // All types this engine knows about (max value 255) fit in window block
    // 0, so a single window is always sufficient here.
    let mut bitmap = [0u8; 32];
    let mut highest = 0usize;
    for t in types {
        let v = t.as_u16() as usize;
        let byte = v / 8;
        bitmap[byte] |= 0x80 >> (v % 8);
        highest = highest.max(byte);
    }
    w.write_u8(0)?; // window block 0
    w.write_u8((highest + 1) as u8)?;
    w.write_bytes(&bitmap[..=highest])
}

fn decode_type_bitmap(r: &mut Reader, end: usize) -> Result<Vec<Type>> {
    let mut types = Vec::new();
    while r.position() < end {
        let block = r.read_u8()? as usize;
        let len = r.read_u8()? as usize;
        let bytes = r.read_bytes(len)?;
        for (i, byte) in bytes.iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let value = (block * 256 + i * 8 + bit) as u16;
                    if let Some(t) = Type::from_u16(value) {
                        types.push(t);
                    }
                }
            }
        }
    }
    Ok(types)
}

/// A resource record: a name, class/cache-flush bit, TTL, and typed data.
#[derive(Clone, Debug)]
pub struct Record {
    pub name: Name,
    /// "Cache-flush" on responses, "unicast-reply requested" on questions;
    /// the same wire bit reused for both meanings depending on context.
    pub cache_flush: bool,
    pub ttl: u32,
    /// Monotonic receipt time, used to recompute remaining TTL later.
    pub received_at: Instant,
    pub data: RecordData,
}

impl Record {
    pub fn new(name: Name, ttl: u32, data: RecordData) -> Record {
        Record {
            name,
            cache_flush: false,
            ttl,
            received_at: Instant::now(),
            data,
        }
    }

    pub fn record_type(&self) -> Type {
        self.data.record_type()
    }

    /// Remaining TTL in seconds, given a reference point in time.
    pub fn remaining_ttl(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.received_at).as_secs() as u32;
        self.ttl.saturating_sub(elapsed)
    }

    /// True for a goodbye record per RFC 6762 §10.1 (TTL already zero).
    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.ttl == other.ttl && self.data == other.data
    }
}

pub(crate) const CLASS_INTERNET: u16 = 1;
pub(crate) const CLASS_FLUSH_BIT: u16 = 0x8000;
