//! The 12-byte header and the question/answer/authority/additional sections
//! (spec §3, §6).

use crate::error::{MdnsError, Result};
use crate::label::Name;

use super::record::{Record, RecordData, Type, CLASS_FLUSH_BIT, CLASS_INTERNET};
use super::reader::Reader;
use super::writer::Writer;

/// `QR|AA` response flags, as emitted on the wire (spec §6: `0x8400`).
const FLAGS_RESPONSE: u16 = 0x8400;
const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Qr {
    Query,
    Response,
}

/// A question: a name, record type, class, and (query-only) unicast-reply
/// request bit.
#[derive(Clone, Debug, PartialEq)]
pub struct Question {
    pub name: Name,
    pub qtype: Type,
    /// Set only on the first question of a query burst (spec §4.4.2).
    pub unicast_response: bool,
}

impl Question {
    pub fn new(name: Name, qtype: Type) -> Question {
        Question {
            name,
            qtype,
            unicast_response: false,
        }
    }

    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.write_name(&self.name)?;
        w.write_u16(self.qtype.as_u16())?;
        let class = CLASS_INTERNET | if self.unicast_response { CLASS_FLUSH_BIT } else { 0 };
        w.write_u16(class)
    }

    fn decode(r: &mut Reader) -> Result<Question> {
        let name = r.read_name()?;
        let qtype_raw = r.read_u16()?;
        let qtype = Type::from_u16(qtype_raw).ok_or(MdnsError::UnknownRecordType(qtype_raw))?;
        let class = r.read_u16()?;
        Ok(Question {
            name,
            qtype,
            unicast_response: class & CLASS_FLUSH_BIT != 0,
        })
    }
}

/// A complete DNS/mDNS message: 12-byte header plus four sections.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub id: u16,
    pub qr: Option<Qr>,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
}

impl Message {
    pub fn query(id: u16) -> Message {
        Message {
            id,
            qr: Some(Qr::Query),
            ..Default::default()
        }
    }

    pub fn response(id: u16) -> Message {
        Message {
            id,
            qr: Some(Qr::Response),
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.qr, Some(Qr::Response))
    }

    /// Encodes this message into a buffer no longer than `max_len` bytes.
    pub fn to_bytes(&self, max_len: usize) -> Result<Vec<u8>> {
        let mut w = Writer::new(max_len);

        w.write_u16(self.id)?;
        let flags = match self.qr {
            Some(Qr::Response) => FLAGS_RESPONSE,
            _ => 0,
        };
        debug_assert!(flags == 0 || flags & (FLAG_QR | FLAG_AA) == FLAGS_RESPONSE);
        w.write_u16(flags)?;

        w.write_u16(self.questions.len() as u16)?;
        w.write_u16(self.answers.len() as u16)?;
        w.write_u16(self.authority.len() as u16)?;
        w.write_u16(self.additional.len() as u16)?;

        for q in &self.questions {
            q.encode(&mut w)?;
        }
        for rec in self
            .answers
            .iter()
            .chain(self.authority.iter())
            .chain(self.additional.iter())
        {
            encode_record(&mut w, rec)?;
        }

        Ok(w.into_vec())
    }

    /// Decodes a message from a complete datagram.
    pub fn from_bytes(buf: &[u8]) -> Result<Message> {
        let mut r = Reader::new(buf);

        let id = r.read_u16()?;
        let flags = r.read_u16()?;
        let qr = if flags & FLAG_QR != 0 {
            Some(Qr::Response)
        } else {
            Some(Qr::Query)
        };

        let qd_count = r.read_u16()?;
        let an_count = r.read_u16()?;
        let ns_count = r.read_u16()?;
        let ar_count = r.read_u16()?;

        let mut questions = Vec::with_capacity(qd_count as usize);
        for _ in 0..qd_count {
            questions.push(Question::decode(&mut r)?);
        }

        let answers = decode_records(&mut r, an_count)?;
        let authority = decode_records(&mut r, ns_count)?;
        let additional = decode_records(&mut r, ar_count)?;

        Ok(Message {
            id,
            qr,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

fn encode_record(w: &mut Writer, rec: &Record) -> Result<()> {
    w.write_name(&rec.name)?;
    w.write_u16(rec.record_type().as_u16())?;
    let class = CLASS_INTERNET | if rec.cache_flush { CLASS_FLUSH_BIT } else { 0 };
    w.write_u16(class)?;
    w.write_u32(rec.ttl)?;
    rec.data.encode(w)
}

/// Decodes `count` records, skipping (but not erroring on) any whose type is
/// outside the closed set this engine understands (spec §7:
/// `UnknownRecordType`, reader policy is to skip via `rdlength`).
fn decode_records(r: &mut Reader, count: u16) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = r.read_name()?;
        let rtype_raw = r.read_u16()?;
        let class = r.read_u16()?;
        let ttl = r.read_u32()?;
        let rdlength = r.read_u16()? as usize;

        match Type::from_u16(rtype_raw) {
            Some(rtype) if rtype != Type::ANY => {
                let data = RecordData::decode(r, rtype, rdlength)?;
                records.push(Record {
                    name,
                    cache_flush: class & CLASS_FLUSH_BIT != 0,
                    ttl,
                    received_at: std::time::Instant::now(),
                    data,
                });
            }
            _ => {
                log::warn!("skipping unknown/invalid record type {}", rtype_raw);
                r.read_bytes(rdlength)?;
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::record::TxtEntry;
    use std::net::Ipv4Addr;

    #[test]
    fn query_round_trips() {
        let mut m = Message::query(1234);
        m.questions.push(Question::new(
            Name::from("_printer._tcp.local"),
            Type::PTR,
        ));

        let buf = m.to_bytes(512).unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();

        assert_eq!(decoded.id, 1234);
        assert!(!decoded.is_response());
        assert_eq!(decoded.questions.len(), 1);
        assert_eq!(decoded.questions[0].name, Name::from("_printer._tcp.local"));
    }

    #[test]
    fn response_with_mixed_records_round_trips() {
        let mut m = Message::response(1);
        m.answers.push(Record::new(
            Name::from("MyPrinter._printer._tcp.local"),
            4500,
            RecordData::Ptr(Name::from("MyPrinter._printer._tcp.local")),
        ));
        let mut srv = Record::new(
            Name::from("MyPrinter._printer._tcp.local"),
            120,
            RecordData::Srv {
                priority: 0,
                weight: 0,
                port: 631,
                target: Name::from("printer.local"),
            },
        );
        srv.cache_flush = true;
        m.answers.push(srv);
        m.answers.push(Record::new(
            Name::from("printer.local"),
            120,
            RecordData::A(Ipv4Addr::new(192, 0, 2, 7)),
        ));
        m.answers.push(Record::new(
            Name::from("MyPrinter._printer._tcp.local"),
            4500,
            RecordData::Txt(vec![TxtEntry::with_value("rp", b"queue".to_vec())]),
        ));

        let buf = m.to_bytes(512).unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();

        assert!(decoded.is_response());
        assert_eq!(decoded.answers.len(), 4);
        assert!(decoded.answers[1].cache_flush);
    }

    #[test]
    fn name_compression_is_transparent_regardless_of_write_order() {
        let mut m = Message::response(1);
        m.answers.push(Record::new(
            Name::from("a.b.local"),
            1,
            RecordData::Ptr(Name::from("x.b.local")),
        ));
        m.answers.push(Record::new(
            Name::from("x.b.local"),
            1,
            RecordData::Ptr(Name::from("a.b.local")),
        ));

        let buf = m.to_bytes(512).unwrap();
        let decoded = Message::from_bytes(&buf).unwrap();
        assert_eq!(decoded.answers[0].name, Name::from("a.b.local"));
        assert_eq!(decoded.answers[1].name, Name::from("x.b.local"));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let buf = [0u8; 4];
        assert!(matches!(
            Message::from_bytes(&buf),
            Err(MdnsError::TruncatedPacket)
        ));
    }
}
