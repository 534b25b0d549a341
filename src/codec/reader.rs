//! Positional reader over a complete DNS/mDNS message buffer.
//!
//! Unlike a plain `Cursor`, [`Reader`] understands name compression: pointers
//! are resolved against the *whole* message buffer, not just the bytes read
//! so far, since mDNS allows forward pointers (spec §4.1).

use byteorder::{ByteOrder, BE};

use crate::error::{MdnsError, Result};
use crate::label::{Name, MAX_NAME_LEN};

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(MdnsError::TruncatedPacket)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(BE::read_u16(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(BE::read_u32(bytes))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or(MdnsError::TruncatedPacket)?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reads a length-prefixed (single byte length) byte string, as used by
    /// TXT record entries.
    pub fn read_char_string(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }

    /// Decodes a label sequence, following compression pointers against the
    /// full message buffer. Advances `self.pos` past the encoding in the
    /// *main* stream only (i.e. past the first pointer, not into wherever it
    /// points), matching RFC 1035 §4.1.4.
    pub fn read_name(&mut self) -> Result<Name> {
        let mut labels: Vec<Box<str>> = Vec::new();
        let mut encoded_len = 0usize;
        let mut cur = self.pos;
        let mut resume_at: Option<usize> = None;
        // A pointer chain can visit at most buf.len() distinct offsets
        // before it must be cycling; this is the "bound hops to packet
        // length" rule from spec §4.1.
        let max_hops = self.buf.len().max(1);
        let mut hops = 0usize;

        loop {
            let len_byte = *self
                .buf
                .get(cur)
                .ok_or(MdnsError::TruncatedPacket)?;

            match len_byte & 0xC0 {
                0x00 => {
                    let len = len_byte as usize;
                    if len == 0 {
                        cur += 1;
                        if resume_at.is_none() {
                            resume_at = Some(cur);
                        }
                        break;
                    }

                    let start = cur + 1;
                    let end = start
                        .checked_add(len)
                        .filter(|&e| e <= self.buf.len())
                        .ok_or(MdnsError::TruncatedPacket)?;

                    let label = &self.buf[start..end];
                    if !label.is_ascii() {
                        return Err(MdnsError::MalformedName(
                            "label is not ASCII".to_string(),
                        ));
                    }
                    let label = std::str::from_utf8(label)
                        .map_err(|e| MdnsError::MalformedName(e.to_string()))?;
                    labels.push(Box::from(label));

                    encoded_len += len + 1;
                    if encoded_len > MAX_NAME_LEN {
                        return Err(MdnsError::MalformedName(
                            "name exceeds 255 bytes".to_string(),
                        ));
                    }

                    cur = end;
                }

                0xC0 => {
                    if cur + 1 >= self.buf.len() {
                        return Err(MdnsError::TruncatedPacket);
                    }
                    let ptr = (((len_byte as usize) & 0x3F) << 8) | self.buf[cur + 1] as usize;

                    if resume_at.is_none() {
                        resume_at = Some(cur + 2);
                    }

                    hops += 1;
                    if hops > max_hops {
                        return Err(MdnsError::MalformedName(
                            "compression pointer cycle".to_string(),
                        ));
                    }
                    if ptr >= self.buf.len() {
                        return Err(MdnsError::MalformedName(
                            "compression pointer out of range".to_string(),
                        ));
                    }

                    cur = ptr;
                }

                _ => {
                    return Err(MdnsError::MalformedName(format!(
                        "reserved label bits {:#04x}",
                        len_byte & 0xC0
                    )))
                }
            }
        }

        self.pos = resume_at.unwrap_or(cur);
        Ok(Name::from_labels(labels))
    }
}
