#![forbid(unsafe_code)]

use crate::{ensure_len, PacketError};

pub const DNS_PORT: u16 = 53;

pub const DNS_TYPE_A: u16 = 1;
pub const DNS_CLASS_IN: u16 = 1;

/// Flag word for a standard-query response with no error.
pub const DNS_FLAGS_RESPONSE: u16 = 0x8180;

const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    /// Dotted name without a trailing dot, e.g. `example.com`.
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// One DNS message, questions plus answers. Authority/additional counts are
/// accepted as zero only; compression pointers are followed on parse, and the
/// build path always writes names uncompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

impl DnsMessage {
    pub const HEADER_LEN: usize = 12;

    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        ensure_len(buf, Self::HEADER_LEN)?;
        let id = u16::from_be_bytes([buf[0], buf[1]]);
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let qdcount = u16::from_be_bytes([buf[4], buf[5]]);
        let ancount = u16::from_be_bytes([buf[6], buf[7]]);

        let mut pos = Self::HEADER_LEN;
        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            let (name, next) = parse_name(buf, pos)?;
            ensure_len(buf, next + 4)?;
            questions.push(DnsQuestion {
                name,
                qtype: u16::from_be_bytes([buf[next], buf[next + 1]]),
                qclass: u16::from_be_bytes([buf[next + 2], buf[next + 3]]),
            });
            pos = next + 4;
        }

        let mut answers = Vec::with_capacity(ancount as usize);
        for _ in 0..ancount {
            let (name, next) = parse_name(buf, pos)?;
            ensure_len(buf, next + 10)?;
            let rdlength = u16::from_be_bytes([buf[next + 8], buf[next + 9]]) as usize;
            ensure_len(buf, next + 10 + rdlength)?;
            answers.push(DnsRecord {
                name,
                rtype: u16::from_be_bytes([buf[next], buf[next + 1]]),
                rclass: u16::from_be_bytes([buf[next + 2], buf[next + 3]]),
                ttl: u32::from_be_bytes([
                    buf[next + 4],
                    buf[next + 5],
                    buf[next + 6],
                    buf[next + 7],
                ]),
                rdata: buf[next + 10..next + 10 + rdlength].to_vec(),
            });
            pos = next + 10 + rdlength;
        }

        Ok(Self {
            id,
            flags,
            questions,
            answers,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), PacketError> {
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // nscount
        out.extend_from_slice(&0u16.to_be_bytes()); // arcount

        for q in &self.questions {
            write_name(&q.name, out)?;
            out.extend_from_slice(&q.qtype.to_be_bytes());
            out.extend_from_slice(&q.qclass.to_be_bytes());
        }
        for a in &self.answers {
            write_name(&a.name, out)?;
            out.extend_from_slice(&a.rtype.to_be_bytes());
            out.extend_from_slice(&a.rclass.to_be_bytes());
            out.extend_from_slice(&a.ttl.to_be_bytes());
            if a.rdata.len() > u16::MAX as usize {
                return Err(PacketError::Malformed("DNS rdata too long"));
            }
            out.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            out.extend_from_slice(&a.rdata);
        }
        Ok(())
    }
}

/// Reads a label sequence starting at `pos`, following compression pointers.
/// Returns the dotted name and the offset just past the name in the
/// uncompressed stream (pointers do not advance the outer cursor past 2
/// bytes).
fn parse_name(buf: &[u8], mut pos: usize) -> Result<(String, usize), PacketError> {
    let mut name = String::new();
    let mut end = None;
    let mut hops = 0;
    loop {
        ensure_len(buf, pos + 1)?;
        let len = buf[pos] as usize;
        if len == 0 {
            pos += 1;
            break;
        }
        if len & 0xc0 == 0xc0 {
            ensure_len(buf, pos + 2)?;
            let target = ((len & 0x3f) << 8) | buf[pos + 1] as usize;
            if end.is_none() {
                end = Some(pos + 2);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(PacketError::Malformed("DNS pointer loop"));
            }
            pos = target;
            continue;
        }
        if len & 0xc0 != 0 {
            return Err(PacketError::Malformed("reserved DNS label type"));
        }
        ensure_len(buf, pos + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        for &b in &buf[pos + 1..pos + 1 + len] {
            if !b.is_ascii() || b == b'.' {
                return Err(PacketError::Malformed("non-ASCII DNS label"));
            }
            name.push(b as char);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(PacketError::Malformed("DNS name too long"));
        }
        pos += 1 + len;
    }
    Ok((name, end.unwrap_or(pos)))
}

fn write_name(name: &str, out: &mut Vec<u8>) -> Result<(), PacketError> {
    if name.len() > MAX_NAME_LEN {
        return Err(PacketError::Malformed("DNS name too long"));
    }
    if !name.is_empty() {
        for label in name.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(PacketError::Malformed("bad DNS label length"));
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    Ok(())
}
