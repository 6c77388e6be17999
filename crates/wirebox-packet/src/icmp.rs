#![forbid(unsafe_code)]

use crate::checksum::internet_checksum;
use crate::{ensure_len, PacketError};

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// One ICMPv4 message: type, code and everything after the checksum as an
/// opaque payload (for echo, that includes identifier/sequence/data, which
/// are echoed back verbatim).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    pub icmp_type: u8,
    pub code: u8,
    pub payload: Vec<u8>,
}

impl IcmpMessage {
    pub const HEADER_LEN: usize = 4;

    pub fn echo_reply(payload: Vec<u8>) -> Self {
        Self {
            icmp_type: ICMP_ECHO_REPLY,
            code: 0,
            payload,
        }
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type == ICMP_ECHO_REQUEST && self.code == 0
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        ensure_len(buf, Self::HEADER_LEN)?;
        Ok(Self {
            icmp_type: buf[0],
            code: buf[1],
            payload: buf[Self::HEADER_LEN..].to_vec(),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.push(self.icmp_type);
        out.push(self.code);
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.payload);
        let csum = internet_checksum(&out[start..]);
        out[start + 2..start + 4].copy_from_slice(&csum.to_be_bytes());
    }
}
