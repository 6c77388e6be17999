#![forbid(unsafe_code)]

use core::net::Ipv4Addr;

use crate::checksum::ipv4_header_checksum;
use crate::{ensure_len, PacketError};

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

const FLAG_DF: u16 = 0x4000;

/// Decoded IPv4 header. Total length and header checksum are derived from the
/// assembled bytes on the build path and are not stored, so a parsed header
/// compares equal to the one it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub identification: u16,
    pub dont_fragment: bool,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Header options; length must be a multiple of 4 to build.
    pub options: Vec<u8>,
}

impl Ipv4Header {
    pub const MIN_LEN: usize = 20;

    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> Self {
        Self {
            tos: 0,
            identification: 0,
            dont_fragment: false,
            ttl: 64,
            protocol,
            src,
            dst,
            options: Vec::new(),
        }
    }

    /// Decodes the header; returns it with the IPv4 payload (bounded by the
    /// total-length field, which may be shorter than the buffer thanks to
    /// Ethernet minimum-frame padding).
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let version = buf[0] >> 4;
        let ihl = (buf[0] & 0x0f) as usize;
        if version != 4 || ihl < 5 {
            return Err(PacketError::Malformed("invalid IPv4 version/IHL"));
        }
        let header_len = ihl * 4;
        ensure_len(buf, header_len)?;
        let total_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if total_len < header_len {
            return Err(PacketError::Malformed("IPv4 total length < header"));
        }
        ensure_len(buf, total_len)?;

        let flags_fragment = u16::from_be_bytes([buf[6], buf[7]]);
        let header = Self {
            tos: buf[1],
            identification: u16::from_be_bytes([buf[4], buf[5]]),
            dont_fragment: flags_fragment & FLAG_DF != 0,
            ttl: buf[8],
            protocol: buf[9],
            src: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            dst: Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]),
            options: buf[20..header_len].to_vec(),
        };
        Ok((header, &buf[header_len..total_len]))
    }

    pub fn header_len(&self) -> Result<usize, PacketError> {
        if self.options.len() % 4 != 0 {
            return Err(PacketError::Malformed(
                "IPv4 options length not multiple of 4",
            ));
        }
        let header_len = Self::MIN_LEN + self.options.len();
        if header_len / 4 > 0x0f {
            return Err(PacketError::Malformed("IPv4 header too large"));
        }
        Ok(header_len)
    }

    /// Serializes header + payload, computing total length and header
    /// checksum from the assembled sizes.
    pub fn write(&self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), PacketError> {
        let header_len = self.header_len()?;
        let total_len = header_len + payload.len();
        if total_len > u16::MAX as usize {
            return Err(PacketError::Malformed("IPv4 total length > 65535"));
        }

        let start = out.len();
        out.resize(start + header_len, 0);
        let header = &mut out[start..start + header_len];
        header[0] = (4u8 << 4) | (header_len / 4) as u8;
        header[1] = self.tos;
        header[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        header[4..6].copy_from_slice(&self.identification.to_be_bytes());
        let flags_fragment = if self.dont_fragment { FLAG_DF } else { 0 };
        header[6..8].copy_from_slice(&flags_fragment.to_be_bytes());
        header[8] = self.ttl;
        header[9] = self.protocol;
        header[10..12].copy_from_slice(&0u16.to_be_bytes());
        header[12..16].copy_from_slice(&self.src.octets());
        header[16..20].copy_from_slice(&self.dst.octets());
        header[20..].copy_from_slice(&self.options);

        let csum = ipv4_header_checksum(header);
        out[start + 10..start + 12].copy_from_slice(&csum.to_be_bytes());
        out.extend_from_slice(payload);
        Ok(())
    }
}
