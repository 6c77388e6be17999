#![forbid(unsafe_code)]

use core::net::Ipv4Addr;

use crate::checksum::transport_checksum_ipv4;
use crate::ipv4::IPPROTO_UDP;
use crate::{ensure_len, PacketError};

/// Decoded UDP header. Length and checksum are derived on build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
}

impl UdpHeader {
    pub const LEN: usize = 8;

    /// Decodes the header; returns it with the datagram payload (bounded by
    /// the UDP length field).
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        ensure_len(buf, Self::LEN)?;
        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if length < Self::LEN {
            return Err(PacketError::Malformed("UDP length < header length"));
        }
        ensure_len(buf, length)?;
        let header = Self {
            src_port: u16::from_be_bytes([buf[0], buf[1]]),
            dst_port: u16::from_be_bytes([buf[2], buf[3]]),
        };
        Ok((header, &buf[Self::LEN..length]))
    }

    /// Serializes header + payload. A computed checksum of 0x0000 is written
    /// as 0xffff since zero is the "checksum disabled" sentinel.
    pub fn write(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        payload: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), PacketError> {
        let len = Self::LEN + payload.len();
        if len > u16::MAX as usize {
            return Err(PacketError::Malformed("UDP length > 65535"));
        }
        let start = out.len();
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(payload);

        let mut csum = transport_checksum_ipv4(src_ip, dst_ip, IPPROTO_UDP, &out[start..]);
        if csum == 0 {
            csum = 0xffff;
        }
        out[start + 6..start + 8].copy_from_slice(&csum.to_be_bytes());
        Ok(())
    }
}
