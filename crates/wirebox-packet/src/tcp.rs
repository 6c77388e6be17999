#![forbid(unsafe_code)]

use core::net::Ipv4Addr;

use crate::checksum::transport_checksum_ipv4;
use crate::ipv4::IPPROTO_TCP;
use crate::{ensure_len, PacketError};

/// The 8 flag bits from byte 13 plus the NS bit from byte 12.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpFlags(pub u16);

impl TcpFlags {
    pub const FIN: TcpFlags = TcpFlags(0x001);
    pub const SYN: TcpFlags = TcpFlags(0x002);
    pub const RST: TcpFlags = TcpFlags(0x004);
    pub const PSH: TcpFlags = TcpFlags(0x008);
    pub const ACK: TcpFlags = TcpFlags(0x010);
    pub const URG: TcpFlags = TcpFlags(0x020);
    pub const ECE: TcpFlags = TcpFlags(0x040);
    pub const CWR: TcpFlags = TcpFlags(0x080);
    pub const NS: TcpFlags = TcpFlags(0x100);

    pub fn contains(self, other: TcpFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl core::ops::BitOr for TcpFlags {
    type Output = TcpFlags;

    fn bitor(self, rhs: TcpFlags) -> Self::Output {
        TcpFlags(self.0 | rhs.0)
    }
}

/// Decoded TCP header. The checksum is recomputed on build and not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window_size: u16,
    pub urgent_pointer: u16,
    /// Header options; length must be a multiple of 4 to build.
    pub options: Vec<u8>,
}

impl TcpHeader {
    pub const MIN_LEN: usize = 20;

    /// Decodes the header; returns it with the segment payload.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        ensure_len(buf, Self::MIN_LEN)?;
        let data_offset = buf[12] >> 4;
        if data_offset < 5 {
            return Err(PacketError::Malformed("TCP data offset < 5"));
        }
        let header_len = (data_offset as usize) * 4;
        ensure_len(buf, header_len)?;
        let header = Self {
            src_port: u16::from_be_bytes([buf[0], buf[1]]),
            dst_port: u16::from_be_bytes([buf[2], buf[3]]),
            seq: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ack: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            flags: TcpFlags((u16::from(buf[12] & 0x01) << 8) | u16::from(buf[13])),
            window_size: u16::from_be_bytes([buf[14], buf[15]]),
            urgent_pointer: u16::from_be_bytes([buf[18], buf[19]]),
            options: buf[Self::MIN_LEN..header_len].to_vec(),
        };
        Ok((header, &buf[header_len..]))
    }

    pub fn header_len(&self) -> Result<usize, PacketError> {
        if self.options.len() % 4 != 0 {
            return Err(PacketError::Malformed("TCP options length not multiple of 4"));
        }
        let header_len = Self::MIN_LEN + self.options.len();
        if header_len / 4 > 0x0f {
            return Err(PacketError::Malformed("TCP header too large"));
        }
        Ok(header_len)
    }

    /// Serializes header + payload with a freshly computed checksum over the
    /// IPv4 pseudo-header and the segment.
    ///
    /// Unlike UDP, TCP has no "checksum disabled" sentinel; a computed
    /// checksum of 0x0000 is valid and written as-is.
    pub fn write(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        payload: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), PacketError> {
        let header_len = self.header_len()?;
        let start = out.len();
        out.resize(start + header_len, 0);
        {
            let header = &mut out[start..start + header_len];
            header[0..2].copy_from_slice(&self.src_port.to_be_bytes());
            header[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
            header[4..8].copy_from_slice(&self.seq.to_be_bytes());
            header[8..12].copy_from_slice(&self.ack.to_be_bytes());
            header[12] = (((header_len / 4) as u8) << 4) | ((self.flags.0 >> 8) as u8 & 0x01);
            header[13] = self.flags.0 as u8;
            header[14..16].copy_from_slice(&self.window_size.to_be_bytes());
            header[16..18].copy_from_slice(&0u16.to_be_bytes());
            header[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());
            header[20..].copy_from_slice(&self.options);
        }
        out.extend_from_slice(payload);

        let csum = transport_checksum_ipv4(src_ip, dst_ip, IPPROTO_TCP, &out[start..]);
        out[start + 16..start + 18].copy_from_slice(&csum.to_be_bytes());
        Ok(())
    }
}
