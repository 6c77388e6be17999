#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use crate::{ensure_len, PacketError};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: Self = Self([0xff; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Parses the `aa:bb:cc:dd:ee:ff` form used by machine configs.
impl FromStr for MacAddr {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or(PacketError::Malformed("MAC address too short"))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| PacketError::Malformed("invalid MAC octet"))?;
        }
        if parts.next().is_some() {
            return Err(PacketError::Malformed("MAC address too long"));
        }
        Ok(Self(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub const LEN: usize = 14;

    /// Decodes the header and returns it together with the frame payload.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        ensure_len(buf, Self::LEN)?;
        let dst = MacAddr(buf[0..6].try_into().unwrap());
        let src = MacAddr(buf[6..12].try_into().unwrap());
        let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
        Ok((Self { dst, src, ethertype }, &buf[Self::LEN..]))
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dst.0);
        out.extend_from_slice(&self.src.0);
        out.extend_from_slice(&self.ethertype.to_be_bytes());
    }
}
