#![forbid(unsafe_code)]

use core::net::Ipv4Addr;

use crate::ethernet::{MacAddr, ETHERTYPE_IPV4};
use crate::{ensure_len, PacketError};

pub const HTYPE_ETHERNET: u16 = 1;
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

/// One ARP packet (Ethernet/IPv4 flavor). `hlen`/`plen` are fixed at 6/4 on
/// the wire and are not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub htype: u16,
    pub ptype: u16,
    pub oper: u16,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

impl ArpPacket {
    pub const LEN: usize = 28;

    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            htype: HTYPE_ETHERNET,
            ptype: ETHERTYPE_IPV4,
            oper: ARP_OP_REQUEST,
            sha: sender_mac,
            spa: sender_ip,
            tha: MacAddr([0u8; 6]),
            tpa: target_ip,
        }
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            htype: HTYPE_ETHERNET,
            ptype: ETHERTYPE_IPV4,
            oper: ARP_OP_REPLY,
            sha: sender_mac,
            spa: sender_ip,
            tha: target_mac,
            tpa: target_ip,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        ensure_len(buf, Self::LEN)?;
        Ok(Self {
            htype: u16::from_be_bytes([buf[0], buf[1]]),
            ptype: u16::from_be_bytes([buf[2], buf[3]]),
            oper: u16::from_be_bytes([buf[6], buf[7]]),
            sha: MacAddr(buf[8..14].try_into().unwrap()),
            spa: Ipv4Addr::new(buf[14], buf[15], buf[16], buf[17]),
            tha: MacAddr(buf[18..24].try_into().unwrap()),
            tpa: Ipv4Addr::new(buf[24], buf[25], buf[26], buf[27]),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.htype.to_be_bytes());
        out.extend_from_slice(&self.ptype.to_be_bytes());
        out.push(6); // hlen
        out.push(4); // plen
        out.extend_from_slice(&self.oper.to_be_bytes());
        out.extend_from_slice(&self.sha.0);
        out.extend_from_slice(&self.spa.octets());
        out.extend_from_slice(&self.tha.0);
        out.extend_from_slice(&self.tpa.octets());
    }
}
