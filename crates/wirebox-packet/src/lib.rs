#![forbid(unsafe_code)]

//! Packet codec for the wirebox virtual network.
//!
//! Bit-exact translation between raw Ethernet frames and the decoded
//! [`Packet`] representation, in both directions. The build path computes all
//! checksums and length fields from the assembled bytes, so
//! `Packet::parse(&p.build()?)` reproduces `p` for every supported shape;
//! this is the compatibility contract for frames consumed by a real VM's
//! emulated NIC.
//!
//! The codec has no knowledge of connections or routing; it deals with one
//! frame at a time.

pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod dns;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod ntp;
pub mod tcp;
pub mod udp;

mod frame;

pub use arp::{ArpPacket, ARP_OP_REPLY, ARP_OP_REQUEST, HTYPE_ETHERNET};
pub use dhcp::{DhcpMessage, DhcpOption, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
pub use dns::{DnsMessage, DnsQuestion, DnsRecord, DNS_PORT};
pub use ethernet::{EthernetHeader, MacAddr, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6};
pub use frame::{LinkPayload, Packet, Transport, UdpPayload};
pub use icmp::{IcmpMessage, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
pub use ipv4::{Ipv4Header, IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP};
pub use ntp::{NtpMessage, NTP_PORT};
pub use tcp::{TcpFlags, TcpHeader};
pub use udp::UdpHeader;

use thiserror::Error;

/// Codec failure. Fatal to the single frame being processed, never to the
/// caller's engine; callers are expected to catch per frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("truncated packet")]
    Truncated,
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("unknown ethertype: {0:#06x}")]
    UnknownEtherType(u16),
    #[error("unimplemented protocol: {0}")]
    Unimplemented(&'static str),
}

pub(crate) fn ensure_len(data: &[u8], len: usize) -> Result<(), PacketError> {
    if data.len() < len {
        return Err(PacketError::Truncated);
    }
    Ok(())
}
