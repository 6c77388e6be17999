#![forbid(unsafe_code)]

use crate::arp::ArpPacket;
use crate::dhcp::{DhcpMessage, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::dns::{DnsMessage, DNS_PORT};
use crate::ethernet::{EthernetHeader, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6};
use crate::icmp::IcmpMessage;
use crate::ipv4::{Ipv4Header, IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP};
use crate::ntp::{NtpMessage, NTP_PORT};
use crate::tcp::TcpHeader;
use crate::udp::UdpHeader;
use crate::PacketError;

/// One fully decoded Ethernet frame.
///
/// `parse` and `build` are exact inverses for every supported shape: the
/// nested headers store only semantic fields, and `build` recomputes every
/// length and checksum, so `Packet::parse(&p.build()?)? == p`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub ethernet: EthernetHeader,
    pub payload: LinkPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPayload {
    Arp(ArpPacket),
    Ipv4 {
        header: Ipv4Header,
        transport: Transport,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Icmp(IcmpMessage),
    Tcp { header: TcpHeader, payload: Vec<u8> },
    Udp { header: UdpHeader, payload: UdpPayload },
}

/// UDP payload, decoded by well-known port (either direction) where we have a
/// codec for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpPayload {
    Dhcp(DhcpMessage),
    Dns(DnsMessage),
    Ntp(NtpMessage),
    Raw(Vec<u8>),
}

impl Transport {
    pub fn ip_protocol(&self) -> u8 {
        match self {
            Transport::Icmp(_) => IPPROTO_ICMP,
            Transport::Tcp { .. } => IPPROTO_TCP,
            Transport::Udp { .. } => IPPROTO_UDP,
        }
    }
}

impl Packet {
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        let (ethernet, body) = EthernetHeader::parse(buf)?;
        let payload = match ethernet.ethertype {
            ETHERTYPE_ARP => LinkPayload::Arp(ArpPacket::parse(body)?),
            ETHERTYPE_IPV4 => {
                let (header, ip_body) = Ipv4Header::parse(body)?;
                let transport = match header.protocol {
                    IPPROTO_ICMP => Transport::Icmp(IcmpMessage::parse(ip_body)?),
                    IPPROTO_TCP => {
                        let (tcp, payload) = TcpHeader::parse(ip_body)?;
                        Transport::Tcp {
                            header: tcp,
                            payload: payload.to_vec(),
                        }
                    }
                    IPPROTO_UDP => {
                        let (udp, datagram) = UdpHeader::parse(ip_body)?;
                        let payload = parse_udp_payload(&udp, datagram)?;
                        Transport::Udp {
                            header: udp,
                            payload,
                        }
                    }
                    _ => return Err(PacketError::Unimplemented("ip protocol")),
                };
                LinkPayload::Ipv4 { header, transport }
            }
            ETHERTYPE_IPV6 => return Err(PacketError::Unimplemented("ipv6")),
            other => return Err(PacketError::UnknownEtherType(other)),
        };
        Ok(Self { ethernet, payload })
    }

    /// Serializes the frame, recomputing checksums and length fields. The
    /// IPv4 protocol number is taken from the transport variant, so the
    /// stored header field must agree for the round trip to hold.
    pub fn build(&self) -> Result<Vec<u8>, PacketError> {
        let mut out = Vec::new();
        self.ethernet.write(&mut out);
        match &self.payload {
            LinkPayload::Arp(arp) => arp.write(&mut out),
            LinkPayload::Ipv4 { header, transport } => {
                let mut body = Vec::new();
                match transport {
                    Transport::Icmp(icmp) => icmp.write(&mut body),
                    Transport::Tcp {
                        header: tcp,
                        payload,
                    } => tcp.write(header.src, header.dst, payload, &mut body)?,
                    Transport::Udp {
                        header: udp,
                        payload,
                    } => {
                        let mut datagram = Vec::new();
                        write_udp_payload(payload, &mut datagram)?;
                        udp.write(header.src, header.dst, &datagram, &mut body)?;
                    }
                }
                let mut ip = header.clone();
                ip.protocol = transport.ip_protocol();
                ip.write(&body, &mut out)?;
            }
        }
        Ok(out)
    }
}

fn parse_udp_payload(udp: &UdpHeader, datagram: &[u8]) -> Result<UdpPayload, PacketError> {
    let port_is = |p: u16| udp.src_port == p || udp.dst_port == p;
    if port_is(DHCP_SERVER_PORT) || port_is(DHCP_CLIENT_PORT) {
        Ok(UdpPayload::Dhcp(DhcpMessage::parse(datagram)?))
    } else if port_is(DNS_PORT) {
        Ok(UdpPayload::Dns(DnsMessage::parse(datagram)?))
    } else if port_is(NTP_PORT) {
        Ok(UdpPayload::Ntp(NtpMessage::parse(datagram)?))
    } else {
        Ok(UdpPayload::Raw(datagram.to_vec()))
    }
}

fn write_udp_payload(payload: &UdpPayload, out: &mut Vec<u8>) -> Result<(), PacketError> {
    match payload {
        UdpPayload::Dhcp(dhcp) => dhcp.write(out),
        UdpPayload::Dns(dns) => dns.write(out)?,
        UdpPayload::Ntp(ntp) => ntp.write(out),
        UdpPayload::Raw(bytes) => out.extend_from_slice(bytes),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dhcp::{DhcpOption, DHCP_DISCOVER, DHCP_OP_REQUEST};
    use crate::dns::{DnsQuestion, DNS_CLASS_IN, DNS_TYPE_A};
    use crate::ethernet::MacAddr;
    use crate::icmp::ICMP_ECHO_REQUEST;
    use crate::tcp::TcpFlags;
    use core::net::Ipv4Addr;

    const MAC_A: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);
    const MAC_B: MacAddr = MacAddr([2, 0, 0, 0, 0, 2]);
    const IP_A: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const IP_B: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    fn eth(ethertype: u16) -> EthernetHeader {
        EthernetHeader {
            dst: MAC_B,
            src: MAC_A,
            ethertype,
        }
    }

    fn assert_round_trips(packet: Packet) {
        let bytes = packet.build().unwrap();
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn arp_frame() {
        assert_round_trips(Packet {
            ethernet: EthernetHeader {
                dst: MacAddr::BROADCAST,
                src: MAC_A,
                ethertype: ETHERTYPE_ARP,
            },
            payload: LinkPayload::Arp(ArpPacket::request(MAC_A, IP_A, IP_B)),
        });
    }

    #[test]
    fn icmp_echo_frame() {
        assert_round_trips(Packet {
            ethernet: eth(ETHERTYPE_IPV4),
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(IP_A, IP_B, IPPROTO_ICMP),
                transport: Transport::Icmp(IcmpMessage {
                    icmp_type: ICMP_ECHO_REQUEST,
                    code: 0,
                    payload: vec![0, 1, 0, 1, b'h', b'i'],
                }),
            },
        });
    }

    #[test]
    fn tcp_frame_with_payload() {
        assert_round_trips(Packet {
            ethernet: eth(ETHERTYPE_IPV4),
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(IP_A, IP_B, IPPROTO_TCP),
                transport: Transport::Tcp {
                    header: TcpHeader {
                        src_port: 49152,
                        dst_port: 80,
                        seq: 1000,
                        ack: 2000,
                        flags: TcpFlags::PSH | TcpFlags::ACK,
                        window_size: 64240,
                        urgent_pointer: 0,
                        options: Vec::new(),
                    },
                    payload: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
                },
            },
        });
    }

    #[test]
    fn udp_raw_frame() {
        assert_round_trips(Packet {
            ethernet: eth(ETHERTYPE_IPV4),
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(IP_A, IP_B, IPPROTO_UDP),
                transport: Transport::Udp {
                    header: UdpHeader {
                        src_port: 5000,
                        dst_port: 5001,
                    },
                    payload: UdpPayload::Raw(b"raw bytes".to_vec()),
                },
            },
        });
    }

    #[test]
    fn dhcp_frame() {
        assert_round_trips(Packet {
            ethernet: EthernetHeader {
                dst: MacAddr::BROADCAST,
                src: MAC_A,
                ethertype: ETHERTYPE_IPV4,
            },
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(
                    Ipv4Addr::UNSPECIFIED,
                    Ipv4Addr::BROADCAST,
                    IPPROTO_UDP,
                ),
                transport: Transport::Udp {
                    header: UdpHeader {
                        src_port: DHCP_CLIENT_PORT,
                        dst_port: DHCP_SERVER_PORT,
                    },
                    payload: UdpPayload::Dhcp(DhcpMessage {
                        op: DHCP_OP_REQUEST,
                        xid: 0xabad1dea,
                        secs: 0,
                        flags: 0x8000,
                        ciaddr: Ipv4Addr::UNSPECIFIED,
                        yiaddr: Ipv4Addr::UNSPECIFIED,
                        siaddr: Ipv4Addr::UNSPECIFIED,
                        giaddr: Ipv4Addr::UNSPECIFIED,
                        chaddr: MAC_A,
                        options: vec![DhcpOption::message_type(DHCP_DISCOVER)],
                    }),
                },
            },
        });
    }

    #[test]
    fn dns_frame() {
        assert_round_trips(Packet {
            ethernet: eth(ETHERTYPE_IPV4),
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(IP_A, IP_B, IPPROTO_UDP),
                transport: Transport::Udp {
                    header: UdpHeader {
                        src_port: 49153,
                        dst_port: DNS_PORT,
                    },
                    payload: UdpPayload::Dns(DnsMessage {
                        id: 7,
                        flags: 0x0100,
                        questions: vec![DnsQuestion {
                            name: "server.lan".to_string(),
                            qtype: DNS_TYPE_A,
                            qclass: DNS_CLASS_IN,
                        }],
                        answers: Vec::new(),
                    }),
                },
            },
        });
    }

    #[test]
    fn ntp_frame() {
        assert_round_trips(Packet {
            ethernet: eth(ETHERTYPE_IPV4),
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(IP_A, IP_B, IPPROTO_UDP),
                transport: Transport::Udp {
                    header: UdpHeader {
                        src_port: 49154,
                        dst_port: NTP_PORT,
                    },
                    payload: UdpPayload::Ntp(NtpMessage {
                        li_vn_mode: (4 << 3) | 3,
                        stratum: 0,
                        poll: 6,
                        precision: -20,
                        root_delay: 0,
                        root_dispersion: 0,
                        reference_id: 0,
                        reference_timestamp: 0,
                        origin_timestamp: 0,
                        receive_timestamp: 0,
                        transmit_timestamp: 1,
                    }),
                },
            },
        });
    }

    #[test]
    fn ipv6_is_unimplemented() {
        let mut buf = Vec::new();
        eth(ETHERTYPE_IPV6).write(&mut buf);
        buf.extend_from_slice(&[0u8; 40]);
        assert_eq!(
            Packet::parse(&buf),
            Err(PacketError::Unimplemented("ipv6"))
        );
    }

    #[test]
    fn unknown_ethertype_is_reported() {
        let mut buf = Vec::new();
        eth(0x9999).write(&mut buf);
        assert_eq!(
            Packet::parse(&buf),
            Err(PacketError::UnknownEtherType(0x9999))
        );
    }
}
