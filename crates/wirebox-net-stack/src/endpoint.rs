#![forbid(unsafe_code)]

use core::net::Ipv4Addr;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use wirebox_packet::{
    ArpPacket, EthernetHeader, IcmpMessage, Ipv4Header, LinkPayload, MacAddr, Packet, PacketError,
    TcpFlags, TcpHeader, Transport, ARP_OP_REQUEST, ETHERTYPE_IPV4, IPPROTO_ICMP, IPPROTO_TCP,
};

use crate::{Millis, StackError};

pub const ARP_CACHE_TTL_MS: Millis = 5 * 60 * 1000;
pub const ARP_RESOLVE_TIMEOUT_MS: Millis = 5 * 1000;
pub const CONNECT_TIMEOUT_MS: Millis = 10 * 1000;

pub const DYNAMIC_PORT_MIN: u16 = 49152;
pub const DYNAMIC_PORT_MAX: u16 = 65535;

/// Fixed advertised receive window. Flow control is not modeled; peers on
/// this network never send more than a window per exchange.
pub const TCP_WINDOW: u16 = 64240;

const PORT_ALLOC_ATTEMPTS: u32 = 32;

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    /// Ports that accept passive opens. The dynamic range always accepts;
    /// SYNs to any other unlisted port are answered with an RST.
    pub open_ports: Vec<u16>,
    /// Seed for local-port and ISN generation; fixed per machine so runs are
    /// reproducible.
    pub seed: u64,
}

/// Why an active open failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    #[error("address resolution timed out")]
    ArpTimeout,
    #[error("connect timed out")]
    TimedOut,
    #[error("connection refused")]
    Refused,
}

/// Output of one endpoint input. `EmitFrame` goes to the wire; everything
/// else goes to the machine module that owns the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    EmitFrame(Vec<u8>),
    Data {
        remote_ip: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
        data: Vec<u8>,
        /// Set on FIN or RST; delivered exactly once per connection.
        eof: bool,
    },
    Connected {
        remote_ip: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    },
    ConnectFailed {
        remote_ip: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
        reason: ConnectError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    SynSent,
    SynReceived,
    Established,
    CloseWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TcpKey {
    remote_ip: Ipv4Addr,
    remote_port: u16,
    local_port: u16,
}

#[derive(Debug, Clone)]
struct TcpConn {
    state: TcpState,
    remote_mac: MacAddr,
    /// Next sequence number we will send.
    local_seq: u32,
    /// Next sequence number we expect from the peer.
    remote_seq: u32,
    /// Active opens only: when the pending connect gives up.
    connect_deadline: Option<Millis>,
}

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    mac: MacAddr,
    learned_at: Millis,
}

/// An active open waiting for the peer MAC. The SYN goes out when the ARP
/// reply lands; `arp_deadline` bounds the wait.
#[derive(Debug, Clone, Copy)]
struct PendingConnect {
    remote_ip: Ipv4Addr,
    remote_port: u16,
    local_port: u16,
    arp_deadline: Millis,
    connect_deadline: Millis,
}

/// One machine's network identity plus all of its TCP/ARP state.
#[derive(Debug)]
pub struct Endpoint {
    cfg: EndpointConfig,
    rng: StdRng,
    next_isn: u32,
    connections: HashMap<TcpKey, TcpConn>,
    arp_cache: HashMap<Ipv4Addr, ArpEntry>,
    pending_connects: Vec<PendingConnect>,
}

impl Endpoint {
    pub fn new(cfg: EndpointConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let next_isn = rng.gen();
        Self {
            cfg,
            rng,
            next_isn,
            connections: HashMap::new(),
            arp_cache: HashMap::new(),
            pending_connects: Vec::new(),
        }
    }

    pub fn mac(&self) -> MacAddr {
        self.cfg.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.cfg.ip
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_state(
        &self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> Option<TcpState> {
        self.connections
            .get(&TcpKey {
                remote_ip,
                remote_port,
                local_port,
            })
            .map(|c| c.state)
    }

    /// Processes one inbound Ethernet frame. Malformed frames are logged and
    /// dropped; they never poison the endpoint.
    pub fn handle_frame(&mut self, frame: &[u8], now: Millis) -> Vec<Action> {
        match self.handle_frame_inner(frame, now) {
            Ok(actions) => actions,
            Err(err) => {
                tracing::debug!(%err, "dropping frame");
                Vec::new()
            }
        }
    }

    fn handle_frame_inner(&mut self, frame: &[u8], now: Millis) -> Result<Vec<Action>, PacketError> {
        let Packet { ethernet, payload } = Packet::parse(frame)?;
        if ethernet.dst != self.cfg.mac && !ethernet.dst.is_broadcast() {
            return Ok(Vec::new());
        }
        match payload {
            LinkPayload::Arp(arp) => self.handle_arp(arp, now),
            LinkPayload::Ipv4 { header, transport } => {
                if header.dst != self.cfg.ip {
                    return Ok(Vec::new());
                }
                match transport {
                    Transport::Icmp(icmp) => self.handle_icmp(ethernet.src, header.src, icmp),
                    Transport::Tcp {
                        header: tcp,
                        payload,
                    } => self.handle_tcp(ethernet.src, header.src, tcp, payload, now),
                    Transport::Udp { .. } => {
                        tracing::trace!("ignoring UDP datagram");
                        Ok(Vec::new())
                    }
                }
            }
        }
    }

    /// Starts an active open to `remote_ip:remote_port`. Returns the
    /// allocated local port; the handshake outcome arrives later as a
    /// `Connected` or `ConnectFailed` action.
    pub fn connect(
        &mut self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        now: Millis,
    ) -> Result<(u16, Vec<Action>), StackError> {
        let local_port = self.alloc_dynamic_port()?;
        let mut out = Vec::new();
        match self.lookup_arp(remote_ip, now) {
            Some(remote_mac) => {
                let frame = self.open_syn(
                    remote_ip,
                    remote_port,
                    local_port,
                    remote_mac,
                    now + CONNECT_TIMEOUT_MS,
                )?;
                out.push(Action::EmitFrame(frame));
            }
            None => {
                self.pending_connects.push(PendingConnect {
                    remote_ip,
                    remote_port,
                    local_port,
                    arp_deadline: now + ARP_RESOLVE_TIMEOUT_MS,
                    connect_deadline: now + CONNECT_TIMEOUT_MS,
                });
                let arp = ArpPacket::request(self.cfg.mac, self.cfg.ip, remote_ip);
                out.push(Action::EmitFrame(arp_frame(
                    self.cfg.mac,
                    MacAddr::BROADCAST,
                    &arp,
                )?));
            }
        }
        Ok((local_port, out))
    }

    /// Sends payload bytes on an established connection. No retransmission:
    /// the segment goes out once and the peer's ACK is trusted.
    pub fn send(
        &mut self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
        data: &[u8],
        _now: Millis,
    ) -> Result<Vec<Action>, StackError> {
        let key = TcpKey {
            remote_ip,
            remote_port,
            local_port,
        };
        let conn = self
            .connections
            .get_mut(&key)
            .ok_or(StackError::ConnectionNotFound)?;
        if conn.state != TcpState::Established {
            return Err(StackError::ConnectionNotEstablished);
        }
        let header = segment(
            local_port,
            remote_port,
            conn.local_seq,
            conn.remote_seq,
            TcpFlags::PSH | TcpFlags::ACK,
        );
        conn.local_seq = conn.local_seq.wrapping_add(data.len() as u32);
        let frame = tcp_frame(
            self.cfg.mac,
            self.cfg.ip,
            conn.remote_mac,
            remote_ip,
            header,
            data,
        )?;
        Ok(vec![Action::EmitFrame(frame)])
    }

    /// Expires pending waits. Call this on every clock advance.
    pub fn on_tick(&mut self, now: Millis) -> Vec<Action> {
        let mut out = Vec::new();

        let mut waiting = Vec::new();
        for p in self.pending_connects.drain(..) {
            if now >= p.arp_deadline {
                out.push(Action::ConnectFailed {
                    remote_ip: p.remote_ip,
                    remote_port: p.remote_port,
                    local_port: p.local_port,
                    reason: ConnectError::ArpTimeout,
                });
            } else {
                waiting.push(p);
            }
        }
        self.pending_connects = waiting;

        let expired: Vec<TcpKey> = self
            .connections
            .iter()
            .filter_map(|(key, conn)| match conn.connect_deadline {
                Some(deadline) if now >= deadline => Some(*key),
                _ => None,
            })
            .collect();
        for key in expired {
            self.connections.remove(&key);
            out.push(Action::ConnectFailed {
                remote_ip: key.remote_ip,
                remote_port: key.remote_port,
                local_port: key.local_port,
                reason: ConnectError::TimedOut,
            });
        }

        out
    }

    fn handle_arp(&mut self, arp: ArpPacket, now: Millis) -> Result<Vec<Action>, PacketError> {
        let mut out = Vec::new();

        // Any observed ARP traffic refreshes the cache.
        if !arp.spa.is_unspecified() {
            self.arp_cache.insert(
                arp.spa,
                ArpEntry {
                    mac: arp.sha,
                    learned_at: now,
                },
            );
        }

        if arp.oper == ARP_OP_REQUEST && arp.tpa == self.cfg.ip {
            let reply = ArpPacket::reply(self.cfg.mac, self.cfg.ip, arp.sha, arp.spa);
            out.push(Action::EmitFrame(arp_frame(self.cfg.mac, arp.sha, &reply)?));
        }

        // Connects that were waiting on this address can send their SYN now.
        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .pending_connects
            .drain(..)
            .partition(|p| p.remote_ip == arp.spa);
        self.pending_connects = waiting;
        for p in ready {
            let frame = self.open_syn(
                p.remote_ip,
                p.remote_port,
                p.local_port,
                arp.sha,
                p.connect_deadline,
            )?;
            out.push(Action::EmitFrame(frame));
        }

        Ok(out)
    }

    fn handle_icmp(
        &mut self,
        src_mac: MacAddr,
        src_ip: Ipv4Addr,
        icmp: IcmpMessage,
    ) -> Result<Vec<Action>, PacketError> {
        if !icmp.is_echo_request() {
            return Ok(Vec::new());
        }
        // Identifier, sequence and data all live in the opaque payload and
        // are echoed back verbatim.
        let reply = Packet {
            ethernet: EthernetHeader {
                dst: src_mac,
                src: self.cfg.mac,
                ethertype: ETHERTYPE_IPV4,
            },
            payload: LinkPayload::Ipv4 {
                header: Ipv4Header::new(self.cfg.ip, src_ip, IPPROTO_ICMP),
                transport: Transport::Icmp(IcmpMessage::echo_reply(icmp.payload)),
            },
        }
        .build()?;
        Ok(vec![Action::EmitFrame(reply)])
    }

    fn handle_tcp(
        &mut self,
        src_mac: MacAddr,
        src_ip: Ipv4Addr,
        tcp: TcpHeader,
        payload: Vec<u8>,
        now: Millis,
    ) -> Result<Vec<Action>, PacketError> {
        // TCP traffic refreshes the sender's ARP entry too.
        self.arp_cache.insert(
            src_ip,
            ArpEntry {
                mac: src_mac,
                learned_at: now,
            },
        );

        let key = TcpKey {
            remote_ip: src_ip,
            remote_port: tcp.src_port,
            local_port: tcp.dst_port,
        };
        if !self.connections.contains_key(&key) {
            return self.handle_tcp_new_flow(src_mac, src_ip, tcp, key);
        }

        let our_mac = self.cfg.mac;
        let our_ip = self.cfg.ip;
        let mut out = Vec::new();
        let mut remove = false;

        let Some(conn) = self.connections.get_mut(&key) else {
            return Ok(out);
        };
        let flags = tcp.flags;

        if flags.contains(TcpFlags::RST) {
            match conn.state {
                TcpState::SynSent => out.push(Action::ConnectFailed {
                    remote_ip: key.remote_ip,
                    remote_port: key.remote_port,
                    local_port: key.local_port,
                    reason: ConnectError::Refused,
                }),
                TcpState::Established | TcpState::CloseWait => out.push(Action::Data {
                    remote_ip: key.remote_ip,
                    remote_port: key.remote_port,
                    local_port: key.local_port,
                    data: Vec::new(),
                    eof: true,
                }),
                TcpState::SynReceived => {}
            }
            remove = true;
        } else if flags.contains(TcpFlags::SYN) && !flags.contains(TcpFlags::ACK) {
            // Simultaneous or duplicate SYN on a tracked flow. Reset the
            // sender; the existing connection state is left untouched.
            tracing::warn!(
                remote = %src_ip,
                remote_port = tcp.src_port,
                local_port = tcp.dst_port,
                "SYN for existing connection refused"
            );
            let header = segment(
                key.local_port,
                key.remote_port,
                conn.local_seq,
                tcp.seq.wrapping_add(1),
                TcpFlags::RST | TcpFlags::ACK,
            );
            out.push(Action::EmitFrame(tcp_frame(
                our_mac,
                our_ip,
                conn.remote_mac,
                key.remote_ip,
                header,
                &[],
            )?));
        } else {
            match conn.state {
                TcpState::SynSent => {
                    if flags.contains(TcpFlags::SYN) && flags.contains(TcpFlags::ACK) {
                        if tcp.ack == conn.local_seq.wrapping_add(1) {
                            conn.state = TcpState::Established;
                            conn.local_seq = conn.local_seq.wrapping_add(1);
                            conn.remote_seq = tcp.seq.wrapping_add(1);
                            conn.connect_deadline = None;
                            let header = segment(
                                key.local_port,
                                key.remote_port,
                                conn.local_seq,
                                conn.remote_seq,
                                TcpFlags::ACK,
                            );
                            out.push(Action::EmitFrame(tcp_frame(
                                our_mac,
                                our_ip,
                                conn.remote_mac,
                                key.remote_ip,
                                header,
                                &[],
                            )?));
                            out.push(Action::Connected {
                                remote_ip: key.remote_ip,
                                remote_port: key.remote_port,
                                local_port: key.local_port,
                            });
                        } else {
                            tracing::warn!(
                                expected = conn.local_seq.wrapping_add(1),
                                got = tcp.ack,
                                "SYN+ACK acknowledged the wrong sequence"
                            );
                        }
                    }
                }
                TcpState::SynReceived => {
                    if flags.contains(TcpFlags::ACK) {
                        if tcp.ack == conn.local_seq.wrapping_add(1) {
                            conn.state = TcpState::Established;
                            conn.local_seq = conn.local_seq.wrapping_add(1);
                        } else {
                            tracing::warn!(
                                expected = conn.local_seq.wrapping_add(1),
                                got = tcp.ack,
                                "handshake ACK acknowledged the wrong sequence"
                            );
                        }
                    }
                }
                TcpState::Established | TcpState::CloseWait => {}
            }

            // Payload and FIN processing, including data riding on the
            // handshake-completing ACK.
            if conn.state == TcpState::Established
                && (!payload.is_empty() || flags.contains(TcpFlags::FIN))
            {
                if tcp.seq == conn.remote_seq {
                    let eof = flags.contains(TcpFlags::FIN);
                    let mut advance = payload.len() as u32;
                    if eof {
                        advance = advance.wrapping_add(1);
                        conn.state = TcpState::CloseWait;
                    }
                    conn.remote_seq = conn.remote_seq.wrapping_add(advance);
                    let header = segment(
                        key.local_port,
                        key.remote_port,
                        conn.local_seq,
                        conn.remote_seq,
                        TcpFlags::ACK,
                    );
                    out.push(Action::EmitFrame(tcp_frame(
                        our_mac,
                        our_ip,
                        conn.remote_mac,
                        key.remote_ip,
                        header,
                        &[],
                    )?));
                    out.push(Action::Data {
                        remote_ip: key.remote_ip,
                        remote_port: key.remote_port,
                        local_port: key.local_port,
                        data: payload,
                        eof,
                    });
                } else {
                    tracing::warn!(
                        expected = conn.remote_seq,
                        got = tcp.seq,
                        "segment with unexpected sequence dropped"
                    );
                }
            }
        }

        if remove {
            self.connections.remove(&key);
        }
        Ok(out)
    }

    fn handle_tcp_new_flow(
        &mut self,
        src_mac: MacAddr,
        src_ip: Ipv4Addr,
        tcp: TcpHeader,
        key: TcpKey,
    ) -> Result<Vec<Action>, PacketError> {
        if tcp.flags.contains(TcpFlags::RST) {
            return Ok(Vec::new());
        }
        if !tcp.flags.contains(TcpFlags::SYN) || tcp.flags.contains(TcpFlags::ACK) {
            tracing::debug!(
                remote = %src_ip,
                local_port = tcp.dst_port,
                "segment for unknown connection dropped"
            );
            return Ok(Vec::new());
        }

        // The dynamic range is an implicit allow for inbound opens, so a
        // peer can dial back a port we never listed in the configuration.
        let open = self.cfg.open_ports.contains(&tcp.dst_port)
            || (DYNAMIC_PORT_MIN..=DYNAMIC_PORT_MAX).contains(&tcp.dst_port);
        if !open {
            // Closed port: refuse with an RST and keep no state.
            let header = segment(
                tcp.dst_port,
                tcp.src_port,
                0,
                tcp.seq.wrapping_add(1),
                TcpFlags::RST | TcpFlags::ACK,
            );
            let frame = tcp_frame(self.cfg.mac, self.cfg.ip, src_mac, src_ip, header, &[])?;
            return Ok(vec![Action::EmitFrame(frame)]);
        }

        let isn = self.alloc_isn();
        self.connections.insert(
            key,
            TcpConn {
                state: TcpState::SynReceived,
                remote_mac: src_mac,
                local_seq: isn,
                remote_seq: tcp.seq.wrapping_add(1),
                connect_deadline: None,
            },
        );
        let header = segment(
            tcp.dst_port,
            tcp.src_port,
            isn,
            tcp.seq.wrapping_add(1),
            TcpFlags::SYN | TcpFlags::ACK,
        );
        let frame = tcp_frame(self.cfg.mac, self.cfg.ip, src_mac, src_ip, header, &[])?;
        Ok(vec![Action::EmitFrame(frame)])
    }

    fn open_syn(
        &mut self,
        remote_ip: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
        remote_mac: MacAddr,
        connect_deadline: Millis,
    ) -> Result<Vec<u8>, PacketError> {
        let isn = self.alloc_isn();
        self.connections.insert(
            TcpKey {
                remote_ip,
                remote_port,
                local_port,
            },
            TcpConn {
                state: TcpState::SynSent,
                remote_mac,
                local_seq: isn,
                remote_seq: 0,
                connect_deadline: Some(connect_deadline),
            },
        );
        let header = segment(local_port, remote_port, isn, 0, TcpFlags::SYN);
        tcp_frame(
            self.cfg.mac,
            self.cfg.ip,
            remote_mac,
            remote_ip,
            header,
            &[],
        )
    }

    fn alloc_isn(&mut self) -> u32 {
        let isn = self.next_isn;
        self.next_isn = self.next_isn.wrapping_add(1 << 16);
        isn
    }

    fn alloc_dynamic_port(&mut self) -> Result<u16, StackError> {
        for _ in 0..PORT_ALLOC_ATTEMPTS {
            let port = self.rng.gen_range(DYNAMIC_PORT_MIN..=DYNAMIC_PORT_MAX);
            let in_use = self.connections.keys().any(|k| k.local_port == port)
                || self.pending_connects.iter().any(|p| p.local_port == port);
            if !in_use {
                return Ok(port);
            }
        }
        Err(StackError::NoPortsAvailable)
    }

    fn lookup_arp(&self, ip: Ipv4Addr, now: Millis) -> Option<MacAddr> {
        let entry = self.arp_cache.get(&ip)?;
        // Entries are never evicted; past the TTL they are just stale.
        if now.saturating_sub(entry.learned_at) >= ARP_CACHE_TTL_MS {
            return None;
        }
        Some(entry.mac)
    }
}

fn segment(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: TcpFlags) -> TcpHeader {
    TcpHeader {
        src_port,
        dst_port,
        seq,
        ack,
        flags,
        window_size: TCP_WINDOW,
        urgent_pointer: 0,
        options: Vec::new(),
    }
}

fn tcp_frame(
    our_mac: MacAddr,
    our_ip: Ipv4Addr,
    remote_mac: MacAddr,
    remote_ip: Ipv4Addr,
    header: TcpHeader,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    Packet {
        ethernet: EthernetHeader {
            dst: remote_mac,
            src: our_mac,
            ethertype: ETHERTYPE_IPV4,
        },
        payload: LinkPayload::Ipv4 {
            header: Ipv4Header::new(our_ip, remote_ip, IPPROTO_TCP),
            transport: Transport::Tcp {
                header,
                payload: payload.to_vec(),
            },
        },
    }
    .build()
}

fn arp_frame(our_mac: MacAddr, dst: MacAddr, arp: &ArpPacket) -> Result<Vec<u8>, PacketError> {
    Packet {
        ethernet: EthernetHeader {
            dst,
            src: our_mac,
            ethertype: wirebox_packet::ETHERTYPE_ARP,
        },
        payload: LinkPayload::Arp(*arp),
    }
    .build()
}
