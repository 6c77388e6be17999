use core::net::Ipv4Addr;

use wirebox_net_stack::{
    Action, ConnectError, Endpoint, EndpointConfig, TcpState, ARP_RESOLVE_TIMEOUT_MS,
    CONNECT_TIMEOUT_MS, DYNAMIC_PORT_MAX, DYNAMIC_PORT_MIN,
};
use wirebox_packet::{
    LinkPayload, MacAddr, Packet, TcpFlags, Transport, ARP_OP_REPLY, ICMP_ECHO_REQUEST,
};

const CLIENT_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);
const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const SERVER_MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 2]);
const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

fn client() -> Endpoint {
    Endpoint::new(EndpointConfig {
        mac: CLIENT_MAC,
        ip: CLIENT_IP,
        open_ports: vec![],
        seed: 1,
    })
}

fn server() -> Endpoint {
    Endpoint::new(EndpointConfig {
        mac: SERVER_MAC,
        ip: SERVER_IP,
        open_ports: vec![80],
        seed: 2,
    })
}

fn frames(actions: &[Action]) -> Vec<Vec<u8>> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::EmitFrame(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

fn single_frame(actions: &[Action]) -> Vec<u8> {
    let frames = frames(actions);
    assert_eq!(frames.len(), 1, "expected one frame, got {actions:?}");
    frames.into_iter().next().unwrap()
}

/// Delivers every emitted frame to the peer, collecting the peer's
/// non-frame actions and forwarding peer frames back, until the exchange
/// quiesces. Returns (actions observed at a, actions observed at b).
fn pump(
    a: &mut Endpoint,
    b: &mut Endpoint,
    initial: Vec<Action>,
    now: u64,
) -> (Vec<Action>, Vec<Action>) {
    let mut a_actions = Vec::new();
    let mut b_actions = Vec::new();
    let mut to_b: Vec<Vec<u8>> = Vec::new();
    for action in initial {
        match action {
            Action::EmitFrame(frame) => to_b.push(frame),
            other => a_actions.push(other),
        }
    }
    let mut to_a: Vec<Vec<u8>> = Vec::new();
    loop {
        let mut progressed = false;
        for frame in to_b.drain(..) {
            progressed = true;
            for action in b.handle_frame(&frame, now) {
                match action {
                    Action::EmitFrame(frame) => to_a.push(frame),
                    other => b_actions.push(other),
                }
            }
        }
        for frame in to_a.drain(..) {
            progressed = true;
            for action in a.handle_frame(&frame, now) {
                match action {
                    Action::EmitFrame(frame) => to_b.push(frame),
                    other => a_actions.push(other),
                }
            }
        }
        if !progressed {
            break;
        }
    }
    (a_actions, b_actions)
}

fn establish(client: &mut Endpoint, server: &mut Endpoint) -> u16 {
    let (local_port, actions) = client.connect(SERVER_IP, 80, 0).unwrap();
    let (client_actions, _) = pump(client, server, actions, 0);
    assert!(client_actions
        .iter()
        .any(|a| matches!(a, Action::Connected { .. })));
    local_port
}

#[test]
fn handshake_reaches_established_on_a_dynamic_port() {
    let mut client = client();
    let mut server = server();

    let (local_port, actions) = client.connect(SERVER_IP, 80, 0).unwrap();
    assert!((DYNAMIC_PORT_MIN..=DYNAMIC_PORT_MAX).contains(&local_port));

    // No cached ARP entry, so the first frame is a broadcast ARP request.
    let arp_frame = single_frame(&actions);
    let parsed = Packet::parse(&arp_frame).unwrap();
    assert!(parsed.ethernet.dst.is_broadcast());

    let (client_actions, _) = pump(&mut client, &mut server, actions, 0);
    assert_eq!(
        client_actions,
        vec![Action::Connected {
            remote_ip: SERVER_IP,
            remote_port: 80,
            local_port,
        }]
    );
    assert_eq!(
        client.connection_state(SERVER_IP, 80, local_port),
        Some(TcpState::Established)
    );
    assert_eq!(
        server.connection_state(CLIENT_IP, local_port, 80),
        Some(TcpState::Established)
    );
}

#[test]
fn closed_port_syn_gets_rst_and_no_state() {
    let mut client = client();
    let mut server = server();

    let (local_port, actions) = client.connect(SERVER_IP, 8080, 0).unwrap();
    let (client_actions, _) = pump(&mut client, &mut server, actions, 0);

    assert_eq!(server.connection_count(), 0);
    assert_eq!(
        client_actions,
        vec![Action::ConnectFailed {
            remote_ip: SERVER_IP,
            remote_port: 8080,
            local_port,
            reason: ConnectError::Refused,
        }]
    );
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn dynamic_range_port_accepts_inbound_syn() {
    let mut client = client();
    let mut server = server();

    // 50000 is not in the server's open-port list but falls in the
    // dynamic range, which accepts inbound opens implicitly.
    let (local_port, actions) = client.connect(SERVER_IP, 50_000, 0).unwrap();
    let (client_actions, _) = pump(&mut client, &mut server, actions, 0);
    assert_eq!(
        client_actions,
        vec![Action::Connected {
            remote_ip: SERVER_IP,
            remote_port: 50_000,
            local_port,
        }]
    );
    assert_eq!(
        server.connection_state(CLIENT_IP, local_port, 50_000),
        Some(TcpState::Established)
    );
}

#[test]
fn syn_for_tracked_connection_is_reset() {
    use wirebox_packet::{EthernetHeader, Ipv4Header, TcpHeader, ETHERTYPE_IPV4, IPPROTO_TCP};

    let mut server = server();
    let syn = Packet {
        ethernet: EthernetHeader {
            dst: SERVER_MAC,
            src: CLIENT_MAC,
            ethertype: ETHERTYPE_IPV4,
        },
        payload: LinkPayload::Ipv4 {
            header: Ipv4Header::new(CLIENT_IP, SERVER_IP, IPPROTO_TCP),
            transport: Transport::Tcp {
                header: TcpHeader {
                    src_port: 49_200,
                    dst_port: 80,
                    seq: 5_000,
                    ack: 0,
                    flags: TcpFlags::SYN,
                    window_size: 64_240,
                    urgent_pointer: 0,
                    options: Vec::new(),
                },
                payload: Vec::new(),
            },
        },
    }
    .build()
    .unwrap();

    let first = server.handle_frame(&syn, 0);
    let syn_ack = Packet::parse(&single_frame(&first)).unwrap();
    let LinkPayload::Ipv4 {
        transport: Transport::Tcp { header, .. },
        ..
    } = syn_ack.payload
    else {
        panic!("expected SYN+ACK");
    };
    assert!(header.flags.contains(TcpFlags::SYN | TcpFlags::ACK));
    assert_eq!(
        server.connection_state(CLIENT_IP, 49_200, 80),
        Some(TcpState::SynReceived)
    );

    // A repeated SYN on the same flow gets an RST back and must not
    // restart or drop the handshake already in progress.
    let second = server.handle_frame(&syn, 1);
    let rst = Packet::parse(&single_frame(&second)).unwrap();
    let LinkPayload::Ipv4 {
        transport: Transport::Tcp { header, .. },
        ..
    } = rst.payload
    else {
        panic!("expected RST");
    };
    assert!(header.flags.contains(TcpFlags::RST));
    assert_eq!(header.ack, 5_001);
    assert_eq!(
        server.connection_state(CLIENT_IP, 49_200, 80),
        Some(TcpState::SynReceived)
    );
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn data_is_delivered_once_in_each_direction() {
    let mut client = client();
    let mut server = server();
    let local_port = establish(&mut client, &mut server);

    let request = b"GET / HTTP/1.1\r\n\r\n".to_vec();
    let actions = client
        .send(SERVER_IP, 80, local_port, &request, 10)
        .unwrap();
    let (client_actions, server_actions) = pump(&mut client, &mut server, actions, 10);
    assert!(client_actions.is_empty());
    assert_eq!(
        server_actions,
        vec![Action::Data {
            remote_ip: CLIENT_IP,
            remote_port: local_port,
            local_port: 80,
            data: request,
            eof: false,
        }]
    );

    let response = b"HTTP/1.1 200 OK\r\n\r\nok".to_vec();
    let actions = server
        .send(CLIENT_IP, local_port, 80, &response, 20)
        .unwrap();
    let (server_actions, client_actions) = pump(&mut server, &mut client, actions, 20);
    assert!(server_actions.is_empty());
    assert_eq!(
        client_actions,
        vec![Action::Data {
            remote_ip: SERVER_IP,
            remote_port: 80,
            local_port,
            data: response,
            eof: false,
        }]
    );
}

#[test]
fn fin_yields_exactly_one_eof() {
    let mut client = client();
    let mut server = server();
    let local_port = establish(&mut client, &mut server);

    // Craft a FIN from the client by rewriting one of its segments; the
    // endpoint itself never initiates a close.
    let actions = client.send(SERVER_IP, 80, local_port, &[], 10).unwrap();
    let frame = single_frame(&actions);
    let mut packet = Packet::parse(&frame).unwrap();
    if let LinkPayload::Ipv4 {
        transport: Transport::Tcp { header, .. },
        ..
    } = &mut packet.payload
    {
        header.flags = TcpFlags::FIN | TcpFlags::ACK;
    } else {
        panic!("expected a TCP frame");
    }
    let fin = packet.build().unwrap();

    let server_actions = server.handle_frame(&fin, 11);
    let eofs: Vec<_> = server_actions
        .iter()
        .filter(|a| matches!(a, Action::Data { eof: true, .. }))
        .collect();
    assert_eq!(eofs.len(), 1);
    assert_eq!(
        server.connection_state(CLIENT_IP, local_port, 80),
        Some(TcpState::CloseWait)
    );

    // A retransmitted FIN has a stale sequence number and produces nothing.
    let server_actions = server.handle_frame(&fin, 12);
    assert!(server_actions.is_empty());
}

#[test]
fn arp_timeout_fails_the_connect() {
    let mut client = client();
    let (local_port, actions) = client.connect(SERVER_IP, 80, 0).unwrap();
    assert_eq!(frames(&actions).len(), 1);

    assert!(client.on_tick(ARP_RESOLVE_TIMEOUT_MS - 1).is_empty());
    let actions = client.on_tick(ARP_RESOLVE_TIMEOUT_MS);
    assert_eq!(
        actions,
        vec![Action::ConnectFailed {
            remote_ip: SERVER_IP,
            remote_port: 80,
            local_port,
            reason: ConnectError::ArpTimeout,
        }]
    );
}

#[test]
fn unanswered_syn_times_out() {
    let mut client = client();
    let mut server = server();

    // Resolve ARP first so the SYN actually goes out, then drop it.
    let (local_port, actions) = client.connect(SERVER_IP, 80, 0).unwrap();
    let arp_request = single_frame(&actions);
    let reply_actions = server.handle_frame(&arp_request, 0);
    let syn_actions = client.handle_frame(&single_frame(&reply_actions), 0);
    let syn = single_frame(&syn_actions);
    let parsed = Packet::parse(&syn).unwrap();
    assert!(matches!(
        parsed.payload,
        LinkPayload::Ipv4 {
            transport: Transport::Tcp { .. },
            ..
        }
    ));

    assert!(client.on_tick(CONNECT_TIMEOUT_MS - 1).is_empty());
    let actions = client.on_tick(CONNECT_TIMEOUT_MS);
    assert_eq!(
        actions,
        vec![Action::ConnectFailed {
            remote_ip: SERVER_IP,
            remote_port: 80,
            local_port,
            reason: ConnectError::TimedOut,
        }]
    );
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn arp_request_gets_a_single_reply() {
    let mut client = client();
    let mut server = server();

    let (_, actions) = client.connect(SERVER_IP, 80, 0).unwrap();
    let arp_request = single_frame(&actions);
    let reply_actions = server.handle_frame(&arp_request, 0);
    let reply = single_frame(&reply_actions);

    let parsed = Packet::parse(&reply).unwrap();
    let LinkPayload::Arp(arp) = parsed.payload else {
        panic!("expected ARP reply");
    };
    assert_eq!(arp.oper, ARP_OP_REPLY);
    assert_eq!(arp.sha, SERVER_MAC);
    assert_eq!(arp.spa, SERVER_IP);
    assert_eq!(arp.tha, CLIENT_MAC);
    assert_eq!(arp.tpa, CLIENT_IP);
}

#[test]
fn echo_request_is_echoed_back() {
    use wirebox_packet::{EthernetHeader, IcmpMessage, Ipv4Header, ETHERTYPE_IPV4, IPPROTO_ICMP};

    let mut server = server();
    let ping = Packet {
        ethernet: EthernetHeader {
            dst: SERVER_MAC,
            src: CLIENT_MAC,
            ethertype: ETHERTYPE_IPV4,
        },
        payload: LinkPayload::Ipv4 {
            header: Ipv4Header::new(CLIENT_IP, SERVER_IP, IPPROTO_ICMP),
            transport: Transport::Icmp(IcmpMessage {
                icmp_type: ICMP_ECHO_REQUEST,
                code: 0,
                payload: vec![0, 7, 0, 1, b'p', b'i', b'n', b'g'],
            }),
        },
    }
    .build()
    .unwrap();

    let actions = server.handle_frame(&ping, 0);
    let reply = Packet::parse(&single_frame(&actions)).unwrap();
    let LinkPayload::Ipv4 {
        transport: Transport::Icmp(icmp),
        ..
    } = reply.payload
    else {
        panic!("expected ICMP reply");
    };
    assert_eq!(icmp.icmp_type, wirebox_packet::ICMP_ECHO_REPLY);
    assert_eq!(icmp.payload, vec![0, 7, 0, 1, b'p', b'i', b'n', b'g']);
}

#[test]
fn rst_tears_down_an_established_connection() {
    let mut client = client();
    let mut server = server();
    let local_port = establish(&mut client, &mut server);

    // Rewrite a client segment into an RST.
    let actions = client.send(SERVER_IP, 80, local_port, &[], 10).unwrap();
    let mut packet = Packet::parse(&single_frame(&actions)).unwrap();
    if let LinkPayload::Ipv4 {
        transport: Transport::Tcp { header, .. },
        ..
    } = &mut packet.payload
    {
        header.flags = TcpFlags::RST;
    }
    let rst = packet.build().unwrap();

    let server_actions = server.handle_frame(&rst, 11);
    assert_eq!(
        server_actions,
        vec![Action::Data {
            remote_ip: CLIENT_IP,
            remote_port: local_port,
            local_port: 80,
            data: Vec::new(),
            eof: true,
        }]
    );
    assert_eq!(server.connection_state(CLIENT_IP, local_port, 80), None);
}
