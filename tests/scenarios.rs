use eth0::config::{DHCP_DISABLED_FLAG, DHCP_ENABLED_FLAG, DEFAULT_MAC, MemoryFlagStore};
use eth0::engine::{Decision, Dispatcher};
use eth0::net::checksum::{Checksum, checksum};
use eth0::net::dhcp::{DEFAULT_XID, DhcpEvent, DhcpPhase};
use eth0::net::icmp::IcmpPacket;
use eth0::net::ipv4::{self, Ipv4Header, Ipv4Packet};
use eth0::net::tcp::{self, FLAG_ACK, FLAG_FIN, FLAG_PSH, FLAG_SYN, TcpSegment};
use eth0::net::{arp, udp};
use eth0::services::shell;
use eth0::transport::MemoryTransport;
use eth0::NetError;
use std::net::Ipv4Addr;

const LOCAL_IP: [u8; 4] = [192, 168, 2, 123];
const PEER_IP: [u8; 4] = [192, 168, 2, 1];
const PEER_MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22];
const LEASED_IP: [u8; 4] = [192, 168, 2, 50];

fn static_dispatcher() -> Dispatcher {
    let mut d = Dispatcher::new(Box::new(MemoryFlagStore::new(DHCP_DISABLED_FLAG))).unwrap();
    d.config_mut()
        .set_ip_address(Ipv4Addr::from(LOCAL_IP))
        .unwrap();
    d
}

fn dhcp_dispatcher() -> Dispatcher {
    Dispatcher::new(Box::new(MemoryFlagStore::new(DHCP_ENABLED_FLAG))).unwrap()
}

fn ether_header(frame: &mut [u8], dst: [u8; 6], ethertype: u16) {
    frame[0..6].copy_from_slice(&dst);
    frame[6..12].copy_from_slice(&PEER_MAC);
    frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
}

fn ipv4_frame(dst_mac: [u8; 6], dst: [u8; 4], protocol: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 34 + payload.len()];
    ether_header(&mut frame, dst_mac, 0x0800);
    Ipv4Header {
        identification: 0x1234,
        ttl: 64,
        protocol,
        src: PEER_IP,
        dst,
        payload_len: payload.len(),
    }
    .emit(&mut frame[14..])
    .unwrap();
    frame[34..].copy_from_slice(payload);
    frame
}

fn arp_request(target: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![0u8; arp::FRAME_LEN];
    ether_header(&mut frame, [0xFF; 6], 0x0806);
    frame[14..16].copy_from_slice(&1u16.to_be_bytes());
    frame[16..18].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[18] = 6;
    frame[19] = 4;
    frame[20..22].copy_from_slice(&arp::OP_REQUEST.to_be_bytes());
    frame[22..28].copy_from_slice(&PEER_MAC);
    frame[28..32].copy_from_slice(&PEER_IP);
    frame[38..42].copy_from_slice(&target);
    frame
}

fn tcp_frame(flags: u8, seq: u32, data: &[u8]) -> Vec<u8> {
    let mut seg = vec![0u8; tcp::HEADER_LEN + data.len()];
    seg[0..2].copy_from_slice(&40000u16.to_be_bytes());
    seg[2..4].copy_from_slice(&tcp::TELNET_PORT.to_be_bytes());
    seg[4..8].copy_from_slice(&seq.to_be_bytes());
    seg[12] = 0x50;
    seg[13] = flags;
    seg[14..16].copy_from_slice(&8192u16.to_be_bytes());
    seg[20..].copy_from_slice(data);
    let sum = Checksum::pseudo_header(&PEER_IP, &LOCAL_IP, ipv4::PROTO_TCP, seg.len() as u16)
        .add_bytes(&seg)
        .finish();
    seg[16..18].copy_from_slice(&sum.to_be_bytes());
    ipv4_frame(DEFAULT_MAC, LOCAL_IP, ipv4::PROTO_TCP, &seg)
}

/// A BOOTREPLY from 192.168.2.1 carrying `options` after the cookie.
fn dhcp_reply(xid: u32, yiaddr: [u8; 4], options: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; 240 + options.len()];
    body[0] = 2;
    body[1] = 1;
    body[2] = 6;
    body[4..8].copy_from_slice(&xid.to_be_bytes());
    body[16..20].copy_from_slice(&yiaddr);
    body[28..34].copy_from_slice(&DEFAULT_MAC);
    body[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);
    body[240..].copy_from_slice(options);

    let mut datagram = vec![0u8; udp::HEADER_LEN + body.len()];
    udp::emit_header(&mut datagram, 67, 68, body.len()).unwrap();
    datagram[8..].copy_from_slice(&body);
    ipv4_frame([0xFF; 6], [255; 4], ipv4::PROTO_UDP, &datagram)
}

fn offer(xid: u32) -> Vec<u8> {
    dhcp_reply(
        xid,
        LEASED_IP,
        &[53, 1, 2, 54, 4, 192, 168, 2, 1, 255],
    )
}

fn tcp_of(frame: &[u8]) -> TcpSegment<&[u8]> {
    let ip = Ipv4Packet::new_checked(&frame[14..]).unwrap();
    assert!(ip.verify_checksum());
    TcpSegment::new_checked(&frame[34..14 + ip.total_len() as usize]).unwrap()
}

#[test]
fn arp_request_for_our_address_is_answered() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.inject(arp_request(LOCAL_IP));

    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::ArpReply));
    let sent = t.take_sent();
    assert_eq!(sent.len(), 1);
    let reply = &sent[0];
    assert_eq!(reply.len(), 42);
    assert_eq!(&reply[0..6], &PEER_MAC);
    assert_eq!(&reply[6..12], &DEFAULT_MAC);
    assert_eq!(&reply[20..22], &arp::OP_REPLY.to_be_bytes());
    assert_eq!(&reply[22..28], &DEFAULT_MAC);
    assert_eq!(&reply[28..32], &LOCAL_IP);
    assert_eq!(&reply[32..38], &PEER_MAC);
    assert_eq!(&reply[38..42], &PEER_IP);
}

#[test]
fn arp_request_for_other_host_is_silent() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.inject(arp_request([192, 168, 2, 77]));
    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::Ignored));
    assert!(t.sent().is_empty());
}

#[test]
fn arp_response_resolves_sender() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    d.send_arp_request(Ipv4Addr::from(PEER_IP), &mut t).unwrap();
    let request = t.take_sent().remove(0);
    assert_eq!(&request[0..6], &[0xFF; 6]);
    assert_eq!(&request[38..42], &PEER_IP);

    let mut response = arp_request(LOCAL_IP);
    response[0..6].copy_from_slice(&DEFAULT_MAC);
    response[20..22].copy_from_slice(&arp::OP_REPLY.to_be_bytes());
    response[32..38].copy_from_slice(&DEFAULT_MAC);
    t.inject(response);
    assert_eq!(
        d.poll(&mut t).unwrap(),
        Some(Decision::ArpResolved {
            ip: Ipv4Addr::from(PEER_IP),
            mac: PEER_MAC
        })
    );
}

#[test]
fn ping_gets_echo_reply() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    let mut icmp = vec![8, 0, 0, 0, 0x12, 0x34, 0x00, 0x01, b'a', b'b', b'c', b'd'];
    let sum = checksum(&icmp);
    icmp[2..4].copy_from_slice(&sum.to_be_bytes());
    t.inject(ipv4_frame(DEFAULT_MAC, LOCAL_IP, ipv4::PROTO_ICMP, &icmp));

    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::EchoReply));
    let reply = t.take_sent().remove(0);
    assert_eq!(&reply[0..6], &PEER_MAC);
    let ip = Ipv4Packet::new_checked(&reply[14..]).unwrap();
    assert!(ip.verify_checksum());
    assert_eq!(ip.src(), LOCAL_IP);
    assert_eq!(ip.dst(), PEER_IP);
    let echo = IcmpPacket::new_checked(ip.payload()).unwrap();
    assert_eq!(echo.icmp_type(), 0);
    assert_eq!(echo.identifier(), 0x1234);
    assert_eq!(echo.sequence(), 1);
    assert!(echo.verify_checksum());
    assert_eq!(&ip.payload()[8..], b"abcd");
}

#[test]
fn ping_with_bad_ip_checksum_is_dropped() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    let mut frame = ipv4_frame(DEFAULT_MAC, LOCAL_IP, ipv4::PROTO_ICMP, &[8, 0, 0xf7, 0xff, 0, 0, 0, 0]);
    frame[24] ^= 0xFF;
    t.inject(frame);
    assert_eq!(d.poll(&mut t).unwrap_err(), NetError::Checksum("ip"));
    assert_eq!(d.stats().checksum_errors, 1);
    assert!(t.sent().is_empty());
}

#[test]
fn dhcp_exchange_binds_lease() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    d.start_dhcp(&mut t).unwrap();
    assert_eq!(d.dhcp_phase(), DhcpPhase::DiscoverSent);

    let discover = t.take_sent().remove(0);
    assert_eq!(&discover[0..6], &[0xFF; 6]);
    assert_eq!(&discover[46..50], &DEFAULT_XID.to_be_bytes());
    assert_eq!(&discover[282..286], &[53, 1, 1, 255]);

    t.inject(offer(DEFAULT_XID));
    assert_eq!(
        d.poll(&mut t).unwrap(),
        Some(Decision::Dhcp(DhcpEvent::Offered(Ipv4Addr::from(LEASED_IP))))
    );
    assert_eq!(d.dhcp_phase(), DhcpPhase::RequestSent);
    let request = t.take_sent().remove(0);
    assert_eq!(&request[282..285], &[53, 1, 3]);
    assert_eq!(&request[285..291], &[50, 4, 192, 168, 2, 50]);
    assert_eq!(&request[291..297], &[54, 4, 192, 168, 2, 1]);

    t.inject(dhcp_reply(
        DEFAULT_XID,
        LEASED_IP,
        &[
            53, 1, 5, 1, 4, 255, 255, 255, 0, 3, 4, 192, 168, 2, 1, 6, 4, 8, 8, 8, 8, 51, 4, 0,
            0, 0x0E, 0x10, 255,
        ],
    ));
    assert_eq!(
        d.poll(&mut t).unwrap(),
        Some(Decision::Dhcp(DhcpEvent::Bound(Ipv4Addr::from(LEASED_IP))))
    );
    assert_eq!(d.dhcp_phase(), DhcpPhase::Bound);
    let config = d.config();
    assert_eq!(config.ip_address(), Ipv4Addr::from(LEASED_IP));
    assert_eq!(config.gateway(), Ipv4Addr::from(PEER_IP));
    assert_eq!(config.dns_server(), Ipv4Addr::new(8, 8, 8, 8));
    assert_eq!(config.lease_time(), 3600);

    let announce = t.take_sent().remove(0);
    assert_eq!(announce.len(), arp::FRAME_LEN);
    assert_eq!(&announce[28..32], &LEASED_IP);
    assert_eq!(&announce[38..42], &LEASED_IP);
}

#[test]
fn dhcp_reply_with_foreign_xid_changes_nothing() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    d.start_dhcp(&mut t).unwrap();
    t.take_sent();

    t.inject(offer(0xDEAD_BEEF));
    assert_eq!(
        d.poll(&mut t).unwrap_err(),
        NetError::TransactionMismatch {
            got: 0xDEAD_BEEF,
            expected: DEFAULT_XID
        }
    );
    assert_eq!(d.stats().xid_mismatches, 1);
    assert_eq!(d.dhcp_phase(), DhcpPhase::DiscoverSent);
    assert!(t.sent().is_empty());
}

#[test]
fn dhcp_discover_is_not_retried() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    d.start_dhcp(&mut t).unwrap();
    t.take_sent();
    for _ in 0..5 {
        assert_eq!(d.poll(&mut t).unwrap(), None);
    }
    assert!(t.sent().is_empty());
    assert_eq!(d.dhcp_phase(), DhcpPhase::DiscoverSent);
}

#[test]
fn dhcp_reply_ignored_in_static_mode() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.inject(offer(DEFAULT_XID));
    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::Ignored));
    assert_eq!(d.dhcp_phase(), DhcpPhase::Idle);
    assert!(t.sent().is_empty());
}

#[test]
fn syn_gets_syn_ack_with_mss() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.inject(tcp_frame(FLAG_SYN, 1000, &[]));

    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::Tcp { flags: FLAG_SYN }));
    let reply = t.take_sent().remove(0);
    let seg = tcp_of(&reply);
    assert_eq!(seg.flags(), FLAG_SYN | FLAG_ACK);
    assert_eq!(seg.ack_number(), 1001);
    assert_eq!(seg.source_port(), 23);
    assert_eq!(seg.destination_port(), 40000);
    assert_eq!(seg.header_len(), 24);
    assert_eq!(seg.options(), &[2, 4, 0x05, 0xB4]);
    assert!(seg.verify_checksum(&LOCAL_IP, &PEER_IP));
    assert_eq!(d.tcp_session().seq_num(), 1);
}

#[test]
fn telnet_help_is_echoed_and_answered() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.inject(tcp_frame(FLAG_PSH | FLAG_ACK, 5000, b"help\r\n"));

    assert_eq!(
        d.poll(&mut t).unwrap(),
        Some(Decision::Tcp {
            flags: FLAG_PSH | FLAG_ACK
        })
    );
    assert!(d.telnet_command_pending());
    assert!(shell::serve(&mut d, &mut t).unwrap());
    assert!(!d.telnet_command_pending());

    let sent = t.take_sent();
    assert_eq!(sent.len(), 3);
    let ack = tcp_of(&sent[0]);
    assert_eq!(ack.flags(), FLAG_ACK);
    assert_eq!(ack.ack_number(), 5006);
    let echo = tcp_of(&sent[1]);
    assert_eq!(echo.flags(), FLAG_PSH | FLAG_ACK);
    assert_eq!(echo.payload(), b"help\r\n");
    let answer = tcp_of(&sent[2]);
    assert_eq!(answer.payload(), shell::HELP.as_bytes());
    assert_eq!(answer.seq_number(), 6);
    assert!(answer.verify_checksum(&LOCAL_IP, &PEER_IP));

    assert!(!shell::serve(&mut d, &mut t).unwrap());
}

#[test]
fn fin_is_acked_then_closed() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.inject(tcp_frame(FLAG_FIN | FLAG_ACK, 7000, &[]));

    d.poll(&mut t).unwrap();
    let sent = t.take_sent();
    assert_eq!(sent.len(), 2);
    let ack = tcp_of(&sent[0]);
    assert_eq!(ack.flags(), FLAG_ACK);
    assert_eq!(ack.ack_number(), 7001);
    let fin = tcp_of(&sent[1]);
    assert_eq!(fin.flags(), FLAG_FIN | FLAG_ACK);
    assert_eq!(fin.ack_number(), 7001);
    assert_eq!(d.tcp_session().seq_num(), 1);
}

#[test]
fn tcp_to_other_port_is_ignored() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    let mut frame = tcp_frame(FLAG_SYN, 1, &[]);
    frame[36..38].copy_from_slice(&22u16.to_be_bytes());
    t.inject(frame);
    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::Ignored));
    assert!(t.sent().is_empty());
}

#[test]
fn failed_transmit_is_counted() {
    let mut d = static_dispatcher();
    let mut t = MemoryTransport::new();
    t.set_fail_transmit(true);
    t.inject(arp_request(LOCAL_IP));
    assert_eq!(d.poll(&mut t).unwrap_err(), NetError::TransmitAborted);
    assert_eq!(d.stats().transmit_failures, 1);
}

fn bind(d: &mut Dispatcher, t: &mut MemoryTransport, ack_options: &[u8]) {
    d.start_dhcp(t).unwrap();
    t.inject(offer(DEFAULT_XID));
    d.poll(t).unwrap();
    t.inject(dhcp_reply(DEFAULT_XID, LEASED_IP, ack_options));
    assert_eq!(
        d.poll(t).unwrap(),
        Some(Decision::Dhcp(DhcpEvent::Bound(Ipv4Addr::from(LEASED_IP))))
    );
    t.take_sent();
}

#[test]
fn nak_after_refresh_drops_the_address() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    bind(&mut d, &mut t, &[53, 1, 5, 51, 4, 0, 0, 0x0E, 0x10, 255]);
    assert!(d.refresh_dhcp(&mut t).unwrap());
    t.take_sent();

    t.inject(dhcp_reply(DEFAULT_XID, [0; 4], &[53, 1, 6, 255]));
    assert_eq!(
        d.poll(&mut t).unwrap(),
        Some(Decision::Dhcp(DhcpEvent::Rejected))
    );
    assert_eq!(d.dhcp_phase(), DhcpPhase::Idle);
    assert_eq!(d.config().ip_address(), Ipv4Addr::UNSPECIFIED);
    assert_eq!(d.config().lease_time(), 0);

    // The refused address no longer answers ARP.
    t.inject(arp_request(LEASED_IP));
    assert_eq!(d.poll(&mut t).unwrap(), Some(Decision::Ignored));
    assert!(t.sent().is_empty());
}

#[test]
fn foreign_xids_ignored_once_bound() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    bind(&mut d, &mut t, &[53, 1, 5, 255]);
    let before = d.config().clone();
    for xid in [0, 0x1010_1011, 0xFFFF_FFFF] {
        t.inject(dhcp_reply(xid, [10, 1, 1, 1], &[53, 1, 5, 255]));
        assert_eq!(
            d.poll(&mut t).unwrap_err(),
            NetError::TransactionMismatch {
                got: xid,
                expected: DEFAULT_XID
            }
        );
        assert_eq!(d.dhcp_phase(), DhcpPhase::Bound);
        assert_eq!(d.config(), &before);
    }
    assert_eq!(d.stats().xid_mismatches, 3);
    assert!(t.sent().is_empty());
}

#[test]
fn ack_with_repeated_options_applies_first_values() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    bind(
        &mut d,
        &mut t,
        &[
            53, 1, 5, 1, 4, 255, 255, 0, 0, 3, 4, 192, 168, 2, 1, 6, 4, 9, 9, 9, 9, 51, 4, 0, 0,
            0x0E, 0x10, 54, 4, 192, 168, 2, 1, 53, 1, 6, 1, 4, 255, 0, 0, 0, 3, 4, 10, 0, 0, 1, 6,
            4, 1, 1, 1, 1, 51, 4, 0, 0, 0, 60, 54, 4, 10, 0, 0, 1, 255,
        ],
    );
    let config = d.config();
    assert_eq!(config.ip_address(), Ipv4Addr::from(LEASED_IP));
    assert_eq!(config.subnet_mask(), Ipv4Addr::new(255, 255, 0, 0));
    assert_eq!(config.gateway(), Ipv4Addr::from(PEER_IP));
    assert_eq!(config.dns_server(), Ipv4Addr::new(9, 9, 9, 9));
    assert_eq!(config.lease_time(), 3600);
}

#[test]
fn failed_discover_is_reported_to_the_caller() {
    let mut d = dhcp_dispatcher();
    let mut t = MemoryTransport::new();
    t.set_fail_transmit(true);
    assert_eq!(d.start_dhcp(&mut t).unwrap_err(), NetError::TransmitAborted);
    assert_eq!(d.dhcp_phase(), DhcpPhase::Idle);
}
