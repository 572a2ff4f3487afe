use super::ethernet::{self, BROADCAST_MAC, ETHERTYPE_ARP, ETHERTYPE_IPV4, EthernetFrame};
use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::transport::{Transport, transmit};
use std::net::Ipv4Addr;
use tracing::debug;

pub const PACKET_LEN: usize = 28;
pub const FRAME_LEN: usize = ethernet::HEADER_LEN + PACKET_LEN;

pub const HARDWARE_ETHERNET: u16 = 1;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

/// ARP for IPv4 over Ethernet.
#[derive(Debug)]
pub struct ArpPacket<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> ArpPacket<T> {
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        let b = buffer.as_ref();
        if b.len() < PACKET_LEN {
            return Err(NetError::Truncated);
        }
        if b[4] != 6 || b[5] != 4 {
            return Err(NetError::Malformed("arp address sizes"));
        }
        Ok(Self { buffer })
    }

    pub fn hardware_type(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[0], b[1]])
    }

    pub fn protocol_type(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[2], b[3]])
    }

    pub fn operation(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[6], b[7]])
    }

    pub fn sender_mac(&self) -> [u8; 6] {
        let b = self.buffer.as_ref();
        [b[8], b[9], b[10], b[11], b[12], b[13]]
    }

    pub fn sender_ip(&self) -> [u8; 4] {
        let b = self.buffer.as_ref();
        [b[14], b[15], b[16], b[17]]
    }

    pub fn target_mac(&self) -> [u8; 6] {
        let b = self.buffer.as_ref();
        [b[18], b[19], b[20], b[21], b[22], b[23]]
    }

    pub fn target_ip(&self) -> [u8; 4] {
        let b = self.buffer.as_ref();
        [b[24], b[25], b[26], b[27]]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> ArpPacket<T> {
    /// Writes the fixed Ethernet/IPv4 header fields and `op`.
    pub fn set_header(&mut self, op: u16) {
        let b = self.buffer.as_mut();
        b[0..2].copy_from_slice(&HARDWARE_ETHERNET.to_be_bytes());
        b[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        b[4] = 6;
        b[5] = 4;
        b[6..8].copy_from_slice(&op.to_be_bytes());
    }

    pub fn set_operation(&mut self, op: u16) {
        self.buffer.as_mut()[6..8].copy_from_slice(&op.to_be_bytes());
    }

    pub fn set_sender(&mut self, mac: &[u8; 6], ip: &[u8; 4]) {
        let b = self.buffer.as_mut();
        b[8..14].copy_from_slice(mac);
        b[14..18].copy_from_slice(ip);
    }

    pub fn set_target(&mut self, mac: &[u8; 6], ip: &[u8; 4]) {
        let b = self.buffer.as_mut();
        b[18..24].copy_from_slice(mac);
        b[24..28].copy_from_slice(ip);
    }
}

/// Answers the ARP request held in `frame` in place.
pub fn send_reply<T: Transport>(
    frame: &mut [u8],
    config: &NetworkConfig,
    transport: &mut T,
) -> Result<(), NetError> {
    let mac = config.mac();
    let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
    ether.reply_from(&mac);

    let mut arp = ArpPacket::new_checked(ether.payload_mut())?;
    let (peer_mac, peer_ip) = (arp.sender_mac(), arp.sender_ip());
    let asked_ip = arp.target_ip();
    arp.set_operation(OP_REPLY);
    arp.set_sender(&mac, &asked_ip);
    arp.set_target(&peer_mac, &peer_ip);
    debug!("arp reply to {}", Ipv4Addr::from(peer_ip));

    transmit(transport, &frame[..FRAME_LEN])
}

/// Broadcasts a who-has for `target`. The target hardware address is sent
/// as all ones.
pub fn send_request<T: Transport>(
    config: &NetworkConfig,
    target: Ipv4Addr,
    transport: &mut T,
) -> Result<(), NetError> {
    let mut frame = [0u8; FRAME_LEN];
    let mac = config.mac();
    fill_broadcast(&mut frame, &mac, OP_REQUEST)?;

    let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
    let mut arp = ArpPacket::new_checked(ether.payload_mut())?;
    arp.set_sender(&mac, &config.ip_address().octets());
    arp.set_target(&BROADCAST_MAC, &target.octets());
    debug!("arp request for {target}");

    transmit(transport, &frame)
}

/// Announces the local address: an unsolicited reply with sender and
/// target IP both set to our own.
pub fn send_gratuitous<T: Transport>(
    config: &NetworkConfig,
    transport: &mut T,
) -> Result<(), NetError> {
    let mut frame = [0u8; FRAME_LEN];
    let mac = config.mac();
    let ip = config.ip_address().octets();
    fill_broadcast(&mut frame, &mac, OP_REPLY)?;

    let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
    let mut arp = ArpPacket::new_checked(ether.payload_mut())?;
    arp.set_sender(&mac, &ip);
    arp.set_target(&BROADCAST_MAC, &ip);
    debug!("gratuitous arp for {}", config.ip_address());

    transmit(transport, &frame)
}

fn fill_broadcast(frame: &mut [u8], mac: &[u8; 6], op: u16) -> Result<(), NetError> {
    let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
    ether.set_dst_mac(&BROADCAST_MAC);
    ether.set_src_mac(mac);
    ether.set_ethertype(ETHERTYPE_ARP);
    let payload = ether.payload_mut();
    // Sizes go in first so the checked view accepts the zeroed buffer.
    payload[4] = 6;
    payload[5] = 4;
    ArpPacket::new_checked(payload)?.set_header(op);
    Ok(())
}
