//! Classification of received frames.
//!
//! Each `check_*` either hands back the view the handler needs or says why
//! the frame does not qualify: [`NetError::Ignored`] when it is simply not
//! that kind of frame, any other error when it is that kind but broken.
//! The `is_*` predicates are the same checks reduced to a bool.

use super::arp::{self, ArpPacket};
use super::dhcp::{self, DhcpMessage};
use super::ethernet::{self, ETHERTYPE_ARP, ETHERTYPE_IPV4, EthernetFrame};
use super::icmp::{self, IcmpPacket};
use super::ipv4::{self, Ipv4Packet};
use super::tcp::{self, TcpSegment};
use super::udp::{self, UdpDatagram};
use crate::config::NetworkConfig;
use crate::error::NetError;

#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn ethernet(&self) -> Result<EthernetFrame<&'a [u8]>, NetError> {
        EthernetFrame::new_checked(self.data)
    }

    pub fn check_arp_request(
        &self,
        config: &NetworkConfig,
    ) -> Result<ArpPacket<&'a [u8]>, NetError> {
        self.check_arp(config, arp::OP_REQUEST)
    }

    /// A reply whose target is our address.
    pub fn check_arp_response(
        &self,
        config: &NetworkConfig,
    ) -> Result<ArpPacket<&'a [u8]>, NetError> {
        self.check_arp(config, arp::OP_REPLY)
    }

    /// IPv4 with a valid header checksum.
    pub fn check_ip(&self) -> Result<Ipv4Packet<&'a [u8]>, NetError> {
        if self.ethernet()?.ethertype() != ETHERTYPE_IPV4 {
            return Err(NetError::Ignored("not ipv4"));
        }
        let ip = Ipv4Packet::new_checked(&self.data[ethernet::HEADER_LEN..])?;
        if !ip.verify_checksum() {
            return Err(NetError::Checksum("ip"));
        }
        Ok(ip)
    }

    pub fn check_ip_unicast(
        &self,
        config: &NetworkConfig,
    ) -> Result<Ipv4Packet<&'a [u8]>, NetError> {
        let ip = self.check_ip()?;
        if ip.dst() != config.ip_address().octets() {
            return Err(NetError::Ignored("not addressed to us"));
        }
        Ok(ip)
    }

    pub fn check_ping_request(
        &self,
        config: &NetworkConfig,
    ) -> Result<IcmpPacket<&'a [u8]>, NetError> {
        let ip = self.check_ip_unicast(config)?;
        if ip.protocol() != ipv4::PROTO_ICMP {
            return Err(NetError::Ignored("not icmp"));
        }
        let icmp = IcmpPacket::new_checked(self.ip_payload(&ip))?;
        if icmp.icmp_type() != icmp::ECHO_REQUEST {
            return Err(NetError::Ignored("not an echo request"));
        }
        Ok(icmp)
    }

    /// UDP with a valid checksum, or none at all.
    pub fn check_udp(&self) -> Result<(Ipv4Packet<&'a [u8]>, UdpDatagram<&'a [u8]>), NetError> {
        let ip = self.check_ip()?;
        if ip.protocol() != ipv4::PROTO_UDP {
            return Err(NetError::Ignored("not udp"));
        }
        let udp = UdpDatagram::new_checked(self.ip_payload(&ip))?;
        if !udp.verify_checksum(&ip.src(), &ip.dst()) {
            return Err(NetError::Checksum("udp"));
        }
        Ok((ip, udp))
    }

    /// A server reply for our hardware address, while DHCP is enabled. The
    /// transaction id is left to the client.
    pub fn check_dhcp(&self, config: &NetworkConfig) -> Result<DhcpMessage<&'a [u8]>, NetError> {
        let (ip, udp) = self.check_udp()?;
        if udp.source_port() != dhcp::SERVER_PORT || udp.destination_port() != dhcp::CLIENT_PORT {
            return Err(NetError::Ignored("not dhcp"));
        }
        if !config.is_dhcp_enabled() {
            return Err(NetError::Ignored("dhcp disabled"));
        }
        let datagram = self.ip_payload(&ip);
        let message = DhcpMessage::new_checked(&datagram[udp::HEADER_LEN..udp.length() as usize])?;
        if message.op() != dhcp::OP_BOOTREPLY {
            return Err(NetError::Ignored("not a dhcp reply"));
        }
        if message.client_mac() != config.mac() {
            return Err(NetError::Ignored("dhcp reply for another client"));
        }
        Ok(message)
    }

    /// A segment to the telnet port with a valid checksum.
    pub fn check_telnet(&self, config: &NetworkConfig) -> Result<TcpSegment<&'a [u8]>, NetError> {
        let ip = self.check_ip_unicast(config)?;
        if ip.protocol() != ipv4::PROTO_TCP {
            return Err(NetError::Ignored("not tcp"));
        }
        let tcp = TcpSegment::new_checked(self.ip_payload(&ip))?;
        if tcp.destination_port() != tcp::TELNET_PORT {
            return Err(NetError::Ignored("not the telnet port"));
        }
        if !tcp.verify_checksum(&ip.src(), &ip.dst()) {
            return Err(NetError::Checksum("tcp"));
        }
        Ok(tcp)
    }

    pub fn is_ip(&self) -> bool {
        self.check_ip().is_ok()
    }

    pub fn is_ip_unicast(&self, config: &NetworkConfig) -> bool {
        self.check_ip_unicast(config).is_ok()
    }

    pub fn is_arp_request(&self, config: &NetworkConfig) -> bool {
        self.check_arp_request(config).is_ok()
    }

    pub fn is_arp_response(&self, config: &NetworkConfig) -> bool {
        self.check_arp_response(config).is_ok()
    }

    pub fn is_ping_request(&self, config: &NetworkConfig) -> bool {
        self.check_ping_request(config).is_ok()
    }

    pub fn is_udp(&self) -> bool {
        self.check_udp().is_ok()
    }

    pub fn is_dhcp(&self, config: &NetworkConfig) -> bool {
        self.check_dhcp(config).is_ok()
    }

    pub fn is_telnet(&self, config: &NetworkConfig) -> bool {
        self.check_telnet(config).is_ok()
    }

    fn check_arp(&self, config: &NetworkConfig, op: u16) -> Result<ArpPacket<&'a [u8]>, NetError> {
        if self.ethernet()?.ethertype() != ETHERTYPE_ARP {
            return Err(NetError::Ignored("not arp"));
        }
        let arp = ArpPacket::new_checked(&self.data[ethernet::HEADER_LEN..])?;
        if arp.target_ip() != config.ip_address().octets() {
            return Err(NetError::Ignored("arp for another host"));
        }
        if arp.operation() != op {
            return Err(NetError::Ignored("other arp operation"));
        }
        Ok(arp)
    }

    /// IP payload with the frame's lifetime, bounded by the total length.
    fn ip_payload(&self, ip: &Ipv4Packet<&'a [u8]>) -> &'a [u8] {
        let start = ethernet::HEADER_LEN + ip.header_len();
        let end = ethernet::HEADER_LEN + ip.total_len() as usize;
        &self.data[start..end]
    }
}
