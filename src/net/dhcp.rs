//! DHCP client: one transaction id per boot, no retry timer.
//!
//! ```text
//! Idle --start--> DiscoverSent --OFFER--> RequestSent --ACK--> Bound
//!                                              |                 |
//!                                              +--NAK--> Idle    +--release--> Idle
//! Bound --refresh--> RequestSent
//! ```

use super::arp;
use super::ethernet::{self, BROADCAST_MAC, ETHERTYPE_IPV4, EthernetFrame};
use super::ipv4::{self, DEFAULT_TTL, Ipv4Header, PROTO_UDP};
use super::udp::{self, UdpDatagram};
use crate::config::{Lease, NetworkConfig};
use crate::error::NetError;
use crate::transport::{Transport, transmit};
use std::net::Ipv4Addr;
use tracing::{debug, info};

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;

/// op..file plus the magic cookie.
pub const FIXED_LEN: usize = 240;
pub const MAGIC_COOKIE: u32 = 0x6382_5363;
pub const DEFAULT_XID: u32 = 0x1010_1010;
pub const IP_IDENTIFICATION: u16 = 0x7147;

pub const OP_BOOTREQUEST: u8 = 1;
pub const OP_BOOTREPLY: u8 = 2;
pub const FLAG_BROADCAST: u16 = 0x8000;

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS: u8 = 6;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MESSAGE_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAMETER_REQUEST: u8 = 55;
pub const OPT_END: u8 = 255;

/// Longest option list we emit (REQUEST).
const MAX_OPTIONS_LEN: usize = 22;
const MAX_FRAME_LEN: usize =
    ethernet::HEADER_LEN + ipv4::HEADER_LEN + udp::HEADER_LEN + FIXED_LEN + MAX_OPTIONS_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => return Err(NetError::Malformed("dhcp message type")),
        })
    }
}

#[derive(Debug)]
pub struct DhcpMessage<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> DhcpMessage<T> {
    /// `buffer` is the UDP payload, already bounded by the UDP length.
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        let b = buffer.as_ref();
        if b.len() < FIXED_LEN {
            return Err(NetError::Truncated);
        }
        if u32::from_be_bytes([b[236], b[237], b[238], b[239]]) != MAGIC_COOKIE {
            return Err(NetError::Malformed("dhcp magic cookie"));
        }
        Ok(Self { buffer })
    }

    pub fn op(&self) -> u8 {
        self.buffer.as_ref()[0]
    }

    pub fn xid(&self) -> u32 {
        let b = self.buffer.as_ref();
        u32::from_be_bytes([b[4], b[5], b[6], b[7]])
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        self.addr_at(12)
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        self.addr_at(16)
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        self.addr_at(20)
    }

    /// First six bytes of `chaddr`.
    pub fn client_mac(&self) -> [u8; 6] {
        let b = self.buffer.as_ref();
        [b[28], b[29], b[30], b[31], b[32], b[33]]
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[FIXED_LEN..]
    }

    fn addr_at(&self, offset: usize) -> Ipv4Addr {
        let b = self.buffer.as_ref();
        Ipv4Addr::new(b[offset], b[offset + 1], b[offset + 2], b[offset + 3])
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> DhcpMessage<T> {
    fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    /// Writes a client BOOTREQUEST: every fixed field, the zeroed server
    /// name and file areas, and the cookie.
    fn fill_request(&mut self, xid: u32, flags: u16, ciaddr: Ipv4Addr, mac: &[u8; 6]) {
        let b = self.buffer.as_mut();
        b[..FIXED_LEN].fill(0);
        b[0] = OP_BOOTREQUEST;
        b[1] = 1;
        b[2] = 6;
        b[4..8].copy_from_slice(&xid.to_be_bytes());
        b[10..12].copy_from_slice(&flags.to_be_bytes());
        b[12..16].copy_from_slice(&ciaddr.octets());
        b[28..34].copy_from_slice(mac);
        b[236..240].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    }

    fn options_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[FIXED_LEN..]
    }
}

/// Recognised options of one message. Each field keeps its first occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    pub message_type: Option<u8>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns: Option<Ipv4Addr>,
    pub lease_time: Option<u32>,
    pub server_id: Option<Ipv4Addr>,
}

/// Walks the TLV list once. Any length that runs past `options`, or a
/// recognised option too short for its value, fails the whole list.
pub fn parse_options(options: &[u8]) -> Result<DhcpOptions, NetError> {
    let mut parsed = DhcpOptions::default();
    let mut i = 0;
    while i < options.len() {
        let code = options[i];
        match code {
            OPT_PAD => {
                i += 1;
                continue;
            }
            OPT_END => break,
            _ => {}
        }
        let len = *options
            .get(i + 1)
            .ok_or(NetError::Malformed("dhcp option truncated"))? as usize;
        let value = options
            .get(i + 2..i + 2 + len)
            .ok_or(NetError::Malformed("dhcp option truncated"))?;
        match code {
            OPT_MESSAGE_TYPE => {
                let v = value_prefix::<1>(value)?;
                parsed.message_type.get_or_insert(v[0]);
            }
            OPT_SUBNET_MASK => {
                parsed.subnet_mask.get_or_insert(value_prefix::<4>(value)?.into());
            }
            OPT_ROUTER => {
                parsed.router.get_or_insert(value_prefix::<4>(value)?.into());
            }
            OPT_DNS => {
                parsed.dns.get_or_insert(value_prefix::<4>(value)?.into());
            }
            OPT_SERVER_ID => {
                parsed.server_id.get_or_insert(value_prefix::<4>(value)?.into());
            }
            OPT_LEASE_TIME => {
                parsed
                    .lease_time
                    .get_or_insert(u32::from_be_bytes(value_prefix::<4>(value)?));
            }
            _ => {}
        }
        i += 2 + len;
    }
    Ok(parsed)
}

fn value_prefix<const N: usize>(value: &[u8]) -> Result<[u8; N], NetError> {
    value
        .get(..N)
        .and_then(|v| <[u8; N]>::try_from(v).ok())
        .ok_or(NetError::Malformed("dhcp option length"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpPhase {
    Idle,
    DiscoverSent,
    RequestSent,
    Bound,
}

/// What a server reply did to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpEvent {
    /// OFFER accepted and REQUEST sent for this address.
    Offered(Ipv4Addr),
    Bound(Ipv4Addr),
    /// NAK: the client is back to idle and holds no address.
    Rejected,
    /// Valid reply that means nothing in the current phase.
    Ignored(MessageType),
}

#[derive(Debug, Clone)]
pub struct DhcpClient {
    phase: DhcpPhase,
    xid: u32,
    offered_ip: Ipv4Addr,
    server_ip: Ipv4Addr,
    server_mac: [u8; 6],
}

impl Default for DhcpClient {
    fn default() -> Self {
        Self::new(DEFAULT_XID)
    }
}

impl DhcpClient {
    pub fn new(xid: u32) -> Self {
        Self {
            phase: DhcpPhase::Idle,
            xid,
            offered_ip: Ipv4Addr::UNSPECIFIED,
            server_ip: Ipv4Addr::UNSPECIFIED,
            server_mac: BROADCAST_MAC,
        }
    }

    pub fn phase(&self) -> DhcpPhase {
        self.phase
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn offered_ip(&self) -> Ipv4Addr {
        self.offered_ip
    }

    pub fn server_ip(&self) -> Ipv4Addr {
        self.server_ip
    }

    /// Broadcasts DISCOVER. Restarts the exchange from any phase.
    pub fn start<T: Transport>(
        &mut self,
        config: &NetworkConfig,
        transport: &mut T,
    ) -> Result<(), NetError> {
        self.offered_ip = Ipv4Addr::UNSPECIFIED;
        self.server_ip = Ipv4Addr::UNSPECIFIED;
        self.server_mac = BROADCAST_MAC;
        self.send_message(MessageType::Discover, Ipv4Addr::BROADCAST, config, transport)?;
        self.phase = DhcpPhase::DiscoverSent;
        Ok(())
    }

    /// Re-requests the bound address. Returns false outside `Bound`.
    pub fn refresh<T: Transport>(
        &mut self,
        config: &NetworkConfig,
        transport: &mut T,
    ) -> Result<bool, NetError> {
        if self.phase != DhcpPhase::Bound {
            debug!("dhcp refresh ignored in {:?}", self.phase);
            return Ok(false);
        }
        self.offered_ip = config.ip_address();
        self.send_message(MessageType::Request, Ipv4Addr::BROADCAST, config, transport)?;
        self.phase = DhcpPhase::RequestSent;
        Ok(true)
    }

    /// Gives the lease back and clears local addressing. Returns false
    /// outside `Bound`.
    pub fn release<T: Transport>(
        &mut self,
        config: &mut NetworkConfig,
        transport: &mut T,
    ) -> Result<bool, NetError> {
        if self.phase != DhcpPhase::Bound {
            debug!("dhcp release ignored in {:?}", self.phase);
            return Ok(false);
        }
        let server = self.server_ip;
        self.send_message(MessageType::Release, server, config, transport)?;
        info!("DHCP released {}", config.ip_address());
        config.clear_addresses();
        self.offered_ip = Ipv4Addr::UNSPECIFIED;
        self.phase = DhcpPhase::Idle;
        Ok(true)
    }

    /// Handles a server reply addressed to us. `server_mac` is the
    /// Ethernet source of the frame carrying it.
    ///
    /// The option list is parsed in full before anything changes, so a
    /// rejected reply leaves both the phase and `config` untouched.
    pub fn handle_reply<T: Transport, B: AsRef<[u8]>>(
        &mut self,
        message: &DhcpMessage<B>,
        server_mac: [u8; 6],
        config: &mut NetworkConfig,
        transport: &mut T,
    ) -> Result<DhcpEvent, NetError> {
        if message.xid() != self.xid {
            return Err(NetError::TransactionMismatch {
                got: message.xid(),
                expected: self.xid,
            });
        }
        let options = parse_options(message.options())?;
        let msg_type = MessageType::try_from(
            options
                .message_type
                .ok_or(NetError::Malformed("dhcp message type"))?,
        )?;

        match (self.phase, msg_type) {
            (DhcpPhase::DiscoverSent, MessageType::Offer) => {
                let offered = message.yiaddr();
                let server = if message.siaddr().is_unspecified() {
                    options.server_id.unwrap_or(Ipv4Addr::UNSPECIFIED)
                } else {
                    message.siaddr()
                };
                self.offered_ip = offered;
                self.server_ip = server;
                self.server_mac = server_mac;
                debug!("dhcp offer {offered} from {server}");
                self.send_message(MessageType::Request, Ipv4Addr::BROADCAST, config, transport)?;
                self.phase = DhcpPhase::RequestSent;
                Ok(DhcpEvent::Offered(offered))
            }
            (DhcpPhase::RequestSent, MessageType::Ack) => {
                let lease = Lease {
                    address: message.yiaddr(),
                    subnet: options.subnet_mask,
                    gateway: options.router,
                    dns: options.dns,
                    lease_time: options.lease_time,
                };
                config.apply_lease(&lease);
                self.phase = DhcpPhase::Bound;
                info!(
                    "DHCP bound {} (lease {}s)",
                    lease.address,
                    config.lease_time()
                );
                arp::send_gratuitous(config, transport)?;
                Ok(DhcpEvent::Bound(lease.address))
            }
            (DhcpPhase::RequestSent, MessageType::Nak) => {
                info!("DHCP request for {} refused", self.offered_ip);
                // A refused renewal takes the installed lease with it.
                config.clear_addresses();
                self.offered_ip = Ipv4Addr::UNSPECIFIED;
                self.phase = DhcpPhase::Idle;
                Ok(DhcpEvent::Rejected)
            }
            (phase, other) => {
                debug!("dhcp {other:?} ignored in {phase:?}");
                Ok(DhcpEvent::Ignored(other))
            }
        }
    }

    /// Builds and transmits one client message to `dst`. Only DISCOVER,
    /// REQUEST and RELEASE are ever sent.
    pub fn send_message<T: Transport>(
        &self,
        msg_type: MessageType,
        dst: Ipv4Addr,
        config: &NetworkConfig,
        transport: &mut T,
    ) -> Result<(), NetError> {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = self.build_message(msg_type, dst, config, &mut frame)?;
        debug!("dhcp {msg_type:?} to {dst}");
        transmit(transport, &frame[..len])
    }

    fn build_message(
        &self,
        msg_type: MessageType,
        dst: Ipv4Addr,
        config: &NetworkConfig,
        frame: &mut [u8],
    ) -> Result<usize, NetError> {
        let mac = config.mac();
        let (flags, ciaddr, dst_mac) = match msg_type {
            MessageType::Discover => (FLAG_BROADCAST, Ipv4Addr::UNSPECIFIED, BROADCAST_MAC),
            MessageType::Request => (0, Ipv4Addr::UNSPECIFIED, BROADCAST_MAC),
            MessageType::Release => (0, config.ip_address(), self.server_mac),
            _ => return Err(NetError::Malformed("unsupported client message")),
        };

        let dhcp_start = ethernet::HEADER_LEN + ipv4::HEADER_LEN + udp::HEADER_LEN;
        let dhcp_buf = frame
            .get_mut(dhcp_start..)
            .ok_or(NetError::Truncated)?;
        if dhcp_buf.len() < FIXED_LEN + MAX_OPTIONS_LEN {
            return Err(NetError::Truncated);
        }
        let mut dhcp = DhcpMessage::new_unchecked(dhcp_buf);
        dhcp.fill_request(self.xid, flags, ciaddr, &mac);
        let opts_len = self.write_options(msg_type, dhcp.options_mut());
        let udp_len = udp::HEADER_LEN + FIXED_LEN + opts_len;

        let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
        ether.set_dst_mac(&dst_mac);
        ether.set_src_mac(&mac);
        ether.set_ethertype(ETHERTYPE_IPV4);

        let src = config.ip_address().octets();
        let ip_header = Ipv4Header {
            identification: IP_IDENTIFICATION,
            ttl: DEFAULT_TTL,
            protocol: PROTO_UDP,
            src,
            dst: dst.octets(),
            payload_len: udp_len,
        };
        let ip_buf = ether.payload_mut();
        ip_header.emit(ip_buf)?;

        let udp_buf = &mut ip_buf[ipv4::HEADER_LEN..ipv4::HEADER_LEN + udp_len];
        udp::emit_header(udp_buf, CLIENT_PORT, SERVER_PORT, udp_len - udp::HEADER_LEN)?;
        UdpDatagram::new_checked(udp_buf)?.compute_checksum(&src, &dst.octets());

        Ok(ethernet::HEADER_LEN + ip_header.total_len())
    }

    fn write_options(&self, msg_type: MessageType, opts: &mut [u8]) -> usize {
        match msg_type {
            MessageType::Request => {
                let ip = self.offered_ip.octets();
                let server = self.server_ip.octets();
                let list = [
                    OPT_MESSAGE_TYPE,
                    1,
                    MessageType::Request as u8,
                    OPT_REQUESTED_IP,
                    4,
                    ip[0],
                    ip[1],
                    ip[2],
                    ip[3],
                    OPT_SERVER_ID,
                    4,
                    server[0],
                    server[1],
                    server[2],
                    server[3],
                    OPT_PARAMETER_REQUEST,
                    3,
                    OPT_SUBNET_MASK,
                    OPT_ROUTER,
                    OPT_DNS,
                    OPT_END,
                    OPT_END,
                ];
                opts[..list.len()].copy_from_slice(&list);
                list.len()
            }
            other => {
                let list = [OPT_MESSAGE_TYPE, 1, other as u8, OPT_END];
                opts[..list.len()].copy_from_slice(&list);
                list.len()
            }
        }
    }
}
