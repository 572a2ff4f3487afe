use super::checksum::Checksum;
use super::ethernet::{self, ETHERTYPE_IPV4, EthernetFrame};
use super::ipv4::{self, DEFAULT_TTL, Ipv4Header, Ipv4Packet, PROTO_TCP};
use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::transport::{Transport, transmit};
use std::ops::Range;
use tracing::debug;

pub const HEADER_LEN: usize = 20;
pub const TELNET_PORT: u16 = 23;

pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_RST: u8 = 0x04;
pub const FLAG_PSH: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x10;
pub const FLAG_ECE: u8 = 0x40;
pub const FLAG_CWR: u8 = 0x80;

pub const WINDOW_SIZE: u16 = 0x05B4;
const MSS_OPTION: [u8; 4] = [0x02, 0x04, 0x05, 0xB4];

/// Largest payload one outgoing segment carries.
pub const MAX_PAYLOAD: usize = 1460;
const MAX_FRAME_LEN: usize =
    ethernet::HEADER_LEN + ipv4::HEADER_LEN + HEADER_LEN + MSS_OPTION.len() + MAX_PAYLOAD;

#[derive(Debug)]
pub struct TcpSegment<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TcpSegment<T> {
    /// `buffer` is the IP payload.
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        let b = buffer.as_ref();
        if b.len() < HEADER_LEN {
            return Err(NetError::Truncated);
        }
        let header_len = ((b[12] >> 4) as usize) * 4;
        if header_len < HEADER_LEN {
            return Err(NetError::Malformed("tcp data offset"));
        }
        if header_len > b.len() {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    pub fn source_port(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[0], b[1]])
    }

    pub fn destination_port(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[2], b[3]])
    }

    pub fn seq_number(&self) -> u32 {
        let b = self.buffer.as_ref();
        u32::from_be_bytes([b[4], b[5], b[6], b[7]])
    }

    pub fn ack_number(&self) -> u32 {
        let b = self.buffer.as_ref();
        u32::from_be_bytes([b[8], b[9], b[10], b[11]])
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[12] >> 4) as usize) * 4
    }

    /// Low byte of offset-and-flags: CWR ECE URG ACK PSH RST SYN FIN.
    pub fn flags(&self) -> u8 {
        self.buffer.as_ref()[13]
    }

    pub fn window(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[14], b[15]])
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..self.header_len()]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }

    /// Data length plus one for each of SYN and FIN.
    pub fn sequence_len(&self) -> u32 {
        let mut len = self.payload().len() as u32;
        if self.flags() & FLAG_SYN != 0 {
            len += 1;
        }
        if self.flags() & FLAG_FIN != 0 {
            len += 1;
        }
        len
    }

    pub fn verify_checksum(&self, src: &[u8; 4], dst: &[u8; 4]) -> bool {
        let b = self.buffer.as_ref();
        let Ok(length) = u16::try_from(b.len()) else {
            return false;
        };
        Checksum::pseudo_header(src, dst, PROTO_TCP, length)
            .add_bytes(b)
            .finish()
            == 0
    }
}

/// Where replies go: the sender of the last segment we accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpPeer {
    pub mac: [u8; 6],
    pub ip: [u8; 4],
    pub port: u16,
    pub next_ack: u32,
}

/// A segment taken in by [`TcpSession::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub flags: u8,
    /// Data bytes, as a range into the received frame.
    pub data: Range<usize>,
}

/// The single implicit connection.
#[derive(Debug, Clone, Default)]
pub struct TcpSession {
    seq_num: u32,
    peer: Option<TcpPeer>,
}

impl TcpSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    pub fn peer(&self) -> Option<&TcpPeer> {
        self.peer.as_ref()
    }

    /// Remembers the sender of `frame` as the peer. IP and TCP options are
    /// skipped when locating the data.
    pub fn receive(&mut self, frame: &[u8]) -> Result<Received, NetError> {
        let ether = EthernetFrame::new_checked(frame)?;
        let ip = Ipv4Packet::new_checked(ether.payload())?;
        let tcp = TcpSegment::new_checked(ip.payload())?;

        let start = ethernet::HEADER_LEN + ip.header_len() + tcp.header_len();
        let end = ethernet::HEADER_LEN + ip.total_len() as usize;
        self.peer = Some(TcpPeer {
            mac: ether.src_mac(),
            ip: ip.src(),
            port: tcp.source_port(),
            next_ack: tcp.seq_number().wrapping_add(tcp.sequence_len()),
        });
        Ok(Received {
            flags: tcp.flags(),
            data: start..end,
        })
    }

    /// Sends one segment with `flags` and `payload` to the peer.
    ///
    /// SYN goes out with a zero ack, SYN|ACK carries the MSS option, and
    /// FIN is always sent as FIN|ACK. Every other segment acknowledges the
    /// peer's sequence space as of the last received segment.
    pub fn send_tcp_msg<T: Transport>(
        &mut self,
        flags: u8,
        payload: &[u8],
        config: &NetworkConfig,
        transport: &mut T,
    ) -> Result<(), NetError> {
        let peer = self.peer.ok_or(NetError::NoPeer)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(NetError::Malformed("tcp payload too large"));
        }
        let (wire_flags, ack, options) = match flags {
            FLAG_SYN => (FLAG_SYN, 0, &[][..]),
            f if f == FLAG_SYN | FLAG_ACK => (f, peer.next_ack, &MSS_OPTION[..]),
            FLAG_FIN => (FLAG_FIN | FLAG_ACK, peer.next_ack, &[][..]),
            other => (other, peer.next_ack, &[][..]),
        };

        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = self.write_segment(&mut frame, &peer, config, wire_flags, ack, options, payload)?;
        debug!(
            "tcp {:#04x} seq={} ack={} len={}",
            wire_flags,
            self.seq_num,
            ack,
            payload.len()
        );
        transmit(transport, &frame[..len])?;

        let mut advance = payload.len() as u32;
        if wire_flags & FLAG_SYN != 0 {
            advance += 1;
        }
        if wire_flags & FLAG_FIN != 0 {
            advance += 1;
        }
        self.seq_num = self.seq_num.wrapping_add(advance);
        Ok(())
    }

    /// PSH|ACK carrying `payload` to the remembered peer.
    pub fn send_data<T: Transport>(
        &mut self,
        payload: &[u8],
        config: &NetworkConfig,
        transport: &mut T,
    ) -> Result<(), NetError> {
        self.send_tcp_msg(FLAG_PSH | FLAG_ACK, payload, config, transport)
    }

    /// Lays out Ethernet, IPv4 and TCP headers plus data in `frame`. The
    /// checksums are computed last, over the finished segment.
    #[allow(clippy::too_many_arguments)]
    fn write_segment(
        &self,
        frame: &mut [u8],
        peer: &TcpPeer,
        config: &NetworkConfig,
        flags: u8,
        ack: u32,
        options: &[u8],
        payload: &[u8],
    ) -> Result<usize, NetError> {
        let header_len = HEADER_LEN + options.len();
        let seg_len = header_len + payload.len();
        let src = config.ip_address().octets();

        let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
        ether.set_dst_mac(&peer.mac);
        ether.set_src_mac(&config.mac());
        ether.set_ethertype(ETHERTYPE_IPV4);

        let ip_header = Ipv4Header {
            identification: 0,
            ttl: DEFAULT_TTL,
            protocol: PROTO_TCP,
            src,
            dst: peer.ip,
            payload_len: seg_len,
        };
        let ip_buf = ether.payload_mut();
        ip_header.emit(ip_buf)?;

        let seg = ip_buf
            .get_mut(ipv4::HEADER_LEN..ipv4::HEADER_LEN + seg_len)
            .ok_or(NetError::Truncated)?;
        seg[0..2].copy_from_slice(&TELNET_PORT.to_be_bytes());
        seg[2..4].copy_from_slice(&peer.port.to_be_bytes());
        seg[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        seg[8..12].copy_from_slice(&ack.to_be_bytes());
        seg[12] = ((header_len / 4) as u8) << 4;
        seg[13] = flags;
        seg[14..16].copy_from_slice(&WINDOW_SIZE.to_be_bytes());
        seg[16..20].copy_from_slice(&[0, 0, 0, 0]);
        seg[HEADER_LEN..header_len].copy_from_slice(options);
        seg[header_len..].copy_from_slice(payload);

        let sum = Checksum::pseudo_header(&src, &peer.ip, PROTO_TCP, seg_len as u16)
            .add_bytes(seg)
            .finish();
        seg[16..18].copy_from_slice(&sum.to_be_bytes());

        Ok(ethernet::HEADER_LEN + ip_header.total_len())
    }
}
