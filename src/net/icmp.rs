use super::checksum::checksum;
use super::ethernet::{self, EthernetFrame};
use super::ipv4::Ipv4Packet;
use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::transport::{Transport, transmit};
use tracing::info;

pub const HEADER_LEN: usize = 8;

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;

#[derive(Debug)]
pub struct IcmpPacket<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> IcmpPacket<T> {
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer.as_ref()[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer.as_ref()[1]
    }

    pub fn checksum(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[2], b[3]])
    }

    pub fn identifier(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[4], b[5]])
    }

    pub fn sequence(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[6], b[7]])
    }

    pub fn verify_checksum(&self) -> bool {
        checksum(self.buffer.as_ref()) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> IcmpPacket<T> {
    pub fn set_icmp_type(&mut self, icmp_type: u8) {
        self.buffer.as_mut()[0] = icmp_type;
    }

    /// Checksum over type..end of data, with the checksum field zeroed.
    pub fn compute_checksum(&mut self) {
        let b = self.buffer.as_mut();
        b[2..4].copy_from_slice(&[0, 0]);
        let sum = checksum(b);
        b[2..4].copy_from_slice(&sum.to_be_bytes());
    }
}

/// Turns the echo request in `frame` into its reply and transmits it.
///
/// The frame must already have passed `Frame::is_ping_request`.
pub fn send_echo_reply<T: Transport>(
    frame: &mut [u8],
    config: &NetworkConfig,
    transport: &mut T,
) -> Result<(), NetError> {
    let mut ether = EthernetFrame::new_checked(&mut frame[..])?;
    ether.reply_from(&config.mac());

    let mut ip = Ipv4Packet::new_checked(ether.payload_mut())?;
    ip.swap_addresses();
    let total_len = ip.total_len() as usize;

    let mut icmp = IcmpPacket::new_checked(ip.payload_mut())?;
    icmp.set_icmp_type(ECHO_REPLY);
    icmp.compute_checksum();
    info!(
        "Echo Reply: id={} seq={}",
        icmp.identifier(),
        icmp.sequence()
    );

    transmit(transport, &frame[..ethernet::HEADER_LEN + total_len])
}
