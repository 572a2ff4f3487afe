use crate::error::NetError;

pub const HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const BROADCAST_MAC: [u8; 6] = [0xFF; 6];

/// Ethernet header + 18 byte tag/CRC headroom + 1500 byte MTU + CRC.
pub const MAX_FRAME_LEN: usize = 1522;

/// Ethernet II view over a frame buffer.
#[derive(Debug)]
pub struct EthernetFrame<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> EthernetFrame<T> {
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> [u8; 6] {
        let b = self.buffer.as_ref();
        [b[0], b[1], b[2], b[3], b[4], b[5]]
    }

    pub fn src_mac(&self) -> [u8; 6] {
        let b = self.buffer.as_ref();
        [b[6], b[7], b[8], b[9], b[10], b[11]]
    }

    pub fn ethertype(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[12], b[13]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> EthernetFrame<T> {
    pub fn set_dst_mac(&mut self, mac: &[u8; 6]) {
        self.buffer.as_mut()[0..6].copy_from_slice(mac);
    }

    pub fn set_src_mac(&mut self, mac: &[u8; 6]) {
        self.buffer.as_mut()[6..12].copy_from_slice(mac);
    }

    pub fn set_ethertype(&mut self, ethertype: u16) {
        self.buffer.as_mut()[12..14].copy_from_slice(&ethertype.to_be_bytes());
    }

    /// Returns the frame to whoever sent it, from `local`.
    pub fn reply_from(&mut self, local: &[u8; 6]) {
        let peer = self.src_mac();
        self.set_dst_mac(&peer);
        self.set_src_mac(local);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[HEADER_LEN..]
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
