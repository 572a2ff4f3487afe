use super::checksum::checksum;
use crate::error::NetError;

pub const HEADER_LEN: usize = 20;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

pub const DEFAULT_TTL: u8 = 64;

/// Zero-copy view of an IPv4 packet starting at the version/IHL byte.
///
/// `new_checked` guarantees the header (IHL x 4 bytes) and the whole
/// `total_len` fit in the buffer, so accessors can index freely.
#[derive(Debug)]
pub struct Ipv4Packet<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Ipv4Packet<T> {
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        let buf = buffer.as_ref();
        if buf.len() < HEADER_LEN {
            return Err(NetError::Truncated);
        }
        if buf[0] >> 4 != 4 {
            return Err(NetError::Malformed("ip version"));
        }
        let header_len = ((buf[0] & 0x0F) as usize) * 4;
        if header_len < HEADER_LEN {
            return Err(NetError::Malformed("ip header length"));
        }
        let total_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if total_len < header_len {
            return Err(NetError::Malformed("ip total length"));
        }
        if total_len > buf.len() {
            return Err(NetError::Truncated);
        }
        Ok(Self { buffer })
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[0] & 0x0F) as usize) * 4
    }

    pub fn total_len(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[2], b[3]])
    }

    pub fn identification(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[4], b[5]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer.as_ref()[9]
    }

    pub fn checksum(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[10], b[11]])
    }

    pub fn src(&self) -> [u8; 4] {
        let b = self.buffer.as_ref();
        [b[12], b[13], b[14], b[15]]
    }

    pub fn dst(&self) -> [u8; 4] {
        let b = self.buffer.as_ref();
        [b[16], b[17], b[18], b[19]]
    }

    /// Sum over the whole header, options included, folds to zero.
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.buffer.as_ref()[..self.header_len()]) == 0
    }

    /// Bytes between the end of the header and `total_len`.
    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..self.total_len() as usize]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Ipv4Packet<T> {
    /// Swapping the two addresses leaves the header sum unchanged, so the
    /// checksum stays valid.
    pub fn swap_addresses(&mut self) {
        let src = self.src();
        let dst = self.dst();
        let b = self.buffer.as_mut();
        b[12..16].copy_from_slice(&dst);
        b[16..20].copy_from_slice(&src);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.header_len();
        let end = self.total_len() as usize;
        &mut self.buffer.as_mut()[start..end]
    }
}

/// Fields of an outgoing IPv4 header. Emitted headers never carry options.
#[derive(Debug, Clone)]
pub struct Ipv4Header {
    pub identification: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: [u8; 4],
    pub dst: [u8; 4],
    pub payload_len: usize,
}

impl Ipv4Header {
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload_len
    }

    /// Writes the 20 byte header into `buf` and fills in its checksum.
    pub fn emit(&self, buf: &mut [u8]) -> Result<(), NetError> {
        let total_len = u16::try_from(self.total_len())
            .map_err(|_| NetError::Malformed("ip total length"))?;
        let header = buf.get_mut(..HEADER_LEN).ok_or(NetError::Truncated)?;
        header[0] = 0x45;
        header[1] = 0;
        header[2..4].copy_from_slice(&total_len.to_be_bytes());
        header[4..6].copy_from_slice(&self.identification.to_be_bytes());
        header[6..8].copy_from_slice(&[0, 0]);
        header[8] = self.ttl;
        header[9] = self.protocol;
        header[10..12].copy_from_slice(&[0, 0]);
        header[12..16].copy_from_slice(&self.src);
        header[16..20].copy_from_slice(&self.dst);
        Self::compute_checksum(header);
        Ok(())
    }

    /// Recomputes the checksum of a header already laid out in `header`.
    pub fn compute_checksum(header: &mut [u8]) {
        header[10..12].copy_from_slice(&[0, 0]);
        let sum = checksum(header);
        header[10..12].copy_from_slice(&sum.to_be_bytes());
    }
}
