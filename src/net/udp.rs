use super::checksum::Checksum;
use super::ipv4::PROTO_UDP;
use crate::error::NetError;

pub const HEADER_LEN: usize = 8;

#[derive(Debug)]
pub struct UdpDatagram<T> {
    buffer: T,
}

impl<T: AsRef<[u8]>> UdpDatagram<T> {
    /// `buffer` is the IP payload; the UDP length must fit inside it.
    pub fn new_checked(buffer: T) -> Result<Self, NetError> {
        let b = buffer.as_ref();
        if b.len() < HEADER_LEN {
            return Err(NetError::Truncated);
        }
        let length = u16::from_be_bytes([b[4], b[5]]) as usize;
        if length < HEADER_LEN {
            return Err(NetError::Malformed("udp length"));
        }
        if length > b.len() {
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

    pub fn length(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[4], b[5]])
    }

    pub fn checksum(&self) -> u16 {
        let b = self.buffer.as_ref();
        u16::from_be_bytes([b[6], b[7]])
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..self.length() as usize]
    }

    /// A zero checksum field means the sender did not compute one.
    pub fn verify_checksum(&self, src: &[u8; 4], dst: &[u8; 4]) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        let length = self.length();
        Checksum::pseudo_header(src, dst, PROTO_UDP, length)
            .add_bytes(&self.buffer.as_ref()[..length as usize])
            .finish()
            == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> UdpDatagram<T> {
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let end = self.length() as usize;
        &mut self.buffer.as_mut()[HEADER_LEN..end]
    }

    /// Pseudo-header, header and payload. A result of zero goes out as zero.
    pub fn compute_checksum(&mut self, src: &[u8; 4], dst: &[u8; 4]) {
        let length = self.length();
        let b = self.buffer.as_mut();
        b[6..8].copy_from_slice(&[0, 0]);
        let sum = Checksum::pseudo_header(src, dst, PROTO_UDP, length)
            .add_bytes(&b[..length as usize])
            .finish();
        b[6..8].copy_from_slice(&sum.to_be_bytes());
    }
}

/// Writes ports and length ahead of a payload already in place. The
/// checksum is left zero for `compute_checksum`.
pub fn emit_header(
    buf: &mut [u8],
    source_port: u16,
    destination_port: u16,
    payload_len: usize,
) -> Result<(), NetError> {
    let length =
        u16::try_from(HEADER_LEN + payload_len).map_err(|_| NetError::Malformed("udp length"))?;
    let header = buf.get_mut(..HEADER_LEN).ok_or(NetError::Truncated)?;
    header[0..2].copy_from_slice(&source_port.to_be_bytes());
    header[2..4].copy_from_slice(&destination_port.to_be_bytes());
    header[4..6].copy_from_slice(&length.to_be_bytes());
    header[6..8].copy_from_slice(&[0, 0]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: [u8; 4] = [192, 168, 2, 1];
    const DST: [u8; 4] = [192, 168, 2, 123];

    fn datagram(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + payload.len()];
        emit_header(&mut buf, 67, 68, payload.len()).unwrap();
        buf[HEADER_LEN..].copy_from_slice(payload);
        buf
    }

    #[test]
    fn test_checksum_verifies() {
        let mut buf = datagram(b"hello");
        let mut udp = UdpDatagram::new_checked(&mut buf[..]).unwrap();
        udp.compute_checksum(&SRC, &DST);
        assert_ne!(udp.checksum(), 0);
        assert!(udp.verify_checksum(&SRC, &DST));
        assert!(!udp.verify_checksum(&DST, &[10, 0, 0, 1]));
        assert_eq!(udp.payload(), b"hello");
        assert_eq!(udp.source_port(), 67);
        assert_eq!(udp.destination_port(), 68);
    }

    #[test]
    fn test_zero_checksum_accepted() {
        let buf = datagram(b"abc");
        let udp = UdpDatagram::new_checked(&buf[..]).unwrap();
        assert!(udp.verify_checksum(&SRC, &DST));
    }

    #[test]
    fn test_length_bounds() {
        let mut buf = datagram(b"abcd");
        buf[4..6].copy_from_slice(&64u16.to_be_bytes());
        assert_eq!(
            UdpDatagram::new_checked(&buf[..]).unwrap_err(),
            NetError::Truncated
        );
        buf[4..6].copy_from_slice(&4u16.to_be_bytes());
        assert_eq!(
            UdpDatagram::new_checked(&buf[..]).unwrap_err(),
            NetError::Malformed("udp length")
        );
    }

    #[test]
    fn test_payload_bounded_by_length() {
        let mut buf = datagram(b"ab");
        buf.extend_from_slice(&[0xEE; 6]);
        let udp = UdpDatagram::new_checked(&buf[..]).unwrap();
        assert_eq!(udp.payload(), b"ab");
    }
}
