use crate::error::NetError;
use std::collections::VecDeque;

/// Frame-level link the stack polls and transmits through.
pub trait Transport {
    fn is_link_up(&self) -> bool;
    fn is_data_available(&mut self) -> bool;
    /// Reports a receive overflow since the last call and clears it.
    fn is_overflow(&mut self) -> bool;
    /// Copies the next frame into `buf`, returning its length (0 if none).
    fn receive(&mut self, buf: &mut [u8]) -> usize;
    fn transmit(&mut self, frame: &[u8]) -> bool;
}

pub fn transmit<T: Transport + ?Sized>(transport: &mut T, frame: &[u8]) -> Result<(), NetError> {
    if transport.transmit(frame) {
        Ok(())
    } else {
        Err(NetError::TransmitAborted)
    }
}

/// Queue-backed transport: frames are injected by hand and every
/// transmitted frame is recorded.
#[derive(Debug)]
pub struct MemoryTransport {
    rx: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    link_up: bool,
    overflow: bool,
    fail_transmit: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            rx: VecDeque::new(),
            sent: Vec::new(),
            link_up: true,
            overflow: false,
            fail_transmit: false,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, frame: impl Into<Vec<u8>>) {
        self.rx.push_back(frame.into());
    }

    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }

    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
    }

    pub fn raise_overflow(&mut self) {
        self.overflow = true;
    }

    pub fn set_fail_transmit(&mut self, fail: bool) {
        self.fail_transmit = fail;
    }
}

impl Transport for MemoryTransport {
    fn is_link_up(&self) -> bool {
        self.link_up
    }

    fn is_data_available(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn is_overflow(&mut self) -> bool {
        std::mem::replace(&mut self.overflow, false)
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        let Some(frame) = self.rx.pop_front() else {
            return 0;
        };
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        len
    }

    fn transmit(&mut self, frame: &[u8]) -> bool {
        if self.fail_transmit {
            return false;
        }
        self.sent.push(frame.to_vec());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_flow_in_order() {
        let mut t = MemoryTransport::new();
        t.inject(vec![1, 2, 3]);
        t.inject(vec![4]);
        let mut buf = [0u8; 8];
        assert!(t.is_data_available());
        assert_eq!(t.receive(&mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(t.receive(&mut buf), 1);
        assert!(!t.is_data_available());
        assert_eq!(t.receive(&mut buf), 0);
    }

    #[test]
    fn test_overflow_clears_on_read() {
        let mut t = MemoryTransport::new();
        t.raise_overflow();
        assert!(t.is_overflow());
        assert!(!t.is_overflow());
    }

    #[test]
    fn test_transmit_failure_surfaces() {
        let mut t = MemoryTransport::new();
        assert!(transmit(&mut t, &[0xAA]).is_ok());
        t.set_fail_transmit(true);
        assert_eq!(transmit(&mut t, &[0xBB]), Err(NetError::TransmitAborted));
        assert_eq!(t.sent(), &[vec![0xAA]]);
    }
}
