//! RFC 1071 ones-complement checksum.
//!
//! [`Checksum`] is a plain value: every computation starts from
//! `Checksum::new()` and folds byte ranges in with [`Checksum::add_bytes`].
//! Nothing is shared between unrelated computations.

/// Running 32-bit ones-complement sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    pub const fn new() -> Self {
        Self { sum: 0 }
    }

    /// Seed for UDP/TCP: source, destination, zero, protocol, length.
    pub fn pseudo_header(src: &[u8; 4], dst: &[u8; 4], protocol: u8, length: u16) -> Self {
        Self::new()
            .add_bytes(src)
            .add_bytes(dst)
            .add_u16(protocol as u16)
            .add_u16(length)
    }

    /// Folds big-endian words of `data` into the sum. A trailing odd byte is
    /// the high half of a word whose low half is zero.
    pub fn add_bytes(mut self, data: &[u8]) -> Self {
        for word in data.chunks(2) {
            let val = if word.len() == 2 {
                u16::from_be_bytes([word[0], word[1]]) as u32
            } else {
                (word[0] as u32) << 8
            };
            self.sum = self.sum.wrapping_add(val);
        }
        self
    }

    pub fn add_u16(mut self, value: u16) -> Self {
        self.sum = self.sum.wrapping_add(value as u32);
        self
    }

    /// Folds carries back into the low 16 bits and complements.
    pub fn finish(self) -> u16 {
        let mut sum = self.sum;
        while (sum >> 16) != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

/// Checksum of a single contiguous range.
pub fn checksum(data: &[u8]) -> u16 {
    Checksum::new().add_bytes(data).finish()
}
