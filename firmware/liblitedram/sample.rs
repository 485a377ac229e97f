//! Per-die view of one DFI phase worth of DQ data.
//!
//! The injector exposes captured and staged data as a big-endian byte
//! buffer with the highest module first. Within a module's group the
//! negative-edge bits come before the positive-edge bits. x4 dies share
//! one byte between both edges: low nibble positive, high nibble negative.

use byteorder::{BigEndian, ByteOrder};

pub const MAX_DATA_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Or,
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleBuffer {
    bytes: [u8; MAX_DATA_BYTES],
    len: usize,
}

impl SampleBuffer {
    pub fn new(len: usize) -> SampleBuffer {
        SampleBuffer { bytes: [0; MAX_DATA_BYTES], len: len.min(MAX_DATA_BYTES) }
    }

    pub fn from_bytes(bytes: &[u8]) -> SampleBuffer {
        let mut buffer = SampleBuffer::new(bytes.len());
        let len = buffer.len;
        buffer.as_bytes_mut().copy_from_slice(&bytes[..len]);
        buffer
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    /// Byte offsets of the negative and positive edge lanes of `module`.
    fn offsets(&self, module: usize, width: usize) -> (usize, usize) {
        let group = width / 4;
        let negative = (self.len / group - 1 - module) * group;
        (negative, negative + width / 8)
    }

    /// Both edges of `module`: bits `[0, width)` positive edge, `[width, 2*width)` negative.
    pub fn module(&self, module: usize, width: usize) -> u32 {
        let (negative, positive) = self.offsets(module, width);
        if width == 4 {
            return self.bytes[negative] as u32
        }
        let lane = width / 8;
        let pos = BigEndian::read_uint(&self.bytes[positive..positive + lane], lane) as u32;
        let neg = BigEndian::read_uint(&self.bytes[negative..negative + lane], lane) as u32;
        pos | neg << width
    }

    pub fn set_module(&mut self, module: usize, width: usize, value: u32) {
        let (negative, positive) = self.offsets(module, width);
        if width == 4 {
            self.bytes[negative] = value as u8;
            return
        }
        let lane = width / 8;
        let mask = (1u64 << width) - 1;
        BigEndian::write_uint(&mut self.bytes[positive..positive + lane],
                              value as u64 & mask, lane);
        BigEndian::write_uint(&mut self.bytes[negative..negative + lane],
                              (value as u64 >> width) & mask, lane);
    }

    /// `bit` indexes the `2 * width` bits returned by [`module`](Self::module).
    pub fn get_bit(&self, module: usize, width: usize, bit: usize) -> bool {
        self.module(module, width) >> bit & 1 != 0
    }

    pub fn set_bit(&mut self, module: usize, width: usize, bit: usize, value: bool) {
        let current = self.module(module, width);
        let updated = if value { current | 1 << bit } else { current & !(1 << bit) };
        self.set_module(module, width, updated)
    }

    /// Folds the whole buffer down to one bit.
    pub fn reduce(&self, op: Reduce) -> bool {
        match op {
            Reduce::Or  => self.as_bytes().iter().any(|&byte| byte != 0),
            Reduce::And => self.as_bytes().iter().all(|&byte| byte == 0xff),
        }
    }

    /// Folds both edges of one module down to one bit.
    pub fn reduce_module(&self, module: usize, width: usize, op: Reduce) -> bool {
        let value = self.module(module, width);
        let mask = ((1u64 << (2 * width)) - 1) as u32;
        match op {
            Reduce::Or  => value & mask != 0,
            Reduce::And => value & mask == mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_copies_up_to_capacity() {
        let buffer = SampleBuffer::from_bytes(&[0x12, 0x34, 0x56]);
        assert_eq!(buffer.as_bytes(), &[0x12, 0x34, 0x56]);
        let long = [0xa5; MAX_DATA_BYTES + 4];
        let buffer = SampleBuffer::from_bytes(&long);
        assert_eq!(buffer.len(), MAX_DATA_BYTES);
        assert_eq!(buffer.as_bytes(), &long[..MAX_DATA_BYTES]);
    }

    #[test]
    fn x4_modules_share_a_byte_between_edges() {
        let mut buffer = SampleBuffer::new(4);
        buffer.set_module(0, 4, 0x5a);
        buffer.set_module(3, 4, 0x0f);
        assert_eq!(buffer.as_bytes(), &[0x0f, 0x00, 0x00, 0x5a]);
        assert_eq!(buffer.module(0, 4), 0x5a);
        assert!(buffer.get_bit(0, 4, 1));
        assert!(!buffer.get_bit(0, 4, 0));
        // bit 4 is the negative edge of DQ0
        assert!(buffer.get_bit(0, 4, 4));
    }

    #[test]
    fn x8_modules_use_one_byte_per_edge() {
        let mut buffer = SampleBuffer::new(4);
        buffer.set_module(1, 8, 0xbeef);
        assert_eq!(buffer.as_bytes(), &[0xbe, 0xef, 0x00, 0x00]);
        buffer.set_module(0, 8, 0x1234);
        assert_eq!(buffer.as_bytes(), &[0xbe, 0xef, 0x12, 0x34]);
        assert_eq!(buffer.module(1, 8), 0xbeef);
        assert_eq!(buffer.module(0, 8), 0x1234);
    }

    #[test]
    fn x16_modules_use_two_bytes_per_edge() {
        let mut buffer = SampleBuffer::new(8);
        buffer.set_module(0, 16, 0xdead_beef);
        assert_eq!(buffer.as_bytes(), &[0, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(buffer.module(0, 16), 0xdead_beef);
        buffer.set_bit(1, 16, 16, true);
        assert_eq!(buffer.as_bytes()[..4], [0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn subchannel_split_halves_the_buffer() {
        // 80 DFI data bits per phase, x4 dies: five modules per sub-channel
        let mut buffer = SampleBuffer::new(80 / 16);
        for module in 0..5 {
            buffer.set_module(module, 4, module as u32 + 1);
        }
        assert_eq!(buffer.as_bytes(), &[5, 4, 3, 2, 1]);
    }

    #[test]
    fn reductions() {
        let mut buffer = SampleBuffer::new(4);
        assert!(!buffer.reduce(Reduce::Or));
        buffer.set_module(1, 8, 0x0100);
        assert!(buffer.reduce(Reduce::Or));
        assert!(!buffer.reduce(Reduce::And));
        assert!(buffer.reduce_module(3, 4, Reduce::Or));
        assert!(!buffer.reduce_module(0, 8, Reduce::Or));
        buffer.set_module(0, 8, 0xffff);
        assert!(buffer.reduce_module(0, 8, Reduce::And));
        buffer.as_bytes_mut().iter_mut().for_each(|byte| *byte = 0xff);
        assert!(buffer.reduce(Reduce::And));
    }
}
