//! DQ swizzle discovery and the data patterns compared against it.
//!
//! DIMM routing may swap DQ lines inside a die. The gateware keeps a table
//! with one byte per DQ holding the logical bit it carries; every expected
//! pattern is permuted through it before comparison.

use crate::clock::Clock;
use crate::csr::{Csr, CsrBus};
use crate::jedec::MODULE_BROADCAST;
use crate::phy::Ddr5Phy;

const MAX_REMAP_BYTES: usize = 128;

/// Next state of the DDR5 MPR LFSR (x^8 + x^6 + x^5 + x^4 + 1).
pub fn lfsr_next(input: u8) -> u8 {
    let bit = |n: u8| (input >> n) & 1;
    (bit(0) << 7) |
    (bit(7) << 6) |
    ((bit(6) ^ bit(0)) << 5) |
    ((bit(5) ^ bit(0)) << 4) |
    ((bit(4) ^ bit(0)) << 3) |
    (bit(3) << 2) |
    (bit(2) << 1) |
    bit(1)
}

/// Expected per-phase module data for a serial MPR pattern, before permutation.
///
/// Every DQ carries the same bit stream, two bits per phase; `inv` flips
/// selected lines.
pub fn serial_pattern(data: u16, inv: u8, width: usize) -> [u32; 8] {
    let mask = (1u32 << width) - 1;
    let inv = inv as u32 & mask;
    let mut expected = [0; 8];
    for (phase, slot) in expected.iter_mut().enumerate() {
        let positive = if data >> (2 * phase) & 1 != 0 { mask } else { 0 };
        let negative = if data >> (2 * phase + 1) & 1 != 0 { mask } else { 0 };
        *slot = (positive ^ inv) | (negative ^ inv) << width;
    }
    expected
}

/// Expected per-phase module data for the two-LFSR MPR pattern, before
/// permutation. Lines set in `select` follow the second LFSR.
pub fn lfsr_pattern(seed0: u8, seed1: u8, inv: u8, select: u8, width: usize) -> [u32; 8] {
    let mask = (1u32 << width) - 1;
    let inv = inv as u32 & mask;
    let (mut lfsr0, mut lfsr1) = (seed0, seed1);
    let beat = |lfsr0: &mut u8, lfsr1: &mut u8| {
        let mut value = 0;
        for line in 0..width {
            let source = if select as u32 & (1 << line) != 0 { *lfsr1 } else { *lfsr0 };
            value |= (source as u32 & 1) << line;
        }
        *lfsr0 = lfsr_next(*lfsr0);
        *lfsr1 = lfsr_next(*lfsr1);
        value ^ inv
    };
    let mut expected = [0; 8];
    for slot in expected.iter_mut() {
        let positive = beat(&mut lfsr0, &mut lfsr1);
        let negative = beat(&mut lfsr0, &mut lfsr1);
        *slot = positive | negative << width;
    }
    expected
}

/// MR28 and MR29 values that invert only `bit` of the serial pattern.
/// MR28 covers DQL[7:0], MR29 the upper byte of x16 dies.
fn invert_select(bit: usize) -> [u8; 2] {
    (1u16 << bit).to_le_bytes()
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn remap_table(&mut self, channel: usize) -> ([u8; MAX_REMAP_BYTES], usize) {
        let len = self.settings.dq_remap_bytes().min(MAX_REMAP_BYTES);
        let mut data = [0; MAX_REMAP_BYTES];
        self.bus.read_buf(Csr::DqRemapping(channel), &mut data[..len]);
        (data, len)
    }

    pub fn dq_remapping(&mut self, channel: usize, line: usize) -> u8 {
        self.remap_table(channel).0[line]
    }

    pub fn set_dq_remapping(&mut self, channel: usize, line: usize, mapping: u8) {
        let (mut data, len) = self.remap_table(channel);
        data[line] = mapping;
        self.bus.write_buf(Csr::DqRemapping(channel), &data[..len]);
    }

    /// Drives one logical DQ high at a time through the MPR serial pattern
    /// and records which physical line of every die answered.
    pub fn get_dimm_dq_remapping(&mut self, channel: usize, modules: usize, width: usize) {
        for bit in 0..width {
            self.send_mrw(channel, 0, MODULE_BROADCAST, 26, 0xff);
            self.send_mrw(channel, 0, MODULE_BROADCAST, 27, 0xff);
            let [lower, upper] = invert_select(bit);
            self.send_mrw(channel, 0, MODULE_BROADCAST, 28, lower);
            self.send_mrw(channel, 0, MODULE_BROADCAST, 29, upper);
            self.send_mrw(channel, 0, MODULE_BROADCAST, 25, 0x08);

            self.inject(channel, crate::injector::Payload::new(0x0f, 0, 0).read(),
                        crate::injector::Store::Continuous);
            self.store_continuous(channel);
            self.spin_us(1);
            self.send_mrr(channel, 0, 31);
            self.spin_us(1);
            self.setup_capture(channel, 3);
            self.spin_us(1);
            self.start_capture(channel);
            self.spin_us(1);
            self.stop_capture(channel);

            self.send_mrw(channel, 0, MODULE_BROADCAST, 25, 0x00);
            self.spin_us(1);
            self.send_mrw(channel, 0, MODULE_BROADCAST, 25, 0x00);
            let (mut table, len) = self.remap_table(channel);
            for module in 0..modules {
                let data = self.data_module_phase(channel, module, width, 0);
                record_probe(&mut table, module, width, bit, data);
            }
            self.bus.write_buf(Csr::DqRemapping(channel), &table[..len]);
        }
    }

    /// Moves both edges of every logical bit of `value` to its physical DQ.
    pub fn permute(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                   value: u32) -> u32 {
        let (table, _) = self.remap_table(channel);
        permute_with(&table, rank, module, width, value)
    }

    /// Rebuilds an MRR result from the burst on the die's DQ0.
    pub fn recover_mrr_value(&mut self, channel: usize, module: usize, width: usize) -> u8 {
        let dq0 = self.dq_remapping(channel, module * width) as usize;
        let mut value = 0;
        for phase in 4..8 {
            let data = self.data_module_phase(channel, module, width, phase);
            value |= ((data >> dq0 & 1) as u8) << ((phase - 4) * 2);
            value |= ((data >> dq0 >> width & 1) as u8) << ((phase - 4) * 2 + 1);
        }
        value
    }

    /// Dumps MR0 through MR255 of one die.
    pub fn read_registers(&mut self, channel: usize, rank: usize, module: usize, width: usize) {
        for reg in 0..=255u8 {
            self.send_mrr(channel, rank, reg);
            let value = self.recover_mrr_value(channel, module, width);
            info!("MR{:3}: {:02X}", reg, value);
        }
    }

    fn compare_phases(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                      pattern: [u32; 8], verbose: bool) -> bool {
        let (table, _) = self.remap_table(channel);
        for phase in 0..8 {
            let expected = permute_with(&table, rank, module, width, pattern[phase]);
            let data = self.data_module_phase(channel, module, width, phase);
            let error = data ^ expected;
            if error != 0 {
                if verbose {
                    for bit in (0..2 * width).filter(|bit| error >> bit & 1 != 0) {
                        debug!("failed for line {} bit {}: expected {} got {}",
                               bit % width, phase * 2 + bit / width,
                               expected >> bit & 1, data >> bit & 1);
                    }
                }
                return false
            }
        }
        true
    }

    /// Compares the last read burst against a serial MPR pattern.
    pub fn compare_serial(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                          data: u16, inv: u8, verbose: bool) -> bool {
        self.compare_phases(channel, rank, module, width, serial_pattern(data, inv, width),
                            verbose)
    }

    /// Compares the last read burst against the LFSR MPR pattern.
    pub fn compare(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                   seed0: u8, seed1: u8, inv: u8, select: u8, verbose: bool) -> bool {
        let pattern = lfsr_pattern(seed0, seed1, inv, select, width);
        self.compare_phases(channel, rank, module, width, pattern, verbose)
    }
}

/// Maps logical `bit` of `module` to the physical line that read low
/// while only that bit was driven low.
fn record_probe(table: &mut [u8], module: usize, width: usize, bit: usize, data: u32) {
    for line in (0..width).filter(|line| data >> line & 1 == 0) {
        table[module * width + bit] = line as u8;
    }
}

/// Odd ranks see the remap table with neighbouring lines swapped.
fn permute_with(table: &[u8], rank: usize, module: usize, width: usize, value: u32) -> u32 {
    let mut permuted = 0;
    for bit in 0..width {
        let mapping = table[(module * width + bit) ^ (rank & 1)] as usize;
        permuted |= (value >> bit & 1) << mapping;
        permuted |= (value >> (width + bit) & 1) << (mapping + width);
    }
    permuted
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use crate::csr::Csr;
    use crate::phy::sim;
    use super::*;

    #[test]
    fn lfsr_sequence() {
        assert_eq!(lfsr_next(0x01), 0xb8);
        assert_eq!(lfsr_next(0x80), 0x40);
        assert_eq!(lfsr_next(0x00), 0x00);
        // maximal length: no state repeats before 255 steps
        let mut state = 0x5a;
        for step in 1..=255 {
            state = lfsr_next(state);
            if state == 0x5a {
                assert_eq!(step, 255);
            }
        }
        assert_eq!(state, 0x5a);
    }

    #[test]
    fn serial_pattern_inversion() {
        let pattern = serial_pattern(0b0110, 0xa5, 8);
        assert_eq!(pattern[0], 0xa5 | (0xff ^ 0xa5) << 8);
        assert_eq!(pattern[1], (0xff ^ 0xa5) | 0xa5 << 8);
        assert_eq!(pattern[2], 0xa5 | 0xa5 << 8);
    }

    #[test]
    fn lfsr_pattern_select() {
        // with every line on the same LFSR all lines carry the same bit
        let pattern = lfsr_pattern(0x1c, 0x72, 0, 0x00, 4);
        for value in pattern.iter() {
            assert!(value & 0xf == 0 || value & 0xf == 0xf);
        }
        let pattern = lfsr_pattern(0x01, 0x00, 0, 0b0011, 4);
        assert_eq!(pattern[0] & 0xf, 0b1100);
    }

    #[test]
    fn identity_table_does_not_permute() {
        let table: Vec<u8> = (0..40).map(|line| (line % 8) as u8).collect();
        assert_eq!(permute_with(&table, 0, 1, 8, 0xbeef), 0xbeef);
    }

    #[test]
    fn odd_ranks_swap_neighbours() {
        let table: Vec<u8> = (0..8).map(|line| line as u8).collect();
        assert_eq!(permute_with(&table, 1, 0, 4, 0b0001), 0b0010);
        assert_eq!(permute_with(&table, 1, 0, 4, 0b0001 << 4), 0b0010 << 4);
    }

    proptest! {
        #[test]
        fn probing_every_bit_recovers_the_wiring(
                wiring in Just((0u8..8).collect::<Vec<u8>>()).prop_shuffle(),
                module in 0usize..5) {
            let mut table = vec![0xffu8; 40];
            for bit in 0..8 {
                let data = 0xffff & !(1u32 << wiring[bit]);
                record_probe(&mut table, module, 8, bit, data);
            }
            let found = &table[module * 8..module * 8 + 8];
            prop_assert_eq!(found, &wiring[..]);
            // every physical line is claimed exactly once
            let mut seen = [false; 8];
            for &line in found {
                prop_assert!(!seen[line as usize]);
                seen[line as usize] = true;
            }
        }
    }

    #[test]
    fn upper_byte_goes_to_mr29() {
        assert_eq!(invert_select(0), [0x01, 0x00]);
        assert_eq!(invert_select(7), [0x80, 0x00]);
        assert_eq!(invert_select(8), [0x00, 0x01]);
        assert_eq!(invert_select(15), [0x00, 0x80]);
    }

    #[test]
    fn remap_table_is_read_modify_write() {
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::DqRemapping(1), (0..40).collect());
        phy.set_dq_remapping(1, 3, 7);
        assert_eq!(phy.dq_remapping(1, 3), 7);
        assert_eq!(phy.dq_remapping(1, 4), 4);
        assert_eq!(phy.bus.bufs[&Csr::DqRemapping(1)].len(), 40);
    }

    #[test]
    fn mrr_value_is_taken_from_dq0() {
        use crate::csr::Injector;
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::DqRemapping(0), vec![0; 40]);
        // every phase returns DQ0 high on the positive edge only
        let mut data = vec![0u8; 10];
        data[9] = 0x01;
        phy.bus.bufs.insert(Csr::Injector(0, Injector::Rddata), data);
        assert_eq!(phy.recover_mrr_value(0, 0, 8), 0b0101_0101);
    }
}
