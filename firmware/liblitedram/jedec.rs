//! JEDEC DDR5 commands built out of injector bursts.
//!
//! A burst spans the 8 DFI phases of one controller cycle. Two-cycle
//! commands put their first CA beat on phase 0 and the second one on
//! phase 1 in 1N mode; in 2N mode the first beat is held for two phases
//! and the second beat moves to phases 2 and 3.

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::injector::{Payload, Store};
use crate::phy::Ddr5Phy;

pub const MPC: u16 = 0x0f;
pub const MRW: u16 = 0x05;
pub const MRR: u16 = 0x15;
pub const WR: u16 = 0x0d;
pub const RD: u16 = 0x1d;
pub const PREA: u16 = 0x0b;
pub const NOP: u16 = 0x1f;

/// Addresses every die of the selected rank.
pub const MODULE_BROADCAST: u8 = 0xf;

pub mod mpc {
    pub const EXIT_CSTM: u8 = 0x00;
    pub const ENTER_CSTM: u8 = 0x01;
    pub const ENTER_CATM: u8 = 0x03;
    pub const ZQCAL_LATCH: u8 = 0x04;
    pub const ZQCAL_START: u8 = 0x05;
    pub const MODE_2N: u8 = 0x08;
    pub const MODE_1N: u8 = 0x09;
    pub const EXIT_PDA_ENUMERATE: u8 = 0x0a;
    pub const ENTER_PDA_ENUMERATE: u8 = 0x0b;
    pub const PDA_ENUMERATE_ID: u8 = 0x60;
    pub const PDA_SELECT_ID: u8 = 0x70;
    pub const SELECT_ALL: u8 = 0x7f;
}

const fn phase(n: usize) -> u8 {
    1 << n
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn single(&mut self, channel: usize, payload: Payload) {
        self.inject(channel, payload, Store::SingleShot)
    }

    fn continuous(&mut self, channel: usize, payload: Payload) {
        self.inject(channel, payload, Store::Continuous)
    }

    /// Second beat of a two-cycle command, or a repeat of the first in 2N mode.
    fn second_beat(&self, first: u16, second: u16) -> u16 {
        if self.session.n2_mode { first } else { second }
    }

    /// Fills phases 4..8 of the single-shot buffer with deselects.
    fn idle_tail(&mut self, channel: usize, template: Payload) {
        for n in 4..8 {
            self.single(channel, Payload { phases: phase(n), cs: 0, command: 0, ..template });
        }
    }

    fn long_mpc(&mut self, channel: usize, rank: usize, op: u8, wrdata_en: bool) {
        let command = MPC | (op as u16) << 5;
        let base = Payload { wrdata_en, ..Payload::default() };
        self.continuous(channel, Payload { phases: 0x0f, command, ..base });
        self.store_continuous(channel);
        self.spin_us(1);
        self.single(channel, Payload { phases: 0xff, command, ..base });
        self.single(channel, Payload { phases: 0x3f, cs: 1 << rank, command, ..base });
        self.issue_single(channel);
        self.spin_us(1);
        self.single(channel, Payload { phases: 0xff, ..base });
        self.continuous(channel, Payload { phases: 0x0f, ..base });
        self.store_continuous(channel);
        self.spin_us(1);
    }

    fn short_mpc(&mut self, channel: usize, rank: usize, op: u8, wrdata_en: bool) {
        let command = MPC | (op as u16) << 5;
        let base = Payload { wrdata_en, ..Payload::default() };
        self.continuous(channel, Payload { phases: 0x0f, ..base });
        self.store_continuous(channel);
        self.spin_us(1);
        self.single(channel, Payload { phases: 0xff, ..base });
        self.single(channel, Payload { phases: 0x01, cs: 1 << rank, command, ..base });
        self.issue_single(channel);
        self.spin_us(1);
        self.single(channel, Payload { phases: 0xff, ..base });
        self.continuous(channel, Payload { phases: 0x0f, ..base });
        self.store_continuous(channel);
        self.spin_us(1);
    }

    /// Multi-purpose command. Held for several cycles unless the DRAM was
    /// told (MR2 OP[4]) that MPCs are single cycle.
    pub fn send_mpc(&mut self, channel: usize, rank: usize, op: u8, wrdata_en: bool) {
        trace!("MPC 0x{:02x} ch{} rank{}", op, channel, rank);
        if self.session.single_cycle_mpc {
            self.short_mpc(channel, rank, op, wrdata_en)
        } else {
            self.long_mpc(channel, rank, op, wrdata_en)
        }
    }

    fn mrw_burst(&mut self, channel: usize, rank: usize, reg: u8, data: u16) {
        let first = MRW | (reg as u16) << 5;
        self.single(channel, Payload::new(phase(0), 1 << rank, first));
        let second = self.second_beat(first, data);
        self.single(channel, Payload::new(phase(1), 0, second));
        self.single(channel, Payload::new(phase(2), 0, data));
        self.single(channel, Payload::new(phase(3), 0, data));
        self.idle_tail(channel, Payload::default());
        self.issue_single(channel);
    }

    /// Mode register write addressed to the RCD (control word, CW bit set).
    pub fn send_mrw_rcd(&mut self, channel: usize, rank: usize, reg: u8, value: u8) {
        self.mrw_burst(channel, rank, reg, value as u16 | 1 << 10);
        self.spin_us(1);
        self.single(channel, Payload::new(0xff, 0, 0));
    }

    /// Mode register write to one die (`module`) or to all of them
    /// ([`MODULE_BROADCAST`]), bracketed by PDA select commands.
    pub fn send_mrw(&mut self, channel: usize, rank: usize, module: u8, reg: u8, value: u8) {
        self.send_mpc(channel, rank, mpc::PDA_SELECT_ID | (module & 0xf), false);
        self.mrw_burst(channel, rank, reg, value as u16);
        self.spin_us(5);
        self.single(channel, Payload::new(0xff, 0, 0));
        self.send_mpc(channel, rank, mpc::SELECT_ALL, false);
    }

    /// Mode register read. The value is left in the read data buffers,
    /// see `recover_mrr_value`.
    pub fn send_mrr(&mut self, channel: usize, rank: usize, reg: u8) {
        self.setup_rddata_cnt(channel, 0);
        self.setup_rddata_cnt(channel, 8);
        let first = MRR | (reg as u16) << 5;
        self.single(channel, Payload::new(phase(0), 1 << rank, first).read());
        let second = self.second_beat(first, 0);
        self.single(channel, Payload::new(phase(1), 0, second).read());
        for n in 2..8 {
            self.single(channel, Payload::new(phase(n), 0, 0).read());
        }
        self.issue_single(channel);
        self.spin_us(5);
        self.single(channel, Payload::new(0xff, 0, 0));
        self.setup_rddata_cnt(channel, 0);
    }

    /// Write command used during write leveling: no auto precharge, no
    /// partial write, write data only on the first phase.
    pub fn send_wleveling_write(&mut self, channel: usize, rank: usize) {
        let first = WR | 1 << 5;
        let second_beat = 1 << 10 | 1 << 11;
        self.single(channel, Payload::new(phase(0), 1 << rank, first).write());
        let second = self.second_beat(first, second_beat);
        self.single(channel, Payload::new(phase(1), 0, second));
        self.single(channel, Payload::new(phase(2), 0, second_beat));
        self.single(channel, Payload::new(phase(3), 0, second_beat));
        self.idle_tail(channel, Payload::default());
        self.issue_single(channel);
        self.spin_us(5);
    }

    pub fn send_precharge(&mut self, channel: usize, rank: usize) {
        self.single(channel, Payload::new(phase(0), 1 << rank, PREA));
        self.single(channel, Payload::new(0xfe, 0, 0));
        if self.session.n2_mode {
            self.single(channel, Payload::new(phase(1), 0, PREA));
        }
        self.issue_single(channel);
        self.spin_us(1);
    }

    /// Activates row 0 of bank 0 in bank group 0.
    pub fn send_activate(&mut self, channel: usize, rank: usize) {
        let first = 0;
        self.single(channel, Payload::new(phase(0), 1 << rank, first));
        self.single(channel, Payload::new(0xfe, 0, 0));
        let second = self.second_beat(first, 0);
        self.single(channel, Payload::new(phase(1), 0, second));
        self.single(channel, Payload::new(phase(2), 0, 0));
        self.single(channel, Payload::new(phase(3), 0, 0));
        self.issue_single(channel);
        self.spin_us(1);
    }

    /// BL16 write with auto precharge to column 0 of the activated row.
    pub fn send_write(&mut self, channel: usize, rank: usize) {
        let first = WR | 1 << 5;
        let second_beat = 1 << 11;
        self.send_activate(channel, rank);
        self.single(channel, Payload::new(phase(0), 1 << rank, first).write());
        let second = self.second_beat(first, second_beat);
        self.single(channel, Payload::new(phase(1), 0, second).write());
        self.single(channel, Payload::new(phase(2), 0, second_beat).write());
        self.single(channel, Payload::new(phase(3), 0, second_beat).write());
        self.idle_tail(channel, Payload::default().write());
        self.issue_single(channel);
        self.spin_us(1);
    }

    /// Partial write that leaves every beat masked except `byte` of `module`.
    /// Used to train the DM line.
    pub fn send_write_byte(&mut self, channel: usize, rank: usize, module: usize, byte: usize) {
        let first = WR | 1 << 5;
        let second_beat = 0;
        let full_mask = self.settings.wrdata_bitmask();
        let mask = !((1u32 << (byte & 1)) << (2 * module)) as u64;
        let transfer = byte >> 1;

        self.send_activate(channel, rank);
        let template = Payload::default().write().mask(full_mask);
        self.single(channel, Payload { phases: phase(0), cs: 1 << rank, command: first, ..template });
        let second = self.second_beat(first, second_beat);
        self.single(channel, Payload { phases: phase(1), command: second, ..template });
        self.single(channel, Payload { phases: phase(2), command: second_beat, ..template });
        self.single(channel, Payload { phases: phase(3), command: second_beat, ..template });
        self.idle_tail(channel, template);

        let (cs, command) = match transfer {
            0 => (1 << rank, first),
            1 if self.session.n2_mode => (0, first),
            1 | 2 | 3 => (0, second_beat),
            _ => (0, 0),
        };
        self.single(channel, Payload::new(phase(transfer), cs, command).write().mask(mask));
        self.issue_single(channel);
        self.spin_us(1);
    }

    /// BL16 read with auto precharge from column 0 of the activated row.
    pub fn send_read(&mut self, channel: usize, rank: usize) {
        let first = RD | 1 << 5;
        let second_beat = 0;
        self.setup_rddata_cnt(channel, 0);
        self.setup_rddata_cnt(channel, 8);
        self.send_activate(channel, rank);
        self.single(channel, Payload::new(phase(0), 1 << rank, first).read());
        let second = self.second_beat(first, second_beat);
        self.single(channel, Payload::new(phase(1), 0, second).read());
        self.single(channel, Payload::new(phase(2), 0, second_beat).read());
        self.single(channel, Payload::new(phase(3), 0, second_beat).read());
        for n in 4..8 {
            self.single(channel, Payload::new(phase(n), 0, 0).read());
        }
        self.issue_single(channel);
        self.spin_us(5);
        self.setup_rddata_cnt(channel, 0);
    }

    /// Stages a NOP burst on both ranks. Fired later by `force_issue_single`
    /// so that every sub-channel sees it in the same cycle.
    pub fn prep_nop(&mut self, channel: usize) {
        self.single(channel, Payload::new(phase(0), 0, 0x3fff).read());
        self.single(channel, Payload::new(phase(1), 0b11, 0x3fff).read());
        self.single(channel, Payload::new(phase(2), 0, 0x3fff).read());
        for n in 3..8 {
            self.single(channel, Payload::new(phase(n), 0, 0).read());
        }
    }

    pub fn enter_cstm(&mut self, channel: usize, rank: usize) {
        self.send_mpc(channel, rank, mpc::ENTER_CSTM, false)
    }

    pub fn exit_cstm(&mut self, channel: usize, rank: usize) {
        self.send_mpc(channel, rank, mpc::EXIT_CSTM, false)
    }

    /// Replays NOPs with CS_n asserted every other phase. `shift` moves
    /// the pattern from 0101 to 1010.
    pub(crate) fn cs_sample_prep(&mut self, channel: usize, rank: usize, shift: bool) {
        self.continuous(channel, Payload::new(0x0f, 0, NOP).read());
        self.continuous(channel, Payload::new(0x5 << shift as u8, 1 << rank, NOP).read());
        self.store_continuous(channel);
        self.spin_us(1);
    }

    /// During CSTM an aligned CS_n makes the DRAM drive zeros on every DQ.
    /// Returns a bitmask of the modules that saw only zeros.
    pub fn cs_check(&mut self, channel: usize, rank: usize, shift: bool, modules: usize,
                    width: usize) -> u32 {
        self.cs_sample_prep(channel, rank, shift);
        let mut works = 0;
        for module in 0..modules {
            works |= (self.or_sample_module(channel, module, width) as u32) << module;
        }
        works
    }

    pub fn enter_catm(&mut self, channel: usize, rank: usize) {
        self.send_mpc(channel, rank, mpc::ENTER_CATM, false)
    }

    /// CATM is left by sending at least two consecutive NOPs.
    pub fn exit_catm(&mut self, channel: usize, rank: usize) {
        self.continuous(channel, Payload::new(0x0f, 0, NOP));
        self.store_continuous(channel);
        self.single(channel, Payload::new(0xff, 1 << rank, NOP));
        self.issue_single(channel);
        self.spin_us(1);
        self.single(channel, Payload::new(0xff, 0, 0));
    }

    /// Holds `line` at `!l2h` and flips it only on the phase where CS_n is
    /// low. `shift_back` moves CS_n that many phases after the flip.
    pub(crate) fn ca_sample_prep(&mut self, channel: usize, rank: usize, line: usize, l2h: bool,
                      shift_back: usize) {
        let low = (!l2h as u16) << line;
        let high = (l2h as u16) << line;
        self.continuous(channel, Payload::new(0x0f, 0, low).read());
        if shift_back == 0 {
            self.continuous(channel, Payload::new(0x01, 1 << rank, high).read());
        } else {
            self.continuous(channel, Payload::new(0x01, 0, high).read());
            self.continuous(channel, Payload::new(1 << shift_back, 1 << rank, low).read());
        }
        self.store_continuous(channel);
        self.spin_us(1);
    }

    /// The DRAM XORs every sampled CA line during CATM. Toggling just
    /// `line` must give all ones on a low to high edge and all zeros on a
    /// high to low edge; both have to hold.
    pub fn ca_check(&mut self, channel: usize, rank: usize, line: usize,
                    shift_back: usize) -> bool {
        self.ca_sample_prep(channel, rank, line, true, shift_back);
        let rising = self.and_sample(channel);
        self.ca_sample_prep(channel, rank, line, false, shift_back);
        let falling = !self.or_sample(channel);
        rising && falling
    }

    /// CA13 is only bonded out on some densities. Must be in CATM.
    pub fn has_line13(&mut self, channel: usize) -> bool {
        self.continuous(channel, Payload::new(0x0f, 0, 1 << 13).read());
        self.continuous(channel, Payload::new(0x01, 1, 1 << 13).read());
        self.store_continuous(channel);
        self.and_sample(channel)
    }

    pub fn disable_dram_2n_mode(&mut self, channel: usize, rank: usize) {
        self.send_mpc(channel, rank, mpc::MODE_1N, false);
        info!("switching DRAM on channel {} rank {} to 1N mode", channel_name(channel), rank);
    }

    /// Sends one write and reports whether every DQ of `module` sampled
    /// the strobe high.
    pub fn wr_dqs_check(&mut self, channel: usize, rank: usize, module: usize,
                        width: usize) -> bool {
        self.send_wleveling_write(channel, rank);
        self.and_sample_module(channel, module, width)
    }
}

/// Sub-channel letter used in log messages.
pub fn channel_name(channel: usize) -> char {
    (b'A' + channel as u8) as char
}

#[cfg(test)]
mod tests {
    use crate::csr::{Csr, Injector};
    use crate::phy::sim;
    use super::*;

    fn storage_writes(phy: &Ddr5Phy<crate::csr::sim::SimBus, crate::clock::sim::SimClock>,
                      channel: usize) -> Vec<u32> {
        phy.bus.writes.iter()
            .filter(|&&(csr, _)| csr == Csr::Injector(channel, Injector::CommandStorage))
            .map(|&(_, value)| value)
            .collect()
    }

    #[test]
    fn ca_check_needs_both_edges() {
        // DQ stuck high: the rising edge matches, the falling one does not
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::Injector(0, Injector::ResultArray), vec![0xff; 10]);
        assert!(phy.and_sample(0));
        assert!(!phy.ca_check(0, 0, 3, 0));

        // DQ stuck low: only the falling edge matches
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::Injector(0, Injector::ResultArray), vec![0x00; 10]);
        assert!(!phy.or_sample(0));
        assert!(!phy.ca_check(0, 0, 3, 1));
    }

    #[test]
    fn short_mpc_uses_one_phase() {
        let mut phy = sim::phy();
        phy.session.single_cycle_mpc = true;
        phy.send_mpc(0, 1, mpc::ENTER_CATM, false);
        let storage = storage_writes(&phy, 0);
        assert!(storage.contains(&(0x0f | 3 << 5 | 0b10 << 14)));
        assert!(phy.bus.writes.contains(&(Csr::Injector(0, Injector::PhaseAddr), 0x01)));
        assert!(!phy.bus.writes.contains(&(Csr::Injector(0, Injector::PhaseAddr), 0x3f)));
    }

    #[test]
    fn long_mpc_holds_the_command() {
        let mut phy = sim::phy();
        phy.send_mpc(1, 0, mpc::ENTER_CSTM, false);
        assert!(phy.bus.writes.contains(&(Csr::Injector(1, Injector::PhaseAddr), 0x3f)));
        assert_eq!(phy.bus.count(Csr::Injector(1, Injector::StoreContinuousCmd)), 2);
    }

    #[test]
    fn mrw_second_beat_depends_on_dfi_mode() {
        let mut phy = sim::phy();
        phy.send_mrw(0, 0, MODULE_BROADCAST, 10, 0x2d);
        // 2N mode repeats the first beat on phase 1
        assert!(storage_writes(&phy, 0).iter().filter(|&&v| v == (MRW | 10 << 5) as u32 | 1 << 14).count() == 1);
        assert!(storage_writes(&phy, 0).iter().filter(|&&v| v == (MRW | 10 << 5) as u32).count() == 1);

        let mut phy = sim::phy();
        phy.session.n2_mode = false;
        phy.send_mrw(0, 0, MODULE_BROADCAST, 10, 0x2d);
        assert_eq!(storage_writes(&phy, 0).iter().filter(|&&v| v == 0x2d).count(), 3);
    }

    #[test]
    fn rcd_mrw_sets_control_word_bit() {
        let mut phy = sim::phy();
        phy.session.n2_mode = false;
        phy.send_mrw_rcd(0, 0, 0x00, 0x1f);
        assert_eq!(storage_writes(&phy, 0).iter().filter(|&&v| v == 0x1f | 1 << 10).count(), 3);
    }

    #[test]
    fn write_byte_unmasks_one_beat() {
        let mut phy = sim::phy();
        phy.session.n2_mode = false;
        phy.send_write_byte(0, 0, 2, 5);
        let masks: Vec<u32> = phy.bus.writes.iter()
            .filter(|&&(csr, _)| csr == Csr::Injector(0, Injector::CommandStorageWrMask))
            .map(|&(_, value)| value)
            .collect();
        assert_eq!(*masks.last().unwrap(), !(0b10 << 4));
        assert_eq!(phy.bus.regs[&Csr::Injector(0, Injector::PhaseAddr)], 1 << 2);
    }

    #[test]
    fn cs_pattern_shift() {
        let mut phy = sim::phy();
        phy.cs_check(0, 0, true, 0, 8);
        assert!(phy.bus.writes.contains(&(Csr::Injector(0, Injector::PhaseAddr), 0xa)));
        phy.cs_check(0, 0, false, 0, 8);
        assert!(phy.bus.writes.contains(&(Csr::Injector(0, Injector::PhaseAddr), 0x5)));
    }
}
