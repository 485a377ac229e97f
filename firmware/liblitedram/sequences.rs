//! Power-up, mode register and ZQ calibration sequences.

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::injector::{Payload, Store};
use crate::jedec::{mpc, MODULE_BROADCAST, NOP};
use crate::phy::Ddr5Phy;

/// tPW_RESET, µs.
const RESET_PULSE_US: u64 = 200;
/// tINIT3, ms.
const RESET_TO_CS_MS: u64 = 4;
/// tINIT4 and tINIT5, µs.
const CS_LOW_US: u64 = 2;
const NOP_US: u64 = 1;
/// tZQCAL, µs.
const ZQCAL_US: u64 = 1;

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    pub fn reset_sequence(&mut self) {
        self.set_reset_n(false);
        self.spin_us(RESET_PULSE_US);
        self.set_reset_n(true);
        self.spin_ms(RESET_TO_CS_MS);
    }

    /// Holds CS_n low on every rank for tINIT4, then replays NOPs for
    /// tINIT5 and leaves the bus deselected.
    pub fn dram_start_sequence(&mut self, ranks: usize) {
        let all_ranks = ((1u16 << ranks) - 1) as u8;
        for channel in 0..self.channels() {
            self.inject(channel, Payload::new(0xff, all_ranks, NOP), Store::Continuous);
            self.store_continuous(channel);
        }
        self.spin_us(CS_LOW_US);
        for channel in 0..self.channels() {
            self.inject(channel, Payload::new(0xff, 0, NOP), Store::Continuous);
            self.store_continuous(channel);
        }
        self.spin_us(NOP_US);
    }

    /// Writes the mode register table to every die of `rank`. MR2 keeps
    /// the session flags.
    pub fn setup_dram_mrs_sequence(&mut self, rank: usize, mode_registers: &[(u8, u8)]) {
        for channel in 0..self.channels() {
            for &(reg, value) in mode_registers {
                let value = if reg == 2 { value | self.session.mr2_flags() } else { value };
                self.send_mrw(channel, rank, MODULE_BROADCAST, reg, value);
            }
        }
    }

    fn zq_calibration(&mut self, ranks: usize) {
        for channel in 0..self.channels() {
            for rank in 0..ranks {
                self.send_mpc(channel, rank, mpc::ZQCAL_START, false);
                self.spin_us(ZQCAL_US);
                self.send_mpc(channel, rank, mpc::ZQCAL_LATCH, false);
            }
        }
    }

    pub fn init_sequence_1n(&mut self, ranks: usize) {
        info!("1N mode setup");
        self.zq_calibration(ranks)
    }

    /// MPCs are held for the extra cycle by the command encoders.
    pub fn init_sequence_2n(&mut self, ranks: usize) {
        info!("2N mode setup");
        self.zq_calibration(ranks)
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::sim::SimClock;
    use crate::csr::sim::SimBus;
    use crate::csr::{Csr, CsrBus, Injector, DFII_CONTROL_RESET_N};
    use crate::jedec::MRW;
    use crate::phy::{sim, Ddr5Phy};

    fn storage(phy: &Ddr5Phy<SimBus, SimClock>) -> Vec<u32> {
        phy.bus.writes.iter()
            .filter(|&&(csr, _)| csr == Csr::Injector(0, Injector::CommandStorage))
            .map(|&(_, value)| value)
            .collect()
    }

    #[test]
    fn reset_pulse() {
        let mut phy = sim::phy();
        phy.reset_sequence();
        let resets: Vec<u32> = phy.bus.writes.iter()
            .filter(|&&(csr, _)| csr == Csr::DfiiControl)
            .map(|&(_, value)| value & DFII_CONTROL_RESET_N)
            .collect();
        assert_eq!(resets, vec![0, DFII_CONTROL_RESET_N]);
        assert_eq!(phy.clock.now, 4200);
    }

    #[test]
    fn start_asserts_every_rank() {
        let mut phy = sim::phy();
        phy.dram_start_sequence(2);
        let cs: u32 = 0b11 << phy.settings.cs_offset();
        assert_eq!(storage(&phy), vec![cs | 0x1f, 0x1f]);
        assert_eq!(phy.bus.read(Csr::Injector(1, Injector::CommandStorage)), 0x1f);
    }

    #[test]
    fn mr2_keeps_session_flags() {
        let mut phy = sim::phy();
        phy.session.single_cycle_mpc = true;
        phy.setup_dram_mrs_sequence(1, &[(2, 0x01)]);
        let writes = storage(&phy);
        let first = (MRW | 2 << 5) as u32 | 0b10 << phy.settings.cs_offset();
        let mrw = writes.iter().position(|&value| value == first).unwrap();
        // 2N mode repeats the first beat, data follows on phases 2 and 3
        assert_eq!(&writes[mrw + 1..mrw + 4], &[first & 0x3fff, 0x11, 0x11]);
    }

    #[test]
    fn zq_calibration_per_rank() {
        let mut phy = sim::phy();
        phy.init_sequence_1n(2);
        let issued = phy.bus.count(Csr::Injector(0, Injector::IssueCommand));
        let mut single = sim::phy();
        single.init_sequence_2n(1);
        assert_eq!(single.bus.count(Csr::Injector(0, Injector::IssueCommand)) * 2, issued);
    }
}
