//! Read training.
//!
//! In read preamble training mode every MRR of MR31 returns a known burst,
//! either a serial pattern or the output of two LFSRs. Each die first finds
//! the read cycle in which its preamble shows up, then sweeps the read
//! cycle and DQ input delay together, looking for the first window in
//! which both patterns come back intact.

use log::Level;

use crate::clock::Clock;
use crate::config::TrainingConfig;
use crate::csr::CsrBus;
use crate::delay::{DelayControl, Lane, Line};
use crate::eye::{split_index, Eye, EyeState, Trace};
use crate::jedec::{channel_name, MODULE_BROADCAST};
use crate::phy::Ddr5Phy;
use crate::trainer::{TrainingContext, TrainingKind};

pub const MAX_READ_CYCLE_DELAY: usize = 67;

/// MR63, free for software use.
pub const DRAM_SCRATCH_PAD: u8 = 63;

pub const SEEDS0: [u8; 8] = [0x1c, 0x5a, 0x24, 0x11, 0x36, 0xaa, 0xc1, 0xee];
pub const SEEDS1: [u8; 8] = [0x72, 0x55, 0x95, 0x3e, 0x59, 0x3c, 0x48, 0xfd];

/// Serial MPR patterns: all zeros, all ones, walking zero, walking one.
pub const SERIAL: [u16; 34] = [
    0x0000, 0xffff,
    0xfffe, 0xfffd, 0xfffb, 0xfff7, 0xffef, 0xffdf, 0xffbf, 0xff7f,
    0xfeff, 0xfdff, 0xfbff, 0xf7ff, 0xefff, 0xdfff, 0xbfff, 0x7fff,
    0x0001, 0x0002, 0x0004, 0x0008, 0x0010, 0x0020, 0x0040, 0x0080,
    0x0100, 0x0200, 0x0400, 0x0800, 0x1000, 0x2000, 0x4000, 0x8000,
];

/// Lines inverted by the MPR (MR28, MR29).
pub const MPR_INVERT: u8 = 0xa5;
/// Lines fed by the second LFSR (MR30).
pub const MPR_LFSR_SELECT: u8 = 0x33;

/// Preamble bits as sampled over two cycles by the PHY, 0b0010 reversed.
const PREAMBLE: u32 = 0b0100;

/// Outcome of one read check: nothing, serial patterns only, or both
/// serial and LFSR patterns.
pub const READ_FAILED: u8 = 0;
pub const READ_SERIAL: u8 = 1;
pub const READ_WORKS: u8 = 3;

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    /// 40-bit serial number from MR65..MR69, most significant byte first.
    pub fn read_serial_number(&mut self, channel: usize, rank: usize, module: usize,
                              width: usize) -> u64 {
        let mut serial = 0;
        for reg in 65..70 {
            self.send_mrr(channel, rank, reg);
            serial = serial << 8 | self.recover_mrr_value(channel, module, width) as u64;
        }
        serial
    }

    pub fn enter_rptm(&mut self, channel: usize, rank: usize) {
        self.send_mrw(channel, rank, MODULE_BROADCAST, 28, MPR_INVERT);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 29, MPR_INVERT);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 30, MPR_LFSR_SELECT);
        let flags = self.session.mr2_flags();
        self.send_mrw(channel, rank, MODULE_BROADCAST, 2, 1 | flags);
    }

    /// Leaves RPTM and puts the MPR back to its reset defaults.
    pub fn exit_rptm(&mut self, channel: usize, rank: usize) {
        self.send_mrw(channel, rank, MODULE_BROADCAST, 25, 0);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 26, 0x5a);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 27, 0x3c);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 28, 0);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 29, 0);
        let flags = self.session.mr2_flags();
        self.send_mrw(channel, rank, MODULE_BROADCAST, 2, flags);
    }

    fn read_serial_check(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                         repeats: u32) -> bool {
        for &pattern in SERIAL.iter() {
            self.send_mrw(channel, rank, module as u8, 25, 0);
            self.send_mrw(channel, rank, module as u8, 26, pattern as u8);
            self.send_mrw(channel, rank, module as u8, 27, (pattern >> 8) as u8);
            for _ in 0..repeats {
                self.send_mrr(channel, rank, 31);
                if !self.compare_serial(channel, rank, module, width, pattern, MPR_INVERT, false) {
                    if log_enabled!(Level::Trace) {
                        self.compare_serial(channel, rank, module, width, pattern, MPR_INVERT, true);
                    }
                    return false
                }
            }
        }
        true
    }

    fn read_lfsr_check(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                       repeats: u32) -> bool {
        for (&seed0, &seed1) in SEEDS0.iter().zip(SEEDS1.iter()) {
            for _ in 0..repeats {
                self.send_mrw(channel, rank, module as u8, 25, 1);
                self.send_mrw(channel, rank, module as u8, 26, seed0);
                self.send_mrw(channel, rank, module as u8, 27, seed1);
                self.send_mrr(channel, rank, 31);
                if !self.compare(channel, rank, module, width, seed0, seed1, MPR_INVERT,
                                 MPR_LFSR_SELECT, false) {
                    if log_enabled!(Level::Trace) {
                        self.compare(channel, rank, module, width, seed0, seed1, MPR_INVERT,
                                     MPR_LFSR_SELECT, true);
                    }
                    return false
                }
            }
        }
        true
    }

    /// Serial patterns pin down bit order, LFSR patterns catch marginal
    /// timing. Returns one of [`READ_FAILED`], [`READ_SERIAL`], [`READ_WORKS`].
    pub fn read_check(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                      repeats: u32) -> u8 {
        if !self.read_serial_check(channel, rank, module, width, repeats) {
            return READ_FAILED
        }
        if !self.read_lfsr_check(channel, rank, module, width, repeats) {
            return READ_SERIAL
        }
        READ_WORKS
    }

    /// First read cycle in which the preamble is seen at some DQS delay.
    pub fn find_read_preamble_cycle(&mut self, channel: usize, rank: usize, module: usize,
                                    width: usize, taps: usize) -> Option<usize> {
        let lane = Lane::new(channel, module, width);
        let mut eye = Eye::new();
        let mut trace = Trace::new();

        debug!("finding read preamble");
        self.reset_delay(Line::ReadCycle(lane));
        let mut cycle = 0;
        while cycle < MAX_READ_CYCLE_DELAY && eye.state != EyeState::After {
            trace.clear();
            self.reset_delay(Line::ReadDq(lane));
            for _ in 0..taps {
                self.send_mrr(channel, rank, 31);
                let preamble = self.captured_preamble(lane);
                trace.push(preamble as u8);
                match eye.state {
                    EyeState::Before if preamble == PREAMBLE => {
                        eye.start = Some(cycle as i32);
                        eye.state = EyeState::Inside;
                    }
                    EyeState::Inside if preamble != PREAMBLE => eye.state = EyeState::After,
                    _ => ()
                }
                self.increment_delay(Line::ReadDq(lane));
            }
            debug!("{:2}|{}", cycle, trace);
            self.increment_delay(Line::ReadCycle(lane));
            cycle += 1;
        }
        eye.start.map(|start| start as usize)
    }

    /// Sweeps read cycle and DQ delay from one cycle before the preamble
    /// and leaves the lane at the center of the first working window.
    pub fn read_training_data_scan(&mut self, channel: usize, rank: usize, module: usize,
                                   width: usize, taps: usize, preamble_cycle: usize,
                                   repeats: u32) -> bool {
        let lane = Lane::new(channel, module, width);
        let mut eye = Eye::new();
        let mut trace = Trace::new();

        // DQ and DQS may be a cycle apart
        let first = preamble_cycle.saturating_sub(1);
        debug!("data scan");
        self.set_delay(Line::ReadCycle(lane), first);
        let mut cycle = first;
        while cycle < MAX_READ_CYCLE_DELAY && eye.state != EyeState::After {
            trace.clear();
            self.reset_delay(Line::ReadDq(lane));
            for tap in 0..taps {
                let works = self.read_check(channel, rank, module, width, repeats);
                trace.push(works);
                let index = (cycle * taps + tap) as i32;
                match (eye.state, works) {
                    (EyeState::Before, READ_WORKS) => eye.observe(index, true),
                    (EyeState::Inside, READ_FAILED) => eye.observe(index, false),
                    _ => ()
                }
                self.increment_delay(Line::ReadDq(lane));
            }
            debug!("{:2}|{}|", cycle, trace);
            self.increment_delay(Line::ReadCycle(lane));
            cycle += 1;
        }

        let center = match eye.center() {
            Some(center) if eye.is_closed() => center,
            _ => {
                error!("read data scan failed for channel {} rank {} module {}",
                       channel_name(channel), rank, module);
                return false
            }
        };
        let (center_cycle, center_tap) = split_index(center, taps);
        info!("module {:2} read eye width {:3}, center cycle {:2} delay {:2}",
              module, eye.width(), center_cycle, center_tap);
        self.set_delay(Line::ReadCycle(lane), center_cycle);
        self.set_delay(Line::ReadDq(lane), center_tap);
        true
    }

    /// Writes 0xDEADBEEF to the scratch pad a byte at a time and reads
    /// every byte back.
    pub fn simple_read_check(&mut self, channel: usize, rank: usize, module: usize,
                             width: usize) -> bool {
        let mut works = true;
        let mut read_back = [0; 4];
        for (&value, slot) in [0xde, 0xad, 0xbe, 0xef].iter().zip(read_back.iter_mut()) {
            self.send_mrw(channel, rank, module as u8, DRAM_SCRATCH_PAD, value);
            self.send_mrr(channel, rank, DRAM_SCRATCH_PAD);
            *slot = self.recover_mrr_value(channel, module, width);
            works &= *slot == value;
        }
        info!("module {:2} simple read check: {:02X}{:02X}{:02X}{:02X}",
              module, read_back[0], read_back[1], read_back[2], read_back[3]);
        works
    }

    fn rank_read_training(&mut self, channel: usize, rank: usize, modules: usize,
                          width: usize, taps: usize, repeats: u32) -> bool {
        let mut good = true;
        self.enter_rptm(channel, rank);
        for module in 0..modules {
            info!("training module {:2}", module);
            let preamble_cycle = match self.find_read_preamble_cycle(channel, rank, module,
                                                                     width, taps) {
                Some(cycle) => cycle,
                None => {
                    error!("no read preamble found for module {:2}", module);
                    good = false;
                    continue
                }
            };
            info!("read preamble starts in cycle {:2}", preamble_cycle);
            good &= self.read_training_data_scan(channel, rank, module, width, taps,
                                                 preamble_cycle, repeats);
        }
        self.exit_rptm(channel, rank);
        good
    }

    /// Checks run outside of RPTM: serial numbers, then the scratch pad
    /// round trip when the DRAM is reached directly.
    fn rank_read_check(&mut self, channel: usize, rank: usize, modules: usize, width: usize,
                       read_back_check: bool) -> bool {
        for module in 0..modules {
            let serial = self.read_serial_number(channel, rank, module, width);
            info!("channel {} rank {:2} module {:2} serial number 0x{:010X}",
                  channel_name(channel), rank, module, serial);
        }

        let mut good = true;
        if read_back_check {
            for module in 0..modules {
                if !self.simple_read_check(channel, rank, module, width) {
                    warn!("simple read check failed for module {:2}", module);
                    good = false;
                }
            }
        }

        if log_enabled!(Level::Trace) {
            for module in 0..modules {
                trace!("channel {} rank {} module {}", channel_name(channel), rank, module);
                self.read_registers(channel, rank, module, width);
            }
        }
        good
    }

    /// Read training of every rank and channel of `ctx`.
    pub fn read_training(&mut self, ctx: &TrainingContext, config: &TrainingConfig) -> bool {
        let mut good = true;
        for channel in 0..ctx.channels {
            self.get_dimm_dq_remapping(channel, ctx.modules, ctx.die_width);
            info!("subchannel {} read training", channel_name(channel));
            for rank in 0..ctx.ranks {
                info!("training rank {:2}", rank);
                good &= self.rank_read_training(channel, rank, ctx.modules, ctx.die_width,
                                                ctx.max_delay_taps, config.check_repeats);
                if !good && !config.keep_going {
                    return false
                }
                let read_back = ctx.kind == TrainingKind::HostDram && !ctx.rdimm;
                good &= self.rank_read_check(channel, rank, ctx.modules, ctx.die_width,
                                             read_back);
                if !good && !config.keep_going {
                    return false
                }
            }
        }
        good
    }
}

#[cfg(test)]
mod tests {
    use crate::csr::{Csr, Injector, Phy};
    use crate::phy::sim;
    use super::*;

    #[test]
    fn serial_patterns_walk_every_bit() {
        for bit in 0..16 {
            assert!(SERIAL.contains(&(1 << bit)));
            assert!(SERIAL.contains(&!(1u16 << bit)));
        }
    }

    #[test]
    fn rptm_restores_mpr_defaults() {
        let mut phy = sim::phy();
        phy.exit_rptm(0, 0);
        // MR data sits on phases 2 and 3 of the burst
        let storage = Csr::Injector(0, Injector::CommandStorage);
        assert!(phy.bus.writes.iter().filter(|&&(csr, _)| csr == storage)
                                     .any(|&(_, value)| value == 0x3c));
        assert!(phy.bus.writes.iter().filter(|&&(csr, _)| csr == storage)
                                     .any(|&(_, value)| value == 0x5a));
    }

    #[test]
    fn preamble_is_found_in_first_cycle() {
        let mut phy = sim::phy();
        phy.bus.regs.insert(Csr::Phy(0, Phy::Preamble), PREAMBLE);
        // a preamble that never goes away keeps the scan running to the last cycle
        assert_eq!(phy.find_read_preamble_cycle(0, 0, 1, 8, 4), Some(0));
        assert_eq!(phy.bus.count(Csr::Phy(0, Phy::CkRdlyInc)), MAX_READ_CYCLE_DELAY);
    }

    #[test]
    fn missing_preamble() {
        let mut phy = sim::phy();
        assert_eq!(phy.find_read_preamble_cycle(0, 0, 0, 8, 2), None);
    }

    #[test]
    fn data_scan_without_eye_fails() {
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::DqRemapping(0), (0..40).map(|line| line % 8).collect());
        // rddata reads as zeros, which never matches the inverted patterns
        assert!(!phy.read_training_data_scan(0, 0, 0, 8, 2, 65, 1));
        assert_eq!(phy.bus.count(Csr::Phy(0, Phy::CkRdlyInc)), 64 + 3);
    }

    #[test]
    fn scratch_pad_mismatch() {
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::DqRemapping(0), vec![0; 40]);
        assert!(!phy.simple_read_check(0, 0, 0, 8));
    }

    #[test]
    fn fail_fast_stops_after_first_rank() {
        let mut phy = sim::phy();
        phy.settings.delays = 1;
        let mut ctx = TrainingContext::host_dram(&phy.settings);
        ctx.modules = 1;
        let config = TrainingConfig { check_repeats: 1, ..TrainingConfig::default() };
        ctx.channels = 2;
        assert!(!phy.read_training(&ctx, &config));
        // the second sub-channel is never touched
        assert!(!phy.bus.writes.iter().any(|&(csr, _)| match csr {
            Csr::Injector(1, _) | Csr::Phy(1, _) => true,
            _ => false
        }));
    }
}
