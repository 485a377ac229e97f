//! Write leveling and write data training.
//!
//! Write leveling aligns every die's DQS to the clock at the DRAM pins,
//! first externally (PHY cycle and output delay) and then internally with
//! the DRAM's own cycle alignment (WICA). The DQ lines are then swept
//! against real write/read round trips, once per Vref candidate, and the
//! DM line last if the die has it enabled.

use log::Level;

use crate::clock::Clock;
use crate::config::TrainingConfig;
use crate::csr::{Csr, CsrBus, Phy};
use crate::delay::{DelayControl, Lane, Line};
use crate::eye::{scan, split_index, Eye, Trace};
use crate::jedec::{channel_name, MODULE_BROADCAST};
use crate::phy::Ddr5Phy;
use crate::read::{MAX_READ_CYCLE_DELAY, SEEDS0, SEEDS1, SERIAL};
use crate::remap::{lfsr_next, serial_pattern};
use crate::trainer::TrainingContext;

pub const MAX_WRITE_CYCLE_DELAY: usize = MAX_READ_CYCLE_DELAY - 2;

/// WICA operands 0..7 (0 to -6 tCK) are mandatory, the rest optional.
const WICA_VALUES: u8 = 7;

/// MR5 OP[5].
pub const DM_ENABLE: u8 = 0x20;

const LFSR_WRITE_INVERT: u8 = 0x55;

const MAX_MODULES: usize = 16;

/// Adds a quarter clock to a DQS position, carrying into the cycle delay.
pub fn add_quarter_cycle(cycle: usize, delay: usize, taps: usize) -> (usize, usize) {
    let delay = delay + taps / 4;
    if delay >= taps {
        (cycle + 1, delay - taps)
    } else {
        (cycle, delay)
    }
}

/// Write data of one module for an LFSR seed. x4 dies carry one byte per
/// phase, wider dies two, each from its own LFSR step.
pub fn lfsr_write_data(seed: u8, width: usize) -> [u32; 8] {
    let mut lfsr = seed;
    let mut data = [0; 8];
    for slot in data.iter_mut() {
        *slot = (lfsr ^ LFSR_WRITE_INVERT) as u32;
        lfsr = lfsr_next(lfsr);
        if width > 4 {
            *slot |= ((lfsr ^ LFSR_WRITE_INVERT) as u32) << 8;
            lfsr = lfsr_next(lfsr);
        }
    }
    data
}

fn lfsr_data_mask(width: usize) -> u32 {
    if width > 4 { 0xffff } else { 0xff }
}

/// Keeps the Vref values that reach the widest write eye.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VrefPicker {
    widest: Option<(i32, u8, u8)>,
}

impl VrefPicker {
    pub fn record(&mut self, vref: u8, width: i32) {
        if width <= 0 {
            return
        }
        self.widest = match self.widest {
            Some((widest, first, _)) if width == widest => Some((widest, first, vref)),
            Some((widest, _, _)) if width < widest => self.widest,
            _ => Some((width, vref, vref)),
        };
    }

    /// Middle of the Vref range with the widest eye.
    pub fn best(&self) -> Option<u8> {
        self.widest.map(|(_, first, last)| ((first as u16 + last as u16 + 1) / 2) as u8)
    }
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    pub fn enter_wltm(&mut self, channel: usize, rank: usize) {
        self.bus.write(Csr::Phy(channel, Phy::WlevelEn), 1);
        self.spin_us(1);
        let single_cycle = if self.session.single_cycle_mpc { 1 << 4 } else { 0 };
        self.send_mrw(channel, rank, MODULE_BROADCAST, 2, 2 | single_cycle);
    }

    /// Leaves WLTM. MR2 OP[7] stays set so the internal write timing found
    /// during leveling remains in use.
    pub fn exit_wltm(&mut self, channel: usize, rank: usize) {
        let flags = self.session.mr2_flags();
        self.send_mrw(channel, rank, MODULE_BROADCAST, 2, flags);
        self.bus.write(Csr::Phy(channel, Phy::WlevelEn), 0);
        self.clear_phy_fifos(channel);
    }

    fn wr_dqs_stable(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                     repeats: u32) -> bool {
        let mut works = true;
        for _ in 0..repeats {
            works &= self.wr_dqs_check(channel, rank, module, width);
        }
        works
    }

    /// First DQS cycle delay, at output delay 0, for which the DRAM reports
    /// the strobe sampled the clock high.
    fn wltm_align_external_cycle(&mut self, channel: usize, rank: usize, module: usize,
                                 width: usize, repeats: u32) -> Option<usize> {
        let lane = Lane::new(channel, module, width);
        // strobes are sent no earlier than CWL/2 after the write command
        let settings = &self.settings;
        let first = (settings.cwl / 2 - settings.min_wr_latency).max(0) as usize;

        self.set_delay(Line::WriteDqsCycle(lane), first);
        for cycle in first..MAX_WRITE_CYCLE_DELAY {
            let works = self.wr_dqs_stable(channel, rank, module, width, repeats);
            debug!("{:2}|{}", cycle, works as u8);
            if works {
                return Some(cycle)
            }
            self.increment_delay(Line::WriteDqsCycle(lane));
        }
        None
    }

    /// Steps back one cycle from `cycle` and sweeps the DQS output delay
    /// until the strobe edge shows up, moving forward a cycle at a time.
    fn wltm_align_to_eye_edge(&mut self, channel: usize, rank: usize, module: usize,
                              width: usize, taps: usize, repeats: u32,
                              cycle: &mut usize) -> Option<usize> {
        let lane = Lane::new(channel, module, width);
        let mut trace = Trace::new();
        *cycle = cycle.saturating_sub(1);
        self.set_delay(Line::WriteDqsCycle(lane), *cycle);

        debug!("DQS edge scan");
        loop {
            trace.clear();
            let eye = scan(self, Line::WriteDqs(lane), taps, repeats, &mut trace, |phy| {
                phy.wr_dqs_check(channel, rank, module, width)
            });
            debug!("{:2}|{}|", cycle, trace);
            if let Some(start) = eye.start {
                return Some(start as usize)
            }
            if *cycle + 1 >= MAX_WRITE_CYCLE_DELAY {
                return None
            }
            self.increment_delay(Line::WriteDqsCycle(lane));
            *cycle += 1;
        }
    }

    /// Enables internal write timing and searches the first WICA value
    /// that makes the strobe sample high.
    fn wltm_align_internal_cycle(&mut self, channel: usize, rank: usize, module: usize,
                                 width: usize, repeats: u32) -> bool {
        self.session.internal_write_timing = true;
        let flags = self.session.mr2_flags();
        self.send_mrw(channel, rank, module as u8, 2, 2 | flags);

        for wica in 0..WICA_VALUES {
            self.send_mrw(channel, rank, module as u8, 3, wica);
            let works = (0..repeats).all(|_| self.wr_dqs_check(channel, rank, module, width));
            debug!("WICA {}: {}", wica, works as u8);
            if works {
                return true
            }
        }
        false
    }

    /// External then internal write leveling of one die. Returns the final
    /// DQS cycle delay.
    pub fn write_leveling(&mut self, ctx: &TrainingContext, config: &TrainingConfig,
                          channel: usize, rank: usize, module: usize) -> Option<usize> {
        let width = ctx.die_width;
        let taps = ctx.max_delay_taps;
        let repeats = config.check_repeats;
        let lane = Lane::new(channel, module, width);
        info!("write leveling module {:2}", module);

        // the leveling pulse is 2 tCK wide, find the cycle first
        self.reset_delay(Line::WriteDqs(lane));
        let mut cycle = match self.wltm_align_external_cycle(channel, rank, module, width,
                                                             repeats) {
            Some(cycle) => cycle,
            None => {
                error!("no write leveling transition cycle for module {:2}", module);
                return None
            }
        };
        debug!("transition starts in cycle {:2} (adjusted {:2})",
               cycle, cycle as i32 + self.settings.min_wr_latency);

        let delay = match self.wltm_align_to_eye_edge(channel, rank, module, width, taps,
                                                      repeats, &mut cycle) {
            Some(delay) => delay,
            None => {
                error!("no DQS edge found for module {:2}", module);
                return None
            }
        };
        debug!("cycle {:2} delay {:2}", cycle, delay);

        // -0.75 tCK for a 2 tCK write preamble
        let (mut cycle, delay) = add_quarter_cycle(cycle.saturating_sub(1), delay, taps);
        self.set_delay(Line::WriteDqsCycle(lane), cycle);
        self.set_delay(Line::WriteDqs(lane), delay);

        if !self.wltm_align_internal_cycle(channel, rank, module, width, repeats) {
            warn!("no working WICA value for module {:2}", module);
        }
        let delay = match self.wltm_align_to_eye_edge(channel, rank, module, width, taps,
                                                      repeats, &mut cycle) {
            Some(delay) => delay,
            None => {
                error!("no DQS edge found after internal leveling for module {:2}", module);
                return None
            }
        };

        // +1.25 tCK
        let (cycle, delay) = add_quarter_cycle(cycle + 1, delay, taps);
        info!("module {:2} DQS cycle {:2} (adjusted {:2}) delay {:2}",
              module, cycle, cycle as i32 + self.settings.min_wr_latency, delay);
        self.set_delay(Line::WriteDqsCycle(lane), cycle);
        self.set_delay(Line::WriteDqs(lane), delay);
        Some(cycle)
    }

    fn stage_write_data(&mut self, channel: usize, module: usize, width: usize,
                        data: &[u32; 8]) {
        for (phase, &value) in data.iter().enumerate() {
            self.set_data_module_phase(channel, module, width, phase, value);
        }
    }

    /// Writes zeros so the next pattern starts from a known state.
    fn clear_write_data(&mut self, channel: usize, rank: usize, module: usize, width: usize) {
        self.stage_write_data(channel, module, width, &[0; 8]);
        self.send_write(channel, rank);
    }

    fn compare_write_data(&mut self, channel: usize, module: usize, width: usize,
                          expected: &[u32; 8], mask: u32) -> bool {
        for (phase, &value) in expected.iter().enumerate() {
            let data = self.data_module_phase(channel, module, width, phase);
            if data & mask != value & mask {
                if log_enabled!(Level::Trace) {
                    trace!("phase {}: wrote {:04x} read {:04x}", phase, value & mask, data & mask);
                }
                return false
            }
        }
        true
    }

    fn write_serial_check(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                          repeats: u32) -> bool {
        let mask = u32::MAX >> (32 - 2 * width);
        for &pattern in SERIAL.iter() {
            let data = serial_pattern(pattern, 0, width);
            self.stage_write_data(channel, module, width, &data);
            for _ in 0..repeats {
                self.send_write(channel, rank);
                self.send_read(channel, rank);
                if !self.compare_write_data(channel, module, width, &data, mask) {
                    return false
                }
            }
            self.clear_write_data(channel, rank, module, width);
        }
        true
    }

    fn write_lfsr_check(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                        repeats: u32) -> bool {
        for &seed in SEEDS0.iter().chain(SEEDS1.iter()) {
            let data = lfsr_write_data(seed, width);
            for _ in 0..repeats {
                self.stage_write_data(channel, module, width, &data);
                self.send_write(channel, rank);
                self.send_read(channel, rank);
                if !self.compare_write_data(channel, module, width, &data,
                                            lfsr_data_mask(width)) {
                    return false
                }
            }
            self.clear_write_data(channel, rank, module, width);
        }
        true
    }

    /// Only `byte` was written unmasked, so only that beat may hold LFSR data.
    fn compare_dm_write_data(&mut self, channel: usize, module: usize, width: usize, seed: u8,
                             byte: usize) -> bool {
        let mut lfsr = seed;
        for _ in 0..byte {
            lfsr = lfsr_next(lfsr);
        }
        let mut data = self.data_module_phase(channel, module, width, byte / 2);
        if byte & 1 != 0 {
            data >>= 8;
        }
        data & 0xff == lfsr as u32
    }

    fn write_dm_lfsr_check(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                           byte: usize, mr5: u8) -> bool {
        for &seed in SEEDS0.iter().chain(SEEDS1.iter()) {
            self.send_mrw(channel, rank, module as u8, 5, mr5 & !DM_ENABLE);
            self.clear_write_data(channel, rank, module, width);
            self.send_mrw(channel, rank, module as u8, 5, mr5);

            self.stage_write_data(channel, module, width, &lfsr_write_data(seed, width));
            self.send_write_byte(channel, rank, module, byte);
            self.send_read(channel, rank);
            let works = self.compare_dm_write_data(channel, module, width, seed, byte);
            self.clear_write_data(channel, rank, module, width);
            if !works {
                return false
            }
        }
        true
    }

    /// Sweeps DQ cycle and output delay around the DQS cycle found by
    /// write leveling. A tap works when both serial and LFSR patterns
    /// survive a write/read round trip.
    pub fn write_data_scan(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                           taps: usize, strobe_cycle: usize, repeats: u32) -> Eye {
        let lane = Lane::new(channel, module, width);
        let mut eye = Eye::new();
        let mut serial_eye = Eye::new();
        let mut trace = Trace::new();

        let first = strobe_cycle.saturating_sub(3);
        self.set_delay(Line::WriteDqCycle(lane), first);
        let mut cycle = first;
        while !eye.is_closed() && !serial_eye.is_closed() &&
              cycle < MAX_WRITE_CYCLE_DELAY && cycle < strobe_cycle + 5 {
            trace.clear();
            self.reset_delay(Line::WriteDq(lane));
            for tap in 0..taps {
                let works = if !self.write_serial_check(channel, rank, module, width, repeats) {
                    0
                } else if !self.write_lfsr_check(channel, rank, module, width, repeats) {
                    1
                } else {
                    3
                };
                trace.push(works);
                let index = (cycle * taps + tap) as i32;
                eye.observe(index, works == 3);
                serial_eye.observe(index, works & 1 != 0);
                self.increment_delay(Line::WriteDq(lane));
            }
            debug!("{:2}|{}|", cycle, trace);
            self.increment_delay(Line::WriteDqCycle(lane));
            cycle += 1;
        }
        eye
    }

    /// Runs a write data scan for every Vref candidate and leaves MR10 at
    /// the middle of the range that gave the widest eye.
    fn dq_vref_scan(&mut self, ctx: &TrainingContext, config: &TrainingConfig, channel: usize,
                    rank: usize, module: usize, strobe_cycle: usize) -> Option<u8> {
        let width = ctx.die_width;
        let taps = ctx.max_delay_taps;
        let mut picker = VrefPicker::default();

        for vref in config.vref_range.clone() {
            self.send_mrw(channel, rank, module as u8, 10, vref);
            self.spin_us(1);
            let eye = self.write_data_scan(channel, rank, module, width, taps, strobe_cycle,
                                           config.write_check_repeats);
            debug!("vref {:02X}: eye width {:3}", vref, eye.width());
            picker.record(vref, eye.width());
        }

        let best = picker.best();
        match best {
            Some(vref) => {
                info!("module {:2} best Vref {:02X}", module, vref);
                self.send_mrw(channel, rank, module as u8, 10, vref);
                self.spin_us(1);
            }
            None => error!("module {:2} has no write eye at any Vref", module),
        }
        self.send_mrr(channel, rank, 10);
        debug!("MR10: {:02X}", self.recover_mrr_value(channel, module, width));
        best
    }

    /// One dimensional scan of the DM output delay. A tap works when every
    /// byte of the burst can be written on its own.
    pub fn dm_scan(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                   taps: usize, mr5: u8) -> bool {
        let lane = Lane::new(channel, module, width);
        let mut eye = Eye::new();
        let mut trace = Trace::new();

        self.reset_delay(Line::WriteDm(lane));
        for tap in 0..taps {
            if eye.is_closed() {
                break
            }
            let works = (0..16).all(|byte| {
                self.write_dm_lfsr_check(channel, rank, module, width, byte, mr5)
            });
            trace.push(works as u8);
            eye.observe(tap as i32, works);
            if tap + 1 == taps {
                eye.close_at(tap as i32);
            }
            self.increment_delay(Line::WriteDm(lane));
        }
        debug!("m{:2} DM|{}|", module, trace);

        let center = eye.center().unwrap_or(0).max(0) as usize;
        info!("module {:2} DM eye width {:2}, center {:2}", module, eye.width(), center);
        self.set_delay(Line::WriteDm(lane), center);
        eye.is_closed()
    }

    /// Vref and DQ training of one die, then DM if MR5 has it enabled.
    pub fn module_vref_scan(&mut self, ctx: &TrainingContext, config: &TrainingConfig,
                            channel: usize, rank: usize, module: usize,
                            strobe_cycle: usize) -> bool {
        let width = ctx.die_width;
        let taps = ctx.max_delay_taps;
        let lane = Lane::new(channel, module, width);

        self.send_mrr(channel, rank, 5);
        let mr5 = self.recover_mrr_value(channel, module, width);
        debug!("module {:2} MR5: {:02X}", module, mr5);
        self.send_mrw(channel, rank, module as u8, 5, mr5 & !DM_ENABLE);

        self.reset_delay(Line::WriteDqCycle(lane));
        self.reset_delay(Line::WriteDq(lane));
        let best = self.dq_vref_scan(ctx, config, channel, rank, module, strobe_cycle);
        if best.is_none() && !config.keep_going {
            return false
        }

        self.reset_delay(Line::WriteDqCycle(lane));
        self.reset_delay(Line::WriteDq(lane));
        let eye = self.write_data_scan(channel, rank, module, width, taps, strobe_cycle,
                                       config.write_check_repeats);
        self.reset_delay(Line::WriteDqCycle(lane));
        self.reset_delay(Line::WriteDq(lane));
        if let (true, Some(center)) = (eye.is_closed(), eye.center()) {
            let (cycle, delay) = split_index(center, taps);
            info!("module {:2} write eye width {:3}, center cycle {:2} delay {:2}",
                  module, eye.width(), cycle, delay);
            self.set_delay(Line::WriteDqCycle(lane), cycle);
            self.set_delay(Line::WriteDq(lane), delay);
        }

        let mut good = best.is_some();
        if mr5 & DM_ENABLE != 0 && width > 4 {
            good &= self.dm_scan(channel, rank, module, width, taps, mr5);
        }
        good
    }

    /// Write leveling and write data training of every rank and channel.
    pub fn write_training(&mut self, ctx: &TrainingContext, config: &TrainingConfig) -> bool {
        let mut good = true;
        for channel in 0..ctx.channels {
            info!("subchannel {} write leveling", channel_name(channel));
            for rank in 0..ctx.ranks {
                let mut strobe_cycles = [None; MAX_MODULES];
                self.enter_wltm(channel, rank);
                for (module, strobe) in strobe_cycles.iter_mut().enumerate().take(ctx.modules) {
                    *strobe = self.write_leveling(ctx, config, channel, rank, module);
                    good &= strobe.is_some();
                    if !good && !config.keep_going {
                        break
                    }
                }
                self.exit_wltm(channel, rank);
                if !good && !config.keep_going {
                    return false
                }

                if log_enabled!(Level::Trace) {
                    for module in 0..ctx.modules {
                        self.read_registers(channel, rank, module, ctx.die_width);
                    }
                }

                info!("DQ write training");
                for (module, strobe) in strobe_cycles.iter().enumerate().take(ctx.modules) {
                    good &= match *strobe {
                        Some(cycle) => self.module_vref_scan(ctx, config, channel, rank,
                                                             module, cycle),
                        None => false,
                    };
                    if !good && !config.keep_going {
                        return false
                    }
                }
            }
        }
        good
    }
}
