//! PHY delay lines.
//!
//! Every line is an increment-only counter with a reset pulse, there is no
//! way to load a tap value directly. Absolute delays are therefore always
//! reached through [`DelayControl::set_delay`].

use crate::clock::Clock;
use crate::csr::{Csr, CsrBus, Phy, PhyCommon};
use crate::phy::Ddr5Phy;

/// A DQS group: one die of a sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub channel: usize,
    pub module: usize,
    pub width: usize,
}

impl Lane {
    pub fn new(channel: usize, module: usize, width: usize) -> Lane {
        Lane { channel, module, width }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Ck { channel: usize },
    Cs { channel: usize, rank: usize },
    Ca { channel: usize, line: usize },
    Par { channel: usize, rank: usize },
    /// Read capture cycle.
    ReadCycle(Lane),
    /// Read DQS and all DQ input delays together.
    ReadDq(Lane),
    ReadPerDq(Lane, usize),
    /// Write DQS cycle.
    WriteDqsCycle(Lane),
    WriteDqs(Lane),
    /// Write DQ cycle.
    WriteDqCycle(Lane),
    /// All DQ output delays together.
    WriteDq(Lane),
    WritePerDq(Lane, usize),
    WriteDm(Lane),
}

pub trait DelayControl {
    type Line: Copy;

    /// Returns the line to tap 0.
    fn reset_delay(&mut self, line: Self::Line);
    /// Advances the line by one tap, relative to wherever it is now.
    fn increment_delay(&mut self, line: Self::Line);

    /// Puts the line at `taps`, independent of its previous state.
    fn set_delay(&mut self, line: Self::Line, taps: usize) {
        self.reset_delay(line);
        for _ in 0..taps {
            self.increment_delay(line)
        }
    }
}

/// Diagnostic delay readouts. Never used to restore state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readout {
    Cs,
    Ca,
    ReadDq,
    ReadDqs,
    ReadCycle,
    ReadPreambleCycle,
    WriteDqs,
    WriteDq,
    WriteDm,
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn phy_select(&mut self, channel: usize, select: usize, width: usize) {
        let (mask, select) = if width == 8 { (3, select * 2) } else { (1, select) };
        self.bus.write(Csr::Phy(channel, Phy::DlySel), mask << select);
        self.spin_us(1);
    }

    fn phy_deselect(&mut self, channel: usize) {
        self.bus.write(Csr::Phy(channel, Phy::DlySel), 0);
        self.spin_us(1);
    }

    fn phy_dq_select(&mut self, channel: usize, dq: usize) {
        if self.settings.delay_per_dq {
            self.bus.write(Csr::Phy(channel, Phy::DqDlySel), 1 << dq);
            self.spin_us(1);
        }
    }

    fn phy_dq_deselect(&mut self, channel: usize) {
        if self.settings.delay_per_dq {
            self.bus.write(Csr::Phy(channel, Phy::DqDlySel), 0);
            self.spin_us(1);
        }
    }

    fn pulse(&mut self, csr: Csr) {
        self.bus.write(csr, 1)
    }

    /// Pulses `reg` on every DQ of the selected lane.
    fn pulse_dq(&mut self, channel: usize, width: usize, reg: Phy) {
        if self.settings.delay_per_dq {
            for dq in 0..width {
                self.phy_dq_select(channel, dq);
                self.pulse(Csr::Phy(channel, reg));
                self.phy_dq_deselect(channel);
            }
        } else {
            self.pulse(Csr::Phy(channel, reg))
        }
    }

    fn lane_action(&mut self, lane: Lane, action: impl FnOnce(&mut Self)) {
        self.phy_select(lane.channel, lane.module, lane.width);
        action(self);
        self.phy_deselect(lane.channel);
    }

    fn line_action(&mut self, line: Line, reset: bool) {
        let pick = move |rst: Phy, inc: Phy| if reset { rst } else { inc };
        match line {
            Line::Ck { channel } => {
                self.phy_select(channel, 0, 0);
                self.pulse(Csr::PhyCommon(if reset { PhyCommon::CkdlyRst } else { PhyCommon::CkdlyInc }));
                self.phy_deselect(channel);
            }
            Line::Cs { channel, rank } => {
                self.phy_select(channel, rank, 0);
                self.pulse(Csr::Phy(channel, pick(Phy::CsdlyRst, Phy::CsdlyInc)));
                self.phy_deselect(channel);
            }
            Line::Ca { channel, line } => {
                self.phy_select(channel, line, 0);
                self.pulse(Csr::Phy(channel, pick(Phy::CadlyRst, Phy::CadlyInc)));
                self.phy_deselect(channel);
            }
            Line::Par { channel, rank } => {
                self.phy_select(channel, rank, 0);
                self.pulse(Csr::Phy(channel, pick(Phy::PardlyRst, Phy::PardlyInc)));
                self.phy_deselect(channel);
            }
            Line::ReadCycle(lane) => self.lane_action(lane, |phy| {
                phy.pulse(Csr::Phy(lane.channel, pick(Phy::CkRdlyRst, Phy::CkRdlyInc)))
            }),
            Line::ReadDq(lane) => self.lane_action(lane, |phy| {
                if phy.settings.input_delay_capable {
                    phy.pulse(Csr::Phy(lane.channel, pick(Phy::RdlyDqsRst, Phy::RdlyDqsInc)));
                }
                phy.pulse_dq(lane.channel, lane.width, pick(Phy::RdlyDqRst, Phy::RdlyDqInc))
            }),
            Line::ReadPerDq(lane, dq) => {
                self.phy_dq_select(lane.channel, dq);
                self.lane_action(lane, |phy| {
                    phy.pulse(Csr::Phy(lane.channel, pick(Phy::RdlyDqRst, Phy::RdlyDqInc)))
                });
                self.phy_dq_deselect(lane.channel);
            }
            Line::WriteDqsCycle(lane) => self.lane_action(lane, |phy| {
                phy.pulse(Csr::Phy(lane.channel, pick(Phy::CkWdlyRst, Phy::CkWdlyInc)))
            }),
            Line::WriteDqs(lane) => self.lane_action(lane, |phy| {
                phy.pulse(Csr::Phy(lane.channel, pick(Phy::WdlyDqsRst, Phy::WdlyDqsInc)))
            }),
            Line::WriteDqCycle(lane) => self.lane_action(lane, |phy| {
                phy.pulse(Csr::Phy(lane.channel, pick(Phy::CkWddlyRst, Phy::CkWddlyInc)))
            }),
            Line::WriteDq(lane) => self.lane_action(lane, |phy| {
                phy.pulse_dq(lane.channel, lane.width, pick(Phy::WdlyDqRst, Phy::WdlyDqInc))
            }),
            Line::WritePerDq(lane, dq) => self.lane_action(lane, |phy| {
                phy.phy_dq_select(lane.channel, dq);
                phy.pulse(Csr::Phy(lane.channel, pick(Phy::WdlyDqRst, Phy::WdlyDqInc)));
                phy.phy_dq_deselect(lane.channel);
            }),
            Line::WriteDm(lane) => self.lane_action(lane, |phy| {
                phy.pulse(Csr::Phy(lane.channel, pick(Phy::WdlyDmRst, Phy::WdlyDmInc)))
            }),
        }
    }

    /// Current tap of a line, for diagnostics.
    pub fn read_delay(&mut self, readout: Readout, channel: usize, index: usize,
                      width: usize) -> u32 {
        let reg = match readout {
            Readout::Cs => Phy::Csdly,
            Readout::Ca => Phy::Cadly,
            Readout::ReadDq => Phy::RdlyDq,
            Readout::ReadDqs => Phy::RdlyDqs,
            Readout::ReadCycle => Phy::CkRddly,
            Readout::ReadPreambleCycle => Phy::CkRddlyPreamble,
            Readout::WriteDqs => Phy::WdlyDqs,
            Readout::WriteDq => Phy::WdlyDq,
            Readout::WriteDm => Phy::WdlyDm,
        };
        // per-nibble registers are selected in x4 granularity
        let (select, select_width) = match readout {
            Readout::Cs | Readout::Ca => (index, 0),
            Readout::ReadDq | Readout::ReadCycle => (index, width),
            _ if width == 8 => (index * 2, 4),
            _ => (index, 4),
        };
        self.phy_select(channel, select, select_width);
        let value = self.bus.read(Csr::Phy(channel, reg));
        self.phy_deselect(channel);
        value
    }

    /// Preamble pattern captured by the last read on `lane`.
    pub fn captured_preamble(&mut self, lane: Lane) -> u32 {
        let module = if lane.width == 8 { lane.module * 2 } else { lane.module };
        self.phy_select(lane.channel, module, 4);
        let value = self.bus.read(Csr::Phy(lane.channel, Phy::Preamble));
        self.phy_deselect(lane.channel);
        value
    }

    pub fn reset_all_phy_regs(&mut self, channels: usize, ranks: usize, addresses: usize,
                              modules: usize, width: usize) {
        for channel in 0..channels {
            self.reset_delay(Line::Ck { channel });
            for rank in 0..ranks {
                self.reset_delay(Line::Cs { channel, rank });
                self.reset_delay(Line::Par { channel, rank });
                for line in 0..addresses {
                    self.reset_delay(Line::Ca { channel, line });
                }
            }
        }
        for channel in 0..channels {
            for module in 0..modules {
                let lane = Lane::new(channel, module, width);
                self.reset_delay(Line::ReadCycle(lane));
                self.reset_delay(Line::ReadDq(lane));
            }
        }
        for channel in 0..channels {
            for module in 0..modules {
                let lane = Lane::new(channel, module, width);
                self.reset_delay(Line::WriteDqsCycle(lane));
                self.reset_delay(Line::WriteDqs(lane));
                self.reset_delay(Line::WriteDqCycle(lane));
                self.reset_delay(Line::WriteDq(lane));
                self.reset_delay(Line::WriteDm(lane));
            }
        }
    }
}

impl<B: CsrBus, C: Clock> DelayControl for Ddr5Phy<B, C> {
    type Line = Line;

    fn reset_delay(&mut self, line: Line) {
        self.line_action(line, true)
    }

    fn increment_delay(&mut self, line: Line) {
        self.line_action(line, false)
    }
}

#[cfg(test)]
pub mod sim {
    use std::collections::BTreeMap;
    use super::DelayControl;

    /// Modulo counters keyed by line, as the hardware behaves.
    #[derive(Debug, Default)]
    pub struct SimDelays {
        pub taps: usize,
        pub lines: BTreeMap<usize, usize>,
    }

    impl DelayControl for SimDelays {
        type Line = usize;

        fn reset_delay(&mut self, line: usize) {
            self.lines.insert(line, 0);
        }

        fn increment_delay(&mut self, line: usize) {
            let taps = self.taps;
            let tap = self.lines.entry(line).or_insert(0);
            *tap = (*tap + 1) % taps;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use crate::csr::{Csr, Phy, PhyCommon};
    use crate::phy::sim;
    use super::*;

    proptest! {
        #[test]
        fn set_delay_ignores_history(history in proptest::collection::vec(0usize..3, 0..200),
                                     target in 0usize..64) {
            let mut delays = super::sim::SimDelays { taps: 64, ..Default::default() };
            for step in history {
                match step {
                    0 => delays.reset_delay(7),
                    _ => delays.increment_delay(7),
                }
            }
            delays.set_delay(7, target);
            prop_assert_eq!(delays.lines[&7], target);
        }
    }

    #[test]
    fn ca_lines_are_selected_one_hot() {
        let mut phy = sim::phy();
        phy.set_delay(Line::Ca { channel: 1, line: 5 }, 3);
        assert_eq!(phy.bus.count(Csr::Phy(1, Phy::CadlyRst)), 1);
        assert_eq!(phy.bus.count(Csr::Phy(1, Phy::CadlyInc)), 3);
        assert!(phy.bus.writes.contains(&(Csr::Phy(1, Phy::DlySel), 1 << 5)));
        assert_eq!(phy.bus.regs[&Csr::Phy(1, Phy::DlySel)], 0);
    }

    #[test]
    fn x8_lanes_select_two_nibbles() {
        let mut phy = sim::phy();
        phy.reset_delay(Line::WriteDqs(Lane::new(0, 2, 8)));
        assert!(phy.bus.writes.contains(&(Csr::Phy(0, Phy::DlySel), 0b11 << 4)));
        assert_eq!(phy.bus.count(Csr::Phy(0, Phy::WdlyDqsRst)), 1);
    }

    #[test]
    fn clock_delay_is_shared() {
        let mut phy = sim::phy();
        phy.increment_delay(Line::Ck { channel: 1 });
        assert_eq!(phy.bus.count(Csr::PhyCommon(PhyCommon::CkdlyInc)), 1);
    }

    #[test]
    fn per_dq_read_delays() {
        let mut phy = sim::phy();
        phy.settings.delay_per_dq = true;
        phy.reset_delay(Line::ReadDq(Lane::new(0, 0, 8)));
        assert_eq!(phy.bus.count(Csr::Phy(0, Phy::RdlyDqsRst)), 1);
        assert_eq!(phy.bus.count(Csr::Phy(0, Phy::RdlyDqRst)), 8);
    }
}
