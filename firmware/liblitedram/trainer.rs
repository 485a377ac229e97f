//! Training relationships and the per-relationship signal callbacks.
//!
//! CS/CA training runs the same search between three pairs of endpoints:
//! the host and the DRAM, the host and the RCD, and the RCD and the DRAM.
//! What differs is how each endpoint is put into a training mode, how a
//! sample is taken and which delay line is moved; [`SignalTrainer`]
//! captures exactly that.

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::delay::{DelayControl, Line};
use crate::error::Result;
use crate::phy::{Ddr5Phy, PhySettings};

pub const MAX_CHANNELS: usize = 2;
pub const MAX_RANKS: usize = 2;
pub const MAX_CA_LINES: usize = 14;

/// Command bus line as seen by a training relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BusLine {
    Ck { channel: usize },
    Cs { channel: usize, rank: usize },
    Ca { channel: usize, rank: usize, line: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingKind {
    HostDram,
    HostRcd,
    RcdDram,
}

/// Sampling rate of the DCA inputs of the RCD, with its RW00 encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    Sdr1 = 0b00,
    Sdr2 = 0b10,
    Ddr  = 0b01,
}

pub trait SignalTrainer: DelayControl<Line = BusLine> {
    fn enter_cs_training(&mut self, channel: usize, rank: usize) -> Result<()>;
    fn exit_cs_training(&mut self, channel: usize, rank: usize) -> Result<()>;
    /// Bitmask of the modules that sampled CS_n correctly, one bit per
    /// module. `shift` selects which of the two alternating CS_n phases
    /// is asserted.
    fn check_cs(&mut self, channel: usize, rank: usize, shift: bool, modules: usize,
                width: usize) -> u32;

    fn enter_ca_training(&mut self, channel: usize, rank: usize) -> Result<()>;
    fn exit_ca_training(&mut self, channel: usize, rank: usize) -> Result<()>;
    fn check_ca(&mut self, channel: usize, rank: usize, line: usize, shift_back: usize) -> bool;

    /// Whether CA13 is connected. Only meaningful while in CA training.
    fn has_line13(&mut self, _channel: usize) -> bool {
        false
    }

    /// Puts the host side of the command bus in 1N mode.
    fn disable_dfi_2n_mode(&mut self);

    fn settle_ms(&mut self, interval: u64);
}

/// Everything one training relationship learns about the command bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingContext {
    pub kind: TrainingKind,
    pub rate: Rate,
    pub ranks: usize,
    pub channels: usize,
    /// Address lines wired to the PHY, used when resetting delays.
    pub all_ca_count: usize,
    pub die_width: usize,
    pub max_delay_taps: usize,
    /// Modules per channel.
    pub modules: usize,
    /// CA lines trained, 13 or 14 for a DRAM, 7 for an RCD.
    pub ca_lines: usize,
    pub success: bool,
    pub rdimm: bool,

    /// CS eye per rank, `[start, end)`.
    pub cs_window: [[[i32; 2]; MAX_RANKS]; MAX_CHANNELS],
    pub cs_coarse: [[i32; MAX_RANKS]; MAX_CHANNELS],
    pub cs_final: [[i32; MAX_RANKS]; MAX_CHANNELS],
    /// CA eye per line intersected over ranks, `[start, end)`.
    pub ca_window: [[[i32; 2]; MAX_CA_LINES]; MAX_CHANNELS],
    pub ca_final: [[i32; MAX_CA_LINES]; MAX_CHANNELS],
}

impl TrainingContext {
    fn with(kind: TrainingKind, settings: &PhySettings) -> TrainingContext {
        TrainingContext {
            kind,
            rate: Rate::Ddr,
            ranks: 1,
            channels: settings.channels().min(MAX_CHANNELS),
            all_ca_count: settings.address_lines,
            die_width: settings.dq_dqs_ratio,
            max_delay_taps: settings.delays,
            modules: settings.modules_per_channel(),
            ca_lines: 13,
            success: true,
            rdimm: false,
            cs_window: [[[0; 2]; MAX_RANKS]; MAX_CHANNELS],
            cs_coarse: [[0; MAX_RANKS]; MAX_CHANNELS],
            cs_final: [[0; MAX_RANKS]; MAX_CHANNELS],
            ca_window: [[[0; 2]; MAX_CA_LINES]; MAX_CHANNELS],
            ca_final: [[0; MAX_CA_LINES]; MAX_CHANNELS],
        }
    }

    /// Host talking directly to the DRAM. Only the first rank is trained
    /// since the PHY keeps a single set of command delays.
    pub fn host_dram(settings: &PhySettings) -> TrainingContext {
        TrainingContext::with(TrainingKind::HostDram, settings)
    }

    /// Host talking to the RCD of an RDIMM, which has 7 DCA lines.
    pub fn host_rcd(settings: &PhySettings) -> TrainingContext {
        TrainingContext {
            ranks: 2,
            channels: MAX_CHANNELS,
            modules: 1,
            ca_lines: 7,
            rdimm: true,
            ..TrainingContext::with(TrainingKind::HostRcd, settings)
        }
    }

    /// RCD output side, trained through RCD control words. The QCA
    /// control word moves every line at once.
    pub fn rcd_dram(settings: &PhySettings) -> TrainingContext {
        TrainingContext {
            ranks: 2,
            channels: MAX_CHANNELS,
            max_delay_taps: 64,
            ca_lines: 1,
            rdimm: true,
            ..TrainingContext::with(TrainingKind::RcdDram, settings)
        }
    }

    /// Channels selected by `channel`, `None` meaning all of them.
    pub fn channel_range(&self, channel: Option<usize>) -> core::ops::Range<usize> {
        match channel {
            Some(channel) => channel..channel + 1,
            None => 0..self.channels,
        }
    }
}

/// Direct Host->DRAM training through JEDEC CSTM and CATM.
pub struct HostDram<'a, B: CsrBus, C: Clock> {
    phy: &'a mut Ddr5Phy<B, C>,
}

impl<'a, B: CsrBus, C: Clock> HostDram<'a, B, C> {
    pub fn new(phy: &'a mut Ddr5Phy<B, C>) -> Self {
        HostDram { phy }
    }
}

/// PHY line driving a command bus line on the host side.
pub fn host_line(line: BusLine) -> Line {
    match line {
        BusLine::Ck { channel } => Line::Ck { channel },
        BusLine::Cs { channel, rank } => Line::Cs { channel, rank },
        BusLine::Ca { channel, line, .. } => Line::Ca { channel, line },
    }
}

impl<'a, B: CsrBus, C: Clock> DelayControl for HostDram<'a, B, C> {
    type Line = BusLine;

    fn reset_delay(&mut self, line: BusLine) {
        self.phy.reset_delay(host_line(line))
    }

    fn increment_delay(&mut self, line: BusLine) {
        self.phy.increment_delay(host_line(line))
    }
}

impl<'a, B: CsrBus, C: Clock> SignalTrainer for HostDram<'a, B, C> {
    fn enter_cs_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.phy.enter_cstm(channel, rank);
        Ok(())
    }

    fn exit_cs_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.phy.exit_cstm(channel, rank);
        Ok(())
    }

    fn check_cs(&mut self, channel: usize, rank: usize, shift: bool, modules: usize,
                width: usize) -> u32 {
        self.phy.cs_check(channel, rank, shift, modules, width)
    }

    fn enter_ca_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.phy.enter_catm(channel, rank);
        Ok(())
    }

    fn exit_ca_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.phy.exit_catm(channel, rank);
        Ok(())
    }

    fn check_ca(&mut self, channel: usize, rank: usize, line: usize, shift_back: usize) -> bool {
        self.phy.ca_check(channel, rank, line, shift_back)
    }

    fn has_line13(&mut self, channel: usize) -> bool {
        self.phy.has_line13(channel)
    }

    fn disable_dfi_2n_mode(&mut self) {
        self.phy.disable_dfi_2n_mode()
    }

    fn settle_ms(&mut self, interval: u64) {
        self.phy.spin_ms(interval)
    }
}


#[cfg(test)]
mod tests {
    use crate::delay::Line;
    use crate::phy::sim;
    use super::*;

    #[test]
    fn context_defaults() {
        let settings = sim::settings();
        let host = TrainingContext::host_dram(&settings);
        assert_eq!((host.ranks, host.channels, host.modules), (1, 2, 5));
        assert_eq!(host.ca_lines, 13);
        assert!(!host.rdimm && host.success);

        let rcd = TrainingContext::host_rcd(&settings);
        assert_eq!((rcd.ranks, rcd.modules, rcd.ca_lines), (2, 1, 7));

        let dram = TrainingContext::rcd_dram(&settings);
        assert_eq!((dram.max_delay_taps, dram.ca_lines, dram.modules), (64, 1, 5));
        assert!(dram.rdimm);
    }

    #[test]
    fn channel_selection() {
        let host = TrainingContext::host_dram(&sim::settings());
        assert_eq!(host.channel_range(None), 0..2);
        assert_eq!(host.channel_range(Some(1)), 1..2);
    }

    #[test]
    fn host_lines_ignore_rank_on_ca() {
        assert_eq!(host_line(BusLine::Ca { channel: 1, rank: 1, line: 4 }),
                   Line::Ca { channel: 1, line: 4 });
        assert_eq!(host_line(BusLine::Ck { channel: 0 }), Line::Ck { channel: 0 });
    }

    #[test]
    fn dca_rate_encoding() {
        assert_eq!(Rate::Ddr as u8, 0b01);
        assert_eq!(Rate::Sdr2 as u8, 0b10);
    }
}
