//! RCD training modes (JESD82-511 chapter 5).
//!
//! Host->RCD training uses DCSTM and DCATM: the PHY moves its own CS and
//! CA delays while the RCD reports what it samples on ALERT_n. RCD->DRAM
//! training uses QCSTM and QCATM: the delays are RCD control words and
//! the DRAM answers on DQ as in direct training.

use crate::clock::Clock;
use crate::config::TrainingConfig;
use crate::csr::{Csr, CsrBus, PhyCommon};
use crate::delay::DelayControl;
use crate::error::{Error, Result};
use crate::injector::{Payload, Store};
use crate::phy::Ddr5Phy;
use crate::rcd::{rcd_id, Rap};
use crate::trainer::{host_line, BusLine, Rate, SignalTrainer};

const DELAY_ENABLE: u8 = 1 << 7;
const DELAY_MASK: u8 = 0x3f;
/// QACK..QDCK output delays.
const QCK_DELAY: u8 = 0x12;
/// QACS0_n, QACS1_n, QBCS0_n, QBCS1_n output delays.
const QCS_DELAY: u8 = 0x17;
/// QACA and QBCA output delays.
const QCA_DELAY: u8 = 0x1b;

/// DCA lines of one half of a DDR DCA word.
const DCA_HALF: usize = 7;

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn sample_alert(&mut self, reduce: u32) -> bool {
        self.bus.write(Csr::PhyCommon(PhyCommon::SampleAlert), 0);
        self.bus.write(Csr::PhyCommon(PhyCommon::AlertReduce), reduce);
        self.bus.write(Csr::PhyCommon(PhyCommon::ResetAlert), 1);
        self.spin_us(1);
        self.bus.write(Csr::PhyCommon(PhyCommon::SampleAlert), 1);
        self.spin_us(10);
        self.bus.write(Csr::PhyCommon(PhyCommon::SampleAlert), 0);
        self.bus.read(Csr::PhyCommon(PhyCommon::Alert)) != 0
    }

    /// True if ALERT_n stayed low for the whole window.
    pub fn alert_or_reduce(&mut self) -> bool {
        !self.sample_alert(0x0)
    }

    /// True if ALERT_n stayed high for the whole window.
    pub fn alert_and_reduce(&mut self) -> bool {
        self.sample_alert(0x3)
    }

    fn rcd_get(&mut self, rcd: u8, function: usize, reg: u8) -> Result<u8> {
        let data = self.rcd_read(rcd, Rap::new(function, reg & !0b11))?;
        Ok(data[(reg & 0b11) as usize])
    }

    fn rcd_put(&mut self, rcd: u8, function: usize, reg: u8, value: u8) -> Result<()> {
        let result = self.rcd_write(rcd, Rap::new(function, reg), &[value]);
        self.spin_us(10);
        result
    }

    fn rcd_put_all(&mut self, rcd: u8, function: usize, regs: &[u8], value: u8) -> Result<()> {
        for &reg in regs {
            self.rcd_put(rcd, function, reg, value)?;
        }
        Ok(())
    }

    /// Read-modify-write of RW00..RW03, checked by reading it back.
    fn rcd_modify_checked<F>(&mut self, rcd: u8, f: F) -> Result<()>
        where F: FnOnce(&mut [u8; 5])
    {
        let written = self.rcd_modify(rcd, Rap::new(0, 0x00), 4, f)?;
        self.rcd_verify(rcd, Rap::new(0, 0x00), &written[..4])
    }

    pub fn enter_dcstm(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.rcd_modify_checked(rcd_id(rank), |data| {
            // RW01[5] off: ALERT_n reports the channel feedback
            data[1] &= !(1 << 5);
            // RW02: 2 bits per channel, training mode and rank
            data[2] &= !0xf;
            data[2] |= (0b10 | (rank & 1) as u8) << (2 * channel);
        })
    }

    pub fn exit_dcstm(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.inject(channel, Payload::new(0x0f, 0, 0x7f), Store::Continuous);
        self.store_continuous(channel);
        self.rcd_modify_checked(rcd_id(rank), |data| data[2] &= !0xf)
    }

    /// An aligned DCS_n keeps ALERT_n low during DCSTM.
    pub fn dcs_check(&mut self, channel: usize, rank: usize, shift: bool) -> u32 {
        self.cs_sample_prep(channel, rank, shift);
        self.alert_or_reduce() as u32
    }

    pub fn enter_dcatm(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.rcd_modify_checked(rcd_id(rank), |data| {
            data[1] &= !(1 << 5);
            data[2] &= !0xf;
            data[2] |= 0b01 << (2 * channel);
        })
    }

    pub fn exit_dcatm(&mut self, _channel: usize, rank: usize) -> Result<()> {
        self.rcd_modify_checked(rcd_id(rank), |data| data[2] &= !0xf)
    }

    /// RW02[5:4] selects which DCA edges the RCD XORs.
    fn dca_sampling_edge(&mut self, rank: usize, edge: u8) {
        let result = self.rcd_modify_checked(rcd_id(rank), |data| {
            data[2] = (data[2] & !(0b11 << 4)) | (edge & 0b11) << 4;
        });
        if let Err(err) = result {
            warn!("problem with changing the DCA XOR sampling edge: {}", err);
        }
    }

    /// Like `ca_sample_prep`, but also holds the line sharing the DCA pin
    /// in the other half of the word, otherwise the XOR never sees an
    /// edge.
    fn dca_sample_prep(&mut self, channel: usize, rank: usize, line: usize, l2h: bool,
                       shift_back: usize) {
        let other = (line + DCA_HALF) % (2 * DCA_HALF);
        let idle = (!l2h as u16) << line | (!l2h as u16) << other;
        let toggled = (l2h as u16) << line | (!l2h as u16) << other;

        self.inject(channel, Payload::new(0x0f, 0, idle).read(), Store::Continuous);
        if shift_back != 0 {
            self.inject(channel, Payload::new(0x01, 0, toggled).read(), Store::Continuous);
            self.inject(channel, Payload::new(1 << shift_back, 1 << rank, idle).read(),
                        Store::Continuous);
        } else {
            self.inject(channel, Payload::new(0x01, 1 << rank, toggled).read(), Store::Continuous);
        }
        self.store_continuous(channel);
        self.spin_us(1);
    }

    /// DCA check for a DDR DCA interface: both halves of the word are
    /// tested on both edges.
    pub fn dca_check_ddr(&mut self, channel: usize, rank: usize, line: usize,
                         shift_back: usize) -> bool {
        let mut ok = true;
        for edge in 0..2 {
            self.dca_sample_prep(channel, rank, line + edge * DCA_HALF, true, shift_back);
            self.dca_sampling_edge(rank, 0);
            ok &= self.alert_and_reduce();
            self.dca_sampling_edge(rank, 1 << edge);
            ok &= self.alert_and_reduce();

            self.dca_sample_prep(channel, rank, line + edge * DCA_HALF, false, shift_back);
            self.dca_sampling_edge(rank, 0);
            ok &= self.alert_and_reduce();
            self.dca_sampling_edge(rank, 1 << edge);
            ok &= self.alert_or_reduce();
        }
        self.dca_sampling_edge(rank, 0);
        ok
    }

    pub fn dca_check_sdr(&mut self, channel: usize, rank: usize, line: usize,
                         shift_back: usize) -> bool {
        self.dca_sampling_edge(rank, 1);
        self.ca_sample_prep(channel, rank, line, true, shift_back);
        let rising = self.alert_and_reduce();
        self.ca_sample_prep(channel, rank, line, false, shift_back);
        let falling = !self.alert_or_reduce();
        self.dca_sampling_edge(rank, 0);
        rising && falling
    }

    /// Sends DRAM commands of `rank` through CA pass-through.
    fn through_ca_pass<F: FnOnce(&mut Self)>(&mut self, rank: usize, f: F) {
        let rcd = rcd_id(rank);
        self.enter_ca_pass(rcd);
        self.select_ca_pass(rank);
        f(self);
        self.exit_ca_pass(rcd);
    }

    pub fn qck_reset(&mut self, channel: usize, rank: usize) -> Result<()> {
        let regs = [QCK_DELAY, QCK_DELAY + 1, QCK_DELAY + 2, QCK_DELAY + 3];
        self.rcd_put_all(rcd_id(rank), channel, &regs, DELAY_ENABLE)
    }

    pub fn qck_increment(&mut self, channel: usize, rank: usize) -> Result<()> {
        let rcd = rcd_id(rank);
        let delay = (self.rcd_get(rcd, channel, QCK_DELAY)? + 1) & DELAY_MASK;
        let regs = [QCK_DELAY, QCK_DELAY + 1, QCK_DELAY + 2, QCK_DELAY + 3];
        self.rcd_put_all(rcd, channel, &regs, delay | DELAY_ENABLE)
    }

    fn qcs_regs(rank: usize) -> [u8; 2] {
        let reg = QCS_DELAY + (rank & 1) as u8;
        [reg, reg + 2]
    }

    pub fn qcs_reset(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.rcd_put_all(rcd_id(rank), channel, &Self::qcs_regs(rank), DELAY_ENABLE)
    }

    pub fn qcs_increment(&mut self, channel: usize, rank: usize) -> Result<()> {
        let rcd = rcd_id(rank);
        let regs = Self::qcs_regs(rank);
        let delay = (self.rcd_get(rcd, channel, regs[0])? + 1) & DELAY_MASK;
        self.rcd_put_all(rcd, channel, &regs, delay | DELAY_ENABLE)
    }

    pub fn qca_reset(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.rcd_put_all(rcd_id(rank), channel, &[QCA_DELAY, QCA_DELAY + 1], DELAY_ENABLE)
    }

    pub fn qca_increment(&mut self, channel: usize, rank: usize) -> Result<()> {
        let rcd = rcd_id(rank);
        let delay = (self.rcd_get(rcd, channel, QCA_DELAY)? + 1) & DELAY_MASK;
        self.rcd_put_all(rcd, channel, &[QCA_DELAY, QCA_DELAY + 1], delay | DELAY_ENABLE)
    }

    /// The DRAM goes into CSTM through CA pass-through, then the RCD is
    /// put in QCSTM for `rank` (RW03[1:0]).
    pub fn enter_qcstm(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.through_ca_pass(rank, |phy| phy.enter_cstm(channel, rank));
        let rcd = rcd_id(rank);
        let value = (self.rcd_get(rcd, 0, 0x03)? & !0b11) | 0b1 | ((rank & 1) as u8) << 1;
        self.rcd_put(rcd, 0, 0x03, value)?;
        let read = self.rcd_get(rcd, 0, 0x03)?;
        if read != value {
            return Err(Error::Readback { reg: 0x03, written: value, read })
        }
        Ok(())
    }

    pub fn exit_qcstm(&mut self, channel: usize, rank: usize) -> Result<()> {
        let rcd = rcd_id(rank);
        let result = self.rcd_get(rcd, 0, 0x03)
            .and_then(|value| self.rcd_put(rcd, 0, 0x03, value & !0b11));
        // the DRAM has to leave CSTM either way
        self.through_ca_pass(rank, |phy| phy.exit_cstm(channel, rank));
        result
    }

    /// Bitmask of the modules that saw QCS_n aligned. `shift` is applied
    /// through the QCS delay word, bit 6.
    pub fn qcs_check(&mut self, channel: usize, rank: usize, shift: bool, modules: usize,
                     width: usize) -> u32 {
        let rcd = rcd_id(rank);
        let regs = Self::qcs_regs(rank);
        let result = self.rcd_get(rcd, channel, regs[0]).and_then(|delay| {
            let value = delay & DELAY_MASK | (shift as u8) << 6 | DELAY_ENABLE;
            self.rcd_put_all(rcd, channel, &regs, value)
        });
        if let Err(err) = result {
            warn!("problem with shifting QCS{}_n: {}", rank & 1, err);
        }

        self.inject(channel, Payload::new(0x0f, 0, 0).read(), Store::Continuous);
        self.store_continuous(channel);
        self.spin_us(1);
        let mut works = 0;
        for module in 0..modules {
            works |= (self.or_sample_module(channel, module, width) as u32) << module;
        }
        works
    }

    /// There is no QCA training mode in the RCD. The DRAM is put in CATM
    /// and the RCD in CA pass-through towards `rank`, with parity checking
    /// and BCOM off.
    pub fn enter_qcatm(&mut self, channel: usize, rank: usize) -> Result<()> {
        self.through_ca_pass(rank, |phy| phy.enter_catm(channel, rank));
        let rcd = rcd_id(rank);
        self.rcd_modify(rcd, Rap::new(0, 0x00), 2, |data| {
            data[0] |= 1 << 2;
            data[0] |= ((rank & 1) as u8) << 3;
            data[0] &= !(1 << 6);
            data[1] &= !0b1;
            data[1] |= 0b10;
            data[1] &= !0b1000;
        }).map(|_| ())
    }

    pub fn exit_qcatm(&mut self, channel: usize, rank: usize) -> Result<()> {
        let rcd = rcd_id(rank);
        let result = self.rcd_modify(rcd, Rap::new(0, 0x00), 2, |data| data[0] &= !(1 << 2));
        self.through_ca_pass(rank, |phy| phy.exit_catm(channel, rank));
        result.map(|_| ())
    }

    /// Every QCA line has to pass the CATM check.
    pub fn qca_check(&mut self, channel: usize, rank: usize, shift_back: usize,
                     lines: usize) -> bool {
        let mut ok = true;
        for line in 0..lines {
            ok &= self.ca_check(channel, rank, line, shift_back);
        }
        ok
    }
}

/// Applies the read-back policy to a training mode switch. Transport
/// failures are only reported.
fn mode_switch(result: Result<()>, what: &str, readback_fatal: bool) -> Result<()> {
    match result {
        Err(err @ Error::Readback { .. }) if readback_fatal => Err(err),
        Err(err) => {
            warn!("problem with {}: {}", what, err);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

/// Host->RCD training: PHY delays, RCD training modes, ALERT_n feedback.
pub struct HostRcd<'a, B: CsrBus, C: Clock> {
    phy: &'a mut Ddr5Phy<B, C>,
    rate: Rate,
    readback_fatal: bool,
}

impl<'a, B: CsrBus, C: Clock> HostRcd<'a, B, C> {
    pub fn new(phy: &'a mut Ddr5Phy<B, C>, rate: Rate, config: &TrainingConfig) -> Self {
        HostRcd { phy, rate, readback_fatal: config.readback_mismatch_fatal }
    }
}

impl<'a, B: CsrBus, C: Clock> DelayControl for HostRcd<'a, B, C> {
    type Line = BusLine;

    fn reset_delay(&mut self, line: BusLine) {
        self.phy.reset_delay(host_line(line))
    }

    fn increment_delay(&mut self, line: BusLine) {
        self.phy.increment_delay(host_line(line))
    }
}

impl<'a, B: CsrBus, C: Clock> SignalTrainer for HostRcd<'a, B, C> {
    fn enter_cs_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.enter_dcstm(channel, rank);
        mode_switch(result, "entering DCSTM", self.readback_fatal)
    }

    fn exit_cs_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.exit_dcstm(channel, rank);
        mode_switch(result, "exiting DCSTM", self.readback_fatal)
    }

    fn check_cs(&mut self, channel: usize, rank: usize, shift: bool, _modules: usize,
                _width: usize) -> u32 {
        self.phy.dcs_check(channel, rank, shift)
    }

    fn enter_ca_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.enter_dcatm(channel, rank);
        mode_switch(result, "entering DCATM", self.readback_fatal)
    }

    fn exit_ca_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.exit_dcatm(channel, rank);
        mode_switch(result, "exiting DCATM", self.readback_fatal)
    }

    fn check_ca(&mut self, channel: usize, rank: usize, line: usize, shift_back: usize) -> bool {
        match self.rate {
            Rate::Ddr => self.phy.dca_check_ddr(channel, rank, line, shift_back),
            Rate::Sdr1 | Rate::Sdr2 => self.phy.dca_check_sdr(channel, rank, line, shift_back),
        }
    }

    fn disable_dfi_2n_mode(&mut self) {
        self.phy.disable_dfi_2n_mode()
    }

    fn settle_ms(&mut self, interval: u64) {
        self.phy.spin_ms(interval)
    }
}

/// RCD->DRAM training: RCD output delays, DRAM training modes, DQ feedback.
pub struct RcdDram<'a, B: CsrBus, C: Clock> {
    phy: &'a mut Ddr5Phy<B, C>,
    readback_fatal: bool,
    /// QCA lines, found on the first QCA check.
    qca_lines: Option<usize>,
}

impl<'a, B: CsrBus, C: Clock> RcdDram<'a, B, C> {
    pub fn new(phy: &'a mut Ddr5Phy<B, C>, config: &TrainingConfig) -> Self {
        RcdDram { phy, readback_fatal: config.readback_mismatch_fatal, qca_lines: None }
    }
}

impl<'a, B: CsrBus, C: Clock> DelayControl for RcdDram<'a, B, C> {
    type Line = BusLine;

    fn reset_delay(&mut self, line: BusLine) {
        let result = match line {
            BusLine::Ck { channel } => self.phy.qck_reset(channel, 0),
            BusLine::Cs { channel, rank } => self.phy.qcs_reset(channel, rank),
            BusLine::Ca { channel, rank, .. } => self.phy.qca_reset(channel, rank),
        };
        if let Err(err) = result {
            error!("resetting {:?} failed: {}", line, err);
        }
    }

    fn increment_delay(&mut self, line: BusLine) {
        let result = match line {
            BusLine::Ck { channel } => self.phy.qck_increment(channel, 0),
            BusLine::Cs { channel, rank } => self.phy.qcs_increment(channel, rank),
            BusLine::Ca { channel, rank, .. } => self.phy.qca_increment(channel, rank),
        };
        if let Err(err) = result {
            error!("incrementing {:?} failed: {}", line, err);
        }
    }
}

impl<'a, B: CsrBus, C: Clock> SignalTrainer for RcdDram<'a, B, C> {
    fn enter_cs_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.enter_qcstm(channel, rank);
        mode_switch(result, "entering QCSTM", self.readback_fatal)
    }

    fn exit_cs_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.exit_qcstm(channel, rank);
        mode_switch(result, "exiting QCSTM", self.readback_fatal)
    }

    fn check_cs(&mut self, channel: usize, rank: usize, shift: bool, modules: usize,
                width: usize) -> u32 {
        self.phy.qcs_check(channel, rank, shift, modules, width)
    }

    fn enter_ca_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.enter_qcatm(channel, rank);
        mode_switch(result, "entering QCATM", self.readback_fatal)
    }

    fn exit_ca_training(&mut self, channel: usize, rank: usize) -> Result<()> {
        let result = self.phy.exit_qcatm(channel, rank);
        mode_switch(result, "exiting QCATM", self.readback_fatal)
    }

    /// The QCA delay moves every line at once, so all of them are checked.
    fn check_ca(&mut self, channel: usize, rank: usize, _line: usize, shift_back: usize) -> bool {
        let lines = match self.qca_lines {
            Some(lines) => lines,
            None => {
                let lines = if self.phy.has_line13(channel) { 14 } else { 13 };
                debug!("{} QCA lines", lines);
                self.qca_lines = Some(lines);
                lines
            }
        };
        self.phy.qca_check(channel, rank, shift_back, lines)
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
    use crate::clock::sim::SimClock;
    use crate::csr::Injector;
    use crate::i2c::sim::I2cSimBus;
    use crate::phy::sim::{self, settings};
    use crate::rcd::rcd_address;
    use crate::rcd::sim::SimRcd;
    use super::*;

    fn phy_with_rcd() -> (Ddr5Phy<I2cSimBus, SimClock>, SimRcd) {
        let mut phy = Ddr5Phy::new(I2cSimBus::new(), SimClock::default(), settings());
        let rcd = SimRcd::new();
        phy.bus.attach(rcd_address(0), rcd.clone());
        phy.i2c_init().unwrap();
        (phy, rcd)
    }

    #[test]
    fn alert_reductions() {
        let mut phy = sim::phy();
        assert!(phy.alert_or_reduce());
        assert!(!phy.alert_and_reduce());
        assert_eq!(phy.bus.regs[&Csr::PhyCommon(PhyCommon::AlertReduce)], 3);
        assert_eq!(phy.bus.regs[&Csr::PhyCommon(PhyCommon::SampleAlert)], 0);
        phy.bus.regs.insert(Csr::PhyCommon(PhyCommon::Alert), 1);
        assert!(!phy.alert_or_reduce());
        assert!(phy.alert_and_reduce());
    }

    #[test]
    fn dcstm_selects_channel_and_rank() {
        let (mut phy, rcd) = phy_with_rcd();
        rcd.state.borrow_mut().rw.insert((0, 0x01), 0x21);
        phy.enter_dcstm(1, 1).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x02), 0b1100);
        assert_eq!(rcd.state.borrow().get(0, 0x01), 0x01);
        phy.exit_dcstm(1, 1).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x02), 0);

        phy.enter_dcatm(0, 0).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x02), 0b01);
    }

    #[test]
    fn readback_policy() {
        let (mut phy, rcd) = phy_with_rcd();
        rcd.state.borrow_mut().frozen = true;
        let config = TrainingConfig::default();
        assert_eq!(HostRcd::new(&mut phy, Rate::Ddr, &config).enter_cs_training(0, 0), Ok(()));

        let config = TrainingConfig { readback_mismatch_fatal: true, ..TrainingConfig::default() };
        assert_eq!(HostRcd::new(&mut phy, Rate::Ddr, &config).enter_cs_training(0, 0),
                   Err(Error::Readback { reg: 0x02, written: 0b10, read: 0 }));
    }

    #[test]
    fn transport_failure_is_not_fatal() {
        let mut phy = Ddr5Phy::new(I2cSimBus::new(), SimClock::default(), settings());
        phy.i2c_init().unwrap();
        let config = TrainingConfig { readback_mismatch_fatal: true, ..TrainingConfig::default() };
        assert_eq!(HostRcd::new(&mut phy, Rate::Ddr, &config).exit_ca_training(0, 0), Ok(()));
    }

    #[test]
    fn output_delay_words() {
        let (mut phy, rcd) = phy_with_rcd();
        rcd.state.borrow_mut().rw.insert((1, 0x17), 0x85);
        phy.qcs_increment(1, 0).unwrap();
        assert_eq!(rcd.state.borrow().get(1, 0x17), 0x86);
        assert_eq!(rcd.state.borrow().get(1, 0x19), 0x86);

        rcd.state.borrow_mut().rw.insert((0, 0x18), 0xbf);
        phy.qcs_increment(0, 1).unwrap();
        // wraps within the 6-bit delay
        assert_eq!(rcd.state.borrow().get(0, 0x18), 0x80);
        assert_eq!(rcd.state.borrow().get(0, 0x1a), 0x80);

        phy.qck_reset(0, 0).unwrap();
        for reg in 0x12..0x16 {
            assert_eq!(rcd.state.borrow().get(0, reg), 0x80);
        }
        phy.qca_increment(0, 0).unwrap();
        phy.qca_increment(0, 0).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x1b), 0x82);
        assert_eq!(rcd.state.borrow().get(0, 0x1c), 0x82);
    }

    #[test]
    fn rcd_dram_delays_use_control_words() {
        let (mut phy, rcd) = phy_with_rcd();
        let config = TrainingConfig::default();
        let mut trainer = RcdDram::new(&mut phy, &config);
        trainer.set_delay(BusLine::Cs { channel: 0, rank: 1 }, 3);
        trainer.set_delay(BusLine::Ck { channel: 1 }, 2);
        let state = rcd.state.borrow();
        assert_eq!(state.get(0, 0x18), 0x83);
        assert_eq!(state.get(0, 0x1a), 0x83);
        assert_eq!(state.get(1, 0x15), 0x82);
    }

    #[test]
    fn qcstm_enters_through_ca_pass() {
        let (mut phy, rcd) = phy_with_rcd();
        phy.enter_qcstm(0, 1).unwrap();
        // pass-through was left again, RW03 holds QCSTM for rank 1
        assert_eq!(rcd.state.borrow().get(0, 0x00) & 0b100, 0);
        assert_eq!(rcd.state.borrow().get(0, 0x00) & 0b1000, 0b1000);
        assert_eq!(rcd.state.borrow().get(0, 0x03), 0b11);
        phy.exit_qcstm(0, 1).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x03), 0);
    }

    #[test]
    fn qcatm_sets_pass_through() {
        let (mut phy, rcd) = phy_with_rcd();
        rcd.state.borrow_mut().rw.insert((0, 0x00), 0x40);
        rcd.state.borrow_mut().rw.insert((0, 0x01), 0x09);
        phy.enter_qcatm(0, 0).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x00), 0b100);
        assert_eq!(rcd.state.borrow().get(0, 0x01), 0b10);
        phy.exit_qcatm(0, 0).unwrap();
        assert_eq!(rcd.state.borrow().get(0, 0x00), 0);
    }

    #[test]
    fn dca_pattern_holds_other_half() {
        let mut phy = sim::phy();
        phy.dca_sample_prep(0, 0, 2, false, 0);
        let storage: Vec<u32> = phy.bus.writes.iter()
            .filter(|&&(csr, _)| csr == Csr::Injector(0, Injector::CommandStorage))
            .map(|&(_, value)| value)
            .collect();
        assert_eq!(storage, vec![0x204 | 1 << 17, 0x200 | 1 << 14 | 1 << 17]);
    }
}
