use crate::clock::Clock;
use crate::csr::{self, Csr, CsrBus, Phy, PhyCommon};

/// Geometry and timing of the PHY as built into the gateware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhySettings {
    pub nphases: usize,
    pub dfi_databits: usize,
    pub subchannels: bool,
    pub nranks: usize,
    pub modules: usize,
    pub dq_dqs_ratio: usize,
    pub address_lines: usize,
    /// Taps of every delay line.
    pub delays: usize,
    pub cwl: i32,
    pub min_wr_latency: i32,
    pub clock_frequency: u32,
    pub input_delay_capable: bool,
    pub delay_per_dq: bool,
}

impl PhySettings {
    pub fn channels(&self) -> usize {
        if self.subchannels { 2 } else { 1 }
    }

    /// Bytes of injector data per phase and sub-channel.
    pub fn data_bytes(&self) -> usize {
        if self.subchannels { self.dfi_databits / 16 } else { self.dfi_databits / 8 }
    }

    pub fn dq_remap_bytes(&self) -> usize {
        if self.subchannels { self.dfi_databits / 4 } else { self.dfi_databits / 2 }
    }

    pub fn modules_per_channel(&self) -> usize {
        self.modules / self.channels()
    }

    /// Write mask covering both edges of every module of a sub-channel.
    pub fn wrdata_bitmask(&self) -> u64 {
        (1u64 << (2 * self.modules_per_channel())) - 1
    }

    pub fn cs_offset(&self) -> u32 {
        14
    }

    pub fn wrdata_en_offset(&self) -> u32 {
        14 + self.nranks as u32
    }

    pub fn rddata_en_offset(&self) -> u32 {
        15 + self.nranks as u32
    }
}

/// Flags that change how commands are encoded during one `sdram_init` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    /// DRAM accepts single cycle MPCs (MR2 OP[4]).
    pub single_cycle_mpc: bool,
    /// Internal write timing is enabled (MR2 OP[7]).
    pub internal_write_timing: bool,
    /// DFI is issuing commands in 2N mode.
    pub n2_mode: bool,
    pub enumerated: bool,
}

impl Default for Session {
    fn default() -> Session {
        Session {
            single_cycle_mpc: false,
            internal_write_timing: false,
            n2_mode: true,
            enumerated: false,
        }
    }
}

impl Session {
    /// MR2 bits that must be preserved on every MR2 write.
    pub fn mr2_flags(&self) -> u8 {
        let mut flags = 0;
        if self.internal_write_timing { flags |= 1 << 7 }
        if self.single_cycle_mpc { flags |= 1 << 4 }
        flags
    }
}

/// Handle over the PHY, the DFI injector and the sideband pads.
pub struct Ddr5Phy<B: CsrBus, C: Clock> {
    pub bus: B,
    pub clock: C,
    pub settings: PhySettings,
    pub session: Session,
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    pub fn new(bus: B, clock: C, settings: PhySettings) -> Ddr5Phy<B, C> {
        Ddr5Phy { bus, clock, settings, session: Session::default() }
    }

    pub fn spin_us(&mut self, interval: u64) {
        self.clock.spin_us(interval)
    }

    pub fn spin_ms(&mut self, interval: u64) {
        self.clock.spin_ms(interval)
    }

    pub fn channels(&self) -> usize {
        self.settings.channels()
    }

    pub fn software_control_on(&mut self) {
        let previous = self.bus.read(Csr::DfiiControl);
        if previous & csr::DFII_CONTROL_SEL != 0 {
            self.bus.write(Csr::DfiiControl, previous & !csr::DFII_CONTROL_SEL);
            info!("switching SDRAM to software control");
        }
    }

    pub fn software_control_off(&mut self) {
        let previous = self.bus.read(Csr::DfiiControl);
        if previous & csr::DFII_CONTROL_SEL == 0 {
            self.bus.write(Csr::DfiiControl, previous | csr::DFII_CONTROL_SEL);
            info!("switching SDRAM to hardware control");
        }
    }

    pub fn reset_phy(&mut self) {
        self.bus.write(Csr::PhyCommon(PhyCommon::Rst), 1);
        self.spin_us(10);
        self.bus.write(Csr::PhyCommon(PhyCommon::Rst), 0);
        self.spin_us(10);
    }

    pub fn enable_phy(&mut self) {
        self.bus.write(Csr::PhyCommon(PhyCommon::EnableFifos), 0);
        self.spin_us(50);
        self.clear_phy_fifos(0);
        self.clear_phy_fifos(1);
        self.spin_us(50);
        self.bus.write(Csr::PhyCommon(PhyCommon::Rst), 1);
        self.spin_us(50);
        self.bus.write(Csr::PhyCommon(PhyCommon::Rst), 0);
        self.spin_us(50);
        self.bus.write(Csr::PhyCommon(PhyCommon::EnableFifos), 1);
        self.spin_us(50);
    }

    pub fn clear_phy_fifos(&mut self, channel: usize) {
        self.bus.write(Csr::Phy(channel, Phy::DiscardRdFifo), 1);
        self.spin_ms(5);
        self.bus.write(Csr::Phy(channel, Phy::DiscardRdFifo), 0);
    }

    pub fn set_rdimm_mode(&mut self, enabled: bool) {
        self.bus.write(Csr::PhyCommon(PhyCommon::RdimmMode), enabled as u32);
    }

    pub fn set_reset_n(&mut self, high: bool) {
        self.bus.modify(Csr::DfiiControl, |value| {
            if high { value | csr::DFII_CONTROL_RESET_N } else { value & !csr::DFII_CONTROL_RESET_N }
        })
    }

    pub fn disable_dfi_2n_mode(&mut self) {
        self.bus.modify(Csr::DfiiControl, |value| value & !csr::DFII_CONTROL_2N_MODE);
        info!("switching DFI to 1N mode");
        self.session.n2_mode = false;
    }

    pub fn enable_dfi_2n_mode(&mut self) {
        self.bus.modify(Csr::DfiiControl, |value| value | csr::DFII_CONTROL_2N_MODE);
        info!("switching DFI to 2N mode");
        self.session.n2_mode = true;
    }

    pub fn in_2n_mode(&self) -> bool {
        self.session.n2_mode
    }
}


#[cfg(test)]
mod tests {
    use crate::csr::{Csr, CsrBus, DFII_CONTROL_2N_MODE, DFII_CONTROL_SEL};
    use super::*;

    #[test]
    fn geometry() {
        let settings = sim::settings();
        assert_eq!(settings.channels(), 2);
        assert_eq!(settings.data_bytes(), 10);
        assert_eq!(settings.modules_per_channel(), 5);
        assert_eq!(settings.wrdata_bitmask(), 0x3ff);
    }

    #[test]
    fn mr2_flags_follow_session() {
        let mut session = Session::default();
        assert_eq!(session.mr2_flags(), 0);
        session.single_cycle_mpc = true;
        assert_eq!(session.mr2_flags(), 0x10);
        session.internal_write_timing = true;
        assert_eq!(session.mr2_flags(), 0x90);
    }

    #[test]
    fn control_bits() {
        let mut phy = sim::phy();
        phy.bus.write(Csr::DfiiControl, DFII_CONTROL_SEL | DFII_CONTROL_2N_MODE);
        phy.software_control_on();
        phy.disable_dfi_2n_mode();
        assert_eq!(phy.bus.read(Csr::DfiiControl), 0);
        assert!(!phy.in_2n_mode());
        phy.software_control_off();
        assert_eq!(phy.bus.read(Csr::DfiiControl), DFII_CONTROL_SEL);
    }
}
