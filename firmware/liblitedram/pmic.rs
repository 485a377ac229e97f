//! Power management IC of a DDR5 module.

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::error::Result;
use crate::phy::Ddr5Phy;

pub const PMIC_RW_PREAMBLE: u8 = 0b1001;

/// R32: regulator enable.
const R32: u8 = 0x32;
const VR_ENABLE: u8 = 0xa0;

pub fn pmic_address(pmic: u8) -> u8 {
    PMIC_RW_PREAMBLE << 3 | (pmic & 0b111)
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    /// Turns the module supplies on. The rails need 50 ms to settle
    /// before the RCD is touched.
    pub fn pmic_enable(&mut self, pmic: u8) -> Result<()> {
        self.i2c_write(pmic_address(pmic), R32, &[VR_ENABLE])
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::sim::SimClock;
    use crate::error::Error;
    use crate::i2c::sim::{Echo, I2cSimBus};
    use crate::phy::sim::settings;
    use super::*;

    #[test]
    fn vr_enable() {
        let mut phy = Ddr5Phy::new(I2cSimBus::new(), SimClock::default(), settings());
        phy.bus.attach(0x48, Echo::default());
        phy.i2c_init().unwrap();
        phy.pmic_enable(0).unwrap();
        assert_eq!(phy.bus.transfers, vec![(0x48, vec![0x32, 0xa0])]);
        assert_eq!(phy.pmic_enable(1), Err(Error::I2cNack { addr: 0x49 }));
    }
}
