//! Register interface of the DDR5 PHY, the DFI injector and the I2C pads.
//!
//! Registers are named, not addressed: the training engine only ever talks
//! to a [`CsrBus`], and the board decides where each register lives.

use core::ptr;
use byteorder::{BigEndian, ByteOrder};

/// Sub-channel registers of the DFI command injector (`sdram_dfii_{a,b}_cmdinjector_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Injector {
    CommandStorage,
    CommandStorageWrMask,
    PhaseAddr,
    StoreContinuousCmd,
    StoreSingleshotCmd,
    SingleShot,
    IssueCommand,
    RddataCaptureCnt,
    RddataSelect,
    /// Buffer: data captured by the last read burst of the selected phase.
    Rddata,
    /// Buffer: reduced samples accumulated between `Sample` on and off.
    ResultArray,
    WrdataSelect,
    /// Buffer: write data staged for the selected phase.
    Wrdata,
    /// Buffer: write data currently stored for the selected phase.
    WrdataS,
    WrdataStore,
    Sample,
    Setup,
    Reset,
}

/// Sub-channel registers of the PHY (`ddrphy_CSRModule_{A,B}_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phy {
    DlySel,
    DqDlySel,
    CsdlyRst,
    CsdlyInc,
    Csdly,
    CadlyRst,
    CadlyInc,
    Cadly,
    PardlyRst,
    PardlyInc,
    CkRdlyRst,
    CkRdlyInc,
    CkRddly,
    CkRddlyPreamble,
    RdlyDqRst,
    RdlyDqInc,
    RdlyDq,
    RdlyDqsRst,
    RdlyDqsInc,
    RdlyDqs,
    CkWdlyRst,
    CkWdlyInc,
    CkWddlyRst,
    CkWddlyInc,
    WdlyDqRst,
    WdlyDqInc,
    WdlyDq,
    WdlyDqsRst,
    WdlyDqsInc,
    WdlyDqs,
    WdlyDmRst,
    WdlyDmInc,
    WdlyDm,
    Preamble,
    WlevelEn,
    DiscardRdFifo,
}

/// PHY registers shared by both sub-channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhyCommon {
    CkdlyRst,
    CkdlyInc,
    EnableFifos,
    Rst,
    RdimmMode,
    SampleAlert,
    AlertReduce,
    ResetAlert,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Csr {
    DfiiControl,
    DfiiForceIssue,
    Injector(usize, Injector),
    Phy(usize, Phy),
    PhyCommon(PhyCommon),
    /// Buffer: per-DQ remapping table of a sub-channel.
    DqRemapping(usize),
    I2cW,
    I2cR,
}

pub const DFII_CONTROL_SEL: u32     = 0x01;
pub const DFII_CONTROL_CKE: u32     = 0x02;
pub const DFII_CONTROL_ODT: u32     = 0x04;
pub const DFII_CONTROL_RESET_N: u32 = 0x08;
pub const DFII_CONTROL_2N_MODE: u32 = 0x10;

pub const I2C_SCL: u32 = 0x01;
pub const I2C_OE: u32  = 0x02;
pub const I2C_SDA: u32 = 0x04;

pub trait CsrBus {
    fn read(&mut self, csr: Csr) -> u32;
    fn write(&mut self, csr: Csr, value: u32);

    /// Reads a multi-word register, most significant byte first.
    fn read_buf(&mut self, csr: Csr, buf: &mut [u8]);
    /// Writes a multi-word register, most significant byte first.
    fn write_buf(&mut self, csr: Csr, buf: &[u8]);

    fn modify(&mut self, csr: Csr, f: impl FnOnce(u32) -> u32) where Self: Sized {
        let value = self.read(csr);
        self.write(csr, f(value))
    }
}

/// Location of a register in the CPU address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsrLocation {
    pub addr: usize,
    /// Number of 32-bit words backing the register.
    pub words: usize,
}

/// Board specific register placement, normally generated alongside the gateware.
pub trait CsrMap {
    fn locate(&self, csr: Csr) -> Option<CsrLocation>;
}

/// Volatile MMIO access to LiteX CSRs with 32-bit data width.
pub struct Mmio<M: CsrMap> {
    map: M,
}

impl<M: CsrMap> Mmio<M> {
    /// # Safety
    ///
    /// Every location returned by `map` must be a valid, exclusively owned CSR.
    pub unsafe fn new(map: M) -> Self {
        Mmio { map }
    }

    fn location(&self, csr: Csr) -> Option<CsrLocation> {
        let location = self.map.locate(csr);
        if location.is_none() {
            trace!("{:?} is not present in this design", csr);
        }
        location
    }
}

impl<M: CsrMap> CsrBus for Mmio<M> {
    fn read(&mut self, csr: Csr) -> u32 {
        match self.location(csr) {
            Some(location) => unsafe { ptr::read_volatile(location.addr as *const u32) },
            None => 0
        }
    }

    fn write(&mut self, csr: Csr, value: u32) {
        if let Some(location) = self.location(csr) {
            unsafe { ptr::write_volatile(location.addr as *mut u32, value) }
        }
    }

    fn read_buf(&mut self, csr: Csr, buf: &mut [u8]) {
        let location = match self.location(csr) {
            Some(location) => location,
            None => return buf.iter_mut().for_each(|byte| *byte = 0)
        };
        // The buffer is right-aligned to the last word of the register.
        let padding = location.words * 4 - buf.len().min(location.words * 4);
        for word in 0..location.words {
            let mut bytes = [0; 4];
            let value = unsafe {
                ptr::read_volatile((location.addr as *const u32).add(word))
            };
            BigEndian::write_u32(&mut bytes, value);
            for (i, byte) in bytes.iter().enumerate() {
                let offset = word * 4 + i;
                if offset >= padding && offset - padding < buf.len() {
                    buf[offset - padding] = *byte;
                }
            }
        }
    }

    fn write_buf(&mut self, csr: Csr, buf: &[u8]) {
        let location = match self.location(csr) {
            Some(location) => location,
            None => return
        };
        let padding = location.words * 4 - buf.len().min(location.words * 4);
        for word in 0..location.words {
            let mut bytes = [0; 4];
            for (i, byte) in bytes.iter_mut().enumerate() {
                let offset = word * 4 + i;
                if offset >= padding && offset - padding < buf.len() {
                    *byte = buf[offset - padding];
                }
            }
            unsafe {
                ptr::write_volatile((location.addr as *mut u32).add(word),
                                    BigEndian::read_u32(&bytes))
            }
        }
    }
}

#[cfg(test)]
pub mod sim {
    //! In-memory register file used by the unit tests.

    use std::collections::BTreeMap;
    use std::vec::Vec;
    use super::{Csr, CsrBus};

    #[derive(Default)]
    pub struct SimBus {
        pub regs: BTreeMap<Csr, u32>,
        pub bufs: BTreeMap<Csr, Vec<u8>>,
        /// Every scalar write in program order.
        pub writes: Vec<(Csr, u32)>,
    }

    impl SimBus {
        pub fn new() -> SimBus {
            SimBus::default()
        }

        pub fn count(&self, csr: Csr) -> usize {
            self.writes.iter().filter(|(reg, _)| *reg == csr).count()
        }
    }

    impl CsrBus for SimBus {
        fn read(&mut self, csr: Csr) -> u32 {
            self.regs.get(&csr).cloned().unwrap_or(0)
        }

        fn write(&mut self, csr: Csr, value: u32) {
            self.writes.push((csr, value));
            self.regs.insert(csr, value);
        }

        fn read_buf(&mut self, csr: Csr, buf: &mut [u8]) {
            let stored = self.bufs.entry(csr).or_insert_with(Vec::new);
            if stored.len() < buf.len() {
                stored.resize(buf.len(), 0);
            }
            buf.copy_from_slice(&stored[..buf.len()]);
        }

        fn write_buf(&mut self, csr: Csr, buf: &[u8]) {
            self.bufs.insert(csr, buf.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Words([u32; 2]);

    impl CsrMap for *mut Words {
        fn locate(&self, csr: Csr) -> Option<CsrLocation> {
            match csr {
                Csr::DqRemapping(0) => Some(CsrLocation { addr: *self as usize, words: 2 }),
                _ => None
            }
        }
    }

    #[test]
    fn buffers_are_big_endian_and_right_aligned() {
        let mut words = Words([0; 2]);
        let mut bus = unsafe { Mmio::new(&mut words as *mut Words) };
        bus.write_buf(Csr::DqRemapping(0), &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(words.0, [0x0000_1122, 0x3344_5566]);

        let mut buf = [0; 6];
        bus.read_buf(Csr::DqRemapping(0), &mut buf);
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    }

    #[test]
    fn absent_registers_read_as_zero() {
        let mut words = Words([0; 2]);
        let mut bus = unsafe { Mmio::new(&mut words as *mut Words) };
        bus.write(Csr::DfiiControl, 1);
        assert_eq!(bus.read(Csr::DfiiControl), 0);
    }
}
