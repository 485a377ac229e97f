//! SPD hub of a DDR5 module.
//!
//! The 1 KiB NVM is seen through a 128 byte window at 0x80..0xff of the
//! hub, the page being selected by MR11[2:0].

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::error::{Error, Result};
use crate::phy::Ddr5Phy;
use crate::rcd::RcdOutputs;

pub const SPD_RW_PREAMBLE: u8 = 0b1010;
pub const SPD_PAGES: usize = 8;
pub const SPD_PAGE_SIZE: usize = 128;
pub const SPD_SIZE: usize = SPD_PAGES * SPD_PAGE_SIZE;

const MR11: u8 = 11;
/// Selects the NVM window instead of the hub registers.
const NVM: u8 = 0x80;

pub fn spd_address(spd: u8) -> u8 {
    SPD_RW_PREAMBLE << 3 | (spd & 0b111)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Rdimm,
    Udimm,
    Sodimm,
    Lrdimm,
    Ddim,
    SolderDown,
    Other(u8),
}

impl ModuleType {
    /// Decodes SPD byte 3.
    pub fn from_spd(byte: u8) -> ModuleType {
        match byte & 0x0f {
            0x1 => ModuleType::Rdimm,
            0x2 => ModuleType::Udimm,
            0x3 => ModuleType::Sodimm,
            0x4 => ModuleType::Lrdimm,
            0xa => ModuleType::Ddim,
            0xb => ModuleType::SolderDown,
            other => ModuleType::Other(other),
        }
    }
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    pub fn select_spd_page(&mut self, spd: u8, page: u8) -> Result<()> {
        if page as usize >= SPD_PAGES {
            return Err(Error::SpdPage(page))
        }
        self.i2c_write(spd_address(spd), MR11, &[page])
    }

    /// Reads `buf.len()` bytes of NVM starting at `addr`, switching pages
    /// as needed.
    pub fn read_spd(&mut self, spd: u8, addr: usize, buf: &mut [u8], send_stop: bool)
                   -> Result<()> {
        let mut addr = addr;
        let mut done = 0;
        while done < buf.len() {
            let page = addr / SPD_PAGE_SIZE;
            if page >= SPD_PAGES {
                return Err(Error::SpdPage(page as u8))
            }
            self.select_spd_page(spd, page as u8)?;

            let offset = addr % SPD_PAGE_SIZE;
            let chunk = (SPD_PAGE_SIZE - offset).min(buf.len() - done);
            let last = done + chunk == buf.len();
            self.i2c_read(spd_address(spd), NVM | offset as u8, &mut buf[done..done + chunk],
                          last && send_stop)?;
            done += chunk;
            addr += chunk;
        }
        Ok(())
    }

    fn read_spd_byte(&mut self, spd: u8, addr: usize, what: &str) -> Option<u8> {
        let mut byte = [0];
        match self.read_spd(spd, addr, &mut byte, false) {
            Ok(()) => Some(byte[0]),
            Err(err) => {
                warn!("couldn't read {} from the SPD: {}", what, err);
                None
            }
        }
    }

    /// UDIMM when the SPD cannot be read.
    pub fn read_module_type(&mut self, spd: u8) -> ModuleType {
        self.read_spd_byte(spd, 3, "the module type")
            .map(ModuleType::from_spd)
            .unwrap_or(ModuleType::Udimm)
    }

    /// SPD[234][5:3] + 1.
    pub fn read_module_ranks(&mut self, spd: u8) -> usize {
        self.read_spd_byte(spd, 234, "module ranks")
            .map(|byte| ((byte >> 3) & 0b111) as usize + 1)
            .unwrap_or(1)
    }

    /// SPD[235][6:5] + 1.
    pub fn read_module_channels(&mut self, spd: u8) -> usize {
        self.read_spd_byte(spd, 235, "module channels")
            .map(|byte| ((byte >> 5) & 0b11) as usize + 1)
            .unwrap_or_else(|| self.channels())
    }

    /// RCD output enables and drive strengths, bytes 248..=254. A bit
    /// set in the enables disables the output.
    pub fn read_rcd_outputs(&mut self, spd: u8) -> RcdOutputs {
        let mut field = |addr: usize, what: &str, mask: u8| {
            self.read_spd_byte(spd, addr, what).map(|byte| byte & mask).unwrap_or(0)
        };
        RcdOutputs {
            qck_enable: field(248, "clock enables", 0x2f),
            qca_enable: field(249, "CA enables", 0x7f),
            qck_setup: field(250, "QCK setup", 0xff),
            qca_qcs_setup: field(252, "QCA/QCS setup", 0x33),
            slew_rates: field(254, "slew rates", 0x3f),
        }
    }
}
