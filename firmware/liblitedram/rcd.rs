//! RCD sideband access and the control words of RDIMM bring-up.
//!
//! The RCD registers are reached through the JESD82-511 register access
//! protocol (RAP) carried in SMBus block transfers. Every block carries
//! an 8-bit PEC. The control-word helpers follow a report-and-proceed
//! policy: a failed transfer is logged and reported as `false`, and the
//! caller carries on.

use crc::{Crc, CRC_8_SMBUS};

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::error::{Error, Result};
use crate::injector::{Payload, Store};
use crate::jedec::channel_name;
use crate::phy::Ddr5Phy;
use crate::trainer::Rate;

pub const RCD_RW_PREAMBLE: u8 = 0x58;

pub const PEC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
/// Address the PEC of sideband frames is seeded with.
const PEC_ADDRESS: u8 = 0x5f << 1;

const READ_CMD: u8 = 0b00;
const START_BIT: u8 = 0x80;
const END_BIT: u8 = 0x40;

/// RW04 commands.
pub mod command {
    pub const SET_QRST_A: u8 = 5;
    pub const CLEAR_QRST_A: u8 = 6;
    pub const QCS_HIGH_A: u8 = 14;
}

pub fn rcd_address(rcd: u8) -> u8 {
    RCD_RW_PREAMBLE | (rcd & 0b111)
}

/// Every RCD drives two ranks.
pub fn rcd_id(rank: usize) -> u8 {
    (rank / 2) as u8
}

fn write_cmd(size: usize) -> u8 {
    ((size >> 1) + 1) as u8
}

fn block_cmd(internal: u8) -> u8 {
    0xd2 | (internal & 0b11) << 2
}

fn byte_cmd(internal: u8) -> u8 {
    (internal & 0b11) << 2
}

/// PEC of a frame written with sideband command `cmd`.
pub fn pec(cmd: u8, frame: &[u8]) -> u8 {
    let mut digest = PEC.digest();
    digest.update(&[PEC_ADDRESS, cmd]);
    digest.update(frame);
    digest.finalize()
}

/// PEC of a frame returned by a block read, which also covers the
/// repeated start with the read address.
pub fn read_pec(cmd: u8, frame: &[u8]) -> u8 {
    let mut digest = PEC.digest();
    digest.update(&[PEC_ADDRESS, cmd, PEC_ADDRESS | 1]);
    digest.update(frame);
    digest.finalize()
}

/// Register access protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rap {
    pub dev: u8,
    /// Sub-channel on DDR5 RDIMMs.
    pub function: u8,
    pub page: u8,
    pub reg: u8,
}

impl Rap {
    pub fn new(function: usize, reg: u8) -> Rap {
        Rap { dev: 0, function: function as u8, page: 0, reg }
    }

    pub fn bytes(&self) -> [u8; 4] {
        [0x00, self.dev << 4 | self.function, self.page, self.reg]
    }
}

/// Four consecutive registers starting at the RAP register, then the
/// status byte of the read.
pub type RcdData = [u8; 5];

fn report(result: Result<()>, what: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            error!("problem with {} in the RCD: {}", what, err);
            false
        }
    }
}

/// Target data rate of the RCD PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingSpeed {
    PllBypass,
    /// MT/s.
    Rate(u32),
}

/// RW05 (coarse) and RW06 (fine) encodings of an operating speed. Bins
/// are left exclusive: `bin * coarse - 20 * fine < speed <= bin * coarse`.
pub fn speed_setting(speed: OperatingSpeed) -> (u8, Option<u8>) {
    let target = match speed {
        OperatingSpeed::PllBypass => return (0x0f, None),
        OperatingSpeed::Rate(target) => target as i32,
    };

    let (bin, mut offset, coarse) = if (2000..=2100).contains(&target) {
        // down-bin rate, 100 MT/s wide
        (100, target - 2000, 0x0e)
    } else {
        let target = if (2800..=6400).contains(&target) {
            target
        } else {
            warn!("unsupported speed bin {} MT/s, defaulting to 2800 MT/s", target);
            2800
        };
        let offset = target - 2800;
        (400, offset, ((offset - 1) / 400) as u8)
    };

    // 2000 and 2800 MT/s are treated as 2001 and 2801 MT/s
    if offset == 0 {
        offset = 1;
    }
    let in_bin = offset % bin;
    let fine = if in_bin == 0 { 0 } else { ((bin - in_bin) / 20) as u8 };
    (coarse, Some(fine))
}

/// Output enables and driver characteristics, as found in the SPD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RcdOutputs {
    pub qck_enable: u8,
    pub qca_enable: u8,
    pub qck_setup: u8,
    pub qca_qcs_setup: u8,
    pub slew_rates: u8,
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    pub fn rcd_read(&mut self, rcd: u8, rap: Rap) -> Result<RcdData> {
        let cmd = block_cmd(READ_CMD);
        let addr = rcd_address(rcd);

        let mut frame = [0u8; 6];
        frame[0] = 4;
        frame[1..5].copy_from_slice(&rap.bytes());
        frame[5] = pec(cmd, &frame[..5]);
        self.i2c_write(addr, cmd, &frame)?;

        // byte count, status, DWORD, PEC
        let mut reply = [0u8; 7];
        self.i2c_read(addr, cmd, &mut reply, false)?;
        let expected = read_pec(cmd, &reply[..6]);
        if expected != reply[6] {
            warn!("RCD {} RW{:02X}: {}", rcd, rap.reg,
                  Error::PecMismatch { expected, received: reply[6] });
        }

        let mut data = [0; 5];
        data[4] = reply[1];
        for i in 0..4 {
            data[3 - i] = reply[2 + i];
        }
        Ok(data)
    }

    /// Writes up to four registers starting at the RAP register. The
    /// highest register goes first on the wire.
    pub fn rcd_write(&mut self, rcd: u8, rap: Rap, data: &[u8]) -> Result<()> {
        let size = data.len().min(4);
        let cmd = block_cmd(write_cmd(size));
        let len = 4 + size;

        let mut frame = [0u8; 10];
        frame[0] = len as u8;
        frame[1..5].copy_from_slice(&rap.bytes());
        for (i, &byte) in data[..size].iter().rev().enumerate() {
            frame[5 + i] = byte;
        }
        frame[len + 1] = pec(cmd, &frame[..len + 1]);
        self.i2c_write(rcd_address(rcd), cmd, &frame[..len + 2])
    }

    /// Byte mode read: one transfer per byte, framed by start and end bits.
    pub fn rcd_read_bytewise(&mut self, rcd: u8, rap: Rap) -> Result<RcdData> {
        let cmd = byte_cmd(READ_CMD);
        let addr = rcd_address(rcd);
        let header = rap.bytes();
        for (i, byte) in header.iter().enumerate() {
            let flags = match i { 0 => START_BIT, 3 => END_BIT, _ => 0 };
            self.i2c_write(addr, cmd | flags, core::slice::from_ref(byte))?;
        }

        let mut data = [0; 5];
        for i in (0..5).rev() {
            let flags = match i { 4 => START_BIT, 0 => END_BIT, _ => 0 };
            self.i2c_read(addr, cmd | flags, &mut data[i..i + 1], false)?;
        }
        Ok(data)
    }

    pub fn rcd_write_bytewise(&mut self, rcd: u8, rap: Rap, data: &[u8]) -> Result<()> {
        let size = data.len().min(4);
        let cmd = byte_cmd(write_cmd(size));
        let addr = rcd_address(rcd);

        let mut frame = [0u8; 8];
        frame[..4].copy_from_slice(&rap.bytes());
        for (i, &byte) in data[..size].iter().rev().enumerate() {
            frame[4 + i] = byte;
        }
        let len = 4 + size;
        for (i, byte) in frame[..len].iter().enumerate() {
            let flags = if i == 0 { START_BIT } else if i == len - 1 { END_BIT } else { 0 };
            self.i2c_write(addr, cmd | flags, core::slice::from_ref(byte))?;
        }
        Ok(())
    }

    /// Reads the DWORD at `rap`, lets `f` edit it and writes the first
    /// `size` registers back. Returns what was written.
    pub fn rcd_modify<F>(&mut self, rcd: u8, rap: Rap, size: usize, f: F) -> Result<RcdData>
        where F: FnOnce(&mut RcdData)
    {
        let mut data = self.rcd_read(rcd, rap)?;
        f(&mut data);
        self.rcd_write(rcd, rap, &data[..size.min(4)])?;
        self.spin_us(10);
        Ok(data)
    }

    /// Compares the registers at `rap` against what was last written.
    pub fn rcd_verify(&mut self, rcd: u8, rap: Rap, written: &[u8]) -> Result<()> {
        let read = self.rcd_read(rcd, rap)?;
        for (i, (&written, &read)) in written.iter().zip(read.iter()).enumerate() {
            if written != read {
                return Err(Error::Readback { reg: rap.reg + i as u8, written, read })
            }
        }
        Ok(())
    }

    /// RW00[1:0], part of the RCD initialization sequence.
    pub fn rcd_set_dca_rate(&mut self, rank: usize, rate: Rate) -> bool {
        let rcd = rcd_id(rank);
        let result = self.rcd_modify(rcd, Rap::new(0, 0x00), 1, |data| {
            data[0] = (data[0] & !0b11) | (rate as u8 & 0b11);
        }).and_then(|data| self.rcd_verify(rcd, Rap::new(0, 0x00), &data[..1]));
        report(result, "setting DCA rate")
    }

    /// RW05 and RW06.
    pub fn rcd_set_operating_speed(&mut self, rank: usize, speed: OperatingSpeed) -> bool {
        let rcd = rcd_id(rank);
        let (coarse, fine) = speed_setting(speed);
        let result = self.rcd_write(rcd, Rap::new(0, 0x05), &[coarse])
            .and_then(|()| {
                self.spin_us(10);
                match fine {
                    Some(fine) => self.rcd_write(rcd, Rap::new(0, 0x06), &[fine]),
                    None => Ok(()),
                }
            });
        self.spin_us(10);
        match speed {
            OperatingSpeed::PllBypass => report(result, "enabling PLL bypass mode"),
            OperatingSpeed::Rate(_) => report(result, "setting DIMM speed"),
        }
    }

    /// RW05[7] selects the low speed band.
    pub fn rcd_set_speed_band(&mut self, rank: usize, target: u32) -> bool {
        let result = self.rcd_modify(rcd_id(rank), Rap::new(0, 0x04), 4, |data| {
            if target <= 1400 {
                data[1] |= 1 << 7;
            }
        });
        report(result.map(|_| ()), "setting DIMM band")
    }

    /// Disables input bus termination (RW10) and puts every DCA/DCS input
    /// Vref (RW40..RW49) at the middle of its range.
    pub fn rcd_set_termination_and_vref(&mut self, rank: usize) -> bool {
        let rcd = rcd_id(rank);
        let mut ok = report(self.rcd_modify(rcd, Rap::new(0, 0x10), 4, |data| data[0] = 0)
                                .map(|_| ()), "setting IBT");
        for channel in 0..2 {
            for &(reg, count) in [(0x40, 4), (0x44, 4), (0x48, 2)].iter() {
                let result = self.rcd_modify(rcd, Rap::new(channel, reg), 4, |data| {
                    data[..count].iter_mut().for_each(|byte| *byte = 0x2d);
                });
                if let Err(err) = result {
                    error!("problem with setting subchannel {} Vref RW{:02X} in the RCD: {}",
                           channel_name(channel), reg, err);
                    ok = false;
                }
            }
        }
        ok
    }

    /// RW08..RW0A and RW0C/RW0E of both sub-channels.
    pub fn rcd_set_outputs(&mut self, rank: usize, outputs: &RcdOutputs) -> bool {
        let rcd = rcd_id(rank);
        let mut ok = true;
        for channel in 0..2 {
            let enables = self.rcd_modify(rcd, Rap::new(channel, 0x08), 4, |data| {
                data[0] = outputs.qck_enable;
                data[1] = outputs.qca_enable;
                data[2] = outputs.qck_setup;
            });
            let drivers = enables.and_then(|_| {
                self.rcd_modify(rcd, Rap::new(channel, 0x0c), 4, |data| {
                    data[0] = outputs.qca_qcs_setup;
                    data[2] = outputs.slew_rates;
                })
            });
            if let Err(err) = drivers {
                error!("problem with setting subchannel {} output drivers in the RCD: {}",
                       channel_name(channel), err);
                ok = false;
            }
        }
        ok
    }

    fn rcd_command(&mut self, rank: usize, command: u8) -> Result<()> {
        let result = self.rcd_write(rcd_id(rank), Rap::new(0, 0x04), &[command]);
        self.spin_us(10);
        result
    }

    /// Asserts the DRAM reset of `channel`.
    pub fn rcd_set_qrst(&mut self, channel: usize, rank: usize) -> bool {
        let result = self.rcd_command(rank, command::SET_QRST_A + 2 * channel as u8);
        report(result, "setting DRAM reset")
    }

    pub fn rcd_clear_qrst(&mut self, channel: usize, rank: usize) -> bool {
        let result = self.rcd_command(rank, command::CLEAR_QRST_A + 2 * channel as u8);
        report(result, "clearing DRAM reset")
    }

    /// RW01[1]. Command blocking is lifted once Host->RCD training is done.
    pub fn rcd_forward_all_dram_cmds(&mut self, rank: usize, forward: bool) -> bool {
        let result = self.rcd_modify(rcd_id(rank), Rap::new(0, 0x00), 4, |data| {
            data[1] = (data[1] & !0b10) | (forward as u8) << 1;
        });
        report(result.map(|_| ()), "changing command blocking")
    }

    /// Releases QCS of `channel`, through RW04 or with a NOP on DCS/DCA.
    pub fn rcd_release_qcs(&mut self, channel: usize, rank: usize, sideband: bool) -> bool {
        let ok = if sideband {
            let result = self.rcd_command(rank, command::QCS_HIGH_A + channel as u8);
            report(result, "releasing QCS")
        } else {
            self.inject(channel, Payload::new(0xff, 0, 0), Store::SingleShot);
            self.inject(channel, Payload::new(0x01, 1 << rank, 0x1f), Store::SingleShot);
            self.issue_single(channel);
            self.spin_us(1);
            true
        };
        self.spin_us(10);
        ok
    }

    /// RW00[2]: forward CA to the DRAM of the rank selected in RW00[3].
    pub fn enter_ca_pass(&mut self, rcd: u8) -> bool {
        let result = self.rcd_modify(rcd, Rap::new(0, 0x00), 4, |data| data[0] |= 1 << 2);
        report(result.map(|_| ()), "entering CA pass-through")
    }

    pub fn exit_ca_pass(&mut self, rcd: u8) -> bool {
        let result = self.rcd_modify(rcd, Rap::new(0, 0x00), 4, |data| data[0] &= !(1 << 2));
        report(result.map(|_| ()), "exiting CA pass-through")
    }

    pub fn select_ca_pass(&mut self, rank: usize) -> bool {
        let result = self.rcd_modify(rcd_id(rank), Rap::new(0, 0x00), 4, |data| {
            data[0] = (data[0] & !(1 << 3)) | ((rank & 1) as u8) << 3;
        });
        report(result.map(|_| ()), "selecting the CA pass-through rank")
    }
}

#[cfg(test)]
pub mod sim {
    //! RCD answering block transfers on the simulated I2C bus.

    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use std::vec::Vec;
    use crate::i2c::sim::Device;
    use super::{pec, read_pec};

    #[derive(Debug, Default)]
    pub struct RcdState {
        /// Registers keyed by function and register number.
        pub rw: BTreeMap<(u8, u8), u8>,
        /// Ignore writes, so that nothing ever reads back.
        pub frozen: bool,
        /// Every RW04 command received.
        pub commands: Vec<u8>,
        pub bad_pec: usize,
    }

    impl RcdState {
        pub fn get(&self, function: u8, reg: u8) -> u8 {
            self.rw.get(&(function, reg)).cloned().unwrap_or(0)
        }
    }

    #[derive(Debug, Default, Clone)]
    pub struct SimRcd {
        pub state: Rc<RefCell<RcdState>>,
        reply: Vec<u8>,
    }

    impl SimRcd {
        pub fn new() -> SimRcd {
            SimRcd::default()
        }
    }

    impl Device for SimRcd {
        fn write(&mut self, bytes: &[u8]) {
            // a lone command byte opens a block read
            if bytes.len() < 2 {
                return
            }
            let cmd = bytes[0];
            let frame = &bytes[1..];
            let len = frame[0] as usize;
            let mut state = self.state.borrow_mut();
            if frame.len() != len + 2 || pec(cmd, &frame[..len + 1]) != frame[len + 1] {
                state.bad_pec += 1;
                return
            }
            let (function, reg) = (frame[2] & 0xf, frame[4]);
            if (cmd >> 2) & 0b11 == 0 {
                let mut reply = vec![5, 0x01];
                for i in (0..4).rev() {
                    reply.push(state.get(function, reg + i));
                }
                reply.push(read_pec(cmd, &reply));
                self.reply = reply;
                return
            }
            let data = &frame[5..len + 1];
            if reg == 0x04 && data.len() == 1 {
                state.commands.push(data[0]);
            }
            if !state.frozen {
                for (i, &byte) in data.iter().enumerate() {
                    let target = reg + (data.len() - 1 - i) as u8;
                    state.rw.insert((function, target), byte);
                }
            }
        }

        fn read(&mut self) -> u8 {
            if self.reply.is_empty() { 0xff } else { self.reply.remove(0) }
        }
    }
}
