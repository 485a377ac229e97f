//! Bit-banged I2C master on the LiteX `i2c` pads, used for the SPD, the
//! PMIC and the RCD sideband bus.
//!
//! SDA is open drain: the master either pulls it low or releases it.
//! SCL is driven by the master only.

use crate::clock::Clock;
use crate::csr::{Csr, CsrBus, I2C_OE, I2C_SCL, I2C_SDA};
use crate::error::{Error, Result};
use crate::phy::Ddr5Phy;

/// 200 kHz bus.
const HALF_PERIOD_US: u64 = 3;

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn half_period(&mut self) {
        self.spin_us(HALF_PERIOD_US)
    }

    fn sda_i(&mut self) -> bool {
        self.bus.read(Csr::I2cR) & 1 != 0
    }

    fn sda_oe(&mut self, oe: bool) {
        self.bus.modify(Csr::I2cW, |reg| {
            let reg = reg & !I2C_SDA;
            if oe { reg | I2C_OE } else { reg & !I2C_OE }
        })
    }

    fn scl_o(&mut self, o: bool) {
        self.bus.modify(Csr::I2cW, |reg| if o { reg | I2C_SCL } else { reg & !I2C_SCL })
    }

    pub fn i2c_init(&mut self) -> Result<()> {
        self.sda_oe(false);
        self.scl_o(true);

        // Check the I2C bus is ready
        self.half_period();
        self.half_period();
        if !self.sda_i() {
            // Try toggling SCL a few times
            for _bit in 0..8 {
                self.scl_o(false);
                self.half_period();
                self.scl_o(true);
                self.half_period();
            }
        }

        if !self.sda_i() {
            return Err(Error::I2cBus("SDA is stuck low and doesn't get unstuck"))
        }
        // postcondition: SCL and SDA high
        Ok(())
    }

    pub fn i2c_start(&mut self) -> Result<()> {
        // precondition: SCL and SDA high
        if !self.sda_i() {
            return Err(Error::I2cBus("SDA arbitration lost"))
        }
        self.sda_oe(true);
        self.half_period();
        self.scl_o(false);
        // postcondition: SCL and SDA low
        Ok(())
    }

    pub fn i2c_restart(&mut self) -> Result<()> {
        // precondition SCL and SDA low
        self.sda_oe(false);
        self.half_period();
        self.scl_o(true);
        self.half_period();
        self.i2c_start()
    }

    pub fn i2c_stop(&mut self) -> Result<()> {
        // precondition: SCL and SDA low
        self.half_period();
        self.scl_o(true);
        self.half_period();
        self.sda_oe(false);
        self.half_period();
        if !self.sda_i() {
            return Err(Error::I2cBus("SDA arbitration lost"))
        }
        // postcondition: SCL and SDA high
        Ok(())
    }

    /// Shifts out one byte and returns whether the target acknowledged it.
    pub fn i2c_write_byte(&mut self, data: u8) -> bool {
        // precondition: SCL and SDA low
        // MSB first
        for bit in (0..8).rev() {
            self.sda_oe(data & (1 << bit) == 0);
            self.half_period();
            self.scl_o(true);
            self.half_period();
            self.scl_o(false);
        }
        self.sda_oe(false);
        self.half_period();
        self.scl_o(true);
        self.half_period();
        // Read ack/nack
        let ack = !self.sda_i();
        self.scl_o(false);
        self.sda_oe(true);
        // postcondition: SCL and SDA low
        ack
    }

    pub fn i2c_read_byte(&mut self, ack: bool) -> u8 {
        // precondition: SCL and SDA low
        self.sda_oe(false);

        let mut data: u8 = 0;

        // MSB first
        for bit in (0..8).rev() {
            self.half_period();
            self.scl_o(true);
            self.half_period();
            if self.sda_i() { data |= 1 << bit }
            self.scl_o(false);
        }
        // Send ack/nack
        self.sda_oe(ack);
        self.half_period();
        self.scl_o(true);
        self.half_period();
        self.scl_o(false);
        self.sda_oe(true);
        // postcondition: SCL and SDA low
        data
    }

    fn i2c_send(&mut self, addr: u8, data: u8) -> Result<()> {
        if !self.i2c_write_byte(data) {
            return Err(Error::I2cNack { addr })
        }
        Ok(())
    }

    /// Runs `f` between a start and a stop condition. The stop is sent
    /// even when `f` fails, so that the bus is released.
    fn i2c_transfer<T, F>(&mut self, f: F) -> Result<T>
        where F: FnOnce(&mut Self) -> Result<T>
    {
        self.i2c_start()?;
        let result = f(self);
        let stop = self.i2c_stop();
        let value = result?;
        stop?;
        Ok(value)
    }

    /// Writes `data` to register `reg` of the 7-bit address `addr`.
    pub fn i2c_write(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<()> {
        self.i2c_transfer(|phy| {
            phy.i2c_send(addr, addr << 1)?;
            phy.i2c_send(addr, reg)?;
            for &byte in data {
                phy.i2c_send(addr, byte)?;
            }
            Ok(())
        })
    }

    /// Reads `data.len()` bytes starting at register `reg`. With `send_stop`
    /// the register address phase is closed by a stop instead of a
    /// repeated start.
    pub fn i2c_read(&mut self, addr: u8, reg: u8, data: &mut [u8], send_stop: bool) -> Result<()> {
        self.i2c_transfer(|phy| {
            phy.i2c_send(addr, addr << 1)?;
            phy.i2c_send(addr, reg)?;
            if send_stop {
                phy.i2c_stop()?;
                phy.i2c_start()?;
            } else {
                phy.i2c_restart()?;
            }
            phy.i2c_send(addr, addr << 1 | 1)?;
            let last = data.len().saturating_sub(1);
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = phy.i2c_read_byte(i != last);
            }
            Ok(())
        })
    }

    /// Whether a device answers at `addr`.
    pub fn i2c_poll(&mut self, addr: u8) -> bool {
        self.i2c_transfer(|phy| phy.i2c_send(addr, addr << 1)).is_ok()
    }
}

#[cfg(test)]
pub mod sim {
    //! I2C targets attached to the simulated pads.

    use std::boxed::Box;
    use std::collections::BTreeMap;
    use std::vec::Vec;
    use crate::csr::{Csr, CsrBus, I2C_OE, I2C_SCL, I2C_SDA};
    use crate::csr::sim::SimBus;

    pub trait Device {
        /// Bytes written after the address byte, delivered at the stop or
        /// repeated start that ends the write.
        fn write(&mut self, bytes: &[u8]);
        /// Next byte of a read.
        fn read(&mut self) -> u8;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum State {
        Idle,
        Receive,
        AckOut,
        Transmit,
        AckIn,
    }

    /// Register file with an I2C bus decoded from the `I2cW` writes.
    pub struct I2cSimBus {
        pub csrs: SimBus,
        pub devices: BTreeMap<u8, Box<dyn Device>>,
        /// Target address and bytes of every completed write.
        pub transfers: Vec<(u8, Vec<u8>)>,
        scl: bool,
        sda: bool,
        target_low: bool,
        state: State,
        bits: u8,
        byte: u8,
        first: bool,
        target: Option<u8>,
        reading: bool,
        master_nack: bool,
        written: Vec<u8>,
    }

    impl I2cSimBus {
        pub fn new() -> I2cSimBus {
            I2cSimBus {
                csrs: SimBus::new(),
                devices: BTreeMap::new(),
                transfers: Vec::new(),
                scl: false,
                sda: true,
                target_low: false,
                state: State::Idle,
                bits: 0,
                byte: 0,
                first: false,
                target: None,
                reading: false,
                master_nack: false,
                written: Vec::new(),
            }
        }

        pub fn attach(&mut self, addr: u8, device: impl Device + 'static) {
            self.devices.insert(addr, Box::new(device));
        }

        fn line(&self) -> bool {
            self.sda && !self.target_low
        }

        fn deliver(&mut self) {
            if let Some(addr) = self.target {
                if !self.reading && !self.written.is_empty() {
                    let written = core::mem::take(&mut self.written);
                    if let Some(device) = self.devices.get_mut(&addr) {
                        device.write(&written);
                    }
                    self.transfers.push((addr, written));
                }
            }
            self.written.clear();
        }

        fn start_condition(&mut self) {
            self.deliver();
            self.state = State::Receive;
            self.bits = 0;
            self.byte = 0;
            self.first = true;
            self.target = None;
            self.target_low = false;
        }

        fn stop_condition(&mut self) {
            self.deliver();
            self.state = State::Idle;
            self.target = None;
            self.target_low = false;
        }

        fn drive_bit(&mut self) {
            self.target_low = (self.byte >> (7 - self.bits)) & 1 == 0;
        }

        fn load_byte(&mut self) {
            let addr = self.target.unwrap_or(0);
            self.byte = self.devices.get_mut(&addr).map(|device| device.read()).unwrap_or(0xff);
            self.bits = 0;
            self.state = State::Transmit;
            self.drive_bit();
        }

        fn rising(&mut self) {
            match self.state {
                State::Receive => {
                    self.byte = self.byte << 1 | self.line() as u8;
                    self.bits += 1;
                }
                State::AckIn => self.master_nack = self.line(),
                _ => (),
            }
        }

        fn falling(&mut self) {
            match self.state {
                State::Receive if self.bits == 8 => {
                    if self.first {
                        self.first = false;
                        let addr = self.byte >> 1;
                        if self.devices.contains_key(&addr) {
                            self.target = Some(addr);
                            self.reading = self.byte & 1 != 0;
                            self.target_low = true;
                            self.state = State::AckOut;
                        } else {
                            self.state = State::Idle;
                        }
                    } else {
                        self.written.push(self.byte);
                        self.target_low = true;
                        self.state = State::AckOut;
                    }
                }
                State::AckOut => {
                    self.target_low = false;
                    if self.reading {
                        self.load_byte();
                    } else {
                        self.state = State::Receive;
                        self.bits = 0;
                        self.byte = 0;
                    }
                }
                State::Transmit => {
                    self.bits += 1;
                    if self.bits == 8 {
                        self.target_low = false;
                        self.state = State::AckIn;
                    } else {
                        self.drive_bit();
                    }
                }
                State::AckIn => {
                    if self.master_nack {
                        self.state = State::Idle;
                    } else {
                        self.load_byte();
                    }
                }
                _ => (),
            }
        }

        fn pads(&mut self, value: u32) {
            let scl = value & I2C_SCL != 0;
            let sda = value & I2C_OE == 0 || value & I2C_SDA != 0;
            let (was_scl, before) = (self.scl, self.line());
            self.scl = scl;
            self.sda = sda;
            let after = self.line();
            match (was_scl, scl) {
                (true, true) if before && !after => self.start_condition(),
                (true, true) if !before && after => self.stop_condition(),
                (false, true) => self.rising(),
                (true, false) => self.falling(),
                _ => (),
            }
        }
    }

    impl CsrBus for I2cSimBus {
        fn read(&mut self, csr: Csr) -> u32 {
            match csr {
                Csr::I2cR => self.line() as u32,
                _ => self.csrs.read(csr),
            }
        }

        fn write(&mut self, csr: Csr, value: u32) {
            self.csrs.write(csr, value);
            if csr == Csr::I2cW {
                self.pads(value)
            }
        }

        fn read_buf(&mut self, csr: Csr, buf: &mut [u8]) {
            self.csrs.read_buf(csr, buf)
        }

        fn write_buf(&mut self, csr: Csr, buf: &[u8]) {
            self.csrs.write_buf(csr, buf)
        }
    }

    /// Device that records writes and answers reads from a queue.
    #[derive(Debug, Default)]
    pub struct Echo {
        pub replies: Vec<u8>,
    }

    impl Device for Echo {
        fn write(&mut self, _bytes: &[u8]) {}

        fn read(&mut self) -> u8 {
            if self.replies.is_empty() { 0xff } else { self.replies.remove(0) }
        }
    }
}
