//! DDR5 bring-up and training for LiteDRAM PHYs.
//!
//! The engine drives the DFI command injector to train the command bus
//! (CS and CA), enumerate the dies, and train reads and writes. RDIMMs
//! are handled by training the host to RCD link first and the RCD to
//! DRAM link second, with the RCD reached over its I2C sideband.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate byteorder;
extern crate crc;
#[cfg(target_arch = "riscv32")]
extern crate riscv;

pub mod clock;
pub mod config;
pub mod error;
pub mod csr;
pub mod sample;
pub mod injector;
pub mod phy;
pub mod delay;
pub mod jedec;
pub mod eye;
pub mod trainer;
pub mod cs_ca;
pub mod remap;
pub mod enumerate;
pub mod read;
pub mod write;
pub mod i2c;
pub mod rcd;
pub mod rcd_train;
pub mod spd;
pub mod pmic;
pub mod sequences;
pub mod flow;
pub mod logger;
#[cfg(feature = "uart_console")]
#[macro_use]
pub mod uart_console;

pub use config::TrainingConfig;
pub use error::{Error, Stage};
pub use flow::Report;
pub use phy::{Ddr5Phy, PhySettings};
