use core::fmt;

/// Training stage that can abort the DDR5 flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HostRcd,
    CsCa,
    Enumerate,
    Read,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Stage::HostRcd   => write!(f, "Host->RCD CS/CA training"),
            &Stage::CsCa      => write!(f, "CS/CA training"),
            &Stage::Enumerate => write!(f, "enumeration"),
            &Stage::Read      => write!(f, "read training"),
            &Stage::Write     => write!(f, "write training"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    I2cBus(&'static str),
    I2cNack { addr: u8 },
    PecMismatch { expected: u8, received: u8 },
    SpdPage(u8),
    TooManyModules(usize),
    Readback { reg: u8, written: u8, read: u8 },
    Training(Stage),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Error::I2cBus(msg) =>
                write!(f, "I2C bus error: {}", msg),
            &Error::I2cNack { addr } =>
                write!(f, "no acknowledge from I2C device 0x{:02x}", addr),
            &Error::PecMismatch { expected, received } =>
                write!(f, "PEC mismatch: expected 0x{:02x}, received 0x{:02x}", expected, received),
            &Error::SpdPage(page) =>
                write!(f, "SPD page {} does not exist", page),
            &Error::TooManyModules(modules) =>
                write!(f, "cannot enumerate {} modules, at most 16 are addressable", modules),
            &Error::Readback { reg, written, read } =>
                write!(f, "RW{:02X} read back 0x{:02x}, wrote 0x{:02x}", reg, read, written),
            &Error::Training(stage) =>
                write!(f, "{} failed", stage),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
