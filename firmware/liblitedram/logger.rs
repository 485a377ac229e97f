use core::fmt;
use log::Record;

/// `[seconds.micros s] LEVEL(target): message`
pub fn write_record<W: fmt::Write>(w: &mut W, timestamp: u64, record: &Record) -> fmt::Result {
    let seconds = timestamp / 1_000_000;
    let micros  = timestamp % 1_000_000;

    writeln!(w, "[{:6}.{:06}s] {:>5}({}): {}",
             seconds, micros, record.level(), record.target(), record.args())
}

#[cfg(feature = "uart_console")]
pub use self::console::ConsoleLogger;

#[cfg(feature = "uart_console")]
mod console {
    use log::{Log, LevelFilter, Metadata, Record, SetLoggerError, set_logger, set_max_level};

    use crate::uart_console::Console;

    /// Logs to the UART console, stamped by a board supplied microsecond
    /// clock.
    pub struct ConsoleLogger {
        now: fn() -> u64,
    }

    impl ConsoleLogger {
        pub const fn new(now: fn() -> u64) -> ConsoleLogger {
            ConsoleLogger { now }
        }

        pub fn register(&'static self) -> Result<(), SetLoggerError> {
            set_logger(self)?;
            set_max_level(LevelFilter::Trace);
            Ok(())
        }
    }

    impl Log for ConsoleLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let _ = super::write_record(&mut Console, (self.now)(), record);
            }
        }

        fn flush(&self) {
        }
    }
}

#[cfg(test)]
mod tests {
    use std::string::String;
    use log::Level;
    use super::*;

    #[test]
    fn record_layout() {
        let mut out = String::new();
        write_record(&mut out, 12_000_345, &Record::builder()
            .args(format_args!("CS eye {}..{}", 20, 35))
            .level(Level::Info)
            .target("litedram::cs_ca")
            .build()).unwrap();
        assert_eq!(out, "[    12.000345s]  INFO(litedram::cs_ca): CS eye 20..35\n");
    }
}
