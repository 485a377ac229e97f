use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

/// LiteX UART CSRs, relative to the block base.
const RXTX: usize = 0x00;
const TXFULL: usize = 0x04;

static UART_BASE: AtomicUsize = AtomicUsize::new(0);

/// Writer over the LiteX UART. Output is dropped until a base is set.
pub struct Console;

impl Console {
    /// # Safety
    ///
    /// `base` must be the address of the UART CSR block, and nothing else
    /// may drive the UART afterwards.
    pub unsafe fn set_base(base: usize) {
        UART_BASE.store(base, Ordering::Relaxed)
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> Result<(), fmt::Error> {
        let base = UART_BASE.load(Ordering::Relaxed);
        if base == 0 {
            return Ok(())
        }

        for c in s.bytes() {
            unsafe {
                while ptr::read_volatile((base + TXFULL) as *const u32) != 0 {}
                ptr::write_volatile((base + RXTX) as *mut u32, c as u32)
            }
        }

        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = write!($crate::uart_console::Console, $($arg)*);
    })
}

#[macro_export]
macro_rules! println {
    ($fmt:expr) => (print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => (print!(concat!($fmt, "\n"), $($arg)*));
}
