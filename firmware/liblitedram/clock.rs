/// Busy-wait time source. Training never sleeps, it only spins.
pub trait Clock {
    fn get_us(&mut self) -> u64;

    fn spin_us(&mut self, interval: u64) {
        let threshold = self.get_us() + interval;
        while self.get_us() < threshold {}
    }

    fn spin_ms(&mut self, interval: u64) {
        self.spin_us(interval * 1_000)
    }
}

/// Clock derived from the `mcycle` counter of the CPU.
#[cfg(target_arch = "riscv32")]
pub struct CycleClock {
    freq: u64,
    last: u64,
    elapsed: u64,
}

#[cfg(target_arch = "riscv32")]
impl CycleClock {
    pub fn new(clock_frequency: u32) -> CycleClock {
        CycleClock {
            freq: clock_frequency as u64,
            last: riscv::register::mcycle::read() as u64,
            elapsed: 0,
        }
    }
}

#[cfg(target_arch = "riscv32")]
impl Clock for CycleClock {
    fn get_us(&mut self) -> u64 {
        // mcycle is only 32 bits wide on rv32, accumulate the deltas
        let now = riscv::register::mcycle::read() as u64;
        self.elapsed += now.wrapping_sub(self.last) & 0xffff_ffff;
        self.last = now;
        cycles_to_us(self.elapsed, self.freq)
    }
}

#[cfg(any(target_arch = "riscv32", test))]
fn cycles_to_us(cycles: u64, freq: u64) -> u64 {
    cycles * 1_000_000 / freq.max(1)
}

#[cfg(test)]
pub mod sim {
    use super::Clock;

    /// Clock that advances only when something spins on it.
    #[derive(Debug, Default)]
    pub struct SimClock {
        pub now: u64,
    }

    impl Clock for SimClock {
        fn get_us(&mut self) -> u64 {
            self.now
        }

        fn spin_us(&mut self, interval: u64) {
            self.now += interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::cycles_to_us;

    #[test]
    fn slow_clocks_convert() {
        assert_eq!(cycles_to_us(125_000_000, 125_000_000), 1_000_000);
        assert_eq!(cycles_to_us(3, 32_768), 91);
        assert_eq!(cycles_to_us(10, 0), 10_000_000);
    }
}
