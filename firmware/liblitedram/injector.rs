//! DFI command injector: staging and firing command bursts, capturing DQ.

use crate::clock::Clock;
use crate::csr::{Csr, CsrBus, Injector};
use crate::phy::Ddr5Phy;
use crate::sample::{Reduce, SampleBuffer};

/// One DFI command burst, applied to every phase set in `phases`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Payload {
    pub phases: u8,
    pub cs: u8,
    /// 14-bit CA word.
    pub command: u16,
    pub wrdata_en: bool,
    pub wrdata_mask: u64,
    pub rddata_en: bool,
}

impl Payload {
    pub fn new(phases: u8, cs: u8, command: u16) -> Payload {
        Payload { phases, cs, command, ..Payload::default() }
    }

    pub fn write(self) -> Payload {
        Payload { wrdata_en: true, ..self }
    }

    pub fn read(self) -> Payload {
        Payload { rddata_en: true, ..self }
    }

    pub fn mask(self, wrdata_mask: u64) -> Payload {
        Payload { wrdata_mask, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// Replayed on every cycle once issued.
    Continuous,
    /// Sent once by `issue_single`.
    SingleShot,
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn injector(&mut self, channel: usize, reg: Injector, value: u32) {
        self.bus.write(Csr::Injector(channel, reg), value)
    }

    pub fn inject(&mut self, channel: usize, payload: Payload, store: Store) {
        let settings = &self.settings;
        let storage = (payload.command as u32 & 0x3fff) |
                      (payload.cs as u32) << settings.cs_offset() |
                      (payload.wrdata_en as u32) << settings.wrdata_en_offset() |
                      (payload.rddata_en as u32) << settings.rddata_en_offset();
        self.injector(channel, Injector::CommandStorage, storage);
        self.injector(channel, Injector::CommandStorageWrMask, payload.wrdata_mask as u32);
        self.injector(channel, Injector::PhaseAddr, payload.phases as u32);
        match store {
            Store::Continuous => self.injector(channel, Injector::StoreContinuousCmd, 1),
            Store::SingleShot => self.injector(channel, Injector::StoreSingleshotCmd, 1),
        }
    }

    /// Starts replaying the continuous command buffer.
    pub fn store_continuous(&mut self, channel: usize) {
        self.injector(channel, Injector::SingleShot, 0);
        self.injector(channel, Injector::IssueCommand, 1);
    }

    /// Fires the single-shot buffer exactly once.
    pub fn issue_single(&mut self, channel: usize) {
        self.injector(channel, Injector::SingleShot, 1);
        self.injector(channel, Injector::IssueCommand, 1);
        self.injector(channel, Injector::SingleShot, 0);
    }

    /// Fires the single-shot buffers of every sub-channel in the same cycle.
    pub fn force_issue_single(&mut self) {
        for channel in (0..self.channels()).rev() {
            self.injector(channel, Injector::SingleShot, 1);
        }
        self.bus.write(Csr::DfiiForceIssue, 1);
        for channel in (0..self.channels()).rev() {
            self.injector(channel, Injector::SingleShot, 0);
        }
        self.spin_us(1);
    }

    pub fn setup_rddata_cnt(&mut self, channel: usize, count: u32) {
        self.injector(channel, Injector::RddataCaptureCnt, count)
    }

    pub fn setup_capture(&mut self, channel: usize, setup: u32) {
        self.injector(channel, Injector::Sample, 0);
        self.injector(channel, Injector::Setup, setup);
        self.injector(channel, Injector::Reset, 1);
    }

    pub fn start_capture(&mut self, channel: usize) {
        self.injector(channel, Injector::Sample, 1)
    }

    pub fn stop_capture(&mut self, channel: usize) {
        self.injector(channel, Injector::Sample, 0)
    }

    fn buffer(&mut self, csr: Csr) -> SampleBuffer {
        let mut buffer = SampleBuffer::new(self.settings.data_bytes());
        self.bus.read_buf(csr, buffer.as_bytes_mut());
        buffer
    }

    /// Accumulated samples of the last capture window.
    pub fn result_array(&mut self, channel: usize) -> SampleBuffer {
        self.buffer(Csr::Injector(channel, Injector::ResultArray))
    }

    /// Data returned by the last read burst on `phase`.
    pub fn rddata(&mut self, channel: usize, phase: usize) -> SampleBuffer {
        self.injector(channel, Injector::RddataSelect, phase as u32);
        self.buffer(Csr::Injector(channel, Injector::Rddata))
    }

    /// Write data currently staged for `phase`.
    pub fn wrdata(&mut self, channel: usize, phase: usize) -> SampleBuffer {
        self.injector(channel, Injector::WrdataSelect, phase as u32);
        self.buffer(Csr::Injector(channel, Injector::WrdataS))
    }

    pub fn set_wrdata(&mut self, channel: usize, phase: usize, data: &SampleBuffer) {
        self.injector(channel, Injector::WrdataSelect, phase as u32);
        self.bus.write_buf(Csr::Injector(channel, Injector::Wrdata), data.as_bytes());
        self.injector(channel, Injector::WrdataStore, 1);
    }

    pub fn data_module_phase(&mut self, channel: usize, module: usize, width: usize,
                             phase: usize) -> u32 {
        self.rddata(channel, phase).module(module, width)
    }

    pub fn wdata_module_phase(&mut self, channel: usize, module: usize, width: usize,
                              phase: usize) -> u32 {
        self.wrdata(channel, phase).module(module, width)
    }

    /// Read-modify-write of one module's staged write data.
    pub fn set_data_module_phase(&mut self, channel: usize, module: usize, width: usize,
                                 phase: usize, value: u32) {
        let mut data = self.wrdata(channel, phase);
        data.set_module(module, width, value);
        self.set_wrdata(channel, phase, &data);
    }

    pub fn capture_and_reduce(&mut self, channel: usize, op: Reduce) -> bool {
        self.result_array(channel).reduce(op)
    }

    pub fn capture_and_reduce_module(&mut self, channel: usize, module: usize, width: usize,
                                     op: Reduce) -> bool {
        self.result_array(channel).reduce_module(module, width, op)
    }

    fn sample_window(&mut self, channel: usize, setup: u32) {
        self.setup_capture(channel, setup);
        self.spin_us(1);
        self.start_capture(channel);
        self.spin_us(5);
        self.stop_capture(channel);
    }

    /// True if any DQ toggled high during the window.
    pub fn or_sample(&mut self, channel: usize) -> bool {
        self.sample_window(channel, 0);
        self.capture_and_reduce(channel, Reduce::Or)
    }

    /// True if every DQ stayed high during the window.
    pub fn and_sample(&mut self, channel: usize) -> bool {
        self.sample_window(channel, 3);
        self.capture_and_reduce(channel, Reduce::And)
    }

    /// True if no DQ of `module` toggled high during the window.
    pub fn or_sample_module(&mut self, channel: usize, module: usize, width: usize) -> bool {
        self.sample_window(channel, 0);
        !self.capture_and_reduce_module(channel, module, width, Reduce::Or)
    }

    pub fn and_sample_module(&mut self, channel: usize, module: usize, width: usize) -> bool {
        self.sample_window(channel, 3);
        self.capture_and_reduce_module(channel, module, width, Reduce::And)
    }
}

#[cfg(test)]
mod tests {
    use crate::csr::{Csr, Injector};
    use crate::phy::sim;
    use super::*;

    #[test]
    fn payload_fields_are_packed_into_command_storage() {
        let mut phy = sim::phy();
        phy.inject(1, Payload::new(0x0f, 0b10, 0x3fff).read(), Store::Continuous);
        let storage = phy.bus.regs[&Csr::Injector(1, Injector::CommandStorage)];
        assert_eq!(storage, 0x3fff | 0b10 << 14 | 1 << 17);
        assert_eq!(phy.bus.regs[&Csr::Injector(1, Injector::PhaseAddr)], 0x0f);
        assert_eq!(phy.bus.count(Csr::Injector(1, Injector::StoreContinuousCmd)), 1);
        assert_eq!(phy.bus.count(Csr::Injector(1, Injector::StoreSingleshotCmd)), 0);
    }

    #[test]
    fn issue_single_clears_single_shot() {
        let mut phy = sim::phy();
        phy.issue_single(0);
        let writes: Vec<_> = phy.bus.writes.iter().cloned().collect();
        assert_eq!(writes, vec![
            (Csr::Injector(0, Injector::SingleShot), 1),
            (Csr::Injector(0, Injector::IssueCommand), 1),
            (Csr::Injector(0, Injector::SingleShot), 0),
        ]);
    }

    #[test]
    fn module_write_data_is_read_modify_write() {
        let mut phy = sim::phy();
        phy.bus.bufs.insert(Csr::Injector(0, Injector::WrdataS), vec![0xaa; 10]);
        phy.set_data_module_phase(0, 0, 8, 3, 0x1234);
        let written = &phy.bus.bufs[&Csr::Injector(0, Injector::Wrdata)];
        assert_eq!(written[..8], [0xaa; 8]);
        assert_eq!(written[8..], [0x12, 0x34]);
        assert_eq!(phy.bus.regs[&Csr::Injector(0, Injector::WrdataSelect)], 3);
    }

    #[test]
    fn module_samples() {
        let mut phy = sim::phy();
        let mut result = vec![0xff; 10];
        result[9] = 0xfe;
        phy.bus.bufs.insert(Csr::Injector(0, Injector::ResultArray), result);
        assert!(!phy.and_sample(0));
        assert!(!phy.and_sample_module(0, 0, 8));
        assert!(phy.and_sample_module(0, 1, 8));
        assert!(!phy.or_sample_module(0, 4, 8));
        assert!(phy.or_sample(0));
    }
}
