//! Per DRAM addressability: giving every die of a rank its own id.
//!
//! In PDA enumerate mode a die latches the id of an MPC only if its DQ
//! lines are held low while the command is sent. The ids are then checked
//! by letting one die at a time answer the MPR serial pattern with zeros.

use crate::clock::Clock;
use crate::csr::CsrBus;
use crate::error::{Error, Result};
use crate::injector::{Payload, Store};
use crate::jedec::{channel_name, mpc, MODULE_BROADCAST};
use crate::phy::Ddr5Phy;
use crate::sample::{Reduce, SampleBuffer};
use crate::trainer::TrainingContext;

/// Ids 0..=14 are assignable, 15 is the broadcast id.
pub const MAX_ENUMERATED: usize = 15;

/// Whether the capture of a check shows exactly `module` answering with
/// zeros, or for `None`, every module answering with ones.
fn enumerate_result(result: &SampleBuffer, module: Option<usize>, width: usize,
                    modules: usize) -> bool {
    match module {
        Some(module) => (0..modules).all(|other| {
            if other == module {
                !result.reduce_module(other, width, Reduce::Or)
            } else {
                result.reduce_module(other, width, Reduce::And)
            }
        }),
        None => result.reduce(Reduce::And),
    }
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    fn fill_write_data(&mut self, channel: usize, module: usize, width: usize, value: u32) {
        for phase in 0..8 {
            self.set_data_module_phase(channel, module, width, phase, value);
        }
    }

    /// Sends the enumerate id of `module` with only its DQs driven low.
    fn setup_enumerate(&mut self, channel: usize, rank: usize, module: usize, width: usize,
                       modules: usize) {
        for other in 0..modules {
            self.fill_write_data(channel, other, width, 0xffff);
        }
        self.fill_write_data(channel, module, width, 0);
        self.spin_us(1);
        self.send_mpc(channel, rank, mpc::PDA_ENUMERATE_ID | (module as u8 & 0xf), true);
        for other in 0..modules {
            self.fill_write_data(channel, other, width, 0xffff);
        }
    }

    pub fn module_enumerate(&mut self, rank: usize, width: usize, channels: usize,
                            modules: usize) -> Result<()> {
        if modules > MAX_ENUMERATED {
            self.session.enumerated = false;
            return Err(Error::TooManyModules(modules))
        }
        info!("enumerating rank {}", rank);
        for channel in 0..channels {
            debug!("enumerating subchannel {}", channel_name(channel));
            self.send_mpc(channel, rank, mpc::ENTER_PDA_ENUMERATE, true);
            for module in 0..modules {
                self.setup_enumerate(channel, rank, module, width, modules);
            }
            self.send_mpc(channel, rank, mpc::EXIT_PDA_ENUMERATE, true);
            self.spin_us(1);
            self.send_mpc(channel, rank, mpc::EXIT_PDA_ENUMERATE, false);
            self.spin_us(1);
        }
        self.session.enumerated = true;
        Ok(())
    }

    /// Every die answers the MPR serial pattern with ones, except `module`
    /// which answers with zeros.
    fn check_enumerate(&mut self, channel: usize, rank: usize, module: Option<usize>,
                       width: usize, modules: usize) -> bool {
        self.send_mrw(channel, rank, MODULE_BROADCAST, 26, 0xff);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 27, 0xff);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 28, 0x00);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 29, 0x00);
        if let Some(module) = module {
            self.send_mrw(channel, rank, module as u8, 26, 0x00);
            self.send_mrw(channel, rank, module as u8, 27, 0x00);
        }
        self.send_mrw(channel, rank, MODULE_BROADCAST, 25, 0x08);

        self.inject(channel, Payload::new(0x0f, 0, 0).read(), Store::Continuous);
        self.store_continuous(channel);
        self.spin_us(1);
        self.send_mrr(channel, rank, 31);
        self.spin_us(1);
        self.setup_capture(channel, if module.is_some() { 0 } else { 3 });
        self.spin_us(1);
        self.start_capture(channel);
        self.spin_us(1);
        self.stop_capture(channel);

        self.send_mrw(channel, rank, MODULE_BROADCAST, 25, 0x00);
        self.spin_us(1);
        self.send_mrw(channel, rank, MODULE_BROADCAST, 25, 0x00);

        let result = self.result_array(channel);
        let good = enumerate_result(&result, module, width, modules);
        match module {
            Some(module) => debug!("  module {:2}: {}", module, if good { "pass" } else { "fail" }),
            None => debug!("  baseline: {}", if good { "pass" } else { "fail" }),
        }
        good
    }

    pub fn check_enumerate_rank(&mut self, rank: usize, width: usize, channels: usize,
                                modules: usize) -> bool {
        if !self.session.enumerated {
            return false
        }
        info!("checking enumeration of rank {}", rank);
        let mut ok = true;
        for channel in 0..channels {
            let flags = self.session.mr2_flags();
            self.send_mrw(channel, rank, MODULE_BROADCAST, 2, 1 | flags);
            ok &= self.check_enumerate(channel, rank, None, width, modules);
            for module in 0..modules {
                ok &= self.check_enumerate(channel, rank, Some(module), width, modules);
            }
            self.send_mrw(channel, rank, MODULE_BROADCAST, 2, flags);
            self.spin_us(1);
        }
        ok
    }

    /// Enumerates and checks the dies of `rank`.
    pub fn dram_enumerate(&mut self, ctx: &TrainingContext, rank: usize) -> bool {
        if let Err(err) = self.module_enumerate(rank, ctx.die_width, ctx.channels, ctx.modules) {
            error!("{}", err);
        }
        self.check_enumerate_rank(rank, ctx.die_width, ctx.channels, ctx.modules)
    }
}
