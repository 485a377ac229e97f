//! DDR5 bring-up, from RDIMM detection to write training.

use crate::clock::Clock;
use crate::config::TrainingConfig;
use crate::cs_ca::cs_ca_training;
use crate::csr::CsrBus;
use crate::error::{Error, Result, Stage};
use crate::jedec::MODULE_BROADCAST;
use crate::phy::{Ddr5Phy, Session};
use crate::rcd::{OperatingSpeed, RcdOutputs};
use crate::rcd_train::{HostRcd, RcdDram};
use crate::spd::ModuleType;
use crate::trainer::{HostDram, Rate, TrainingContext, MAX_CHANNELS, MAX_RANKS};

/// Outcome of a completed flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub rdimm: bool,
    pub rate: Rate,
    pub ranks: usize,
    pub n2_mode: bool,
    /// First stage that failed while `keep_going` was set.
    pub failed: Option<Stage>,
    /// Command bus training of the DRAM, host or RCD side.
    pub command_bus: TrainingContext,
}

struct Stages<'a> {
    config: &'a TrainingConfig,
    failed: Option<Stage>,
}

impl<'a> Stages<'a> {
    fn check(&mut self, stage: Stage, ok: bool) -> Result<()> {
        if ok {
            return Ok(())
        }
        error!("{} failed", stage);
        if self.config.keep_going {
            self.failed.get_or_insert(stage);
            Ok(())
        } else {
            Err(Error::Training(stage))
        }
    }
}

impl<B: CsrBus, C: Clock> Ddr5Phy<B, C> {
    /// Powers the module up and trains Host->RCD. Only the first PMIC and
    /// the first RCD are brought up.
    pub fn rcd_init(&mut self, ctx: &mut TrainingContext, config: &TrainingConfig) {
        if let Err(err) = self.pmic_enable(0) {
            error!("problem with enabling the PMIC: {}", err);
        }
        self.spin_ms(50);

        self.rcd_set_outputs(0, &RcdOutputs::default());
        self.reset_sequence();

        self.rcd_set_dca_rate(0, ctx.rate);
        self.rcd_set_operating_speed(0, OperatingSpeed::Rate(config.rcd_speed));
        self.rcd_set_termination_and_vref(0);
        self.reset_sequence();
        self.rcd_set_speed_band(0, config.rcd_speed);
        self.spin_us(50);
        self.rcd_forward_all_dram_cmds(0, false);

        let rate = ctx.rate;
        cs_ca_training(ctx, &mut HostRcd::new(self, rate, config), config, None);
        if !ctx.success && !config.keep_going {
            return
        }
        self.spin_ms(6);

        let outputs = self.read_rcd_outputs(0);
        self.rcd_set_outputs(0, &outputs);
        self.spin_ms(6);

        for channel in 0..ctx.channels {
            self.rcd_set_qrst(channel, 0);
        }
        self.spin_ms(1);
        for channel in 0..ctx.channels {
            self.rcd_clear_qrst(channel, 0);
        }

        self.rcd_forward_all_dram_cmds(0, true);
        self.spin_ms(6);
        for channel in 0..ctx.channels {
            self.rcd_release_qcs(channel, 0, true);
        }
        self.spin_ms(6);

        for channel in 0..ctx.channels {
            self.prep_nop(channel);
        }
        self.force_issue_single();
        self.spin_us(500);
    }

    pub fn sdram_ddr5_flow(&mut self, config: &TrainingConfig) -> Result<Report> {
        let mut stages = Stages { config, failed: None };
        self.session = Session::default();
        self.enable_phy();

        let mut host_dram = TrainingContext::host_dram(&self.settings);
        let mut host_rcd = TrainingContext::host_rcd(&self.settings);
        let mut rcd_dram = TrainingContext::rcd_dram(&self.settings);

        if let Err(err) = self.i2c_init() {
            warn!("{}", err);
        }
        let rdimm = config.force_rdimm || self.read_module_type(0) == ModuleType::Rdimm;
        if rdimm {
            host_dram.die_width = 4;
            host_rcd.die_width = 4;
            rcd_dram.die_width = 4;
            rcd_dram.ranks = self.read_module_ranks(0).min(MAX_RANKS);
            rcd_dram.channels = self.read_module_channels(0).min(MAX_CHANNELS);
        }

        self.reset_all_phy_regs(host_dram.channels, host_dram.ranks, host_dram.all_ca_count,
                                host_dram.modules, host_dram.die_width);

        let base = if rdimm {
            info!("detected RDIMM, initializing the RCD and running Host->RCD training");
            self.set_rdimm_mode(true);
            self.rcd_init(&mut host_rcd, config);
            rcd_dram.rate = host_rcd.rate;
            rcd_dram.success &= host_rcd.success;
            stages.check(Stage::HostRcd, rcd_dram.success)?;
            &mut rcd_dram
        } else {
            self.reset_sequence();
            &mut host_dram
        };

        self.dram_start_sequence(base.ranks);

        if rdimm {
            self.enter_ca_pass(0);
            for rank in 0..base.ranks {
                self.select_ca_pass(rank);
                self.setup_dram_mrs_sequence(rank, config.mode_registers);
            }
            self.exit_ca_pass(0);
            let mut trainer = RcdDram::new(self, config);
            for channel in 0..base.channels {
                cs_ca_training(base, &mut trainer, config, Some(channel));
            }
        } else {
            for rank in 0..base.ranks {
                self.setup_dram_mrs_sequence(rank, config.mode_registers);
            }
            cs_ca_training(base, &mut HostDram::new(self), config, None);
        }
        stages.check(Stage::CsCa, base.success)?;

        if base.success && base.rate == Rate::Ddr {
            for channel in 0..base.channels {
                for rank in 0..base.ranks {
                    self.disable_dram_2n_mode(channel, rank);
                }
            }
        }

        if self.in_2n_mode() {
            self.init_sequence_2n(base.ranks);
        } else {
            self.init_sequence_1n(base.ranks);
        }

        self.session.single_cycle_mpc = true;
        let flags = self.session.mr2_flags();
        for channel in 0..base.channels {
            for rank in 0..base.ranks {
                self.send_mrw(channel, rank, MODULE_BROADCAST, 2, flags);
            }
        }

        for rank in 0..base.ranks {
            let ok = self.dram_enumerate(base, rank);
            stages.check(Stage::Enumerate, ok)?;
        }
        let command_bus = base.clone();

        if rdimm {
            host_dram.ranks = rcd_dram.ranks;
            host_dram.rdimm = rcd_dram.rdimm;
        }

        let ok = self.read_training(&host_dram, config);
        stages.check(Stage::Read, ok)?;
        let ok = self.write_training(&host_dram, config);
        stages.check(Stage::Write, ok)?;

        Ok(Report {
            rdimm,
            rate: command_bus.rate,
            ranks: host_dram.ranks,
            n2_mode: self.in_2n_mode(),
            failed: stages.failed,
            command_bus,
        })
    }

    /// Trains the memory under software control and hands it back to the
    /// controller, whatever the outcome.
    pub fn sdram_init(&mut self, config: &TrainingConfig) -> Result<Report> {
        info!("initializing SDRAM");
        self.software_control_on();
        self.reset_phy();
        let result = self.sdram_ddr5_flow(config);
        self.software_control_off();

        match &result {
            Ok(Report { failed: Some(stage), .. }) =>
                warn!("SDRAM initialized after errors, first in {}", stage),
            Ok(report) =>
                info!("SDRAM initialized, {} rank(s){}", report.ranks,
                      if report.rdimm { " behind an RCD" } else { "" }),
            Err(err) => error!("SDRAM initialization failed: {}", err),
        }
        result
    }
}
