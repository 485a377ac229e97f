//! CS and CA timing training.
//!
//! Every CS and CA line is swept twice over the full delay range, the first
//! sweep one clock early, so that an eye straddling delay 0 is still seen
//! as one window. Once every window is known, the clock is delayed by the
//! smallest window center, which moves every center into the delay range,
//! and the lines are placed at their centers relative to the new clock.
//! A last scan checks that every line still works where it was placed.

use crate::config::TrainingConfig;
use crate::error::Result;
use crate::eye::Trace;
use crate::jedec::channel_name;
use crate::trainer::{BusLine, Rate, SignalTrainer, TrainingContext, TrainingKind,
                     MAX_CA_LINES};

fn all_modules(works: u32, modules: usize) -> bool {
    (0..modules).all(|module| works >> module & 1 != 0)
}

/// `[start, end)` of the eye in a two-sweep trace.
fn eye_window(trace: &Trace, taps: usize) -> Option<[i32; 2]> {
    let eye = trace.find_eye(taps)?;
    Some([eye.start?, eye.end? + 1])
}

fn outcome(result: Result<bool>) -> bool {
    result.unwrap_or_else(|err| {
        error!("{}", err);
        false
    })
}

fn cs_scan<T: SignalTrainer>(ctx: &TrainingContext, trainer: &mut T, channel: usize,
                             rank: usize, trace: &mut Trace) -> Result<()> {
    let line = BusLine::Cs { channel, rank };
    let taps = ctx.max_delay_taps;
    trace.clear();
    trainer.reset_delay(line);

    trainer.enter_cs_training(channel, rank)?;
    for &shift in [true, false].iter() {
        for _ in 0..taps {
            let works = trainer.check_cs(channel, rank, shift, ctx.modules, ctx.die_width) |
                        trainer.check_cs(channel, rank, !shift, ctx.modules, ctx.die_width);
            trace.push(all_modules(works, ctx.modules) as u8);
            trainer.increment_delay(line);
        }
        trainer.reset_delay(line);
    }
    info!("rank {:2} |{}|{}|", rank, trace.segment(0..taps), trace.segment(taps..2 * taps));
    trainer.exit_cs_training(channel, rank)
}

fn cs_training<T: SignalTrainer>(ctx: &mut TrainingContext, trainer: &mut T, channel: usize,
                                 trace: &mut Trace) -> Result<bool> {
    for rank in 0..ctx.ranks {
        cs_scan(ctx, trainer, channel, rank, trace)?;
        let [start, end] = match eye_window(trace, ctx.max_delay_taps) {
            Some(window) => window,
            None => {
                error!("CS rank {} has no eye", rank);
                return Ok(false)
            }
        };

        // park CS in the eye until the clock is moved
        let coarse = ((start + end) / 2).max(0);
        info!("rank {} eye {}..{}, coarse delay {}", rank, start, end, coarse);
        ctx.cs_coarse[channel][rank] = coarse;
        trainer.set_delay(BusLine::Cs { channel, rank }, coarse as usize);
        ctx.cs_window[channel][rank] = [start, end];
    }
    Ok(true)
}

/// Opens every CA window to the widest range so ranks can only narrow it.
fn ca_setup(ctx: &mut TrainingContext) {
    let taps = ctx.max_delay_taps as i32;
    for channel in 0..ctx.channels {
        for line in 0..MAX_CA_LINES {
            ctx.ca_window[channel][line] = [-taps, taps];
        }
    }
}

/// CA13 exists only on some die densities and stacks.
fn ca_check_lines<T: SignalTrainer>(ctx: &mut TrainingContext, trainer: &mut T,
                                    channel: usize) -> Result<()> {
    if ctx.kind == TrainingKind::HostDram {
        trainer.enter_ca_training(channel, 0)?;
        ctx.ca_lines = if trainer.has_line13(channel) { 14 } else { 13 };
        trainer.exit_ca_training(channel, 0)?;
    }
    info!("{} address lines", ctx.ca_lines);
    Ok(())
}

fn ca_scan<T: SignalTrainer>(ctx: &TrainingContext, trainer: &mut T, channel: usize,
                             rank: usize, address: usize, trace: &mut Trace) -> Result<()> {
    let line = BusLine::Ca { channel, rank, line: address };
    let taps = ctx.max_delay_taps;
    trace.clear();
    trainer.reset_delay(line);

    trainer.enter_ca_training(channel, rank)?;
    for &shift_back in [1, 0].iter() {
        trainer.reset_delay(line);
        for _ in 0..taps {
            let works = trainer.check_ca(channel, rank, address, shift_back);
            trace.push(works as u8);
            trainer.increment_delay(line);
        }
        trainer.reset_delay(line);
    }
    info!("CA line {:2} |{}|{}|", address, trace.segment(0..taps), trace.segment(taps..2 * taps));
    trainer.exit_ca_training(channel, rank)
}

fn ca_training<T: SignalTrainer>(ctx: &mut TrainingContext, trainer: &mut T, channel: usize,
                                 trace: &mut Trace) -> Result<bool> {
    // the RCD samples DCA for both ranks with the same timing
    let ranks = if ctx.kind == TrainingKind::HostRcd { 1 } else { ctx.ranks };
    for rank in 0..ranks {
        info!("rank {}", rank);
        for address in 0..ctx.ca_lines {
            ca_scan(ctx, trainer, channel, rank, address, trace)?;
            let [start, end] = match eye_window(trace, ctx.max_delay_taps) {
                Some(window) => window,
                None => {
                    error!("CA line {} has no eye", address);
                    return Ok(false)
                }
            };
            let window = &mut ctx.ca_window[channel][address];
            window[0] = window[0].max(start);
            window[1] = window[1].min(end);
        }
    }
    Ok(true)
}

/// Centers of every trained window, returned as the smallest and largest.
fn calculate_midpoints(ctx: &mut TrainingContext, channel: Option<usize>) -> (i32, i32) {
    let taps = ctx.max_delay_taps as i32;
    let (mut min, mut max) = (taps, -taps);
    for channel in ctx.channel_range(channel) {
        info!("subchannel {} timings", channel_name(channel));
        for rank in 0..ctx.ranks {
            let [start, end] = ctx.cs_window[channel][rank];
            let center = (start + end) / 2;
            info!("  CS rank {:2}: {:3}..{:3}, center {:3}", rank, start, end, center);
            ctx.cs_final[channel][rank] = center;
            min = min.min(center);
            max = max.max(center);
        }
        for line in 0..ctx.ca_lines {
            let [start, end] = ctx.ca_window[channel][line];
            let center = (start + end) / 2;
            info!("  CA line {:2}: {:3}..{:3}, center {:3}", line, start, end, center);
            ctx.ca_final[channel][line] = center;
            min = min.min(center);
            max = max.max(center);
        }
    }
    (min, max)
}

fn set_adjusted_delays<T: SignalTrainer>(ctx: &mut TrainingContext, trainer: &mut T,
                                         ck_offset: i32, channel: Option<usize>) {
    for channel in ctx.channel_range(channel) {
        for rank in 0..ctx.ranks {
            ctx.cs_final[channel][rank] -= ck_offset;
            debug!("CS rank {} delay {}", rank, ctx.cs_final[channel][rank]);
            trainer.set_delay(BusLine::Cs { channel, rank }, ctx.cs_final[channel][rank] as usize);
        }
        for line in 0..ctx.ca_lines {
            ctx.ca_final[channel][line] -= ck_offset;
            debug!("CA line {} delay {}", line, ctx.ca_final[channel][line]);
            trainer.set_delay(BusLine::Ca { channel, rank: 0, line },
                              ctx.ca_final[channel][line] as usize);
        }
    }
}

/// Scans everything again with the final timings, checks that every line
/// still works at its final delay and restores it there.
fn rescan<T: SignalTrainer>(ctx: &TrainingContext, trainer: &mut T, channel: Option<usize>,
                            trace: &mut Trace) -> Result<bool> {
    let taps = ctx.max_delay_taps;
    // the on-time sweep is the second half of the trace
    let works_at = |trace: &Trace, delay: i32| trace.passes(taps + delay as usize % taps);

    info!("re-scan CS/CA");
    let mut ok = true;
    for channel in ctx.channel_range(channel) {
        info!("subchannel {}", channel_name(channel));
        for rank in 0..ctx.ranks {
            cs_scan(ctx, trainer, channel, rank, trace)?;
            let delay = ctx.cs_final[channel][rank];
            if !works_at(trace, delay) {
                error!("CS rank {} fails at its final delay {}", rank, delay);
                ok = false;
            }
            trainer.set_delay(BusLine::Cs { channel, rank }, delay as usize);
        }
        for rank in 0..ctx.ranks {
            if ctx.kind == TrainingKind::HostRcd && rank == 1 {
                continue
            }
            for line in 0..ctx.ca_lines {
                ca_scan(ctx, trainer, channel, rank, line, trace)?;
                let delay = ctx.ca_final[channel][line];
                if !works_at(trace, delay) {
                    error!("CA line {} rank {} fails at its final delay {}", line, rank, delay);
                    ok = false;
                }
                trainer.set_delay(BusLine::Ca { channel, rank, line }, delay as usize);
            }
        }
    }
    Ok(ok)
}

/// Delays the clock so that the earliest window center lands on tap 0,
/// then places every line at its center relative to the new clock.
fn finalize_timings<T: SignalTrainer>(ctx: &mut TrainingContext, trainer: &mut T,
                                      channel: Option<usize>, trace: &mut Trace) -> Result<bool> {
    let taps = ctx.max_delay_taps as i32;
    let (min, max) = calculate_midpoints(ctx, channel);
    info!("center points {}..={}, spread {}", min, max, max - min);

    let ckdly = (taps - min) % taps;
    info!("new clock delay {}", ckdly);
    for channel in ctx.channel_range(channel) {
        trainer.set_delay(BusLine::Ck { channel }, ckdly as usize);
    }
    trainer.settle_ms(10);

    set_adjusted_delays(ctx, trainer, min, channel);
    rescan(ctx, trainer, channel, trace)
}

/// Trains CS and CA of `channel`, or of every channel for `None`, and
/// returns the context's rolled up success.
pub fn cs_ca_training<T: SignalTrainer>(ctx: &mut TrainingContext, trainer: &mut T,
                                        config: &TrainingConfig, channel: Option<usize>) -> bool {
    if ctx.rate == Rate::Ddr && ctx.kind != TrainingKind::RcdDram {
        trainer.disable_dfi_2n_mode();
    }

    let mut trace = Trace::new();
    ca_setup(ctx);
    for channel in ctx.channel_range(channel) {
        trainer.reset_delay(BusLine::Ck { channel });

        info!("subchannel {} CS training", channel_name(channel));
        ctx.success &= outcome(cs_training(ctx, trainer, channel, &mut trace));
        if !ctx.success && !config.keep_going {
            return false
        }

        info!("subchannel {} CA training", channel_name(channel));
        let ca = ca_check_lines(ctx, trainer, channel)
            .and_then(|()| ca_training(ctx, trainer, channel, &mut trace));
        ctx.success &= outcome(ca);
        if !ctx.success && !config.keep_going {
            return false
        }
    }

    if ctx.success {
        ctx.success &= outcome(finalize_timings(ctx, trainer, channel, &mut trace));
    }
    ctx.success
}
