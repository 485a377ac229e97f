//! Boot-time policy of the DDR5 training flow.

use core::ops::RangeInclusive;

/// Mode register writes issued by the MRS sequence, `(register, value)`.
pub const DEFAULT_MODE_REGISTERS: [(u8, u8); 9] = [
    (0,  0x00), // BL16, CL22
    (2,  0x00),
    (5,  0x00),
    (6,  0x00), // tWR 48nCK, tRTP 12nCK
    (8,  0x08), // 2tCK read preamble, 2tCK write preamble
    (10, 0x2d), // VrefDQ 75%
    (11, 0x2d), // VrefCA 75%
    (12, 0x2d), // VrefCS 75%
    (13, 0x00),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingConfig {
    /// Record training failures and carry on instead of aborting the flow.
    pub keep_going: bool,
    /// Treat an RCD register that reads back differently from what was written
    /// as a training failure rather than a logged warning.
    pub readback_mismatch_fatal: bool,
    /// Samples that must all pass before a DQ/DQS tap counts as working.
    pub check_repeats: u32,
    /// Write-then-read round trips per pattern during write training.
    pub write_check_repeats: u32,
    /// MR10 encodings swept during the write Vref scan.
    pub vref_range: RangeInclusive<u8>,
    /// Data rate the RCD is configured for during Host->RCD training, MT/s.
    pub rcd_speed: u32,
    pub mode_registers: &'static [(u8, u8)],
    /// Assume an RDIMM without asking the SPD (simulation).
    pub force_rdimm: bool,
}

impl Default for TrainingConfig {
    fn default() -> TrainingConfig {
        TrainingConfig {
            keep_going: false,
            readback_mismatch_fatal: false,
            check_repeats: 16,
            write_check_repeats: 8,
            vref_range: 0x32..=0x45,
            rcd_speed: 2000,
            mode_registers: &DEFAULT_MODE_REGISTERS,
            force_rdimm: false,
        }
    }
}
