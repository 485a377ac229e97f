//! Eye bookkeeping shared by every training stage.
//!
//! An eye is the first contiguous run of working settings found while
//! sweeping a delay. Indices are taps, or `cycle * taps + tap` for scans
//! that also step a cycle delay.

use core::fmt;
use core::ops::Range;

use crate::delay::DelayControl;

/// Two full sweeps of the longest supported delay line.
pub const MAX_TRACE: usize = 2 * 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    Before,
    Inside,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eye {
    pub state: EyeState,
    pub start: Option<i32>,
    /// Last working index, inclusive.
    pub end: Option<i32>,
}

impl Default for Eye {
    fn default() -> Eye {
        Eye { state: EyeState::Before, start: None, end: None }
    }
}

impl Eye {
    pub fn new() -> Eye {
        Eye::default()
    }

    /// Eye spanning `start..=end`, already closed.
    pub fn closed(start: i32, end: i32) -> Eye {
        Eye { state: EyeState::After, start: Some(start), end: Some(end) }
    }

    /// Records the result at `index`. Opens on the first working index and
    /// closes on the first failing one after it; later results are ignored.
    pub fn observe(&mut self, index: i32, works: bool) {
        match self.state {
            EyeState::Before if works => {
                self.start = Some(index);
                self.state = EyeState::Inside;
            }
            EyeState::Inside if !works => {
                self.end = Some(index - 1);
                self.state = EyeState::After;
            }
            _ => ()
        }
    }

    /// Closes an eye that was still open when the sweep ran out.
    pub fn close_at(&mut self, last: i32) {
        if self.state == EyeState::Inside {
            self.end = Some(last);
            self.state = EyeState::After;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == EyeState::Inside
    }

    pub fn is_closed(&self) -> bool {
        self.state == EyeState::After
    }

    pub fn center(&self) -> Option<i32> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((start + end + 1) / 2),
            _ => None
        }
    }

    /// Number of working indices, 0 unless the eye is closed.
    pub fn width(&self) -> i32 {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end + 1 - start,
            _ => 0
        }
    }
}

/// Per-index results of a sweep, kept for eye extraction and logging.
/// Values are 0 for a failure and non-zero for (partially) working.
#[derive(Clone)]
pub struct Trace {
    samples: [u8; MAX_TRACE],
    len: usize,
}

impl Default for Trace {
    fn default() -> Trace {
        Trace { samples: [0; MAX_TRACE], len: 0 }
    }
}

impl Trace {
    pub fn new() -> Trace {
        Trace::default()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn push(&mut self, sample: u8) {
        if self.len < MAX_TRACE {
            self.samples[self.len] = sample;
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn passes(&self, index: usize) -> bool {
        index < self.len && self.samples[index] != 0
    }

    /// Locates the eye in a trace made of two sweeps of `mid` taps each,
    /// where the first sweep was taken one cycle early.
    ///
    /// A run that starts at the end of the first sweep and continues into the
    /// second is one eye starting at a negative delay. The eye ends at the
    /// first failure of the second sweep, or at its last tap. Traces with no
    /// failing sample at all carry no timing information and yield `None`.
    pub fn find_eye(&self, mid: usize) -> Option<Eye> {
        let total = (2 * mid).min(self.len);
        if mid == 0 || total <= mid {
            return None
        }
        if (0..total).all(|index| self.passes(index)) {
            return None
        }

        let mut start = None;
        if self.passes(mid) {
            let mut back = 0;
            while back < mid && self.passes(mid - back - 1) {
                back += 1;
            }
            start = Some(-(back as i32));
        }

        for offset in 0..(total - mid) {
            let works = self.passes(mid + offset);
            if works && start.is_none() {
                start = Some(offset as i32);
            }
            if !works {
                if let Some(start) = start {
                    return Some(Eye::closed(start, offset as i32 - 1))
                }
            }
        }
        match start {
            Some(start) if self.passes(total - 1) => Some(Eye::closed(start, (total - mid) as i32 - 1)),
            _ => None
        }
    }

    /// Displays `range` of the trace, one hex digit per sample.
    pub fn segment(&self, range: Range<usize>) -> Segment<'_> {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        Segment(&self.samples[start..end])
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.segment(0..self.len).fmt(f)
    }
}

pub struct Segment<'a>(&'a [u8]);

impl<'a> fmt::Display for Segment<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for sample in self.0 {
            write!(f, "{:x}", sample & 0xf)?;
        }
        Ok(())
    }
}

/// Sweeps `line` from tap 0 and returns the first eye, stopping as soon as
/// it closes. Every tap counts as working only if `check` passes
/// `repeats` times in a row.
pub fn scan<D, F>(lines: &mut D, line: D::Line, taps: usize, repeats: u32, trace: &mut Trace,
                  mut check: F) -> Eye
    where D: DelayControl, F: FnMut(&mut D) -> bool
{
    let mut eye = Eye::new();
    lines.reset_delay(line);
    for tap in 0..taps {
        let works = (0..repeats.max(1)).all(|_| check(lines));
        trace.push(works as u8);
        eye.observe(tap as i32, works);
        if eye.is_closed() {
            break
        }
        lines.increment_delay(line);
    }
    eye
}

/// Puts a cycle delay and a tap delay at the position `index` of a
/// linearized `cycle * taps + tap` scan.
pub fn split_index(index: i32, taps: usize) -> (usize, usize) {
    let index = index.max(0) as usize;
    (index / taps, index % taps)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use crate::delay::sim::SimDelays;
    use super::*;

    fn trace_of(samples: &[bool]) -> Trace {
        let mut trace = Trace::new();
        for &sample in samples {
            trace.push(sample as u8);
        }
        trace
    }

    fn window(taps: usize, pass: Range<usize>) -> Vec<bool> {
        (0..taps).map(|tap| pass.contains(&tap)).collect()
    }

    #[test]
    fn observe_tracks_first_run() {
        let mut eye = Eye::new();
        for (index, &works) in [false, true, true, false, true].iter().enumerate() {
            eye.observe(index as i32, works);
        }
        assert_eq!(eye, Eye::closed(1, 2));
        assert_eq!(eye.width(), 2);
    }

    #[test]
    fn open_eye_has_no_end() {
        let mut eye = Eye::new();
        eye.observe(0, false);
        eye.observe(1, true);
        assert!(eye.is_open());
        assert_eq!(eye.end, None);
        assert_eq!(eye.center(), None);
        eye.close_at(1);
        assert_eq!(eye.center(), Some(1));
    }

    #[test]
    fn two_sweep_window_in_range() {
        let sweep = window(64, 20..35);
        let trace = trace_of(&[sweep.clone(), sweep].concat());
        let eye = trace.find_eye(64).unwrap();
        assert_eq!(eye.start, Some(20));
        assert_eq!(eye.end, Some(34));
        assert_eq!(eye.center(), Some(27));
    }

    #[test]
    fn window_wrapping_into_early_sweep() {
        let early = window(64, 50..64);
        let late = window(64, 0..10);
        let trace = trace_of(&[early, late].concat());
        let eye = trace.find_eye(64).unwrap();
        assert_eq!(eye.start, Some(-14));
        assert_eq!(eye.end, Some(9));
    }

    #[test]
    fn window_open_at_end_closes_at_last_tap() {
        let trace = trace_of(&[window(64, 60..64), window(64, 60..64)].concat());
        assert_eq!(trace.find_eye(64), Some(Eye::closed(60, 63)));
    }

    #[test]
    fn all_pass_and_all_fail_have_no_eye() {
        assert_eq!(trace_of(&[true; 128]).find_eye(64), None);
        assert_eq!(trace_of(&[false; 128]).find_eye(64), None);
    }

    #[test]
    fn trace_display() {
        let mut trace = trace_of(&[true, false, true]);
        trace.push(3);
        assert_eq!(format!("{}", trace), "1013");
        assert_eq!(format!("{}", trace.segment(1..3)), "01");
    }

    #[test]
    fn scan_stops_after_window() {
        let mut delays = SimDelays { taps: 64, ..Default::default() };
        let mut trace = Trace::new();
        let eye = scan(&mut delays, 0, 64, 16, &mut trace, |delays| {
            (10..20).contains(&delays.lines[&0])
        });
        assert_eq!(eye, Eye::closed(10, 19));
        assert_eq!(trace.len(), 21);
        assert_eq!(delays.lines[&0], 20);
    }

    #[test]
    fn linearized_index() {
        assert_eq!(split_index(135, 64), (2, 7));
        assert_eq!(split_index(-3, 64), (0, 0));
    }

    proptest! {
        #[test]
        fn single_run_is_bounded_exactly(start in 0usize..64, len in 1usize..63) {
            prop_assume!(start + len < 64);
            let sweep = window(64, start..start + len);
            let trace = trace_of(&[sweep.clone(), sweep].concat());
            let eye = trace.find_eye(64).unwrap();
            prop_assert_eq!(eye.start, Some(start as i32));
            prop_assert_eq!(eye.end, Some((start + len - 1) as i32));
            prop_assert!(eye.start <= eye.center() && eye.center() <= eye.end);
        }

        #[test]
        fn scan_bounds_single_run(start in 0usize..64, len in 1usize..64) {
            let end = (start + len).min(64);
            let mut delays = SimDelays { taps: 64, ..Default::default() };
            let mut trace = Trace::new();
            let mut eye = scan(&mut delays, 3, 64, 1, &mut trace, |delays| {
                (start..end).contains(&delays.lines[&3])
            });
            eye.close_at(63);
            prop_assert_eq!(eye.start, Some(start as i32));
            prop_assert_eq!(eye.end, Some(end as i32 - 1));
        }
    }
}
