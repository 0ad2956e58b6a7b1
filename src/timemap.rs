//! Tempo map: converts absolute tick positions into seconds.
//!
//! Positions are expressed in ticks, a score-wide resolution fine enough to
//! represent every measure's divisions exactly. Each breakpoint sets the
//! quarter-note duration from its tick onwards; conversion integrates across
//! breakpoints, so a note spanning a tempo change gets the right length.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Default tempo if none is specified in the score.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// A tempo change at an absolute tick position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoBreakpoint {
    pub tick: u64,
    pub seconds_per_quarter: f64,
}

impl TempoBreakpoint {
    pub fn from_bpm(tick: u64, bpm: f64) -> Self {
        Self {
            tick,
            seconds_per_quarter: 60.0 / bpm,
        }
    }

    pub fn bpm(&self) -> f64 {
        60.0 / self.seconds_per_quarter
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoMap {
    ticks_per_quarter: u64,
    breakpoints: Vec<TempoBreakpoint>,
    /// Seconds elapsed at each breakpoint's tick
    elapsed: Vec<f64>,
}

impl TempoMap {
    /// Build a tempo map. Breakpoints must be strictly increasing in tick and
    /// carry a positive finite quarter-note duration. Positions before the
    /// first breakpoint use the first breakpoint's tempo.
    pub fn new(ticks_per_quarter: u64, breakpoints: Vec<TempoBreakpoint>) -> Result<Self, SyncError> {
        if ticks_per_quarter == 0 {
            return Err(SyncError::Config("ticks per quarter must be positive".to_string()));
        }
        if breakpoints.is_empty() {
            return Ok(Self::constant(ticks_per_quarter, DEFAULT_TEMPO));
        }
        for (i, bp) in breakpoints.iter().enumerate() {
            if !(bp.seconds_per_quarter.is_finite() && bp.seconds_per_quarter > 0.0) {
                return Err(SyncError::TimelineInconsistency {
                    measure: 0,
                    message: format!(
                        "tempo breakpoint at tick {} has invalid quarter duration {}",
                        bp.tick, bp.seconds_per_quarter
                    ),
                });
            }
            if i > 0 && bp.tick <= breakpoints[i - 1].tick {
                return Err(SyncError::TimelineInconsistency {
                    measure: 0,
                    message: format!(
                        "tempo breakpoint at tick {} is not after tick {}",
                        bp.tick,
                        breakpoints[i - 1].tick
                    ),
                });
            }
        }

        let mut elapsed = Vec::with_capacity(breakpoints.len());
        let mut seconds = breakpoints[0].tick as f64 / ticks_per_quarter as f64
            * breakpoints[0].seconds_per_quarter;
        elapsed.push(seconds);
        for pair in breakpoints.windows(2) {
            let quarters = (pair[1].tick - pair[0].tick) as f64 / ticks_per_quarter as f64;
            seconds += quarters * pair[0].seconds_per_quarter;
            elapsed.push(seconds);
        }

        Ok(Self {
            ticks_per_quarter,
            breakpoints,
            elapsed,
        })
    }

    /// A map with one tempo for the whole score.
    pub fn constant(ticks_per_quarter: u64, bpm: f64) -> Self {
        Self {
            ticks_per_quarter: ticks_per_quarter.max(1),
            breakpoints: vec![TempoBreakpoint::from_bpm(0, bpm)],
            elapsed: vec![0.0],
        }
    }

    pub fn ticks_per_quarter(&self) -> u64 {
        self.ticks_per_quarter
    }

    pub fn breakpoints(&self) -> &[TempoBreakpoint] {
        &self.breakpoints
    }

    /// Index of the latest breakpoint at or before `tick` (the first one for
    /// positions before it).
    fn index_at(&self, tick: f64) -> usize {
        self.breakpoints
            .partition_point(|bp| bp.tick as f64 <= tick)
            .saturating_sub(1)
    }

    /// The breakpoint in force at `tick`.
    pub fn breakpoint_at(&self, tick: u64) -> &TempoBreakpoint {
        &self.breakpoints[self.index_at(tick as f64)]
    }

    /// Tempo in quarter-note BPM at `tick`.
    pub fn bpm_at(&self, tick: u64) -> f64 {
        self.breakpoint_at(tick).bpm()
    }

    /// Tempo in quarter-note BPM `seconds` after the start of the score.
    pub fn bpm_at_seconds(&self, seconds: f64) -> f64 {
        let i = self.elapsed.partition_point(|&e| e <= seconds).saturating_sub(1);
        self.breakpoints[i].bpm()
    }

    /// Seconds from the start of the score to `tick`.
    pub fn seconds_at(&self, tick: u64) -> f64 {
        self.seconds_at_fractional(tick as f64)
    }

    /// Like [`seconds_at`](Self::seconds_at) for positions between ticks,
    /// e.g. marker spans given in beats.
    pub fn seconds_at_fractional(&self, tick: f64) -> f64 {
        let i = self.index_at(tick);
        let bp = &self.breakpoints[i];
        let quarters = (tick - bp.tick as f64) / self.ticks_per_quarter as f64;
        self.elapsed[i] + quarters * bp.seconds_per_quarter
    }

    /// Duration in seconds of the span `[from, to)`.
    pub fn seconds_between(&self, from: u64, to: u64) -> f64 {
        self.seconds_at(to) - self.seconds_at(from)
    }

    /// Tick position reached `quarters` quarter notes after `tick`.
    pub fn advance_quarters(&self, tick: u64, quarters: f64) -> f64 {
        tick as f64 + quarters * self.ticks_per_quarter as f64
    }
}

/// Greatest common divisor.
pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Least common multiple; zero inputs are ignored. `None` on overflow.
pub(crate) fn lcm(a: u64, b: u64) -> Option<u64> {
    if a == 0 {
        return Some(b);
    }
    if b == 0 {
        return Some(a);
    }
    (a / gcd(a, b)).checked_mul(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn constant_tempo() {
        let map = TempoMap::constant(4, 120.0);
        assert!(approx(map.seconds_at(4), 0.5));
        assert!(approx(map.seconds_at(16), 2.0));
        assert!(approx(map.bpm_at(100), 120.0));
    }

    #[test]
    fn integrates_across_breakpoints() {
        // 120 BPM for one quarter, then 60 BPM
        let map = TempoMap::new(
            4,
            vec![
                TempoBreakpoint::from_bpm(0, 120.0),
                TempoBreakpoint::from_bpm(4, 60.0),
            ],
        )
        .unwrap();
        // A half note from 0 spans the change: 0.5s + 1.0s
        assert!(approx(map.seconds_between(0, 8), 1.5));
        assert!(map.seconds_between(0, 8) > TempoMap::constant(4, 120.0).seconds_between(0, 8));
        assert!(approx(map.seconds_at_fractional(6.0), 1.0));
        assert!(approx(map.bpm_at(3), 120.0));
        assert!(approx(map.bpm_at(4), 60.0));
    }

    #[test]
    fn positions_before_first_breakpoint_use_its_tempo() {
        let map = TempoMap::new(2, vec![TempoBreakpoint::from_bpm(4, 60.0)]).unwrap();
        assert!(approx(map.seconds_at(0), 0.0));
        assert!(approx(map.seconds_at(2), 1.0));
        assert!(approx(map.seconds_at(6), 3.0));
    }

    #[test]
    fn rejects_out_of_order_breakpoints() {
        let err = TempoMap::new(
            1,
            vec![
                TempoBreakpoint::from_bpm(8, 100.0),
                TempoBreakpoint::from_bpm(8, 90.0),
            ],
        );
        assert!(matches!(err, Err(SyncError::TimelineInconsistency { .. })));
    }

    #[test]
    fn tempo_by_elapsed_time() {
        let map = TempoMap::new(
            4,
            vec![
                TempoBreakpoint::from_bpm(0, 120.0),
                TempoBreakpoint::from_bpm(8, 60.0),
            ],
        )
        .unwrap();
        assert!(approx(map.bpm_at_seconds(0.0), 120.0));
        assert!(approx(map.bpm_at_seconds(0.99), 120.0));
        assert!(approx(map.bpm_at_seconds(1.0), 60.0));
        assert!(approx(map.bpm_at_seconds(-1.0), 120.0));
    }

    #[test]
    fn lcm_of_divisions() {
        assert_eq!(lcm(4, 6), Some(12));
        assert_eq!(lcm(0, 6), Some(6));
        assert_eq!(lcm(4_294_967_291, 4_294_967_279), None);
        assert_eq!(gcd(12, 18), 6);
    }
}
