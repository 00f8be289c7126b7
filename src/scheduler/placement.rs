//! CPU-versus-hardware placement.
//!
//! Each task draws a uniform integer in `[0, 100)`; a draw at or above the
//! kind's threshold goes to hardware. A threshold of 25 sends about 75% of
//! tasks to hardware, 101 sends none. The draw does not look at unit
//! availability. Which unit of the bank runs a hardware task is decided
//! separately by a [`UnitSelector`].

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::accel::{AccelKind, AcceleratorBank};

/// Upper bound (exclusive) of a placement draw.
pub const DRAW_RANGE: u32 = 100;

/// Threshold that keeps every task on the CPU.
pub const CPU_ONLY_THRESHOLD: u32 = 101;

/// Threshold used when a kind's accelerator is present.
pub const DEFAULT_HW_THRESHOLD: u32 = 25;

/// Where a task ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "on")]
pub enum Placement {
    Cpu,
    Hardware { unit: usize },
    /// No work performed (unknown job type or malformed payload).
    Skipped,
}

/// Source of placement draws.
pub trait RandomSource: Send {
    /// Uniform integer in `[0, bound)`.
    fn next_below(&mut self, bound: u32) -> u32;
}

/// [`RandomSource`] backed by `StdRng`.
pub struct StdRandom(StdRng);

impl StdRandom {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for StdRandom {
    fn next_below(&mut self, bound: u32) -> u32 {
        self.0.gen_range(0..bound)
    }
}

pub fn prefers_hardware(draw: u32, threshold: u32) -> bool {
    draw >= threshold
}

/// Per-kind hardware thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacementPolicy {
    pub fft_threshold: u32,
    pub viterbi_threshold: u32,
}

impl PlacementPolicy {
    pub fn cpu_only() -> Self {
        Self {
            fft_threshold: CPU_ONLY_THRESHOLD,
            viterbi_threshold: CPU_ONLY_THRESHOLD,
        }
    }

    pub fn threshold(&self, kind: AccelKind) -> u32 {
        match kind {
            AccelKind::Fft => self.fft_threshold,
            AccelKind::Viterbi => self.viterbi_threshold,
        }
    }
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            fft_threshold: DEFAULT_HW_THRESHOLD,
            viterbi_threshold: DEFAULT_HW_THRESHOLD,
        }
    }
}

/// Picks the unit of a bank that runs a hardware task.
pub trait UnitSelector: Send + Sync {
    fn select(&self, bank: &AcceleratorBank) -> usize;
}

/// Always the same unit.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedUnit(pub usize);

impl UnitSelector for FixedUnit {
    fn select(&self, _bank: &AcceleratorBank) -> usize {
        self.0
    }
}

/// Cycles through the bank's units.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl UnitSelector for RoundRobin {
    fn select(&self, bank: &AcceleratorBank) -> usize {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        n % bank.len().max(1)
    }
}

/// The lowest-numbered unit with no call in flight, else unit 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstIdle;

impl UnitSelector for FirstIdle {
    fn select(&self, bank: &AcceleratorBank) -> usize {
        (0..bank.len()).find(|&i| bank.is_idle(i)).unwrap_or(0)
    }
}

/// Configurable choice of [`UnitSelector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnitPolicy {
    Fixed { unit: usize },
    RoundRobin,
    FirstIdle,
}

impl Default for UnitPolicy {
    fn default() -> Self {
        UnitPolicy::Fixed { unit: 0 }
    }
}

impl UnitPolicy {
    pub fn selector(&self) -> Box<dyn UnitSelector> {
        match self {
            UnitPolicy::Fixed { unit } => Box::new(FixedUnit(*unit)),
            UnitPolicy::RoundRobin => Box::new(RoundRobin::default()),
            UnitPolicy::FirstIdle => Box::new(FirstIdle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundaries() {
        assert!(prefers_hardware(25, 25));
        assert!(!prefers_hardware(24, 25));
        assert!(prefers_hardware(0, 0));
        assert!(!prefers_hardware(DRAW_RANGE - 1, CPU_ONLY_THRESHOLD));
        assert!(!prefers_hardware(99, 100));
    }

    #[test]
    fn test_std_random_stays_in_range_and_is_reproducible() {
        let mut a = StdRandom::seeded(7);
        let mut b = StdRandom::seeded(7);
        for _ in 0..1_000 {
            let x = a.next_below(DRAW_RANGE);
            assert!(x < DRAW_RANGE);
            assert_eq!(x, b.next_below(DRAW_RANGE));
        }
    }

    #[test]
    fn test_hardware_fraction_converges() {
        let draws = 100_000;
        for threshold in [0, 25, 50, 90, 100, 101] {
            let mut rng = StdRandom::seeded(u64::from(threshold) + 1);
            let hw = (0..draws)
                .filter(|_| prefers_hardware(rng.next_below(DRAW_RANGE), threshold))
                .count();
            let expected = f64::from(100u32.saturating_sub(threshold)) / 100.0;
            let observed = hw as f64 / draws as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "threshold {threshold}: {observed} vs {expected}"
            );
        }
    }

    #[test]
    fn test_unit_policy_default_is_unit_zero() {
        assert_eq!(UnitPolicy::default(), UnitPolicy::Fixed { unit: 0 });
    }
}
