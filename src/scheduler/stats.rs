//! Dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::accel::AccelKind;

#[derive(Debug, Default)]
struct KindCounters {
    cpu: AtomicU64,
    hardware: AtomicU64,
    hardware_nanos: AtomicU64,
}

impl KindCounters {
    fn snapshot(&self) -> KindStats {
        KindStats {
            cpu: self.cpu.load(Ordering::Relaxed),
            hardware: self.hardware.load(Ordering::Relaxed),
            hardware_time_us: self.hardware_nanos.load(Ordering::Relaxed) / 1_000,
        }
    }
}

/// Placement counts and accumulated accelerator time.
#[derive(Debug, Default)]
pub struct DispatchStats {
    fft: KindCounters,
    viterbi: KindCounters,
    skipped: AtomicU64,
}

impl DispatchStats {
    fn kind(&self, kind: AccelKind) -> &KindCounters {
        match kind {
            AccelKind::Fft => &self.fft,
            AccelKind::Viterbi => &self.viterbi,
        }
    }

    pub fn record_cpu(&self, kind: AccelKind) {
        self.kind(kind).cpu.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hardware(&self, kind: AccelKind, elapsed: Duration) {
        let c = self.kind(kind);
        c.hardware.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        c.hardware_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fft: self.fft.snapshot(),
            viterbi: self.viterbi.snapshot(),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KindStats {
    pub cpu: u64,
    pub hardware: u64,
    pub hardware_time_us: u64,
}

impl KindStats {
    pub fn total(&self) -> u64 {
        self.cpu + self.hardware
    }

    /// Share of tasks that ran on hardware, `0.0` when nothing ran.
    pub fn hardware_fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.hardware as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub fft: KindStats,
    pub viterbi: KindStats,
    pub skipped: u64,
}

impl StatsSnapshot {
    pub fn kind(&self, kind: AccelKind) -> &KindStats {
        match kind {
            AccelKind::Fft => &self.fft,
            AccelKind::Viterbi => &self.viterbi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_kind() {
        let stats = DispatchStats::default();
        stats.record_cpu(AccelKind::Fft);
        stats.record_hardware(AccelKind::Fft, Duration::from_micros(40));
        stats.record_hardware(AccelKind::Fft, Duration::from_micros(60));
        stats.record_skipped();

        let snap = stats.snapshot();
        assert_eq!(snap.fft.cpu, 1);
        assert_eq!(snap.fft.hardware, 2);
        assert_eq!(snap.fft.hardware_time_us, 100);
        assert_eq!(snap.viterbi, KindStats::default());
        assert_eq!(snap.skipped, 1);
        assert!((snap.kind(AccelKind::Fft).hardware_fraction() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.viterbi.hardware_fraction(), 0.0);
    }
}
