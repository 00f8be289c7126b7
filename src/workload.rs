//! Synthetic workload driver.
//!
//! Several producers run on blocking threads, each allocating blocks from
//! the scheduler's pool, filling them with an FFT tone or a convolutionally
//! encoded bit stream, and scheduling them. When the pool is exhausted a
//! producer backs off and retries. CPU results are checked as they are
//! harvested.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cpu::viterbi::encode;
use crate::pool::{JobType, PoolError, TaskBlock};
use crate::scheduler::{Placement, Scheduler, StatsSnapshot};
use crate::task::fft;
use crate::task::viterbi::{self, ViterbiHeader, ViterbiParams, STATE_BYTES};

/// Frequency bin of the generated FFT tone.
pub const TONE_BIN: usize = 5;

const TONE_AMPLITUDE: f32 = 0.25;
const BACKOFF_START: Duration = Duration::from_micros(50);
const BACKOFF_MAX: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct WorkloadOptions {
    /// Total tasks across all producers.
    pub tasks: usize,
    pub producers: usize,
    /// Percentage (0..=100) of tasks that are Viterbi decodes.
    pub viterbi_percent: u32,
    /// Decoded bits per Viterbi task.
    pub viterbi_bits: u32,
    /// Seed for payload generation; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            tasks: 64,
            producers: 4,
            viterbi_percent: 50,
            viterbi_bits: 288,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub tasks: usize,
    pub producers: usize,
    pub elapsed_ms: u64,
    /// Allocations that found the pool exhausted.
    pub backpressure_waits: u64,
    /// CPU-placed FFT tasks whose spectrum peaked at the tone bin.
    pub fft_verified: u64,
    /// CPU-placed Viterbi tasks that decoded back to the source bits.
    pub viterbi_verified: u64,
    pub mismatches: u64,
    pub placements: StatsSnapshot,
}

#[derive(Debug, Default)]
struct ProducerReport {
    backpressure_waits: u64,
    fft_verified: u64,
    viterbi_verified: u64,
    mismatches: u64,
}

impl ProducerReport {
    fn record(&mut self, job: JobType, verdict: Option<bool>) {
        match (job, verdict) {
            (JobType::Fft, Some(true)) => self.fft_verified += 1,
            (JobType::Viterbi, Some(true)) => self.viterbi_verified += 1,
            (_, Some(false)) => self.mismatches += 1,
            _ => {}
        }
    }
}

/// Drive `options.tasks` tasks through `scheduler`.
pub async fn run(scheduler: Arc<Scheduler>, options: WorkloadOptions) -> Result<RunReport> {
    let producers = options.producers.max(1);
    let started = Instant::now();
    info!(
        tasks = options.tasks,
        producers,
        viterbi_percent = options.viterbi_percent,
        "starting workload"
    );

    let handles = (0..producers).map(|p| {
        let scheduler = Arc::clone(&scheduler);
        let options = options.clone();
        let share = options.tasks / producers + usize::from(p < options.tasks % producers);
        tokio::task::spawn_blocking(move || produce(&scheduler, p, share, &options))
    });
    let results = futures::future::try_join_all(handles)
        .await
        .context("workload producer panicked")?;

    let mut report = RunReport {
        tasks: options.tasks,
        producers,
        ..RunReport::default()
    };
    for r in results {
        let r = r?;
        report.backpressure_waits += r.backpressure_waits;
        report.fft_verified += r.fft_verified;
        report.viterbi_verified += r.viterbi_verified;
        report.mismatches += r.mismatches;
    }
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    report.placements = scheduler.stats();

    info!(
        elapsed_ms = report.elapsed_ms,
        backpressure_waits = report.backpressure_waits,
        mismatches = report.mismatches,
        "workload complete"
    );
    Ok(report)
}

fn produce(
    scheduler: &Scheduler,
    producer: usize,
    tasks: usize,
    options: &WorkloadOptions,
) -> Result<ProducerReport> {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(producer as u64)),
        None => StdRng::from_entropy(),
    };
    let mut report = ProducerReport::default();
    let log_n = scheduler.fft_log_n();

    for _ in 0..tasks {
        let mut backoff = BACKOFF_START;
        let mut block = loop {
            match scheduler.allocate() {
                Ok(block) => break block,
                Err(PoolError::Exhausted { capacity }) => {
                    report.backpressure_waits += 1;
                    warn!(producer, capacity, ?backoff, "metadata pool exhausted, backing off");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let job = if rng.gen_range(0..100) < options.viterbi_percent {
            JobType::Viterbi
        } else {
            JobType::Fft
        };
        let source_bits = {
            let mut guard = block.lock();
            guard.job_type = job;
            guard.criticality_level = rng.gen_range(0..3);
            match job {
                JobType::Fft => {
                    guard.data_size = fill_tone(guard.payload_mut(), log_n)?;
                    Vec::new()
                }
                _ => {
                    let bits: Vec<u8> = (0..options.viterbi_bits)
                        .map(|_| rng.gen_range(0..=1))
                        .collect();
                    guard.data_size = fill_viterbi(guard.payload_mut(), &bits)?;
                    bits
                }
            }
        };

        let id = block.id();
        let (placement, verdict) =
            scheduler.try_schedule_with(block, |done, placement| {
                let verdict = match placement {
                    Placement::Cpu => Some(match job {
                        JobType::Fft => check_tone(done, log_n),
                        _ => check_decode(done, &source_bits),
                    }),
                    _ => None,
                };
                (placement, verdict)
            })?;
        debug!(producer, block = id, %job, ?placement, ?verdict, "task harvested");
        report.record(job, verdict);
    }
    Ok(report)
}

/// Unit-amplitude-scaled complex tone at [`TONE_BIN`].
fn fill_tone(payload: &mut [u8], log_n: u32) -> Result<usize> {
    let points = 1usize << log_n;
    let samples: Vec<f32> = (0..points)
        .flat_map(|i| {
            let phase = std::f64::consts::TAU * (TONE_BIN * i) as f64 / points as f64;
            [
                TONE_AMPLITUDE * phase.cos() as f32,
                TONE_AMPLITUDE * phase.sin() as f32,
            ]
        })
        .collect();
    Ok(fft::write_samples(payload, &samples)?)
}

fn fill_viterbi(payload: &mut [u8], bits: &[u8]) -> Result<usize> {
    let params = ViterbiParams {
        cbps: 48,
        traceback: 24,
        data_bits: bits.len() as u32,
    };
    let coded = encode(bits);
    let state = [0u8; STATE_BYTES];
    Ok(viterbi::write_task(payload, params, &state, &coded, bits.len())?)
}

fn check_tone(block: &TaskBlock, log_n: u32) -> bool {
    let Ok(samples) = fft::read_samples(block.payload(), fft::sample_count(log_n)) else {
        return false;
    };
    let peak = samples
        .chunks_exact(2)
        .map(|c| c[0] * c[0] + c[1] * c[1])
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(bin, _)| bin);
    peak == Some(TONE_BIN)
}

fn check_decode(block: &TaskBlock, bits: &[u8]) -> bool {
    let Ok(header) = ViterbiHeader::read(block.payload()) else {
        return false;
    };
    let data = viterbi::data_area(block.payload());
    match header.regions(data.len()) {
        Ok(regions) => data[regions.out_mem].get(..bits.len()) == Some(bits),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MetadataPool;
    use crate::scheduler::PlacementPolicy;

    fn cpu_scheduler(capacity: usize) -> Arc<Scheduler> {
        Arc::new(
            Scheduler::builder(MetadataPool::new(capacity))
                .policy(PlacementPolicy::cpu_only())
                .fft_format(6, 14)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_cpu_only_workload_verifies_every_task() {
        let scheduler = cpu_scheduler(4);
        let options = WorkloadOptions {
            tasks: 40,
            producers: 3,
            viterbi_percent: 50,
            viterbi_bits: 96,
            seed: Some(11),
        };
        let report = run(Arc::clone(&scheduler), options).await.unwrap();

        assert_eq!(report.mismatches, 0);
        assert_eq!(report.fft_verified + report.viterbi_verified, 40);
        assert_eq!(report.placements.fft.cpu, report.fft_verified);
        assert_eq!(report.placements.viterbi.cpu, report.viterbi_verified);
        assert_eq!(report.placements.fft.hardware, 0);
        assert_eq!(scheduler.pool().free_count(), 4);
    }

    #[tokio::test]
    async fn test_single_block_pool_applies_backpressure() {
        let scheduler = cpu_scheduler(1);
        let options = WorkloadOptions {
            tasks: 24,
            producers: 4,
            viterbi_percent: 0,
            viterbi_bits: 0,
            seed: Some(3),
        };
        let report = run(Arc::clone(&scheduler), options).await.unwrap();
        assert_eq!(report.fft_verified, 24);
        assert_eq!(scheduler.pool().free_count(), 1);
    }

    #[test]
    fn test_viterbi_task_fits_block() {
        let mut payload = vec![0u8; 4096];
        let bits = vec![1u8; 288];
        let used = fill_viterbi(&mut payload, &bits).unwrap();
        assert_eq!(used, viterbi::HEADER_BYTES + STATE_BYTES + 576 + 288);
    }
}
