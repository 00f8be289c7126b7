//! Task scheduler: placement, dispatch and completion.
//!
//! `schedule` runs a block through `Queued -> Running -> Done`, executes it on
//! the CPU or on an accelerator unit, and returns the block to the pool.
//! Dispatch is synchronous; the call returns once the chosen path finishes.

pub mod dispatch;
pub mod placement;
pub mod stats;

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::accel::fixed::DEFAULT_INT_BITS;
use crate::accel::{AccelError, AccelKind, AcceleratorManager, DeviceProvider, DmaAllocator};
use crate::config::SchedulerConfig;
use crate::cpu::{CpuFallback, ReferenceCpu};
use crate::fatal;
use crate::pool::{BlockId, BlockRef, JobType, MetadataPool, PoolError, TaskBlock, TaskStatus};
use crate::task::fft::DEFAULT_LOG_N;
use crate::task::viterbi::{self, ViterbiHeader, ViterbiParams, STATE_BYTES};
use crate::task::PayloadError;

pub use self::placement::{
    FixedUnit, Placement, PlacementPolicy, RandomSource, StdRandom, UnitSelector,
};
pub use self::stats::{DispatchStats, KindStats, StatsSnapshot};

/// Dispatch failure inside the scheduler. Payload errors never leave it:
/// the task is logged and reported as [`Placement::Skipped`].
#[derive(Debug, Error)]
pub(crate) enum ScheduleError {
    #[error("malformed payload: {0}")]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Accel(#[from] AccelError),
}

pub struct Scheduler {
    pool: MetadataPool,
    accel: AcceleratorManager,
    cpu: Arc<dyn CpuFallback>,
    rng: Mutex<Box<dyn RandomSource>>,
    policy: PlacementPolicy,
    selector: Box<dyn UnitSelector>,
    fft_log_n: u32,
    fx_int_bits: u32,
    stats: DispatchStats,
}

impl Scheduler {
    pub fn builder(pool: MetadataPool) -> SchedulerBuilder {
        SchedulerBuilder::new(pool)
    }

    /// Build the pool and accelerator banks described by `config`. Device or
    /// buffer acquisition failures are returned for the caller to treat as
    /// fatal.
    pub fn from_config(
        config: &SchedulerConfig,
        provider: &dyn DeviceProvider,
        allocator: &dyn DmaAllocator,
        cpu: Arc<dyn CpuFallback>,
    ) -> Result<Self, AccelError> {
        let accel = AcceleratorManager::initialize(config, provider, allocator)?;
        let rng: Box<dyn RandomSource> = match config.placement.seed {
            Some(seed) => Box::new(StdRandom::seeded(seed)),
            None => Box::new(StdRandom::from_entropy()),
        };
        let policy = PlacementPolicy {
            fft_threshold: config.effective_threshold(AccelKind::Fft),
            viterbi_threshold: config.effective_threshold(AccelKind::Viterbi),
        };
        info!(
            capacity = config.pool.capacity,
            fft_threshold = policy.fft_threshold,
            viterbi_threshold = policy.viterbi_threshold,
            "scheduler initialized"
        );
        Ok(Self::builder(MetadataPool::new(config.pool.capacity))
            .accelerators(accel)
            .cpu(cpu)
            .random(rng)
            .policy(policy)
            .unit_selector(config.placement.unit_policy.selector())
            .fft_format(config.fft.log_n, config.fft.fx_int_bits)
            .build())
    }

    pub fn pool(&self) -> &MetadataPool {
        &self.pool
    }

    pub fn accelerators(&self) -> &AcceleratorManager {
        &self.accel
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    pub fn fft_log_n(&self) -> u32 {
        self.fft_log_n
    }

    pub fn allocate(&self) -> Result<BlockRef<'_>, PoolError> {
        self.pool.allocate()
    }

    pub fn get_status(&self, id: BlockId) -> Option<TaskStatus> {
        self.pool.get_status(id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `block` and release it. Accelerator failures terminate the
    /// process.
    pub fn schedule(&self, block: BlockRef<'_>) -> Placement {
        self.schedule_with(block, |_, placement| placement)
    }

    /// Run `block`, hand the finished block to `harvest`, then release it.
    /// Accelerator failures terminate the process.
    pub fn schedule_with<R>(
        &self,
        block: BlockRef<'_>,
        harvest: impl FnOnce(&TaskBlock, Placement) -> R,
    ) -> R {
        match self.try_schedule_with(block, harvest) {
            Ok(r) => r,
            Err(e) => fatal::terminate(&e),
        }
    }

    /// [`Scheduler::schedule_with`] returning accelerator failures instead of
    /// terminating. The block is released either way.
    pub fn try_schedule_with<R>(
        &self,
        mut block: BlockRef<'_>,
        harvest: impl FnOnce(&TaskBlock, Placement) -> R,
    ) -> Result<R, AccelError> {
        let id = block.id();
        block.set_status(TaskStatus::Queued);
        let job_type = block.lock().job_type;

        let outcome = match job_type {
            JobType::Fft => {
                block.set_status(TaskStatus::Running);
                self.run_fft(&mut block)
            }
            JobType::Viterbi => {
                block.set_status(TaskStatus::Running);
                self.run_viterbi(&mut block)
            }
            JobType::Unknown => {
                error!(block = id, "schedule_task called for unknown task type");
                Ok(Placement::Skipped)
            }
        };
        let placement = self.settle(outcome, Some(id))?;

        block.set_status(TaskStatus::Done);
        let result = harvest(&*block.lock(), placement);
        drop(block);
        Ok(result)
    }

    /// Place one Viterbi decode given directly as regions, without a block.
    /// Malformed regions are reported as [`Placement::Skipped`], as for
    /// block tasks.
    pub fn schedule_viterbi(
        &self,
        params: ViterbiParams,
        in_mem: &[u8],
        in_data: &[u8],
        out_mem: &mut [u8],
    ) -> Result<Placement, AccelError> {
        let outcome = self.place_viterbi(params, in_mem, in_data, out_mem);
        self.settle(outcome, None)
    }

    /// Release every accelerator unit.
    pub fn shutdown(self) {
        let stats = self.stats.snapshot();
        info!(
            fft_cpu = stats.fft.cpu,
            fft_hw = stats.fft.hardware,
            viterbi_cpu = stats.viterbi.cpu,
            viterbi_hw = stats.viterbi.hardware,
            skipped = stats.skipped,
            "scheduler shutting down"
        );
        self.accel.shutdown();
    }

    /// Turn payload errors into a logged skip; pass accelerator errors on.
    fn settle(
        &self,
        outcome: Result<Placement, ScheduleError>,
        block: Option<BlockId>,
    ) -> Result<Placement, AccelError> {
        let placement = match outcome {
            Ok(placement) => placement,
            Err(ScheduleError::Payload(e)) => {
                error!(?block, error = %e, "task payload rejected");
                Placement::Skipped
            }
            Err(ScheduleError::Accel(e)) => return Err(e),
        };
        if placement == Placement::Skipped {
            self.stats.record_skipped();
        }
        Ok(placement)
    }

    fn draw(&self) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_below(placement::DRAW_RANGE)
    }

    fn run_fft(&self, block: &mut BlockRef<'_>) -> Result<Placement, ScheduleError> {
        let id = block.id();
        let draw = self.draw();
        let threshold = self.policy.fft_threshold;
        let mut guard = block.lock();
        let payload = guard.payload_mut();

        if placement::prefers_hardware(draw, threshold) {
            let bank = self.accel.bank(AccelKind::Fft)?;
            let unit = self.selector.select(bank);
            debug!(block = id, draw, threshold, unit, "executing FFT on hardware");
            let elapsed = bank.with_unit(unit, |u| {
                dispatch::fft_on_hardware(u, payload, self.fft_log_n, self.fx_int_bits)
            })??;
            self.stats.record_hardware(AccelKind::Fft, elapsed);
            Ok(Placement::Hardware { unit })
        } else {
            debug!(block = id, draw, threshold, "executing FFT on CPU");
            dispatch::fft_on_cpu(&*self.cpu, payload, self.fft_log_n)?;
            self.stats.record_cpu(AccelKind::Fft);
            Ok(Placement::Cpu)
        }
    }

    fn run_viterbi(&self, block: &mut BlockRef<'_>) -> Result<Placement, ScheduleError> {
        let id = block.id();
        let mut guard = block.lock();
        let header = ViterbiHeader::read(guard.payload())?;
        let params = header.params()?;
        let data = viterbi::data_area_mut(guard.payload_mut());
        let regions = header.regions(data.len())?;
        debug!(
            block = id,
            in_mem = ?regions.in_mem,
            in_data = ?regions.in_data,
            out_mem = ?regions.out_mem,
            "viterbi regions"
        );
        let (in_mem, in_data, out_mem) = regions.split(data);
        self.place_viterbi(params, in_mem, in_data, out_mem)
    }

    fn place_viterbi(
        &self,
        params: ViterbiParams,
        in_mem: &[u8],
        in_data: &[u8],
        out_mem: &mut [u8],
    ) -> Result<Placement, ScheduleError> {
        if in_mem.len() < STATE_BYTES {
            return Err(PayloadError::ShortStateRegion {
                len: in_mem.len(),
                min: STATE_BYTES,
            }
            .into());
        }
        let draw = self.draw();
        let threshold = self.policy.viterbi_threshold;

        if placement::prefers_hardware(draw, threshold) {
            let bank = self.accel.bank(AccelKind::Viterbi)?;
            let unit = self.selector.select(bank);
            debug!(draw, threshold, unit, "executing Viterbi on hardware");
            let elapsed = bank.with_unit(unit, |u| {
                dispatch::viterbi_on_hardware(u, params, in_mem, in_data, out_mem)
            })??;
            self.stats.record_hardware(AccelKind::Viterbi, elapsed);
            Ok(Placement::Hardware { unit })
        } else {
            debug!(draw, threshold, "executing Viterbi on CPU");
            self.cpu.viterbi(params, in_mem, in_data, out_mem);
            self.stats.record_cpu(AccelKind::Viterbi);
            Ok(Placement::Cpu)
        }
    }
}

/// Assembles a [`Scheduler`]. Defaults: no accelerators, the reference CPU
/// path, an entropy-seeded RNG, thresholds of 25, unit 0.
pub struct SchedulerBuilder {
    pool: MetadataPool,
    accel: AcceleratorManager,
    cpu: Arc<dyn CpuFallback>,
    rng: Box<dyn RandomSource>,
    policy: PlacementPolicy,
    selector: Box<dyn UnitSelector>,
    fft_log_n: u32,
    fx_int_bits: u32,
}

impl SchedulerBuilder {
    fn new(pool: MetadataPool) -> Self {
        Self {
            pool,
            accel: AcceleratorManager::cpu_only(),
            cpu: Arc::new(ReferenceCpu),
            rng: Box::new(StdRandom::from_entropy()),
            policy: PlacementPolicy::default(),
            selector: Box::new(FixedUnit(0)),
            fft_log_n: DEFAULT_LOG_N,
            fx_int_bits: DEFAULT_INT_BITS,
        }
    }

    pub fn accelerators(mut self, accel: AcceleratorManager) -> Self {
        self.accel = accel;
        self
    }

    pub fn cpu(mut self, cpu: Arc<dyn CpuFallback>) -> Self {
        self.cpu = cpu;
        self
    }

    pub fn random(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn policy(mut self, policy: PlacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn unit_selector(mut self, selector: Box<dyn UnitSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn fft_format(mut self, log_n: u32, fx_int_bits: u32) -> Self {
        self.fft_log_n = log_n;
        self.fx_int_bits = fx_int_bits;
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            pool: self.pool,
            accel: self.accel,
            cpu: self.cpu,
            rng: Mutex::new(self.rng),
            policy: self.policy,
            selector: self.selector,
            fft_log_n: self.fft_log_n,
            fx_int_bits: self.fx_int_bits,
            stats: DispatchStats::default(),
        }
    }
}
