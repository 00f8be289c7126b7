use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::layout::BufferLayout;
use super::unit::AcceleratorUnit;
use super::{AccelError, AccelKind, DeviceProvider, DmaAllocator};
use crate::config::SchedulerConfig;

/// Fixed array of units of one kind. Each unit sits behind its own lock,
/// held for the whole of an invocation.
pub struct AcceleratorBank {
    kind: AccelKind,
    layout: BufferLayout,
    units: Vec<Mutex<AcceleratorUnit>>,
}

impl AcceleratorBank {
    /// Build `count` units. On failure the units already built are released
    /// before the error is returned.
    pub fn initialize(
        kind: AccelKind,
        count: usize,
        layout: BufferLayout,
        fft_log_n: u32,
        provider: &dyn DeviceProvider,
        allocator: &dyn DmaAllocator,
    ) -> Result<Self, AccelError> {
        let mut units = Vec::with_capacity(count);
        for index in 0..count {
            debug!(%kind, unit = index, "initializing accelerator unit");
            match AcceleratorUnit::open(kind, index, layout, fft_log_n, provider, allocator) {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    units.into_iter().for_each(AcceleratorUnit::release);
                    return Err(e);
                }
            }
        }
        info!(%kind, units = count, bytes_per_unit = layout.total_bytes(), "accelerator bank ready");
        Ok(Self {
            kind,
            layout,
            units: units.into_iter().map(Mutex::new).collect(),
        })
    }

    pub fn kind(&self) -> AccelKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Whether unit `index` is free right now. Advisory only.
    pub fn is_idle(&self, index: usize) -> bool {
        self.units
            .get(index)
            .is_some_and(|unit| unit.try_lock().is_ok())
    }

    /// Run `f` with exclusive use of unit `index`, waiting for any call in
    /// flight on that unit.
    pub fn with_unit<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut AcceleratorUnit) -> R,
    ) -> Result<R, AccelError> {
        let mut unit = self.lock(index)?;
        Ok(f(&mut unit))
    }

    /// Read unit `index`'s output view.
    pub fn read_output<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R, AccelError> {
        let unit = self.lock(index)?;
        Ok(f(unit.output()))
    }

    /// Release every unit's buffer and close its device.
    pub fn shutdown(self) {
        let kind = self.kind;
        for unit in self.units {
            unit.into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .release();
        }
        info!(%kind, "accelerator bank shut down");
    }

    fn lock(&self, index: usize) -> Result<MutexGuard<'_, AcceleratorUnit>, AccelError> {
        let unit = self.units.get(index).ok_or(AccelError::NoSuchUnit {
            kind: self.kind,
            unit: index,
            units: self.units.len(),
        })?;
        Ok(unit.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// The accelerator banks available to the scheduler. A kind without a bank
/// can only run on the CPU.
#[derive(Default)]
pub struct AcceleratorManager {
    fft: Option<AcceleratorBank>,
    viterbi: Option<AcceleratorBank>,
}

impl AcceleratorManager {
    /// No accelerators: every task runs on the CPU.
    pub fn cpu_only() -> Self {
        Self::default()
    }

    pub fn new(fft: Option<AcceleratorBank>, viterbi: Option<AcceleratorBank>) -> Self {
        Self { fft, viterbi }
    }

    /// Build a bank for every enabled kind in `config`.
    pub fn initialize(
        config: &SchedulerConfig,
        provider: &dyn DeviceProvider,
        allocator: &dyn DmaAllocator,
    ) -> Result<Self, AccelError> {
        let fft_log_n = config.fft.log_n;
        let fft = if config.fft.enabled {
            Some(AcceleratorBank::initialize(
                AccelKind::Fft,
                config.fft.units,
                BufferLayout::fft(fft_log_n),
                fft_log_n,
                provider,
                allocator,
            )?)
        } else {
            None
        };

        let viterbi = if config.viterbi.enabled {
            match AcceleratorBank::initialize(
                AccelKind::Viterbi,
                config.viterbi.units,
                BufferLayout::viterbi(),
                fft_log_n,
                provider,
                allocator,
            ) {
                Ok(bank) => Some(bank),
                Err(e) => {
                    if let Some(bank) = fft {
                        bank.shutdown();
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            fft = fft.as_ref().map_or(0, AcceleratorBank::len),
            viterbi = viterbi.as_ref().map_or(0, AcceleratorBank::len),
            "AcceleratorManager initialized"
        );
        Ok(Self { fft, viterbi })
    }

    /// The bank for `kind`, or [`AccelError::Unsupported`] when this
    /// configuration has none.
    pub fn bank(&self, kind: AccelKind) -> Result<&AcceleratorBank, AccelError> {
        let bank = match kind {
            AccelKind::Fft => self.fft.as_ref(),
            AccelKind::Viterbi => self.viterbi.as_ref(),
        };
        bank.ok_or(AccelError::Unsupported { kind })
    }

    pub fn has(&self, kind: AccelKind) -> bool {
        self.bank(kind).is_ok()
    }

    pub fn shutdown(self) {
        if let Some(bank) = self.viterbi {
            bank.shutdown();
        }
        if let Some(bank) = self.fft {
            bank.shutdown();
        }
    }
}
