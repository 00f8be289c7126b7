//! TOML configuration for the scheduler.
//!
//! Layered: an explicit path, then the `HETSCHED_CONFIG` environment
//! variable, then `/etc/hetsched/hetsched.toml`, then compiled-in defaults.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accel::device::default_paths;
use crate::accel::fixed::{DEFAULT_INT_BITS, FX_WIDTH};
use crate::accel::AccelKind;
use crate::pool::{DEFAULT_CAPACITY, PAYLOAD_CAPACITY};
use crate::scheduler::placement::{UnitPolicy, CPU_ONLY_THRESHOLD, DEFAULT_HW_THRESHOLD};
use crate::task::fft::{self, DEFAULT_LOG_N, MAX_LOG_N};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "HETSCHED_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/hetsched/hetsched.toml";

/// Reference number of units per accelerator kind.
pub const DEFAULT_UNITS: usize = 4;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub fft: FftConfig,
    #[serde(default)]
    pub viterbi: ViterbiConfig,
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SchedulerConfig {
    /// Load and validate configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded scheduler configuration");
        Ok(config)
    }

    /// Try, in order: `HETSCHED_CONFIG`, [`SYSTEM_CONFIG_PATH`], defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "HETSCHED_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// `path` when given, otherwise [`SchedulerConfig::load_or_default`].
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.capacity == 0 {
            bail!("pool.capacity must be at least 1");
        }
        if self.fft.log_n > MAX_LOG_N {
            bail!(
                "fft.log_n = {} exceeds {} ({} payload bytes per block)",
                self.fft.log_n,
                MAX_LOG_N,
                PAYLOAD_CAPACITY
            );
        }
        if fft::payload_bytes(self.fft.log_n) > PAYLOAD_CAPACITY {
            bail!("fft.log_n = {} does not fit a block payload", self.fft.log_n);
        }
        if self.fft.fx_int_bits == 0 || self.fft.fx_int_bits >= FX_WIDTH {
            bail!(
                "fft.fx_int_bits must be in 1..{}, got {}",
                FX_WIDTH,
                self.fft.fx_int_bits
            );
        }
        for (kind, threshold) in [
            (AccelKind::Fft, self.fft.hw_threshold),
            (AccelKind::Viterbi, self.viterbi.hw_threshold),
        ] {
            if threshold > CPU_ONLY_THRESHOLD {
                bail!("{kind}.hw_threshold must be at most {CPU_ONLY_THRESHOLD}, got {threshold}");
            }
        }
        for (kind, enabled, units, paths) in [
            (
                AccelKind::Fft,
                self.fft.enabled,
                self.fft.units,
                &self.fft.device_paths,
            ),
            (
                AccelKind::Viterbi,
                self.viterbi.enabled,
                self.viterbi.units,
                &self.viterbi.device_paths,
            ),
        ] {
            if enabled && units == 0 {
                bail!("{kind}.units must be at least 1 when {kind} is enabled");
            }
            if enabled && paths.len() < units {
                bail!(
                    "{kind}.device_paths lists {} devices for {} units",
                    paths.len(),
                    units
                );
            }
        }
        if let UnitPolicy::Fixed { unit } = self.placement.unit_policy {
            let smallest = [
                (self.fft.enabled, self.fft.units),
                (self.viterbi.enabled, self.viterbi.units),
            ]
            .into_iter()
            .filter_map(|(enabled, units)| enabled.then_some(units))
            .min();
            if smallest.is_some_and(|units| unit >= units) {
                bail!("placement.unit_policy.unit = {unit} is outside the configured banks");
            }
        }
        Ok(())
    }

    /// Threshold the placement draw is compared against. A disabled kind
    /// never goes to hardware.
    pub fn effective_threshold(&self, kind: AccelKind) -> u32 {
        match kind {
            AccelKind::Fft if self.fft.enabled => self.fft.hw_threshold,
            AccelKind::Viterbi if self.viterbi.enabled => self.viterbi.hw_threshold,
            _ => CPU_ONLY_THRESHOLD,
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of task metadata blocks. Fixed for the process lifetime.
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

// ---------------------------------------------------------------------------
// FFT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FftConfig {
    /// Whether FFT accelerators are present.
    pub enabled: bool,
    pub units: usize,
    /// Transform length exponent; frames hold `2^log_n` complex samples.
    pub log_n: u32,
    /// Draws at or above this value (0..=100) run on hardware.
    pub hw_threshold: u32,
    /// Integer bits of the accelerator's 32-bit fixed-point format.
    pub fx_int_bits: u32,
    pub device_paths: Vec<String>,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            units: DEFAULT_UNITS,
            log_n: DEFAULT_LOG_N,
            hw_threshold: DEFAULT_HW_THRESHOLD,
            fx_int_bits: DEFAULT_INT_BITS,
            device_paths: default_paths(AccelKind::Fft, DEFAULT_UNITS),
        }
    }
}

// ---------------------------------------------------------------------------
// Viterbi
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViterbiConfig {
    /// Whether Viterbi decode accelerators are present.
    pub enabled: bool,
    pub units: usize,
    /// Draws at or above this value (0..=100) run on hardware.
    pub hw_threshold: u32,
    pub device_paths: Vec<String>,
}

impl Default for ViterbiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            units: DEFAULT_UNITS,
            hw_threshold: DEFAULT_HW_THRESHOLD,
            device_paths: default_paths(AccelKind::Viterbi, DEFAULT_UNITS),
        }
    }
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Seed for placement draws; entropy when unset.
    pub seed: Option<u64>,
    /// Which unit of a bank runs hardware tasks.
    pub unit_policy: UnitPolicy,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.pool.capacity, 32);
        assert_eq!(cfg.fft.units, 4);
        assert_eq!(cfg.fft.log_n, 14);
        assert_eq!(cfg.fft.hw_threshold, 25);
        assert_eq!(cfg.fft.device_paths[3], "/dev/fft.3");
        assert_eq!(cfg.viterbi.device_paths[0], "/dev/vitdodec.0");
        assert_eq!(cfg.placement.unit_policy, UnitPolicy::Fixed { unit: 0 });
        assert_eq!(cfg.placement.seed, None);
        assert_eq!(cfg.logging.level, "info");
        cfg.validate().unwrap();
    }

    #[test]
    fn test_disabled_kind_forces_cpu_threshold() {
        let mut cfg = SchedulerConfig::default();
        cfg.viterbi.enabled = false;
        cfg.viterbi.hw_threshold = 0;
        assert_eq!(cfg.effective_threshold(AccelKind::Viterbi), CPU_ONLY_THRESHOLD);
        assert_eq!(cfg.effective_threshold(AccelKind::Fft), 25);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[pool]
capacity = 8

[fft]
log_n = 10
hw_threshold = 0

[viterbi]
enabled = false

[placement]
seed = 42

[placement.unit_policy]
policy = "round_robin"
"#
        )
        .unwrap();

        let cfg = SchedulerConfig::load(file.path()).unwrap();
        assert_eq!(cfg.pool.capacity, 8);
        assert_eq!(cfg.fft.log_n, 10);
        assert_eq!(cfg.fft.units, 4);
        assert_eq!(cfg.fft.fx_int_bits, 14);
        assert!(!cfg.viterbi.enabled);
        assert_eq!(cfg.placement.seed, Some(42));
        assert_eq!(cfg.placement.unit_policy, UnitPolicy::RoundRobin);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = SchedulerConfig::default();
        cfg.fft.log_n = 15;
        assert!(cfg.validate().is_err());

        let mut cfg = SchedulerConfig::default();
        cfg.viterbi.hw_threshold = 102;
        assert!(cfg.validate().is_err());

        let mut cfg = SchedulerConfig::default();
        cfg.fft.device_paths.truncate(2);
        assert!(cfg.validate().is_err());

        let mut cfg = SchedulerConfig::default();
        cfg.placement.unit_policy = UnitPolicy::Fixed { unit: 4 };
        assert!(cfg.validate().is_err());

        let mut cfg = SchedulerConfig::default();
        cfg.pool.capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unreadable_file_is_error() {
        assert!(SchedulerConfig::load(Path::new("/nonexistent/hetsched.toml")).is_err());
    }

    #[test]
    fn test_serializes_to_toml() {
        let text = toml::to_string(&SchedulerConfig::default()).unwrap();
        assert!(text.contains("[pool]"));
        let back: SchedulerConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.fft.device_paths, SchedulerConfig::default().fft.device_paths);
    }
}
