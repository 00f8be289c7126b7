//! Accelerator resource model -- FFT and Viterbi hardware units.
//!
//! Each kind owns a fixed bank of units. A unit pairs a device handle with one
//! contiguous DMA buffer (split into input and output views) and a reusable
//! invocation descriptor. Devices and DMA memory come from the platform
//! through [`DeviceProvider`] and [`DmaAllocator`].

pub mod descriptor;
pub mod device;
pub mod fixed;
pub mod layout;
pub mod manager;
pub mod sim;
pub mod unit;

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fatal::{self, Fatal};

pub use self::descriptor::Descriptor;
pub use self::manager::{AcceleratorBank, AcceleratorManager};
pub use self::unit::AcceleratorUnit;

/// Task kinds with a dedicated accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelKind {
    Fft,
    Viterbi,
}

impl fmt::Display for AccelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccelKind::Fft => write!(f, "fft"),
            AccelKind::Viterbi => write!(f, "viterbi"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AccelError {
    #[error("cannot open {kind} device {path}: {source}")]
    DeviceOpen {
        kind: AccelKind,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot allocate {bytes} contig bytes for {kind} unit {unit}: {source}")]
    BufferAlloc {
        kind: AccelKind,
        unit: usize,
        bytes: usize,
        #[source]
        source: io::Error,
    },

    #[error("{kind} unit {unit} access failed: {source}")]
    Invocation {
        kind: AccelKind,
        unit: usize,
        #[source]
        source: io::Error,
    },

    #[error("this configuration does not support {kind} hardware execution")]
    Unsupported { kind: AccelKind },

    #[error(
        "{kind} unit {unit} holds {unit_words}-token frames of log length {unit_log_len}, \
         task frame has {frame_words} tokens of log length {frame_log_len}"
    )]
    FrameMismatch {
        kind: AccelKind,
        unit: usize,
        unit_words: usize,
        unit_log_len: u32,
        frame_words: usize,
        frame_log_len: u32,
    },

    #[error("{kind} unit {unit} does not exist ({units} configured)")]
    NoSuchUnit {
        kind: AccelKind,
        unit: usize,
        units: usize,
    },
}

impl Fatal for AccelError {
    fn exit_code(&self) -> i32 {
        match self {
            AccelError::Unsupported {
                kind: AccelKind::Fft,
            } => fatal::FFT_UNSUPPORTED_EXIT,
            AccelError::Unsupported {
                kind: AccelKind::Viterbi,
            } => fatal::VITERBI_UNSUPPORTED_EXIT,
            _ => fatal::ACCELERATOR_EXIT,
        }
    }
}

/// A contiguous, device-visible memory region. Dropping it releases the
/// memory.
pub trait DmaRegion: Send {
    /// Handle the device uses to reach this region.
    fn handle(&self) -> u64;
    fn as_bytes(&self) -> &[u8];
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// Source of DMA-capable buffers.
pub trait DmaAllocator: Send + Sync {
    fn acquire(&self, bytes: usize) -> io::Result<Box<dyn DmaRegion>>;
}

/// An open accelerator device. Dropping it closes the handle.
pub trait AcceleratorDevice: Send {
    /// Device node this handle was opened from.
    fn path(&self) -> &str;

    /// Start the accelerator with `desc` over `mem` and block until it
    /// signals completion.
    fn access(&mut self, desc: &Descriptor, mem: &mut dyn DmaRegion) -> io::Result<()>;
}

/// Opens the device behind unit `unit` of `kind`.
pub trait DeviceProvider: Send + Sync {
    fn open(&self, kind: AccelKind, unit: usize) -> Result<Box<dyn AcceleratorDevice>, AccelError>;
}
