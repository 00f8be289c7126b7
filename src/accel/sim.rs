//! In-process accelerator models.
//!
//! Simulated units honour the same DMA contract as the hardware: the FFT
//! model reads fixed-point tokens from the input view and writes results over
//! them; the Viterbi model reads the state header and encoded bits from the
//! input view and writes decoded bits into the output view. The arithmetic is
//! delegated to a [`CpuFallback`].

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::descriptor::{Descriptor, KindParams};
use super::fixed::{fixed_to_float, float_to_fixed};
use super::layout::BufferLayout;
use super::{AccelError, AccelKind, AcceleratorDevice, DeviceProvider, DmaRegion};
use crate::cpu::CpuFallback;
use crate::task::viterbi::{MAX_ENCODED_BITS, STATE_BYTES, STATE_PAD_BYTES};
use crate::task::word;

/// Hands out simulated units for both kinds.
#[derive(Clone)]
pub struct SimulatedProvider {
    cpu: Arc<dyn CpuFallback>,
    fx_int_bits: u32,
    invocations: Arc<AtomicUsize>,
}

impl SimulatedProvider {
    pub fn new(cpu: Arc<dyn CpuFallback>, fx_int_bits: u32) -> Self {
        Self {
            cpu,
            fx_int_bits,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Accesses served by every unit this provider has opened.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl DeviceProvider for SimulatedProvider {
    fn open(&self, kind: AccelKind, unit: usize) -> Result<Box<dyn AcceleratorDevice>, AccelError> {
        Ok(Box::new(SimulatedDevice {
            path: format!("sim:{kind}.{unit}"),
            cpu: Arc::clone(&self.cpu),
            fx_int_bits: self.fx_int_bits,
            invocations: Arc::clone(&self.invocations),
        }))
    }
}

struct SimulatedDevice {
    path: String,
    cpu: Arc<dyn CpuFallback>,
    fx_int_bits: u32,
    invocations: Arc<AtomicUsize>,
}

fn short_buffer(needed: usize, have: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("DMA region holds {have} bytes, access needs {needed}"),
    )
}

impl SimulatedDevice {
    fn run_fft(&self, log_len: u32, mem: &mut [u8]) -> io::Result<()> {
        let layout = BufferLayout::fft(log_len);
        let needed = layout.total_bytes();
        if mem.len() < needed {
            return Err(short_buffer(needed, mem.len()));
        }
        let mut samples: Vec<f32> = mem[layout.input_range()]
            .chunks_exact(4)
            .map(|c| fixed_to_float(i32::from_ne_bytes(word(c)), self.fx_int_bits))
            .collect();
        self.cpu.fft(&mut samples);
        let out = &mut mem[layout.output_range()];
        for (dst, v) in out.chunks_exact_mut(4).zip(&samples) {
            dst.copy_from_slice(&float_to_fixed(*v, self.fx_int_bits).to_ne_bytes());
        }
        Ok(())
    }

    fn run_viterbi(&self, desc: &Descriptor, mem: &mut [u8]) -> io::Result<()> {
        let KindParams::Viterbi(params) = desc.params else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "viterbi unit given a non-viterbi descriptor",
            ));
        };
        let layout = BufferLayout::viterbi();
        let needed = layout.total_bytes();
        if mem.len() < needed {
            return Err(short_buffer(needed, mem.len()));
        }
        let (input, output) = mem.split_at_mut(layout.out_offset_bytes());
        let bits_at = STATE_BYTES + STATE_PAD_BYTES;
        let state = &input[..STATE_BYTES];
        let coded = &input[bits_at..bits_at + MAX_ENCODED_BITS];
        let out = &mut output[..layout.out_bytes()];
        self.cpu.viterbi(params, state, coded, out);
        Ok(())
    }
}

impl AcceleratorDevice for SimulatedDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn access(&mut self, desc: &Descriptor, mem: &mut dyn DmaRegion) -> io::Result<()> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        trace!(path = %self.path, params = ?desc.params, "simulated access");
        match desc.params {
            KindParams::Fft(p) => self.run_fft(p.log_len, mem.as_bytes_mut()),
            KindParams::Viterbi(_) => self.run_viterbi(desc, mem.as_bytes_mut()),
        }
    }
}
