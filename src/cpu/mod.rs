//! CPU software path.
//!
//! [`CpuFallback`] is the boundary the scheduler calls when a task is placed
//! on the CPU. [`ReferenceCpu`] is the scalar implementation shipped with the
//! crate; receivers with their own DSP code plug that in instead.

pub mod fft;
pub mod viterbi;

use crate::task::viterbi::ViterbiParams;

pub trait CpuFallback: Send + Sync {
    /// Transform interleaved real/imaginary samples in place.
    fn fft(&self, samples: &mut [f32]);

    /// Decode `in_data` into `out_mem`.
    fn viterbi(&self, params: ViterbiParams, in_mem: &[u8], in_data: &[u8], out_mem: &mut [u8]);
}

/// Scalar radix-2 FFT and hard-decision Viterbi decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceCpu;

impl CpuFallback for ReferenceCpu {
    fn fft(&self, samples: &mut [f32]) {
        fft::transform(samples);
    }

    fn viterbi(&self, params: ViterbiParams, _in_mem: &[u8], in_data: &[u8], out_mem: &mut [u8]) {
        viterbi::decode(params.data_bits as usize, in_data, out_mem);
    }
}
