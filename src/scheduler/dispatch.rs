//! Marshalling between task payloads and accelerator buffers.
//!
//! FFT results are converted back into the payload in place. Viterbi results
//! stay in the unit's output view; the payload's output region is only
//! zeroed.

use std::time::Duration;

use super::ScheduleError;
use crate::accel::descriptor::KindParams;
use crate::accel::fixed::{fixed_to_float, float_to_fixed};
use crate::accel::{AccelError, AcceleratorUnit};
use crate::cpu::CpuFallback;
use crate::task::viterbi::{
    ViterbiParams, MAX_DECODED_BYTES, MAX_ENCODED_BITS, STATE_BYTES, STATE_PAD_BYTES,
};
use crate::task::{fft, word, PayloadError};

fn fft_frame(payload: &mut [u8], log_n: u32) -> Result<&mut [u8], PayloadError> {
    let needed = fft::payload_bytes(log_n);
    let available = payload.len();
    payload
        .get_mut(..needed)
        .ok_or(PayloadError::TooSmall { needed, available })
}

/// The unit must have been built for exactly this frame: its buffer holds
/// `sample_count(log_n)` tokens and its descriptor carries `log_n`.
fn check_frame(unit: &AcceleratorUnit, log_n: u32) -> Result<(), AccelError> {
    let frame_words = fft::sample_count(log_n);
    let unit_words = unit.layout().in_words;
    let unit_log_len = match unit.descriptor().params {
        KindParams::Fft(p) => p.log_len,
        KindParams::Viterbi(_) => u32::MAX,
    };
    if unit_words != frame_words || unit_log_len != log_n {
        return Err(AccelError::FrameMismatch {
            kind: unit.kind(),
            unit: unit.index(),
            unit_words,
            unit_log_len,
            frame_words,
            frame_log_len: log_n,
        });
    }
    Ok(())
}

pub(crate) fn fft_on_hardware(
    unit: &mut AcceleratorUnit,
    payload: &mut [u8],
    log_n: u32,
    int_bits: u32,
) -> Result<Duration, ScheduleError> {
    check_frame(unit, log_n)?;
    let frame = fft_frame(payload, log_n)?;

    // float -> fixed point
    for (dst, src) in unit.input_mut().chunks_exact_mut(4).zip(frame.chunks_exact(4)) {
        let v = f32::from_ne_bytes(word(src));
        dst.copy_from_slice(&float_to_fixed(v, int_bits).to_ne_bytes());
    }

    let elapsed = unit.invoke()?;

    // fixed point -> float, back into the payload
    for (dst, src) in frame.chunks_exact_mut(4).zip(unit.output().chunks_exact(4)) {
        let v = fixed_to_float(i32::from_ne_bytes(word(src)), int_bits);
        dst.copy_from_slice(&v.to_ne_bytes());
    }
    Ok(elapsed)
}

pub(crate) fn fft_on_cpu(
    cpu: &dyn CpuFallback,
    payload: &mut [u8],
    log_n: u32,
) -> Result<(), ScheduleError> {
    let frame = fft_frame(payload, log_n)?;
    let mut samples = fft::read_samples(frame, fft::sample_count(log_n))?;
    cpu.fft(&mut samples);
    fft::write_samples(frame, &samples)?;
    Ok(())
}

pub(crate) fn viterbi_on_hardware(
    unit: &mut AcceleratorUnit,
    params: ViterbiParams,
    in_mem: &[u8],
    in_data: &[u8],
    out_mem: &mut [u8],
) -> Result<Duration, ScheduleError> {
    if in_mem.len() < STATE_BYTES {
        return Err(PayloadError::ShortStateRegion {
            len: in_mem.len(),
            min: STATE_BYTES,
        }
        .into());
    }
    unit.descriptor_mut().set_viterbi(params);

    let input = unit.input_mut();
    let (state, rest) = input.split_at_mut(STATE_BYTES);
    state.copy_from_slice(&in_mem[..STATE_BYTES]);
    let (pad, rest) = rest.split_at_mut(STATE_PAD_BYTES);
    pad.fill(0);
    let coded = &mut rest[..MAX_ENCODED_BITS];
    let n = in_data.len().min(MAX_ENCODED_BITS);
    coded[..n].copy_from_slice(&in_data[..n]);
    coded[n..].fill(0);

    let clear = out_mem.len().min(MAX_DECODED_BYTES);
    out_mem[..clear].fill(0);

    Ok(unit.invoke()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::device::HostDmaAllocator;
    use crate::accel::layout::BufferLayout;
    use crate::accel::{
        AccelError, AccelKind, AcceleratorDevice, Descriptor, DeviceProvider, DmaRegion,
    };
    use crate::cpu::ReferenceCpu;
    use std::io;

    /// Leaves the buffer untouched.
    struct Loopback;

    impl AcceleratorDevice for Loopback {
        fn path(&self) -> &str {
            "loopback"
        }

        fn access(&mut self, _desc: &Descriptor, _mem: &mut dyn DmaRegion) -> io::Result<()> {
            Ok(())
        }
    }

    impl DeviceProvider for Loopback {
        fn open(
            &self,
            _kind: AccelKind,
            _unit: usize,
        ) -> Result<Box<dyn AcceleratorDevice>, AccelError> {
            Ok(Box::new(Loopback))
        }
    }

    fn unit(kind: AccelKind, layout: BufferLayout) -> AcceleratorUnit {
        AcceleratorUnit::open(kind, 0, layout, 3, &Loopback, &HostDmaAllocator).unwrap()
    }

    #[test]
    fn test_fft_payload_survives_fixed_point_trip() {
        let mut unit = unit(AccelKind::Fft, BufferLayout::fft(3));
        let samples: Vec<f32> = (0..16).map(|i| i as f32 * 0.37 - 2.0).collect();
        let mut payload = vec![0u8; 128];
        fft::write_samples(&mut payload, &samples).unwrap();

        fft_on_hardware(&mut unit, &mut payload, 3, 14).unwrap();

        let back = fft::read_samples(&payload, 16).unwrap();
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
        assert_eq!(
            i32::from_ne_bytes(word(&unit.output()[4..])),
            float_to_fixed(samples[1], 14)
        );
    }

    #[test]
    fn test_fft_short_payload_rejected() {
        let mut unit = unit(AccelKind::Fft, BufferLayout::fft(3));
        let mut payload = vec![0u8; 32];
        assert!(matches!(
            fft_on_hardware(&mut unit, &mut payload, 3, 14),
            Err(ScheduleError::Payload(PayloadError::TooSmall { needed: 64, .. }))
        ));
        assert!(fft_on_cpu(&ReferenceCpu, &mut payload, 3).is_err());
    }

    #[test]
    fn test_fft_frame_must_match_unit() {
        let mut unit = unit(AccelKind::Fft, BufferLayout::fft(3));
        let samples = vec![1.0f32; fft::sample_count(6)];
        let mut payload = vec![0u8; fft::payload_bytes(6)];
        fft::write_samples(&mut payload, &samples).unwrap();

        assert!(matches!(
            fft_on_hardware(&mut unit, &mut payload, 6, 14),
            Err(ScheduleError::Accel(AccelError::FrameMismatch {
                unit_words: 16,
                frame_words: 128,
                frame_log_len: 6,
                ..
            }))
        ));
        // Nothing converted, nothing written back.
        assert_eq!(fft::read_samples(&payload, samples.len()).unwrap(), samples);
        assert!(unit.input_mut().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_viterbi_input_buffer_layout() {
        let mut unit = unit(AccelKind::Viterbi, BufferLayout::viterbi());
        unit.input_mut().fill(0xEE);
        let in_mem: Vec<u8> = (1..=70).collect();
        let in_data = vec![1u8; 192];
        let mut out_mem = vec![0x55u8; 40];
        let params = ViterbiParams {
            cbps: 48,
            traceback: 24,
            data_bits: 96,
        };

        viterbi_on_hardware(&mut unit, params, &in_mem, &in_data, &mut out_mem).unwrap();

        let input = unit.input_mut();
        assert_eq!(&input[..70], &in_mem[..]);
        assert_eq!(&input[70..72], &[0, 0]);
        assert!(input[72..72 + 192].iter().all(|&b| b == 1));
        assert!(input[72 + 192..72 + MAX_ENCODED_BITS].iter().all(|&b| b == 0));
        assert!(out_mem.iter().all(|&b| b == 0));
        assert_eq!(
            unit.descriptor().params,
            crate::accel::descriptor::KindParams::Viterbi(params)
        );
    }

    #[test]
    fn test_viterbi_short_state_rejected() {
        let mut unit = unit(AccelKind::Viterbi, BufferLayout::viterbi());
        let mut out = [0u8; 4];
        assert!(matches!(
            viterbi_on_hardware(&mut unit, ViterbiParams::default(), &[0; 10], &[], &mut out),
            Err(ScheduleError::Payload(PayloadError::ShortStateRegion { len: 10, min: 70 }))
        ));
    }
}
