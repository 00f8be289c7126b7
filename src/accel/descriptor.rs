//! Invocation descriptors.
//!
//! The structural part ([`EspAccess`]) is filled once when a unit is built;
//! the kind-specific part is rewritten per call where the kind needs it.

use serde::Serialize;

use super::AccelKind;
use crate::task::viterbi::ViterbiParams;

/// Cache-coherence mode requested for the accelerator's DMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum Coherence {
    None = 0,
    Llc = 1,
    Recall = 2,
    Full = 3,
}

/// Fields shared by every accelerator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EspAccess {
    pub run: bool,
    pub coherence: Coherence,
    pub p2p_store: bool,
    pub p2p_nsrcs: u8,
    /// Handle of the unit's DMA region.
    pub contig: u64,
}

impl EspAccess {
    fn template(contig: u64) -> Self {
        Self {
            run: true,
            coherence: Coherence::None,
            p2p_store: false,
            p2p_nsrcs: 0,
            contig,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FftParams {
    /// Bit-reverse the output in hardware.
    pub do_bitrev: bool,
    pub log_len: u32,
    pub src_offset: u32,
    pub dst_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KindParams {
    Fft(FftParams),
    Viterbi(ViterbiParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    pub esp: EspAccess,
    pub params: KindParams,
}

impl Descriptor {
    /// Startup template for a unit whose DMA region has handle `contig`.
    /// Viterbi fields stay zero until the first call fills them.
    pub fn template(kind: AccelKind, contig: u64, fft_log_n: u32) -> Self {
        let params = match kind {
            AccelKind::Fft => KindParams::Fft(FftParams {
                do_bitrev: true,
                log_len: fft_log_n,
                src_offset: 0,
                dst_offset: 0,
            }),
            AccelKind::Viterbi => KindParams::Viterbi(ViterbiParams::default()),
        };
        Self {
            esp: EspAccess::template(contig),
            params,
        }
    }

    pub fn kind(&self) -> AccelKind {
        match self.params {
            KindParams::Fft(_) => AccelKind::Fft,
            KindParams::Viterbi(_) => AccelKind::Viterbi,
        }
    }

    /// Overwrite the per-call Viterbi fields. No effect on an FFT descriptor.
    pub fn set_viterbi(&mut self, params: ViterbiParams) {
        if let KindParams::Viterbi(p) = &mut self.params {
            *p = params;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_template() {
        let desc = Descriptor::template(AccelKind::Fft, 0x1000, 14);
        assert!(desc.esp.run);
        assert_eq!(desc.esp.coherence, Coherence::None);
        assert!(!desc.esp.p2p_store);
        assert_eq!(desc.esp.p2p_nsrcs, 0);
        assert_eq!(desc.esp.contig, 0x1000);
        assert_eq!(
            desc.params,
            KindParams::Fft(FftParams {
                do_bitrev: true,
                log_len: 14,
                src_offset: 0,
                dst_offset: 0
            })
        );
    }

    #[test]
    fn test_viterbi_fields_overwritten_per_call() {
        let mut desc = Descriptor::template(AccelKind::Viterbi, 0x2000, 14);
        assert_eq!(desc.params, KindParams::Viterbi(ViterbiParams::default()));
        let params = ViterbiParams {
            cbps: 48,
            traceback: 24,
            data_bits: 96,
        };
        desc.set_viterbi(params);
        assert_eq!(desc.params, KindParams::Viterbi(params));
        assert_eq!(desc.kind(), AccelKind::Viterbi);
        assert_eq!(desc.esp.contig, 0x2000);
    }

    #[test]
    fn test_set_viterbi_ignored_on_fft() {
        let mut desc = Descriptor::template(AccelKind::Fft, 0, 10);
        let before = desc;
        desc.set_viterbi(ViterbiParams {
            cbps: 1,
            traceback: 1,
            data_bits: 1,
        });
        assert_eq!(desc, before);
    }
}
