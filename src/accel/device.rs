//! Character-device accelerators and host DMA buffers.
//!
//! Units are reached through `/dev/fft.N` and `/dev/vitdodec.N`; one access
//! ioctl starts the accelerator and returns when it raises completion.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;

use tracing::debug;

use super::descriptor::{Descriptor, EspAccess, KindParams};
use super::{AccelError, AccelKind, AcceleratorDevice, DeviceProvider, DmaAllocator, DmaRegion};

/// Default device nodes for `units` accelerators of `kind`.
pub fn default_paths(kind: AccelKind, units: usize) -> Vec<String> {
    let stem = match kind {
        AccelKind::Fft => "/dev/fft",
        AccelKind::Viterbi => "/dev/vitdodec",
    };
    (0..units).map(|i| format!("{stem}.{i}")).collect()
}

/// Opens accelerator character devices by unit index.
#[derive(Debug, Clone)]
pub struct CharDeviceProvider {
    fft_paths: Vec<String>,
    viterbi_paths: Vec<String>,
}

impl CharDeviceProvider {
    pub fn new(fft_paths: Vec<String>, viterbi_paths: Vec<String>) -> Self {
        Self {
            fft_paths,
            viterbi_paths,
        }
    }
}

impl DeviceProvider for CharDeviceProvider {
    fn open(&self, kind: AccelKind, unit: usize) -> Result<Box<dyn AcceleratorDevice>, AccelError> {
        let paths = match kind {
            AccelKind::Fft => &self.fft_paths,
            AccelKind::Viterbi => &self.viterbi_paths,
        };
        let path = paths.get(unit).ok_or(AccelError::NoSuchUnit {
            kind,
            unit,
            units: paths.len(),
        })?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| AccelError::DeviceOpen {
                kind,
                path: path.clone(),
                source,
            })?;
        debug!(%kind, unit, %path, "opened accelerator device");
        Ok(Box::new(CharDevice {
            path: path.clone(),
            file,
        }))
    }
}

struct CharDevice {
    path: String,
    file: File,
}

// Driver-facing descriptor layouts.

#[repr(C)]
struct RawEspAccess {
    contig: u64,
    run: u8,
    p2p_store: u8,
    p2p_nsrcs: u8,
    p2p_srcs: [[u8; 64]; 4],
    coherence: u32,
    footprint: u32,
    alloc_policy: u32,
    ddr_node: u32,
    in_place: u32,
    reuse_factor: u32,
}

impl From<&EspAccess> for RawEspAccess {
    fn from(esp: &EspAccess) -> Self {
        Self {
            contig: esp.contig,
            run: u8::from(esp.run),
            p2p_store: u8::from(esp.p2p_store),
            p2p_nsrcs: esp.p2p_nsrcs,
            p2p_srcs: [[0; 64]; 4],
            coherence: esp.coherence as u32,
            footprint: 0,
            alloc_policy: 0,
            ddr_node: 0,
            in_place: 0,
            reuse_factor: 0,
        }
    }
}

#[repr(C)]
struct RawFftAccess {
    esp: RawEspAccess,
    log_len: u32,
    do_peak: u32,
    do_bitrev: u32,
    src_offset: u32,
    dst_offset: u32,
}

#[repr(C)]
struct RawViterbiAccess {
    esp: RawEspAccess,
    cbps: u32,
    ntraceback: u32,
    data_bits: u32,
    src_offset: u32,
    dst_offset: u32,
}

const IOC_WRITE: u64 = 1;

/// `_IOW(ty, nr, size)`.
const fn iow(ty: u8, nr: u8, size: usize) -> u64 {
    (IOC_WRITE << 30) | (((size as u64) & 0x3fff) << 16) | ((ty as u64) << 8) | nr as u64
}

const FFT_IOC_ACCESS: u64 = iow(b'S', 0, std::mem::size_of::<RawFftAccess>());
const VITDODEC_IOC_ACCESS: u64 = iow(b'S', 0, std::mem::size_of::<RawViterbiAccess>());

impl CharDevice {
    fn ioctl<T>(&self, request: u64, arg: &T) -> io::Result<()> {
        // SAFETY: `arg` is a live #[repr(C)] value matching the layout the
        // driver reads for `request`; the driver does not retain the pointer.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                request as _,
                arg as *const T as *const libc::c_void,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AcceleratorDevice for CharDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn access(&mut self, desc: &Descriptor, _mem: &mut dyn DmaRegion) -> io::Result<()> {
        let esp = RawEspAccess::from(&desc.esp);
        match desc.params {
            KindParams::Fft(p) => self.ioctl(
                FFT_IOC_ACCESS,
                &RawFftAccess {
                    esp,
                    log_len: p.log_len,
                    do_peak: 0,
                    do_bitrev: u32::from(p.do_bitrev),
                    src_offset: p.src_offset,
                    dst_offset: p.dst_offset,
                },
            ),
            KindParams::Viterbi(p) => self.ioctl(
                VITDODEC_IOC_ACCESS,
                &RawViterbiAccess {
                    esp,
                    cbps: p.cbps,
                    ntraceback: p.traceback,
                    data_bits: p.data_bits,
                    src_offset: 0,
                    dst_offset: 0,
                },
            ),
        }
    }
}

/// Heap-backed DMA regions. The handle is the region's address; platforms
/// with a contiguous-memory driver supply their own [`DmaAllocator`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDmaAllocator;

struct HostRegion {
    bytes: Box<[u8]>,
}

impl DmaRegion for HostRegion {
    fn handle(&self) -> u64 {
        self.bytes.as_ptr() as u64
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl DmaAllocator for HostDmaAllocator {
    fn acquire(&self, bytes: usize) -> io::Result<Box<dyn DmaRegion>> {
        if bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero-length DMA region",
            ));
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        buf.resize(bytes, 0u8);
        Ok(Box::new(HostRegion {
            bytes: buf.into_boxed_slice(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(
            default_paths(AccelKind::Fft, 2),
            vec!["/dev/fft.0".to_string(), "/dev/fft.1".to_string()]
        );
        assert_eq!(default_paths(AccelKind::Viterbi, 1), vec!["/dev/vitdodec.0"]);
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let provider = CharDeviceProvider::new(vec!["/nonexistent/fft.0".into()], Vec::new());
        let err = provider.open(AccelKind::Fft, 0).err().unwrap();
        assert!(matches!(err, AccelError::DeviceOpen { .. }));
        let err = provider.open(AccelKind::Viterbi, 0).err().unwrap();
        assert!(matches!(err, AccelError::NoSuchUnit { units: 0, .. }));
    }

    #[test]
    fn test_ioctl_request_encoding() {
        assert_eq!(iow(b'S', 0, 16), (1 << 30) | (16 << 16) | (0x53 << 8));
        assert_ne!(FFT_IOC_ACCESS, 0);
    }

    #[test]
    fn test_host_region_zeroed_and_sized() {
        let mut region = HostDmaAllocator.acquire(128).unwrap();
        assert_eq!(region.as_bytes().len(), 128);
        assert!(region.as_bytes().iter().all(|&b| b == 0));
        region.as_bytes_mut()[5] = 9;
        assert_eq!(region.as_bytes()[5], 9);
        assert_ne!(region.handle(), 0);
        assert!(HostDmaAllocator.acquire(0).is_err());
    }
}
