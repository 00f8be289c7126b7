//! One accelerator instance: device handle, DMA buffer, descriptor.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::descriptor::Descriptor;
use super::layout::BufferLayout;
use super::{AccelError, AccelKind, AcceleratorDevice, DeviceProvider, DmaAllocator, DmaRegion};

pub struct AcceleratorUnit {
    kind: AccelKind,
    index: usize,
    layout: BufferLayout,
    descriptor: Descriptor,
    buffer: Box<dyn DmaRegion>,
    device: Box<dyn AcceleratorDevice>,
}

impl AcceleratorUnit {
    /// Open the device, acquire the DMA buffer and fill the descriptor
    /// template. Anything acquired before a failure is released on return.
    pub fn open(
        kind: AccelKind,
        index: usize,
        layout: BufferLayout,
        fft_log_n: u32,
        provider: &dyn DeviceProvider,
        allocator: &dyn DmaAllocator,
    ) -> Result<Self, AccelError> {
        let device = provider.open(kind, index)?;
        debug!(%kind, unit = index, path = device.path(), "accelerator device opened");

        let bytes = layout.total_bytes();
        let buffer = allocator
            .acquire(bytes)
            .map_err(|source| AccelError::BufferAlloc {
                kind,
                unit: index,
                bytes,
                source,
            })?;
        info!(
            %kind,
            unit = index,
            bytes,
            input = ?layout.input_range(),
            output = ?layout.output_range(),
            "accelerator buffer allocated"
        );

        let descriptor = Descriptor::template(kind, buffer.handle(), fft_log_n);
        Ok(Self {
            kind,
            index,
            layout,
            descriptor,
            buffer,
            device,
        })
    }

    pub fn kind(&self) -> AccelKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn device_path(&self) -> &str {
        self.device.path()
    }

    pub fn buffer_handle(&self) -> u64 {
        self.buffer.handle()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn descriptor_mut(&mut self) -> &mut Descriptor {
        &mut self.descriptor
    }

    /// Input view of the DMA buffer.
    pub fn input_mut(&mut self) -> &mut [u8] {
        let range = self.layout.input_range();
        &mut self.buffer.as_bytes_mut()[range]
    }

    /// Output view of the DMA buffer. Aliases the input for FFT units.
    pub fn output(&self) -> &[u8] {
        &self.buffer.as_bytes()[self.layout.output_range()]
    }

    /// Run the accelerator over the current buffer contents and wait for it.
    pub fn invoke(&mut self) -> Result<Duration, AccelError> {
        let start = Instant::now();
        self.device
            .access(&self.descriptor, &mut *self.buffer)
            .map_err(|source| AccelError::Invocation {
                kind: self.kind,
                unit: self.index,
                source,
            })?;
        Ok(start.elapsed())
    }

    /// Release the buffer, then close the device.
    pub fn release(self) {
        let Self {
            kind,
            index,
            buffer,
            device,
            ..
        } = self;
        drop(buffer);
        drop(device);
        debug!(%kind, unit = index, "accelerator unit released");
    }
}
