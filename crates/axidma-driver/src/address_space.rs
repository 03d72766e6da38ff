//! Address Space Mapper
//!
//! Owns the opened physical-memory device, the register block mapping and the
//! reserved buffer mapping. Initialization is all-or-nothing: a failure at any
//! step drops whatever was already mapped or opened before the error returns.
//!
//! ```text
//! initialize:  validate layout → map buffer → map registers
//! teardown:    unmap registers → unmap buffer → buffer_phys = 0 → close device
//! ```

use crate::buffer::SharedBuffer;
use crate::config::MemoryLayout;
use crate::error::{DmaError, InitStage, Result};
use crate::mmio::{DevMem, PhysicalMemory};
use crate::registers::RegisterSpace;

/// Mapped register block and buffer of one DMA engine
///
/// After [`teardown`](AddressSpace::teardown) every accessor returns
/// [`DmaError::NotInitialized`].
#[derive(Debug)]
pub struct AddressSpace<P: PhysicalMemory> {
    device: Option<P>,
    registers: Option<RegisterSpace<P::Mapping>>,
    buffer: Option<SharedBuffer<P::Mapping>>,
    buffer_phys: u64,
}

impl AddressSpace<DevMem> {
    /// Open `layout.device_path` and map both regions
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::InitializationFailure`] if the device cannot be opened
    /// or either region cannot be mapped.
    pub fn open(layout: &MemoryLayout) -> Result<Self> {
        let device = DevMem::open(&layout.device_path)?;
        Self::initialize(device, layout)
    }
}

impl<P: PhysicalMemory> AddressSpace<P> {
    /// Map the buffer and the register block through an already-opened device
    ///
    /// On error `device` and any mapping already made are dropped, so no device
    /// handle or mapping outlives the failure.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::InvalidConfig`] for an unusable layout, or
    /// [`DmaError::InitializationFailure`] naming the mapping that failed.
    pub fn initialize(mut device: P, layout: &MemoryLayout) -> Result<Self> {
        layout.validate()?;

        let buffer = device
            .map(layout.buffer_base, layout.buffer_len)
            .and_then(|mapping| SharedBuffer::new(mapping, layout.buffer_base))
            .map_err(|e| {
                DmaError::initialization(
                    InitStage::MapBuffer,
                    format!("Failed to mmap DMA buffer at {:#010x}: {e}", layout.buffer_base),
                )
            })?;
        tracing::info!(
            "DMA buffer: {:#x} bytes at {:#010x} (source {:#010x}, destination {:#010x})",
            buffer.capacity(),
            buffer.phys_addr(),
            buffer.source_addr(),
            buffer.destination_addr()
        );

        let registers = device
            .map(layout.register_base, layout.register_len)
            .and_then(RegisterSpace::new)
            .map_err(|e| {
                DmaError::initialization(
                    InitStage::MapRegisters,
                    format!(
                        "Failed to mmap DMA registers at {:#010x}: {e}",
                        layout.register_base
                    ),
                )
            })?;
        tracing::info!("DMA registers mapped at {:#010x}", layout.register_base);

        Ok(Self {
            device: Some(device),
            registers: Some(registers),
            buffer: Some(buffer),
            buffer_phys: layout.buffer_base,
        })
    }

    /// Whether both regions are mapped
    pub const fn is_initialized(&self) -> bool {
        self.registers.is_some() && self.buffer.is_some()
    }

    /// Physical base of the buffer, 0 once torn down
    pub const fn buffer_phys(&self) -> u64 {
        self.buffer_phys
    }

    /// Register block
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn registers(&self) -> Result<&RegisterSpace<P::Mapping>> {
        self.registers.as_ref().ok_or(DmaError::NotInitialized)
    }

    /// Register block, writable
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn registers_mut(&mut self) -> Result<&mut RegisterSpace<P::Mapping>> {
        self.registers.as_mut().ok_or(DmaError::NotInitialized)
    }

    /// Shared buffer
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn buffer(&self) -> Result<&SharedBuffer<P::Mapping>> {
        self.buffer.as_ref().ok_or(DmaError::NotInitialized)
    }

    /// Shared buffer, writable
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn buffer_mut(&mut self) -> Result<&mut SharedBuffer<P::Mapping>> {
        self.buffer.as_mut().ok_or(DmaError::NotInitialized)
    }

    /// Both regions at once, for operations that program addresses from the buffer
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn split_mut(
        &mut self,
    ) -> Result<(&mut RegisterSpace<P::Mapping>, &SharedBuffer<P::Mapping>)> {
        match (self.registers.as_mut(), self.buffer.as_ref()) {
            (Some(registers), Some(buffer)) => Ok((registers, buffer)),
            _ => Err(DmaError::NotInitialized),
        }
    }

    /// Unmap both regions and close the device
    ///
    /// Safe to call repeatedly; later calls do nothing.
    pub fn teardown(&mut self) {
        if self.registers.take().is_some() {
            tracing::info!("Unmapped DMA registers");
        }
        if self.buffer.take().is_some() {
            tracing::info!("Unmapped DMA buffer");
        }
        self.buffer_phys = 0;
        if self.device.take().is_some() {
            tracing::debug!("Closed physical-memory device");
        }
    }
}

impl<P: PhysicalMemory> Drop for AddressSpace<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MapFailure, SimulatedMemory};

    fn layout() -> MemoryLayout {
        MemoryLayout {
            buffer_len: 16 * 1024,
            ..MemoryLayout::default()
        }
    }

    #[test]
    fn initialize_maps_both_regions() {
        let device = SimulatedMemory::open(&layout()).unwrap();
        let probe = device.probe();
        let space = AddressSpace::initialize(device, &layout()).unwrap();

        assert!(space.is_initialized());
        assert_eq!(space.buffer_phys(), layout().buffer_base);
        assert_eq!(space.buffer().unwrap().half_len(), 8 * 1024);
        assert_eq!(probe.counts().maps, 2);
    }

    #[test]
    fn buffer_failure_closes_device() {
        let device = SimulatedMemory::open(&layout())
            .unwrap()
            .fail_mapping(MapFailure::Buffer);
        let probe = device.probe();

        let err = AddressSpace::initialize(device, &layout()).unwrap_err();
        assert!(matches!(
            err,
            DmaError::InitializationFailure {
                stage: InitStage::MapBuffer,
                ..
            }
        ));
        assert!(probe.counts().is_balanced());
        assert_eq!(probe.counts().closes, 1);
    }

    #[test]
    fn invalid_layout_is_rejected_before_mapping() {
        let bad = MemoryLayout {
            buffer_len: 3,
            ..layout()
        };
        let device = SimulatedMemory::open(&layout()).unwrap();
        let probe = device.probe();

        let err = AddressSpace::initialize(device, &bad).unwrap_err();
        assert!(matches!(err, DmaError::InvalidConfig { .. }));
        assert_eq!(probe.counts().maps, 0);
        assert!(probe.counts().is_balanced());
    }

    #[test]
    fn teardown_is_idempotent() {
        let device = SimulatedMemory::open(&layout()).unwrap();
        let probe = device.probe();
        let mut space = AddressSpace::initialize(device, &layout()).unwrap();

        space.teardown();
        space.teardown();

        assert!(!space.is_initialized());
        assert_eq!(space.buffer_phys(), 0);
        assert!(matches!(space.registers(), Err(DmaError::NotInitialized)));
        assert!(matches!(space.buffer_mut(), Err(DmaError::NotInitialized)));
        assert_eq!(
            probe.counts(),
            crate::sim::ResourceCounts {
                opens: 1,
                closes: 1,
                maps: 2,
                unmaps: 2
            }
        );
    }

    #[test]
    fn missing_device_reports_open_stage() {
        let layout = MemoryLayout {
            device_path: "/nonexistent/axidma-mem".into(),
            ..MemoryLayout::default()
        };
        let err = AddressSpace::open(&layout).unwrap_err();
        assert!(matches!(
            err,
            DmaError::InitializationFailure {
                stage: InitStage::OpenDevice,
                ..
            }
        ));
    }
}
