//! Physical memory access through `/dev/mem`
//!
//! Two seams keep the rest of the driver independent of the host:
//!
//! - [`PhysicalMemory`]: an opened device that can map physical ranges.
//!   Dropping it closes the device.
//! - [`Mapping`]: one mapped range. Dropping it unmaps the range.
//!
//! [`DevMem`] and [`MmapRegion`] are the real implementations; the
//! [`sim`](crate::sim) module provides an emulated engine behind the same traits.
//!
//! # Evolution
//!
//! mmap/munmap go through rustix; only the `O_SYNC` open flag comes from libc.

use crate::error::{DmaError, InitStage, Result};
use axidma_chip::regs::WORD;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// A mapped range of physical memory
///
/// Register accesses default to word-sized volatile reads and writes through
/// [`as_ptr`](Mapping::as_ptr). Emulated hardware may override them to react
/// to accesses.
///
/// # Safety
///
/// Implementors guarantee that `as_ptr()` is valid for reads and writes of
/// `len()` bytes, is 4-byte aligned, and stays valid until the mapping is
/// dropped.
pub unsafe trait Mapping: fmt::Debug {
    /// Base of the mapping in process address space
    fn as_ptr(&self) -> NonNull<u8>;

    /// Length in bytes
    fn len(&self) -> usize;

    /// Whether the mapping is zero-sized
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Volatile 32-bit read
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not word aligned or `offset + 4` exceeds the mapping.
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: as_ptr is valid for len bytes and 4-byte aligned (trait contract).
        unsafe { read_word(self.as_ptr(), self.len(), offset) }
    }

    /// Volatile 32-bit write
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not word aligned or `offset + 4` exceeds the mapping.
    fn write32(&mut self, offset: usize, value: u32) {
        // SAFETY: as in read32; &mut self gives exclusive access through this mapping.
        unsafe { write_word(self.as_ptr(), self.len(), offset, value) }
    }
}

/// Volatile word read at `base + offset`
///
/// # Safety
///
/// `base` must be valid for reads of `len` bytes and 4-byte aligned.
///
/// # Panics
///
/// Panics if `offset` is not word aligned or `offset + 4 > len`.
pub(crate) unsafe fn read_word(base: NonNull<u8>, len: usize, offset: usize) -> u32 {
    assert!(
        offset % WORD == 0 && offset + WORD <= len,
        "Register offset {offset:#x} out of bounds or unaligned"
    );
    // SAFETY: read_volatile necessary for MMIO - hardware can change the value.
    // Invariants: (1) base valid for len bytes (caller); (2) offset+4 <= len (checked);
    // (3) base aligned and offset word aligned, so the u32 is aligned.
    unsafe { base.as_ptr().add(offset).cast::<u32>().read_volatile() }
}

/// Volatile word write at `base + offset`
///
/// # Safety
///
/// `base` must be valid for writes of `len` bytes and 4-byte aligned.
///
/// # Panics
///
/// Panics if `offset` is not word aligned or `offset + 4 > len`.
pub(crate) unsafe fn write_word(base: NonNull<u8>, len: usize, offset: usize, value: u32) {
    assert!(
        offset % WORD == 0 && offset + WORD <= len,
        "Register offset {offset:#x} out of bounds or unaligned"
    );
    // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
    // Invariants: (1) base valid for len bytes (caller); (2) offset+4 <= len; (3) u32 aligned.
    unsafe { base.as_ptr().add(offset).cast::<u32>().write_volatile(value) }
}

/// An opened physical-memory device
pub trait PhysicalMemory: fmt::Debug {
    /// Mapping type produced by [`map`](PhysicalMemory::map)
    type Mapping: Mapping;

    /// Map `len` bytes starting at physical address `phys_addr`
    ///
    /// # Errors
    ///
    /// Returns an error if the range cannot be mapped.
    fn map(&mut self, phys_addr: u64, len: usize) -> Result<Self::Mapping>;
}

/// `/dev/mem` opened read-write with synchronous (uncached) semantics
#[derive(Debug)]
pub struct DevMem {
    file: File,
    path: PathBuf,
}

impl DevMem {
    /// Open the physical-memory device
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::InitializationFailure`] if the device cannot be
    /// opened (missing, or not running as root).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Trying to mmap physical memory through {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| {
                DmaError::initialization(
                    InitStage::OpenDevice,
                    format!("Failed to open {}: {e}", path.display()),
                )
            })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Device path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DevMem {
    fn drop(&mut self) {
        tracing::debug!("Closing {}", self.path.display());
    }
}

impl PhysicalMemory for DevMem {
    type Mapping = MmapRegion;

    fn map(&mut self, phys_addr: u64, len: usize) -> Result<MmapRegion> {
        MmapRegion::new(&self.file, phys_addr, len)
    }
}

/// Shared mapping of a physical range, unmapped on drop
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
    phys_addr: u64,
}

impl fmt::Debug for MmapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &format_args!("{:#x}", self.len))
            .field("phys_addr", &format_args!("{:#x}", self.phys_addr))
            .finish()
    }
}

impl MmapRegion {
    /// Map `len` bytes of `file` at offset `phys_addr`
    ///
    /// # Errors
    ///
    /// Returns an error if `len` is zero or mmap fails.
    pub fn new(file: &File, phys_addr: u64, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(DmaError::invalid_config(format!(
                "zero-length mapping requested at {phys_addr:#x}"
            )));
        }

        // SAFETY: mmap necessary to reach device registers and the reserved buffer.
        // Invariants: (1) file is an open /dev/mem handle; (2) len > 0 (checked above);
        // (3) phys_addr page aligned (MemoryLayout::validate); (4) MAP_SHARED so
        // writes reach the bus; (5) unmapped exactly once in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                phys_addr,
            )
        }
        .map_err(|e| DmaError::from(std::io::Error::from(e)))?;

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            DmaError::invalid_config(format!("mmap of {phys_addr:#x} returned null"))
        })?;

        tracing::info!("Mapped {len:#x} bytes of physical memory at {phys_addr:#010x} to {ptr:p}");

        Ok(Self {
            ptr,
            len,
            phys_addr,
        })
    }

    /// Physical address of the first byte
    pub const fn phys_addr(&self) -> u64 {
        self.phys_addr
    }
}

// SAFETY: the pointer comes from a successful mmap of `len` bytes (page aligned,
// so 4-byte aligned) and stays valid until Drop unmaps it.
unsafe impl Mapping for MmapRegion {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: munmap necessary - ptr/len are exactly what mmap returned in new();
        // Drop runs at most once and no borrows of the mapping outlive self.
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::error!("munmap of {:#x} failed during drop: {e}", self.phys_addr);
        } else {
            tracing::debug!("Unmapped {:#x} bytes at {:#010x}", self.len, self.phys_addr);
        }
    }
}

// SAFETY: MmapRegion owns its mapping exclusively; the mapping is process-wide,
// so moving the owner to another thread does not invalidate it. It is deliberately
// not Sync: register access assumes a single controlling thread.
unsafe impl Send for MmapRegion {}
