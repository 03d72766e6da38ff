//! Reserved DMA buffer, split into a source half and a destination half
//!
//! ```text
//! phys_addr                 phys_addr + capacity/2          phys_addr + capacity
//! │ source (MM2S reads)     │ destination (S2MM writes)     │
//! ```
//!
//! The caller fills [`source_mut`](SharedBuffer::source_mut) before
//! `start` and reads [`destination`](SharedBuffer::destination) after a
//! successful `sync`.

use crate::error::{DmaError, Result};
use crate::mmio::Mapping;

/// Exclusively-owned buffer mapping with its physical base
#[derive(Debug)]
pub struct SharedBuffer<M: Mapping> {
    mapping: M,
    phys_addr: u64,
    source_addr: u32,
    destination_addr: u32,
}

impl<M: Mapping> SharedBuffer<M> {
    /// Wrap a buffer mapping located at physical address `phys_addr`
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping is empty or odd-sized, or if either half
    /// lies beyond what the 32-bit address registers can express.
    pub fn new(mapping: M, phys_addr: u64) -> Result<Self> {
        let len = mapping.len();
        if len == 0 || len % 2 != 0 {
            return Err(DmaError::invalid_config(format!(
                "buffer length {len} must be non-zero and even"
            )));
        }

        let to_reg = |addr: u64| {
            u32::try_from(addr).map_err(|_| {
                DmaError::invalid_config(format!(
                    "buffer address {addr:#x} does not fit a 32-bit address register"
                ))
            })
        };
        let source_addr = to_reg(phys_addr)?;
        let destination_addr = to_reg(phys_addr + (len / 2) as u64)?;

        Ok(Self {
            mapping,
            phys_addr,
            source_addr,
            destination_addr,
        })
    }

    /// Total length of both halves
    pub fn capacity(&self) -> usize {
        self.mapping.len()
    }

    /// Length of each half, i.e. the largest transfer
    pub fn half_len(&self) -> usize {
        self.mapping.len() / 2
    }

    /// Physical base of the buffer
    pub const fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    /// Physical address programmed into MM2S_SA
    pub const fn source_addr(&self) -> u32 {
        self.source_addr
    }

    /// Physical address programmed into S2MM_DA
    pub const fn destination_addr(&self) -> u32 {
        self.destination_addr
    }

    /// Source half (read by MM2S)
    pub fn source(&self) -> &[u8] {
        self.half(0)
    }

    /// Source half, writable
    pub fn source_mut(&mut self) -> &mut [u8] {
        self.half_mut(0)
    }

    /// Destination half (written by S2MM)
    pub fn destination(&self) -> &[u8] {
        self.half(self.half_len())
    }

    /// Destination half, writable (e.g. to clear stale output)
    pub fn destination_mut(&mut self) -> &mut [u8] {
        let start = self.half_len();
        self.half_mut(start)
    }

    /// Copy `payload` to the start of the source half
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::LengthExceeded`] if `payload` does not fit in one half.
    pub fn load_source(&mut self, payload: &[u8]) -> Result<()> {
        let max = self.half_len();
        if payload.len() > max {
            return Err(DmaError::LengthExceeded {
                requested: payload.len(),
                max,
            });
        }
        self.source_mut()[..payload.len()].copy_from_slice(payload);
        Ok(())
    }

    fn half(&self, start: usize) -> &[u8] {
        // SAFETY: (1) mapping valid for len bytes (Mapping contract); (2) start + half_len
        // <= len because len is even; (3) &self prevents concurrent mutation through Rust.
        // The engine only writes while start/sync hold &mut on the owner.
        unsafe {
            std::slice::from_raw_parts(self.mapping.as_ptr().as_ptr().add(start), self.half_len())
        }
    }

    fn half_mut(&mut self, start: usize) -> &mut [u8] {
        // SAFETY: as in half(); &mut self gives exclusive access and the two halves
        // never overlap.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.mapping.as_ptr().as_ptr().add(start),
                self.half_len(),
            )
        }
    }
}
