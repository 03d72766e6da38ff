//! Physical memory layout of the DMA design.
//!
//! ```text
//! Region            Physical base   Size     Purpose
//! ───────────────── ─────────────── ──────── ──────────────────────────────────
//! AXI DMA (AXI-Lite) 0x4040_0000     4 KB    MM2S / S2MM register block
//! Reserved buffer    0x2000_0000     1 MB    source half | destination half
//! ```
//!
//! The reserved buffer is carved out of DRAM (kernel `mem=` / reserved-memory
//! node) so the engine can address it physically. MM2S reads the lower half,
//! S2MM writes the upper half.

/// AXI DMA register block.
pub mod registers {
    /// Physical base address of the AXI-Lite register block.
    pub const BASE_ADDR: u64 = 0x4040_0000;
    /// Size of the register mapping in bytes (one page).
    pub const MAP_LEN: usize = 4096;
}

/// Reserved DMA buffer shared between host and engine.
pub mod buffer {
    /// Physical base address of the reserved buffer.
    pub const BASE_ADDR: u64 = 0x2000_0000;
    /// Total buffer length in bytes (1 MiB).
    pub const LEN: usize = 1024 * 1024;
    /// Largest single transfer: one half of the buffer (512 KiB).
    pub const MAX_TRANSFER_LEN: usize = LEN / 2;
}

/// Page size used to check mapping alignment.
pub const PAGE_SIZE: usize = 4096;

/// Default physical-memory device.
pub const DEVICE_PATH: &str = "/dev/mem";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_page_aligned() {
        assert_eq!(registers::BASE_ADDR % PAGE_SIZE as u64, 0);
        assert_eq!(buffer::BASE_ADDR % PAGE_SIZE as u64, 0);
        assert_eq!(buffer::LEN % PAGE_SIZE, 0);
    }

    #[test]
    fn regions_do_not_overlap() {
        let buf_end = buffer::BASE_ADDR + buffer::LEN as u64;
        assert!(buf_end <= registers::BASE_ADDR);
    }

    #[test]
    fn halves_are_512k() {
        assert_eq!(buffer::MAX_TRANSFER_LEN, 512 * 1024);
    }
}
