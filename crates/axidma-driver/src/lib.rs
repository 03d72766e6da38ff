//! User-space driver for a Xilinx AXI DMA engine in simple (direct register) mode.
//!
//! The engine moves data between a reserved physical buffer and an AXI-Stream
//! accelerator (AES128 on the reference design). Everything runs in user space
//! through `/dev/mem`; no kernel module is required.
//!
//! # Layers
//!
//! ```text
//! DmaController    reset / start / sync / quick_poll, TransferState
//!   AddressSpace   device + register mapping + buffer mapping, all-or-nothing init
//!     RegisterSpace  (Channel, ChannelRegister) → volatile u32 access
//!     SharedBuffer   source half | destination half
//!   PhysicalMemory DevMem (real) or SimulatedMemory (loopback engine)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use axidma_driver::{DmaConfig, DmaController};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DmaConfig::from_env()?;
//! let mut dma = DmaController::open(&config)?;
//!
//! dma.buffer_mut()?.load_source(b"sixteen byte blk")?;
//! dma.start(16)?;
//! dma.sync()?;
//! println!("{:02x?}", &dma.buffer()?.destination()[..16]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod address_space;
mod buffer;
pub mod cipher;
pub mod config;
mod controller;
pub mod dump;
mod error;
pub mod mmio;
mod registers;
pub mod sim;

/// Register map and status decoding (re-exported from axidma-chip).
pub mod chip {
    pub use axidma_chip::layout;
    pub use axidma_chip::regs::{self, control};
    pub use axidma_chip::status;
    pub use axidma_chip::{decode, Channel, ChannelRegister, StatusFlag, StatusFlags};
}

pub use address_space::AddressSpace;
pub use buffer::SharedBuffer;
pub use cipher::{configure_cipher, CipherEngine};
pub use config::{DmaConfig, MemoryLayout, PollPolicy, DEFAULT_MAX_POLLS};
pub use controller::{ChannelReadiness, DmaController, TransferState};
pub use dump::{format_hex_dump, hex_dump, MEM_DUMP_MAX_BYTES};
pub use error::{DmaError, InitStage, Result};
pub use mmio::{DevMem, Mapping, MmapRegion, PhysicalMemory};
pub use registers::RegisterSpace;

pub use axidma_chip::{decode, Channel, ChannelRegister, StatusFlags};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Channel, ChannelReadiness, DmaConfig, DmaController, DmaError, PollPolicy, Result,
        StatusFlags, TransferState,
    };
}
