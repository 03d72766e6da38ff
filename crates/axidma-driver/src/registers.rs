//! Typed access to the AXI DMA register block
//!
//! Callers name a `(Channel, ChannelRegister)` pair; offset arithmetic lives in
//! [`axidma_chip::regs`]. Every access is a full 32-bit volatile word.

use crate::error::{DmaError, Result};
use crate::mmio::Mapping;
use axidma_chip::regs::{control, register_span};
use axidma_chip::{Channel, ChannelRegister, StatusFlags};

/// Exclusively-owned register block mapping
#[derive(Debug)]
pub struct RegisterSpace<M: Mapping> {
    mapping: M,
}

impl<M: Mapping> RegisterSpace<M> {
    /// Wrap a register block mapping
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping is too small to hold both channel windows.
    pub fn new(mapping: M) -> Result<Self> {
        if mapping.len() < register_span() {
            return Err(DmaError::invalid_config(format!(
                "register mapping of {:#x} bytes is smaller than the register map ({:#x})",
                mapping.len(),
                register_span()
            )));
        }
        Ok(Self { mapping })
    }

    /// Read one channel register
    pub fn read(&self, channel: Channel, reg: ChannelRegister) -> u32 {
        let offset = channel.offset(reg);
        let value = self.mapping.read32(offset);
        tracing::trace!("Read {channel} {reg:?} @ {offset:#04x} = {value:#010x}");
        value
    }

    /// Write one channel register
    pub fn write(&mut self, channel: Channel, reg: ChannelRegister, value: u32) {
        let offset = channel.offset(reg);
        tracing::trace!("Write {channel} {reg:?} @ {offset:#04x} = {value:#010x}");
        self.mapping.write32(offset, value);
    }

    /// Current status of a channel
    pub fn status(&self, channel: Channel) -> StatusFlags {
        StatusFlags::from_bits(self.read(channel, ChannelRegister::Status))
    }

    /// Write a command to a channel's control register
    pub fn command(&mut self, channel: Channel, command: u32) {
        self.write(channel, ChannelRegister::Control, command);
    }

    /// Write HALT to a channel
    pub fn halt(&mut self, channel: Channel) {
        self.command(channel, control::HALT);
    }

    /// Underlying mapping
    pub const fn mapping(&self) -> &M {
        &self.mapping
    }
}
