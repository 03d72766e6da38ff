//! AXI DMA register map (simple / direct-register mode).
//!
//! The block is a flat array of 32-bit words. Each channel owns a window
//! starting at its base offset; the registers inside a window sit at the
//! same relative offsets for both channels.
//!
//! ```text
//! Offset  Register
//! ─────── ──────────────────────────────
//! 0x00    MM2S_DMACR   control
//! 0x04    MM2S_DMASR   status
//! 0x18    MM2S_SA      source address
//! 0x28    MM2S_LENGTH  transfer length
//! 0x30    S2MM_DMACR   control
//! 0x34    S2MM_DMASR   status
//! 0x48    S2MM_DA      destination address
//! 0x58    S2MM_LENGTH  transfer length
//! ```
//!
//! The hardware only honours word-aligned, word-sized accesses.

use std::fmt;

/// Width of every register in bytes.
pub const WORD: usize = 4;

/// Base offset of the MM2S (memory-to-stream) channel window.
pub const MM2S_BASE: usize = 0x00;
/// Base offset of the S2MM (stream-to-memory) channel window.
pub const S2MM_BASE: usize = 0x30;

// ── Per-channel relative offsets ─────────────────────────────────────────────

/// Control register (DMACR).
pub const CONTROL: usize = 0x00;
/// Status register (DMASR).
pub const STATUS: usize = 0x04;
/// Source (MM2S) or destination (S2MM) address register.
pub const ADDRESS: usize = 0x18;
/// Length register. Writing a non-zero value to a running channel arms it.
pub const LENGTH: usize = 0x28;

/// Control register command values.
pub mod control {
    /// Stop the channel.
    pub const HALT: u32 = 0;
    /// Run/stop bit.
    pub const RUN: u32 = 1 << 0;
    /// Soft reset of the whole engine.
    pub const RESET: u32 = 1 << 2;
    /// Interrupt-on-complete enable.
    pub const IOC_IRQ_EN: u32 = 1 << 12;
    /// Delay-interrupt enable.
    pub const DLY_IRQ_EN: u32 = 1 << 13;
    /// Error-interrupt enable.
    pub const ERR_IRQ_EN: u32 = 1 << 14;
    /// Upper nibble written alongside the enables (bit 15 is reserved and ignored).
    pub const IRQ_ENABLE_MASK: u32 = 0xF000;
    /// Run with completion and error interrupts enabled (`0xF001`).
    pub const RUN_WITH_INTERRUPTS: u32 = RUN | IRQ_ENABLE_MASK;
}

/// One of the two unidirectional DMA channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Memory-to-stream: host buffer → accelerator.
    Mm2s,
    /// Stream-to-memory: accelerator → host buffer.
    S2mm,
}

impl Channel {
    /// Both channels, outbound first.
    pub const ALL: [Self; 2] = [Self::Mm2s, Self::S2mm];

    /// Offset of this channel's register window.
    #[must_use]
    pub const fn base(self) -> usize {
        match self {
            Self::Mm2s => MM2S_BASE,
            Self::S2mm => S2MM_BASE,
        }
    }

    /// Absolute byte offset of `reg` for this channel.
    #[must_use]
    pub const fn offset(self, reg: ChannelRegister) -> usize {
        self.base() + reg.offset()
    }

    /// Hardware name of the channel.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mm2s => "MM2S",
            Self::S2mm => "S2MM",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registers present in every channel window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRegister {
    /// DMACR.
    Control,
    /// DMASR.
    Status,
    /// SA for MM2S, DA for S2MM.
    Address,
    /// LENGTH.
    Length,
}

impl ChannelRegister {
    /// Offset relative to the channel base.
    #[must_use]
    pub const fn offset(self) -> usize {
        match self {
            Self::Control => CONTROL,
            Self::Status => STATUS,
            Self::Address => ADDRESS,
            Self::Length => LENGTH,
        }
    }
}

/// One past the last byte any channel register occupies.
#[must_use]
pub const fn register_span() -> usize {
    S2MM_BASE + LENGTH + WORD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_offsets_match_hardware_map() {
        assert_eq!(Channel::Mm2s.offset(ChannelRegister::Control), 0x00);
        assert_eq!(Channel::Mm2s.offset(ChannelRegister::Status), 0x04);
        assert_eq!(Channel::Mm2s.offset(ChannelRegister::Address), 0x18);
        assert_eq!(Channel::Mm2s.offset(ChannelRegister::Length), 0x28);
        assert_eq!(Channel::S2mm.offset(ChannelRegister::Control), 0x30);
        assert_eq!(Channel::S2mm.offset(ChannelRegister::Status), 0x34);
        assert_eq!(Channel::S2mm.offset(ChannelRegister::Address), 0x48);
        assert_eq!(Channel::S2mm.offset(ChannelRegister::Length), 0x58);
    }

    #[test]
    fn every_offset_is_word_aligned() {
        for ch in Channel::ALL {
            for reg in [
                ChannelRegister::Control,
                ChannelRegister::Status,
                ChannelRegister::Address,
                ChannelRegister::Length,
            ] {
                assert_eq!(ch.offset(reg) % WORD, 0, "{ch} {reg:?}");
            }
        }
    }

    #[test]
    fn command_values() {
        assert_eq!(control::HALT, 0);
        assert_eq!(control::RESET, 4);
        assert_eq!(control::RUN_WITH_INTERRUPTS, 0xF001);
        let enables = control::IOC_IRQ_EN | control::DLY_IRQ_EN | control::ERR_IRQ_EN;
        assert_eq!(control::RUN_WITH_INTERRUPTS & enables, enables);
    }

    #[test]
    fn span_covers_s2mm_length() {
        assert_eq!(register_span(), 0x5C);
    }
}
