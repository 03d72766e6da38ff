//! Channel status register (DMASR) bits and decoding.
//!
//! Control logic tests raw bits through [`StatusFlags`]; the text produced by
//! [`decode`] is for logs only and is never parsed.
//!
//! Bit 0 follows the hardware polarity: **set means halted**.

use std::fmt;

/// Channel halted (run/stop cleared and outstanding transfers drained).
pub const HALTED: u32 = 1 << 0;
/// No transfer in flight.
pub const IDLE: u32 = 1 << 1;
/// Scatter-gather engine included in the design.
pub const SG_INCLD: u32 = 1 << 3;
/// DMA internal error.
pub const DMA_INT_ERR: u32 = 1 << 4;
/// DMA slave error.
pub const DMA_SLV_ERR: u32 = 1 << 5;
/// DMA decode error (address not backed by a slave).
pub const DMA_DEC_ERR: u32 = 1 << 6;
/// Scatter-gather internal error.
pub const SG_INT_ERR: u32 = 1 << 8;
/// Scatter-gather slave error.
pub const SG_SLV_ERR: u32 = 1 << 9;
/// Scatter-gather decode error.
pub const SG_DEC_ERR: u32 = 1 << 10;
/// Interrupt on complete.
pub const IOC_IRQ: u32 = 1 << 12;
/// Delay interrupt.
pub const DLY_IRQ: u32 = 1 << 13;
/// Error interrupt.
pub const ERR_IRQ: u32 = 1 << 14;

/// A channel has finished its transfer when both of these are set.
pub const COMPLETE: u32 = IDLE | IOC_IRQ;

/// Any latched engine error.
pub const ERROR_MASK: u32 =
    DMA_INT_ERR | DMA_SLV_ERR | DMA_DEC_ERR | SG_INT_ERR | SG_SLV_ERR | SG_DEC_ERR;

/// Named status flags, in decode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFlag {
    /// [`IDLE`]
    Idle,
    /// [`SG_INCLD`]
    SgIncluded,
    /// [`DMA_INT_ERR`]
    DmaInternalError,
    /// [`DMA_SLV_ERR`]
    DmaSlaveError,
    /// [`DMA_DEC_ERR`]
    DmaDecodeError,
    /// [`SG_INT_ERR`]
    SgInternalError,
    /// [`SG_SLV_ERR`]
    SgSlaveError,
    /// [`SG_DEC_ERR`]
    SgDecodeError,
    /// [`IOC_IRQ`]
    IocIrq,
    /// [`DLY_IRQ`]
    DelayIrq,
    /// [`ERR_IRQ`]
    ErrorIrq,
}

impl StatusFlag {
    /// Every flag, in the order the decoder prints them.
    pub const ALL: [Self; 11] = [
        Self::Idle,
        Self::SgIncluded,
        Self::DmaInternalError,
        Self::DmaSlaveError,
        Self::DmaDecodeError,
        Self::SgInternalError,
        Self::SgSlaveError,
        Self::SgDecodeError,
        Self::IocIrq,
        Self::DelayIrq,
        Self::ErrorIrq,
    ];

    /// Register bit for this flag.
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::Idle => IDLE,
            Self::SgIncluded => SG_INCLD,
            Self::DmaInternalError => DMA_INT_ERR,
            Self::DmaSlaveError => DMA_SLV_ERR,
            Self::DmaDecodeError => DMA_DEC_ERR,
            Self::SgInternalError => SG_INT_ERR,
            Self::SgSlaveError => SG_SLV_ERR,
            Self::SgDecodeError => SG_DEC_ERR,
            Self::IocIrq => IOC_IRQ,
            Self::DelayIrq => DLY_IRQ,
            Self::ErrorIrq => ERR_IRQ,
        }
    }

    /// Datasheet mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SgIncluded => "SGIncld",
            Self::DmaInternalError => "DMAIntErr",
            Self::DmaSlaveError => "DMASlvErr",
            Self::DmaDecodeError => "DMADecErr",
            Self::SgInternalError => "SGIntErr",
            Self::SgSlaveError => "SGSlvErr",
            Self::SgDecodeError => "SGDecErr",
            Self::IocIrq => "IOC_Irq",
            Self::DelayIrq => "Dly_Irq",
            Self::ErrorIrq => "Err_Irq",
        }
    }

    /// Whether this flag reports an engine error.
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.bit() & ERROR_MASK != 0
    }
}

/// Raw DMASR value with typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusFlags(u32);

impl StatusFlags {
    /// Wrap a raw register value.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw register value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// All bits in `mask` are set.
    #[must_use]
    pub const fn contains(self, mask: u32) -> bool {
        self.0 & mask == mask
    }

    /// Bit 0 set.
    #[must_use]
    pub const fn is_halted(self) -> bool {
        self.contains(HALTED)
    }

    /// Idle and IOC both set.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        self.contains(COMPLETE)
    }

    /// Any error bit latched.
    #[must_use]
    pub const fn has_error(self) -> bool {
        self.0 & ERROR_MASK != 0
    }

    /// Set flags, in decode order.
    pub fn flags(self) -> impl Iterator<Item = StatusFlag> {
        StatusFlag::ALL
            .into_iter()
            .filter(move |flag| self.contains(flag.bit()))
    }

    /// Set error flags only.
    pub fn errors(self) -> impl Iterator<Item = StatusFlag> {
        self.flags().filter(|flag| flag.is_error())
    }
}

impl From<u32> for StatusFlags {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_halted() { "Halted" } else { "Running" })?;
        f.write_str(" ( ")?;
        for flag in self.flags() {
            write!(f, "{} ", flag.mnemonic())?;
        }
        f.write_str(")")
    }
}

/// Human-readable description of a raw status word, e.g. `"Halted ( Idle IOC_Irq )"`.
#[must_use]
pub fn decode(status: u32) -> String {
    StatusFlags::from_bits(status).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halted_idle() {
        assert_eq!(decode(0x0000_0003), "Halted ( Idle )");
    }

    #[test]
    fn halted_idle_ioc() {
        assert_eq!(decode(0x0000_1003), "Halted ( Idle IOC_Irq )");
    }

    #[test]
    fn running_is_bit_zero_clear() {
        assert_eq!(decode(0x0000_1002), "Running ( Idle IOC_Irq )");
        assert_eq!(decode(0), "Running ( )");
    }

    #[test]
    fn every_flag_in_fixed_order() {
        let all = StatusFlag::ALL.iter().fold(HALTED, |acc, f| acc | f.bit());
        assert_eq!(
            decode(all),
            "Halted ( Idle SGIncld DMAIntErr DMASlvErr DMADecErr SGIntErr SGSlvErr \
             SGDecErr IOC_Irq Dly_Irq Err_Irq )"
        );
    }

    #[test]
    fn unnamed_bits_are_ignored() {
        // bits 2, 7, 11 and 15+ carry no flag
        assert_eq!(decode(0xFFFF_8884), "Running ( )");
    }

    #[test]
    fn deterministic() {
        for bits in [0u32, 0x3, 0x1003, 0x4071, 0xFFFF_FFFF] {
            assert_eq!(decode(bits), decode(bits));
        }
    }

    #[test]
    fn completion_needs_idle_and_ioc() {
        assert!(!StatusFlags::from_bits(IDLE).is_complete());
        assert!(!StatusFlags::from_bits(IOC_IRQ).is_complete());
        assert!(StatusFlags::from_bits(IDLE | IOC_IRQ).is_complete());
        assert!(StatusFlags::from_bits(HALTED | IDLE | IOC_IRQ).is_complete());
    }

    #[test]
    fn error_flags() {
        let s = StatusFlags::from_bits(DMA_SLV_ERR | ERR_IRQ | IDLE);
        assert!(s.has_error());
        assert_eq!(s.errors().collect::<Vec<_>>(), vec![StatusFlag::DmaSlaveError]);
        assert!(!StatusFlags::from_bits(ERR_IRQ).has_error());
    }
}
