//! Driver configuration
//!
//! Built-in defaults come from [`axidma_chip::layout`]. [`DmaConfig::from_env`]
//! applies overrides from the environment so a board with a different
//! address map needs no rebuild:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AXIDMA_DEVICE` | physical-memory device path |
//! | `AXIDMA_REG_BASE` | register block physical base |
//! | `AXIDMA_BUF_BASE` | reserved buffer physical base |
//! | `AXIDMA_POLL_US` | inter-poll sleep in microseconds (0 = busy wait) |
//! | `AXIDMA_MAX_POLLS` | failed polls allowed per channel |
//!
//! Numeric values accept a `0x` prefix.

use crate::error::{DmaError, Result};
use axidma_chip::layout;
use axidma_chip::regs::register_span;
use std::path::PathBuf;
use std::time::Duration;

/// Failed polls tolerated per channel before `sync` reports a timeout.
pub const DEFAULT_MAX_POLLS: u32 = 2_000;

/// Where the register block and the reserved buffer live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Physical-memory device (normally `/dev/mem`)
    pub device_path: PathBuf,
    /// Physical base of the AXI-Lite register block
    pub register_base: u64,
    /// Length of the register mapping
    pub register_len: usize,
    /// Physical base of the reserved buffer
    pub buffer_base: u64,
    /// Total buffer length; each half is one transfer endpoint
    pub buffer_len: usize,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(layout::DEVICE_PATH),
            register_base: layout::registers::BASE_ADDR,
            register_len: layout::registers::MAP_LEN,
            buffer_base: layout::buffer::BASE_ADDR,
            buffer_len: layout::buffer::LEN,
        }
    }
}

impl MemoryLayout {
    /// Largest transfer: half of the buffer
    pub const fn max_transfer_len(&self) -> usize {
        self.buffer_len / 2
    }

    /// Check the layout can be mapped and programmed into 32-bit address registers
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let page = layout::PAGE_SIZE as u64;

        if self.register_len < register_span() {
            return Err(DmaError::invalid_config(format!(
                "register block of {:#x} bytes cannot hold registers up to {:#x}",
                self.register_len,
                register_span()
            )));
        }
        if self.buffer_len == 0 || self.buffer_len % 2 != 0 {
            return Err(DmaError::invalid_config(format!(
                "buffer length {} must be non-zero and even",
                self.buffer_len
            )));
        }
        if self.register_base % page != 0 || self.buffer_base % page != 0 {
            return Err(DmaError::invalid_config(format!(
                "bases must be page aligned (registers {:#x}, buffer {:#x})",
                self.register_base, self.buffer_base
            )));
        }

        let buffer_end = region_end("buffer", self.buffer_base, self.buffer_len)?;
        if buffer_end > 1 << 32 {
            return Err(DmaError::invalid_config(format!(
                "buffer {:#x}..{buffer_end:#x} is not reachable through 32-bit address registers",
                self.buffer_base
            )));
        }

        let register_end = region_end("register block", self.register_base, self.register_len)?;
        if self.buffer_base < register_end && self.register_base < buffer_end {
            return Err(DmaError::invalid_config(format!(
                "buffer {:#x}..{buffer_end:#x} overlaps registers {:#x}..{register_end:#x}",
                self.buffer_base, self.register_base
            )));
        }

        Ok(())
    }
}

/// One past the last byte of a region, or an error if that overflows `u64`
fn region_end(what: &str, base: u64, len: usize) -> Result<u64> {
    u64::try_from(len)
        .ok()
        .and_then(|len| base.checked_add(len))
        .ok_or_else(|| {
            DmaError::invalid_config(format!(
                "{what} at {base:#x} with length {len:#x} wraps the address space"
            ))
        })
}

/// How `sync` waits for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between polls; zero spins without yielding the CPU
    pub interval: Duration,
    /// Failed polls allowed per channel
    pub max_polls: u32,
    /// Optional wall-clock bound per channel, checked alongside `max_polls`
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            max_polls: DEFAULT_MAX_POLLS,
            deadline: None,
        }
    }
}

impl PollPolicy {
    /// Set the inter-poll interval
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-channel poll budget
    #[must_use]
    pub const fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Bound each channel wait by wall-clock time as well
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether polling spins instead of sleeping
    pub const fn is_busy_wait(&self) -> bool {
        self.interval.is_zero()
    }

    /// Upper bound on how long one channel wait sleeps, if known
    ///
    /// A busy wait is bounded only by CPU speed, so only its deadline counts.
    pub fn worst_case(&self) -> Option<Duration> {
        if self.is_busy_wait() {
            return self.deadline;
        }
        let by_budget = self.interval.checked_mul(self.max_polls)?;
        Some(self.deadline.map_or(by_budget, |d| d.min(by_budget)))
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmaConfig {
    /// Physical memory layout
    pub layout: MemoryLayout,
    /// Sync polling behaviour
    pub poll: PollPolicy,
}

impl DmaConfig {
    /// Defaults with `AXIDMA_*` environment overrides applied
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting layout is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from any key/value source
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed, or if the resulting
    /// layout is invalid.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("AXIDMA_DEVICE") {
            self.layout.device_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("AXIDMA_REG_BASE") {
            self.layout.register_base = parse_u64("AXIDMA_REG_BASE", &value)?;
        }
        if let Some(value) = lookup("AXIDMA_BUF_BASE") {
            self.layout.buffer_base = parse_u64("AXIDMA_BUF_BASE", &value)?;
        }
        if let Some(value) = lookup("AXIDMA_POLL_US") {
            self.poll.interval = Duration::from_micros(parse_u64("AXIDMA_POLL_US", &value)?);
        }
        if let Some(value) = lookup("AXIDMA_MAX_POLLS") {
            let polls = parse_u64("AXIDMA_MAX_POLLS", &value)?;
            self.poll.max_polls = u32::try_from(polls).map_err(|_| {
                DmaError::invalid_config(format!("AXIDMA_MAX_POLLS={polls} does not fit in u32"))
            })?;
        }

        tracing::debug!("DMA configuration: {self:?}");
        self.layout.validate()
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal value
///
/// # Errors
///
/// Returns [`DmaError::InvalidConfig`] naming `name` if `value` is not a number.
pub fn parse_u64(name: &str, value: &str) -> Result<u64> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.replace('_', "").parse(),
    };
    parsed.map_err(|e| DmaError::invalid_config(format!("{name}={value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_layout_is_valid() {
        let layout = MemoryLayout::default();
        layout.validate().unwrap();
        assert_eq!(layout.max_transfer_len(), 512 * 1024);
        assert_eq!(layout.device_path, PathBuf::from("/dev/mem"));
    }

    #[test]
    fn rejects_overlap() {
        let layout = MemoryLayout {
            register_base: 0x2000_0000,
            ..MemoryLayout::default()
        };
        assert!(matches!(layout.validate(), Err(DmaError::InvalidConfig { .. })));
    }

    #[test]
    fn rejects_small_register_block() {
        let layout = MemoryLayout {
            register_len: 0x40,
            ..MemoryLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn rejects_unaligned_and_odd() {
        let unaligned = MemoryLayout {
            buffer_base: 0x2000_0010,
            ..MemoryLayout::default()
        };
        assert!(unaligned.validate().is_err());

        let odd = MemoryLayout {
            buffer_len: 4097,
            ..MemoryLayout::default()
        };
        assert!(odd.validate().is_err());
    }

    #[test]
    fn rejects_buffer_above_4g() {
        let layout = MemoryLayout {
            buffer_base: 0xFFFF_F000,
            ..MemoryLayout::default()
        };
        assert!(layout.validate().is_err());
    }

    #[test]
    fn rejects_base_near_u64_max() {
        let buffer = MemoryLayout {
            buffer_base: 0xFFFF_FFFF_FFFF_F000,
            ..MemoryLayout::default()
        };
        assert!(matches!(buffer.validate(), Err(DmaError::InvalidConfig { .. })));

        let registers = MemoryLayout {
            register_base: 0xFFFF_FFFF_FFFF_F000,
            register_len: 0x2000,
            ..MemoryLayout::default()
        };
        assert!(matches!(registers.validate(), Err(DmaError::InvalidConfig { .. })));
    }

    #[test]
    fn wrapping_base_from_environment_is_an_error() {
        for name in ["AXIDMA_BUF_BASE", "AXIDMA_REG_BASE"] {
            let mut config = DmaConfig::default();
            let err = config
                .apply_overrides(|k| (k == name).then(|| "0xFFFFFFFFFFFFF000".to_string()))
                .unwrap_err();
            assert!(matches!(err, DmaError::InvalidConfig { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn parses_hex_and_decimal() {
        assert_eq!(parse_u64("X", "0x4040_0000").unwrap(), 0x4040_0000);
        assert_eq!(parse_u64("X", "0X10").unwrap(), 16);
        assert_eq!(parse_u64("X", " 250 ").unwrap(), 250);
        assert!(parse_u64("X", "lots").is_err());
    }

    #[test]
    fn overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("AXIDMA_DEVICE", "/dev/uio0"),
            ("AXIDMA_REG_BASE", "0x43C00000"),
            ("AXIDMA_BUF_BASE", "0x1F000000"),
            ("AXIDMA_POLL_US", "10"),
            ("AXIDMA_MAX_POLLS", "500"),
        ]
        .into_iter()
        .collect();

        let mut config = DmaConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.layout.device_path, PathBuf::from("/dev/uio0"));
        assert_eq!(config.layout.register_base, 0x43C0_0000);
        assert_eq!(config.layout.buffer_base, 0x1F00_0000);
        assert_eq!(config.poll.interval, Duration::from_micros(10));
        assert_eq!(config.poll.max_polls, 500);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = DmaConfig::default();
        let err = config
            .apply_overrides(|k| (k == "AXIDMA_POLL_US").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("AXIDMA_POLL_US"));
    }

    #[test]
    fn worst_case_wait() {
        assert_eq!(PollPolicy::default().worst_case(), None);
        let p = PollPolicy::default()
            .with_interval(Duration::from_micros(100))
            .with_max_polls(10);
        assert_eq!(p.worst_case(), Some(Duration::from_millis(1)));
        let p = p.with_deadline(Duration::from_micros(150));
        assert_eq!(p.worst_case(), Some(Duration::from_micros(150)));
        assert!(!p.is_busy_wait());
    }
}
