//! Error types for DMA driver operations

use axidma_chip::{Channel, StatusFlags};
use std::fmt;
use thiserror::Error;

/// Result type alias for DMA operations
pub type Result<T> = std::result::Result<T, DmaError>;

/// Step of [`AddressSpace::initialize`](crate::AddressSpace::initialize) that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Opening the physical-memory device
    OpenDevice,
    /// Mapping the reserved DMA buffer
    MapBuffer,
    /// Mapping the register block
    MapRegisters,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenDevice => write!(f, "open device"),
            Self::MapBuffer => write!(f, "map DMA buffer"),
            Self::MapRegisters => write!(f, "map DMA registers"),
        }
    }
}

/// Errors that can occur during DMA operations
#[derive(Debug, Error)]
pub enum DmaError {
    /// Device open or mapping failed; nothing is left mapped or open
    #[error("Initialization failed ({stage}): {reason}")]
    InitializationFailure {
        /// Step that failed
        stage: InitStage,
        /// Reason for failure
        reason: String,
    },

    /// Operation attempted without a live register/buffer mapping
    #[error("DMA driver hasn't been initialized")]
    NotInitialized,

    /// Requested transfer is larger than one buffer half
    #[error("Transfer of {requested} bytes exceeds the maximum of {max} bytes ({} KB)", .max / 1024)]
    LengthExceeded {
        /// Requested length in bytes
        requested: usize,
        /// Half of the buffer capacity
        max: usize,
    },

    /// Poll budget exhausted before the channel reported completion
    #[error("{channel} did not complete after {polls} polls (status: {status})")]
    SyncTimeout {
        /// Channel being waited on
        channel: Channel,
        /// Failed polls before giving up
        polls: u32,
        /// Last status observed
        status: StatusFlags,
    },

    /// The engine latched an error bit while a channel was being waited on
    #[error("{channel} reported an error (status: {status})")]
    ChannelFault {
        /// Faulting channel
        channel: Channel,
        /// Status with the error bits set
        status: StatusFlags,
    },

    /// Accelerator key/IV setup failed
    #[error("Cipher setup failed: {reason}")]
    CipherSetup {
        /// Reason for failure
        reason: String,
    },

    /// Memory layout or polling configuration is unusable
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Reason for failure
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl DmaError {
    /// Create an initialization failure
    pub fn initialization(stage: InitStage, reason: impl Into<String>) -> Self {
        Self::InitializationFailure {
            stage,
            reason: reason.into(),
        }
    }

    /// Create a cipher setup error
    pub fn cipher_setup(reason: impl Into<String>) -> Self {
        Self::CipherSetup {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether the caller can retry without re-initializing
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::LengthExceeded { .. }
                | Self::SyncTimeout { .. }
                | Self::CipherSetup { .. }
        )
    }
}
