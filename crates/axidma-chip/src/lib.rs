//! Silicon model for the AXI DMA engine that streams data through the
//! AXIS AES128 accelerator.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the programmable logic: where the register block and the
//! reserved DMA buffer live in physical memory, the register map of both
//! DMA channels, the command values, and the status bit layout.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`layout`] | Physical base addresses and sizes (register block, reserved buffer) |
//! | [`regs`] | Channel register offsets and control command values |
//! | [`status`] | Status register bits, [`StatusFlags`](status::StatusFlags) and the decoder |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod layout;
pub mod regs;
pub mod status;

pub use regs::{Channel, ChannelRegister};
pub use status::{decode, StatusFlag, StatusFlags};
