//! Transfer Controller
//!
//! Drives one MM2S → accelerator → S2MM round trip through the simple
//! (non scatter-gather) register interface:
//!
//! ```text
//!            start(len)                 sync()
//!  Ready ──────────────► Running ───────────────► Synced
//!    ▲   (Configuring while                │
//!    │    registers are written)           ▼ timeout / fault
//!    └──────────── reset() ─────────── Failed
//! ```
//!
//! `start` never waits; `sync` is the only call that blocks, bounded by the
//! [`PollPolicy`] budget. `quick_poll` reads each status register once.

use crate::address_space::AddressSpace;
use crate::buffer::SharedBuffer;
use crate::config::{DmaConfig, PollPolicy};
use crate::error::{DmaError, Result};
use crate::mmio::{DevMem, PhysicalMemory};
use crate::registers::RegisterSpace;
use axidma_chip::regs::control;
use axidma_chip::{Channel, ChannelRegister, StatusFlags};
use std::sync::atomic::{fence, Ordering};
use std::time::Instant;
use tracing::Level;

/// Where the controller is in the transfer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// No live mapping (torn down)
    Uninitialized,
    /// Reset issued, nothing in flight
    Ready,
    /// `start` is writing registers
    Configuring,
    /// Both channels armed
    Running,
    /// Last `sync` saw both channels complete
    ///
    /// Kept distinct from `Ready` so callers can tell a finished transfer from
    /// a fresh reset; `start` accepts both the same way.
    Synced,
    /// Last `sync` timed out or saw an error bit
    Failed,
}

/// Result of [`DmaController::quick_poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelReadiness {
    /// Both channels show Idle and IOC
    Ready,
    /// At least one channel is still working (or never started)
    Busy,
}

/// Owner of one DMA engine
#[derive(Debug)]
pub struct DmaController<P: PhysicalMemory> {
    space: AddressSpace<P>,
    poll: PollPolicy,
    state: TransferState,
}

impl DmaController<DevMem> {
    /// Open `/dev/mem` (or the configured device), map both regions and reset the engine
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::InitializationFailure`] if the device cannot be
    /// opened or mapped.
    pub fn open(config: &DmaConfig) -> Result<Self> {
        let space = AddressSpace::open(&config.layout)?;
        Self::new(space, config.poll)
    }
}

impl<P: PhysicalMemory> DmaController<P> {
    /// Take ownership of a mapped address space and reset the engine
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] if `space` was already torn down.
    pub fn new(space: AddressSpace<P>, poll: PollPolicy) -> Result<Self> {
        let mut controller = Self {
            space,
            poll,
            state: TransferState::Uninitialized,
        };
        controller.reset()?;
        tracing::info!("DMA initialization complete");
        Ok(controller)
    }

    /// Convenience for `AddressSpace::initialize` followed by [`new`](Self::new)
    ///
    /// # Errors
    ///
    /// Returns the initialization error, with nothing left open or mapped.
    pub fn with_device(device: P, config: &DmaConfig) -> Result<Self> {
        let space = AddressSpace::initialize(device, &config.layout)?;
        Self::new(space, config.poll)
    }

    /// Current lifecycle state
    pub const fn state(&self) -> TransferState {
        self.state
    }

    /// Active polling policy
    pub const fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Replace the polling policy used by later `sync` calls
    pub fn set_poll_policy(&mut self, poll: PollPolicy) {
        self.poll = poll;
    }

    /// Largest transfer `start` accepts
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn max_transfer_len(&self) -> Result<usize> {
        Ok(self.space.buffer()?.half_len())
    }

    /// Shared buffer, e.g. to read the destination half after `sync`
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn buffer(&self) -> Result<&SharedBuffer<P::Mapping>> {
        self.space.buffer()
    }

    /// Shared buffer, writable, e.g. to fill the source half before `start`
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn buffer_mut(&mut self) -> Result<&mut SharedBuffer<P::Mapping>> {
        self.space.buffer_mut()
    }

    /// Underlying address space
    pub const fn address_space(&self) -> &AddressSpace<P> {
        &self.space
    }

    /// Reset both channels
    ///
    /// Fire-and-forget: returns once the writes are issued.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn reset(&mut self) -> Result<()> {
        let regs = self.space.registers_mut()?;
        tracing::info!("Resetting the DMA");
        regs.command(Channel::S2mm, control::RESET);
        regs.command(Channel::Mm2s, control::RESET);
        self.state = TransferState::Ready;
        Ok(())
    }

    /// Program and arm a transfer of `length` bytes
    ///
    /// MM2S reads `length` bytes from the source half; S2MM writes up to
    /// `length` bytes into the destination half. Returns once the registers
    /// are written, without confirming the engine accepted them.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown, or
    /// [`DmaError::LengthExceeded`] if `length` is larger than half the
    /// buffer. Neither writes any register.
    pub fn start(&mut self, length: usize) -> Result<()> {
        let max = self.space.buffer()?.half_len();
        if length > max {
            tracing::warn!("Transfer of {length} bytes rejected (max {max})");
            return Err(DmaError::LengthExceeded {
                requested: length,
                max,
            });
        }
        // half_len comes from a u32-addressable buffer, so this cannot truncate.
        let length_reg = u32::try_from(length).map_err(|_| DmaError::LengthExceeded {
            requested: length,
            max,
        })?;

        if self.state == TransferState::Running {
            tracing::warn!("Starting a new transfer over one that was never synced");
        }
        self.state = TransferState::Configuring;

        let (regs, buffer) = self.space.split_mut()?;

        tracing::info!("Halting the DMA");
        regs.halt(Channel::S2mm);
        regs.halt(Channel::Mm2s);
        log_status(regs);

        tracing::info!("Setting DMA transfer address");
        regs.write(
            Channel::S2mm,
            ChannelRegister::Address,
            buffer.destination_addr(),
        );
        regs.write(Channel::Mm2s, ChannelRegister::Address, buffer.source_addr());

        // Source bytes written through the buffer mapping must be visible
        // before the engine is released.
        fence(Ordering::SeqCst);

        tracing::info!("Starting the DMA");
        regs.command(Channel::S2mm, control::RUN_WITH_INTERRUPTS);
        regs.command(Channel::Mm2s, control::RUN_WITH_INTERRUPTS);

        tracing::info!("Setting DMA transfer length: {length} bytes");
        regs.write(Channel::S2mm, ChannelRegister::Length, length_reg);
        regs.write(Channel::Mm2s, ChannelRegister::Length, length_reg);
        log_status(regs);

        self.state = TransferState::Running;
        Ok(())
    }

    /// Wait for MM2S, then S2MM, to report completion
    ///
    /// Each channel gets its own [`PollPolicy`] budget. An MM2S failure returns
    /// immediately without waiting on S2MM. Registers are left as they are on
    /// failure; call [`reset`](Self::reset) before retrying.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown,
    /// [`DmaError::SyncTimeout`] when a channel exhausts its budget, or
    /// [`DmaError::ChannelFault`] when a channel latches an error bit.
    pub fn sync(&mut self) -> Result<()> {
        let regs = self.space.registers()?;
        let poll = self.poll;

        let outcome = wait_for(regs, Channel::Mm2s, poll)
            .and_then(|mm2s| Ok((mm2s, wait_for(regs, Channel::S2mm, poll)?)));

        match outcome {
            Ok((mm2s, s2mm)) => {
                fence(Ordering::SeqCst);
                tracing::info!("DMA transfer complete (MM2S {mm2s} polls, S2MM {s2mm} polls)");
                self.state = TransferState::Synced;
                Ok(())
            }
            Err(e) => {
                tracing::error!("DMA sync failed: {e}");
                self.state = TransferState::Failed;
                Err(e)
            }
        }
    }

    /// Non-blocking completion check: one status read per channel
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn quick_poll(&self) -> Result<ChannelReadiness> {
        let regs = self.space.registers()?;
        let mm2s = regs.status(Channel::Mm2s);
        let s2mm = regs.status(Channel::S2mm);
        Ok(if mm2s.is_complete() && s2mm.is_complete() {
            ChannelReadiness::Ready
        } else {
            ChannelReadiness::Busy
        })
    }

    /// Structured status of one channel
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::NotInitialized`] after teardown.
    pub fn status(&self, channel: Channel) -> Result<StatusFlags> {
        Ok(self.space.registers()?.status(channel))
    }

    /// Unmap both regions and close the device; idempotent
    pub fn teardown(&mut self) {
        self.space.teardown();
        self.state = TransferState::Uninitialized;
    }
}

/// Poll `channel` until complete, returning the number of failed polls
fn wait_for<M: crate::mmio::Mapping>(
    regs: &RegisterSpace<M>,
    channel: Channel,
    poll: PollPolicy,
) -> Result<u32> {
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        let status = regs.status(channel);
        if status.is_complete() {
            tracing::debug!("{channel} complete after {polls} polls: {status}");
            return Ok(polls);
        }
        if status.has_error() {
            tracing::error!("{channel} error: {status}");
            return Err(DmaError::ChannelFault { channel, status });
        }

        // `polls` failed polls came before this one; the budget is checked
        // before counting so it stays reachable at u32::MAX.
        let expired = poll.deadline.is_some_and(|d| started.elapsed() >= d);
        if polls >= poll.max_polls || expired {
            let polls = polls.saturating_add(1);
            tracing::warn!("{channel} timed out after {polls} polls: {status}");
            return Err(DmaError::SyncTimeout {
                channel,
                polls,
                status,
            });
        }
        polls += 1;

        if poll.interval.is_zero() {
            std::hint::spin_loop();
        } else {
            std::thread::sleep(poll.interval);
        }
    }
}

/// Decoded status of both channels at debug level
///
/// Skipped entirely (no register reads) unless debug logging is enabled.
fn log_status<M: crate::mmio::Mapping>(regs: &RegisterSpace<M>) {
    if tracing::enabled!(Level::DEBUG) {
        for channel in Channel::ALL {
            tracing::debug!("{channel} status: {}", regs.status(channel));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryLayout, DEFAULT_MAX_POLLS};
    use crate::sim::{Completion, SimProbe, SimulatedMemory};
    use axidma_chip::status::{DMA_SLV_ERR, ERR_IRQ, HALTED, IDLE, IOC_IRQ};

    fn config() -> DmaConfig {
        DmaConfig {
            layout: MemoryLayout {
                buffer_len: 16 * 1024,
                ..MemoryLayout::default()
            },
            poll: PollPolicy::default().with_max_polls(50),
        }
    }

    fn controller() -> (DmaController<SimulatedMemory>, SimProbe) {
        let config = config();
        let device = SimulatedMemory::open(&config.layout).unwrap();
        let probe = device.probe();
        (DmaController::with_device(device, &config).unwrap(), probe)
    }

    #[test]
    fn construction_resets_engine() {
        let (dma, probe) = controller();
        assert_eq!(dma.state(), TransferState::Ready);
        let writes = probe.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.value == control::RESET));
    }

    #[test]
    fn start_then_sync_reaches_synced() {
        let (mut dma, _probe) = controller();
        dma.start(64).unwrap();
        assert_eq!(dma.state(), TransferState::Running);
        dma.sync().unwrap();
        assert_eq!(dma.state(), TransferState::Synced);
        assert_eq!(dma.quick_poll().unwrap(), ChannelReadiness::Ready);
    }

    #[test]
    fn late_completion_within_budget_succeeds() {
        let (mut dma, probe) = controller();
        probe.set_completion(Channel::Mm2s, Completion::AfterPolls(10));
        probe.set_completion(Channel::S2mm, Completion::AfterPolls(10));
        dma.start(32).unwrap();
        dma.sync().unwrap();
    }

    #[test]
    fn budget_counts_every_failed_poll() {
        let (mut dma, probe) = controller();
        probe.set_completion(Channel::Mm2s, Completion::Never);
        dma.start(32).unwrap();

        let err = dma.sync().unwrap_err();
        assert!(matches!(
            err,
            DmaError::SyncTimeout {
                channel: Channel::Mm2s,
                polls: 51,
                ..
            }
        ));
        assert_eq!(probe.status_reads(Channel::Mm2s), 51);
        assert_eq!(probe.status_reads(Channel::S2mm), 0, "MM2S failure short-circuits");
        assert_eq!(dma.state(), TransferState::Failed);
    }

    #[test]
    fn success_window_is_max_polls_failures() {
        let (mut dma, probe) = controller();
        dma.set_poll_policy(PollPolicy::default());

        probe.set_completion(Channel::Mm2s, Completion::AfterPolls(DEFAULT_MAX_POLLS + 1));
        dma.start(32).unwrap();
        dma.sync().unwrap();
        assert_eq!(probe.status_reads(Channel::Mm2s), 2001);

        dma.reset().unwrap();
        probe.set_completion(Channel::Mm2s, Completion::AfterPolls(DEFAULT_MAX_POLLS + 2));
        dma.start(32).unwrap();
        let err = dma.sync().unwrap_err();
        assert!(matches!(
            err,
            DmaError::SyncTimeout {
                channel: Channel::Mm2s,
                polls: 2001,
                ..
            }
        ));
        assert_eq!(probe.status_reads(Channel::Mm2s), 2001 + 2001);
    }

    #[test]
    fn budget_at_u32_max_still_times_out() {
        let regs = {
            let layout = config().layout;
            let mut mem = SimulatedMemory::open(&layout).unwrap();
            let mapping = mem.map(layout.register_base, layout.register_len).unwrap();
            RegisterSpace::new(mapping).unwrap()
        };
        // MM2S is halted and never armed, so it never completes.
        let poll = PollPolicy::default()
            .with_max_polls(u32::MAX)
            .with_deadline(std::time::Duration::from_millis(2));
        assert!(matches!(
            wait_for(&regs, Channel::Mm2s, poll),
            Err(DmaError::SyncTimeout { .. })
        ));

        let poll = PollPolicy::default().with_max_polls(0);
        assert!(matches!(
            wait_for(&regs, Channel::Mm2s, poll),
            Err(DmaError::SyncTimeout { polls: 1, .. })
        ));
    }

    #[test]
    fn start_after_successful_sync() {
        let (mut dma, _probe) = controller();
        dma.start(16).unwrap();
        dma.sync().unwrap();
        assert_eq!(dma.state(), TransferState::Synced);

        dma.start(16).unwrap();
        assert_eq!(dma.state(), TransferState::Running);
        dma.sync().unwrap();
    }

    #[test]
    fn s2mm_timeout_reported_after_mm2s_completes() {
        let (mut dma, probe) = controller();
        probe.set_completion(Channel::S2mm, Completion::Never);
        dma.start(32).unwrap();

        let err = dma.sync().unwrap_err();
        assert!(matches!(
            err,
            DmaError::SyncTimeout {
                channel: Channel::S2mm,
                ..
            }
        ));
    }

    #[test]
    fn latched_error_ends_wait_early() {
        let (mut dma, probe) = controller();
        dma.start(32).unwrap();
        probe.set_status(Channel::Mm2s, DMA_SLV_ERR | ERR_IRQ | HALTED);

        let err = dma.sync().unwrap_err();
        assert!(matches!(
            err,
            DmaError::ChannelFault {
                channel: Channel::Mm2s,
                ..
            }
        ));
        assert_eq!(probe.status_reads(Channel::Mm2s), 1);
    }

    #[test]
    fn deadline_bounds_busy_wait() {
        let (mut dma, probe) = controller();
        probe.set_completion(Channel::Mm2s, Completion::Never);
        dma.set_poll_policy(
            PollPolicy::default()
                .with_max_polls(u32::MAX)
                .with_deadline(std::time::Duration::from_millis(5)),
        );
        dma.start(32).unwrap();
        assert!(matches!(dma.sync(), Err(DmaError::SyncTimeout { .. })));
    }

    #[test]
    fn sleeping_poll_still_terminates() {
        let (mut dma, probe) = controller();
        probe.set_completion(Channel::Mm2s, Completion::Never);
        dma.set_poll_policy(
            PollPolicy::default()
                .with_interval(std::time::Duration::from_micros(10))
                .with_max_polls(3),
        );
        dma.start(32).unwrap();
        assert!(dma.sync().is_err());
        assert_eq!(probe.status_reads(Channel::Mm2s), 4);
    }

    #[test]
    fn quick_poll_reads_once_per_channel() {
        let (dma, probe) = controller();
        probe.set_status(Channel::Mm2s, IDLE | IOC_IRQ);
        probe.set_status(Channel::S2mm, IDLE);
        assert_eq!(dma.quick_poll().unwrap(), ChannelReadiness::Busy);
        assert_eq!(probe.status_reads(Channel::Mm2s), 1);
        assert_eq!(probe.status_reads(Channel::S2mm), 1);
    }

    #[test]
    fn reset_after_failure_returns_to_ready() {
        let (mut dma, probe) = controller();
        probe.set_completion(Channel::Mm2s, Completion::Never);
        dma.start(32).unwrap();
        let _ = dma.sync();
        dma.reset().unwrap();
        assert_eq!(dma.state(), TransferState::Ready);
        assert!(dma.status(Channel::Mm2s).unwrap().is_halted());
    }

    #[test]
    fn operations_after_teardown_fail() {
        let (mut dma, probe) = controller();
        dma.teardown();
        dma.teardown();

        assert_eq!(dma.state(), TransferState::Uninitialized);
        assert!(matches!(dma.reset(), Err(DmaError::NotInitialized)));
        assert!(matches!(dma.start(16), Err(DmaError::NotInitialized)));
        assert!(matches!(dma.sync(), Err(DmaError::NotInitialized)));
        assert!(matches!(dma.quick_poll(), Err(DmaError::NotInitialized)));
        assert_eq!(dma.address_space().buffer_phys(), 0);
        assert!(probe.counts().is_balanced());
    }
}
