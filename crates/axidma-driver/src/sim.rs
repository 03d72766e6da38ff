//! Simulated DMA engine (no hardware required)
//!
//! [`SimulatedMemory`] implements [`PhysicalMemory`] over heap allocations and
//! emulates the AXI DMA register block in front of an AXIS loopback: whatever
//! MM2S reads from the source half, S2MM writes to the destination half. This
//! enables:
//!
//! 1. **CI without hardware**: the full init → start → sync → teardown flow runs
//!    against the same driver code that drives the FPGA.
//! 2. **Protocol checks**: every register write is logged, so tests can assert
//!    the exact programming order.
//! 3. **Fault injection**: mapping failures, channels that never complete or
//!    complete late, and raw status overrides.
//!
//! ## Engine model
//!
//! ```text
//! DMACR write   RESET  → both channels halted, disarmed, control cleared
//!               RUN    → Halted cleared; Idle set while nothing is armed
//!               HALT   → Halted set, channel disarmed
//! DMASR write   write-1-to-clear for IOC_Irq / Dly_Irq / Err_Irq
//! LENGTH write  non-zero on a running channel → armed (Idle and IOC cleared)
//! DMASR read    counts a poll; an armed channel completes per its Completion
//! ```
//!
//! MM2S completes by pushing `(address, length)` into the stream. S2MM can only
//! complete once data is in the stream; on completion it copies
//! `min(S2MM length, MM2S length)` bytes. Addresses outside the buffer latch
//! `DMADecErr`, as the interconnect would.

use crate::config::MemoryLayout;
use crate::error::{DmaError, Result};
use crate::mmio::{read_word, write_word, Mapping, PhysicalMemory};
use axidma_chip::regs::control;
use axidma_chip::status::{DMA_DEC_ERR, DLY_IRQ, ERR_IRQ, HALTED, IDLE, IOC_IRQ};
use axidma_chip::{Channel, ChannelRegister, StatusFlags};
use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const REGISTERS: [ChannelRegister; 4] = [
    ChannelRegister::Control,
    ChannelRegister::Status,
    ChannelRegister::Address,
    ChannelRegister::Length,
];

/// When an armed channel reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// As soon as it can (S2MM still waits for MM2S data)
    Immediate,
    /// After this many status reads while armed
    AfterPolls(u32),
    /// Never; the channel stays busy
    Never,
}

/// Which mapping the simulated device refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapFailure {
    /// Refuse the reserved buffer mapping
    Buffer,
    /// Refuse the register block mapping
    Registers,
}

/// One logged register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Byte offset within the register block
    pub offset: usize,
    /// Value written
    pub value: u32,
}

impl RegisterWrite {
    /// Write of `value` to `reg` of `channel`
    pub const fn new(channel: Channel, reg: ChannelRegister, value: u32) -> Self {
        Self {
            offset: channel.offset(reg),
            value,
        }
    }
}

/// Snapshot of device handle and mapping lifetimes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    /// Devices opened
    pub opens: usize,
    /// Devices closed
    pub closes: usize,
    /// Successful mappings
    pub maps: usize,
    /// Mappings released
    pub unmaps: usize,
}

impl ResourceCounts {
    /// Nothing left open or mapped
    pub const fn is_balanced(&self) -> bool {
        self.opens == self.closes && self.maps == self.unmaps
    }
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ResourceCounts {
        ResourceCounts {
            opens: self.opens.load(Ordering::SeqCst),
            closes: self.closes.load(Ordering::SeqCst),
            maps: self.maps.load(Ordering::SeqCst),
            unmaps: self.unmaps.load(Ordering::SeqCst),
        }
    }
}

/// Zeroed, page-aligned heap memory standing in for physical memory
struct Backing {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Backing {
    fn zeroed(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), axidma_chip::layout::PAGE_SIZE)
            .map_err(|e| {
                DmaError::invalid_config(format!("simulated region of {len} bytes: {e}"))
            })?;
        // SAFETY: layout has non-zero size and a power-of-two alignment;
        // dealloc in Drop uses the same layout.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            DmaError::invalid_config(format!("cannot allocate simulated region of {len} bytes"))
        })?;
        Ok(Self { ptr, layout })
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backing")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        // SAFETY: ptr came from alloc_zeroed with exactly this layout.
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: Backing owns its allocation; all access is through raw pointers whose
// use is serialized by the engine mutex or by &mut on the owning mapping.
unsafe impl Send for Backing {}
// SAFETY: see Send; Backing itself exposes no interior access.
unsafe impl Sync for Backing {}

#[derive(Debug)]
struct ChannelModel {
    completion: Completion,
    armed: bool,
    polls_while_armed: u32,
    status_reads: usize,
}

impl ChannelModel {
    const fn new() -> Self {
        Self {
            completion: Completion::Immediate,
            armed: false,
            polls_while_armed: 0,
            status_reads: 0,
        }
    }

    const fn ready(&self) -> bool {
        match self.completion {
            Completion::Immediate => true,
            Completion::AfterPolls(n) => self.polls_while_armed >= n,
            Completion::Never => false,
        }
    }
}

const fn index(channel: Channel) -> usize {
    match channel {
        Channel::Mm2s => 0,
        Channel::S2mm => 1,
    }
}

#[derive(Debug)]
struct Engine {
    registers: Arc<Backing>,
    buffer: Arc<Backing>,
    buffer_phys: u64,
    channels: [ChannelModel; 2],
    /// Data MM2S has pushed into the stream: (source address, length)
    stream: Option<(u32, u32)>,
    writes: Vec<RegisterWrite>,
}

impl Engine {
    fn word(&self, offset: usize) -> u32 {
        // SAFETY: the register backing is page aligned and outlives the engine.
        unsafe { read_word(self.registers.ptr, self.registers.len(), offset) }
    }

    fn set_word(&mut self, offset: usize, value: u32) {
        // SAFETY: as in word(); the engine mutex serializes access.
        unsafe { write_word(self.registers.ptr, self.registers.len(), offset, value) }
    }

    fn reg(&self, channel: Channel, reg: ChannelRegister) -> u32 {
        self.word(channel.offset(reg))
    }

    fn status(&self, channel: Channel) -> u32 {
        self.reg(channel, ChannelRegister::Status)
    }

    fn set_status(&mut self, channel: Channel, value: u32) {
        self.set_word(channel.offset(ChannelRegister::Status), value);
    }

    fn model(&mut self, channel: Channel) -> &mut ChannelModel {
        &mut self.channels[index(channel)]
    }

    fn decode_offset(offset: usize) -> Option<(Channel, ChannelRegister)> {
        Channel::ALL.into_iter().find_map(|channel| {
            REGISTERS
                .into_iter()
                .find(|reg| channel.offset(*reg) == offset)
                .map(|reg| (channel, reg))
        })
    }

    fn power_on(&mut self) {
        for channel in Channel::ALL {
            self.set_status(channel, HALTED);
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.writes.push(RegisterWrite { offset, value });

        let Some((channel, reg)) = Self::decode_offset(offset) else {
            self.set_word(offset, value);
            return;
        };

        match reg {
            ChannelRegister::Control => self.write_control(channel, value),
            ChannelRegister::Status => {
                let w1c = value & (IOC_IRQ | DLY_IRQ | ERR_IRQ);
                let status = self.status(channel) & !w1c;
                self.set_status(channel, status);
            }
            ChannelRegister::Address => self.set_word(offset, value),
            ChannelRegister::Length => {
                self.set_word(offset, value);
                let status = self.status(channel);
                if value != 0 && status & HALTED == 0 {
                    let model = self.model(channel);
                    model.armed = true;
                    model.polls_while_armed = 0;
                    self.set_status(channel, status & !(IDLE | IOC_IRQ));
                }
            }
        }

        self.settle();
    }

    fn write_control(&mut self, channel: Channel, value: u32) {
        if value & control::RESET != 0 {
            for ch in Channel::ALL {
                self.set_word(ch.offset(ChannelRegister::Control), 0);
                self.set_status(ch, HALTED);
                self.model(ch).armed = false;
            }
            self.stream = None;
            return;
        }

        self.set_word(channel.offset(ChannelRegister::Control), value);
        let status = self.status(channel);
        if value & control::RUN != 0 {
            let idle = if self.channels[index(channel)].armed { 0 } else { IDLE };
            self.set_status(channel, (status & !HALTED) | idle);
        } else {
            self.set_status(channel, status | HALTED);
            self.model(channel).armed = false;
        }
    }

    fn read(&mut self, offset: usize) -> u32 {
        if let Some((channel, ChannelRegister::Status)) = Self::decode_offset(offset) {
            let model = self.model(channel);
            model.status_reads += 1;
            if model.armed {
                model.polls_while_armed = model.polls_while_armed.saturating_add(1);
            }
            self.settle();
        }
        self.word(offset)
    }

    /// Range inside the buffer backing for a physical address, if fully contained
    fn translate(&self, addr: u32, len: u32) -> Option<usize> {
        let offset = u64::from(addr).checked_sub(self.buffer_phys)?;
        let end = offset.checked_add(u64::from(len))?;
        (end <= self.buffer.len() as u64).then_some(offset as usize)
    }

    fn fault(&mut self, channel: Channel) {
        let status = self.status(channel);
        self.set_status(channel, status | DMA_DEC_ERR | ERR_IRQ | HALTED);
        self.model(channel).armed = false;
    }

    fn settle(&mut self) {
        let mm2s = &self.channels[index(Channel::Mm2s)];
        if mm2s.armed && mm2s.ready() {
            let addr = self.reg(Channel::Mm2s, ChannelRegister::Address);
            let len = self.reg(Channel::Mm2s, ChannelRegister::Length);
            if self.translate(addr, len).is_some() {
                self.model(Channel::Mm2s).armed = false;
                self.stream = Some((addr, len));
                let status = self.status(Channel::Mm2s);
                self.set_status(Channel::Mm2s, status | IDLE | IOC_IRQ);
            } else {
                self.fault(Channel::Mm2s);
            }
        }

        let s2mm = &self.channels[index(Channel::S2mm)];
        if s2mm.armed && s2mm.ready() {
            let Some((src, sent)) = self.stream else {
                return;
            };
            let dst = self.reg(Channel::S2mm, ChannelRegister::Address);
            let len = self.reg(Channel::S2mm, ChannelRegister::Length).min(sent);
            match (self.translate(src, len), self.translate(dst, len)) {
                (Some(from), Some(to)) => {
                    // SAFETY: both ranges lie inside the buffer backing (translate);
                    // ptr::copy tolerates overlap. No Rust reference to the buffer is
                    // live while the controller holds &mut for start/sync.
                    unsafe {
                        let base = self.buffer.ptr.as_ptr();
                        std::ptr::copy(base.add(from), base.add(to), len as usize);
                    }
                    self.stream = None;
                    self.model(Channel::S2mm).armed = false;
                    let status = self.status(Channel::S2mm);
                    self.set_status(Channel::S2mm, status | IDLE | IOC_IRQ);
                }
                _ => self.fault(Channel::S2mm),
            }
        }
    }
}

fn lock(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated physical-memory device
///
/// Creating one counts as opening the device; dropping it closes it.
#[derive(Debug)]
pub struct SimulatedMemory {
    layout: MemoryLayout,
    engine: Arc<Mutex<Engine>>,
    counters: Arc<Counters>,
    failure: Option<MapFailure>,
}

impl SimulatedMemory {
    /// Open a simulated device laid out like `layout`
    ///
    /// # Errors
    ///
    /// Returns an error if the backing memory cannot be allocated.
    pub fn open(layout: &MemoryLayout) -> Result<Self> {
        let registers = Arc::new(Backing::zeroed(layout.register_len)?);
        let buffer = Arc::new(Backing::zeroed(layout.buffer_len)?);

        let mut engine = Engine {
            registers,
            buffer,
            buffer_phys: layout.buffer_base,
            channels: [ChannelModel::new(), ChannelModel::new()],
            stream: None,
            writes: Vec::new(),
        };
        engine.power_on();

        let counters = Arc::new(Counters::default());
        counters.opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Opened simulated DMA device ({layout:?})");

        Ok(Self {
            layout: layout.clone(),
            engine: Arc::new(Mutex::new(engine)),
            counters,
            failure: None,
        })
    }

    /// Refuse one of the two mappings
    #[must_use]
    pub fn fail_mapping(mut self, which: MapFailure) -> Self {
        self.failure = Some(which);
        self
    }

    /// Handle for inspecting and steering the engine after the device is moved
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            engine: Arc::clone(&self.engine),
            counters: Arc::clone(&self.counters),
        }
    }

    fn refuse(&self, what: &str, phys_addr: u64) -> DmaError {
        DmaError::from(std::io::Error::other(format!(
            "simulated mmap of {what} at {phys_addr:#x} refused"
        )))
    }
}

impl Drop for SimulatedMemory {
    fn drop(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Closed simulated DMA device");
    }
}

impl PhysicalMemory for SimulatedMemory {
    type Mapping = SimMapping;

    fn map(&mut self, phys_addr: u64, len: usize) -> Result<SimMapping> {
        let engine = lock(&self.engine);
        let region = if phys_addr == self.layout.buffer_base && len <= engine.buffer.len() {
            if self.failure == Some(MapFailure::Buffer) {
                return Err(self.refuse("buffer", phys_addr));
            }
            Region::Buffer(Arc::clone(&engine.buffer))
        } else if phys_addr == self.layout.register_base && len <= engine.registers.len() {
            if self.failure == Some(MapFailure::Registers) {
                return Err(self.refuse("registers", phys_addr));
            }
            Region::Registers {
                engine: Arc::clone(&self.engine),
                backing: Arc::clone(&engine.registers),
            }
        } else {
            return Err(DmaError::from(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("nothing simulated at {phys_addr:#x}+{len:#x}"),
            )));
        };
        drop(engine);

        self.counters.maps.fetch_add(1, Ordering::SeqCst);
        Ok(SimMapping {
            region,
            len,
            counters: Arc::clone(&self.counters),
        })
    }
}

#[derive(Debug)]
enum Region {
    Buffer(Arc<Backing>),
    Registers {
        engine: Arc<Mutex<Engine>>,
        backing: Arc<Backing>,
    },
}

/// Mapping handed out by [`SimulatedMemory`]
#[derive(Debug)]
pub struct SimMapping {
    region: Region,
    len: usize,
    counters: Arc<Counters>,
}

// SAFETY: the backing is page aligned, at least len bytes (checked in map) and
// kept alive by the Arc for as long as the mapping exists.
unsafe impl Mapping for SimMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        match &self.region {
            Region::Buffer(backing) | Region::Registers { backing, .. } => backing.ptr,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: usize) -> u32 {
        match &self.region {
            // SAFETY: Mapping contract above.
            Region::Buffer(backing) => unsafe { read_word(backing.ptr, self.len, offset) },
            Region::Registers { engine, .. } => {
                assert!(offset + 4 <= self.len, "Register offset {offset:#x} out of bounds");
                lock(engine).read(offset)
            }
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        match &self.region {
            // SAFETY: Mapping contract above; &mut self is exclusive.
            Region::Buffer(backing) => unsafe { write_word(backing.ptr, self.len, offset, value) },
            Region::Registers { engine, .. } => {
                assert!(offset + 4 <= self.len, "Register offset {offset:#x} out of bounds");
                lock(engine).write(offset, value);
            }
        }
    }
}

impl Drop for SimMapping {
    fn drop(&mut self) {
        self.counters.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Inspection and fault-injection handle for a [`SimulatedMemory`]
#[derive(Debug, Clone)]
pub struct SimProbe {
    engine: Arc<Mutex<Engine>>,
    counters: Arc<Counters>,
}

impl SimProbe {
    /// Every register write so far, in order
    pub fn writes(&self) -> Vec<RegisterWrite> {
        lock(&self.engine).writes.clone()
    }

    /// Forget logged writes
    pub fn clear_writes(&self) {
        lock(&self.engine).writes.clear();
    }

    /// Choose when `channel` completes once armed
    pub fn set_completion(&self, channel: Channel, completion: Completion) {
        let mut engine = lock(&self.engine);
        engine.model(channel).completion = completion;
        engine.settle();
    }

    /// Force a raw status value; the channel is disarmed so it stays as set
    pub fn set_status(&self, channel: Channel, bits: u32) {
        let mut engine = lock(&self.engine);
        engine.model(channel).armed = false;
        engine.set_status(channel, bits);
    }

    /// Current status without counting a poll
    pub fn status(&self, channel: Channel) -> StatusFlags {
        StatusFlags::from_bits(lock(&self.engine).status(channel))
    }

    /// Status register reads issued by the driver
    pub fn status_reads(&self, channel: Channel) -> usize {
        lock(&self.engine).channels[index(channel)].status_reads
    }

    /// Device open/close and map/unmap counts
    pub fn counts(&self) -> ResourceCounts {
        self.counters.snapshot()
    }
}
