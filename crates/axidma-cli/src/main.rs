//! `axidma`: command-line interface for the AXI DMA / AES128 accelerator.
//!
//! ```text
//! USAGE:
//!   axidma transfer [--length N] [--start-byte B] [--rounds R]
//!                                    Fill source, start, sync, dump destination
//!   axidma status                    Decoded MM2S/S2MM status
//!   axidma reset                     Reset both channels
//!
//! GLOBAL:
//!   --device PATH  --reg-base ADDR  --buf-base ADDR
//!   --interval-us U  --max-polls P  --simulate
//! ```
//!
//! Defaults come from `AXIDMA_*` environment variables, then built-in values.
//! Logging goes to stderr; set `RUST_LOG=axidma_driver=debug` to trace the
//! register protocol.

use anyhow::{Context, Result};
use axidma_driver::mmio::PhysicalMemory;
use axidma_driver::sim::SimulatedMemory;
use axidma_driver::{
    config::parse_u64, format_hex_dump, Channel, DmaConfig, DmaController, PollPolicy,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "axidma", about = "AXI DMA / AES128 accelerator CLI", version)]
struct Cli {
    /// Physical-memory device (default /dev/mem).
    #[arg(long, global = true)]
    device: Option<PathBuf>,
    /// Physical base of the DMA register block (e.g. 0x40400000).
    #[arg(long, global = true, value_parser = parse_address)]
    reg_base: Option<u64>,
    /// Physical base of the reserved DMA buffer (e.g. 0x20000000).
    #[arg(long, global = true, value_parser = parse_address)]
    buf_base: Option<u64>,
    /// Sleep between status polls in microseconds; 0 busy-waits.
    #[arg(long, global = true)]
    interval_us: Option<u64>,
    /// Failed polls allowed per channel before sync gives up.
    #[arg(long, global = true)]
    max_polls: Option<u32>,
    /// Run against the built-in loopback simulator instead of hardware.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Fill the source half, run one transfer and dump the destination.
    Transfer {
        /// Bytes to transfer (at most half the buffer).
        #[arg(long, default_value_t = 96)]
        length: usize,
        /// Value of the first source byte; later bytes increment from it.
        #[arg(long, default_value_t = 0)]
        start_byte: u8,
        /// Number of back-to-back transfers.
        #[arg(long, default_value_t = 1)]
        rounds: u32,
    },
    /// Print the decoded status of both channels.
    Status,
    /// Reset both channels.
    Reset,
}

fn parse_address(value: &str) -> std::result::Result<u64, String> {
    parse_u64("address", value).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    if cli.simulate {
        let device = SimulatedMemory::open(&config.layout)?;
        let dma = DmaController::with_device(device, &config)
            .context("Failed to initialize simulated DMA")?;
        run(dma, &cli.command)
    } else {
        let dma = DmaController::open(&config).with_context(|| {
            format!(
                "Failed to initialize DMA through {} (root required)",
                config.layout.device_path.display()
            )
        })?;
        run(dma, &cli.command)
    }
}

fn build_config(cli: &Cli) -> Result<DmaConfig> {
    let mut config = DmaConfig::from_env().context("Invalid AXIDMA_* environment")?;

    if let Some(device) = &cli.device {
        config.layout.device_path.clone_from(device);
    }
    if let Some(base) = cli.reg_base {
        config.layout.register_base = base;
    }
    if let Some(base) = cli.buf_base {
        config.layout.buffer_base = base;
    }

    let mut poll: PollPolicy = config.poll;
    if let Some(us) = cli.interval_us {
        poll = poll.with_interval(Duration::from_micros(us));
    }
    if let Some(max) = cli.max_polls {
        poll = poll.with_max_polls(max);
    }
    config.poll = poll;

    config.layout.validate()?;
    Ok(config)
}

fn run<P: PhysicalMemory>(mut dma: DmaController<P>, command: &Cmd) -> Result<()> {
    match *command {
        Cmd::Transfer {
            length,
            start_byte,
            rounds,
        } => cmd_transfer(&mut dma, length, start_byte, rounds)?,
        Cmd::Status => cmd_status(&dma)?,
        Cmd::Reset => {
            dma.reset()?;
            println!("DMA reset issued");
        }
    }
    dma.teardown();
    Ok(())
}

fn cmd_transfer<P: PhysicalMemory>(
    dma: &mut DmaController<P>,
    length: usize,
    start_byte: u8,
    rounds: u32,
) -> Result<()> {
    let max = dma.max_transfer_len()?;
    anyhow::ensure!(
        length <= max,
        "Transfer length {length} exceeds the maximum of {max} bytes"
    );

    let source = &mut dma.buffer_mut()?.source_mut()[..length];
    for (byte, value) in source.iter_mut().zip((0..=u8::MAX).cycle().skip(start_byte.into())) {
        *byte = value;
    }
    println!("Plaintext:");
    eprint!("{}", format_hex_dump(&dma.buffer()?.source()[..length]));

    for round in 1..=rounds {
        let started = Instant::now();
        dma.start(length)?;
        dma.sync()
            .with_context(|| format!("Round {round}: transfer of {length} bytes did not finish"))?;
        println!(
            "Round {round}: {length} bytes in {:.1} µs",
            started.elapsed().as_secs_f64() * 1e6
        );
    }

    println!("Output:");
    eprint!("{}", format_hex_dump(&dma.buffer()?.destination()[..length]));
    Ok(())
}

fn cmd_status<P: PhysicalMemory>(dma: &DmaController<P>) -> Result<()> {
    for channel in Channel::ALL {
        let status = dma.status(channel)?;
        println!("{channel}: {:#010x}  {status}", status.bits());
        for flag in status.errors() {
            println!("  error: {}", flag.mnemonic());
        }
    }
    println!("Readiness: {:?}", dma.quick_poll()?);
    Ok(())
}
