//! Driver binary for the l2c-recover symbolic execution engine: loads an
//! NSO/NRO image, relocates its imports, optionally fabricates a synthetic
//! `L2CAgent` dispatch object, and drives `ClusterManager` entry-point analysis.

mod fabricate;

use std::fs;
use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use l2c_recover_core::cluster::ClusterManager;
use l2c_recover_core::cpu::{EmulatorAdapter, StubAdapter, NRO_BASE};
use l2c_recover_core::elf;
use l2c_recover_core::heap::AuxHeap;
use l2c_recover_core::imports::{demangle, ImportTable};

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a binary, relocate its imports, and run entry-point analysis.
    Analyze {
        /// Path to the NSO/NRO-style image to analyze.
        binary: PathBuf,

        /// Additional entry-point offsets within the loaded image, beyond the
        /// header's own `start` offset.
        #[clap(long = "entry", value_parser = parse_hex_u64)]
        entries: Vec<u64>,

        /// Fabricate a synthetic status_script-style `L2CAgent` dispatch object,
        /// pass it as the entry-point's first argument, and follow the
        /// virtual-method-9 slot the agent returns as a second entry-point.
        #[clap(long)]
        fabricate_agent: bool,

        /// Run interpreters in direct-evaluation mode instead of forking on
        /// unresolved comparisons.
        #[clap(long)]
        basic_emu: bool,
    },

    /// Demangle a single Itanium-mangled symbol name.
    Demangle { symbol: String },
}

fn parse_hex_u64(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze { binary, entries, fabricate_agent, basic_emu } => {
            run_analyze(&binary, &entries, fabricate_agent, basic_emu)
        }
        Command::Demangle { symbol } => {
            println!("{}", demangle(&symbol));
            Ok(())
        }
    }
}

/// Maps a freshly loaded image into a `StubAdapter`'s memory at `NRO_BASE`.
/// `StubAdapter` never decodes instructions, so this only carries the bytes an
/// import interpreter might read through a pointer (the agent's own fields,
/// vtable slots, L2CValue payloads); no real instruction stream is executed.
fn map_image<A: EmulatorAdapter>(emu: &mut A, image: &[u8]) -> Result<()> {
    emu.write_mem(NRO_BASE, image).context("mapping image into adapter memory")
}

fn run_analyze(binary: &PathBuf, entries: &[u64], fabricate_agent: bool, basic_emu: bool) -> Result<()> {
    let mut image = fs::read(binary).with_context(|| format!("reading {}", binary.display()))?;
    let mut imports = ImportTable::new();
    let start = elf::load(&mut image, &mut imports).context("loading NSO/NRO image")?;
    log::info!(
        "loaded {}: {} relocated imports, header entry {:#x}",
        binary.display(),
        imports.len(),
        start
    );

    let mut mgr: ClusterManager<StubAdapter> = ClusterManager::new(imports);

    if fabricate_agent {
        let mut fab_heap = AuxHeap::new(fabricate::FABRICATE_BASE, fabricate::FABRICATE_SIZE);
        let mut emu = StubAdapter::new(Vec::new());
        map_image(&mut emu, &image)?;
        let agent_ptr = fabricate::fabricate_agent(&mut emu, &mut fab_heap, mgr.imports_mut(), 0)?;

        let mut args = [0u64; 8];
        args[0] = agent_ptr;
        let summary = mgr
            .run_entry(NRO_BASE + start as u64, emu.clone(), basic_emu, args)
            .context("analyzing the fabricated agent's status_script entry-point")?;
        log_summary(start as u64, &summary);

        let redispatch = fabricate::redispatch_virtual_method_9(&emu, agent_ptr)
            .context("reading the virtual-method-9 redispatch target")?;
        log::info!("redispatching through virtual method 9 at {redispatch:#x}");
        let mut redispatch_args = [0u64; 8];
        redispatch_args[0] = agent_ptr;
        let redispatch_summary = mgr
            .run_entry(redispatch, emu, basic_emu, redispatch_args)
            .context("analyzing the virtual-method-9 redispatch entry-point")?;
        log_summary(redispatch, &redispatch_summary);
    } else {
        let mut all_entries = vec![start as u64];
        all_entries.extend_from_slice(entries);

        for entry in all_entries {
            let mut emu = StubAdapter::new(Vec::new());
            map_image(&mut emu, &image)?;
            let summary = mgr
                .run_entry(NRO_BASE + entry, emu, basic_emu, [0; 8])
                .with_context(|| format!("analyzing entry-point {entry:#x}"))?;
            log_summary(entry, &summary);
            mgr.reset_entry_point();
        }
    }

    Ok(())
}

fn log_summary(entry: u64, summary: &l2c_recover_core::cluster::EntrySummary) {
    log::info!(
        "entry {entry:#x}: {} blocks, {} tokens, {} instances spawned",
        summary.blocks,
        summary.tokens,
        summary.instances_spawned
    );
}
