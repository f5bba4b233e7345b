//! RNES CLI - run a ROM headless, or drive a conformance ROM to its verdict

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use rnes_core::{Config, Nes, NesError, RegionSetting};
use thiserror::Error;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// NES Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "rnes-cli")]
#[command(about = "Headless NES emulator runner", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of frames to run (frame limit in test mode)
    #[arg(short, long, default_value = "60")]
    frames: u32,

    /// Run a result-protocol test ROM; the exit status is its result code
    #[arg(short, long)]
    test_rom: bool,

    /// Console region
    #[arg(long, value_enum, default_value = "auto")]
    region: RegionArg,

    /// Reject unofficial opcodes
    #[arg(long)]
    strict: bool,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RegionArg {
    Auto,
    Ntsc,
    Pal,
}

impl From<RegionArg> for RegionSetting {
    fn from(arg: RegionArg) -> Self {
        match arg {
            RegionArg::Auto => RegionSetting::Auto,
            RegionArg::Ntsc => RegionSetting::Ntsc,
            RegionArg::Pal => RegionSetting::Pal,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Emulator(#[from] NesError),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("logging unavailable: {error}");
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, CliError> {
    let rom_data = fs::read(&args.rom).map_err(|source| CliError::Read {
        path: args.rom.clone(),
        source,
    })?;

    let config = Config {
        region: args.region.into(),
        strict_opcodes: args.strict,
        ..Config::default()
    };
    let mut nes = Nes::new(config);
    nes.load_cartridge(&rom_data)?;
    print_cartridge(&nes);

    let code = if args.test_rom {
        let outcome = nes.run_until_result(args.frames)?;
        if !outcome.message.is_empty() {
            println!("{}", outcome.message);
        }
        println!(
            "{} (code {}) after {} frames",
            if outcome.passed() { "Passed" } else { "Failed" },
            outcome.code,
            nes.frame_count()
        );
        ExitCode::from(outcome.code)
    } else {
        info!(frames = args.frames, "running");
        for _ in 0..args.frames {
            nes.run_frame()?;
        }
        println!("Completed {} frames.", nes.frame_count());
        ExitCode::SUCCESS
    };

    if args.dump_cpu {
        dump_cpu_state(&nes);
    }
    if args.dump_ppu {
        dump_ppu_state(&nes);
    }
    Ok(code)
}

fn print_cartridge(nes: &Nes) {
    let Some(header) = nes.cartridge_header() else {
        return;
    };
    println!("Loaded cartridge {}:", nes.cartridge_id().unwrap_or("?"));
    println!("  PRG ROM: {} bytes", header.prg_rom_bytes());
    println!("  CHR ROM: {} bytes", header.chr_rom_bytes());
    println!("  Mapper:  {}", header.mapper_number());
    println!("  Region:  {:?}", nes.region());
}

fn dump_cpu_state(nes: &Nes) {
    let cpu = nes.cpu();
    let regs = cpu.registers();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    ${:02X} ({:?})", regs.p.bits(), regs.p);
    println!("  Cycles: {}", cpu.cycles());
    if cpu.is_jammed() {
        println!("  (jammed)");
    }
}

fn dump_ppu_state(nes: &Nes) {
    let video = nes.bus().video();

    println!("\nPPU State:");
    println!("  Frame:    {}", video.frame_number());
    println!("  Scanline: {}", video.scanline());
    println!("  Dot:      {}", video.dot());
    println!("  NMI line: {}", video.nmi_line());
}
