use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cas_rs::asm::DEFAULT_ORIGIN;
use cas_rs::num::parse_u32;
use cas_rs::{CpuConfig, Emulator};

fn addr(s: &str) -> Result<u32, String> {
    parse_u32(s).ok_or_else(|| format!("not an address: {s}"))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a flat cas32 binary on the emulator")]
struct Opts {
    /// Load address, also the entry point
    #[arg(short, long, value_parser = addr, default_value_t = DEFAULT_ORIGIN)]
    origin: u32,
    /// JSON file with a `CpuConfig`
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Override the step limit; 0 disables it
    #[arg(long)]
    max_steps: Option<u64>,
    /// Print the final machine state as JSON
    #[arg(long)]
    json: bool,
    /// Print a register dump when the program ends
    #[arg(long)]
    regs: bool,
    /// Hex dump `ADDR:LEN` after the run
    #[arg(long, value_name = "ADDR:LEN")]
    dump: Option<String>,
    #[arg(value_name = "BINFILE")]
    input: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let mut cfg = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<CpuConfig>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => CpuConfig::default(),
    };
    if let Some(n) = opts.max_steps {
        cfg.max_steps = (n > 0).then_some(n);
    }
    let dump = match &opts.dump {
        Some(spec) => {
            let (a, l) = spec.split_once(':').context("--dump expects ADDR:LEN")?;
            let a = parse_u32(a).with_context(|| format!("bad address `{a}`"))?;
            let l = parse_u32(l).with_context(|| format!("bad length `{l}`"))?;
            Some((a, l))
        }
        None => None,
    };

    let bytes = std::fs::read(&opts.input).with_context(|| format!("reading {}", opts.input.display()))?;
    let mut emu = Emulator::new(cfg);
    emu.load(&bytes, opts.origin)?;

    let exit = match emu.run() {
        Ok(exit) => exit,
        Err(trap) => {
            eprintln!("TRAP: {trap}");
            eprint!("{}", emu.dump_regs());
            std::process::exit(1);
        }
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&exit)?);
    }
    if opts.regs {
        print!("{}", emu.dump_regs());
    }
    if let Some((a, l)) = dump {
        print!("{}", emu.dump_mem(a, l)?);
    }
    std::process::exit(exit.code);
}
