use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cas_rs::asm::DEFAULT_ORIGIN;
use cas_tools::diag;
use cas_tools::model::{disassemble, LabelKV};

fn addr(s: &str) -> Result<u32, String> {
    cas_rs::num::parse_u32(s).ok_or_else(|| format!("not an address: {s}"))
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Two-pass cas32 assembler")]
struct Opts {
    /// Input assembly file
    #[arg(value_name = "FILE")]
    input: PathBuf,
    /// Output flat binary
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Address of the first byte
    #[arg(long, value_parser = addr, default_value_t = DEFAULT_ORIGIN)]
    origin: u32,
    /// Write the symbol table as JSON (Vec<{ addr, name }>)
    #[arg(long, value_name = "FILE")]
    symbols: Option<PathBuf>,
    /// Print an address/bytes/instruction listing
    #[arg(long)]
    listing: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let file = opts.input.display().to_string();
    let src = std::fs::read_to_string(&opts.input).with_context(|| format!("reading {file}"))?;
    let img = match cas_rs::assemble_at(&src, opts.origin) {
        Ok(img) => img,
        Err(e) => {
            eprint!("{}", diag::render(&file, &src, e.line, 1, &e.kind.to_string()));
            std::process::exit(1);
        }
    };

    let output = opts.output.clone().unwrap_or_else(|| opts.input.with_extension("bin"));
    std::fs::write(&output, &img.bytes).with_context(|| format!("writing {}", output.display()))?;

    if let Some(path) = &opts.symbols {
        let kvs: Vec<LabelKV> = img.symbols.iter().map(|(name, &addr)| LabelKV { addr, name: name.clone() }).collect();
        std::fs::write(path, serde_json::to_string_pretty(&kvs)?)?;
    }

    if opts.listing {
        let labels = img.symbols.iter().map(|(n, &a)| (a, n.clone())).collect();
        let mut buf = String::new();
        for l in disassemble(&img, img.origin, img.end(), &labels) {
            if let Some(name) = &l.label {
                let _ = writeln!(buf, "{name}:");
            }
            let _ = writeln!(buf, "  {:#06x}  {:08x}  {}", l.addr, l.raw, l.text);
        }
        print!("{buf}");
    }
    eprintln!("{} bytes at {:#x} -> {}", img.bytes.len(), img.origin, output.display());
    Ok(())
}
