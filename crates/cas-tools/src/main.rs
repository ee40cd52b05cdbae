use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cas_rs::Image;
use cas_tools::model::{disassemble, extent, load_bin, LabelKV};

#[derive(Parser, Debug)]
#[command(author, version, about = "cas32 disassembler", long_about = None)]
struct Cli {
    /// Load address for the binary
    #[arg(long, value_parser = parse_u32, default_value = "0x1000")]
    base: u32,
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    /// Input binary path
    #[arg(value_name = "BINFILE")]
    input: String,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show where the binary is loaded
    Sections,
    /// Disassemble a range [start, end); defaults to the whole image
    Range {
        #[arg(value_parser = parse_u32)]
        start: Option<u32>,
        #[arg(value_parser = parse_u32)]
        end: Option<u32>,
        /// Show instruction bytes
        #[arg(long)]
        show_bytes: bool,
        /// Label addresses from a JSON symbol file (Vec<{ addr, name }>)
        #[arg(long, value_name = "FILE")]
        symbols: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write output to file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_u32(s: &str) -> Result<u32> {
    cas_rs::num::parse_u32(s.trim()).with_context(|| format!("not a 32-bit address: `{s}`"))
}

fn read_symbols(path: &str) -> Result<BTreeMap<u32, String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let kvs: Vec<LabelKV> = serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?;
    Ok(kvs.into_iter().map(|kv| (kv.addr, kv.name)).collect())
}

fn section_table(img: &Image) -> String {
    let (start, end) = extent(img);
    format!("{:<10} {:<10} {:<10}\n{:<10} {start:#010x} {end:#010x}\n", "name", "start", "end", "image")
}

/// Default sweep end: the image end, clamped to the top of memory.
fn sweep_end(img: &Image) -> u32 {
    let (start, end) = extent(img);
    if end < start && !img.bytes.is_empty() { u32::MAX } else { end }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let img = load_bin(Path::new(&cli.input), cli.base, cli.skip, cli.len)?;

    match cli.cmd {
        Command::Sections => print!("{}", section_table(&img)),
        Command::Range { start, end, show_bytes, symbols, format, out } => {
            let start = start.unwrap_or(img.origin);
            let end = end.unwrap_or_else(|| sweep_end(&img));
            anyhow::ensure!(end >= start, "end must be >= start");
            let labels = match &symbols {
                Some(path) => read_symbols(path)?,
                None => BTreeMap::new(),
            };
            let lines = disassemble(&img, start, end, &labels);
            let buf = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&lines)?,
                OutputFormat::Text => {
                    let mut buf = String::new();
                    for l in &lines {
                        if let Some(name) = &l.label {
                            let _ = writeln!(buf, "{:#010x} <{name}>:", l.addr);
                        }
                        if show_bytes {
                            let b = l.raw.to_le_bytes();
                            let _ = writeln!(
                                buf,
                                "  {:#010x}: {:02x} {:02x} {:02x} {:02x}   {}",
                                l.addr, b[0], b[1], b[2], b[3], l.text
                            );
                        } else {
                            let _ = writeln!(buf, "  {:#010x}: {}", l.addr, l.text);
                        }
                    }
                    buf
                }
            };
            if let Some(path) = out {
                std::fs::write(path, buf)?;
            } else {
                print!("{buf}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u32_hex_and_dec() {
        assert_eq!(parse_u32("0x10").unwrap(), 0x10);
        assert_eq!(parse_u32("16").unwrap(), 16);
        assert!(parse_u32("zz").is_err());
    }

    #[test]
    fn images_at_the_top_of_memory_do_not_overflow() {
        let img = Image { origin: 0xFFFF_FFF0, bytes: vec![0; 32], symbols: BTreeMap::new() };
        let table = section_table(&img);
        assert!(table.contains("0xfffffff0 0x00000010"), "{table}");
        assert_eq!(sweep_end(&img), u32::MAX);

        let img = Image { origin: 0x1000, bytes: vec![0; 8], symbols: BTreeMap::new() };
        assert_eq!(sweep_end(&img), 0x1008);
    }

    #[test]
    fn symbol_file_round_trip() {
        let path = std::env::temp_dir().join("_casdis_symbols.json");
        let kvs = vec![LabelKV { addr: 0x1000, name: "main".into() }];
        std::fs::write(&path, serde_json::to_string(&kvs).unwrap()).unwrap();
        let map = read_symbols(path.to_str().unwrap()).unwrap();
        assert_eq!(map.get(&0x1000).map(String::as_str), Some("main"));
        let _ = std::fs::remove_file(&path);
    }
}
