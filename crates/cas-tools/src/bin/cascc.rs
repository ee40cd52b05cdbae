use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cas_rs::cc::{compile_with, CompileError, CompilerConfig};
use cas_rs::{CpuConfig, Emulator};
use cas_tools::diag;

#[derive(Parser, Debug)]
#[command(author, version, about = "cas++ compiler")]
struct Opts {
    /// Input cas++ source
    #[arg(value_name = "FILE")]
    input: PathBuf,
    /// Output flat binary
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print the generated assembly
    #[arg(long)]
    emit_asm: bool,
    /// Run the program after compiling and exit with its code
    #[arg(long)]
    run: bool,
    /// JSON file with a `CompilerConfig`
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Override the variable register budget
    #[arg(long)]
    budget: Option<usize>,
}

fn report(file: &str, src: &str, err: &CompileError) -> String {
    match err {
        CompileError::Syntax(e) => {
            let p = e.pos();
            // the error text already leads with the position
            let msg = e.to_string();
            let msg = msg.split_once(": ").map_or(msg.as_str(), |(_, m)| m);
            diag::render(file, src, p.line, p.col, msg)
        }
        CompileError::Codegen(e) => match e.pos() {
            Some(p) => {
                let msg = e.to_string();
                let msg = msg.split_once(": ").map_or(msg.as_str(), |(_, m)| m);
                diag::render(file, src, p.line, p.col, msg)
            }
            None => format!("{file}: {e}\n"),
        },
        CompileError::Assemble(e) => format!("{file}: internal error, generated assembly rejected: {e}\n"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let file = opts.input.display().to_string();
    let src = std::fs::read_to_string(&opts.input).with_context(|| format!("reading {file}"))?;
    let mut cfg = match &opts.config {
        Some(path) => serde_json::from_str::<CompilerConfig>(&std::fs::read_to_string(path)?)
            .with_context(|| format!("parsing {}", path.display()))?,
        None => CompilerConfig::default(),
    };
    if let Some(b) = opts.budget {
        cfg.register_budget = b;
    }

    let compiled = match compile_with(&src, &cfg) {
        Ok(c) => c,
        Err(e) => {
            eprint!("{}", report(&file, &src, &e));
            std::process::exit(1);
        }
    };
    if opts.emit_asm {
        print!("{}", compiled.asm);
    }
    if let Some(out) = &opts.output {
        std::fs::write(out, &compiled.image.bytes).with_context(|| format!("writing {}", out.display()))?;
    }
    if opts.run {
        let mut emu = Emulator::new(CpuConfig::default());
        emu.load_image(&compiled.image)?;
        match emu.run() {
            Ok(exit) => std::process::exit(exit.code),
            Err(trap) => {
                eprintln!("TRAP: {trap}");
                eprint!("{}", emu.dump_regs());
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_point_at_the_token() {
        let src = "int main() {\n  return 1\n}\n";
        let err = compile_with(src, &CompilerConfig::default()).unwrap_err();
        let text = report("t.cas", src, &err);
        assert!(text.starts_with("t.cas:3:1: expected `;`"), "{text}");
        assert!(text.contains("3 | }"));
    }
}
