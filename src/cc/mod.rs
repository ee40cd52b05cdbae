//! cas++: a small C-like language compiled to cas32 assembly.
//!
//! [`compile`] runs the whole chain: tokenize, parse, generate, then hand the item stream
//! to the assembler. The rendered assembly is returned alongside the image so it can be
//! inspected or reassembled by hand.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;

use tracing::debug;

use crate::asm::{self, AssembleError, Image};

pub use codegen::{generate, CodegenError, CompilerConfig, Ty, MAX_REGISTER_BUDGET};
pub use lexer::{Pos, SyntaxError};
pub use parser::parse;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("syntax error at {0}")]
    Syntax(#[from] SyntaxError),
    #[error("codegen error at {0}")]
    Codegen(#[from] CodegenError),
    #[error("generated assembly failed to assemble: {0}")]
    Assemble(#[from] AssembleError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    pub image: Image,
    /// Assembly text; line numbers in an `Assemble` error refer to it.
    pub asm: String,
}

pub fn compile(src: &str) -> Result<Compiled, CompileError> {
    compile_with(src, &CompilerConfig::default())
}

pub fn compile_with(src: &str, cfg: &CompilerConfig) -> Result<Compiled, CompileError> {
    let unit = parse(src)?;
    let items = generate(&unit, cfg)?;
    let asm = asm::render(&items);
    let image = asm::assemble_items(&asm::number(items), cfg.origin)?;
    if cfg.origin < cfg.data_base && image.end() > cfg.data_base {
        return Err(CodegenError::CodeOverlapsData { code_end: image.end(), data_base: cfg.data_base }.into());
    }
    debug!(bytes = image.bytes.len(), symbols = image.symbols.len(), "compiled");
    Ok(Compiled { image, asm })
}
