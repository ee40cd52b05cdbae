//! Two-pass assembler: pass 1 lays out items and records label addresses, pass 2 encodes
//! and resolves forward references. Text and compiler output share [`assemble_items`].

pub mod parse;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::instructions::{desc, ImmKind, Shape};
use crate::isa::cas32::encode;

pub use parse::{parse_instruction, parse_line, Dir, Instr, Item, Line, Target};

pub const DEFAULT_ORIGIN: u32 = 0x1000;
/// Highest address an image may reach (exclusive).
pub const MAX_IMAGE_END: u32 = 0x0100_0000;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmErrorKind {
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("`{mnemonic}` takes {expected} operand(s), found {found}")]
    OperandCount { mnemonic: String, expected: usize, found: usize },
    #[error("`{mnemonic}` operand {index} must be {expected}")]
    OperandType { mnemonic: String, index: usize, expected: &'static str },
    #[error("unresolved label `{0}`")]
    UnresolvedLabel(String),
    #[error("value {value} does not fit {field}")]
    ImmediateOverflow { value: i64, field: &'static str },
    #[error("duplicate label `{0}`")]
    DuplicateLabel(String),
    #[error("bad directive: {0}")]
    BadDirective(String),
    #[error("malformed literal `{0}`")]
    BadNumber(String),
    #[error(".org {to:#x} moves backwards from {from:#x}")]
    OrgBackwards { from: u32, to: u32 },
    #[error("address {addr:#x} is past the end of the image space")]
    AddressOutOfRange { addr: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct AssembleError {
    pub line: usize,
    pub kind: AsmErrorKind,
}

/// Assembled program: bytes to load at `origin` plus the resolved symbol table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub origin: u32,
    pub bytes: Vec<u8>,
    pub symbols: BTreeMap<String, u32>,
}

impl Image {
    pub fn symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }

    pub fn end(&self) -> u32 {
        self.origin.wrapping_add(self.bytes.len() as u32)
    }
}

pub fn assemble(text: &str) -> Result<Image, AssembleError> {
    assemble_at(text, DEFAULT_ORIGIN)
}

pub fn assemble_at(text: &str, origin: u32) -> Result<Image, AssembleError> {
    let mut lines = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let no = i + 1;
        let items = parse_line(raw).map_err(|kind| AssembleError { line: no, kind })?;
        lines.extend(items.into_iter().map(|item| Line { no, item }));
    }
    assemble_items(&lines, origin)
}

/// Number generated items by their position in the rendered listing.
pub fn number(items: Vec<Item>) -> Vec<Line> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| Line { no: i + 1, item })
        .collect()
}

/// One line per item, in the syntax [`parse_line`] accepts.
pub fn render(items: &[Item]) -> String {
    let mut out = String::new();
    for it in items {
        out.push_str(&it.to_string());
        out.push('\n');
    }
    out
}

fn size_of(item: &Item) -> u32 {
    match item {
        Item::Label(_) | Item::Dir(Dir::Org(_)) => 0,
        Item::Instr(_) => 4,
        Item::Dir(Dir::Word(vs)) => 4 * vs.len() as u32,
        Item::Dir(Dir::Str(s)) => (s.len() as u32 + 1 + 3) & !3,
    }
}

fn resolve(t: &Target, symbols: &BTreeMap<String, u32>) -> Result<i64, AsmErrorKind> {
    match t {
        Target::None => Ok(0),
        Target::Imm(v) => Ok(*v),
        Target::Label(l) => symbols
            .get(l)
            .map(|&a| a as i64)
            .ok_or_else(|| AsmErrorKind::UnresolvedLabel(l.clone())),
    }
}

fn fit(value: i64, lo: i64, hi: i64, field: &'static str) -> Result<u16, AsmErrorKind> {
    if value < lo || value > hi {
        return Err(AsmErrorKind::ImmediateOverflow { value, field });
    }
    Ok(value as u16)
}

pub fn encode_instr(i: &Instr, symbols: &BTreeMap<String, u32>) -> Result<u32, AsmErrorKind> {
    let imm16 = match desc(i.op).shape {
        Shape::None | Shape::Reg | Shape::RegReg => 0,
        Shape::RegRegReg => i.rt as u16,
        Shape::RegImm(ImmKind::Signed) | Shape::RegMem => {
            fit(resolve(&i.target, symbols)?, -0x8000, 0x7FFF, "a signed 16-bit field")?
        }
        Shape::RegImm(ImmKind::Unsigned) => {
            fit(resolve(&i.target, symbols)?, 0, 0xFFFF, "an unsigned 16-bit field")?
        }
        Shape::Addr | Shape::RegAddr => {
            fit(resolve(&i.target, symbols)?, 0, 0xFFFF, "a 16-bit address")?
        }
    };
    Ok(encode(i.op, i.rd, i.rs, imm16))
}

pub fn assemble_items(lines: &[Line], origin: u32) -> Result<Image, AssembleError> {
    let err = |line: &Line, kind| AssembleError { line: line.no, kind };

    // Pass 1: layout. A `.org` ahead of any emitted byte moves the origin itself.
    let mut origin = origin;
    let mut pc = u64::from(origin);
    let mut symbols = BTreeMap::new();
    for line in lines {
        match &line.item {
            Item::Label(name) => {
                if symbols.insert(name.clone(), pc as u32).is_some() {
                    return Err(err(line, AsmErrorKind::DuplicateLabel(name.clone())));
                }
            }
            Item::Dir(Dir::Org(to)) => {
                let to = *to;
                if to >= MAX_IMAGE_END {
                    return Err(err(line, AsmErrorKind::AddressOutOfRange { addr: to.into() }));
                }
                if pc == u64::from(origin) {
                    // leading labels follow the new origin
                    symbols.values_mut().for_each(|a| *a = to);
                    origin = to;
                } else if u64::from(to) < pc {
                    return Err(err(line, AsmErrorKind::OrgBackwards { from: pc as u32, to }));
                } else if u64::from(to) - pc > 0x1_0000 {
                    warn!(line = line.no, from = pc, to, ".org leaves a gap over 64 KiB");
                }
                pc = to.into();
            }
            other => {
                pc += u64::from(size_of(other));
                if pc > u64::from(MAX_IMAGE_END) {
                    return Err(err(line, AsmErrorKind::AddressOutOfRange { addr: pc }));
                }
            }
        }
    }
    debug!(symbols = symbols.len(), bytes = pc - u64::from(origin), "assembler pass 1");

    // Pass 2: encode
    let mut bytes = Vec::with_capacity((pc - u64::from(origin)) as usize);
    for line in lines {
        match &line.item {
            Item::Label(_) => {}
            Item::Dir(Dir::Org(to)) => bytes.resize(to.saturating_sub(origin) as usize, 0),
            Item::Instr(i) => {
                let raw = encode_instr(i, &symbols).map_err(|k| err(line, k))?;
                bytes.extend_from_slice(&raw.to_le_bytes());
            }
            Item::Dir(Dir::Word(vs)) => {
                for v in vs {
                    let v = resolve(v, &symbols).map_err(|k| err(line, k))?;
                    if v < i32::MIN as i64 || v > u32::MAX as i64 {
                        return Err(err(line, AsmErrorKind::ImmediateOverflow { value: v, field: "a 32-bit word" }));
                    }
                    bytes.extend_from_slice(&(v as u32).to_le_bytes());
                }
            }
            Item::Dir(Dir::Str(s)) => {
                let start = bytes.len();
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                bytes.resize(start + size_of(&line.item) as usize, 0);
            }
        }
    }
    Ok(Image { origin, bytes, symbols })
}
