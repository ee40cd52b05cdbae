use std::fmt;

use crate::asm::AsmErrorKind;
use crate::decoder::Op;
use crate::instructions::{by_mnemonic, desc, InstrDesc, Shape};
use crate::num::parse_int;

/// Immediate-field operand before label resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    None,
    Imm(i64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub op: Op,
    pub rd: u8,
    pub rs: u8,
    pub rt: u8,
    pub target: Target,
}

impl Instr {
    pub fn new(op: Op, rd: u8, rs: u8, target: Target) -> Self {
        Self { op, rd, rs, rt: 0, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dir {
    Org(u32),
    Word(Vec<Target>),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Label(String),
    Instr(Instr),
    Dir(Dir),
}

/// An item tagged with the 1-based source line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub no: usize,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Reg(u8),
    Mem { base: u8, off: i64 },
    Value(Target),
}

/// Byte offset of the first `needle` outside quotes.
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == needle => return Some(i),
            None => {}
        }
    }
    None
}

fn split_operands(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(p) = find_unquoted(rest, ',') {
        out.push(rest[..p].trim());
        rest = &rest[p + 1..];
    }
    let last = rest.trim();
    if !last.is_empty() || !out.is_empty() {
        out.push(last);
    }
    out
}

pub fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

pub fn parse_reg(s: &str) -> Option<u8> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("sp") {
        return Some(14);
    }
    if s.eq_ignore_ascii_case("pc") {
        return Some(15);
    }
    let n = s.strip_prefix(['R', 'r'])?;
    if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    n.parse::<u8>().ok().filter(|&r| r < 16)
}

fn unescape(body: &str, raw: &str) -> Result<String, AsmErrorKind> {
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let e = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            _ => return Err(AsmErrorKind::BadNumber(raw.to_string())),
        };
        out.push(e);
    }
    Ok(out)
}

fn parse_value(s: &str) -> Result<Target, AsmErrorKind> {
    if let Some(v) = parse_int::<i64>(s) {
        return Ok(Target::Imm(v));
    }
    if let Some(body) = s.strip_prefix('\'').and_then(|b| b.strip_suffix('\'')) {
        let text = unescape(body, s)?;
        let mut chars = text.chars();
        return match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii() => Ok(Target::Imm(c as i64)),
            _ => Err(AsmErrorKind::BadNumber(s.to_string())),
        };
    }
    if is_ident(s) && parse_reg(s).is_none() {
        return Ok(Target::Label(s.to_string()));
    }
    Err(AsmErrorKind::BadNumber(s.to_string()))
}

fn parse_operand(s: &str) -> Result<Operand, AsmErrorKind> {
    if let Some(r) = parse_reg(s) {
        return Ok(Operand::Reg(r));
    }
    if let Some(inner) = s.strip_prefix('[').and_then(|x| x.strip_suffix(']')) {
        let inner = inner.trim();
        let (base, off) = match inner.find(['+', '-']) {
            Some(p) => {
                let sign = if inner[p..].starts_with('-') { -1 } else { 1 };
                let off = parse_int::<i64>(inner[p + 1..].trim())
                    .ok_or_else(|| AsmErrorKind::BadNumber(s.to_string()))?;
                (&inner[..p], sign * off)
            }
            None => (inner, 0),
        };
        let base = parse_reg(base).ok_or_else(|| AsmErrorKind::BadNumber(s.to_string()))?;
        return Ok(Operand::Mem { base, off });
    }
    parse_value(s).map(Operand::Value)
}

fn bind(desc: &InstrDesc, ops: &[Operand]) -> Result<Instr, AsmErrorKind> {
    let type_err = |index: usize, expected: &'static str| AsmErrorKind::OperandType {
        mnemonic: desc.mnemonic.to_string(),
        index: index + 1,
        expected,
    };
    let reg = |i: usize| match &ops[i] {
        Operand::Reg(r) => Ok(*r),
        _ => Err(type_err(i, "a register")),
    };
    let value = |i: usize| match &ops[i] {
        Operand::Value(t) => Ok(t.clone()),
        _ => Err(type_err(i, "an immediate or label")),
    };
    let mut ins = Instr::new(desc.op, 0, 0, Target::None);
    match desc.shape {
        Shape::None => {}
        Shape::Reg => ins.rd = reg(0)?,
        Shape::RegReg => {
            ins.rd = reg(0)?;
            ins.rs = reg(1)?;
        }
        Shape::RegRegReg => {
            ins.rd = reg(0)?;
            ins.rs = reg(1)?;
            ins.rt = reg(2)?;
        }
        Shape::RegImm(_) | Shape::RegAddr => {
            ins.rd = reg(0)?;
            ins.target = value(1)?;
        }
        Shape::Addr => ins.target = value(0)?,
        Shape::RegMem => {
            ins.rd = reg(0)?;
            match &ops[1] {
                Operand::Mem { base, off } => {
                    ins.rs = *base;
                    ins.target = Target::Imm(*off);
                }
                _ => return Err(type_err(1, "a memory operand [Rn+off]")),
            }
        }
    }
    Ok(ins)
}

/// Parse one instruction (no label, no directive).
pub fn parse_instruction(text: &str) -> Result<Instr, AsmErrorKind> {
    let text = text.trim();
    let (mn, rest) = match text.find(char::is_whitespace) {
        Some(p) => (&text[..p], text[p..].trim()),
        None => (text, ""),
    };
    let ops = split_operands(rest)
        .into_iter()
        .map(parse_operand)
        .collect::<Result<Vec<_>, _>>()?;

    let cands: Vec<&InstrDesc> = by_mnemonic(mn).collect();
    let Some(first) = cands.first() else {
        return Err(AsmErrorKind::UnknownMnemonic(mn.to_string()));
    };
    let mut type_err = None;
    for c in cands.iter().filter(|c| c.shape.operand_count() == ops.len()) {
        match bind(c, &ops) {
            Ok(ins) => return Ok(ins),
            Err(e) => {
                type_err.get_or_insert(e);
            }
        }
    }
    Err(type_err.unwrap_or_else(|| AsmErrorKind::OperandCount {
        mnemonic: first.mnemonic.to_string(),
        expected: first.shape.operand_count(),
        found: ops.len(),
    }))
}

fn parse_directive(s: &str) -> Result<Dir, AsmErrorKind> {
    let (name, rest) = match s.find(char::is_whitespace) {
        Some(p) => (&s[..p], s[p..].trim()),
        None => (s, ""),
    };
    match name.to_ascii_lowercase().as_str() {
        ".org" => {
            let v = parse_int::<i64>(rest).ok_or_else(|| AsmErrorKind::BadNumber(rest.to_string()))?;
            let addr = u32::try_from(v).map_err(|_| AsmErrorKind::ImmediateOverflow {
                value: v,
                field: "a 32-bit address",
            })?;
            Ok(Dir::Org(addr))
        }
        ".word" => {
            if rest.is_empty() {
                return Err(AsmErrorKind::BadDirective(".word needs at least one value".into()));
            }
            let vals = split_operands(rest)
                .into_iter()
                .map(parse_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Dir::Word(vals))
        }
        ".string" => {
            let body = rest
                .strip_prefix('"')
                .and_then(|b| b.strip_suffix('"'))
                .ok_or_else(|| AsmErrorKind::BadDirective(format!(".string expects a quoted string: {rest}")))?;
            Ok(Dir::Str(unescape(body, rest)?))
        }
        other => Err(AsmErrorKind::BadDirective(other.to_string())),
    }
}

/// Parse one source line: optional `label:`, then an instruction or directive.
pub fn parse_line(line: &str) -> Result<Vec<Item>, AsmErrorKind> {
    let mut s = line;
    if let Some(p) = find_unquoted(s, ';') {
        s = &s[..p];
    }
    let mut s = s.trim();
    let mut items = Vec::new();
    if let Some(p) = find_unquoted(s, ':') {
        let name = s[..p].trim();
        if is_ident(name) && !name.starts_with('.') {
            items.push(Item::Label(name.to_string()));
            s = s[p + 1..].trim();
        }
    }
    if s.is_empty() {
        return Ok(items);
    }
    if s.starts_with('.') {
        items.push(Item::Dir(parse_directive(s)?));
    } else {
        items.push(Item::Instr(parse_instruction(s)?));
    }
    Ok(items)
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::None => Ok(()),
            Target::Imm(v) => write!(f, "{v}"),
            Target::Label(l) => f.write_str(l),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = desc(self.op);
        let mn = d.mnemonic;
        match d.shape {
            Shape::None => f.write_str(mn),
            Shape::Reg => write!(f, "{mn} R{}", self.rd),
            Shape::RegReg => write!(f, "{mn} R{}, R{}", self.rd, self.rs),
            Shape::RegRegReg => write!(f, "{mn} R{}, R{}, R{}", self.rd, self.rs, self.rt),
            Shape::RegImm(_) | Shape::RegAddr => write!(f, "{mn} R{}, {}", self.rd, self.target),
            Shape::Addr => write!(f, "{mn} {}", self.target),
            Shape::RegMem => match self.target {
                Target::Imm(o) if o < 0 => write!(f, "{mn} R{}, [R{}-{}]", self.rd, self.rs, -o),
                Target::Imm(o) if o > 0 => write!(f, "{mn} R{}, [R{}+{}]", self.rd, self.rs, o),
                _ => write!(f, "{mn} R{}, [R{}]", self.rd, self.rs),
            },
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Label(l) => write!(f, "{l}:"),
            Item::Instr(i) => write!(f, "    {i}"),
            Item::Dir(Dir::Org(a)) => write!(f, "    .org {a:#x}"),
            Item::Dir(Dir::Word(vs)) => {
                let vs: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                write!(f, "    .word {}", vs.join(", "))
            }
            Item::Dir(Dir::Str(s)) => write!(f, "    .string \"{}\"", escape(s)),
        }
    }
}
