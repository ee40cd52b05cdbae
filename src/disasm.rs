use crate::decoder::Decoded;
use crate::instructions::{desc, ImmKind, Shape};

/// Render a decoded instruction in the assembler's own syntax, so the text reassembles
/// to the same word.
pub fn fmt_decoded(d: &Decoded) -> String {
    let desc = desc(d.op);
    let mn = desc.mnemonic;
    match desc.shape {
        Shape::None => mn.to_string(),
        Shape::Reg => format!("{mn} R{}", d.rd),
        Shape::RegReg => format!("{mn} R{}, R{}", d.rd, d.rs),
        Shape::RegRegReg => format!("{mn} R{}, R{}, R{}", d.rd, d.rs, d.rt),
        Shape::RegImm(ImmKind::Signed) => format!("{mn} R{}, {}", d.rd, d.imm as i32),
        Shape::RegImm(ImmKind::Unsigned) => format!("{mn} R{}, {:#x}", d.rd, d.imm),
        Shape::Addr => format!("{mn} {:#06x}", d.imm),
        Shape::RegAddr => format!("{mn} R{}, {:#06x}", d.rd, d.imm),
        Shape::RegMem => format!("{mn} R{}, {}", d.rd, mem(d.rs, d.imm as i32)),
    }
}

fn mem(base: u8, off: i32) -> String {
    match off {
        0 => format!("[R{base}]"),
        o if o < 0 => format!("[R{base}-{}]", -(o as i64)),
        o => format!("[R{base}+{o}]"),
    }
}

/// Like [`fmt_decoded`], but branch and call targets that hit a symbol are shown by name.
pub fn fmt_with_symbols(d: &Decoded, name_of: impl Fn(u32) -> Option<String>) -> String {
    let desc = desc(d.op);
    match desc.shape {
        Shape::Addr => match name_of(d.imm) {
            Some(name) => format!("{} {name}", desc.mnemonic),
            None => fmt_decoded(d),
        },
        _ => fmt_decoded(d),
    }
}
