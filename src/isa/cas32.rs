use crate::decoder::{Decoded, Decoder, Op};
use crate::instructions::{by_opcode, desc, ImmKind, Shape};

/// Decoder for the fixed-width CAS32 encoding:
/// `opcode[31:24] | rd[23:20] | rs[19:16] | imm16[15:0]`.
///
/// Decoding is strict: bits an operand shape does not use must be zero, so every word
/// that decodes re-encodes to itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cas32Decoder;

impl Cas32Decoder {
    pub fn new() -> Self {
        Self
    }
}

pub fn encode(op: Op, rd: u8, rs: u8, imm16: u16) -> u32 {
    ((op as u32) << 24) | (((rd & 0xF) as u32) << 20) | (((rs & 0xF) as u32) << 16) | imm16 as u32
}

impl Decoder for Cas32Decoder {
    fn decode(&self, raw32: u32) -> Option<Decoded> {
        let desc = by_opcode((raw32 >> 24) as u8)?;
        let rd = ((raw32 >> 20) & 0xF) as u8;
        let rs = ((raw32 >> 16) & 0xF) as u8;
        let imm16 = raw32 & 0xFFFF;
        let sext = imm16 as u16 as i16 as i32 as u32;

        let (rd_used, rs_used, imm_used) = match desc.shape {
            Shape::None => (false, false, false),
            Shape::Reg => (true, false, false),
            Shape::RegReg => (true, true, false),
            Shape::RegRegReg => {
                if imm16 & !0xF != 0 {
                    return None;
                }
                (true, true, true)
            }
            Shape::RegImm(_) | Shape::RegAddr => (true, false, true),
            Shape::Addr => (false, false, true),
            Shape::RegMem => (true, true, true),
        };
        if (!rd_used && rd != 0) || (!rs_used && rs != 0) || (!imm_used && imm16 != 0) {
            return None;
        }

        let (imm, rt) = match desc.shape {
            Shape::RegImm(ImmKind::Signed) | Shape::RegMem => (sext, 0),
            Shape::RegRegReg => (0, imm16 as u8),
            _ => (imm16, 0),
        };
        Some(Decoded { op: desc.op, rd, rs, rt, imm, raw: raw32 })
    }
}

/// Re-encode a decoded instruction.
pub fn encode_decoded(d: &Decoded) -> u32 {
    let imm = match desc(d.op).shape {
        Shape::RegRegReg => d.rt as u16,
        _ => d.imm as u16,
    };
    encode(d.op, d.rd, d.rs, imm)
}
