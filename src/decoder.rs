use serde::{Deserialize, Serialize};

/// Opcode byte, bits 31..24 of every instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Op {
    Nop = 0x00,
    Mov = 0x01,
    LoadI = 0x02,
    Load = 0x03,
    Store = 0x04,
    Add = 0x05,
    Sub = 0x06,
    And = 0x07,
    Or = 0x08,
    Xor = 0x09,
    Not = 0x0A,
    Shl = 0x0B,
    Shr = 0x0C,
    Jmp = 0x0D,
    Jz = 0x0E,
    Jnz = 0x0F,
    Cmp = 0x10,
    Push = 0x11,
    Pop = 0x12,
    Call = 0x13,
    Ret = 0x14,
    Halt = 0x15,
    Inc = 0x16,
    Dec = 0x17,
    Test = 0x1E,
    Je = 0x1F,
    Jne = 0x20,
    Jl = 0x21,
    Jg = 0x22,
    Jle = 0x23,
    Jge = 0x24,
    Mul = 0x25,
    Div = 0x27,
    Mod = 0x29,
    Syscall = 0x2A,
    Pushf = 0x31,
    Popf = 0x32,
    Rol = 0x37,
    Ror = 0x38,
    Neg = 0x3C,
    Fmul = 0x44,
    // immediate forms
    AddI = 0xB0,
    SubI = 0xB1,
    MulI = 0xB2,
    AndI = 0xB3,
    OrI = 0xB4,
    XorI = 0xB5,
    ShlI = 0xB6,
    ShrI = 0xB7,
    CmpI = 0xB8,
    Sar = 0xB9,
    // register-indirect and byte memory forms
    LoadR = 0xC0,
    StoreR = 0xC1,
    LoadB = 0xC2,
    StoreB = 0xC3,
    LoadBR = 0xC4,
    StoreBR = 0xC5,
    // bit and graphics utilities
    Abs = 0xD0,
    Popcount = 0xD1,
    Lzcnt = 0xD2,
    Tzcnt = 0xD3,
    Reverse = 0xD4,
    Bswap = 0xD5,
    Sign = 0xD6,
    Saturate = 0xD7,
    Lerp = 0xD8,
}

impl Op {
    pub fn from_byte(b: u8) -> Option<Op> {
        crate::instructions::by_opcode(b).map(|d| d.op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoded {
    pub op: Op,
    pub rd: u8,
    pub rs: u8,
    /// Third register, only used by `LERP` (low nibble of the immediate field).
    pub rt: u8,
    /// Immediate, already sign- or zero-extended according to the operand shape.
    pub imm: u32,
    pub raw: u32,
}

pub trait Decoder {
    fn decode(&self, raw32: u32) -> Option<Decoded>;
}
