use crate::decoder::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    Signed,
    Unsigned,
}

/// Operand layout of an instruction, shared by the assembler, decoder and disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `HALT`
    None,
    /// `INC Rd`
    Reg,
    /// `ADD Rd, Rs`
    RegReg,
    /// `LERP Rd, Rs, Rt`
    RegRegReg,
    /// `ADDI Rd, imm16`
    RegImm(ImmKind),
    /// `JMP addr16`
    Addr,
    /// `LOAD Rd, addr16`
    RegAddr,
    /// `LOAD Rd, [Rs+off16]`
    RegMem,
}

impl Shape {
    pub fn operand_count(self) -> usize {
        match self {
            Shape::None => 0,
            Shape::Reg | Shape::Addr => 1,
            Shape::RegReg | Shape::RegImm(_) | Shape::RegAddr | Shape::RegMem => 2,
            Shape::RegRegReg => 3,
        }
    }
}

/// Which flags an instruction recomputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagEffect {
    None,
    /// Zero and Negative; Carry and Overflow keep their value.
    ZN,
    /// Zero and Negative; Carry and Overflow cleared.
    ZNClearCV,
    ZNCV,
    /// Flags replaced wholesale (`POPF`).
    Restore,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub op: Op,
    pub mnemonic: &'static str,
    pub shape: Shape,
    pub flags: FlagEffect,
}

const fn d(op: Op, mnemonic: &'static str, shape: Shape, flags: FlagEffect) -> InstrDesc {
    InstrDesc { op, mnemonic, shape, flags }
}

use FlagEffect as F;
use Shape as S;

pub const TABLE: &[InstrDesc] = &[
    d(Op::Nop, "NOP", S::None, F::None),
    d(Op::Mov, "MOV", S::RegReg, F::None),
    d(Op::LoadI, "LOADI", S::RegImm(ImmKind::Signed), F::None),
    d(Op::Load, "LOAD", S::RegAddr, F::None),
    d(Op::LoadR, "LOAD", S::RegMem, F::None),
    d(Op::Store, "STORE", S::RegAddr, F::None),
    d(Op::StoreR, "STORE", S::RegMem, F::None),
    d(Op::LoadB, "LOADB", S::RegAddr, F::None),
    d(Op::LoadBR, "LOADB", S::RegMem, F::None),
    d(Op::StoreB, "STOREB", S::RegAddr, F::None),
    d(Op::StoreBR, "STOREB", S::RegMem, F::None),
    d(Op::Add, "ADD", S::RegReg, F::ZNCV),
    d(Op::Sub, "SUB", S::RegReg, F::ZNCV),
    d(Op::Mul, "MUL", S::RegReg, F::ZN),
    d(Op::Div, "DIV", S::RegReg, F::ZN),
    d(Op::Mod, "MOD", S::RegReg, F::ZN),
    d(Op::Inc, "INC", S::Reg, F::ZNCV),
    d(Op::Dec, "DEC", S::Reg, F::ZNCV),
    d(Op::Neg, "NEG", S::Reg, F::ZNCV),
    d(Op::Abs, "ABS", S::Reg, F::ZN),
    d(Op::AddI, "ADDI", S::RegImm(ImmKind::Signed), F::ZNCV),
    d(Op::SubI, "SUBI", S::RegImm(ImmKind::Signed), F::ZNCV),
    d(Op::MulI, "MULI", S::RegImm(ImmKind::Signed), F::ZN),
    d(Op::And, "AND", S::RegReg, F::ZN),
    d(Op::Or, "OR", S::RegReg, F::ZN),
    d(Op::Xor, "XOR", S::RegReg, F::ZN),
    d(Op::Not, "NOT", S::Reg, F::ZN),
    d(Op::Shl, "SHL", S::RegReg, F::ZN),
    d(Op::Shr, "SHR", S::RegReg, F::ZN),
    d(Op::Sar, "SAR", S::RegReg, F::ZN),
    d(Op::Rol, "ROL", S::RegReg, F::ZN),
    d(Op::Ror, "ROR", S::RegReg, F::ZN),
    d(Op::AndI, "ANDI", S::RegImm(ImmKind::Unsigned), F::ZN),
    d(Op::OrI, "ORI", S::RegImm(ImmKind::Unsigned), F::ZN),
    d(Op::XorI, "XORI", S::RegImm(ImmKind::Unsigned), F::ZN),
    d(Op::ShlI, "SHLI", S::RegImm(ImmKind::Unsigned), F::ZN),
    d(Op::ShrI, "SHRI", S::RegImm(ImmKind::Unsigned), F::ZN),
    d(Op::Popcount, "POPCOUNT", S::Reg, F::ZN),
    d(Op::Lzcnt, "LZCNT", S::Reg, F::ZN),
    d(Op::Tzcnt, "TZCNT", S::Reg, F::ZN),
    d(Op::Reverse, "REVERSE", S::Reg, F::ZN),
    d(Op::Bswap, "BSWAP", S::Reg, F::ZN),
    d(Op::Lerp, "LERP", S::RegRegReg, F::ZN),
    d(Op::Sign, "SIGN", S::Reg, F::ZN),
    d(Op::Saturate, "SATURATE", S::Reg, F::ZN),
    d(Op::Cmp, "CMP", S::RegReg, F::ZNCV),
    d(Op::CmpI, "CMPI", S::RegImm(ImmKind::Signed), F::ZNCV),
    d(Op::Test, "TEST", S::RegReg, F::ZNClearCV),
    d(Op::Jmp, "JMP", S::Addr, F::None),
    d(Op::Jz, "JZ", S::Addr, F::None),
    d(Op::Je, "JE", S::Addr, F::None),
    d(Op::Jnz, "JNZ", S::Addr, F::None),
    d(Op::Jne, "JNE", S::Addr, F::None),
    d(Op::Jl, "JL", S::Addr, F::None),
    d(Op::Jg, "JG", S::Addr, F::None),
    d(Op::Jle, "JLE", S::Addr, F::None),
    d(Op::Jge, "JGE", S::Addr, F::None),
    d(Op::Push, "PUSH", S::Reg, F::None),
    d(Op::Pop, "POP", S::Reg, F::None),
    d(Op::Pushf, "PUSHF", S::None, F::None),
    d(Op::Popf, "POPF", S::None, F::Restore),
    d(Op::Call, "CALL", S::Addr, F::None),
    d(Op::Ret, "RET", S::None, F::None),
    d(Op::Fmul, "FMUL", S::RegReg, F::None),
    d(Op::Syscall, "SYSCALL", S::None, F::None),
    d(Op::Halt, "HALT", S::None, F::None),
];

pub fn by_opcode(b: u8) -> Option<&'static InstrDesc> {
    TABLE.iter().find(|d| d.op as u8 == b)
}

pub fn desc(op: Op) -> &'static InstrDesc {
    // every Op variant has a row
    TABLE.iter().find(|d| d.op == op).unwrap_or(&TABLE[0])
}

/// All rows sharing a mnemonic (`LOAD` has an absolute and a register-indirect form).
pub fn by_mnemonic(mn: &str) -> impl Iterator<Item = &'static InstrDesc> + '_ {
    TABLE.iter().filter(move |d| d.mnemonic.eq_ignore_ascii_case(mn))
}
