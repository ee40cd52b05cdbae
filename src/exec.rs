use crate::cpu::{Cpu, Flags, Trap};
use crate::decoder::{Decoded, Op};
use crate::disasm::fmt_decoded;
use crate::memory::Bus;

/// What the run loop should do after an instruction retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halt,
    Syscall,
}

pub trait Executor {
    fn exec<B: Bus>(&self, cpu: &mut Cpu, bus: &mut B, pc: u32, d: Decoded) -> Result<Step, Trap>;
}

fn set_zn(cpu: &mut Cpu, res: u32) {
    cpu.flags.set(Flags::Z, res == 0);
    cpu.flags.set(Flags::N, (res as i32) < 0);
}

fn add_flags(cpu: &mut Cpu, a: u32, b: u32) -> u32 {
    let (res, carry) = a.overflowing_add(b);
    set_zn(cpu, res);
    cpu.flags.set(Flags::C, carry);
    cpu.flags.set(Flags::V, (!(a ^ b) & (a ^ res)) & 0x8000_0000 != 0);
    res
}

fn sub_flags(cpu: &mut Cpu, a: u32, b: u32) -> u32 {
    let (res, borrow) = a.overflowing_sub(b);
    set_zn(cpu, res);
    cpu.flags.set(Flags::C, borrow);
    cpu.flags.set(Flags::V, ((a ^ b) & (a ^ res)) & 0x8000_0000 != 0);
    res
}

/// `a + (b - a) * t / 256` with `t` clamped to `0..=255`, truncating toward zero.
pub fn lerp(a: i32, b: i32, t: i32) -> i32 {
    let t = t.clamp(0, 255) as i64;
    let (a, b) = (a as i64, b as i64);
    (a + (b - a) * t / 256) as i32
}

pub fn saturate(x: i32) -> i32 {
    x.clamp(0, 255)
}

fn bus_err(pc: u32, addr: u32, d: &Decoded) -> impl FnOnce(anyhow::Error) -> Trap + '_ {
    move |source| Trap::Bus { pc, addr, insn: fmt_decoded(d), source }
}

fn branch_taken(op: Op, f: Flags) -> bool {
    let (z, n, v) = (f.contains(Flags::Z), f.contains(Flags::N), f.contains(Flags::V));
    match op {
        Op::Jmp => true,
        Op::Jz | Op::Je => z,
        Op::Jnz | Op::Jne => !z,
        Op::Jl => n != v,
        Op::Jge => n == v,
        Op::Jg => !z && n == v,
        Op::Jle => z || n != v,
        _ => false,
    }
}

pub struct IntExecutor;
impl Executor for IntExecutor {
    fn exec<B: Bus>(&self, cpu: &mut Cpu, bus: &mut B, pc: u32, d: Decoded) -> Result<Step, Trap> {
        let rd = d.rd as usize;
        let a = cpu.gpr[rd];
        let b = cpu.gpr[d.rs as usize];
        match d.op {
            Op::Nop => {}
            Op::Mov => cpu.gpr[rd] = b,
            Op::LoadI => cpu.gpr[rd] = d.imm,
            Op::Load => {
                cpu.gpr[rd] = bus.read_u32(d.imm).map_err(bus_err(pc, d.imm, &d))?;
            }
            Op::LoadR => {
                let addr = b.wrapping_add(d.imm);
                cpu.gpr[rd] = bus.read_u32(addr).map_err(bus_err(pc, addr, &d))?;
            }
            Op::LoadB => {
                cpu.gpr[rd] = bus.read_u8(d.imm).map_err(bus_err(pc, d.imm, &d))? as u32;
            }
            Op::LoadBR => {
                let addr = b.wrapping_add(d.imm);
                cpu.gpr[rd] = bus.read_u8(addr).map_err(bus_err(pc, addr, &d))? as u32;
            }
            Op::Store => {
                bus.write_u32(d.imm, a).map_err(bus_err(pc, d.imm, &d))?;
            }
            Op::StoreR => {
                let addr = b.wrapping_add(d.imm);
                bus.write_u32(addr, a).map_err(bus_err(pc, addr, &d))?;
            }
            Op::StoreB => {
                bus.write_u8(d.imm, a as u8).map_err(bus_err(pc, d.imm, &d))?;
            }
            Op::StoreBR => {
                let addr = b.wrapping_add(d.imm);
                bus.write_u8(addr, a as u8).map_err(bus_err(pc, addr, &d))?;
            }
            Op::Add => cpu.gpr[rd] = add_flags(cpu, a, b),
            Op::AddI => cpu.gpr[rd] = add_flags(cpu, a, d.imm),
            Op::Inc => cpu.gpr[rd] = add_flags(cpu, a, 1),
            Op::Sub => cpu.gpr[rd] = sub_flags(cpu, a, b),
            Op::SubI => cpu.gpr[rd] = sub_flags(cpu, a, d.imm),
            Op::Dec => cpu.gpr[rd] = sub_flags(cpu, a, 1),
            Op::Neg => cpu.gpr[rd] = sub_flags(cpu, 0, a),
            Op::Cmp => {
                sub_flags(cpu, a, b);
            }
            Op::CmpI => {
                sub_flags(cpu, a, d.imm);
            }
            Op::Test => {
                set_zn(cpu, a & b);
                cpu.flags.remove(Flags::C | Flags::V);
            }
            Op::Mul | Op::MulI => {
                let rhs = if d.op == Op::Mul { b } else { d.imm };
                let res = (a as i32).wrapping_mul(rhs as i32) as u32;
                set_zn(cpu, res);
                cpu.gpr[rd] = res;
            }
            Op::Div | Op::Mod => {
                if b == 0 {
                    return Err(Trap::DivideByZero { pc, insn: fmt_decoded(&d) });
                }
                let res = if d.op == Op::Div {
                    (a as i32).wrapping_div(b as i32)
                } else {
                    (a as i32).wrapping_rem(b as i32)
                } as u32;
                set_zn(cpu, res);
                cpu.gpr[rd] = res;
            }
            Op::And | Op::Or | Op::Xor | Op::AndI | Op::OrI | Op::XorI => {
                let res = match d.op {
                    Op::And => a & b,
                    Op::Or => a | b,
                    Op::Xor => a ^ b,
                    Op::AndI => a & d.imm,
                    Op::OrI => a | d.imm,
                    _ => a ^ d.imm,
                };
                set_zn(cpu, res);
                cpu.gpr[rd] = res;
            }
            Op::Shl | Op::Shr | Op::Sar | Op::Rol | Op::Ror | Op::ShlI | Op::ShrI => {
                let amt = match d.op {
                    Op::ShlI | Op::ShrI => d.imm,
                    _ => b,
                } & 31;
                let res = match d.op {
                    Op::Shl | Op::ShlI => a << amt,
                    Op::Shr | Op::ShrI => a >> amt,
                    Op::Sar => ((a as i32) >> amt) as u32,
                    Op::Rol => a.rotate_left(amt),
                    _ => a.rotate_right(amt),
                };
                set_zn(cpu, res);
                cpu.gpr[rd] = res;
            }
            Op::Not
            | Op::Abs
            | Op::Popcount
            | Op::Lzcnt
            | Op::Tzcnt
            | Op::Reverse
            | Op::Bswap
            | Op::Sign
            | Op::Saturate => {
                let res = match d.op {
                    Op::Not => !a,
                    Op::Abs => (a as i32).wrapping_abs() as u32,
                    Op::Popcount => a.count_ones(),
                    Op::Lzcnt => a.leading_zeros(),
                    Op::Tzcnt => a.trailing_zeros(),
                    Op::Reverse => a.reverse_bits(),
                    Op::Bswap => a.swap_bytes(),
                    Op::Sign => (a as i32).signum() as u32,
                    _ => saturate(a as i32) as u32,
                };
                set_zn(cpu, res);
                cpu.gpr[rd] = res;
            }
            Op::Lerp => {
                let t = cpu.gpr[(d.rt & 0xF) as usize] as i32;
                let res = lerp(a as i32, b as i32, t) as u32;
                set_zn(cpu, res);
                cpu.gpr[rd] = res;
            }
            Op::Fmul => {
                cpu.gpr[rd] = (f32::from_bits(a) * f32::from_bits(b)).to_bits();
            }
            Op::Jmp | Op::Jz | Op::Je | Op::Jnz | Op::Jne | Op::Jl | Op::Jg | Op::Jle | Op::Jge => {
                if branch_taken(d.op, cpu.flags) {
                    cpu.set_pc(d.imm);
                }
            }
            Op::Push => cpu.push(bus, pc, &d, a)?,
            Op::Pop => {
                let v = cpu.pop(bus, pc, &d)?;
                cpu.gpr[rd] = v;
            }
            Op::Pushf => {
                let bits = cpu.flags.bits();
                cpu.push(bus, pc, &d, bits)?;
            }
            Op::Popf => {
                let v = cpu.pop(bus, pc, &d)?;
                cpu.flags = Flags::from_bits_truncate(v);
            }
            Op::Call => {
                let ret = cpu.pc();
                cpu.push(bus, pc, &d, ret)?;
                cpu.set_pc(d.imm);
            }
            Op::Ret => {
                let target = cpu.pop(bus, pc, &d)?;
                cpu.set_pc(target);
            }
            Op::Syscall => return Ok(Step::Syscall),
            Op::Halt => return Ok(Step::Halt),
        }
        Ok(Step::Continue)
    }
}
