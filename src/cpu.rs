use anyhow::Error;
use crate::decoder::{Decoded, Decoder};
use crate::disasm::fmt_decoded;
use crate::exec::{Executor, Step};
use crate::memory::Bus;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub const SP: usize = 14;
pub const PC: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Size of the flat memory in bytes.
    pub mem_size: usize,
    /// Bytes reserved for the downward-growing stack at the top of memory.
    pub stack_size: u32,
    /// Abort with [`Trap::StepLimit`] after this many instructions.
    pub max_steps: Option<u64>,
    /// Upper bound on a single `sleep` syscall with the system host.
    pub max_sleep_ms: u64,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            mem_size: 1024 * 1024,
            stack_size: 64 * 1024,
            max_steps: Some(10_000_000),
            max_sleep_ms: 1000,
        }
    }
}

impl CpuConfig {
    pub fn stack_top(&self) -> u32 {
        u32::try_from(self.mem_size).unwrap_or(u32::MAX) & !3
    }

    pub fn stack_limit(&self) -> u32 {
        self.stack_top().saturating_sub(self.stack_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// R0..R15; R14 is SP, R15 is PC.
    pub gpr: [u32; 16],
    pub flags: Flags,
    pub cfg: CpuConfig,
}

bitflags! {
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags: u32 {
const Z = 1 << 0; // Zero
const N = 1 << 1; // Negative
const C = 1 << 2; // Carry / borrow
const V = 1 << 3; // Signed overflow
}
}

#[derive(thiserror::Error, Debug)]
pub enum Trap {
    #[error("invalid instruction {raw:#010x} at {pc:#010x}")]
    InvalidInstruction { pc: u32, raw: u32 },
    #[error("unaligned program counter {pc:#010x}")]
    Unaligned { pc: u32 },
    #[error("division by zero at {pc:#010x}: {insn}")]
    DivideByZero { pc: u32, insn: String },
    #[error("bus error at {addr:#010x} (pc {pc:#010x}: {insn}): {source}")]
    Bus {
        pc: u32,
        addr: u32,
        insn: String,
        #[source]
        source: Error,
    },
    #[error("stack overflow at {pc:#010x}: {insn} (sp {sp:#010x})")]
    StackOverflow { pc: u32, insn: String, sp: u32 },
    #[error("stack underflow at {pc:#010x}: {insn} (sp {sp:#010x})")]
    StackUnderflow { pc: u32, insn: String, sp: u32 },
    #[error("unknown syscall {num} at {pc:#010x}")]
    UnknownSyscall { pc: u32, num: u32 },
    #[error("step limit of {steps} reached at {pc:#010x}")]
    StepLimit { steps: u64, pc: u32 },
}

impl Trap {
    /// Address of the faulting instruction.
    pub fn pc(&self) -> u32 {
        match self {
            Trap::InvalidInstruction { pc, .. }
            | Trap::Unaligned { pc }
            | Trap::DivideByZero { pc, .. }
            | Trap::Bus { pc, .. }
            | Trap::StackOverflow { pc, .. }
            | Trap::StackUnderflow { pc, .. }
            | Trap::UnknownSyscall { pc, .. }
            | Trap::StepLimit { pc, .. } => *pc,
        }
    }
}

impl Cpu {
    pub fn new(cfg: CpuConfig) -> Self {
        Self {
            gpr: [0; 16],
            flags: Flags::empty(),
            cfg,
        }
    }

    /// Zero every register, point SP at the stack top and PC at `entry`.
    pub fn reset(&mut self, entry: u32) {
        self.gpr = [0; 16];
        self.flags = Flags::empty();
        self.gpr[SP] = self.cfg.stack_top();
        self.gpr[PC] = entry;
    }

    pub fn pc(&self) -> u32 {
        self.gpr[PC]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.gpr[PC] = pc;
    }

    pub fn sp(&self) -> u32 {
        self.gpr[SP]
    }

    pub fn push<B: Bus>(&mut self, bus: &mut B, pc: u32, d: &Decoded, val: u32) -> Result<(), Trap> {
        let sp = self.sp();
        let new_sp = sp.wrapping_sub(4);
        if sp < self.cfg.stack_limit().saturating_add(4) {
            return Err(Trap::StackOverflow { pc, insn: fmt_decoded(d), sp });
        }
        bus.write_u32(new_sp, val)
            .map_err(|source| Trap::Bus { pc, addr: new_sp, insn: fmt_decoded(d), source })?;
        self.gpr[SP] = new_sp;
        Ok(())
    }

    pub fn pop<B: Bus>(&mut self, bus: &mut B, pc: u32, d: &Decoded) -> Result<u32, Trap> {
        let sp = self.sp();
        if sp.checked_add(4).map_or(true, |end| end > self.cfg.stack_top()) {
            return Err(Trap::StackUnderflow { pc, insn: fmt_decoded(d), sp });
        }
        let val = bus
            .read_u32(sp)
            .map_err(|source| Trap::Bus { pc, addr: sp, insn: fmt_decoded(d), source })?;
        self.gpr[SP] = sp + 4;
        Ok(val)
    }

    pub fn step<B: Bus, D: Decoder, X: Executor>(
        &mut self,
        bus: &mut B,
        dec: &D,
        exec: &X,
    ) -> Result<Step, Trap> {
        let pc = self.pc();
        if pc % 4 != 0 {
            return Err(Trap::Unaligned { pc });
        }
        let raw32 = bus.read_u32(pc).map_err(|source| Trap::Bus {
            pc,
            addr: pc,
            insn: "<fetch>".to_string(),
            source,
        })?;
        let d = dec.decode(raw32).ok_or(Trap::InvalidInstruction { pc, raw: raw32 })?;
        tracing::trace!(pc = format_args!("{pc:#010x}"), op = ?d.op, "exec");
        // R15 reads as the next instruction; branches overwrite it
        self.set_pc(pc.wrapping_add(4));
        exec.exec(self, bus, pc, d)
    }
}
