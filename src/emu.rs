use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::asm::Image;
use crate::cpu::{Cpu, CpuConfig, Flags, Trap, PC};
use crate::decoder::Decoder;
use crate::disasm::fmt_decoded;
use crate::exec::{IntExecutor, Step};
use crate::isa::cas32::Cas32Decoder;
use crate::memory::LinearMemory;
use crate::syscall::{Host, Kernel, SysOutcome, SystemHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    Halt,
    ExitSyscall,
}

/// Final machine state of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exit {
    pub code: i32,
    pub reason: ExitReason,
    pub steps: u64,
    pub regs: [u32; 16],
    pub flags: Flags,
}

/// One virtual machine: CPU, memory and kernel, owned together.
pub struct Emulator<H: Host = SystemHost> {
    pub cpu: Cpu,
    pub mem: LinearMemory,
    pub kernel: Kernel<H>,
    dec: Cas32Decoder,
    exec: IntExecutor,
    steps: u64,
}

impl Emulator<SystemHost> {
    pub fn new(cfg: CpuConfig) -> Self {
        let host = SystemHost::new(cfg.max_sleep_ms);
        Self::with_host(cfg, host)
    }
}

impl<H: Host> Emulator<H> {
    pub fn with_host(cfg: CpuConfig, host: H) -> Self {
        Self {
            cpu: Cpu::new(cfg),
            mem: LinearMemory::new(cfg.mem_size),
            kernel: Kernel::new(host, cfg.stack_limit()),
            dec: Cas32Decoder::new(),
            exec: IntExecutor,
            steps: 0,
        }
    }

    /// Clear memory, copy `bytes` to `origin` and reset registers (PC = origin, SP = stack top).
    pub fn load(&mut self, bytes: &[u8], origin: u32) -> Result<(), Trap> {
        self.mem.clear();
        self.mem.load(origin, bytes).map_err(|source| Trap::Bus {
            pc: origin,
            addr: origin,
            insn: "<load>".to_string(),
            source,
        })?;
        self.cpu.reset(origin);
        self.steps = 0;
        debug!(origin = format_args!("{origin:#x}"), len = bytes.len(), "image loaded");
        Ok(())
    }

    pub fn load_image(&mut self, img: &Image) -> Result<(), Trap> {
        self.load(&img.bytes, img.origin)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn exit(&self, code: i32, reason: ExitReason) -> Exit {
        Exit { code, reason, steps: self.steps, regs: self.cpu.gpr, flags: self.cpu.flags }
    }

    /// Execute one instruction, servicing a syscall if it was one.
    pub fn step(&mut self) -> Result<Option<Exit>, Trap> {
        if let Some(max) = self.cpu.cfg.max_steps {
            if self.steps >= max {
                return Err(Trap::StepLimit { steps: self.steps, pc: self.cpu.pc() });
            }
        }
        let pc = self.cpu.pc();
        let step = self.cpu.step(&mut self.mem, &self.dec, &self.exec)?;
        self.steps += 1;
        match step {
            Step::Continue => Ok(None),
            Step::Halt => Ok(Some(self.exit(self.cpu.gpr[0] as i32, ExitReason::Halt))),
            Step::Syscall => match self.kernel.dispatch(&mut self.cpu, &mut self.mem, pc)? {
                SysOutcome::Continue => Ok(None),
                SysOutcome::Exit(code) => Ok(Some(self.exit(code, ExitReason::ExitSyscall))),
            },
        }
    }

    pub fn run(&mut self) -> Result<Exit, Trap> {
        loop {
            if let Some(exit) = self.step()? {
                debug!(code = exit.code, steps = exit.steps, reason = ?exit.reason, "run finished");
                return Ok(exit);
            }
        }
    }

    /// Registers four per line, then PC and flags.
    pub fn dump_regs(&self) -> String {
        let mut out = String::new();
        for row in 0..4 {
            let cells: Vec<String> = (0..4)
                .map(|col| {
                    let r = row * 4 + col;
                    format!("R{r:02}={:08x}", self.cpu.gpr[r])
                })
                .collect();
            let _ = writeln!(out, "{}", cells.join(" "));
        }
        let f = self.cpu.flags;
        let bit = |flag: Flags, c: char| if f.contains(flag) { c } else { '-' };
        let _ = writeln!(
            out,
            "PC={:08x} FLAGS={}{}{}{}",
            self.cpu.gpr[PC],
            bit(Flags::Z, 'Z'),
            bit(Flags::N, 'N'),
            bit(Flags::C, 'C'),
            bit(Flags::V, 'V'),
        );
        out
    }

    /// Hex and ASCII view, 16 bytes per line.
    pub fn dump_mem(&self, addr: u32, len: u32) -> anyhow::Result<String> {
        let bytes = self.mem.slice(addr, len)?;
        let mut out = String::new();
        for (i, chunk) in bytes.chunks(16).enumerate() {
            let _ = write!(out, "{:08x}: ", addr as usize + i * 16);
            for b in chunk {
                let _ = write!(out, "{b:02x} ");
            }
            for _ in chunk.len()..16 {
                out.push_str("   ");
            }
            let ascii: String = chunk
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            let _ = writeln!(out, " {ascii}");
        }
        Ok(out)
    }

    /// Decode `count` words from `addr`; undecodable words render as `.word`.
    pub fn disassemble_at(&self, addr: u32, count: usize) -> Vec<(u32, String)> {
        let mut out = Vec::with_capacity(count);
        let mut pc = addr;
        for _ in 0..count {
            let Some(raw) = self.mem.peek_u32(pc) else { break };
            let text = match self.dec.decode(raw) {
                Some(d) => fmt_decoded(&d),
                None => format!(".word {raw:#010x}"),
            };
            out.push((pc, text));
            pc = pc.wrapping_add(4);
        }
        out
    }
}
