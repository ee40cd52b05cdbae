pub mod asm;
pub mod cc;
pub mod cpu;
pub mod decoder;
pub mod disasm;
pub mod emu;
pub mod exec;
pub mod instructions;
pub mod memory;
pub mod num;
pub mod syscall;

pub mod isa {
    pub mod cas32;
}

pub use asm::{assemble, assemble_at, AssembleError, Image};
pub use cc::{compile, compile_with, CompileError, Compiled, CompilerConfig};
pub use cpu::{Cpu, CpuConfig, Trap};
pub use emu::{Emulator, Exit, ExitReason};
pub use memory::{Bus, LinearMemory};
pub use syscall::{Host, SystemHost, VirtualHost};

/// Load `bytes` at `origin` on a fresh machine with default settings and run to completion.
pub fn execute(bytes: &[u8], origin: u32) -> Result<Exit, Trap> {
    let mut emu = Emulator::new(CpuConfig::default());
    emu.load(bytes, origin)?;
    emu.run()
}
