use cas_rs::cpu::SP;
use cas_rs::{assemble, CpuConfig, Emulator, VirtualHost};

fn run(src: &str) -> Emulator<VirtualHost> {
    let img = assemble(src).unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&img).unwrap();
    emu.run().unwrap();
    emu
}

#[test]
fn call_pushes_return_address() {
    let emu = run(
        "
    CALL peek
    HALT
peek:
    LOAD R1, [SP]
    RET
",
    );
    assert_eq!(emu.cpu.gpr[1], 0x1004);
    assert_eq!(emu.cpu.gpr[SP], CpuConfig::default().stack_top());
}

#[test]
fn nested_calls_unwind_in_order() {
    let emu = run(
        "
    LOADI R0, 1
    CALL a
    HALT
a:  MULI R0, 3
    CALL b
    ADDI R0, 1
    RET
b:  MULI R0, 10
    RET
",
    );
    // ((1 * 3) * 10) + 1
    assert_eq!(emu.cpu.gpr[0], 31);
}

#[test]
fn push_pop_and_flags_save() {
    let emu = run(
        "
    LOADI R1, 11
    LOADI R2, 22
    PUSH R1
    PUSH R2
    POP R1
    POP R2
    CMPI R1, 22
    PUSHF
    CMPI R1, 0
    POPF
    JE same
    LOADI R3, 1
    HALT
same:
    LOADI R3, 2
    HALT
",
    );
    assert_eq!(emu.cpu.gpr[1], 22);
    assert_eq!(emu.cpu.gpr[2], 11);
    assert_eq!(emu.cpu.gpr[3], 2);
}

#[test]
fn writing_pc_jumps() {
    let emu = run(
        "
    LOADI R1, target
    MOV PC, R1
    LOADI R0, 1
    HALT
target:
    LOADI R0, 2
    HALT
",
    );
    assert_eq!(emu.cpu.gpr[0], 2);
}

#[test]
fn stack_top_clamps_to_the_address_space() {
    let cfg = CpuConfig { mem_size: usize::MAX, stack_size: 0x1000, ..CpuConfig::default() };
    assert_eq!(cfg.stack_top(), 0xFFFF_FFFC);
    assert_eq!(cfg.stack_limit(), 0xFFFF_EFFC);
}
