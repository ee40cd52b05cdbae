use cas_rs::cpu::Trap;
use cas_rs::{assemble, compile, CpuConfig, Emulator, ExitReason, VirtualHost};

fn emulator() -> Emulator<VirtualHost> {
    Emulator::with_host(CpuConfig::default(), VirtualHost::new(1))
}

#[test]
fn for_loop_sum_exits_with_55() {
    let src = r#"
        int main() {
            int sum = 0;
            for (int i = 1; i <= 10; i++) {
                sum += i;
            }
            return sum;
        }
    "#;
    let c = compile(src).unwrap();
    let mut emu = emulator();
    emu.load_image(&c.image).unwrap();
    let exit = emu.run().unwrap();
    assert_eq!(exit.code, 55);
    assert_eq!(exit.reason, ExitReason::ExitSyscall);
}

#[test]
fn factorial_with_call_and_ret() {
    let img = assemble(
        "
start:
    LOADI R1, 5
    CALL fact
    HALT
fact:
    LOADI R0, 1
loop:
    CMPI R1, 1
    JLE done
    MUL R0, R1
    DEC R1
    JMP loop
done:
    RET
",
    )
    .unwrap();
    let mut emu = emulator();
    emu.load_image(&img).unwrap();
    let exit = emu.run().unwrap();
    assert_eq!(exit.reason, ExitReason::Halt);
    assert_eq!(exit.regs[0], 120);
    // CALL/RET left the stack balanced
    assert_eq!(exit.regs[14], CpuConfig::default().stack_top());
}

#[test]
fn divide_by_zero_reports_the_faulting_address() {
    let img = assemble("LOADI R1, 7\nLOADI R2, 0\nDIV R1, R2\nHALT\n").unwrap();
    let mut emu = emulator();
    emu.load_image(&img).unwrap();
    match emu.run() {
        Err(Trap::DivideByZero { pc, insn }) => {
            assert_eq!(pc, 0x1008);
            assert_eq!(insn, "DIV R1, R2");
        }
        other => panic!("expected a divide trap, got {other:?}"),
    }
}

#[test]
fn inline_asm_matches_assembled_instruction() {
    let c = compile("int main() { int a = 41; asm(\"INC R4\"); return a; }").unwrap();
    assert!(c.asm.contains("    INC R4\n"));

    let inc = assemble("INC R4").unwrap();
    let needle = &inc.bytes[..4];
    assert!(c.image.bytes.chunks(4).any(|w| w == needle));

    let mut emu = emulator();
    emu.load_image(&c.image).unwrap();
    assert_eq!(emu.run().unwrap().code, 42);
}

#[test]
fn execute_facade_runs_raw_bytes() {
    let img = assemble("LOADI R0, 9\nHALT").unwrap();
    let exit = cas_rs::execute(&img.bytes, img.origin).unwrap();
    assert_eq!(exit.code, 9);
}
