use cas_rs::{assemble, CpuConfig, Emulator, VirtualHost};

/// Run `CMP R1, R2` followed by `op` and report whether the branch was taken.
fn taken(op: &str, a: i32, b: i32) -> bool {
    let src = format!(
        "
    CMP R1, R2
    {op} yes
    LOADI R0, 0
    HALT
yes:
    LOADI R0, 1
    HALT
"
    );
    let img = assemble(&src).unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&img).unwrap();
    emu.cpu.gpr[1] = a as u32;
    emu.cpu.gpr[2] = b as u32;
    emu.run().unwrap().code == 1
}

const PAIRS: [(i32, i32); 7] = [(0, 0), (1, 2), (2, 1), (-1, 1), (1, -1), (i32::MIN, 1), (i32::MAX, -1)];

#[test]
fn signed_conditions() {
    for (a, b) in PAIRS {
        assert_eq!(taken("JE", a, b), a == b, "JE {a} {b}");
        assert_eq!(taken("JNE", a, b), a != b, "JNE {a} {b}");
        assert_eq!(taken("JL", a, b), a < b, "JL {a} {b}");
        assert_eq!(taken("JGE", a, b), a >= b, "JGE {a} {b}");
        assert_eq!(taken("JG", a, b), a > b, "JG {a} {b}");
        assert_eq!(taken("JLE", a, b), a <= b, "JLE {a} {b}");
    }
}

#[test]
fn zero_aliases() {
    assert!(taken("JZ", 5, 5));
    assert!(!taken("JZ", 5, 4));
    assert!(taken("JNZ", 5, 4));
    assert!(taken("JMP", 1, 2));
}

#[test]
fn countdown_loop() {
    let img = assemble(
        "
    LOADI R1, 10
    LOADI R0, 0
top:
    ADD R0, R1
    DEC R1
    JNZ top
    HALT
",
    )
    .unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&img).unwrap();
    let exit = emu.run().unwrap();
    assert_eq!(exit.code, 55);
    assert_eq!(exit.steps, 2 + 3 * 10 + 1);
}
