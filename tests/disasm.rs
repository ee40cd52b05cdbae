use pretty_assertions::assert_eq;

use cas_rs::decoder::Decoder;
use cas_rs::disasm::fmt_decoded;
use cas_rs::isa::cas32::Cas32Decoder;
use cas_rs::{assemble, CpuConfig, Emulator, VirtualHost};

const PROGRAM: &str = "
    LOADI R1, -5
    ORI R1, 0xff00
    MOV R2, R1
    LOAD R3, 0x6000
    STORE R3, [R13-4]
    LOADB R4, [SP+2]
    LERP R0, R1, R2
    CMPI R0, 0
    JLE 0x1000
    CALL 0x1000
    PUSHF
    SYSCALL
    HALT
";

#[test]
fn disassembly_reassembles_to_the_same_bytes() {
    let img = assemble(PROGRAM).unwrap();
    let dec = Cas32Decoder::new();
    let text: Vec<String> = img
        .bytes
        .chunks(4)
        .map(|w| fmt_decoded(&dec.decode(u32::from_le_bytes([w[0], w[1], w[2], w[3]])).unwrap()))
        .collect();
    let again = assemble(&text.join("\n")).unwrap();
    assert_eq!(again.bytes, img.bytes);
}

#[test]
fn listing_format() {
    let img = assemble(PROGRAM).unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&img).unwrap();
    let lines: Vec<String> = emu.disassemble_at(0x1000, 7).into_iter().map(|(_, t)| t).collect();
    assert_eq!(
        lines,
        vec![
            "LOADI R1, -5",
            "ORI R1, 0xff00",
            "MOV R2, R1",
            "LOAD R3, 0x6000",
            "STORE R3, [R13-4]",
            "LOADB R4, [R14+2]",
            "LERP R0, R1, R2",
        ]
    );
}

#[test]
fn register_dump_layout() {
    let img = assemble("LOADI R0, 1\nLOADI R15, 0").unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&img).unwrap();
    emu.step().unwrap();
    let dump = emu.dump_regs();
    let first = dump.lines().next().unwrap();
    assert_eq!(first, "R00=00000001 R01=00000000 R02=00000000 R03=00000000");
    assert!(dump.contains("R14=00100000"));
    assert!(dump.ends_with("PC=00001004 FLAGS=----\n"));
}
