use cas_rs::decoder::{Decoder, Op};
use cas_rs::isa::cas32::{encode, Cas32Decoder};
use cas_rs::{assemble, CpuConfig, Emulator, VirtualHost};

#[test]
fn register_indirect_offsets_are_signed() {
    let dec = Cas32Decoder::new();
    let d = dec.decode(encode(Op::LoadR, 1, 13, (-8i16) as u16)).unwrap();
    assert_eq!((d.op, d.rd, d.rs), (Op::LoadR, 1, 13));
    assert_eq!(d.imm as i32, -8);
}

#[test]
fn absolute_addresses_are_unsigned() {
    let dec = Cas32Decoder::new();
    let d = dec.decode(encode(Op::Load, 2, 0, 0xFFF0)).unwrap();
    assert_eq!(d.imm, 0xFFF0);
}

#[test]
fn every_addressing_mode_reaches_the_same_cell() {
    let img = assemble(
        "
    LOADI R1, 1234
    STORE R1, 0x6010        ; absolute
    LOADI R13, 0x6000
    LOAD R2, [R13+16]       ; base + offset
    LOADI R13, 0x6020
    LOAD R3, [R13-16]       ; base - offset
    LOADI R13, 0x6010
    LOAD R4, [R13]          ; base only
    LOAD R5, value          ; label as address
    HALT
    .org 0x1100
value: .word 77
",
    )
    .unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1));
    emu.load_image(&img).unwrap();
    emu.run().unwrap();
    assert_eq!(&emu.cpu.gpr[2..=5], &[1234, 1234, 1234, 77]);
}
