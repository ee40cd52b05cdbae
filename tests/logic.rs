use cas_rs::cpu::Flags;
use cas_rs::decoder::Op;
use cas_rs::exec::IntExecutor;
use cas_rs::isa::cas32::{encode, Cas32Decoder};
use cas_rs::{Bus, Cpu, CpuConfig, LinearMemory};

/// Execute one instruction at 0x1000 after `setup` has seeded registers.
fn exec_one(word: u32, setup: impl FnOnce(&mut Cpu)) -> Cpu {
    let cfg = CpuConfig::default();
    let mut mem = LinearMemory::new(cfg.mem_size);
    let mut cpu = Cpu::new(cfg);
    cpu.reset(0x1000);
    setup(&mut cpu);
    mem.write_u32(0x1000, word).unwrap();
    cpu.step(&mut mem, &Cas32Decoder::new(), &IntExecutor).unwrap();
    cpu
}

#[test]
fn and_or_xor_not() {
    let set = |c: &mut Cpu| {
        c.gpr[1] = 0b1100;
        c.gpr[2] = 0b1010;
    };
    assert_eq!(exec_one(encode(Op::And, 1, 2, 0), set).gpr[1], 0b1000);
    assert_eq!(exec_one(encode(Op::Or, 1, 2, 0), set).gpr[1], 0b1110);
    assert_eq!(exec_one(encode(Op::Xor, 1, 2, 0), set).gpr[1], 0b0110);
    let cpu = exec_one(encode(Op::Not, 1, 0, 0), set);
    assert_eq!(cpu.gpr[1], !0b1100);
    assert!(cpu.flags.contains(Flags::N));
}

#[test]
fn immediate_logic_zero_extends() {
    let cpu = exec_one(encode(Op::OrI, 3, 0, 0x8001), |c| c.gpr[3] = 0xFFFF_0000);
    assert_eq!(cpu.gpr[3], 0xFFFF_8001);
    let cpu = exec_one(encode(Op::AndI, 3, 0, 0x00FF), |c| c.gpr[3] = 0x1234_5678);
    assert_eq!(cpu.gpr[3], 0x78);
}

#[test]
fn shifts_mask_the_amount() {
    let cpu = exec_one(encode(Op::Shl, 1, 2, 0), |c| {
        c.gpr[1] = 1;
        c.gpr[2] = 33;
    });
    assert_eq!(cpu.gpr[1], 2);
    let cpu = exec_one(encode(Op::Shr, 1, 2, 0), |c| {
        c.gpr[1] = 0x8000_0000;
        c.gpr[2] = 31;
    });
    assert_eq!(cpu.gpr[1], 1);
    let cpu = exec_one(encode(Op::Sar, 1, 2, 0), |c| {
        c.gpr[1] = 0x8000_0000;
        c.gpr[2] = 31;
    });
    assert_eq!(cpu.gpr[1], 0xFFFF_FFFF);
    assert_eq!(exec_one(encode(Op::ShlI, 5, 0, 16), |c| c.gpr[5] = 0x1234).gpr[5], 0x1234_0000);
}

#[test]
fn rotates() {
    let cpu = exec_one(encode(Op::Rol, 1, 2, 0), |c| {
        c.gpr[1] = 0x8000_0001;
        c.gpr[2] = 4;
    });
    assert_eq!(cpu.gpr[1], 0x0000_0018);
    let cpu = exec_one(encode(Op::Ror, 1, 2, 0), |c| {
        c.gpr[1] = 0x0000_0018;
        c.gpr[2] = 4;
    });
    assert_eq!(cpu.gpr[1], 0x8000_0001);
}

#[test]
fn test_sets_zero_and_clears_carry() {
    let cpu = exec_one(encode(Op::Test, 1, 2, 0), |c| {
        c.gpr[1] = 0b0101;
        c.gpr[2] = 0b1010;
        c.flags = Flags::C | Flags::V;
    });
    assert_eq!(cpu.flags, Flags::Z);
    assert_eq!(cpu.gpr[1], 0b0101);
}

#[test]
fn add_sets_carry_and_overflow() {
    let cpu = exec_one(encode(Op::Add, 1, 2, 0), |c| {
        c.gpr[1] = 0x7FFF_FFFF;
        c.gpr[2] = 1;
    });
    assert_eq!(cpu.gpr[1], 0x8000_0000);
    assert_eq!(cpu.flags, Flags::N | Flags::V);
    let cpu = exec_one(encode(Op::Add, 1, 2, 0), |c| {
        c.gpr[1] = 0xFFFF_FFFF;
        c.gpr[2] = 1;
    });
    assert_eq!(cpu.flags, Flags::Z | Flags::C);
}

#[test]
fn signed_division_and_modulo() {
    let set = |c: &mut Cpu| {
        c.gpr[1] = (-7i32) as u32;
        c.gpr[2] = 2;
    };
    assert_eq!(exec_one(encode(Op::Div, 1, 2, 0), set).gpr[1] as i32, -3);
    assert_eq!(exec_one(encode(Op::Mod, 1, 2, 0), set).gpr[1] as i32, -1);
}

#[test]
fn fmul_multiplies_f32_bits() {
    let cpu = exec_one(encode(Op::Fmul, 1, 2, 0), |c| {
        c.gpr[1] = 1.5f32.to_bits();
        c.gpr[2] = (-4.0f32).to_bits();
    });
    assert_eq!(f32::from_bits(cpu.gpr[1]), -6.0);
}
