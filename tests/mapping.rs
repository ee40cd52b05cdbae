use std::collections::HashSet;

use cas_rs::decoder::Op;
use cas_rs::instructions::{by_mnemonic, by_opcode, desc, FlagEffect, Shape, TABLE};

#[test]
fn every_row_round_trips_through_its_opcode() {
    let mut seen = HashSet::new();
    for row in TABLE {
        assert!(seen.insert(row.op as u8), "duplicate opcode {:#04x}", row.op as u8);
        let back = by_opcode(row.op as u8).expect("opcode is registered");
        assert_eq!(back.op, row.op);
        assert_eq!(Op::from_byte(row.op as u8), Some(row.op));
        assert_eq!(desc(row.op).mnemonic, back.mnemonic);
    }
}

#[test]
fn load_and_store_share_mnemonics_across_addressing_modes() {
    for mn in ["LOAD", "STORE", "LOADB", "STOREB"] {
        let shapes: Vec<Shape> = by_mnemonic(mn).map(|d| d.shape).collect();
        assert_eq!(shapes, vec![Shape::RegAddr, Shape::RegMem], "{mn}");
    }
    assert_eq!(by_mnemonic("add").count(), 1);
    assert_eq!(by_mnemonic("nope").count(), 0);
}

#[test]
fn flag_effects() {
    assert_eq!(desc(Op::Cmp).flags, FlagEffect::ZNCV);
    assert_eq!(desc(Op::Test).flags, FlagEffect::ZNClearCV);
    assert_eq!(desc(Op::Mov).flags, FlagEffect::None);
    assert_eq!(desc(Op::Popf).flags, FlagEffect::Restore);
    assert_eq!(Op::from_byte(0xFF), None);
}
