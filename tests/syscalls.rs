use pretty_assertions::assert_eq;

use cas_rs::syscall::{SYS_ALLOC, SYS_FREE, HEAP_BASE};
use cas_rs::{assemble, CpuConfig, Emulator, Exit, ExitReason, Trap, VirtualHost};

fn machine(src: &str, seed: u32) -> Emulator<VirtualHost> {
    let img = assemble(src).unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(seed));
    emu.load_image(&img).unwrap();
    emu
}

fn run(src: &str) -> (Emulator<VirtualHost>, Exit) {
    let mut emu = machine(src, 7);
    let exit = emu.run().unwrap();
    (emu, exit)
}

const RANDOMS: &str = "
    LOADI R0, 13
    SYSCALL
    MOV R4, R0
    LOADI R0, 13
    SYSCALL
    MOV R5, R0
    HALT
";

#[test]
fn random_numbers_follow_the_seed() {
    let a = machine(RANDOMS, 99).run().unwrap();
    let b = machine(RANDOMS, 99).run().unwrap();
    let c = machine(RANDOMS, 100).run().unwrap();
    assert_eq!(a.regs[4..6], b.regs[4..6]);
    assert_ne!(a.regs[4], a.regs[5]);
    assert_ne!(a.regs[4..6], c.regs[4..6]);
}

#[test]
fn exit_syscall_sets_the_code() {
    let (_, exit) = run("LOADI R0, 5\nLOADI R1, -3\nSYSCALL\nLOADI R0, 9\nHALT");
    assert_eq!(exit.code, -3);
    assert_eq!(exit.reason, ExitReason::ExitSyscall);
    assert_eq!(exit.steps, 3);
}

#[test]
fn write_to_stdout_and_stderr() {
    let (emu, _) = run(
        "
    LOADI R0, 1
    LOADI R1, 1
    LOADI R2, msg
    LOADI R3, 3
    SYSCALL
    MOV R4, R0
    LOADI R0, 1
    LOADI R1, 2
    LOADI R2, msg
    LOADI R3, 2
    SYSCALL
    HALT
msg: .string \"abc\"
",
    );
    assert_eq!(emu.kernel.host.stdout_str(), "abc");
    assert_eq!(emu.kernel.host.stderr, b"ab");
    assert_eq!(emu.cpu.gpr[4], 3);
}

#[test]
fn files_open_write_and_read_back() {
    let (emu, exit) = run(
        "
    LOADI R0, 3         ; open(path, write)
    LOADI R1, path
    LOADI R2, 1
    SYSCALL
    MOV R4, R0
    LOADI R0, 1         ; write(fd, data, 5)
    MOV R1, R4
    LOADI R2, data
    LOADI R3, 5
    SYSCALL
    LOADI R0, 4         ; close
    MOV R1, R4
    SYSCALL
    LOADI R0, 3         ; open(path, read)
    LOADI R1, path
    LOADI R2, 0
    SYSCALL
    MOV R5, R0
    LOADI R0, 2         ; read(fd, 0x7000, 16)
    MOV R1, R5
    LOADI R2, 0x7000
    LOADI R3, 16
    SYSCALL
    HALT
path: .string \"out.txt\"
data: .string \"hello\"
",
    );
    assert_eq!(emu.kernel.file("out.txt"), Some(&b"hello"[..]));
    assert_eq!(exit.code, 5);
    assert_eq!(exit.regs[4], 3);
    assert_eq!(exit.regs[5], 4);
    assert_eq!(emu.mem.slice(0x7000, 5).unwrap(), b"hello");
}

#[test]
fn opening_a_missing_file_for_reading_fails() {
    let (_, exit) = run("LOADI R0, 3\nLOADI R1, p\nLOADI R2, 0\nSYSCALL\nHALT\np: .string \"nope\"");
    assert_eq!(exit.code, -1);
}

#[test]
fn stdin_is_scripted() {
    let img = assemble("LOADI R0, 2\nLOADI R1, 0\nLOADI R2, 0x7000\nLOADI R3, 8\nSYSCALL\nHALT").unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1).with_input(b"xyz"));
    emu.load_image(&img).unwrap();
    assert_eq!(emu.run().unwrap().code, 3);
    assert_eq!(emu.mem.slice(0x7000, 3).unwrap(), b"xyz");
}

#[test]
fn heap_allocations_are_reused_after_free() {
    let src = format!(
        "
    LOADI R0, {SYS_ALLOC}
    LOADI R1, 10
    SYSCALL
    MOV R4, R0
    LOADI R0, {SYS_ALLOC}
    LOADI R1, 4
    SYSCALL
    MOV R5, R0
    LOADI R0, {SYS_FREE}
    MOV R1, R4
    SYSCALL
    MOV R6, R0
    LOADI R0, {SYS_FREE}
    MOV R1, R4
    SYSCALL
    MOV R7, R0
    LOADI R0, {SYS_ALLOC}
    LOADI R1, 8
    SYSCALL
    HALT
"
    );
    let (_, exit) = run(&src);
    assert_eq!(exit.regs[4], HEAP_BASE);
    assert_eq!(exit.regs[5], HEAP_BASE + 12);
    assert_eq!(exit.regs[6], 0);
    assert_eq!(exit.regs[7] as i32, -1, "double free is rejected");
    assert_eq!(exit.code as u32, HEAP_BASE);
}

#[test]
fn sleep_advances_the_virtual_clock() {
    let (emu, exit) = run(
        "
    LOADI R0, 12
    LOADI R1, 250
    SYSCALL
    LOADI R0, 11
    SYSCALL
    HALT
",
    );
    assert_eq!(exit.code, 250);
    assert_eq!(emu.kernel.host.clock_ms, 250);
}

#[test]
fn getpid_and_math_services() {
    let (_, exit) = run(
        "
    LOADI R0, 27
    SYSCALL
    MOV R4, R0
    LOADI R0, 14
    LOADI R1, 50
    SYSCALL
    MOV R5, R0
    LOADI R0, 15
    LOADI R1, 3
    LOADI R2, 4
    SYSCALL
    MOV R6, R0
    LOADI R0, 23
    LOADI R1, s
    SYSCALL
    HALT
s: .string \"seven!!\"
",
    );
    assert_eq!(exit.regs[4], 1);
    assert_eq!(exit.regs[5], 7);
    assert_eq!(exit.regs[6], 81);
    assert_eq!(exit.code, 7);
}

#[test]
fn printf_formats_its_arguments() {
    let (emu, _) = run(
        "
    LOADI R0, 26
    LOADI R1, fmt
    LOADI R2, 255
    LOADI R3, name
    SYSCALL
    HALT
fmt: .string \"%x %s 100%%\\n\"
name: .string \"ok\"
",
    );
    assert_eq!(emu.kernel.host.stdout_str(), "ff ok 100%\n");
}

#[test]
fn unknown_syscall_traps() {
    let mut emu = machine("NOP\nLOADI R0, 200\nSYSCALL\nHALT", 1);
    match emu.run() {
        Err(Trap::UnknownSyscall { pc, num }) => {
            assert_eq!(pc, 0x1008);
            assert_eq!(num, 200);
        }
        other => panic!("expected an unknown-syscall trap, got {other:?}"),
    }
}

#[test]
fn process_table_records_children() {
    let (emu, exit) = run(
        "
    LOADI R0, 8         ; fork
    SYSCALL
    MOV R4, R0
    LOADI R0, 9         ; waitpid(child)
    MOV R1, R4
    SYSCALL
    MOV R5, R0
    LOADI R0, 9         ; already reaped
    MOV R1, R4
    SYSCALL
    MOV R6, R0
    LOADI R0, 10        ; create-process(name, entry, mem)
    LOADI R1, name
    LOADI R2, 0x2000
    LOADI R3, 4096
    SYSCALL
    HALT
name: .string \"worker\"
",
    );
    assert_eq!(exit.regs[4], 2);
    assert_eq!(exit.regs[5], 0);
    assert_eq!(exit.regs[6] as i32, -1);
    assert_eq!(exit.code, 3);
    let worker = emu.kernel.processes().find(|p| p.pid == 3).unwrap();
    assert_eq!((worker.name.as_str(), worker.entry, worker.mem), ("worker", 0x2000, 4096));
}

#[test]
fn string_and_checksum_services() {
    let (emu, exit) = run(
        "
    LOADI R0, 22        ; crc32
    LOADI R1, digits
    LOADI R2, 9
    SYSCALL
    MOV R4, R0
    LOADI R0, 24        ; strcmp
    LOADI R1, abc
    LOADI R2, abd
    SYSCALL
    MOV R5, R0
    LOADI R0, 25        ; memset
    LOADI R1, 0x7000
    LOADI R2, 0x2a
    LOADI R3, 3
    SYSCALL
    HALT
digits: .string \"123456789\"
abc: .string \"abc\"
abd: .string \"abd\"
",
    );
    assert_eq!(exit.regs[4], 0xCBF4_3926);
    assert_eq!(exit.regs[5] as i32, -1);
    assert_eq!(exit.code, 0x7000);
    assert_eq!(emu.mem.slice(0x7000, 4).unwrap(), &[0x2a, 0x2a, 0x2a, 0]);
}

#[test]
fn memset_out_of_range_traps_without_writing() {
    let src = "
    LOADI R0, 25
    LOADI R1, 0x6000
    LOADI R2, 0x41
    LOADI R3, -1        ; 0xFFFFFFFF bytes
    SYSCALL
    HALT
";
    let mut emu = machine(src, 1);
    match emu.run() {
        Err(Trap::Bus { pc, addr, .. }) => {
            assert_eq!(pc, 0x1010);
            assert_eq!(addr, 0x6000);
        }
        other => panic!("expected a bus trap, got {other:?}"),
    }
    assert_eq!(emu.mem.slice(0x6000, 4).unwrap(), &[0, 0, 0, 0]);
}

#[test]
fn read_into_an_unmapped_buffer_traps() {
    let img = assemble("LOADI R0, 2\nLOADI R1, 0\nLOADI R2, 0x7000\nLOADI R3, -1\nSYSCALL\nHALT").unwrap();
    let mut emu = Emulator::with_host(CpuConfig::default(), VirtualHost::new(1).with_input(b"abc"));
    emu.load_image(&img).unwrap();
    assert!(matches!(emu.run(), Err(Trap::Bus { addr: 0x7000, .. })));
    assert_eq!(emu.kernel.host.stdin.len(), 3, "stdin is left untouched");
}
