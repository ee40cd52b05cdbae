//! Kernel services behind `SYSCALL`: `R0` holds the number, `R1..R3` the arguments,
//! and the result is written back to `R0`.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;

use crate::cpu::{Cpu, Trap};
use crate::memory::Bus;

pub const SYS_WRITE: u32 = 1;
pub const SYS_READ: u32 = 2;
pub const SYS_OPEN: u32 = 3;
pub const SYS_CLOSE: u32 = 4;
pub const SYS_EXIT: u32 = 5;
pub const SYS_ALLOC: u32 = 6;
pub const SYS_FREE: u32 = 7;
pub const SYS_FORK: u32 = 8;
pub const SYS_WAITPID: u32 = 9;
pub const SYS_CREATE_PROCESS: u32 = 10;
pub const SYS_GETTIME: u32 = 11;
pub const SYS_SLEEP: u32 = 12;
pub const SYS_RAND: u32 = 13;
pub const SYS_SQRT: u32 = 14;
pub const SYS_POW: u32 = 15;
pub const SYS_LOG: u32 = 16;
pub const SYS_EXP: u32 = 17;
pub const SYS_SIN: u32 = 18;
pub const SYS_COS: u32 = 19;
pub const SYS_TAN: u32 = 20;
pub const SYS_HASH: u32 = 21;
pub const SYS_CRC32: u32 = 22;
pub const SYS_STRLEN: u32 = 23;
pub const SYS_STRCMP: u32 = 24;
pub const SYS_MEMSET: u32 = 25;
pub const SYS_PRINTF: u32 = 26;
pub const SYS_GETPID: u32 = 27;

pub const HEAP_BASE: u32 = 0x2_0000;
pub const HEAP_END: u32 = 0x8_0000;

/// Everything the kernel needs from the outside world.
pub trait Host {
    fn now_ms(&mut self) -> u64;
    fn sleep_ms(&mut self, ms: u64);
    fn next_random(&mut self) -> u32;
    /// Write to stdout (fd 1) or stderr (fd 2).
    fn write(&mut self, fd: u32, bytes: &[u8]);
    /// Read from stdin; returns the number of bytes filled.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// Real clock, real stdio, sleeps bounded by `max_sleep_ms`.
pub struct SystemHost {
    start: Instant,
    rng: StdRng,
    max_sleep_ms: u64,
}

impl SystemHost {
    pub fn new(max_sleep_ms: u64) -> Self {
        Self { start: Instant::now(), rng: StdRng::from_entropy(), max_sleep_ms }
    }
}

impl Host for SystemHost {
    fn now_ms(&mut self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
    fn sleep_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms.min(self.max_sleep_ms)));
    }
    fn next_random(&mut self) -> u32 {
        self.rng.gen::<u32>()
    }
    fn write(&mut self, fd: u32, bytes: &[u8]) {
        let _ = if fd == 2 {
            std::io::stderr().write_all(bytes)
        } else {
            let mut out = std::io::stdout();
            out.write_all(bytes).and_then(|_| out.flush())
        };
    }
    fn read(&mut self, buf: &mut [u8]) -> usize {
        std::io::stdin().read(buf).unwrap_or(0)
    }
}

/// Deterministic host: virtual clock advanced only by `sleep`, seeded generator,
/// captured output and scripted input.
#[derive(Debug, Clone)]
pub struct VirtualHost {
    pub clock_ms: u64,
    pub rng: StdRng,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdin: VecDeque<u8>,
}

impl VirtualHost {
    pub fn new(seed: u32) -> Self {
        Self {
            clock_ms: 0,
            rng: StdRng::seed_from_u64(u64::from(seed)),
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdin: VecDeque::new(),
        }
    }

    pub fn with_input(mut self, input: &[u8]) -> Self {
        self.stdin.extend(input);
        self
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

impl Default for VirtualHost {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Host for VirtualHost {
    fn now_ms(&mut self) -> u64 {
        self.clock_ms
    }
    fn sleep_ms(&mut self, ms: u64) {
        self.clock_ms += ms;
    }
    fn next_random(&mut self) -> u32 {
        self.rng.gen::<u32>()
    }
    fn write(&mut self, fd: u32, bytes: &[u8]) {
        if fd == 2 {
            self.stderr.extend_from_slice(bytes);
        } else {
            self.stdout.extend_from_slice(bytes);
        }
    }
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.stdin.len());
        for (slot, b) in buf.iter_mut().zip(self.stdin.drain(..n)) {
            *slot = b;
        }
        n
    }
}

/// First-fit allocator over `[base, end)`; blocks are 4-byte aligned.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    free: BTreeMap<u32, u32>,
    used: BTreeMap<u32, u32>,
}

impl Heap {
    pub fn new(base: u32, end: u32) -> Self {
        let mut free = BTreeMap::new();
        if end > base {
            free.insert(base, end - base);
        }
        Self { free, used: BTreeMap::new() }
    }

    pub fn alloc(&mut self, size: u32) -> Option<u32> {
        if size == 0 {
            return None;
        }
        let size = size.checked_add(3)? & !3;
        let (&addr, &len) = self.free.iter().find(|(_, &len)| len >= size)?;
        self.free.remove(&addr);
        if len > size {
            self.free.insert(addr + size, len - size);
        }
        self.used.insert(addr, size);
        Some(addr)
    }

    pub fn free(&mut self, addr: u32) -> bool {
        let Some(size) = self.used.remove(&addr) else {
            return false;
        };
        let (mut start, mut len) = (addr, size);
        if let Some(next) = self.free.remove(&(addr + size)) {
            len += next;
        }
        if let Some((&prev, &plen)) = self.free.range(..addr).next_back() {
            if prev + plen == addr {
                self.free.remove(&prev);
                start = prev;
                len += plen;
            }
        }
        self.free.insert(start, len);
        true
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    pos: usize,
    mode: Mode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProcState {
    Ready,
    Exited(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Process {
    pub pid: u32,
    pub name: String,
    pub entry: u32,
    pub mem: u32,
    pub state: ProcState,
}

/// Result of a serviced syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysOutcome {
    Continue,
    Exit(i32),
}

pub struct Kernel<H> {
    pub host: H,
    pub heap: Heap,
    files: BTreeMap<String, Vec<u8>>,
    fds: BTreeMap<u32, OpenFile>,
    next_fd: u32,
    procs: BTreeMap<u32, Process>,
    next_pid: u32,
}

const PID_SELF: u32 = 1;

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in bytes {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// CRC-32 (IEEE 802.3, reflected, polynomial 0xEDB88320).
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = !0u32;
    for b in bytes {
        crc ^= *b as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
        }
    }
    !crc
}

pub fn isqrt(x: i32) -> i32 {
    if x <= 0 {
        return 0;
    }
    let mut r = (x as f64).sqrt() as i64;
    while r * r > x as i64 {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= x as i64 {
        r += 1;
    }
    r as i32
}

pub fn ipow(base: i32, exp: i32) -> i32 {
    if exp < 0 {
        return 0;
    }
    base.wrapping_pow(exp as u32)
}

pub fn ilog(x: i32) -> i32 {
    if x <= 0 {
        return -1;
    }
    (x as f64).ln().floor() as i32
}

pub fn iexp(x: i32) -> i32 {
    if x < 0 {
        return 0;
    }
    (x as f64).exp().floor() as i32
}

/// Trigonometry on integer degrees, result scaled by 256 and truncated.
pub fn trig(num: u32, deg: i32) -> i32 {
    let r = (deg as f64).to_radians();
    let f = match num {
        SYS_SIN => r.sin(),
        SYS_COS => r.cos(),
        _ => r.tan(),
    };
    (f * 256.0) as i32
}

/// `%d %u %x %c %s %%` over at most two integer arguments.
fn format_printf<B: Bus>(bus: &mut B, fmt: &[u8], args: [u32; 2]) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut next = args.iter();
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        if c != b'%' || i + 1 == fmt.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let spec = fmt[i + 1];
        i += 2;
        match spec {
            b'%' => out.push(b'%'),
            b'd' | b'u' | b'x' | b'c' | b's' => {
                let v = next.next().copied().unwrap_or(0);
                match spec {
                    b'd' => out.extend_from_slice((v as i32).to_string().as_bytes()),
                    b'u' => out.extend_from_slice(v.to_string().as_bytes()),
                    b'x' => out.extend_from_slice(format!("{v:x}").as_bytes()),
                    b'c' => out.push(v as u8),
                    _ => out.extend_from_slice(&bus.read_cstr(v)?),
                }
            }
            other => {
                out.push(b'%');
                out.push(other);
            }
        }
    }
    Ok(out)
}

impl<H: Host> Kernel<H> {
    pub fn new(host: H, heap_end: u32) -> Self {
        let mut procs = BTreeMap::new();
        procs.insert(
            PID_SELF,
            Process { pid: PID_SELF, name: "main".into(), entry: 0, mem: 0, state: ProcState::Ready },
        );
        Self {
            host,
            heap: Heap::new(HEAP_BASE, heap_end.min(HEAP_END)),
            files: BTreeMap::new(),
            fds: BTreeMap::new(),
            next_fd: 3,
            procs,
            next_pid: PID_SELF + 1,
        }
    }

    /// Make a file visible to `open`.
    pub fn add_file(&mut self, path: &str, contents: &[u8]) {
        self.files.insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.procs.values()
    }

    fn spawn(&mut self, name: String, entry: u32, mem: u32, state: ProcState) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.procs.insert(pid, Process { pid, name, entry, mem, state });
        pid
    }

    fn open(&mut self, path: String, mode: u32) -> i32 {
        let (mode, pos) = match mode {
            0 => match self.files.get(&path) {
                Some(_) => (Mode::Read, 0),
                None => return -1,
            },
            1 => {
                self.files.insert(path.clone(), Vec::new());
                (Mode::Write, 0)
            }
            2 => (Mode::Write, self.files.entry(path.clone()).or_default().len()),
            _ => return -1,
        };
        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(fd, OpenFile { path, pos, mode });
        fd as i32
    }

    fn write_fd(&mut self, fd: u32, bytes: &[u8]) -> i32 {
        if fd == 1 || fd == 2 {
            self.host.write(fd, bytes);
            return bytes.len() as i32;
        }
        let Some(f) = self.fds.get_mut(&fd) else { return -1 };
        if f.mode != Mode::Write {
            return -1;
        }
        let data = self.files.entry(f.path.clone()).or_default();
        let end = f.pos + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[f.pos..end].copy_from_slice(bytes);
        f.pos = end;
        bytes.len() as i32
    }

    fn read_fd(&mut self, fd: u32, len: usize) -> Option<Vec<u8>> {
        if fd == 0 {
            let mut buf = vec![0; len];
            let n = self.host.read(&mut buf);
            buf.truncate(n);
            return Some(buf);
        }
        let f = self.fds.get_mut(&fd)?;
        if f.mode != Mode::Read {
            return None;
        }
        let data = self.files.get(&f.path)?;
        let start = f.pos.min(data.len());
        let end = (start + len).min(data.len());
        f.pos = end;
        Some(data[start..end].to_vec())
    }

    /// Service the syscall whose number is in `R0`.
    pub fn dispatch<B: Bus>(&mut self, cpu: &mut Cpu, bus: &mut B, pc: u32) -> Result<SysOutcome, Trap> {
        let num = cpu.gpr[0];
        let [a, b, c] = [cpu.gpr[1], cpu.gpr[2], cpu.gpr[3]];
        debug!(num, a, b, c, pc = format_args!("{pc:#010x}"), "syscall");
        let mem_err = |addr: u32| {
            move |source| Trap::Bus { pc, addr, insn: format!("SYSCALL {num}"), source }
        };

        let ret: i32 = match num {
            SYS_WRITE => {
                bus.ensure_range(b, c).map_err(mem_err(b))?;
                let bytes = bus.read_bytes(b, c).map_err(mem_err(b))?;
                self.write_fd(a, &bytes)
            }
            SYS_READ => {
                bus.ensure_range(b, c).map_err(mem_err(b))?;
                match self.read_fd(a, c as usize) {
                    Some(bytes) => {
                        bus.write_bytes(b, &bytes).map_err(mem_err(b))?;
                        bytes.len() as i32
                    }
                    None => -1,
                }
            }
            SYS_OPEN => {
                let path = bus.read_cstr(a).map_err(mem_err(a))?;
                self.open(String::from_utf8_lossy(&path).into_owned(), b)
            }
            SYS_CLOSE => {
                if self.fds.remove(&a).is_some() {
                    0
                } else {
                    -1
                }
            }
            SYS_EXIT => {
                let code = a as i32;
                if let Some(p) = self.procs.get_mut(&PID_SELF) {
                    p.state = ProcState::Exited(code);
                }
                return Ok(SysOutcome::Exit(code));
            }
            SYS_ALLOC => self.heap.alloc(a).unwrap_or(0) as i32,
            SYS_FREE => {
                if self.heap.free(a) {
                    0
                } else {
                    -1
                }
            }
            SYS_FORK => self.spawn("child".into(), cpu.pc(), 0, ProcState::Exited(0)) as i32,
            SYS_WAITPID => match self.procs.get(&a).map(|p| p.state.clone()) {
                Some(ProcState::Exited(code)) if a != PID_SELF => {
                    self.procs.remove(&a);
                    code
                }
                _ => -1,
            },
            SYS_CREATE_PROCESS => {
                let name = bus.read_cstr(a).map_err(mem_err(a))?;
                let name = String::from_utf8_lossy(&name).into_owned();
                self.spawn(name, b, c, ProcState::Ready) as i32
            }
            SYS_GETPID => PID_SELF as i32,
            SYS_GETTIME => self.host.now_ms() as u32 as i32,
            SYS_SLEEP => {
                self.host.sleep_ms(a as u64);
                0
            }
            SYS_RAND => self.host.next_random() as i32,
            SYS_SQRT => isqrt(a as i32),
            SYS_POW => ipow(a as i32, b as i32),
            SYS_LOG => ilog(a as i32),
            SYS_EXP => iexp(a as i32),
            SYS_SIN | SYS_COS | SYS_TAN => trig(num, a as i32),
            SYS_HASH => fnv1a(&bus.read_bytes(a, b).map_err(mem_err(a))?) as i32,
            SYS_CRC32 => crc32(&bus.read_bytes(a, b).map_err(mem_err(a))?) as i32,
            SYS_STRLEN => bus.read_cstr(a).map_err(mem_err(a))?.len() as i32,
            SYS_STRCMP => {
                let x = bus.read_cstr(a).map_err(mem_err(a))?;
                let y = bus.read_cstr(b).map_err(mem_err(b))?;
                match x.cmp(&y) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }
            }
            SYS_MEMSET => {
                bus.fill(a, c, b as u8).map_err(mem_err(a))?;
                a as i32
            }
            SYS_PRINTF => {
                let fmt = bus.read_cstr(a).map_err(mem_err(a))?;
                let out = format_printf(bus, &fmt, [b, c]).map_err(mem_err(a))?;
                self.host.write(1, &out);
                out.len() as i32
            }
            _ => return Err(Trap::UnknownSyscall { pc, num }),
        };
        cpu.gpr[0] = ret as u32;
        Ok(SysOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_first_fit_and_coalesce() {
        let mut h = Heap::new(0x100, 0x200);
        let a = h.alloc(16).unwrap();
        let b = h.alloc(5).unwrap();
        assert_eq!(a, 0x100);
        assert_eq!(b, 0x110);
        assert!(h.free(a));
        assert!(!h.free(a));
        // the hole at 0x100 is reused first
        assert_eq!(h.alloc(8), Some(0x100));
        assert!(h.free(0x100));
        assert!(h.free(b));
        // everything merged back into one block
        assert_eq!(h.alloc(0x100), Some(0x100));
        assert_eq!(h.alloc(4), None);
    }

    #[test]
    fn crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
    }

    #[test]
    fn integer_math() {
        assert_eq!(isqrt(99), 9);
        assert_eq!(isqrt(100), 10);
        assert_eq!(isqrt(-4), 0);
        assert_eq!(ipow(2, 10), 1024);
        assert_eq!(ipow(2, -1), 0);
        assert_eq!(ilog(1), 0);
        assert_eq!(ilog(8), 2);
        assert_eq!(ilog(0), -1);
        assert_eq!(iexp(2), 7);
        assert_eq!(iexp(100), i32::MAX);
        assert_eq!(trig(SYS_SIN, 90), 256);
        assert_eq!(trig(SYS_COS, 0), 256);
        assert_eq!(trig(SYS_SIN, 0), 0);
        assert_eq!(trig(SYS_SIN, -90), -256);
    }
}
