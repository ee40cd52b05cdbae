use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub trait Bus {
    fn read_u8(&mut self, addr: u32) -> Result<u8>;
    fn read_u32(&mut self, addr: u32) -> Result<u32>;
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<()>;
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<()>;

    fn read_bytes(&mut self, addr: u32, len: u32) -> Result<Vec<u8>> {
        (0..len).map(|i| self.read_u8(addr.wrapping_add(i))).collect()
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        for (i, b) in bytes.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), *b)?;
        }
        Ok(())
    }

    /// Fail unless every byte of `[addr, addr + len)` is mapped.
    fn ensure_range(&mut self, addr: u32, len: u32) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let Some(last) = addr.checked_add(len - 1) else {
            bail!("access of {len} byte(s) at {addr:#010x} wraps the address space");
        };
        self.read_u8(addr)?;
        self.read_u8(last)?;
        Ok(())
    }

    /// Set `len` bytes to `val`; nothing is written unless the whole range is mapped.
    fn fill(&mut self, addr: u32, len: u32, val: u8) -> Result<()> {
        self.ensure_range(addr, len)?;
        for i in 0..len {
            self.write_u8(addr.wrapping_add(i), val)?;
        }
        Ok(())
    }

    /// NUL-terminated string starting at `addr` (terminator excluded).
    fn read_cstr(&mut self, addr: u32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut a = addr;
        loop {
            let b = self.read_u8(a)?;
            if b == 0 {
                return Ok(out);
            }
            out.push(b);
            a = a.wrapping_add(1);
        }
    }
}

/// Flat little-endian byte array starting at address 0.
#[derive(Clone, Serialize, Deserialize)]
pub struct LinearMemory {
    pub mem: Vec<u8>,
}

impl LinearMemory {
    pub fn new(size: usize) -> Self {
        Self { mem: vec![0; size] }
    }

    pub fn size(&self) -> u32 {
        self.mem.len() as u32
    }

    fn range(&self, addr: u32, len: u32) -> Result<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.saturating_add(len as usize);
        if end > self.mem.len() || addr.checked_add(len).is_none() {
            bail!(
                "access of {len} byte(s) at {addr:#010x} outside memory of {:#x} bytes",
                self.mem.len()
            );
        }
        Ok(start..end)
    }

    pub fn slice(&self, addr: u32, len: u32) -> Result<&[u8]> {
        let r = self.range(addr, len)?;
        Ok(&self.mem[r])
    }

    /// Read without going through the mutable bus interface (debug views).
    pub fn peek_u32(&self, addr: u32) -> Option<u32> {
        let b = self.slice(addr, 4).ok()?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn load(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let r = self.range(addr, bytes.len() as u32)?;
        self.mem[r].copy_from_slice(bytes);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.mem.fill(0);
    }
}

impl std::fmt::Debug for LinearMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearMemory").field("size", &self.mem.len()).finish()
    }
}

impl Bus for LinearMemory {
    fn read_u8(&mut self, addr: u32) -> Result<u8> {
        let r = self.range(addr, 1)?;
        Ok(self.mem[r.start])
    }
    fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let b = self.slice(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn write_u8(&mut self, addr: u32, val: u8) -> Result<()> {
        let r = self.range(addr, 1)?;
        self.mem[r.start] = val;
        Ok(())
    }
    fn write_u32(&mut self, addr: u32, val: u32) -> Result<()> {
        let r = self.range(addr, 4)?;
        self.mem[r].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }
    fn ensure_range(&mut self, addr: u32, len: u32) -> Result<()> {
        self.range(addr, len).map(|_| ())
    }
    fn fill(&mut self, addr: u32, len: u32, val: u8) -> Result<()> {
        let r = self.range(addr, len)?;
        self.mem[r].fill(val);
        Ok(())
    }
}
