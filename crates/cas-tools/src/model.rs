use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use cas_rs::decoder::Decoder;
use cas_rs::disasm::fmt_with_symbols;
use cas_rs::isa::cas32::Cas32Decoder;
use cas_rs::Image;

/// Symbol file entry, as written by `casasm --symbols` and read by `casdis --symbols`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKV {
    pub addr: u32,
    pub name: String,
}

/// Reads a flat binary into an image placed at `origin`.
///
/// `skip` drops a prefix of the file and `len` caps what is kept after it.
pub fn load_bin(path: &Path, origin: u32, skip: usize, len: Option<usize>) -> Result<Image> {
    let file = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rest = file.get(skip..).context("--skip exceeds file size")?;
    let bytes = match len {
        Some(n) => rest.get(..n).context("--len exceeds remaining file size after skip")?,
        None => rest,
    };
    ensure!(u32::try_from(bytes.len()).is_ok(), "image does not fit a 32-bit address space");
    Ok(Image { origin, bytes: bytes.to_vec(), symbols: BTreeMap::new() })
}

/// First address and one-past-last address of `img`, wrapping at 2^32.
pub fn extent(img: &Image) -> (u32, u32) {
    let len = u32::try_from(img.bytes.len()).unwrap_or(u32::MAX);
    (img.origin, img.origin.wrapping_add(len))
}

/// Little-endian word at `addr`, if all four bytes lie inside the image.
pub fn word_at(img: &Image, addr: u32) -> Option<u32> {
    let off = addr.checked_sub(img.origin)? as usize;
    let b = img.bytes.get(off..off.checked_add(4)?)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// One disassembled word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub addr: u32,
    pub raw: u32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Linear sweep over `[start, end)`. Words that do not decode come out as `.word`.
pub fn disassemble(img: &Image, start: u32, end: u32, labels: &BTreeMap<u32, String>) -> Vec<Line> {
    let dec = Cas32Decoder::new();
    let mut out = Vec::new();
    let mut pc = start;
    while pc < end {
        let Some(raw) = word_at(img, pc) else { break };
        let text = match dec.decode(raw) {
            Some(d) => fmt_with_symbols(&d, |a| labels.get(&a).cloned()),
            None => format!(".word {raw:#010x}"),
        };
        out.push(Line { addr: pc, raw, text, label: labels.get(&pc).cloned() });
        match pc.checked_add(4) {
            Some(next) => pc = next,
            None => break,
        }
    }
    out
}
