use num_traits::Num;
use std::ops::Neg;

/// Parse a decimal, `0x` hex or `0b` binary literal with an optional leading `-`.
pub fn parse_int<T: Num + Neg<Output = T>>(s: &str) -> Option<T> {
    let s = s.trim();
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (radix, digits) = if let Some(h) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (16, h)
    } else if let Some(b) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        (2, b)
    } else {
        (10, body)
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let v = T::from_str_radix(digits, radix).ok()?;
    Some(if neg { -v } else { v })
}

/// Address-style literal for command-line arguments.
pub fn parse_u32(s: &str) -> Option<u32> {
    parse_int::<i64>(s).and_then(|v| u32::try_from(v).ok())
}
