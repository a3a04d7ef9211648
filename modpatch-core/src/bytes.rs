use std::fmt;

use crate::memory::TokenStore;
use crate::value::{Resolver, ValueExpr};
use crate::{PatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
}

impl Width {
    pub fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }

    /// `u8:` / `u16:` / `u32:` prefix, case-insensitive.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "u8" => Some(Width::U8),
            "u16" => Some(Width::U16),
            "u32" => Some(Width::U32),
            _ => None,
        }
    }
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.bytes() * 8)
    }
}

/// Overwrite `width` bytes at `offset` with `value`.
///
/// Negative values are written two's-complement, so anything from the
/// signed minimum to the unsigned maximum of the width is accepted.
pub fn patch_bytes(buf: &mut [u8], offset: usize, width: Width, value: i64) -> Result<()> {
    let n = width.bytes();
    let end = offset
        .checked_add(n)
        .filter(|&end| end <= buf.len())
        .ok_or(PatchError::Bounds {
            offset,
            width: n,
            len: buf.len(),
        })?;

    let bits = (n * 8) as u32;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    if value < min || value > max {
        return Err(PatchError::invalid(value.to_string(), format!("{width} value")));
    }

    let be = value.to_be_bytes();
    buf[offset..end].copy_from_slice(&be[8 - n..]);
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BytePatch {
    pub offset: usize,
    pub width: Width,
    pub value: ValueExpr,
}

impl BytePatch {
    pub fn apply(&self, buf: &mut [u8], tokens: &TokenStore) -> Result<()> {
        let value = Resolver::plain(tokens).resolve_int(&self.value)?;
        patch_bytes(buf, self.offset, self.width, value)?;
        log::debug!("{:#x} <- {} {value}", self.offset, self.width);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryValue;

    #[test]
    fn writes_big_endian() {
        let mut buf = vec![0u8; 8];
        patch_bytes(&mut buf, 1, Width::U16, 0x1234).unwrap();
        patch_bytes(&mut buf, 4, Width::U32, 0x0A0B_0C0D).unwrap();
        patch_bytes(&mut buf, 0, Width::U8, 0xFF).unwrap();
        assert_eq!(buf, [0xFF, 0x12, 0x34, 0, 0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn negative_values_are_twos_complement() {
        let mut buf = vec![0u8; 4];
        patch_bytes(&mut buf, 0, Width::U32, -1).unwrap();
        assert_eq!(buf, [0xFF; 4]);
        patch_bytes(&mut buf, 0, Width::U16, -2).unwrap();
        assert_eq!(buf, [0xFF, 0xFE, 0xFF, 0xFF]);
    }

    #[test]
    fn never_writes_past_the_end() {
        let mut buf = vec![0u8; 4];
        let err = patch_bytes(&mut buf, 2, Width::U32, 1).unwrap_err();
        assert!(matches!(
            err,
            PatchError::Bounds {
                offset: 2,
                width: 4,
                len: 4
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(buf, [0; 4]);
        assert!(patch_bytes(&mut buf, usize::MAX, Width::U8, 1).is_err());
    }

    #[test]
    fn rejects_values_wider_than_the_field() {
        let mut buf = vec![0u8; 2];
        assert!(patch_bytes(&mut buf, 0, Width::U8, 256).is_err());
        assert!(patch_bytes(&mut buf, 0, Width::U8, -129).is_err());
        assert!(patch_bytes(&mut buf, 0, Width::U16, 65_535).is_ok());
    }

    #[test]
    fn resolves_tokens() {
        let mut tokens = TokenStore::new();
        tokens.set_memory(3, MemoryValue::Text("0x2A".to_string())).unwrap();
        let mut buf = vec![0u8; 4];
        BytePatch {
            offset: 0,
            width: Width::U32,
            value: ValueExpr::Memory(3),
        }
        .apply(&mut buf, &tokens)
        .unwrap();
        assert_eq!(buf, [0, 0, 0, 42]);
    }
}
