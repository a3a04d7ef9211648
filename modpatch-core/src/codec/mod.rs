pub mod gff;
pub mod tlk;
pub mod twoda;

use crate::{PatchError, Result};

pub use gff::{load_tree, save_tree};
pub use tlk::{load_strings, save_strings};
pub use twoda::{load_table, save_table};

/// Bounds-checked little-endian reads over a loaded file.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    format: &'static str,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], format: &'static str) -> Self {
        Self { buf, format }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> PatchError {
        PatchError::Format {
            format: self.format,
            message: message.into(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or_else(|| {
                self.error(format!(
                    "{len} byte(s) at offset {offset:#X} run past the end of a {}-byte file",
                    self.buf.len()
                ))
            })
    }

    pub(crate) fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    pub(crate) fn u16(&self, offset: usize) -> Result<u16> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&self, offset: usize) -> Result<u64> {
        let b = self.bytes(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn f32(&self, offset: usize) -> Result<f32> {
        Ok(f32::from_bits(self.u32(offset)?))
    }

    /// A u32 used as an offset or count.
    pub(crate) fn index(&self, offset: usize) -> Result<usize> {
        to_usize(self.u32(offset)?)
    }

    pub(crate) fn text(&self, offset: usize, len: usize) -> Result<String> {
        Ok(decode_text(self.bytes(offset, len)?))
    }

    /// Fixed-width field padded with NULs.
    pub(crate) fn padded_text(&self, offset: usize, len: usize) -> Result<String> {
        let raw = self.bytes(offset, len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(decode_text(&raw[..end]))
    }

    pub(crate) fn expect_magic(&self, file_type: Option<&[u8; 4]>, version: &[u8; 4]) -> Result<[u8; 4]> {
        let found = self.bytes(0, 4)?;
        if let Some(expected) = file_type {
            if found != expected {
                return Err(self.error(format!(
                    "expected a '{}' file, found '{}'",
                    decode_text(expected),
                    decode_text(found)
                )));
            }
        }
        let found_version = self.bytes(4, 4)?;
        if found_version != version {
            return Err(self.error(format!(
                "unsupported version '{}' (expected '{}')",
                decode_text(found_version),
                decode_text(version)
            )));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(found);
        Ok(magic)
    }
}

pub(crate) fn to_usize(value: u32) -> Result<usize> {
    usize::try_from(value).map_err(|_| PatchError::invalid(value.to_string(), "offset"))
}

pub(crate) fn to_u32(value: usize, format: &'static str, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| PatchError::Format {
        format,
        message: format!("{what} ({value}) does not fit in 32 bits"),
    })
}

pub(crate) fn decode_text(raw: &[u8]) -> String {
    raw.iter().map(|&b| char::from(b)).collect()
}

pub(crate) fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// NUL-padded fixed-width field; longer text is an error.
pub(crate) fn padded(text: &str, width: usize, format: &'static str) -> Result<Vec<u8>> {
    let mut raw = encode_text(text);
    if raw.len() > width {
        return Err(PatchError::Format {
            format,
            message: format!("'{text}' is longer than {width} bytes"),
        });
    }
    raw.resize(width, 0);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let data = [1u8, 0, 0, 0, 2, 0];
        let r = Reader::new(&data, "test");
        assert_eq!(r.u32(0).unwrap(), 1);
        assert_eq!(r.u16(4).unwrap(), 2);
        let err = r.u32(4).unwrap_err();
        assert!(matches!(err, PatchError::Format { format: "test", .. }));
        assert!(r.bytes(usize::MAX, 2).is_err());
    }

    #[test]
    fn text_is_single_byte() {
        assert_eq!(decode_text(&[0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(encode_text("café"), vec![0x63, 0x61, 0x66, 0xE9]);
        assert_eq!(encode_text("a\u{2014}b"), b"a?b".to_vec());
        assert_eq!(padded("ab", 4, "test").unwrap(), b"ab\0\0".to_vec());
        assert!(padded("abcde", 4, "test").is_err());
    }
}
