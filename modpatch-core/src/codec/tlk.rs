use super::{encode_text, padded, to_u32, Reader};
use crate::strings::{StringEntry, StringTable};
use crate::Result;

const FORMAT: &str = "TLK";
const MAGIC: &[u8; 4] = b"TLK ";
const VERSION: &[u8; 4] = b"V3.0";
const HEADER_LEN: usize = 20;
const ENTRY_LEN: usize = 40;
const VOICE_LEN: usize = 16;

const TEXT_PRESENT: u32 = 0x1;
const SOUND_PRESENT: u32 = 0x2;
const SOUND_LENGTH_PRESENT: u32 = 0x4;

pub fn load_strings(data: &[u8]) -> Result<StringTable> {
    let r = Reader::new(data, FORMAT);
    r.expect_magic(Some(MAGIC), VERSION)?;
    let language = r.u32(8)?;
    let count = r.index(12)?;
    let strings = r.index(16)?;

    let mut entries = Vec::with_capacity(count.min(r.len() / ENTRY_LEN));
    for i in 0..count {
        let base = HEADER_LEN + i * ENTRY_LEN;
        let flags = r.u32(base)?;
        let voice = r.padded_text(base + 4, VOICE_LEN)?;
        let offset = r.index(base + 28)?;
        let size = r.index(base + 32)?;
        let sound_length = r.f32(base + 36)?;
        let text = if flags & TEXT_PRESENT != 0 {
            r.text(strings + offset, size)?
        } else {
            String::new()
        };
        entries.push(StringEntry {
            text,
            voice,
            sound_length,
        });
    }
    Ok(StringTable::with_entries(language, entries))
}

pub fn save_strings(table: &StringTable) -> Result<Vec<u8>> {
    let count = table.len();
    let strings = HEADER_LEN + count * ENTRY_LEN;

    let mut out = Vec::with_capacity(strings);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(VERSION);
    out.extend_from_slice(&table.language.to_le_bytes());
    out.extend_from_slice(&to_u32(count, FORMAT, "entry count")?.to_le_bytes());
    out.extend_from_slice(&to_u32(strings, FORMAT, "string data offset")?.to_le_bytes());

    let mut pool = Vec::new();
    for entry in table.entries() {
        let mut flags = 0;
        if !entry.text.is_empty() {
            flags |= TEXT_PRESENT;
        }
        if !entry.voice.is_empty() {
            flags |= SOUND_PRESENT;
        }
        if entry.sound_length != 0.0 {
            flags |= SOUND_LENGTH_PRESENT;
        }
        let raw = encode_text(&entry.text);

        out.extend_from_slice(&flags.to_le_bytes());
        out.extend(padded(&entry.voice, VOICE_LEN, FORMAT)?);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&to_u32(pool.len(), FORMAT, "string offset")?.to_le_bytes());
        out.extend_from_slice(&to_u32(raw.len(), FORMAT, "string length")?.to_le_bytes());
        out.extend_from_slice(&entry.sound_length.to_le_bytes());
        pool.extend(raw);
    }
    out.extend(pool);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_voice_and_text() {
        let mut table = StringTable::new(0);
        table.append_string("Hello there.", "n_bastila_01").unwrap();
        table.append_string("", "").unwrap();
        table
            .append(StringEntry {
                text: "Général".to_string(),
                voice: String::new(),
                sound_length: 1.5,
            })
            .unwrap();

        let bytes = save_strings(&table).unwrap();
        assert_eq!(&bytes[..8], b"TLK V3.0");
        assert_eq!(load_strings(&bytes).unwrap(), table);
    }

    #[test]
    fn rejects_wrong_type() {
        let mut bytes = save_strings(&StringTable::new(2)).unwrap();
        bytes[..4].copy_from_slice(b"GFF ");
        assert!(load_strings(&bytes).is_err());
    }
}
