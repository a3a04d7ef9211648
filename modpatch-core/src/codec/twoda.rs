use std::collections::HashMap;

use super::{decode_text, encode_text, to_u32, Reader};
use crate::table::Table;
use crate::value::BLANK;
use crate::{PatchError, Result};

const FORMAT: &str = "2DA";
const BINARY_MAGIC: &[u8] = b"2DA V2.b\n";
const TEXT_MAGIC: &[u8] = b"2DA V2.0";

// V2.0 text tables are read but always saved as V2.b.
pub fn load_table(data: &[u8]) -> Result<Table> {
    if data.starts_with(BINARY_MAGIC) {
        load_binary(data)
    } else if data.starts_with(TEXT_MAGIC) {
        load_text(data)
    } else {
        Err(PatchError::Format {
            format: FORMAT,
            message: "not a 2DA V2.b or V2.0 file".to_string(),
        })
    }
}

/// Reads up to `stop`, returning the text and the offset after `stop`.
fn until(r: &Reader<'_>, mut at: usize, stop: u8) -> Result<(String, usize)> {
    let start = at;
    while r.u8(at)? != stop {
        at += 1;
    }
    Ok((r.text(start, at - start)?, at + 1))
}

fn load_binary(data: &[u8]) -> Result<Table> {
    let r = Reader::new(data, FORMAT);
    let mut at = BINARY_MAGIC.len();

    let mut columns = Vec::new();
    while r.u8(at)? != 0 {
        let (name, next) = until(&r, at, b'\t')?;
        columns.push(name);
        at = next;
    }
    at += 1;

    let row_count = r.index(at)?;
    at += 4;
    let mut labels = Vec::with_capacity(row_count.min(r.len()));
    for _ in 0..row_count {
        let (label, next) = until(&r, at, b'\t')?;
        labels.push(label);
        at = next;
    }

    let offsets = at;
    let cell_count = row_count
        .checked_mul(columns.len())
        .ok_or_else(|| r.error("cell count overflows"))?;
    let data_start = offsets + cell_count * 2 + 2;
    let data_size = usize::from(r.u16(offsets + cell_count * 2)?);
    r.bytes(data_start, data_size)?;

    let mut table = Table::new(columns.clone());
    for (row, label) in labels.into_iter().enumerate() {
        let mut cells = Vec::with_capacity(columns.len());
        for col in 0..columns.len() {
            let offset = usize::from(r.u16(offsets + (row * columns.len() + col) * 2)?);
            if offset >= data_size {
                return Err(r.error(format!("cell ({row}, {col}) points outside the data block")));
            }
            let (cell, _) = until(&r, data_start + offset, 0)?;
            cells.push(cell);
        }
        table.push_row_with(label, cells);
    }
    Ok(table)
}

/// Splits a text-table line on whitespace, keeping double-quoted cells whole.
fn split_cells(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut cell = String::new();
        if c == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                cell.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                cell.push(c);
                chars.next();
            }
        }
        cells.push(cell);
    }
    cells
}

fn load_text(data: &[u8]) -> Result<Table> {
    let text = decode_text(data);
    let mut lines = text.lines().skip(1);
    let columns = lines
        .by_ref()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.to_ascii_uppercase().starts_with("DEFAULT:"))
        .map(split_cells)
        .ok_or_else(|| PatchError::Format {
            format: FORMAT,
            message: "text table has no column header line".to_string(),
        })?;

    let mut table = Table::new(columns);
    for line in lines {
        let mut cells = split_cells(line);
        if cells.is_empty() {
            continue;
        }
        let label = cells.remove(0);
        for cell in &mut cells {
            if cell == BLANK {
                cell.clear();
            }
        }
        table.push_row_with(label, cells);
    }
    Ok(table)
}

pub fn save_table(table: &Table) -> Result<Vec<u8>> {
    let mut out = BINARY_MAGIC.to_vec();
    for column in table.columns() {
        out.extend(encode_text(column));
        out.push(b'\t');
    }
    out.push(0);

    out.extend_from_slice(&to_u32(table.row_count(), FORMAT, "row count")?.to_le_bytes());
    for row in table.rows() {
        out.extend(encode_text(&row.label));
        out.push(b'\t');
    }

    let mut pool: Vec<u8> = Vec::new();
    let mut seen: HashMap<&str, u16> = HashMap::new();
    let mut offsets = Vec::with_capacity(table.row_count() * table.columns().len() * 2);
    for row in table.rows() {
        for cell in row.cells() {
            let offset = match seen.get(cell.as_str()) {
                Some(&offset) => offset,
                None => {
                    let offset = u16::try_from(pool.len()).map_err(|_| PatchError::Format {
                        format: FORMAT,
                        message: "cell data exceeds 65535 bytes".to_string(),
                    })?;
                    pool.extend(encode_text(cell));
                    pool.push(0);
                    seen.insert(cell, offset);
                    offset
                }
            };
            offsets.extend_from_slice(&offset.to_le_bytes());
        }
    }
    let size = u16::try_from(pool.len()).map_err(|_| PatchError::Format {
        format: FORMAT,
        message: "cell data exceeds 65535 bytes".to_string(),
    })?;

    out.extend(offsets);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend(pool);
    Ok(out)
}
