use indexmap::IndexMap;
use std::collections::BTreeMap;

use super::{encode_text, padded, to_u32, Reader};
use crate::tree::{Field, FieldKind, LocString, Struct, Tree};
use crate::Result;

const FORMAT: &str = "GFF";
const VERSION: &[u8; 4] = b"V3.2";
const HEADER_LEN: usize = 56;
const LABEL_LEN: usize = 16;
const NO_STRING_REF: u32 = u32::MAX;
/// Deeper nesting than this is treated as a struct cycle.
const MAX_DEPTH: usize = 256;

// Header: type, version, then (offset, count) pairs for structs, fields,
// labels, field data, field indices and list indices. Structs and fields are
// 12 bytes each, labels 16.
struct Layout {
    structs: usize,
    struct_count: usize,
    fields: usize,
    field_count: usize,
    labels: usize,
    label_count: usize,
    field_data: usize,
    field_indices: usize,
    list_indices: usize,
}

pub fn load_tree(data: &[u8]) -> Result<Tree> {
    let r = Reader::new(data, FORMAT);
    let file_type = r.expect_magic(None, VERSION)?;
    if r.len() < HEADER_LEN {
        return Err(r.error("file is shorter than its header"));
    }
    let layout = Layout {
        structs: r.index(8)?,
        struct_count: r.index(12)?,
        fields: r.index(16)?,
        field_count: r.index(20)?,
        labels: r.index(24)?,
        label_count: r.index(28)?,
        field_data: r.index(32)?,
        field_indices: r.index(40)?,
        list_indices: r.index(48)?,
    };
    if layout.struct_count == 0 {
        return Err(r.error("no root struct"));
    }

    let mut labels = Vec::with_capacity(layout.label_count.min(r.len() / LABEL_LEN));
    for i in 0..layout.label_count {
        labels.push(r.padded_text(layout.labels + i * LABEL_LEN, LABEL_LEN)?);
    }

    let decoder = Decoder {
        r: &r,
        layout: &layout,
        labels: &labels,
    };
    let root = decoder.read_struct(0, 0)?;
    Ok(Tree { file_type, root })
}

struct Decoder<'a> {
    r: &'a Reader<'a>,
    layout: &'a Layout,
    labels: &'a [String],
}

impl Decoder<'_> {
    fn read_struct(&self, index: usize, depth: usize) -> Result<Struct> {
        let r = self.r;
        if depth > MAX_DEPTH {
            return Err(r.error("structs nest too deeply (cycle?)"));
        }
        if index >= self.layout.struct_count {
            return Err(r.error(format!("struct index {index} out of range")));
        }
        let base = self.layout.structs + index * 12;
        let type_id = r.u32(base)?;
        let data = r.index(base + 4)?;
        let count = r.index(base + 8)?;

        let field_ids: Vec<usize> = match count {
            0 => Vec::new(),
            1 => vec![data],
            n => (0..n)
                .map(|i| r.index(self.layout.field_indices + data + i * 4))
                .collect::<Result<_>>()?,
        };

        let mut out = Struct::new(type_id);
        for id in field_ids {
            let (label, field) = self.read_field(id, depth)?;
            out.fields.insert(label, field);
        }
        Ok(out)
    }

    fn read_field(&self, index: usize, depth: usize) -> Result<(String, Field)> {
        let r = self.r;
        if index >= self.layout.field_count {
            return Err(r.error(format!("field index {index} out of range")));
        }
        let base = self.layout.fields + index * 12;
        let code = r.u32(base)?;
        let label_index = r.index(base + 4)?;
        let label = self
            .labels
            .get(label_index)
            .cloned()
            .ok_or_else(|| r.error(format!("label index {label_index} out of range")))?;
        let kind = FieldKind::from_code(code)
            .ok_or_else(|| r.error(format!("unknown field type {code} on '{label}'")))?;

        let inline = base + 8;
        let data = self.layout.field_data + r.index(inline)?;
        let field = match kind {
            FieldKind::Byte => Field::Byte(r.u8(inline)?),
            FieldKind::Char => Field::Char(r.u8(inline)? as i8),
            FieldKind::Word => Field::Word(r.u16(inline)?),
            FieldKind::Short => Field::Short(r.u16(inline)? as i16),
            FieldKind::DWord => Field::DWord(r.u32(inline)?),
            FieldKind::Int => Field::Int(r.u32(inline)? as i32),
            FieldKind::Float => Field::Float(r.f32(inline)?),
            FieldKind::DWord64 => Field::DWord64(r.u64(data)?),
            FieldKind::Int64 => Field::Int64(r.u64(data)? as i64),
            FieldKind::Double => Field::Double(f64::from_bits(r.u64(data)?)),
            FieldKind::String => {
                let len = r.index(data)?;
                Field::String(r.text(data + 4, len)?)
            }
            FieldKind::ResRef => {
                let len = usize::from(r.u8(data)?);
                Field::ResRef(r.text(data + 1, len)?)
            }
            FieldKind::LocString => Field::LocString(self.read_loc_string(data)?),
            FieldKind::Binary => {
                let len = r.index(data)?;
                Field::Binary(r.bytes(data + 4, len)?.to_vec())
            }
            FieldKind::Orientation => {
                let mut v = [0.0f32; 4];
                for (i, slot) in v.iter_mut().enumerate() {
                    *slot = r.f32(data + i * 4)?;
                }
                Field::Orientation(v)
            }
            FieldKind::Vector => {
                let mut v = [0.0f32; 3];
                for (i, slot) in v.iter_mut().enumerate() {
                    *slot = r.f32(data + i * 4)?;
                }
                Field::Vector(v)
            }
            FieldKind::Struct => Field::Struct(self.read_struct(r.index(inline)?, depth + 1)?),
            FieldKind::List => {
                let start = self.layout.list_indices + r.index(inline)?;
                let count = r.index(start)?;
                let mut elements = Vec::with_capacity(count.min(self.layout.struct_count));
                for i in 0..count {
                    let element = r.index(start + 4 + i * 4)?;
                    elements.push(self.read_struct(element, depth + 1)?);
                }
                Field::List(elements)
            }
        };
        Ok((label, field))
    }

    fn read_loc_string(&self, data: usize) -> Result<LocString> {
        let r = self.r;
        let string_ref = match r.u32(data + 4)? {
            NO_STRING_REF => None,
            n => Some(n),
        };
        let count = r.index(data + 8)?;
        let mut substrings = BTreeMap::new();
        let mut at = data + 12;
        for _ in 0..count {
            let id = r.u32(at)?;
            let len = r.index(at + 4)?;
            substrings.insert(id, r.text(at + 8, len)?);
            at += 8 + len;
        }
        Ok(LocString {
            string_ref,
            substrings,
        })
    }
}

#[derive(Default)]
struct Encoder {
    structs: Vec<[u32; 3]>,
    fields: Vec<[u32; 3]>,
    labels: IndexMap<String, u32>,
    field_data: Vec<u8>,
    field_indices: Vec<u8>,
    list_indices: Vec<u8>,
}

pub fn save_tree(tree: &Tree) -> Result<Vec<u8>> {
    let mut enc = Encoder::default();
    enc.write_struct(&tree.root)?;

    let label_bytes: Vec<u8> = {
        let mut out = Vec::with_capacity(enc.labels.len() * LABEL_LEN);
        for label in enc.labels.keys() {
            out.extend(padded(label, LABEL_LEN, FORMAT)?);
        }
        out
    };

    let structs = HEADER_LEN;
    let fields = structs + enc.structs.len() * 12;
    let labels = fields + enc.fields.len() * 12;
    let field_data = labels + label_bytes.len();
    let field_indices = field_data + enc.field_data.len();
    let list_indices = field_indices + enc.field_indices.len();

    let header = [
        (structs, enc.structs.len()),
        (fields, enc.fields.len()),
        (labels, enc.labels.len()),
        (field_data, enc.field_data.len()),
        (field_indices, enc.field_indices.len()),
        (list_indices, enc.list_indices.len()),
    ];

    let mut out = Vec::with_capacity(list_indices + enc.list_indices.len());
    out.extend_from_slice(&tree.file_type);
    out.extend_from_slice(VERSION);
    for (offset, count) in header {
        out.extend_from_slice(&to_u32(offset, FORMAT, "block offset")?.to_le_bytes());
        out.extend_from_slice(&to_u32(count, FORMAT, "block size")?.to_le_bytes());
    }
    for entry in enc.structs.iter().chain(enc.fields.iter()) {
        for word in entry {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
    out.extend(label_bytes);
    out.extend(enc.field_data);
    out.extend(enc.field_indices);
    out.extend(enc.list_indices);
    Ok(out)
}

impl Encoder {
    fn write_struct(&mut self, s: &Struct) -> Result<u32> {
        let index = self.structs.len();
        let count = to_u32(s.fields.len(), FORMAT, "field count")?;
        self.structs.push([s.type_id, 0, count]);

        let mut ids = Vec::with_capacity(s.fields.len());
        for (label, field) in &s.fields {
            ids.push(self.write_field(label, field)?);
        }

        let data = match ids.as_slice() {
            [] => u32::MAX,
            [only] => *only,
            many => {
                let offset = to_u32(self.field_indices.len(), FORMAT, "field index offset")?;
                for id in many {
                    self.field_indices.extend_from_slice(&id.to_le_bytes());
                }
                offset
            }
        };
        self.structs[index][1] = data;
        to_u32(index, FORMAT, "struct index")
    }

    fn label(&mut self, label: &str) -> Result<u32> {
        if let Some(&id) = self.labels.get(label) {
            return Ok(id);
        }
        let id = to_u32(self.labels.len(), FORMAT, "label index")?;
        self.labels.insert(label.to_string(), id);
        Ok(id)
    }

    fn data_offset(&self) -> Result<u32> {
        to_u32(self.field_data.len(), FORMAT, "field data offset")
    }

    fn write_field(&mut self, label: &str, field: &Field) -> Result<u32> {
        let index = self.fields.len();
        let label_id = self.label(label)?;
        self.fields.push([field.kind().code(), label_id, 0]);

        let data = match field {
            Field::Byte(v) => u32::from(*v),
            Field::Char(v) => u32::from(*v as u8),
            Field::Word(v) => u32::from(*v),
            Field::Short(v) => u32::from(*v as u16),
            Field::DWord(v) => *v,
            Field::Int(v) => *v as u32,
            Field::Float(v) => v.to_bits(),
            Field::DWord64(v) => self.push_data(&v.to_le_bytes())?,
            Field::Int64(v) => self.push_data(&v.to_le_bytes())?,
            Field::Double(v) => self.push_data(&v.to_bits().to_le_bytes())?,
            Field::String(text) => {
                let raw = encode_text(text);
                let offset = self.data_offset()?;
                self.field_data
                    .extend_from_slice(&to_u32(raw.len(), FORMAT, "string length")?.to_le_bytes());
                self.field_data.extend(raw);
                offset
            }
            Field::ResRef(text) => {
                let raw = encode_text(text);
                let len = u8::try_from(raw.len()).map_err(|_| crate::PatchError::Format {
                    format: FORMAT,
                    message: format!("resource name '{text}' is too long"),
                })?;
                let offset = self.data_offset()?;
                self.field_data.push(len);
                self.field_data.extend(raw);
                offset
            }
            Field::LocString(loc) => {
                let mut body = Vec::new();
                body.extend_from_slice(&loc.string_ref.unwrap_or(NO_STRING_REF).to_le_bytes());
                body.extend_from_slice(
                    &to_u32(loc.substrings.len(), FORMAT, "substring count")?.to_le_bytes(),
                );
                for (id, text) in &loc.substrings {
                    let raw = encode_text(text);
                    body.extend_from_slice(&id.to_le_bytes());
                    body.extend_from_slice(&to_u32(raw.len(), FORMAT, "substring length")?.to_le_bytes());
                    body.extend(raw);
                }
                let offset = self.data_offset()?;
                self.field_data
                    .extend_from_slice(&to_u32(body.len(), FORMAT, "localized string size")?.to_le_bytes());
                self.field_data.extend(body);
                offset
            }
            Field::Binary(raw) => {
                let offset = self.data_offset()?;
                self.field_data
                    .extend_from_slice(&to_u32(raw.len(), FORMAT, "binary length")?.to_le_bytes());
                self.field_data.extend_from_slice(raw);
                offset
            }
            Field::Orientation(v) => {
                let raw: Vec<u8> = v.iter().flat_map(|f| f.to_le_bytes()).collect();
                self.push_data(&raw)?
            }
            Field::Vector(v) => {
                let raw: Vec<u8> = v.iter().flat_map(|f| f.to_le_bytes()).collect();
                self.push_data(&raw)?
            }
            Field::Struct(inner) => self.write_struct(inner)?,
            Field::List(elements) => {
                let start = self.list_indices.len();
                let offset = to_u32(start, FORMAT, "list offset")?;
                self.list_indices
                    .extend_from_slice(&to_u32(elements.len(), FORMAT, "list length")?.to_le_bytes());
                self.list_indices.resize(start + 4 + elements.len() * 4, 0);
                for (i, element) in elements.iter().enumerate() {
                    let id = self.write_struct(element)?;
                    let slot = start + 4 + i * 4;
                    self.list_indices[slot..slot + 4].copy_from_slice(&id.to_le_bytes());
                }
                offset
            }
        };
        self.fields[index][2] = data;
        to_u32(index, FORMAT, "field index")
    }

    fn push_data(&mut self, raw: &[u8]) -> Result<u32> {
        let offset = self.data_offset()?;
        self.field_data.extend_from_slice(raw);
        Ok(offset)
    }
}
