use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt;

use crate::path::{FieldPath, Segment};
use crate::value::parse_int;
use crate::{PatchError, Result};

/// Longest resource name the container format can store.
pub const RESREF_MAX: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Byte,
    Char,
    Word,
    Short,
    DWord,
    Int,
    DWord64,
    Int64,
    Float,
    Double,
    String,
    ResRef,
    LocString,
    Binary,
    Struct,
    List,
    Orientation,
    Vector,
}

impl FieldKind {
    /// Accepts the type names change-sets use, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "byte" => FieldKind::Byte,
            "char" => FieldKind::Char,
            "word" => FieldKind::Word,
            "short" => FieldKind::Short,
            "dword" => FieldKind::DWord,
            "int" => FieldKind::Int,
            "dword64" => FieldKind::DWord64,
            "int64" => FieldKind::Int64,
            "float" => FieldKind::Float,
            "double" => FieldKind::Double,
            "exostring" | "string" => FieldKind::String,
            "resref" => FieldKind::ResRef,
            "exolocstring" | "locstring" => FieldKind::LocString,
            "binary" | "void" => FieldKind::Binary,
            "struct" => FieldKind::Struct,
            "list" => FieldKind::List,
            "orientation" => FieldKind::Orientation,
            "position" | "vector" => FieldKind::Vector,
            _ => return None,
        };
        Some(kind)
    }

    /// Type code in the binary container.
    pub fn code(self) -> u32 {
        match self {
            FieldKind::Byte => 0,
            FieldKind::Char => 1,
            FieldKind::Word => 2,
            FieldKind::Short => 3,
            FieldKind::DWord => 4,
            FieldKind::Int => 5,
            FieldKind::DWord64 => 6,
            FieldKind::Int64 => 7,
            FieldKind::Float => 8,
            FieldKind::Double => 9,
            FieldKind::String => 10,
            FieldKind::ResRef => 11,
            FieldKind::LocString => 12,
            FieldKind::Binary => 13,
            FieldKind::Struct => 14,
            FieldKind::List => 15,
            FieldKind::Orientation => 16,
            FieldKind::Vector => 17,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            0 => FieldKind::Byte,
            1 => FieldKind::Char,
            2 => FieldKind::Word,
            3 => FieldKind::Short,
            4 => FieldKind::DWord,
            5 => FieldKind::Int,
            6 => FieldKind::DWord64,
            7 => FieldKind::Int64,
            8 => FieldKind::Float,
            9 => FieldKind::Double,
            10 => FieldKind::String,
            11 => FieldKind::ResRef,
            12 => FieldKind::LocString,
            13 => FieldKind::Binary,
            14 => FieldKind::Struct,
            15 => FieldKind::List,
            16 => FieldKind::Orientation,
            17 => FieldKind::Vector,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A localized string: an optional string-table reference plus inline
/// substrings keyed by `language * 2 + gender`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocString {
    pub string_ref: Option<u32>,
    pub substrings: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Byte(u8),
    Char(i8),
    Word(u16),
    Short(i16),
    DWord(u32),
    Int(i32),
    DWord64(u64),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    ResRef(String),
    LocString(LocString),
    Binary(Vec<u8>),
    Struct(Struct),
    List(Vec<Struct>),
    Orientation([f32; 4]),
    Vector([f32; 3]),
}

fn int_in<T: TryFrom<i64>>(text: &str, kind: FieldKind) -> Result<T> {
    let value = parse_int(text)?;
    T::try_from(value).map_err(|_| PatchError::invalid(text.trim(), format!("{kind} value")))
}

fn float_in<T: std::str::FromStr>(text: &str, kind: FieldKind) -> Result<T> {
    text.trim()
        .parse::<T>()
        .map_err(|_| PatchError::invalid(text.trim(), format!("{kind} value")))
}

fn floats<const N: usize>(text: &str, kind: FieldKind) -> Result<[f32; N]> {
    let parts: Vec<&str> = text.split('|').collect();
    if parts.len() != N {
        return Err(PatchError::invalid(
            text,
            format!("{kind} value ({N} components separated by '|')"),
        ));
    }
    let mut out = [0.0f32; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = float_in(part, kind)?;
    }
    Ok(out)
}

fn hex_bytes(text: &str) -> Result<Vec<u8>> {
    let t = text.trim();
    let t = t.strip_prefix("0x").unwrap_or(t);
    if t.len() % 2 != 0 || !t.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(PatchError::invalid(text, "hex byte string"));
    }
    (0..t.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&t[i..i + 2], 16).map_err(|_| PatchError::invalid(text, "hex byte string")))
        .collect()
}

/// `-1` (or blank) means "no string-table entry".
pub fn parse_string_ref(text: &str) -> Result<Option<u32>> {
    let t = text.trim();
    if t.is_empty() {
        return Ok(None);
    }
    match parse_int(t)? {
        -1 => Ok(None),
        n => u32::try_from(n)
            .map(Some)
            .map_err(|_| PatchError::invalid(t, "string reference")),
    }
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Byte(_) => FieldKind::Byte,
            Field::Char(_) => FieldKind::Char,
            Field::Word(_) => FieldKind::Word,
            Field::Short(_) => FieldKind::Short,
            Field::DWord(_) => FieldKind::DWord,
            Field::Int(_) => FieldKind::Int,
            Field::DWord64(_) => FieldKind::DWord64,
            Field::Int64(_) => FieldKind::Int64,
            Field::Float(_) => FieldKind::Float,
            Field::Double(_) => FieldKind::Double,
            Field::String(_) => FieldKind::String,
            Field::ResRef(_) => FieldKind::ResRef,
            Field::LocString(_) => FieldKind::LocString,
            Field::Binary(_) => FieldKind::Binary,
            Field::Struct(_) => FieldKind::Struct,
            Field::List(_) => FieldKind::List,
            Field::Orientation(_) => FieldKind::Orientation,
            Field::Vector(_) => FieldKind::Vector,
        }
    }

    /// Build a scalar field of `kind` from resolved text. Containers are not
    /// built from text.
    pub fn from_text(kind: FieldKind, text: &str) -> Result<Field> {
        let field = match kind {
            FieldKind::Byte => Field::Byte(int_in(text, kind)?),
            FieldKind::Char => Field::Char(int_in(text, kind)?),
            FieldKind::Word => Field::Word(int_in(text, kind)?),
            FieldKind::Short => Field::Short(int_in(text, kind)?),
            FieldKind::DWord => Field::DWord(int_in(text, kind)?),
            FieldKind::Int => Field::Int(int_in(text, kind)?),
            FieldKind::DWord64 => Field::DWord64(
                text.trim()
                    .parse::<u64>()
                    .map_err(|_| PatchError::invalid(text.trim(), "DWord64 value"))?,
            ),
            FieldKind::Int64 => Field::Int64(parse_int(text)?),
            FieldKind::Float => Field::Float(float_in(text, kind)?),
            FieldKind::Double => Field::Double(float_in(text, kind)?),
            FieldKind::String => Field::String(text.to_string()),
            FieldKind::ResRef => {
                if text.len() > RESREF_MAX || !text.is_ascii() {
                    return Err(PatchError::invalid(
                        text,
                        format!("resource name (ASCII, at most {RESREF_MAX} characters)"),
                    ));
                }
                Field::ResRef(text.to_string())
            }
            FieldKind::LocString => Field::LocString(LocString {
                string_ref: parse_string_ref(text)?,
                substrings: BTreeMap::new(),
            }),
            FieldKind::Binary => Field::Binary(hex_bytes(text)?),
            FieldKind::Orientation => Field::Orientation(floats::<4>(text, kind)?),
            FieldKind::Vector => Field::Vector(floats::<3>(text, kind)?),
            FieldKind::Struct | FieldKind::List => {
                return Err(PatchError::schema(format!(
                    "a {kind} field has no plain value to set"
                )))
            }
        };
        Ok(field)
    }

    /// Overwrite the value keeping the field's type. A plain value written
    /// to a localized string replaces only its string reference.
    pub fn assign_text(&mut self, text: &str) -> Result<()> {
        if let Field::LocString(loc) = self {
            loc.string_ref = parse_string_ref(text)?;
            return Ok(());
        }
        *self = Field::from_text(self.kind(), text)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Struct {
    pub type_id: u32,
    pub fields: IndexMap<String, Field>,
}

/// A container reached by walking a path.
pub enum NodeMut<'a> {
    Struct(&'a mut Struct),
    List(&'a mut Vec<Struct>),
}

fn list_node_mut<'a>(list: &'a mut Vec<Struct>, segments: &[Segment]) -> Option<NodeMut<'a>> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(NodeMut::List(list));
    };
    let Segment::Index(index) = first else {
        return None;
    };
    list.get_mut(*index)?.node_mut(rest)
}

impl Struct {
    pub fn new(type_id: u32) -> Self {
        Self {
            type_id,
            fields: IndexMap::new(),
        }
    }

    pub fn get(&self, label: &str) -> Option<&Field> {
        self.fields.get(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, field: Field) -> Option<Field> {
        self.fields.insert(label.into(), field)
    }

    /// Walk `segments` from this struct to a struct or list.
    pub fn node_mut(&mut self, segments: &[Segment]) -> Option<NodeMut<'_>> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(NodeMut::Struct(self));
        };
        let Segment::Label(label) = first else {
            return None;
        };
        match self.fields.get_mut(label.as_str())? {
            Field::Struct(child) => child.node_mut(rest),
            Field::List(list) => list_node_mut(list, rest),
            _ => None,
        }
    }

    /// The field whose path ends in a label.
    pub fn field_mut(&mut self, path: &FieldPath) -> Option<&mut Field> {
        let (last, parent) = path.segments().split_last()?;
        let Segment::Label(label) = last else {
            return None;
        };
        match self.node_mut(parent)? {
            NodeMut::Struct(s) => s.fields.get_mut(label.as_str()),
            NodeMut::List(_) => None,
        }
    }

    pub fn field(&self, path: &FieldPath) -> Option<&Field> {
        let mut current = self;
        let mut segments = path.segments().iter().peekable();
        while let Some(segment) = segments.next() {
            let Segment::Label(label) = segment else {
                return None;
            };
            let field = current.fields.get(label.as_str())?;
            if segments.peek().is_none() {
                return Some(field);
            }
            current = match field {
                Field::Struct(child) => child,
                Field::List(list) => match segments.next()? {
                    Segment::Index(index) => {
                        let element = list.get(*index)?;
                        if segments.peek().is_none() {
                            return None;
                        }
                        element
                    }
                    Segment::Label(_) => return None,
                },
                _ => return None,
            };
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    /// Four-character content type, e.g. `UTC `.
    pub file_type: [u8; 4],
    pub root: Struct,
}

impl Tree {
    pub fn new(file_type: [u8; 4]) -> Self {
        Self {
            file_type,
            root: Struct::new(u32::MAX),
        }
    }
}
