use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::bytes::{BytePatch, Width};
use crate::codec::decode_text;
use crate::memory::TokenKind;
use crate::path::FieldPath;
use crate::strings::StringAppend;
use crate::table_patch::{
    AddColumn, AddRow, ChangeRow, ColumnCapture, CopyRow, RowCapture, RowTarget, TableModifier,
    TargetKind,
};
use crate::tree::FieldKind;
use crate::tree_patch::{AddField, LocPart, ModifyField, StructId, TreeCapture, TreeModifier};
use crate::value::{memory_token, numbered, ValueExpr};

/// Folder, relative to the game root, that files go to unless told otherwise.
pub const DEFAULT_DESTINATION: &str = "Override";
pub const DEFAULT_STRING_SOURCE: &str = "append.tlk";
pub const DEFAULT_MIRROR_SOURCE: &str = "appendf.tlk";

#[derive(Debug, Error)]
pub enum ChangesError {
    #[error("line {line}: expected '[section]' or 'key=value', found '{text}'")]
    Malformed { line: usize, text: String },

    #[error("line {line}: entry appears before any [section] header")]
    OrphanEntry { line: usize },

    #[error("line {line}: section [{name}] is already declared on line {first}")]
    DuplicateSection { line: usize, name: String, first: usize },

    #[error("line {line}: section [{name}] is referenced but never declared")]
    MissingSection { line: usize, name: String },

    #[error("line {line}: unknown operation '{key}' in [{section}]")]
    UnknownVerb {
        line: usize,
        section: String,
        key: String,
    },

    #[error("line {line}: invalid '{key}' in [{section}]: {message}")]
    InvalidEntry {
        line: usize,
        section: String,
        key: String,
        message: String,
    },

    #[error("line {line}: [{section}] is missing required key '{key}'")]
    MissingKey {
        line: usize,
        section: String,
        key: &'static str,
    },

    #[error("line {line}: [{section}] both reads and writes {kind}{token}")]
    TokenReadAndWritten {
        line: usize,
        section: String,
        kind: TokenKind,
        token: u32,
    },

    #[error("line {line}: failed to parse integer '{token}'")]
    ParseInt {
        line: usize,
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

type Parsed<T> = std::result::Result<T, ChangesError>;

#[derive(Debug, Clone)]
struct Entry {
    line: usize,
    key: String,
    value: String,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    line: usize,
    entries: Vec<Entry>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key.eq_ignore_ascii_case(key))
    }

    fn invalid(&self, entry: &Entry, message: impl Into<String>) -> ChangesError {
        ChangesError::InvalidEntry {
            line: entry.line,
            section: self.name.clone(),
            key: entry.key.clone(),
            message: message.into(),
        }
    }

    fn missing(&self, key: &'static str) -> ChangesError {
        ChangesError::MissingKey {
            line: self.line,
            section: self.name.clone(),
            key,
        }
    }
}

/// Sections keyed by lower-cased name.
struct Document {
    sections: IndexMap<String, Section>,
}

impl Document {
    fn parse(src: &str) -> Parsed<Self> {
        let src = src.strip_prefix('\u{feff}').unwrap_or(src);
        let mut sections: IndexMap<String, Section> = IndexMap::new();
        let mut current: Option<String> = None;

        for (idx, raw_line) in src.lines().enumerate() {
            let line = idx + 1;
            let text = raw_line.trim();
            if text.is_empty() || text.starts_with(';') || text.starts_with('#') {
                continue;
            }

            if let Some(name) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                let name = name.trim().to_string();
                let key = name.to_ascii_lowercase();
                if let Some(first) = sections.get(&key) {
                    return Err(ChangesError::DuplicateSection {
                        line,
                        name,
                        first: first.line,
                    });
                }
                sections.insert(
                    key.clone(),
                    Section {
                        name,
                        line,
                        entries: Vec::new(),
                    },
                );
                current = Some(key);
                continue;
            }

            let Some((key, value)) = text.split_once('=') else {
                return Err(ChangesError::Malformed {
                    line,
                    text: text.to_string(),
                });
            };
            let section = current
                .as_ref()
                .and_then(|name| sections.get_mut(name))
                .ok_or(ChangesError::OrphanEntry { line })?;
            section.entries.push(Entry {
                line,
                key: key.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
        Ok(Self { sections })
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(&name.to_ascii_lowercase())
    }

    /// First present section among `names`.
    fn top(&self, names: &[&str]) -> Option<&Section> {
        names.iter().find_map(|n| self.section(n))
    }

    fn referenced(&self, entry: &Entry) -> Parsed<&Section> {
        self.section(&entry.value)
            .ok_or_else(|| ChangesError::MissingSection {
                line: entry.line,
                name: entry.value.clone(),
            })
    }
}

/// `!SourceFile`, `!SourceFileF` and `StrRef<n>=<index>` from the string section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringSection {
    pub source: String,
    /// Explicitly named mirror source; when `None` the default mirror source
    /// is used if the mod ships one.
    pub mirror_source: Option<String>,
    pub appends: Vec<StringAppend>,
}

impl Default for StringSection {
    fn default() -> Self {
        Self {
            source: DEFAULT_STRING_SOURCE.to_string(),
            mirror_source: None,
            appends: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFile {
    pub name: String,
    /// Overwrite a copy already present in the destination.
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFolder {
    pub destination: String,
    /// Folder inside the mod holding the files; empty for the mod root.
    pub source_folder: String,
    pub files: Vec<InstallFile>,
}

/// One operation against a target file, with where it was declared.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation<Op> {
    pub index: usize,
    pub key: String,
    pub section: String,
    pub line: usize,
    pub modifier: Op,
}

impl<Op> Operation<Op> {
    /// How errors refer to this operation.
    pub fn reference(&self) -> String {
        format!("#{} {} ([{}] line {})", self.index, self.key, self.section, self.line)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetFile<Op> {
    pub name: String,
    pub destination: String,
    pub save_as: Option<String>,
    pub source_file: Option<String>,
    /// Start from the mod's copy even when the destination has one.
    pub replace: bool,
    pub operations: Vec<Operation<Op>>,
}

impl<Op> TargetFile<Op> {
    /// Name the patched file is written under.
    pub fn output_name(&self) -> &str {
        self.save_as.as_deref().unwrap_or(&self.name)
    }

    /// Name of the mod folder copy to start from.
    pub fn source_name(&self) -> &str {
        self.source_file.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub strings: StringSection,
    pub installs: Vec<InstallFolder>,
    pub tables: Vec<TargetFile<TableModifier>>,
    pub trees: Vec<TargetFile<TreeModifier>>,
    pub bytes: Vec<TargetFile<BytePatch>>,
}

impl ChangeSet {
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = fs::read(path)?;
        let text = String::from_utf8(raw).unwrap_or_else(|e| decode_text(e.as_bytes()));
        Ok(Self::parse(&text)?)
    }

    pub fn parse(src: &str) -> Parsed<Self> {
        let doc = Document::parse(src)?;
        let mut set = ChangeSet::default();

        if let Some(section) = doc.top(&["StringList", "TLKList"]) {
            set.strings = parse_strings(section)?;
        }
        if let Some(section) = doc.top(&["InstallList"]) {
            for entry in &section.entries {
                set.installs.push(parse_install(doc.referenced(entry)?)?);
            }
        }
        if let Some(section) = doc.top(&["TableList", "2DAList"]) {
            set.tables = parse_targets(&doc, section, parse_table_op)?;
        }
        if let Some(section) = doc.top(&["TreeList", "GFFList"]) {
            set.trees = parse_targets(&doc, section, parse_tree_op)?;
        }
        if let Some(section) = doc.top(&["ByteList", "HACKList"]) {
            set.bytes = parse_targets(&doc, section, parse_byte_op)?;
        }
        Ok(set)
    }

    pub fn operation_count(&self) -> usize {
        self.strings.appends.len()
            + self.installs.iter().map(|f| f.files.len()).sum::<usize>()
            + self.tables.iter().map(|t| t.operations.len()).sum::<usize>()
            + self.trees.iter().map(|t| t.operations.len()).sum::<usize>()
            + self.bytes.iter().map(|t| t.operations.len()).sum::<usize>()
    }
}

fn parse_u32(line: usize, token: &str) -> Parsed<u32> {
    let t = token.trim();
    let res = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        t.parse::<u32>()
    };
    res.map_err(|e| ChangesError::ParseInt {
        line,
        token: t.to_string(),
        source: e,
    })
}

fn parse_usize(line: usize, token: &str) -> Parsed<usize> {
    let t = token.trim();
    let res = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16)
    } else {
        t.parse::<usize>()
    };
    res.map_err(|e| ChangesError::ParseInt {
        line,
        token: t.to_string(),
        source: e,
    })
}

/// Leading letters of a list key, e.g. `AddRow` in `AddRow12`.
fn verb(key: &str) -> &str {
    let end = key
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(key.len());
    &key[..end]
}

fn parse_strings(section: &Section) -> Parsed<StringSection> {
    let mut out = StringSection::default();
    for entry in &section.entries {
        if entry.key.eq_ignore_ascii_case("!SourceFile") {
            out.source = entry.value.clone();
        } else if entry.key.eq_ignore_ascii_case("!SourceFileF") {
            out.mirror_source = Some(entry.value.clone());
        } else if let Some(token) = numbered(&entry.key, "StrRef") {
            out.appends.push(StringAppend {
                token,
                source_index: parse_u32(entry.line, &entry.value)?,
            });
        } else {
            return Err(section.invalid(entry, "expected StrRef<n>=<index> or !SourceFile"));
        }
    }
    Ok(out)
}

fn parse_install(section: &Section) -> Parsed<InstallFolder> {
    let mut folder = InstallFolder {
        destination: section.name.clone(),
        source_folder: String::new(),
        files: Vec::new(),
    };
    for entry in &section.entries {
        match verb(&entry.key).to_ascii_lowercase().as_str() {
            "!destination" => folder.destination = entry.value.clone(),
            "!sourcefolder" => folder.source_folder = entry.value.clone(),
            "file" => folder.files.push(InstallFile {
                name: entry.value.clone(),
                replace: false,
            }),
            "replace" => folder.files.push(InstallFile {
                name: entry.value.clone(),
                replace: true,
            }),
            _ => return Err(section.invalid(entry, "expected File<n> or Replace<n>")),
        }
    }
    Ok(folder)
}

/// Builds one operation from an entry of a target file's section.
type OpParser<Op> = fn(&Document, &Section, &Entry) -> Parsed<Op>;

fn parse_targets<Op>(
    doc: &Document,
    list: &Section,
    parse_op: OpParser<Op>,
) -> Parsed<Vec<TargetFile<Op>>> {
    let mut targets = Vec::with_capacity(list.entries.len());
    for list_entry in &list.entries {
        let replace = verb(&list_entry.key).eq_ignore_ascii_case("Replace");
        let section = doc.referenced(list_entry)?;
        let mut target = TargetFile {
            name: list_entry.value.clone(),
            destination: DEFAULT_DESTINATION.to_string(),
            save_as: None,
            source_file: None,
            replace,
            operations: Vec::new(),
        };
        for entry in &section.entries {
            match entry.key.to_ascii_lowercase().as_str() {
                "!destination" => target.destination = entry.value.clone(),
                "!saveas" | "!filename" => target.save_as = Some(entry.value.clone()),
                "!sourcefile" => target.source_file = Some(entry.value.clone()),
                key if key.starts_with('!') => {
                    log::debug!("ignoring {} in [{}]", entry.key, section.name)
                }
                _ => {
                    let modifier = parse_op(doc, section, entry)?;
                    target.operations.push(Operation {
                        index: target.operations.len(),
                        key: entry.key.clone(),
                        section: section.name.clone(),
                        line: entry.line,
                        modifier,
                    });
                }
            }
        }
        targets.push(target);
    }
    Ok(targets)
}

/// Tokens an operation reads and writes must not overlap.
fn check_tokens<'a>(
    section: &Section,
    reads: impl IntoIterator<Item = &'a ValueExpr>,
    writes: impl IntoIterator<Item = u32>,
) -> Parsed<()> {
    let read: BTreeSet<u32> = reads
        .into_iter()
        .filter_map(ValueExpr::token_read)
        .filter(|(kind, _)| *kind == TokenKind::Memory)
        .map(|(_, id)| id)
        .collect();
    for token in writes {
        if read.contains(&token) {
            return Err(ChangesError::TokenReadAndWritten {
                line: section.line,
                section: section.name.clone(),
                kind: TokenKind::Memory,
                token,
            });
        }
    }
    Ok(())
}

struct RowKeys {
    target: Option<RowTarget>,
    label: Option<ValueExpr>,
    exclusive: Option<String>,
    cells: Vec<(String, ValueExpr)>,
    captures: Vec<(u32, RowCapture)>,
}

fn parse_row_keys(section: &Section, verb: &str) -> Parsed<RowKeys> {
    let adds = verb.eq_ignore_ascii_case("AddRow");
    let mut keys = RowKeys {
        target: None,
        label: None,
        exclusive: None,
        cells: Vec::new(),
        captures: Vec::new(),
    };
    for entry in &section.entries {
        let value = ValueExpr::parse(&entry.value);
        let target_kind = match entry.key.to_ascii_lowercase().as_str() {
            "rowindex" => Some(TargetKind::RowIndex),
            "rowlabel" if !adds => Some(TargetKind::RowLabel),
            "labelindex" => Some(TargetKind::LabelIndex),
            _ => None,
        };
        if let Some(kind) = target_kind {
            if adds {
                return Err(section.invalid(entry, "AddRow does not target an existing row"));
            }
            keys.target = Some(RowTarget { kind, value });
        } else if entry.key.eq_ignore_ascii_case("RowLabel") || entry.key.eq_ignore_ascii_case("NewRowLabel") {
            keys.label = Some(value);
        } else if entry.key.eq_ignore_ascii_case("ExclusiveColumn") {
            keys.exclusive = Some(entry.value.clone());
        } else if let Some(token) = memory_token(&entry.key) {
            let capture = if entry.value.eq_ignore_ascii_case("RowIndex") {
                RowCapture::RowIndex
            } else if entry.value.eq_ignore_ascii_case("RowLabel") {
                RowCapture::RowLabel
            } else if entry.value.is_empty() {
                return Err(section.invalid(entry, "expected RowIndex, RowLabel or a column name"));
            } else {
                RowCapture::Cell(entry.value.clone())
            };
            keys.captures.push((token, capture));
        } else {
            keys.cells.push((entry.key.clone(), value));
        }
    }

    let reads = keys
        .cells
        .iter()
        .map(|(_, expr)| expr)
        .chain(keys.target.as_ref().map(|t| &t.value))
        .chain(keys.label.as_ref());
    check_tokens(section, reads, keys.captures.iter().map(|(token, _)| *token))?;
    Ok(keys)
}

fn parse_add_column(section: &Section) -> Parsed<AddColumn> {
    let mut column = None;
    let mut op = AddColumn {
        column: String::new(),
        default: ValueExpr::Blank,
        by_index: Vec::new(),
        by_label: Vec::new(),
        captures: Vec::new(),
    };
    for entry in &section.entries {
        if entry.key.eq_ignore_ascii_case("ColumnLabel") {
            column = Some(entry.value.clone());
        } else if entry.key.eq_ignore_ascii_case("DefaultValue") {
            op.default = ValueExpr::parse(&entry.value);
        } else if let Some(token) = memory_token(&entry.key) {
            let capture = if let Some(index) = entry.value.strip_prefix('I') {
                ColumnCapture::Index(parse_usize(entry.line, index)?)
            } else if let Some(label) = entry.value.strip_prefix('L') {
                ColumnCapture::Label(label.to_string())
            } else {
                return Err(section.invalid(entry, "expected I<row index> or L<row label>"));
            };
            op.captures.push((token, capture));
        } else if let Some(index) = entry.key.strip_prefix('I') {
            op.by_index
                .push((parse_usize(entry.line, index)?, ValueExpr::parse(&entry.value)));
        } else if let Some(label) = entry.key.strip_prefix('L') {
            op.by_label
                .push((label.to_string(), ValueExpr::parse(&entry.value)));
        } else {
            return Err(section.invalid(
                entry,
                "expected ColumnLabel, DefaultValue, I<row index>, L<row label> or 2DAMEMORY<n>",
            ));
        }
    }
    op.column = column.ok_or_else(|| section.missing("ColumnLabel"))?;

    let reads = std::iter::once(&op.default)
        .chain(op.by_index.iter().map(|(_, e)| e))
        .chain(op.by_label.iter().map(|(_, e)| e));
    check_tokens(section, reads, op.captures.iter().map(|(token, _)| *token))?;
    Ok(op)
}

fn parse_table_op(doc: &Document, file: &Section, entry: &Entry) -> Parsed<TableModifier> {
    let verb = verb(&entry.key);
    let section = doc.referenced(entry)?;
    let op = match verb.to_ascii_lowercase().as_str() {
        "changerow" => {
            let keys = parse_row_keys(section, verb)?;
            TableModifier::ChangeRow(ChangeRow {
                target: keys.target.ok_or_else(|| section.missing("RowIndex, RowLabel or LabelIndex"))?,
                cells: keys.cells,
                captures: keys.captures,
            })
        }
        "addrow" => {
            let keys = parse_row_keys(section, verb)?;
            TableModifier::AddRow(AddRow {
                label: keys.label,
                exclusive: keys.exclusive,
                cells: keys.cells,
                captures: keys.captures,
            })
        }
        "copyrow" => {
            let keys = parse_row_keys(section, verb)?;
            TableModifier::CopyRow(CopyRow {
                source: keys.target.ok_or_else(|| section.missing("RowIndex, RowLabel or LabelIndex"))?,
                label: keys.label,
                exclusive: keys.exclusive,
                cells: keys.cells,
                captures: keys.captures,
            })
        }
        "addcolumn" => TableModifier::AddColumn(parse_add_column(section)?),
        _ => {
            return Err(ChangesError::UnknownVerb {
                line: entry.line,
                section: file.name.clone(),
                key: entry.key.clone(),
            })
        }
    };
    Ok(op)
}

fn parse_add_field(doc: &Document, section: &Section, stack: &mut Vec<String>) -> Parsed<AddField> {
    let key = section.name.to_ascii_lowercase();
    if stack.contains(&key) {
        return Err(ChangesError::InvalidEntry {
            line: section.line,
            section: section.name.clone(),
            key: "AddField".to_string(),
            message: "nested AddField sections refer back to themselves".to_string(),
        });
    }
    stack.push(key);

    let kind_entry = section.get("FieldType").ok_or_else(|| section.missing("FieldType"))?;
    let kind = FieldKind::parse(&kind_entry.value)
        .ok_or_else(|| section.invalid(kind_entry, format!("unknown field type '{}'", kind_entry.value)))?;
    let mut op = AddField::new(section.name.clone(), kind, "");

    for entry in &section.entries {
        let lower = entry.key.to_ascii_lowercase();
        match lower.as_str() {
            "fieldtype" => {}
            "path" => op.path = FieldPath::parse(&entry.value),
            "label" => op.label = entry.value.clone(),
            "value" => op.value = Some(ValueExpr::parse(&entry.value)),
            "strref" => op.string_ref = Some(ValueExpr::parse(&entry.value)),
            "typeid" => {
                op.struct_id = if entry.value.eq_ignore_ascii_case("ListIndex") {
                    StructId::ListIndex
                } else {
                    StructId::Fixed(parse_u32(entry.line, &entry.value)?)
                }
            }
            _ => {
                if let Some(lang) = numbered(&entry.key, "lang") {
                    op.substrings.push((lang, ValueExpr::parse(&entry.value)));
                } else if numbered(&entry.key, "AddField").is_some() {
                    let child = doc.referenced(entry)?;
                    op.children.push(parse_add_field(doc, child, stack)?);
                } else if let Some(token) = memory_token(&entry.key) {
                    let capture = if entry.value.eq_ignore_ascii_case("ListIndex") {
                        TreeCapture::ListIndex
                    } else if entry.value.eq_ignore_ascii_case("!FieldPath") {
                        TreeCapture::FieldPath
                    } else {
                        return Err(section.invalid(entry, "expected ListIndex or !FieldPath"));
                    };
                    op.captures.push((token, capture));
                } else {
                    return Err(section.invalid(entry, "not an AddField key"));
                }
            }
        }
    }

    let reads = op
        .value
        .iter()
        .chain(op.string_ref.iter())
        .chain(op.substrings.iter().map(|(_, e)| e));
    check_tokens(section, reads, op.captures.iter().map(|(token, _)| *token))?;

    stack.pop();
    Ok(op)
}

/// `Label(strref)` / `Label(lang3)` suffix on a ModifyField key.
fn split_loc_part(key: &str) -> Option<(&str, LocPart)> {
    let (path, rest) = key.strip_suffix(')')?.rsplit_once('(')?;
    let part = if rest.eq_ignore_ascii_case("strref") {
        LocPart::StringRef
    } else {
        LocPart::Language(numbered(rest, "lang")?)
    };
    Some((path, part))
}

fn parse_tree_op(doc: &Document, file: &Section, entry: &Entry) -> Parsed<TreeModifier> {
    if numbered(&entry.key, "AddField").is_some() {
        let section = doc.referenced(entry)?;
        return Ok(TreeModifier::AddField(parse_add_field(doc, section, &mut Vec::new())?));
    }
    let value = ValueExpr::parse(&entry.value);
    if let Some(token) = memory_token(&entry.key) {
        if value.token_read() == Some((TokenKind::Memory, token)) {
            return Err(ChangesError::TokenReadAndWritten {
                line: entry.line,
                section: file.name.clone(),
                kind: TokenKind::Memory,
                token,
            });
        }
        return Ok(TreeModifier::MemoryField { token, value });
    }
    let (path, part) = match split_loc_part(&entry.key) {
        Some((path, part)) => (path, Some(part)),
        None => (entry.key.as_str(), None),
    };
    let path = FieldPath::parse(path);
    if path.is_empty() {
        return Err(file.invalid(entry, "empty field path"));
    }
    Ok(TreeModifier::ModifyField(ModifyField { path, part, value }))
}

fn parse_byte_op(_doc: &Document, file: &Section, entry: &Entry) -> Parsed<BytePatch> {
    let offset = parse_usize(entry.line, &entry.key)?;
    let (width, expr) = match entry.value.split_once(':') {
        Some((prefix, rest)) => match Width::from_prefix(prefix.trim()) {
            Some(width) => (width, rest),
            None => return Err(file.invalid(entry, format!("unknown width '{prefix}'"))),
        },
        None => (Width::U32, entry.value.as_str()),
    };
    let value = ValueExpr::parse(expr);
    if matches!(
        value,
        ValueExpr::RowIndex | ValueExpr::RowLabel | ValueExpr::ListIndex | ValueExpr::High(_)
    ) {
        return Err(file.invalid(entry, format!("{value} has no meaning in a byte patch")));
    }
    Ok(BytePatch {
        offset,
        width,
        value,
    })
}

impl fmt::Display for StringSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} string(s) from {}", self.appends.len(), self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}; robes mod
[Settings]
WindowCaption=Robes

[TLKList]
StrRef0=0
StrRef1=1

[InstallList]
install_folder0=Override

[Override]
File0=robe.uti
Replace0=robe.tga

[2DAList]
Table0=appearance.2da

[appearance.2da]
AddRow0=add_robe
ChangeRow0=fix_row
AddColumn0=new_col

[add_robe]
ExclusiveColumn=label
label=robe
name=StrRef0
2DAMEMORY0=RowIndex

[fix_row]
RowLabel=12
normalhead=MEMORY0

[new_col]
ColumnLabel=robe_flag
DefaultValue=****
I3=1
Lrobe=2
2DAMEMORY1=I3

[GFFList]
File0=p_bastila.utc

[p_bastila.utc]
!SaveAs=p_bastila2.utc
Appearance_Type=2DAMEMORY0
FirstName(strref)=StrRef1
AddField0=item

[item]
FieldType=Struct
Path=ItemList
Label=
TypeId=ListIndex
AddField0=item_res
2DAMEMORY2=ListIndex

[item_res]
FieldType=ResRef
Label=InventoryRes
Value=robe

[HACKList]
File0=k_inc.ncs

[k_inc.ncs]
0x10=u16:2DAMEMORY0
32=7
";

    #[test]
    fn parses_every_section() {
        let set = ChangeSet::parse(SAMPLE).unwrap();
        assert_eq!(set.strings.source, DEFAULT_STRING_SOURCE);
        assert_eq!(set.strings.appends.len(), 2);
        assert_eq!(set.installs[0].destination, "Override");
        assert!(set.installs[0].files[1].replace);

        let table = &set.tables[0];
        assert_eq!(table.destination, DEFAULT_DESTINATION);
        assert_eq!(table.operations.len(), 3);
        let TableModifier::AddRow(add) = &table.operations[0].modifier else {
            panic!("expected AddRow")
        };
        assert_eq!(add.exclusive.as_deref(), Some("label"));
        assert_eq!(add.captures, vec![(0, RowCapture::RowIndex)]);
        let TableModifier::AddColumn(col) = &table.operations[2].modifier else {
            panic!("expected AddColumn")
        };
        assert_eq!(col.by_index[0].0, 3);
        assert_eq!(col.by_label[0].0, "robe");
        assert_eq!(col.captures, vec![(1, ColumnCapture::Index(3))]);

        let tree = &set.trees[0];
        assert_eq!(tree.output_name(), "p_bastila2.utc");
        assert_eq!(tree.operations.len(), 3);
        assert!(matches!(
            &tree.operations[1].modifier,
            TreeModifier::ModifyField(ModifyField {
                part: Some(LocPart::StringRef),
                ..
            })
        ));
        let TreeModifier::AddField(item) = &tree.operations[2].modifier else {
            panic!("expected AddField")
        };
        assert_eq!(item.struct_id, StructId::ListIndex);
        assert_eq!(item.children[0].label, "InventoryRes");

        let patch = &set.bytes[0].operations[0].modifier;
        assert_eq!(patch.offset, 0x10);
        assert_eq!(patch.width, Width::U16);
        assert_eq!(set.bytes[0].operations[1].modifier.width, Width::U32);

        assert_eq!(set.operation_count(), 2 + 2 + 3 + 3 + 2);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = ChangeSet::parse("[TableList]\nTable0=x.2da\n").unwrap_err();
        assert!(matches!(err, ChangesError::MissingSection { line: 2, .. }));

        let err = ChangeSet::parse("key=value\n").unwrap_err();
        assert!(matches!(err, ChangesError::OrphanEntry { line: 1 }));

        let err = ChangeSet::parse("[a]\n[A]\n").unwrap_err();
        assert!(matches!(err, ChangesError::DuplicateSection { line: 2, first: 1, .. }));

        let err = ChangeSet::parse("[a]\nnot an entry\n").unwrap_err();
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn unknown_verb_is_reported() {
        let src = "[2DAList]\nTable0=x.2da\n[x.2da]\nDeleteRow0=gone\n[gone]\nRowIndex=1\n";
        let err = ChangeSet::parse(src).unwrap_err();
        assert!(matches!(err, ChangesError::UnknownVerb { line: 4, .. }));
    }

    #[test]
    fn change_row_needs_a_target() {
        let src = "[2DAList]\nTable0=x.2da\n[x.2da]\nChangeRow0=c\n[c]\nname=1\n";
        let err = ChangeSet::parse(src).unwrap_err();
        assert!(matches!(err, ChangesError::MissingKey { line: 5, .. }));
    }

    #[test]
    fn reading_and_writing_one_token_is_rejected() {
        let src = "[2DAList]\nTable0=x.2da\n[x.2da]\nAddRow0=a\n[a]\nname=2DAMEMORY3\n2DAMEMORY3=RowIndex\n";
        let err = ChangeSet::parse(src).unwrap_err();
        assert!(matches!(
            err,
            ChangesError::TokenReadAndWritten { token: 3, .. }
        ));
    }

    #[test]
    fn self_referencing_fields_are_rejected() {
        let src = "[GFFList]\nFile0=a.utc\n[a.utc]\nAddField0=loop\n[loop]\nFieldType=Struct\nLabel=L\nAddField0=loop\n";
        assert!(matches!(
            ChangeSet::parse(src).unwrap_err(),
            ChangesError::InvalidEntry { .. }
        ));
    }

    #[test]
    fn byte_offsets_must_be_numbers() {
        let src = "[HACKList]\nFile0=a.ncs\n[a.ncs]\nstart=1\n";
        assert!(matches!(
            ChangeSet::parse(src).unwrap_err(),
            ChangesError::ParseInt { line: 4, .. }
        ));
        let src = "[HACKList]\nFile0=a.ncs\n[a.ncs]\n4=u64:1\n";
        assert!(ChangeSet::parse(src).is_err());
    }

    #[test]
    fn loc_string_suffixes() {
        assert_eq!(
            split_loc_part("FirstName(lang3)"),
            Some(("FirstName", LocPart::Language(3)))
        );
        assert_eq!(split_loc_part("A\\B(StrRef)"), Some(("A\\B", LocPart::StringRef)));
        assert_eq!(split_loc_part("Plain"), None);
    }
}
