use std::collections::BTreeSet;

use crate::memory::{TokenKind, TokenStore};
use crate::{PatchError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringEntry {
    pub text: String,
    /// Voice-over resource name, empty when the line is not voiced.
    pub voice: String,
    pub sound_length: f32,
}

impl StringEntry {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            sound_length: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    pub language: u32,
    entries: Vec<StringEntry>,
}

impl StringTable {
    pub fn new(language: u32) -> Self {
        Self {
            language,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(language: u32, entries: Vec<StringEntry>) -> Self {
        Self { language, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&StringEntry> {
        self.entries.get(usize::try_from(index).ok()?)
    }

    pub fn entries(&self) -> &[StringEntry] {
        &self.entries
    }

    /// Append an entry and return its permanent index.
    pub fn append(&mut self, entry: StringEntry) -> Result<u32> {
        let index = u32::try_from(self.entries.len())
            .map_err(|_| PatchError::schema("string table is full"))?;
        self.entries.push(entry);
        Ok(index)
    }

    pub fn append_string(&mut self, text: &str, voice: &str) -> Result<u32> {
        self.append(StringEntry::new(text, voice))
    }
}

/// `StrRef<token>=<source_index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringAppend {
    pub token: u32,
    pub source_index: u32,
}

/// Copy every requested source entry onto the end of `dest` and bind each
/// new index to its token.
///
/// Nothing is appended unless every append can succeed: the mirror source
/// must be as long as the primary source, every source index must exist, and
/// no token may already be bound. The mirror destination receives the mirror
/// source's entry at the same index (or the primary entry when there is no
/// mirror source) so both locales keep the same numbering.
pub fn append_strings(
    dest: &mut StringTable,
    mut mirror_dest: Option<&mut StringTable>,
    source: &StringTable,
    mirror_source: Option<&StringTable>,
    appends: &[StringAppend],
    tokens: &mut TokenStore,
) -> Result<Vec<u32>> {
    if let Some(mirror) = mirror_source {
        if mirror.len() != source.len() {
            return Err(PatchError::schema(format!(
                "mirrored string source has {} entries but the primary source has {}",
                mirror.len(),
                source.len()
            )));
        }
    }

    let mut seen = BTreeSet::new();
    for append in appends {
        if tokens.has_string(append.token) || !seen.insert(append.token) {
            return Err(PatchError::DuplicateToken {
                kind: TokenKind::String,
                id: append.token,
            });
        }
        if source.get(append.source_index).is_none() {
            return Err(PatchError::SourceNotFound {
                what: format!(
                    "string {} for StrRef{} (source has {} entries)",
                    append.source_index,
                    append.token,
                    source.len()
                ),
            });
        }
    }

    let mut indices = Vec::with_capacity(appends.len());
    for append in appends {
        let Some(entry) = source.get(append.source_index) else {
            continue;
        };
        let index = dest.append(entry.clone())?;
        if let Some(mirror) = mirror_dest.as_deref_mut() {
            let mirrored = mirror_source
                .and_then(|m| m.get(append.source_index))
                .unwrap_or(entry);
            mirror.append(mirrored.clone())?;
        }
        tokens.set_string(append.token, index)?;
        log::debug!("StrRef{} = {index}", append.token);
        indices.push(index);
    }
    Ok(indices)
}
