use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use crate::path::FieldPath;
use crate::{PatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `StrRef<n>`: a permanent string-table index.
    String,
    /// `2DAMEMORY<n>`: a text value or a captured field path.
    Memory,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::String => f.write_str("StrRef"),
            TokenKind::Memory => f.write_str("2DAMEMORY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryValue {
    Text(String),
    Path(FieldPath),
}

#[derive(Debug, Default)]
pub struct TokenStore {
    strings: BTreeMap<u32, u32>,
    memory: BTreeMap<u32, MemoryValue>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_string(&mut self, id: u32, value: u32) -> Result<()> {
        match self.strings.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                log::debug!("StrRef{id} = {value}");
                Ok(())
            }
            Entry::Occupied(_) => Err(PatchError::DuplicateToken {
                kind: TokenKind::String,
                id,
            }),
        }
    }

    pub fn get_string(&self, id: u32) -> Result<u32> {
        self.strings
            .get(&id)
            .copied()
            .ok_or(PatchError::UndefinedToken {
                kind: TokenKind::String,
                id,
            })
    }

    pub fn has_string(&self, id: u32) -> bool {
        self.strings.contains_key(&id)
    }

    pub fn set_memory(&mut self, id: u32, value: MemoryValue) -> Result<()> {
        match self.memory.entry(id) {
            Entry::Vacant(slot) => {
                log::debug!("2DAMEMORY{id} = {value:?}");
                slot.insert(value);
                Ok(())
            }
            Entry::Occupied(_) => Err(PatchError::DuplicateToken {
                kind: TokenKind::Memory,
                id,
            }),
        }
    }

    pub fn get_memory(&self, id: u32) -> Result<&MemoryValue> {
        self.memory.get(&id).ok_or(PatchError::UndefinedToken {
            kind: TokenKind::Memory,
            id,
        })
    }

    pub fn has_memory(&self, id: u32) -> bool {
        self.memory.contains_key(&id)
    }

    pub fn copy_memory(&mut self, dst: u32, src: u32) -> Result<()> {
        let value = self.get_memory(src)?.clone();
        self.set_memory(dst, value)
    }

    /// Number of string and memory tokens written so far.
    pub fn counts(&self) -> (usize, usize) {
        (self.strings.len(), self.memory.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_tokens_are_write_once() {
        let mut tokens = TokenStore::new();
        assert!(matches!(
            tokens.get_string(3),
            Err(PatchError::UndefinedToken {
                kind: TokenKind::String,
                id: 3
            })
        ));

        tokens.set_string(3, 42).unwrap();
        assert_eq!(tokens.get_string(3).unwrap(), 42);

        assert!(matches!(
            tokens.set_string(3, 43),
            Err(PatchError::DuplicateToken {
                kind: TokenKind::String,
                id: 3
            })
        ));
        assert_eq!(tokens.get_string(3).unwrap(), 42);
    }

    #[test]
    fn memory_tokens_are_write_once() {
        let mut tokens = TokenStore::new();
        assert!(matches!(
            tokens.get_memory(0),
            Err(PatchError::UndefinedToken {
                kind: TokenKind::Memory,
                id: 0
            })
        ));

        tokens
            .set_memory(0, MemoryValue::Text("17".to_string()))
            .unwrap();
        assert_eq!(
            tokens.get_memory(0).unwrap(),
            &MemoryValue::Text("17".to_string())
        );
        assert!(matches!(
            tokens.set_memory(0, MemoryValue::Text("18".to_string())),
            Err(PatchError::DuplicateToken { id: 0, .. })
        ));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let mut tokens = TokenStore::new();
        tokens.set_string(1, 5).unwrap();
        tokens
            .set_memory(1, MemoryValue::Text("x".to_string()))
            .unwrap();
        assert_eq!(tokens.counts(), (1, 1));
    }

    #[test]
    fn copy_memory_carries_captured_paths() {
        let mut tokens = TokenStore::new();
        let path = FieldPath::parse("ItemList\\2\\Tag");
        tokens.set_memory(4, MemoryValue::Path(path.clone())).unwrap();
        tokens.copy_memory(5, 4).unwrap();
        assert_eq!(tokens.get_memory(5).unwrap(), &MemoryValue::Path(path));

        assert!(matches!(
            tokens.copy_memory(6, 9),
            Err(PatchError::UndefinedToken { id: 9, .. })
        ));
        assert!(matches!(
            tokens.copy_memory(5, 4),
            Err(PatchError::DuplicateToken { id: 5, .. })
        ));
    }

    #[test]
    fn independent_stores_share_nothing() {
        let mut a = TokenStore::new();
        let b = TokenStore::new();
        a.set_string(0, 1).unwrap();
        assert!(!b.has_string(0));
    }
}
