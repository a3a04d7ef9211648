use std::fmt;

use crate::memory::{MemoryValue, TokenKind, TokenStore};
use crate::table::Table;
use crate::{PatchError, Result};

/// Blank cell marker used throughout change-sets.
pub const BLANK: &str = "****";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    Literal(String),
    Blank,
    StrRef(u32),
    Memory(u32),
    RowIndex,
    RowLabel,
    ListIndex,
    High(Option<String>),
}

/// `<prefix><digits>`, prefix matched case-insensitively.
pub(crate) fn numbered(raw: &str, prefix: &str) -> Option<u32> {
    let head = raw.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let digits = &raw[prefix.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// `2DAMEMORY<n>` or `MEMORY<n>`.
pub(crate) fn memory_token(raw: &str) -> Option<u32> {
    numbered(raw, "2DAMEMORY").or_else(|| numbered(raw, "MEMORY"))
}

impl ValueExpr {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        if text == BLANK {
            return ValueExpr::Blank;
        }
        if let Some(id) = numbered(text, "StrRef") {
            return ValueExpr::StrRef(id);
        }
        if let Some(id) = memory_token(text) {
            return ValueExpr::Memory(id);
        }
        if text.eq_ignore_ascii_case("RowIndex") {
            return ValueExpr::RowIndex;
        }
        if text.eq_ignore_ascii_case("RowLabel") {
            return ValueExpr::RowLabel;
        }
        if text.eq_ignore_ascii_case("ListIndex") {
            return ValueExpr::ListIndex;
        }
        let lower = text.to_ascii_lowercase();
        if lower.starts_with("high(") && lower.ends_with(')') {
            let column = text[5..text.len() - 1].trim();
            return ValueExpr::High((!column.is_empty()).then(|| column.to_string()));
        }
        ValueExpr::Literal(text.to_string())
    }

    /// The token this expression reads, if any.
    pub fn token_read(&self) -> Option<(TokenKind, u32)> {
        match self {
            ValueExpr::StrRef(id) => Some((TokenKind::String, *id)),
            ValueExpr::Memory(id) => Some((TokenKind::Memory, *id)),
            _ => None,
        }
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpr::Literal(text) => f.write_str(text),
            ValueExpr::Blank => f.write_str(BLANK),
            ValueExpr::StrRef(id) => write!(f, "StrRef{id}"),
            ValueExpr::Memory(id) => write!(f, "2DAMEMORY{id}"),
            ValueExpr::RowIndex => f.write_str("RowIndex"),
            ValueExpr::RowLabel => f.write_str("RowLabel"),
            ValueExpr::ListIndex => f.write_str("ListIndex"),
            ValueExpr::High(None) => f.write_str("high()"),
            ValueExpr::High(Some(column)) => write!(f, "high({column})"),
        }
    }
}

/// What the current operation is mutating.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Byte patches, string appends, column overrides: tokens and literals only.
    Plain,
    /// A table operation; `row` is set once the target row exists.
    Row { table: &'a Table, row: Option<usize> },
    /// A tree operation; `list_index` is set inside a struct that was just
    /// appended to a list.
    Tree { list_index: Option<usize> },
}

pub struct Resolver<'a> {
    tokens: &'a TokenStore,
    scope: Scope<'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(tokens: &'a TokenStore, scope: Scope<'a>) -> Self {
        Self { tokens, scope }
    }

    pub fn plain(tokens: &'a TokenStore) -> Self {
        Self::new(tokens, Scope::Plain)
    }

    pub fn resolve(&self, expr: &ValueExpr) -> Result<String> {
        match expr {
            ValueExpr::Literal(text) => Ok(text.clone()),
            ValueExpr::Blank => Ok(String::new()),
            ValueExpr::StrRef(id) => Ok(self.tokens.get_string(*id)?.to_string()),
            ValueExpr::Memory(id) => self.memory(*id),
            ValueExpr::RowIndex => self.current_row().map(|(_, row)| row.to_string()),
            ValueExpr::RowLabel => {
                let (table, row) = self.current_row()?;
                table
                    .row(row)
                    .map(|r| r.label.clone())
                    .ok_or_else(|| PatchError::schema(format!("row {row} does not exist")))
            }
            ValueExpr::ListIndex => match self.scope {
                Scope::Tree {
                    list_index: Some(index),
                } => Ok(index.to_string()),
                _ => Err(PatchError::schema(
                    "ListIndex is only known inside a struct that was just appended to a list",
                )),
            },
            ValueExpr::High(column) => match self.scope {
                Scope::Row { table, .. } => table.high(column.as_deref()),
                _ => Err(PatchError::schema(format!(
                    "{expr} is only available inside a table row operation"
                ))),
            },
        }
    }

    /// Resolve and parse as a signed integer; accepts `0x` hex.
    pub fn resolve_int(&self, expr: &ValueExpr) -> Result<i64> {
        let text = self.resolve(expr)?;
        parse_int(&text)
    }

    fn memory(&self, id: u32) -> Result<String> {
        match self.tokens.get_memory(id)? {
            MemoryValue::Text(text) => Ok(text.clone()),
            MemoryValue::Path(path) => Err(PatchError::schema(format!(
                "2DAMEMORY{id} holds the captured field path {path}; only a field modification can target it"
            ))),
        }
    }

    fn current_row(&self) -> Result<(&'a Table, usize)> {
        match self.scope {
            Scope::Row {
                table,
                row: Some(row),
            } => Ok((table, row)),
            Scope::Row { row: None, .. } => Err(PatchError::schema(
                "RowIndex/RowLabel are not known until the row exists",
            )),
            _ => Err(PatchError::schema(
                "RowIndex/RowLabel are only available inside a table row operation",
            )),
        }
    }
}

pub(crate) fn parse_int(text: &str) -> Result<i64> {
    let t = text.trim();
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    if !digits.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(PatchError::invalid(t, "integer"));
    }
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        if hex.starts_with(['+', '-']) {
            return Err(PatchError::invalid(t, "integer"));
        }
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    };
    parsed
        .map(|v| if negative { -v } else { v })
        .map_err(|_| PatchError::invalid(t, "integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FieldPath;

    #[test]
    fn parses_every_expression_kind() {
        assert_eq!(ValueExpr::parse("****"), ValueExpr::Blank);
        assert_eq!(ValueExpr::parse("StrRef12"), ValueExpr::StrRef(12));
        assert_eq!(ValueExpr::parse("strref3"), ValueExpr::StrRef(3));
        assert_eq!(ValueExpr::parse("MEMORY0"), ValueExpr::Memory(0));
        assert_eq!(ValueExpr::parse("2DAMEMORY7"), ValueExpr::Memory(7));
        assert_eq!(ValueExpr::parse("RowIndex"), ValueExpr::RowIndex);
        assert_eq!(ValueExpr::parse("rowlabel"), ValueExpr::RowLabel);
        assert_eq!(ValueExpr::parse("ListIndex"), ValueExpr::ListIndex);
        assert_eq!(ValueExpr::parse("high()"), ValueExpr::High(None));
        assert_eq!(
            ValueExpr::parse("high(ID)"),
            ValueExpr::High(Some("ID".to_string()))
        );
        assert_eq!(
            ValueExpr::parse("StrRefX"),
            ValueExpr::Literal("StrRefX".to_string())
        );
        assert_eq!(
            ValueExpr::parse(" hello "),
            ValueExpr::Literal("hello".to_string())
        );
    }

    #[test]
    fn resolves_tokens_and_literals() {
        let mut tokens = TokenStore::new();
        tokens.set_string(0, 123_456).unwrap();
        tokens
            .set_memory(1, MemoryValue::Text("9".to_string()))
            .unwrap();
        let r = Resolver::plain(&tokens);
        assert_eq!(r.resolve(&ValueExpr::StrRef(0)).unwrap(), "123456");
        assert_eq!(r.resolve(&ValueExpr::Memory(1)).unwrap(), "9");
        assert_eq!(r.resolve(&ValueExpr::Blank).unwrap(), "");
        assert_eq!(
            r.resolve(&ValueExpr::Literal("abc".to_string())).unwrap(),
            "abc"
        );
        assert!(matches!(
            r.resolve(&ValueExpr::StrRef(5)),
            Err(PatchError::UndefinedToken {
                kind: TokenKind::String,
                id: 5
            })
        ));
    }

    #[test]
    fn captured_paths_are_not_plain_values() {
        let mut tokens = TokenStore::new();
        tokens
            .set_memory(2, MemoryValue::Path(FieldPath::parse("A\\0\\B")))
            .unwrap();
        let err = Resolver::plain(&tokens)
            .resolve(&ValueExpr::Memory(2))
            .unwrap_err();
        assert!(matches!(err, PatchError::SchemaMismatch { .. }));
    }

    #[test]
    fn row_functions_need_a_row() {
        let tokens = TokenStore::new();
        let mut table = Table::new(vec!["label".to_string()]);
        table.push_row("first");
        table.push_row("second");

        let r = Resolver::new(
            &tokens,
            Scope::Row {
                table: &table,
                row: Some(1),
            },
        );
        assert_eq!(r.resolve(&ValueExpr::RowIndex).unwrap(), "1");
        assert_eq!(r.resolve(&ValueExpr::RowLabel).unwrap(), "second");

        let pending = Resolver::new(
            &tokens,
            Scope::Row {
                table: &table,
                row: None,
            },
        );
        assert!(pending.resolve(&ValueExpr::RowIndex).is_err());
        assert!(Resolver::plain(&tokens)
            .resolve(&ValueExpr::RowLabel)
            .is_err());
    }

    #[test]
    fn list_index_only_after_append() {
        let tokens = TokenStore::new();
        let appended = Resolver::new(&tokens, Scope::Tree { list_index: Some(3) });
        assert_eq!(appended.resolve(&ValueExpr::ListIndex).unwrap(), "3");
        let plain = Resolver::new(&tokens, Scope::Tree { list_index: None });
        assert!(plain.resolve(&ValueExpr::ListIndex).is_err());
    }

    #[test]
    fn parses_hex_and_negative_integers() {
        assert_eq!(parse_int("0x1F").unwrap(), 31);
        assert_eq!(parse_int("-12").unwrap(), -12);
        assert_eq!(parse_int(" 7 ").unwrap(), 7);
        assert!(parse_int("seven").is_err());
        assert!(parse_int("--5").is_err());
        assert!(parse_int("-+5").is_err());
        assert!(parse_int("0x-1").is_err());
        assert!(parse_int("").is_err());
    }
}
