use std::fmt;

use crate::memory::{MemoryValue, TokenStore};
use crate::table::Table;
use crate::value::{Resolver, Scope, ValueExpr};
use crate::{PatchError, Result};

/// Name of the column `LabelIndex` targets search.
pub const LABEL_COLUMN: &str = "label";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    RowIndex,
    RowLabel,
    LabelIndex,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::RowIndex => f.write_str("RowIndex"),
            TargetKind::RowLabel => f.write_str("RowLabel"),
            TargetKind::LabelIndex => f.write_str("LabelIndex"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTarget {
    pub kind: TargetKind,
    pub value: ValueExpr,
}

impl RowTarget {
    fn locate(&self, table: &Table, tokens: &TokenStore) -> Result<(Option<usize>, String)> {
        let key = Resolver::plain(tokens).resolve(&self.value)?;
        let found = match self.kind {
            TargetKind::RowIndex => {
                let index = key
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| PatchError::invalid(key.as_str(), "row index"))?;
                (index < table.row_count()).then_some(index)
            }
            TargetKind::RowLabel => table.find_label(&key),
            TargetKind::LabelIndex => {
                if table.column_index(LABEL_COLUMN).is_none() {
                    return Err(PatchError::schema(format!(
                        "LabelIndex={key} needs a column named \"{LABEL_COLUMN}\""
                    )));
                }
                table.find_in_column(LABEL_COLUMN, &key)
            }
        };
        Ok((found, format!("row with {}={key}", self.kind)))
    }
}

/// What a `2DAMEMORY<n>` key in a row operation stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCapture {
    RowIndex,
    RowLabel,
    Cell(String),
}

/// What a `2DAMEMORY<n>` key in an AddColumn operation stores: the new
/// column's cell in the addressed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnCapture {
    Index(usize),
    Label(String),
}

pub type CellWrites = Vec<(String, ValueExpr)>;
pub type Captures<S> = Vec<(u32, S)>;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    pub target: RowTarget,
    pub cells: CellWrites,
    pub captures: Captures<RowCapture>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddRow {
    pub label: Option<ValueExpr>,
    pub exclusive: Option<String>,
    pub cells: CellWrites,
    pub captures: Captures<RowCapture>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyRow {
    pub source: RowTarget,
    pub label: Option<ValueExpr>,
    pub exclusive: Option<String>,
    pub cells: CellWrites,
    pub captures: Captures<RowCapture>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddColumn {
    pub column: String,
    pub default: ValueExpr,
    pub by_index: Vec<(usize, ValueExpr)>,
    pub by_label: Vec<(String, ValueExpr)>,
    pub captures: Captures<ColumnCapture>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableModifier {
    ChangeRow(ChangeRow),
    AddRow(AddRow),
    CopyRow(CopyRow),
    AddColumn(AddColumn),
}

impl TableModifier {
    pub fn apply(&self, table: &mut Table, tokens: &mut TokenStore) -> Result<()> {
        match self {
            TableModifier::ChangeRow(op) => op.apply(table, tokens),
            TableModifier::AddRow(op) => op.apply(table, tokens),
            TableModifier::CopyRow(op) => op.apply(table, tokens),
            TableModifier::AddColumn(op) => op.apply(table, tokens),
        }
    }
}

fn write_cells(table: &mut Table, row: usize, cells: &CellWrites, tokens: &TokenStore) -> Result<()> {
    let resolved = {
        let resolver = Resolver::new(
            tokens,
            Scope::Row {
                table: &*table,
                row: Some(row),
            },
        );
        cells
            .iter()
            .map(|(column, expr)| Ok((column.as_str(), resolver.resolve(expr)?)))
            .collect::<Result<Vec<_>>>()?
    };
    for (column, value) in resolved {
        table.set_cell(row, column, value)?;
    }
    Ok(())
}

fn store_row_captures(
    table: &Table,
    row: usize,
    captures: &Captures<RowCapture>,
    tokens: &mut TokenStore,
) -> Result<()> {
    for (token, source) in captures {
        let value = match source {
            RowCapture::RowIndex => row.to_string(),
            RowCapture::RowLabel => table
                .row(row)
                .map(|r| r.label.clone())
                .ok_or_else(|| PatchError::schema(format!("row {row} does not exist")))?,
            RowCapture::Cell(column) => table
                .cell(row, column)
                .ok_or_else(|| {
                    PatchError::schema(format!("cannot capture column '{column}': no such column"))
                })?
                .to_string(),
        };
        tokens.set_memory(*token, MemoryValue::Text(value))?;
    }
    Ok(())
}

/// Resolve the ExclusiveColumn value from the operation's own cell writes
/// and look for a row already holding it.
fn find_exclusive(
    table: &Table,
    column: &str,
    cells: &CellWrites,
    tokens: &TokenStore,
) -> Result<Option<usize>> {
    if table.column_index(column).is_none() {
        return Err(PatchError::schema(format!(
            "ExclusiveColumn '{column}' is not a column of this table"
        )));
    }
    let expr = cells
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(column))
        .map(|(_, expr)| expr)
        .ok_or_else(|| {
            PatchError::schema(format!(
                "ExclusiveColumn '{column}' is named but no value is given for it"
            ))
        })?;
    let value = Resolver::new(tokens, Scope::Row { table, row: None }).resolve(expr)?;
    Ok(table.find_in_column(column, &value))
}

fn new_row_label(table: &Table, label: Option<&ValueExpr>, tokens: &TokenStore) -> Result<String> {
    match label {
        Some(expr) => Resolver::new(tokens, Scope::Row { table, row: None }).resolve(expr),
        None => Ok(table.row_count().to_string()),
    }
}

impl ChangeRow {
    pub fn apply(&self, table: &mut Table, tokens: &mut TokenStore) -> Result<()> {
        let (found, what) = self.target.locate(table, tokens)?;
        let row = found.ok_or(PatchError::TargetNotFound { what })?;
        write_cells(table, row, &self.cells, tokens)?;
        store_row_captures(table, row, &self.captures, tokens)
    }
}

impl AddRow {
    pub fn apply(&self, table: &mut Table, tokens: &mut TokenStore) -> Result<()> {
        let existing = match &self.exclusive {
            Some(column) => find_exclusive(table, column, &self.cells, tokens)?,
            None => None,
        };
        let row = match existing {
            Some(row) => {
                log::debug!("AddRow matched existing row {row} on ExclusiveColumn");
                if let Some(expr) = &self.label {
                    let label = new_row_label(table, Some(expr), tokens)?;
                    table.set_label(row, label)?;
                }
                row
            }
            None => {
                let label = new_row_label(table, self.label.as_ref(), tokens)?;
                table.push_row(label)
            }
        };
        write_cells(table, row, &self.cells, tokens)?;
        store_row_captures(table, row, &self.captures, tokens)
    }
}

impl CopyRow {
    pub fn apply(&self, table: &mut Table, tokens: &mut TokenStore) -> Result<()> {
        let (found, what) = self.source.locate(table, tokens)?;
        let source = found.ok_or(PatchError::SourceNotFound { what })?;
        let source_cells = table
            .row(source)
            .map(|r| r.cells().to_vec())
            .unwrap_or_default();

        let existing = match &self.exclusive {
            Some(column) => find_exclusive(table, column, &self.cells, tokens)?,
            None => None,
        };
        let row = match existing {
            Some(row) => {
                log::debug!("CopyRow matched existing row {row} on ExclusiveColumn");
                table.replace_cells(row, source_cells)?;
                if let Some(expr) = &self.label {
                    let label = new_row_label(table, Some(expr), tokens)?;
                    table.set_label(row, label)?;
                }
                row
            }
            None => {
                let label = new_row_label(table, self.label.as_ref(), tokens)?;
                table.push_row_with(label, source_cells)
            }
        };
        write_cells(table, row, &self.cells, tokens)?;
        store_row_captures(table, row, &self.captures, tokens)
    }
}

impl AddColumn {
    pub fn apply(&self, table: &mut Table, tokens: &mut TokenStore) -> Result<()> {
        let resolver = Resolver::plain(tokens);
        let default = resolver.resolve(&self.default)?;
        if !table.add_column(&self.column, &default) {
            log::warn!(
                "column '{}' already exists; keeping its cells and applying overrides",
                self.column
            );
        }

        let mut writes = Vec::with_capacity(self.by_index.len() + self.by_label.len());
        for (index, expr) in &self.by_index {
            if *index < table.row_count() {
                writes.push((*index, resolver.resolve(expr)?));
            } else {
                log::warn!("AddColumn '{}': row {index} does not exist, skipped", self.column);
            }
        }
        for (label, expr) in &self.by_label {
            match table.find_label(label) {
                Some(index) => writes.push((index, resolver.resolve(expr)?)),
                None => log::warn!(
                    "AddColumn '{}': no row labelled '{label}', skipped",
                    self.column
                ),
            }
        }
        for (row, value) in writes {
            table.set_cell(row, &self.column, value)?;
        }

        for (token, source) in &self.captures {
            let row = match source {
                ColumnCapture::Index(index) => (*index < table.row_count()).then_some(*index),
                ColumnCapture::Label(label) => table.find_label(label),
            };
            let value = row
                .and_then(|row| table.cell(row, &self.column))
                .ok_or_else(|| PatchError::SourceNotFound {
                    what: format!("row {source:?} to capture column '{}' from", self.column),
                })?
                .to_string();
            tokens.set_memory(*token, MemoryValue::Text(value))?;
        }
        Ok(())
    }
}
