use crate::value::BLANK;
use crate::{PatchError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub label: String,
    cells: Vec<String>,
}

impl Row {
    /// Cells in column order.
    pub fn cells(&self) -> &[String] {
        &self.cells
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

fn is_blank(cell: &str) -> bool {
    let t = cell.trim();
    t.is_empty() || t == BLANK
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r.cells[col].as_str())
    }

    pub fn set_cell(&mut self, row: usize, column: &str, value: String) -> Result<()> {
        let col = self
            .column_index(column)
            .ok_or_else(|| PatchError::schema(format!("table has no column '{column}'")))?;
        let target = self
            .rows
            .get_mut(row)
            .ok_or_else(|| PatchError::TargetNotFound {
                what: format!("row {row}"),
            })?;
        target.cells[col] = value;
        Ok(())
    }

    /// Append a row of blank cells and return its index.
    pub fn push_row(&mut self, label: impl Into<String>) -> usize {
        let cells = vec![String::new(); self.columns.len()];
        self.push_row_with(label, cells)
    }

    /// Append a row; `cells` is padded or truncated to the column count.
    pub fn push_row_with(&mut self, label: impl Into<String>, mut cells: Vec<String>) -> usize {
        cells.resize(self.columns.len(), String::new());
        self.rows.push(Row {
            label: label.into(),
            cells,
        });
        self.rows.len() - 1
    }

    pub fn set_label(&mut self, row: usize, label: String) -> Result<()> {
        let target = self
            .rows
            .get_mut(row)
            .ok_or_else(|| PatchError::TargetNotFound {
                what: format!("row {row}"),
            })?;
        target.label = label;
        Ok(())
    }

    pub fn replace_cells(&mut self, row: usize, mut cells: Vec<String>) -> Result<()> {
        cells.resize(self.columns.len(), String::new());
        let target = self
            .rows
            .get_mut(row)
            .ok_or_else(|| PatchError::TargetNotFound {
                what: format!("row {row}"),
            })?;
        target.cells = cells;
        Ok(())
    }

    /// Add a column filled with `default`. Returns false, leaving the table
    /// untouched, when the column already exists.
    pub fn add_column(&mut self, name: &str, default: &str) -> bool {
        if self.column_index(name).is_some() {
            return false;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.cells.push(default.to_string());
        }
        true
    }

    pub fn find_label(&self, label: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.label == label)
    }

    pub fn find_in_column(&self, column: &str, value: &str) -> Option<usize> {
        let col = self.column_index(column)?;
        self.rows.iter().position(|r| r.cells[col] == value)
    }

    /// One past the largest integer in `column` (the row labels when
    /// `None`). Blank and non-integer cells are skipped, so the result never
    /// equals an existing value. `"0"` when nothing parses.
    pub fn high(&self, column: Option<&str>) -> Result<String> {
        let values: Vec<&str> = match column {
            None => self.rows.iter().map(|r| r.label.as_str()).collect(),
            Some(name) => {
                let col = self.column_index(name).ok_or_else(|| {
                    PatchError::schema(format!("high({name}): table has no column '{name}'"))
                })?;
                self.rows.iter().map(|r| r.cells[col].as_str()).collect()
            }
        };
        let max = values
            .into_iter()
            .filter(|v| !is_blank(v))
            .filter_map(|v| v.trim().parse::<i64>().ok())
            .max();
        Ok(max.map_or(0, |m| m + 1).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_labels(labels: &[&str]) -> Table {
        let mut table = Table::new(vec!["label".to_string(), "value".to_string()]);
        for label in labels {
            table.push_row(*label);
        }
        table
    }

    #[test]
    fn high_compares_numerically() {
        let table = table_with_labels(&["0", "1", "5"]);
        assert_eq!(table.high(None).unwrap(), "6");

        let table = table_with_labels(&["5", "10"]);
        assert_eq!(table.high(None).unwrap(), "11");
    }

    #[test]
    fn high_skips_non_integers() {
        let table = table_with_labels(&["2", "10", "1.5"]);
        assert_eq!(table.high(None).unwrap(), "11");

        let table = table_with_labels(&["alpha", "10", "beta"]);
        assert_eq!(table.high(None).unwrap(), "11");

        let table = table_with_labels(&["alpha", "beta"]);
        let high = table.high(None).unwrap();
        assert_eq!(high, "0");
        assert_eq!(table.find_label(&high), None);
    }

    #[test]
    fn high_skips_blank_cells() {
        let mut table = table_with_labels(&["0", "1", "2"]);
        table.set_cell(0, "value", "3".to_string()).unwrap();
        table.set_cell(1, "value", "****".to_string()).unwrap();
        assert_eq!(table.high(Some("value")).unwrap(), "4");
        assert!(table.high(Some("missing")).is_err());
        assert_eq!(Table::default().high(None).unwrap(), "0");
    }

    #[test]
    fn rows_keep_their_index() {
        let mut table = table_with_labels(&["a", "b"]);
        let idx = table.push_row_with("c", vec!["x".to_string()]);
        assert_eq!(idx, 2);
        assert_eq!(table.row(2).unwrap().cells(), &["x".to_string(), String::new()]);
        assert_eq!(table.find_label("b"), Some(1));
    }

    #[test]
    fn add_column_fills_every_row() {
        let mut table = table_with_labels(&["a", "b"]);
        assert!(table.add_column("extra", "7"));
        assert!(!table.add_column("EXTRA", "8"));
        assert_eq!(table.cell(1, "extra"), Some("7"));
        assert_eq!(table.find_in_column("extra", "7"), Some(0));
    }

    #[test]
    fn unknown_column_is_a_schema_error() {
        let mut table = table_with_labels(&["a"]);
        assert!(matches!(
            table.set_cell(0, "nope", "1".to_string()),
            Err(PatchError::SchemaMismatch { .. })
        ));
    }
}
