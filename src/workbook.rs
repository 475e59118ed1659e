//! In-memory view of an uploaded workbook.
//!
//! Decoding is delegated to calamine; everything after that works on plain
//! [`CellValue`] grids so the rest of the pipeline can be exercised without
//! binary fixtures.

use crate::error::{IntakeError, Result};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    #[default]
    Empty,
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// A cell counts as present when it carries a usable value: non-empty
    /// text, a non-zero number or `true`.
    pub fn is_present(&self) -> bool {
        match self {
            CellValue::Empty => false,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Number(n) => *n != 0.0 && !n.is_nan(),
            CellValue::Bool(b) => *b,
        }
    }

    /// Text form of the cell, `None` when it is empty.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) if s.is_empty() => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Bool(b) => Some(b.to_string()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&Data> for CellValue {
    fn from(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Int(n) => CellValue::Number(*n as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            // Dates stay serial numbers, the normalizer owns the conversion.
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) => CellValue::Text(s.clone()),
            Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(_) => CellValue::Empty,
        }
    }
}

/// A header-keyed table row. Empty cells are omitted.
pub type Row = BTreeMap<String, CellValue>;

pub type Grid = Vec<Vec<CellValue>>;

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheet_order: Vec<String>,
    sheets: BTreeMap<String, Grid>,
}

impl Workbook {
    /// Decodes XLSX/XLS/ODS bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cursor = Cursor::new(bytes.to_vec());
        let mut source = open_workbook_auto_from_rs(cursor)
            .map_err(|e| IntakeError::Parse(format!("workbook: {}", e)))?;

        let mut workbook = Workbook::default();
        for name in source.sheet_names() {
            let range = source
                .worksheet_range(&name)
                .map_err(|e| IntakeError::Parse(format!("sheet '{}': {}", name, e)))?;
            workbook.push_sheet(name, grid_from_range(&range));
        }

        debug!("Decoded workbook with sheets: {:?}", workbook.sheet_order);
        Ok(workbook)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Builds a workbook from already-materialized grids, in the given order.
    pub fn from_sheets<N, I>(sheets: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Grid)>,
    {
        let mut workbook = Workbook::default();
        for (name, grid) in sheets {
            workbook.push_sheet(name.into(), grid);
        }
        workbook
    }

    fn push_sheet(&mut self, name: String, grid: Grid) {
        if !self.sheets.contains_key(&name) {
            self.sheet_order.push(name.clone());
        }
        self.sheets.insert(name, grid);
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_order
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.contains_key(name)
    }

    /// Raw rows of a sheet, addressed by absolute position.
    pub fn grid(&self, name: &str) -> Option<&Grid> {
        self.sheets.get(name)
    }

    /// Rows of a sheet keyed by the text of its first row. Blank rows are
    /// skipped; a missing sheet reads as an empty table.
    pub fn records(&self, name: &str) -> Vec<Row> {
        let Some(grid) = self.sheets.get(name) else {
            return Vec::new();
        };

        let mut rows = grid.iter();
        let Some(header_row) = rows.next() else {
            return Vec::new();
        };
        let headers: Vec<Option<String>> = header_row
            .iter()
            .map(|cell| cell.as_text().map(|h| h.trim().to_string()))
            .collect();

        rows.filter_map(|cells| {
            let row: Row = cells
                .iter()
                .enumerate()
                .filter(|(_, cell)| !cell.is_empty())
                .filter_map(|(idx, cell)| {
                    let header = headers.get(idx)?.as_ref()?;
                    Some((header.clone(), cell.clone()))
                })
                .collect();
            (!row.is_empty()).then_some(row)
        })
        .collect()
    }
}

/// Cell at an absolute (row, column) position of a grid.
pub fn grid_cell(grid: &Grid, row: usize, col: usize) -> CellValue {
    grid.get(row)
        .and_then(|r| r.get(col))
        .cloned()
        .unwrap_or_default()
}

fn grid_from_range(range: &Range<Data>) -> Grid {
    // Ranges start at the first used cell; pad back to A1 so fixed offsets hold.
    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut grid: Grid = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![CellValue::Empty; col_offset];
        cells.extend(row.iter().map(CellValue::from));
        grid.push(cells);
    }
    grid
}
