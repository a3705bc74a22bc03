use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use umya_spreadsheet::{Spreadsheet, Worksheet};

use crate::extract::Record;

pub const OUTPUT_FILE: &str = "output.xlsx";
pub const SNAPSHOT_FILE: &str = ".header_cols.json";

const SHEET_NAME: &str = "data";
const HEADER_ROW: u32 = 1;
const SUB_HEADER_ROW: u32 = 2;

/// A merged parent header spanning `subs` contiguous sub-columns starting at
/// `base`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupSpan {
    pub base: u32,
    pub subs: u32,
}

/// Column-allocation map for the workbook. Indices are 1-based, assigned in
/// first-seen order and never reused or reordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderIndex {
    columns: HashMap<String, u32>,
    groups: HashMap<String, GroupSpan>,
    sub_columns: HashMap<String, HashMap<String, u32>>,
}

impl HeaderIndex {
    fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(idx) => idx,
                Err(e) => {
                    warn!("Unable to load header index from {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.groups.is_empty()
    }

    /// Reconstruct the index from the workbook itself: merged ranges in the
    /// header row describe the groups, row-2 labels inside each span are the
    /// sub-columns, everything else in row 1 is a flat column.
    fn rebuild(sheet: &Worksheet) -> Self {
        let mut idx = Self::default();
        let mut spans: Vec<(u32, u32)> = Vec::new();
        for range in sheet.get_merge_cells() {
            if let Some((c1, r1, c2, r2)) = parse_range(&range.get_range()) {
                if r1 == HEADER_ROW && r2 == HEADER_ROW {
                    spans.push((c1, c2));
                }
            }
        }
        for &(start, end) in &spans {
            let parent = cell_text(sheet, start, HEADER_ROW);
            if parent.is_empty() {
                continue;
            }
            idx.groups.insert(
                parent.clone(),
                GroupSpan {
                    base: start,
                    subs: end - start + 1,
                },
            );
            for col in start..=end {
                let sub = cell_text(sheet, col, SUB_HEADER_ROW);
                if !sub.is_empty() {
                    idx.sub_columns
                        .entry(parent.clone())
                        .or_default()
                        .insert(sub, col);
                }
            }
        }
        for col in 1..=sheet.get_highest_column() {
            if spans.iter().any(|&(s, e)| col >= s && col <= e) {
                continue;
            }
            let name = cell_text(sheet, col, HEADER_ROW);
            if !name.is_empty() {
                idx.columns.insert(name, col);
            }
        }
        idx
    }
}

/// Appends one row per record to a persistent workbook, allocating columns on
/// first sight of a field and resuming row/column counters from the physical
/// sheet across runs.
pub struct SheetWriter {
    book: Spreadsheet,
    headers: HeaderIndex,
    row_index: u32,
    col_index: u32,
    sheet_path: PathBuf,
    snapshot_path: PathBuf,
}

impl SheetWriter {
    pub fn open(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)?;
        let sheet_path = output_dir.join(OUTPUT_FILE);
        let snapshot_path = output_dir.join(SNAPSHOT_FILE);

        if sheet_path.exists() {
            let book = umya_spreadsheet::reader::xlsx::read(&sheet_path)
                .map_err(|e| anyhow!("reading {}: {:?}", sheet_path.display(), e))?;
            let sheet = book
                .get_sheet_by_name(SHEET_NAME)
                .ok_or_else(|| anyhow!("{} has no {:?} sheet", sheet_path.display(), SHEET_NAME))?;
            // Resume from the physical extent, not the snapshot: the two can
            // diverge if a previous run died before persisting the snapshot.
            let row_index = sheet.get_highest_row() + 1;
            let col_index = sheet.get_highest_column() + 1;
            let mut headers = HeaderIndex::load(&snapshot_path);
            if headers.is_empty() && col_index > 1 {
                headers = HeaderIndex::rebuild(sheet);
                info!(
                    "Rebuilt header index from {} ({} columns)",
                    sheet_path.display(),
                    col_index - 1
                );
            }
            Ok(Self {
                book,
                headers,
                row_index,
                col_index,
                sheet_path,
                snapshot_path,
            })
        } else {
            let mut book = umya_spreadsheet::new_file();
            if let Some(sheet) = book.get_sheet_by_name_mut("Sheet1") {
                sheet.set_name(SHEET_NAME);
            }
            Ok(Self {
                book,
                // A stale snapshot without its workbook cannot be trusted.
                headers: HeaderIndex::default(),
                row_index: SUB_HEADER_ROW,
                col_index: 1,
                sheet_path,
                snapshot_path,
            })
        }
    }

    fn sheet_mut(&mut self) -> Result<&mut Worksheet> {
        self.book
            .get_sheet_by_name_mut(SHEET_NAME)
            .ok_or_else(|| anyhow!("worksheet {:?} missing", SHEET_NAME))
    }

    /// Allocate a flat column for `name` if it has none yet. Idempotent.
    pub fn add_column(&mut self, name: &str) -> Result<u32> {
        if let Some(&col) = self.headers.columns.get(name) {
            return Ok(col);
        }
        let col = self.col_index;
        self.sheet_mut()?
            .get_cell_mut((col, HEADER_ROW))
            .set_value(name.to_string());
        self.headers.columns.insert(name.to_string(), col);
        self.col_index += 1;
        Ok(col)
    }

    /// Register `parent` as a group header. Its span grows as sub-columns are
    /// added; the caller must add them before allocating further columns.
    pub fn add_group(&mut self, parent: &str) -> Result<()> {
        if self.headers.groups.contains_key(parent) {
            return Ok(());
        }
        let base = self.col_index;
        self.sheet_mut()?
            .get_cell_mut((base, HEADER_ROW))
            .set_value(parent.to_string());
        self.headers
            .groups
            .insert(parent.to_string(), GroupSpan { base, subs: 0 });
        Ok(())
    }

    /// Add one sub-column under a registered group: sub-label in row 2,
    /// parent cell re-merged across the widened span.
    pub fn add_sub_column(&mut self, parent: &str, sub: &str) -> Result<u32> {
        let span = *self
            .headers
            .groups
            .get(parent)
            .ok_or_else(|| anyhow!("{:?} is not a group header", parent))?;
        let col = span.base + span.subs;
        {
            let sheet = self.sheet_mut()?;
            sheet
                .get_cell_mut((col, SUB_HEADER_ROW))
                .set_value(sub.to_string());
            merge_header_span(sheet, span.base, col);
        }
        self.headers
            .sub_columns
            .entry(parent.to_string())
            .or_default()
            .insert(sub.to_string(), col);
        self.headers.groups.insert(
            parent.to_string(),
            GroupSpan {
                base: span.base,
                subs: span.subs + 1,
            },
        );
        self.col_index += 1;
        // Sub-headers occupy row 2, so data cannot start before row 3.
        if self.row_index <= SUB_HEADER_ROW {
            self.row_index = SUB_HEADER_ROW + 1;
        }
        Ok(col)
    }

    /// Append one record as a row. Unknown fields allocate columns; nested
    /// objects flatten to `{group}_{sub}` names. The row counter advances even
    /// for an empty record, preserving row/source correspondence.
    pub fn append_row(&mut self, record: &Record) -> Result<()> {
        let mut cells: Vec<(u32, Value)> = Vec::new();
        for (key, val) in record {
            match val {
                Value::Object(sub) => {
                    for (sub_key, sub_val) in sub {
                        let final_key = format!("{}_{}", key, sub_key);
                        let col = self.add_column(&final_key)?;
                        cells.push((col, sub_val.clone()));
                    }
                }
                _ => {
                    let col = self.add_column(key)?;
                    cells.push((col, val.clone()));
                }
            }
        }

        let row = self.row_index;
        let sheet = self.sheet_mut()?;
        for (col, val) in cells {
            match val {
                Value::Null => {}
                Value::String(s) => {
                    sheet
                        .get_cell_mut((col, row))
                        .set_value(s.trim().to_string());
                }
                Value::Number(n) => {
                    sheet
                        .get_cell_mut((col, row))
                        .set_value_number(n.as_f64().unwrap_or(0.0));
                }
                other => {
                    sheet.get_cell_mut((col, row)).set_value(other.to_string());
                }
            }
        }
        self.row_index += 1;
        Ok(())
    }

    pub fn next_row(&self) -> u32 {
        self.row_index
    }

    pub fn column_count(&self) -> u32 {
        self.col_index - 1
    }

    /// Persist the header-index snapshot and save the workbook. Must be
    /// called exactly once per run, after the last `append_row`.
    pub fn close(self) -> Result<()> {
        let json = serde_json::to_string(&self.headers)?;
        fs::write(&self.snapshot_path, json)?;
        umya_spreadsheet::writer::xlsx::write(&self.book, &self.sheet_path)
            .map_err(|e| anyhow!("saving {}: {:?}", self.sheet_path.display(), e))?;
        Ok(())
    }
}

fn merge_header_span(sheet: &mut Worksheet, base: u32, end: u32) {
    let start = cell_ref(base, HEADER_ROW);
    let prefix = format!("{}:", start);
    sheet
        .get_merge_cells_mut()
        .retain(|r| !r.get_range().starts_with(&prefix) && r.get_range() != start);
    sheet.add_merge_cells(format!("{}:{}", start, cell_ref(end, HEADER_ROW)));
}

fn cell_text(sheet: &Worksheet, col: u32, row: u32) -> String {
    sheet
        .get_cell((col, row))
        .map(|c| c.get_value().to_string())
        .unwrap_or_default()
}

fn cell_ref(col: u32, row: u32) -> String {
    format!("{}{}", col_letters(col), row)
}

fn col_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        letters.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Parse "A1:C2" (or a bare "A1") into 1-based (col1, row1, col2, row2).
fn parse_range(range: &str) -> Option<(u32, u32, u32, u32)> {
    let (a, b) = match range.split_once(':') {
        Some((a, b)) => (a, b),
        None => (range, range),
    };
    let (c1, r1) = parse_ref(a)?;
    let (c2, r2) = parse_ref(b)?;
    Some((c1, r1, c2, r2))
}

fn parse_ref(cell: &str) -> Option<(u32, u32)> {
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    let mut col: u32 = 0;
    for ch in letters.chars() {
        let v = (ch.to_ascii_uppercase() as u32).checked_sub('A' as u32)? + 1;
        if v > 26 {
            return None;
        }
        col = col * 26 + v;
    }
    let row: u32 = digits.parse().ok()?;
    if col == 0 {
        return None;
    }
    Some((col, row))
}

// ── Tests ──
