use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;

pub const COL_FILE_NAME: &str = "File Name";
pub const COL_FILE_PATH: &str = "File Path";
pub const COL_TITLE: &str = "Title";
pub const COL_DESCRIPTION: &str = "Description";
pub const COL_CATEGORY: &str = "Category";
pub const COL_CLASS: &str = "Class";

/// Columns every upload sheet must carry, in the order they are checked.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    COL_FILE_NAME,
    COL_FILE_PATH,
    COL_TITLE,
    COL_CATEGORY,
    COL_CLASS,
];

/// One data row of an upload sheet. `row` is 1-indexed below the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub row: usize,
    pub file_name: String,
    pub file_path: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub class_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("Failed to read spreadsheet {path}: {message}")]
    Open { path: String, message: String },
    #[error("Sheet '{0}' not found in workbook")]
    SheetNotFound(String),
    #[error("Spreadsheet is empty")]
    Empty,
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Row {row}: '{column}' is required")]
    EmptyField { row: usize, column: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetCheck {
    pub is_valid: bool,
    pub message: String,
}

pub fn check_sheet(path: &Path, sheet_name: &str) -> SheetCheck {
    match read_sheet(path, sheet_name) {
        Ok(rows) => SheetCheck {
            is_valid: true,
            message: format!("Spreadsheet is valid ({} rows)", rows.len()),
        },
        Err(e) => SheetCheck {
            is_valid: false,
            message: e.to_string(),
        },
    }
}

/// Reads and validates an upload sheet, failing on the first structural problem.
pub fn read_sheet(path: &Path, sheet_name: &str) -> Result<Vec<SheetRow>, SheetError> {
    let grid = load_grid(path, sheet_name)?;
    let Some(header) = grid.first() else {
        return Err(SheetError::Empty);
    };
    if header.iter().all(|c| c.trim().is_empty()) {
        return Err(SheetError::Empty);
    }

    let mut idx = HashMap::<&str, usize>::new();
    for (i, name) in header.iter().enumerate() {
        idx.entry(name.trim()).or_insert(i);
    }
    for col in REQUIRED_COLUMNS {
        if !idx.contains_key(col) {
            return Err(SheetError::MissingColumn(col.to_string()));
        }
    }

    let cell = |cells: &[String], col: &str| -> String {
        idx.get(col)
            .and_then(|i| cells.get(*i))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let mut rows = Vec::new();
    for (row_no, cells) in grid.iter().enumerate().skip(1) {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        for col in REQUIRED_COLUMNS {
            if cell(cells, col).is_empty() {
                return Err(SheetError::EmptyField {
                    row: row_no,
                    column: col.to_string(),
                });
            }
        }
        rows.push(SheetRow {
            row: row_no,
            file_name: cell(cells, COL_FILE_NAME),
            file_path: cell(cells, COL_FILE_PATH),
            title: cell(cells, COL_TITLE),
            description: cell(cells, COL_DESCRIPTION),
            category: cell(cells, COL_CATEGORY),
            class_name: cell(cells, COL_CLASS),
        });
    }
    Ok(rows)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn load_grid(path: &Path, sheet_name: &str) -> Result<Vec<Vec<String>>, SheetError> {
    let open_err = |message: String| SheetError::Open {
        path: path.to_string_lossy().to_string(),
        message,
    };

    if is_csv(path) {
        let text = std::fs::read_to_string(path).map_err(|e| open_err(e.to_string()))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        return Ok(parse_csv(text));
    }

    let mut workbook = open_workbook_auto(path).map_err(|e| open_err(e.to_string()))?;
    let wanted = sheet_name.trim();
    let name = if wanted.is_empty() {
        workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(SheetError::Empty)?
    } else if workbook.sheet_names().iter().any(|n| n == wanted) {
        wanted.to_string()
    } else {
        return Err(SheetError::SheetNotFound(wanted.to_string()));
    };
    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| open_err(e.to_string()))?;
    Ok(range
        .rows()
        .map(|r| r.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // Spreadsheet apps store "10" as 10.0; keep the label the user typed.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string().trim().to_string(),
    }
}

/// Splits CSV text into records. Quoted fields may hold commas, doubled quotes
/// and line breaks; a bare `\r\n` or `\n` ends a record.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => record.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut buf));
                records.push(std::mem::take(&mut record));
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() || !record.is_empty() {
        record.push(buf);
        records.push(record);
    }
    records
}
