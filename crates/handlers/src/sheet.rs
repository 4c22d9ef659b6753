//! Spreadsheet decoding collaborator.
//!
//! Handlers only ever see a sheet as rows of trimmed cell text.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SheetError {
    #[error("unreadable spreadsheet: {0}")]
    Unreadable(String),
    #[error("sheet not found: {0}")]
    SheetNotFound(String),
    #[error("workbook has no sheets")]
    Empty,
}

pub trait SheetReader: Send + Sync {
    /// Rows of the named sheet (first sheet when `None`).
    fn read_rows(&self, bytes: &[u8], sheet_name: Option<&str>)
    -> Result<Vec<Vec<String>>, SheetError>;
}

/// Workbooks (xlsx/xls/ods) through calamine; anything else as delimited text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSheetReader;

impl SheetReader for DefaultSheetReader {
    fn read_rows(
        &self,
        bytes: &[u8],
        sheet_name: Option<&str>,
    ) -> Result<Vec<Vec<String>>, SheetError> {
        if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
            read_workbook(bytes, sheet_name)
        } else {
            read_delimited(bytes)
        }
    }
}

fn read_workbook(bytes: &[u8], sheet_name: Option<&str>) -> Result<Vec<Vec<String>>, SheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| SheetError::Unreadable(e.to_string()))?;

    let names = workbook.sheet_names();
    let name = match sheet_name {
        Some(wanted) => names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(wanted.trim()))
            .cloned()
            .ok_or_else(|| SheetError::SheetNotFound(wanted.to_string()))?,
        None => names.first().cloned().ok_or(SheetError::Empty)?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| SheetError::Unreadable(e.to_string()))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        // Serial day number; the register parser turns it into a date.
        Data::DateTime(dt) => dt.as_f64().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn read_delimited(bytes: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let delimiter = if first_line.contains(&b'\t') { b'\t' } else { b',' };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(|cell| cell.trim().to_string()).collect())
                .map_err(|e| SheetError::Unreadable(e.to_string()))
        })
        .collect()
}
