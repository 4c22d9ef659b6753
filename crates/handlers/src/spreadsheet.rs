//! `parse-spreadsheet`: turn an uploaded drawing register into rows.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use docket_core::{Job, JobError};
use docket_infra::jobs::{decode_payload, JobContext, JobHandler};

use crate::decode_base64;
use crate::sheet::SheetReader;

/// Rows searched for the header.
pub const HEADER_SCAN_ROWS: usize = 25;

pub const NO_HEADER_WARNING: &str = "no header row found";

const DRAWING_NO_ALIASES: &[&str] = &[
    "drno",
    "drawingno",
    "drawingnumber",
    "drawingref",
    "drawing",
    "dwgno",
    "dwgnumber",
    "dwg",
    "docno",
    "documentno",
    "documentnumber",
    "sheetno",
];
const TITLE_ALIASES: &[&str] = &["title", "drawingtitle", "documenttitle", "description", "name"];
const REVISION_ALIASES: &[&str] = &["rev", "revision", "revno", "currentrevision", "issue"];
const DATE_ALIASES: &[&str] = &["date", "revdate", "revisiondate", "issuedate", "dateissued"];
const STATUS_ALIASES: &[&str] = &["status", "issuestatus", "suitability", "state"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    file_base64: String,
    #[serde(default)]
    sheet_name: Option<String>,
}

/// One register line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRow {
    pub drawing_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    pub rows: Vec<RegisterRow>,
    /// 1-based row number of the header, if one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_row: Option<usize>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Columns {
    drawing_no: usize,
    title: Option<usize>,
    revision: Option<usize>,
    date: Option<usize>,
    status: Option<usize>,
}

/// Lowercase alphanumerics only: "Dr. No" -> "drno".
pub fn normalize_header(cell: &str) -> String {
    cell.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn find_column(row: &[String], aliases: &[&str]) -> Option<usize> {
    row.iter()
        .position(|cell| aliases.contains(&normalize_header(cell).as_str()))
}

fn detect_columns(row: &[String]) -> Option<Columns> {
    let drawing_no = find_column(row, DRAWING_NO_ALIASES)?;
    Some(Columns {
        drawing_no,
        title: find_column(row, TITLE_ALIASES),
        revision: find_column(row, REVISION_ALIASES),
        date: find_column(row, DATE_ALIASES),
        status: find_column(row, STATUS_ALIASES),
    })
}

/// Normalise a date cell to `YYYY-MM-DD`; `None` when it does not parse.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // Workbook date-times render as "2024-03-01 00:00:00" or "2024-03-01T00:00:00".
    let date_part = raw.split([' ', 'T']).next().unwrap_or(raw);

    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    // Spreadsheet serial day numbers (1900 date system), plausible range only.
    let serial: f64 = raw.parse().ok()?;
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch
        .checked_add_days(Days::new(serial.trunc() as u64))
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn cell(row: &[String], idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Locate the header and collect every non-blank data row beneath it.
pub fn extract_register(rows: &[Vec<String>]) -> Register {
    let header = rows
        .iter()
        .take(HEADER_SCAN_ROWS)
        .enumerate()
        .find_map(|(i, row)| detect_columns(row).map(|cols| (i, cols)));

    let Some((header_idx, cols)) = header else {
        return Register {
            rows: Vec::new(),
            header_row: None,
            warnings: vec![NO_HEADER_WARNING.to_string()],
        };
    };

    let mut out = Vec::new();
    let mut warnings = Vec::new();

    for (offset, row) in rows.iter().enumerate().skip(header_idx + 1) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let line = offset + 1;

        let Some(drawing_no) = cell(row, Some(cols.drawing_no)) else {
            warnings.push(format!("row {line}: missing drawing number"));
            continue;
        };

        let date = cell(row, cols.date).map(|raw| match normalize_date(&raw) {
            Some(date) => date,
            None => {
                warnings.push(format!("row {line}: unrecognised date {raw:?}"));
                raw
            }
        });

        out.push(RegisterRow {
            drawing_no,
            title: cell(row, cols.title),
            revision: cell(row, cols.revision),
            date,
            status: cell(row, cols.status),
        });
    }

    Register {
        rows: out,
        header_row: Some(header_idx + 1),
        warnings,
    }
}

pub struct ParseSpreadsheet {
    sheets: Arc<dyn SheetReader>,
}

impl ParseSpreadsheet {
    pub fn new(sheets: Arc<dyn SheetReader>) -> Self {
        Self { sheets }
    }
}

#[async_trait::async_trait]
impl JobHandler for ParseSpreadsheet {
    async fn handle(&self, job: &Job, _ctx: &JobContext) -> Result<JsonValue, JobError> {
        let payload: Payload = decode_payload(job)?;
        let bytes = decode_base64("fileBase64", &payload.file_base64)?;

        let rows = self
            .sheets
            .read_rows(&bytes, payload.sheet_name.as_deref())
            .map_err(|e| JobError::collaborator(e.to_string()))?;

        let register = extract_register(&rows);
        debug!(
            job_id = %job.id,
            rows = register.rows.len(),
            warnings = register.warnings.len(),
            "spreadsheet parsed"
        );

        serde_json::to_value(register).map_err(|e| JobError::failed(e.to_string()))
    }
}
