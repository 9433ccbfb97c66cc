pub mod csv_parser;
pub mod xlsx_parser;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use crate::domain::{
    error::BulkUpdateError,
    models::IdentifierList,
    ports::IdentifierReader,
};

/// Identifier column names, in priority order.
pub const ID_COLUMNS: [&str; 4] = ["ID", "Contact ID", "Company ID", "Deal ID"];

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
    Other(String),
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// First candidate from [`ID_COLUMNS`] present in the header, with its index.
    pub fn id_column(&self) -> Option<(usize, &'static str)> {
        ID_COLUMNS.iter().find_map(|candidate| {
            self.headers
                .iter()
                .position(|header| header.trim() == *candidate)
                .map(|idx| (idx, *candidate))
        })
    }

    pub fn identifiers(&self) -> Result<IdentifierList, BulkUpdateError> {
        let (column, name) = self.id_column().ok_or_else(|| BulkUpdateError::MissingIdColumn {
            expected: ID_COLUMNS.iter().map(|c| c.to_string()).collect(),
        })?;
        debug!("Using identifier column '{}' at index {}", name, column);

        let mut ids = Vec::with_capacity(self.rows.len());
        for (idx, row) in self.rows.iter().enumerate() {
            // Header is spreadsheet row 1.
            let row_number = idx + 2;
            if let Some(id) = coerce_identifier(row.get(column).unwrap_or(&CellValue::Empty), row_number)? {
                ids.push(id);
            }
        }
        Ok(IdentifierList::from(ids))
    }
}

fn coerce_identifier(cell: &CellValue, row: usize) -> Result<Option<i64>, BulkUpdateError> {
    let invalid = |value: String| BulkUpdateError::InvalidIdentifier { row, value };
    match cell {
        CellValue::Empty => Ok(None),
        CellValue::Int(i) => Ok(Some(*i)),
        CellValue::Float(f) => float_to_id(*f).map(Some).ok_or_else(|| invalid(f.to_string())),
        CellValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Some(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(float_to_id)
                .map(Some)
                .ok_or_else(|| invalid(s.clone()))
        }
        CellValue::Other(raw) => Err(invalid(raw.clone())),
    }
}

/// Truncates toward zero, the way numeric spreadsheet cells are read as ids.
fn float_to_id(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Csv,
    Workbook,
}

fn detect_kind(path: &Path) -> Result<FileKind, BulkUpdateError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => Ok(FileKind::Csv),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(FileKind::Workbook),
        "" => {
            warn!("No file extension found for: {}", path.display());
            Err(BulkUpdateError::FileRead(format!("cannot detect file type of {}", path.display())))
        }
        other => Err(BulkUpdateError::FileRead(format!("unsupported file type: {other}"))),
    }
}

fn load_table(path: &Path) -> Result<Table, BulkUpdateError> {
    match detect_kind(path)? {
        FileKind::Csv => {
            let bytes = std::fs::read(path).map_err(|e| BulkUpdateError::FileRead(e.to_string()))?;
            csv_parser::parse_csv(&bytes)
        }
        FileKind::Workbook => xlsx_parser::parse_workbook(path),
    }
}

/// Reads identifiers from `.csv` files and calamine-supported workbooks.
#[derive(Debug, Default, Clone)]
pub struct SpreadsheetReader;

impl SpreadsheetReader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentifierReader for SpreadsheetReader {
    async fn read_identifiers(&self, path: &Path) -> Result<IdentifierList, BulkUpdateError> {
        let path: PathBuf = path.to_path_buf();
        debug!("Reading identifiers from {}", path.display());

        let ids = tokio::task::spawn_blocking(move || load_table(&path)?.identifiers())
            .await
            .map_err(|e| BulkUpdateError::FileRead(format!("reader task failed: {e}")))??;

        info!("Read {} identifiers from spreadsheet", ids.len());
        Ok(ids)
    }
}
