use std::path::Path;

use calamine::{open_workbook_auto, DataType, Reader};
use tracing::{debug, error, info, warn};
use crate::domain::error::BulkUpdateError;
use super::{CellValue, Table};

/// Loads the first worksheet; its first row is the header.
pub fn parse_workbook(path: &Path) -> Result<Table, BulkUpdateError> {
    debug!("Opening workbook: {}", path.display());
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        error!("Failed to open workbook {}: {}", path.display(), e);
        BulkUpdateError::FileRead(e.to_string())
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| BulkUpdateError::FileRead("workbook has no sheets".to_string()))?
        .map_err(|e| {
            error!("Failed to read first sheet of {}: {}", path.display(), e);
            BulkUpdateError::FileRead(e.to_string())
        })?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(header_text).collect(),
        None => {
            warn!("First sheet of {} is empty", path.display());
            Vec::new()
        }
    };
    debug!("Workbook headers: {:?}", headers);

    let rows: Vec<Vec<CellValue>> = rows
        .map(|row| row.iter().map(cell_value).collect())
        .collect();

    info!("Parsed {} rows from workbook", rows.len());
    Ok(Table { headers, rows })
}

fn header_text(cell: &DataType) -> String {
    match cell {
        DataType::String(s) => s.trim().to_string(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) => f.to_string(),
        DataType::Empty => String::new(),
        other => format!("{other:?}"),
    }
}

fn cell_value(cell: &DataType) -> CellValue {
    match cell {
        DataType::Empty => CellValue::Empty,
        DataType::Int(i) => CellValue::Int(*i),
        DataType::Float(f) => CellValue::Float(*f),
        DataType::String(s) if s.trim().is_empty() => CellValue::Empty,
        DataType::String(s) => CellValue::Text(s.clone()),
        other => CellValue::Other(format!("{other:?}")),
    }
}
