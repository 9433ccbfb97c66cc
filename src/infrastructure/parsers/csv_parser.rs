use csv::ReaderBuilder;
use std::io::Cursor;
use tracing::{debug, info, error};
use crate::domain::error::BulkUpdateError;
use super::{CellValue, Table};

pub fn parse_csv(bytes: &[u8]) -> Result<Table, BulkUpdateError> {
    debug!("Creating CSV reader with headers enabled");
    let cursor = Cursor::new(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(cursor);

    let headers: Vec<String> = reader.headers()
        .map_err(|e| {
            error!("Failed to read CSV headers: {}", e);
            BulkUpdateError::FileRead(e.to_string())
        })?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    debug!("CSV headers: {:?}", headers);
    info!("Found {} columns in CSV", headers.len());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            error!("Failed to read CSV record at row {}: {}", rows.len() + 1, e);
            BulkUpdateError::FileRead(e.to_string())
        })?;

        let row = record
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();
        rows.push(row);

        if rows.len() % 1000 == 0 {
            debug!("Processed {} CSV rows", rows.len());
        }
    }

    info!("Parsed {} rows from CSV", rows.len());
    Ok(Table { headers, rows })
}
