use thiserror::Error;

#[derive(Debug, Error)]
pub enum BulkUpdateError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid webhook for entity '{entity}'! HTTP status: {status}")]
    InvalidWebhook { entity: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("No identifier column found in spreadsheet. Expected: {expected:?}")]
    MissingIdColumn { expected: Vec<String> },

    #[error("File read error: {0}")]
    FileRead(String),

    #[error("Invalid identifier '{value}' at row {row}")]
    InvalidIdentifier { row: usize, value: String },

    #[error("No identifiers found in spreadsheet")]
    EmptyIdentifierList,

    #[error("Upload error: {0}")]
    Upload(String),
}
