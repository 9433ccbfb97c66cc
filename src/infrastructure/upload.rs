use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;
use crate::domain::error::BulkUpdateError;

/// An uploaded spreadsheet staged on local disk under a unique name.
/// The file is removed when the value is dropped, on every exit path.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    original_name: String,
}

impl StagedUpload {
    pub async fn stage(dir: &Path, original_name: &str, bytes: &[u8]) -> Result<Self, BulkUpdateError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BulkUpdateError::Upload(format!("failed to create upload dir: {e}")))?;

        let suffix = extension_suffix(original_name);
        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|e| BulkUpdateError::Upload(format!("failed to create staging file: {e}")))?;

        tokio::fs::write(file.path(), bytes)
            .await
            .map_err(|e| BulkUpdateError::Upload(format!("failed to write staging file: {e}")))?;

        debug!("Staged upload '{}' ({} bytes) at {}", original_name, bytes.len(), file.path().display());
        Ok(Self {
            file,
            original_name: original_name.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        debug!("Removing staged upload {}", self.file.path().display());
    }
}

/// Keeps the client's extension so the reader can pick a parser; anything odd is dropped.
fn extension_suffix(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}
