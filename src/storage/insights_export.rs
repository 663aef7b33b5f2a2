//! Writes the insights document to disk.

use std::path::Path;

use crate::metrics::analytics::InsightsDocument;
use crate::storage::database::DatabaseError;

/// Write the document as pretty JSON.
///
/// The file is written next to its destination and renamed into place, so a
/// reader never sees a half-written document.
pub fn write_insights(document: &InsightsDocument, path: &Path) -> Result<(), DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
    }

    let json = document
        .to_json_pretty()
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| DatabaseError::IoError(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| DatabaseError::IoError(e.to_string()))?;

    tracing::info!(
        "Insights generated for {} drivers. Saved to {}",
        document.len(),
        path.display()
    );

    Ok(())
}

/// Read a previously written document.
pub fn read_insights(path: &Path) -> Result<InsightsDocument, DatabaseError> {
    let content = std::fs::read_to_string(path).map_err(|e| DatabaseError::IoError(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| DatabaseError::SerializationError(e.to_string()))
}
