//! Keyed record-set persistence for cost statistics

use std::fs;
use std::path::Path;

use super::CostRecord;
use crate::shared::errors::AppError;

/// Write records as pretty JSON, replacing the file atomically
pub fn save_records(path: impl AsRef<Path>, records: &[CostRecord]) -> Result<(), AppError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(records)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read records; a missing file is an empty history
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<CostRecord>, AppError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
