use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| Error::io(parent, e)),
        None => Ok(()),
    }
}

/// Column names of `T`, read back from serializing its default value.
fn columns<T: Serialize + Default>() -> Result<csv::StringRecord> {
    let mut probe = csv::Writer::from_writer(Vec::new());
    probe.serialize(T::default())?;
    let bytes = probe
        .into_inner()
        .map_err(|e| Error::Csv(e.into_error().into()))?;
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    Ok(reader.headers()?.clone())
}

/// Write rows as CSV. The header is written even when `rows` is empty.
pub fn write_table<T: Serialize + Default>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(&columns::<T>()?)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(data).map_err(|e| Error::json(path, e))?;
    fs::write(path, &json).map_err(|e| Error::io(path, e))?;
    tracing::debug!(path = %path.display(), bytes = json.len(), "wrote json");
    Ok(())
}
