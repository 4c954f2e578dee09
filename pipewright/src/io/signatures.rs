//! Schema and sample profiling of the input data directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use calamine::{Reader, open_workbook_auto};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Signature, SignatureMap};

/// Data rows sampled per file, after the header.
pub const SAMPLE_ROWS: usize = 2;

/// Extensions the profiler reads (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "xls", "xlsx"];

/// Profile every supported file directly inside `dir`.
///
/// Files that cannot be read are logged and left out of the map; only a
/// missing or unreadable directory is an error.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn extract_signatures(dir: &Path) -> Result<SignatureMap> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("read data directory {}", dir.display()))?;

    let mut signatures = SignatureMap::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list data directory {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(extension) = supported_extension(&path) else {
            debug!(path = %path.display(), "skipping unsupported file");
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();

        let result = if extension == "csv" {
            read_csv_signature(&path)
        } else {
            read_workbook_signature(&path)
        };
        match result {
            Ok(signature) => {
                debug!(file = %name, columns = signature.columns.len(), "profiled file");
                signatures.insert(name, signature);
            }
            Err(err) => warn!(file = %name, err = %format!("{err:#}"), "skipping unreadable file"),
        }
    }

    info!(files = signatures.len(), "profiled data directory");
    Ok(signatures)
}

fn supported_extension(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

fn read_csv_signature(path: &Path) -> Result<Signature> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;

    let columns: Vec<String> = reader
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();
    if columns.iter().all(String::is_empty) {
        bail!("{} has no header row", path.display());
    }

    let mut sample = Vec::with_capacity(SAMPLE_ROWS);
    for record in reader.records().take(SAMPLE_ROWS) {
        let record = record.with_context(|| format!("read row of {}", path.display()))?;
        sample.push(align(record.iter().map(str::to_string), columns.len()));
    }
    Ok(Signature { columns, sample })
}

fn read_workbook_signature(path: &Path) -> Result<Signature> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("{} has no worksheets", path.display()))?
        .with_context(|| format!("read first worksheet of {}", path.display()))?;

    let mut rows = range.rows();
    let columns: Vec<String> = rows
        .next()
        .map(|header| header.iter().map(|cell| cell.to_string().trim().to_string()).collect())
        .unwrap_or_default();
    if columns.iter().all(String::is_empty) {
        bail!("{} has no header row", path.display());
    }

    let sample = rows
        .take(SAMPLE_ROWS)
        .map(|row| align(row.iter().map(ToString::to_string), columns.len()))
        .collect();
    Ok(Signature { columns, sample })
}

/// Pad or cut a row so it lines up with the header.
fn align(cells: impl Iterator<Item = String>, width: usize) -> Vec<String> {
    let mut row: Vec<String> = cells.take(width).collect();
    row.resize(width, String::new());
    row
}
