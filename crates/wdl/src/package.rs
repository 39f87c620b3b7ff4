//! Deterministic ZIP packaging of a loaded document.

use std::io::{Cursor, Write};

use tracing::debug;
use zip::{CompressionMethod, DateTime, ZipWriter, result::ZipError, write::SimpleFileOptions};

use crate::{Document, DocumentError};

/// Zip the main file (at the archive root) and its imports.
///
/// Timestamps and permissions are fixed, so the same sources always produce
/// the same bytes.
pub fn package(document: &Document) -> Result<Vec<u8>, DocumentError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for source in document.sources() {
        writer.start_file(source.archive_path.as_str(), options)?;
        writer.write_all(source.text.as_bytes()).map_err(ZipError::from)?;
    }
    let bytes = writer.finish()?.into_inner();
    debug!("zipped {} ({} files, {} bytes)", document.main_file_name(), document.imports.len() + 1, bytes.len());
    Ok(bytes)
}
