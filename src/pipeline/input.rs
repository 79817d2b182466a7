//! Input validation: the user-supplied path must be a readable PDF.
//!
//! Checking the `%PDF` magic up front gives a clear error instead of an
//! opaque failure from the analysis service or from pdfium.

use crate::error::FigDescError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn resolve_local(path: &Path) -> Result<PathBuf, FigDescError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(FigDescError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(FigDescError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(FigDescError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(FigDescError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Every `*.pdf` (any case) directly inside `dir`, sorted by name.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, FigDescError> {
    if !dir.is_dir() {
        return Err(FigDescError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FigDescError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => FigDescError::Internal(format!("cannot list '{}': {}", dir.display(), e)),
    })?;

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    Ok(pdfs)
}
