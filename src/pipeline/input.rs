//! Input validation: make sure a path names a readable PDF before any work.
//!
//! Two layers of checks exist. [`check_caller_preconditions`] is what a
//! front end runs on user input (file exists, `.pdf` extension). The
//! rasteriser then runs [`validate_document`], which reads the magic bytes so
//! a renamed text file surfaces as a clear [`DocumentOpenError::NotAPdf`]
//! instead of a pdfium parse failure.

use crate::error::DocumentOpenError;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// How far into the file the header may start. Writers sometimes emit a few
/// junk bytes first; pdfium skips them too.
const HEADER_SEARCH_WINDOW: u64 = 1024;

/// Checks a front end performs before invoking the pipeline: the file exists
/// and its name ends in `.pdf` (case-insensitive).
pub fn check_caller_preconditions(path: &Path) -> Result<(), DocumentOpenError> {
    if !path.exists() {
        return Err(DocumentOpenError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(DocumentOpenError::WrongExtension {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Validate existence, read permission, and a `%PDF` header within the first KiB.
pub fn validate_document(path: &Path) -> Result<(), DocumentOpenError> {
    if !path.exists() {
        return Err(DocumentOpenError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocumentOpenError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(DocumentOpenError::NotFound {
                path: path.to_path_buf(),
            });
        }
    };

    // Short files are read in full so the error shows what was there.
    let mut head = Vec::new();
    file.by_ref()
        .take(HEADER_SEARCH_WINDOW)
        .read_to_end(&mut head)
        .map_err(|e| DocumentOpenError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    if !head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC) {
        head.truncate(PDF_MAGIC.len());
        return Err(DocumentOpenError::NotAPdf {
            path: path.to_path_buf(),
            magic: head,
        });
    }

    debug!("Validated PDF: {}", path.display());
    Ok(())
}

/// Base file name recorded as the record's `source_file`.
pub fn document_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
