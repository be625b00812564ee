//! Error types for the intake-parser library.
//!
//! Every failure in this crate is fatal to the document being processed:
//! there is no such thing as a partially extracted patient record. The four
//! failure families callers care about each get their own type:
//!
//! * [`DocumentOpenError`]: the input PDF could not be opened at all.
//! * [`ServiceError`]: the call to the vision service failed.
//! * [`MalformedResponseError`]: the service answered, but not with a JSON
//!   object.
//! * [`ValidationError`]: the persisted record collection is unreadable.
//!
//! [`IntakeError`] is the umbrella returned by the public entry points. It
//! wraps the families above (adding the page number where one applies) plus
//! configuration and I/O failures.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the intake-parser library.
#[derive(Debug, Error)]
pub enum IntakeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input document could not be opened.
    #[error(transparent)]
    DocumentOpen(#[from] DocumentOpenError),

    /// pdfium opened the document but failed to render a page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The vision service call for a page failed.
    #[error("Page {page}: {source}")]
    Service {
        page: usize,
        #[source]
        source: ServiceError,
    },

    /// The vision service reply for a page was not a JSON object.
    #[error("Page {page}: {source}")]
    MalformedResponse {
        page: usize,
        #[source]
        source: MalformedResponseError,
    },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The persisted record collection exists but cannot be parsed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Could not read the record store file.
    #[error("Failed to read record store '{path}': {source}")]
    StoreReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write the record store file.
    #[error("Failed to write record store '{path}': {source}")]
    StoreWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform (https://github.com/bblanchon/pdfium-binaries)\n\
and either place it on the system library path or set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntakeError {
    /// The page the failure is attributed to, when there is one.
    pub fn page(&self) -> Option<usize> {
        match self {
            IntakeError::RasterisationFailed { page, .. }
            | IntakeError::Service { page, .. }
            | IntakeError::MalformedResponse { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// The input document could not be opened as a PDF.
#[derive(Debug, Clone, Error)]
pub enum DocumentOpenError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The path does not carry a `.pdf` extension.
    #[error("Not a PDF file: '{path}'\nPlease provide a file ending in .pdf.")]
    WrongExtension { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// PDF requires a password but none (or the wrong one) was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// PDF opened fine but has no pages.
    #[error("PDF '{path}' has no pages")]
    Empty { path: PathBuf },
}

/// The call to the external vision service failed.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The provider returned an error (network, auth, quota, ...).
    #[error("vision service '{provider}' call failed: {message}")]
    Call { provider: String, message: String },

    /// The call did not complete within the configured timeout.
    #[error("vision service call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// The service reply could not be parsed into a JSON object.
#[derive(Debug, Clone, Error)]
#[error("malformed extraction response: {reason} (reply starts with {excerpt:?})")]
pub struct MalformedResponseError {
    pub reason: String,
    /// First characters of the normalised reply, for diagnostics.
    pub excerpt: String,
}

impl MalformedResponseError {
    const EXCERPT_CHARS: usize = 80;

    pub(crate) fn new(reason: impl Into<String>, payload: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: payload.chars().take(Self::EXCERPT_CHARS).collect(),
        }
    }
}

/// The persisted record collection exists but is not a JSON array of objects.
#[derive(Debug, Clone, Error)]
#[error("Record store '{path}' is not a valid record collection: {detail}")]
pub struct ValidationError {
    pub path: PathBuf,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_keeps_cause() {
        let e = IntakeError::Service {
            page: 2,
            source: ServiceError::Call {
                provider: "anthropic".into(),
                message: "401 invalid x-api-key".into(),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 2"), "got: {msg}");
        assert!(msg.contains("401 invalid x-api-key"), "got: {msg}");
        assert_eq!(e.page(), Some(2));
    }

    #[test]
    fn timeout_display() {
        let e = ServiceError::Timeout { secs: 60 };
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn document_open_is_transparent() {
        let e: IntakeError = DocumentOpenError::NotFound {
            path: PathBuf::from("/nope/form.pdf"),
        }
        .into();
        assert!(e.to_string().contains("/nope/form.pdf"));
        assert_eq!(e.page(), None);
    }

    #[test]
    fn malformed_excerpt_is_truncated() {
        let long = "x".repeat(500);
        let e = MalformedResponseError::new("expected value", &long);
        assert_eq!(e.excerpt.chars().count(), 80);
    }

    #[test]
    fn validation_display() {
        let e = ValidationError {
            path: PathBuf::from("records.json"),
            detail: "expected `[`".into(),
        };
        assert!(e.to_string().contains("records.json"));
        assert!(e.to_string().contains("expected `[`"));
    }
}
