//! Error types for the edgequake-figdesc library.
//!
//! Failures fall into two tiers:
//!
//! * [`FigDescError`] — **Fatal**: the document cannot be reconciled at all
//!   (bad input file, analysis service unreachable, provider not configured).
//!   Returned as `Err(FigDescError)` from the top-level `parse*` functions.
//!
//! * [`RegionError`], [`DescribeError`] — **Non-fatal**: one figure region
//!   could not be rendered or described. The region is skipped or carries a
//!   visible placeholder and every other figure is processed normally.
//!
//! [`SpliceError`] is the precondition check of the final text splice; inside
//! the pipeline it is reported through [`FigDescError::Splice`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-figdesc library.
#[derive(Debug, Error)]
pub enum FigDescError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A directory was expected (batch mode) but the path is something else.
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// The output file exists and overwriting was not requested.
    #[error("Output '{path}' already exists. Pass --overwrite to replace it.")]
    OutputExists { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Layout analysis errors ────────────────────────────────────────────
    /// Endpoint or key of the layout analysis service is missing.
    #[error("Layout analysis service is not configured: {hint}")]
    AnalyzerNotConfigured { hint: String },

    /// The analysis service could not produce a result for the document.
    #[error("Layout analysis failed for '{path}': {detail}")]
    AnalysisFailed { path: PathBuf, detail: String },

    /// The analysis operation did not finish in time.
    #[error("Layout analysis of '{path}' did not finish within {secs}s")]
    AnalysisTimeout { path: PathBuf, secs: u64 },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Reconciliation errors ─────────────────────────────────────────────
    /// Replacement ranges violated the splice precondition.
    #[error(transparent)]
    Splice(#[from] SpliceError),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the directory that receives extracted images.
    #[error("Failed to create image directory '{path}': {source}")]
    ImageDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single figure region.
///
/// The region contributes no image and no description; sibling regions and
/// the rest of the document are unaffected.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum RegionError {
    /// The bounding polygon cannot be turned into a crop rectangle.
    #[error("Page {page}: invalid bounding polygon: {detail}")]
    InvalidPolygon { page: u32, detail: String },

    /// The region references a page the document does not have.
    #[error("Page {page} not found (document has {total} pages)")]
    PageNotFound { page: u32, total: usize },

    /// The page reports a zero or non-finite extent, so no scale ratio exists.
    #[error("Page {page}: unusable page extent {width}x{height}")]
    BadPageExtent { page: u32, width: f64, height: f64 },

    /// The page renderer failed.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: u32, detail: String },

    /// The blocking render task panicked or was cancelled.
    #[error("Page {page}: render task aborted: {detail}")]
    TaskAborted { page: u32, detail: String },
}

/// A single failed call to the vision model.
///
/// The message is kept verbatim so the retry wrapper can hand the caller the
/// error of the last attempt unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModelError {
    pub message: String,
}

impl ModelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why the description engine produced no text for an image.
#[derive(Debug, Clone, Error)]
pub enum DescribeError {
    /// The model call failed after all attempts.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The classification step returned something that is not the expected JSON.
    #[error("Classifier reply is not valid JSON ({detail}): {raw:?}")]
    UnparsableClassification { raw: String, detail: String },
}

/// Violations of the splice precondition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpliceError {
    /// A replacement range lies outside the document text.
    #[error("Replacement {start}..{end} is outside the document ({len} bytes)")]
    OutOfBounds { start: usize, end: usize, len: usize },

    /// A replacement boundary falls inside a multi-byte character.
    #[error("Replacement boundary {offset} is not on a UTF-8 character boundary")]
    NotCharBoundary { offset: usize },

    /// Two replacement ranges overlap.
    #[error("Replacements {first_start}..{first_end} and {second_start}..{second_end} overlap")]
    Overlap {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },
}
