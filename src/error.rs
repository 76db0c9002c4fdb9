//! Error types for the edgequake-pdfimg library.
//!
//! Two distinct error types reflect two distinct failure domains:
//!
//! * [`PdfImgError`]: a single conversion job failed (corrupt source,
//!   codec error, disk error, empty page set). Jobs are isolated: the
//!   dispatcher turns this into a [`crate::output::JobReport`] and the
//!   watcher keeps running.
//!
//! * [`WatchError`]: the filesystem subscription itself failed. Transient
//!   failures are retried by the watcher; running out of retries is the only
//!   way a watcher worker dies, which the supervisor treats as fatal.

use std::path::PathBuf;
use thiserror::Error;

/// All job-level errors returned by the edgequake-pdfimg library.
#[derive(Debug, Error)]
pub enum PdfImgError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("Source file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A `.txt` request did not name a usable document.
    #[error("Invalid join request '{path}': {reason}")]
    InvalidRequest { path: PathBuf, reason: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The page-file naming scheme only covers four digits.
    #[error("Document has {pages} pages; at most {max} are supported")]
    TooManyPages { pages: usize, max: usize },

    /// lopdf could not build or write the output document.
    #[error("Failed to assemble '{path}': {detail}")]
    AssemblyFailed { path: PathBuf, detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// An image could not be decoded, resampled or re-encoded.
    #[error("Image error for '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The file extension is not one of the recognised raster formats.
    #[error("Unsupported image format: '{path}'")]
    UnsupportedImage { path: PathBuf },

    /// A join request found no page images under the inbound-images root.
    #[error("No page images found under '{root}'")]
    NoPageImages { root: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Filesystem operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
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
Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib), place the\n\
library in the working directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PdfImgError {
    /// Attach a path to an `std::io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a path to an `image::ImageError`.
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the filesystem event subscription.
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    /// The OS-level watch could not be created or attached to the directory.
    #[error("Failed to watch '{path}': {detail}")]
    Subscribe { path: PathBuf, detail: String },

    /// A bounded retry policy gave up.
    #[error("Watcher for '{path}' gave up after {attempts} restarts; last error: {last_error}")]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },
}
