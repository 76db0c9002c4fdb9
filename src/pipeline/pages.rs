//! Page-image naming, discovery, ordering and cleanup.
//!
//! Split jobs write `page-0001.jpg`, `page-0002.jpg`, … into one
//! subdirectory per job. A join treats everything under the inbound-images
//! root as one page stream, so the order of that stream must be explicit:
//! pages are sorted by [`PageKey`] = (relative subdirectory, stem prefix,
//! numeric page index, file name) rather than by raw path string. For
//! zero-padded names this is plain lexicographic order, and `page-10.jpg`
//! still follows `page-9.jpg` without padding.

use crate::error::PdfImgError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions picked up by a join, compared case-insensitively.
pub const RASTER_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tiff", "bmp", "jfif"];

/// Highest page number the four-digit naming scheme can express.
pub const MAX_PAGES: usize = 9999;

/// File name of the 1-indexed page `page_num`: `page-0001.jpg`.
pub fn page_file_name(page_num: usize) -> String {
    format!("page-{page_num:04}.jpg")
}

/// Whether `path` has one of the [`RASTER_EXTENSIONS`].
pub fn is_page_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            RASTER_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Sort key of one page image within a join root.
///
/// Fields compare in declaration order. A stem without digits sorts before
/// numbered stems sharing its prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageKey {
    /// Parent directory relative to the join root (empty for root files).
    pub dir: PathBuf,
    /// File stem with its trailing digit run removed (`docA-page-`).
    pub prefix: String,
    /// Trailing digit run of the file stem, if any.
    pub index: Option<u64>,
    pub name: String,
}

impl PageKey {
    /// Build the key for `path`, which must live under `root`.
    pub fn new(root: &Path, path: &Path) -> Self {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let dir = relative
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (prefix, index) = split_trailing_number(&stem);
        Self {
            dir,
            prefix: prefix.to_string(),
            index,
            name,
        }
    }
}

/// Split `stem` into the text before its trailing ASCII digit run and that
/// run's value (`page-0012` → (`page-`, 12)).
fn split_trailing_number(stem: &str) -> (&str, Option<u64>) {
    let prefix = stem.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &stem[prefix.len()..];
    if digits.is_empty() {
        return (stem, None);
    }
    match digits.parse() {
        Ok(n) => (prefix, Some(n)),
        // Too long for u64: fall back to comparing the whole stem as text.
        Err(_) => (stem, None),
    }
}

/// Order `paths` (all under `root`) into page order.
pub fn sort_pages(root: &Path, paths: &mut [PathBuf]) {
    paths.sort_by_cached_key(|p| PageKey::new(root, p));
}

/// Recursively collect every page image under `root`, in page order.
///
/// Unreadable entries are skipped with a warning; a missing root is an
/// error.
pub fn collect_page_images(root: &Path) -> Result<Vec<PathBuf>, PdfImgError> {
    if !root.is_dir() {
        return Err(PdfImgError::FileNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() && is_page_image(entry.path()) {
            images.push(entry.into_path());
        }
    }

    sort_pages(root, &mut images);
    debug!("Found {} page images under {}", images.len(), root.display());
    Ok(images)
}

/// Summed on-disk size of `paths`.
pub fn total_size(paths: &[PathBuf]) -> Result<u64, PdfImgError> {
    paths.iter().try_fold(0u64, |acc, p| {
        let len = std::fs::metadata(p)
            .map_err(|e| PdfImgError::io(p, e))?
            .len();
        Ok(acc + len)
    })
}

/// Empty the join working set under `root`.
///
/// Removes every page image (at any depth) and every subdirectory, which
/// also covers images that belonged to other requests. The root itself
/// survives. Individual failures are logged and skipped; the count of
/// removed entries is returned.
pub fn clear_tree(root: &Path) -> usize {
    let mut removed = 0;

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} for cleanup: {}", root.display(), e);
            return 0;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                continue;
            }
        };

        let result = if file_type.is_dir() {
            std::fs::remove_dir_all(&path)
        } else if is_page_image(&path) {
            std::fs::remove_file(&path)
        } else {
            continue;
        };

        match result {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    removed
}
