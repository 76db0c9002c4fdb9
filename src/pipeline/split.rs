//! Document splitting: one PDF in, `page-0001.jpg … page-NNNN.jpg` out.

use crate::error::PdfImgError;
use crate::pipeline::encode::save_jpeg;
use crate::pipeline::pages::{page_file_name, MAX_PAGES};
use crate::pipeline::render::PageRasterizer;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn check_pdf(path: &Path) -> Result<(), PdfImgError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PdfImgError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(PdfImgError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(PdfImgError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Rasterise every page of `source` into `dest_dir` as numbered JPEGs.
///
/// `dest_dir` must exist. Pages already written stay on disk if a later page
/// fails. Returns the number of pages written.
pub fn split_document(
    source: &Path,
    dest_dir: &Path,
    rasterizer: &dyn PageRasterizer,
    dpi: u32,
    quality: u8,
) -> Result<usize, PdfImgError> {
    check_pdf(source)?;

    rasterizer.rasterize(source, dpi, &mut |page| {
        if page.total > MAX_PAGES {
            return Err(PdfImgError::TooManyPages {
                pages: page.total,
                max: MAX_PAGES,
            });
        }
        let path = dest_dir.join(page_file_name(page.page_num));
        let bytes = save_jpeg(&page.image, &path, quality)?;
        debug!(
            "Page {}/{} → {} ({} bytes)",
            page.page_num,
            page.total,
            path.display(),
            bytes
        );
        Ok(())
    })
}
