//! PDF rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! ## Why a dedicated thread?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps
//! thread-local state and whose handles are neither `Send` nor `Sync`.
//! [`PdfiumRasterizer`] binds the library once on its own thread and serves
//! render requests over a channel, so any number of handlers can share it
//! behind an `Arc<dyn PageRasterizer>`.
//!
//! Pages are streamed back one at a time; a 500-page document never needs
//! more than a couple of decoded pages in memory.

use crate::error::PdfImgError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{debug, info};

/// Longest edge pdfium may allocate for one page, whatever the DPI.
const MAX_EDGE_PX: i32 = 12_000;

/// One rasterised page.
#[derive(Debug)]
pub struct RenderedPage {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Pages in the document.
    pub total: usize,
    pub image: DynamicImage,
}

/// Anything that can turn a PDF into page images.
///
/// `sink` is called once per page, in page order. Returning an error from the
/// sink stops rendering and propagates that error.
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `pdf_path` at `dpi`; returns the page count.
    fn rasterize(
        &self,
        pdf_path: &Path,
        dpi: u32,
        sink: &mut dyn FnMut(RenderedPage) -> Result<(), PdfImgError>,
    ) -> Result<usize, PdfImgError>;
}

/// Bind to pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library path.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, PdfImgError> {
    let explicit = lib_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(path) => {
            let path = if path.is_dir() {
                PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(&path))
            } else {
                path
            };
            Pdfium::bind_to_library(&path).map_err(|e| {
                PdfImgError::PdfiumBindingFailed(format!("{}: {:?}", path.display(), e))
            })?
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| PdfImgError::PdfiumBindingFailed(format!("{:?}", e)))?,
    };

    Ok(Pdfium::new(bindings))
}

enum RenderReply {
    Page(RenderedPage),
    Failed(PdfImgError),
}

struct RenderRequest {
    pdf_path: PathBuf,
    dpi: u32,
    reply: mpsc::Sender<RenderReply>,
}

/// pdfium-backed [`PageRasterizer`] owning the library on a worker thread.
#[derive(Debug)]
pub struct PdfiumRasterizer {
    requests: mpsc::Sender<RenderRequest>,
}

impl PdfiumRasterizer {
    /// Start the pdfium thread and bind the library.
    ///
    /// Fails fast if no pdfium library can be loaded.
    pub fn spawn(lib_path: Option<PathBuf>) -> Result<Self, PdfImgError> {
        let (requests, inbox) = mpsc::channel::<RenderRequest>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PdfImgError>>();

        std::thread::Builder::new()
            .name("pdfium".into())
            .spawn(move || {
                let pdfium = match bind_pdfium(lib_path.as_deref()) {
                    Ok(p) => {
                        let _ = ready_tx.send(Ok(()));
                        p
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                for request in inbox {
                    serve(&pdfium, request);
                }
                debug!("pdfium thread exiting");
            })
            .map_err(|e| PdfImgError::Internal(format!("Failed to start pdfium thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| PdfImgError::Internal("pdfium thread exited during startup".into()))??;

        Ok(Self { requests })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf_path: &Path,
        dpi: u32,
        sink: &mut dyn FnMut(RenderedPage) -> Result<(), PdfImgError>,
    ) -> Result<usize, PdfImgError> {
        let (reply, replies) = mpsc::channel();
        self.requests
            .send(RenderRequest {
                pdf_path: pdf_path.to_path_buf(),
                dpi,
                reply,
            })
            .map_err(|_| PdfImgError::Internal("pdfium thread is gone".into()))?;

        let mut rendered = 0;
        // The channel closes once the worker has sent the last page.
        for message in replies {
            match message {
                RenderReply::Page(page) => {
                    rendered += 1;
                    sink(page)?;
                }
                RenderReply::Failed(e) => return Err(e),
            }
        }
        Ok(rendered)
    }
}

/// Render one request on the pdfium thread.
fn serve(pdfium: &Pdfium, request: RenderRequest) {
    let RenderRequest {
        pdf_path,
        dpi,
        reply,
    } = request;

    if let Err(e) = render_all(pdfium, &pdf_path, dpi, &reply) {
        let _ = reply.send(RenderReply::Failed(e));
    }
}

/// Blocking implementation of page rendering.
fn render_all(
    pdfium: &Pdfium,
    pdf_path: &Path,
    dpi: u32,
    reply: &mpsc::Sender<RenderReply>,
) -> Result<(), PdfImgError> {
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfImgError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(MAX_EDGE_PX)
        .set_maximum_height(MAX_EDGE_PX);

    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| PdfImgError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            PdfImgError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {}/{} → {}x{} px",
            idx + 1,
            total_pages,
            image.width(),
            image.height()
        );

        let page = RenderedPage {
            page_num: idx + 1,
            total: total_pages,
            image,
        };
        if reply.send(RenderReply::Page(page)).is_err() {
            // Caller stopped listening (sink error); abandon the rest.
            debug!("Render of {} cancelled by caller", pdf_path.display());
            break;
        }
    }

    Ok(())
}
