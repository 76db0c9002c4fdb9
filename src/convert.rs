//! Eager entry points for both conversion directions.
//!
//! These are synchronous and can take minutes on large inputs; the watcher
//! runs them on tokio's blocking pool. Callers that are not the daemon (tests,
//! one-off tools) can call them directly.

use crate::config::DaemonConfig;
use crate::error::PdfImgError;
use crate::output::{JoinReport, SplitReport};
use crate::pipeline::compose::compose_document;
use crate::pipeline::compress::AdaptiveCompressor;
use crate::pipeline::pages::{clear_tree, collect_page_images, total_size};
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::split::split_document;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{info, warn};

/// Job name for a source document: its file stem.
pub fn job_name(source: &Path) -> Option<String> {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

/// Base name for join artifacts from the raw request text.
///
/// Surrounding whitespace and one trailing extension are removed
/// (`" report.pdf\n"` → `report`). Names that are empty or would escape the
/// output directory are rejected.
pub fn document_base_name(requested: &str) -> Result<String, String> {
    let trimmed = requested.trim();
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(format!("'{trimmed}' is not a plain file name"));
    }
    let base = match trimmed.rsplit_once('.') {
        Some((prefix, _)) => prefix,
        None => trimmed,
    };
    if base.is_empty() {
        return Err("request names no document".into());
    }
    if base == "." || base == ".." {
        return Err(format!("'{trimmed}' is not a plain file name"));
    }
    Ok(base.to_string())
}

/// Split `source` into `<output_images_dir>/<job>/page-NNNN.jpg`.
///
/// The job directory is created if missing. The source is left in place;
/// consuming it is the caller's business.
pub fn split_pdf(
    source: &Path,
    config: &DaemonConfig,
    rasterizer: &dyn PageRasterizer,
) -> Result<SplitReport, PdfImgError> {
    let start = Instant::now();
    let job = job_name(source).ok_or_else(|| PdfImgError::InvalidRequest {
        path: source.to_path_buf(),
        reason: "source has no file name".into(),
    })?;

    let output_dir = config.output_images_dir.join(&job);
    std::fs::create_dir_all(&output_dir).map_err(|e| PdfImgError::io(&output_dir, e))?;

    info!("Splitting {} into {}", source.display(), output_dir.display());
    let pages = split_document(
        source,
        &output_dir,
        rasterizer,
        config.render_dpi,
        config.split_jpeg_quality,
    )?;
    let duration_ms = start.elapsed().as_millis() as u64;
    info!("Splitting {} done: {} pages in {}ms", source.display(), pages, duration_ms);

    Ok(SplitReport {
        job,
        source: source.to_path_buf(),
        output_dir,
        pages,
        duration_ms,
    })
}

/// Serialises joins.
///
/// Every join reads, rewrites and finally deletes the whole inbound-images
/// tree, so two joins must never overlap. Requests queue on this lock.
#[derive(Debug, Default)]
pub struct JoinLock(Mutex<()>);

impl JoinLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        // A panicked join leaves nothing to protect; keep serving.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Join every page image under `input_images_dir` into
/// `<name>_max.pdf` and the size-budgeted `<name>_min.pdf`.
///
/// `requested` is the raw request text. Whatever happens, the inbound-images
/// tree is emptied afterwards (all page images and subdirectories, including
/// those of other requests).
pub fn join_images(
    requested: &str,
    config: &DaemonConfig,
    lock: &JoinLock,
) -> Result<JoinReport, PdfImgError> {
    let _guard = lock.acquire();

    let result = document_base_name(requested)
        .map_err(|reason| PdfImgError::InvalidRequest {
            path: config.input_images_dir.clone(),
            reason,
        })
        .and_then(|name| run_join(&name, config));

    clear_inbox(config);
    result
}

/// Empty the inbound-images tree without joining.
///
/// Used when a request cannot even be read; waits for any running join.
pub fn cleanup_join_tree(config: &DaemonConfig, lock: &JoinLock) -> usize {
    let _guard = lock.acquire();
    clear_inbox(config)
}

fn clear_inbox(config: &DaemonConfig) -> usize {
    info!("Cleaning up {}", config.input_images_dir.display());
    let removed = clear_tree(&config.input_images_dir);
    info!("Cleaning up done: {} entries removed", removed);
    removed
}

fn run_join(name: &str, config: &DaemonConfig) -> Result<JoinReport, PdfImgError> {
    let start = Instant::now();
    let root = &config.input_images_dir;

    let images = collect_page_images(root)?;
    if images.is_empty() {
        return Err(PdfImgError::NoPageImages { root: root.clone() });
    }

    let out_dir = &config.output_pdfs_dir;
    std::fs::create_dir_all(out_dir).map_err(|e| PdfImgError::io(out_dir, e))?;
    let (max_artifact, min_artifact) = artifact_paths(name, config);

    // ── Full-fidelity artifact ───────────────────────────────────────────
    info!("Joining {} pages to full {}", images.len(), max_artifact.display());
    let max = compose_document(&images, &max_artifact)?;

    // ── Shrink sources toward the source budget ──────────────────────────
    let source_bytes_before = total_size(&images)?;
    let mut compressor = AdaptiveCompressor::new(config.compression, &images);
    info!("Resizing images to save space");
    let shrunk = compressor.shrink_sources()?;
    info!(
        "Resizing images done: {:.2} KB → {:.2} KB",
        source_bytes_before as f64 / 1024.0,
        shrunk as f64 / 1024.0
    );

    // ── Size-budgeted artifact ───────────────────────────────────────────
    info!("Joining to minimised {}", min_artifact.display());
    let min = compose_document(&images, &min_artifact)?;
    info!("{:.2} KB", min.bytes as f64 / 1024.0);
    let min_bytes = compressor.converge(min.bytes, |images| {
        compose_document(images, &min_artifact).map(|doc| doc.bytes)
    })?;

    let state = compressor.state();
    let budget_met = min_bytes <= config.compression.artifact_budget_bytes;
    if !budget_met {
        warn!(
            "{} is {:.2} KB, still over budget at quality floor",
            min_artifact.display(),
            min_bytes as f64 / 1024.0
        );
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    info!("Joining {} done in {}ms", name, duration_ms);

    Ok(JoinReport {
        name: name.to_string(),
        pages: max.pages,
        max_artifact,
        min_artifact,
        max_bytes: max.bytes,
        min_bytes,
        source_bytes_before,
        source_bytes_after: total_size(&images)?,
        passes: state.passes,
        final_quality: state.quality,
        scale: state.scale,
        budget_met,
        duration_ms,
    })
}

/// Paths of both join artifacts for `name` under `config`.
pub fn artifact_paths(name: &str, config: &DaemonConfig) -> (PathBuf, PathBuf) {
    (
        config.output_pdfs_dir.join(format!("{name}_max.pdf")),
        config.output_pdfs_dir.join(format!("{name}_min.pdf")),
    )
}
