//! Trigger handlers: turn watcher events into conversion jobs.
//!
//! * [`PdfInboxHandler`]: a `.pdf` finished writing into the PDF inbox:
//!   split it, then delete it.
//! * [`ImageRequestHandler`]: a `.txt` request appeared in the image inbox:
//!   read the document name, delete the request, join.
//!
//! Every job ends in exactly one [`JobReport`] handed to a [`ReportSink`];
//! no failure escapes a handler.

use crate::config::DaemonConfig;
use crate::convert::{cleanup_join_tree, join_images, split_pdf, JoinLock};
use crate::error::PdfImgError;
use crate::output::{JobKind, JobReport};
use crate::pipeline::render::PageRasterizer;
use crate::watcher::EventHandler;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Request files are read on creation, possibly before the writer has
/// flushed. Empty content is re-read this many times.
const REQUEST_SETTLE_ATTEMPTS: u32 = 10;
const REQUEST_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Receives the outcome of every job.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &JobReport);
}

/// Logs each report through `tracing`, and with `json` also prints it to
/// stdout as one JSON line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink {
    pub json: bool,
}

impl ReportSink for LogSink {
    fn report(&self, report: &JobReport) {
        if report.is_success() {
            info!(kind = ?report.kind, trigger = %report.trigger.display(), "Job succeeded");
        } else {
            error!(kind = ?report.kind, trigger = %report.trigger.display(), status = ?report.status, "Job failed");
        }
        if self.json {
            match serde_json::to_string(report) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("Failed to serialise job report: {}", e),
            }
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn remove_trigger(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed trigger {}", path.display()),
        Err(e) => warn!("Failed to remove trigger {}: {}", path.display(), e),
    }
}

/// Splits PDFs dropped into the PDF inbox.
pub struct PdfInboxHandler {
    config: Arc<DaemonConfig>,
    rasterizer: Arc<dyn PageRasterizer>,
    sink: Arc<dyn ReportSink>,
}

impl PdfInboxHandler {
    pub fn new(
        config: Arc<DaemonConfig>,
        rasterizer: Arc<dyn PageRasterizer>,
        sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            sink,
        }
    }

    /// Split `path` and consume it. The source is deleted whether or not the
    /// split succeeded.
    pub fn handle(&self, path: &Path) -> JobReport {
        info!("Starting splitting pdf to images: {}", path.display());
        let report = match split_pdf(path, &self.config, self.rasterizer.as_ref()) {
            Ok(split) => JobReport::split_succeeded(path.to_path_buf(), split),
            Err(e) => {
                error!("Splitting {} failed: {}", path.display(), e);
                JobReport::failed(JobKind::Split, path.to_path_buf(), e)
            }
        };
        remove_trigger(path);
        report
    }
}

impl EventHandler for PdfInboxHandler {
    fn on_closed(&self, path: &Path) {
        if !has_extension(path, "pdf") {
            return;
        }
        // Repeated close events after the file was consumed.
        if !path.is_file() {
            debug!("Ignoring vanished {}", path.display());
            return;
        }
        let report = self.handle(path);
        self.sink.report(&report);
    }
}

/// Joins the image inbox when a `.txt` request names a document.
pub struct ImageRequestHandler {
    config: Arc<DaemonConfig>,
    lock: Arc<JoinLock>,
    sink: Arc<dyn ReportSink>,
}

impl ImageRequestHandler {
    pub fn new(config: Arc<DaemonConfig>, lock: Arc<JoinLock>, sink: Arc<dyn ReportSink>) -> Self {
        Self { config, lock, sink }
    }

    /// Consume the request at `path` and run the join it names.
    ///
    /// The request is deleted before joining so it cannot be replayed; the
    /// image inbox is emptied afterwards even when the request was unusable.
    /// A request that is already gone belongs to a job that has run, so the
    /// inbox is left alone in that case.
    pub fn handle(&self, path: &Path) -> JobReport {
        let requested = match read_request(path) {
            Ok(requested) => requested,
            Err(e) => {
                if matches!(e, PdfImgError::FileNotFound { .. }) {
                    warn!("Request {} vanished before it was read", path.display());
                } else {
                    remove_trigger(path);
                    cleanup_join_tree(&self.config, &self.lock);
                }
                error!("Reading request {} failed: {}", path.display(), e);
                return JobReport::failed(JobKind::Join, path.to_path_buf(), e);
            }
        };
        remove_trigger(path);

        info!("Starting joining images to pdf: {}", requested.trim());
        match join_images(&requested, &self.config, &self.lock) {
            Ok(join) => JobReport::join_succeeded(path.to_path_buf(), join),
            Err(e) => {
                error!("Joining for {} failed: {}", path.display(), e);
                JobReport::failed(JobKind::Join, path.to_path_buf(), e)
            }
        }
    }
}

impl EventHandler for ImageRequestHandler {
    fn on_created(&self, path: &Path) {
        if !has_extension(path, "txt") {
            return;
        }
        let report = self.handle(path);
        self.sink.report(&report);
    }
}

/// Read a request file, waiting briefly for a writer that has created the
/// file but not yet written to it.
fn read_request(path: &Path) -> Result<String, PdfImgError> {
    let mut content = String::new();
    for attempt in 0..REQUEST_SETTLE_ATTEMPTS {
        content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PdfImgError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => PdfImgError::io(path, e),
        })?;
        if !content.trim().is_empty() {
            break;
        }
        if attempt + 1 < REQUEST_SETTLE_ATTEMPTS {
            std::thread::sleep(REQUEST_SETTLE_DELAY);
        }
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::JobStatus;
    use crate::pipeline::encode::save_jpeg;
    use crate::pipeline::render::RenderedPage;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<JobReport>>);

    impl ReportSink for Collect {
        fn report(&self, report: &JobReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    struct TwoPages;

    impl PageRasterizer for TwoPages {
        fn rasterize(
            &self,
            _pdf_path: &Path,
            _dpi: u32,
            sink: &mut dyn FnMut(RenderedPage) -> Result<(), PdfImgError>,
        ) -> Result<usize, PdfImgError> {
            for page_num in 1..=2 {
                sink(RenderedPage {
                    page_num,
                    total: 2,
                    image: DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 30, Rgb([200, 10, 10]))),
                })?;
            }
            Ok(2)
        }
    }

    fn config(root: &Path) -> Arc<DaemonConfig> {
        let config = DaemonConfig::builder().base_dir(root).build().unwrap();
        config.ensure_directories().unwrap();
        Arc::new(config)
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_extension(Path::new("a/B.PDF"), "pdf"));
        assert!(has_extension(Path::new("req.txt"), "txt"));
        assert!(!has_extension(Path::new("req.txt.part"), "txt"));
        assert!(!has_extension(Path::new("noext"), "pdf"));
    }

    #[test]
    fn pdf_inbox_splits_and_consumes_source() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = PdfInboxHandler::new(config.clone(), Arc::new(TwoPages), sink.clone());

        let pdf = config.input_pdfs_dir.join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
        handler.on_closed(&pdf);

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_success(), "{:?}", reports[0].status);
        assert!(!pdf.exists());
        assert!(config.output_images_dir.join("doc/page-0001.jpg").is_file());
        assert!(config.output_images_dir.join("doc/page-0002.jpg").is_file());
    }

    #[test]
    fn pdf_inbox_deletes_invalid_source_and_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = PdfInboxHandler::new(config.clone(), Arc::new(TwoPages), sink.clone());

        let bogus = config.input_pdfs_dir.join("bogus.pdf");
        std::fs::write(&bogus, b"hello").unwrap();
        handler.on_closed(&bogus);

        let reports = sink.0.lock().unwrap();
        assert!(matches!(reports[0].status, JobStatus::Failed { .. }));
        assert!(!bogus.exists());
    }

    #[test]
    fn pdf_inbox_ignores_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = PdfInboxHandler::new(config.clone(), Arc::new(TwoPages), sink.clone());

        let notes = config.input_pdfs_dir.join("notes.md");
        std::fs::write(&notes, b"x").unwrap();
        handler.on_closed(&notes);
        handler.on_created(&config.input_pdfs_dir.join("new.pdf"));

        assert!(sink.0.lock().unwrap().is_empty());
        assert!(notes.exists());
    }

    #[test]
    fn image_request_joins_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), sink.clone());

        let job = config.input_images_dir.join("scan");
        std::fs::create_dir_all(&job).unwrap();
        for n in 1..=2 {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 60, Rgb([n * 50, 0, 0])));
            save_jpeg(&img, &job.join(format!("page-{n:04}.jpg")), 90).unwrap();
        }
        let request = config.input_images_dir.join("go.txt");
        std::fs::write(&request, "scan.pdf\n").unwrap();
        handler.on_created(&request);

        let reports = sink.0.lock().unwrap();
        let join = reports[0].join.as_ref().expect("join report");
        assert_eq!(join.pages, 2);
        assert!(config.output_pdfs_dir.join("scan_max.pdf").is_file());
        assert!(config.output_pdfs_dir.join("scan_min.pdf").is_file());
        assert!(!request.exists());
        assert!(!job.exists());
    }

    #[test]
    fn empty_request_still_clears_inbox() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), sink.clone());

        let job = config.input_images_dir.join("scan");
        std::fs::create_dir_all(&job).unwrap();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])));
        save_jpeg(&img, &job.join("page-0001.jpg"), 90).unwrap();
        let request = config.input_images_dir.join("blank.txt");
        std::fs::write(&request, "  \n").unwrap();
        handler.on_created(&request);

        let reports = sink.0.lock().unwrap();
        assert!(!reports[0].is_success());
        assert!(!job.exists());
        assert!(!request.exists());
    }

    fn stage_page(config: &DaemonConfig) -> std::path::PathBuf {
        let job = config.input_images_dir.join("scan");
        std::fs::create_dir_all(&job).unwrap();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0])));
        save_jpeg(&img, &job.join("page-0001.jpg"), 90).unwrap();
        job
    }

    #[test]
    fn vanished_request_leaves_staged_images() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), sink.clone());

        let job = stage_page(&config);
        handler.on_created(&config.input_images_dir.join("gone.txt"));

        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_success());
        assert!(job.join("page-0001.jpg").is_file());
    }

    #[test]
    fn unreadable_request_clears_inbox() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let sink = Arc::new(Collect::default());
        let handler = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), sink.clone());

        let job = stage_page(&config);
        // A directory named like a request cannot be read as text.
        let request = config.input_images_dir.join("odd.txt");
        std::fs::create_dir(&request).unwrap();
        handler.on_created(&request);

        let reports = sink.0.lock().unwrap();
        assert!(!reports[0].is_success());
        assert!(!job.exists());
        assert!(config.output_pdfs_dir.read_dir().unwrap().next().is_none());
    }
}
