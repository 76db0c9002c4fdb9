//! Integration tests for both conversion directions.
//!
//! Rasterisation is faked so these run without the pdfium library; joining
//! and size budgeting run for real on generated images.

use edgequake_pdfimg::pipeline::compose::{inspect_document, PX_TO_MM};
use edgequake_pdfimg::pipeline::encode::{image_dimensions, save_jpeg};
use edgequake_pdfimg::{
    DaemonConfig, EventHandler, ImageRequestHandler, JobReport, JoinLock, PageRasterizer,
    PdfImgError, PdfInboxHandler, RenderedPage, ReportSink,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Renders `pages` solid pages, each a little wider than the last.
struct FakeRasterizer {
    pages: usize,
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        _pdf_path: &Path,
        _dpi: u32,
        sink: &mut dyn FnMut(RenderedPage) -> Result<(), PdfImgError>,
    ) -> Result<usize, PdfImgError> {
        for page_num in 1..=self.pages {
            let width = 100 + page_num as u32 * 10;
            sink(RenderedPage {
                page_num,
                total: self.pages,
                image: DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 140, Rgb([30, 60, 90]))),
            })?;
        }
        Ok(self.pages)
    }
}

#[derive(Default)]
struct Reports(Mutex<Vec<JobReport>>);

impl ReportSink for Reports {
    fn report(&self, report: &JobReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

impl Reports {
    fn single(&self) -> JobReport {
        let reports = self.0.lock().unwrap();
        assert_eq!(reports.len(), 1, "expected exactly one report");
        reports[0].clone()
    }
}

fn setup(root: &Path, budget: Option<u64>) -> Arc<DaemonConfig> {
    let mut builder = DaemonConfig::builder().base_dir(root);
    if let Some(bytes) = budget {
        builder = builder.budget_bytes(bytes);
    }
    let config = builder.build().unwrap();
    config.ensure_directories().unwrap();
    Arc::new(config)
}

fn noisy(width: u32, height: u32, seed: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503) ^ seed) as u8;
        Rgb([v, v.rotate_left(2), v.rotate_left(5)])
    }))
}

fn write_request(config: &DaemonConfig, file: &str, content: &str) -> PathBuf {
    let path = config.input_images_dir.join(file);
    std::fs::write(&path, content).unwrap();
    path
}

fn assert_close(actual: f32, expected: f32) {
    assert!((actual - expected).abs() < 0.05, "{actual} != {expected}");
}

// ── Split ────────────────────────────────────────────────────────────────────

#[test]
fn three_page_pdf_becomes_numbered_jpegs() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), None);
    let reports = Arc::new(Reports::default());
    let handler = PdfInboxHandler::new(config.clone(), Arc::new(FakeRasterizer { pages: 3 }), reports.clone());

    let pdf = config.input_pdfs_dir.join("doc.pdf");
    std::fs::write(&pdf, b"%PDF-1.4\n%fake\n").unwrap();
    handler.on_closed(&pdf);

    let report = reports.single();
    assert!(report.is_success());
    assert_eq!(report.split.as_ref().unwrap().pages, 3);
    assert!(!pdf.exists(), "source must be consumed");

    let job = config.output_images_dir.join("doc");
    for n in 1..=3u32 {
        let page = job.join(format!("page-{n:04}.jpg"));
        assert_eq!(image_dimensions(&page).unwrap(), (100 + n * 10, 140));
    }
    assert!(!job.join("page-0004.jpg").exists());
}

#[test]
fn report_serialises_with_status_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), None);
    let reports = Arc::new(Reports::default());
    let handler = PdfInboxHandler::new(config.clone(), Arc::new(FakeRasterizer { pages: 1 }), reports.clone());

    let pdf = config.input_pdfs_dir.join("one.pdf");
    std::fs::write(&pdf, b"%PDF-1.4\n").unwrap();
    handler.on_closed(&pdf);

    let json = serde_json::to_value(reports.single()).unwrap();
    assert_eq!(json["kind"], "split");
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["split"]["job"], "one");
}

// ── Join ─────────────────────────────────────────────────────────────────────

#[test]
fn join_orders_pages_and_empties_inbox() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), None);
    let reports = Arc::new(Reports::default());
    let handler = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), reports.clone());

    // Widths encode the expected position: page-2 must precede page-10.
    let job = config.input_images_dir.join("report");
    std::fs::create_dir_all(&job).unwrap();
    save_jpeg(&noisy(200, 100, 1), &job.join("page-10.jpg"), 90).unwrap();
    save_jpeg(&noisy(100, 100, 2), &job.join("page-2.jpg"), 90).unwrap();
    noisy(150, 100, 3).save(job.join("page-3.png")).unwrap();

    let request = write_request(&config, "request.txt", "report.pdf\n");
    handler.on_created(&request);

    let report = reports.single();
    assert!(report.is_success(), "{:?}", report.status);
    let join = report.join.unwrap();
    assert_eq!(join.pages, 3);
    assert_eq!(join.passes, 0, "small inputs fit the default budget");
    assert!(join.budget_met);

    let max = config.output_pdfs_dir.join("report_max.pdf");
    let sizes = inspect_document(&max).unwrap();
    let widths: Vec<f32> = sizes.iter().map(|(w, _)| *w).collect();
    assert_close(widths[0], 100.0 * PX_TO_MM);
    assert_close(widths[1], 150.0 * PX_TO_MM);
    assert_close(widths[2], 200.0 * PX_TO_MM);
    assert_close(sizes[0].1, 100.0 * PX_TO_MM);

    assert_eq!(inspect_document(&config.output_pdfs_dir.join("report_min.pdf")).unwrap().len(), 3);
    assert!(!request.exists());
    assert!(!job.exists());
}

#[test]
fn unreachable_budget_stops_at_quality_floor() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), Some(1));
    let lock = JoinLock::new();

    let job = config.input_images_dir.join("big");
    std::fs::create_dir_all(&job).unwrap();
    for n in 1..=2 {
        save_jpeg(&noisy(64, 64, n), &job.join(format!("page-{n:04}.jpg")), 95).unwrap();
    }

    let join = edgequake_pdfimg::join_images("big", &config, &lock).unwrap();
    assert!(!join.budget_met);
    assert_eq!(join.passes, 12);
    assert_eq!(join.final_quality, 1);
    assert!(join.scale < 0.3);
    assert!(join.min_bytes < join.max_bytes);
    assert!(join.source_bytes_after < join.source_bytes_before);
    assert!(!job.exists());
}

#[test]
fn split_output_can_be_joined_back() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), None);
    let reports = Arc::new(Reports::default());

    let splitter = PdfInboxHandler::new(config.clone(), Arc::new(FakeRasterizer { pages: 3 }), reports.clone());
    let pdf = config.input_pdfs_dir.join("roundtrip.pdf");
    std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
    splitter.on_closed(&pdf);

    std::fs::rename(
        config.output_images_dir.join("roundtrip"),
        config.input_images_dir.join("roundtrip"),
    )
    .unwrap();

    let joiner = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), reports.clone());
    let request = write_request(&config, "go.txt", "roundtrip");
    joiner.on_created(&request);

    let reports = reports.0.lock().unwrap();
    assert_eq!(reports.len(), 2);
    let join = reports[1].join.as_ref().expect("join report");
    assert_eq!(join.pages, 3);
    let sizes = inspect_document(&join.max_artifact).unwrap();
    assert_close(sizes[2].0, 130.0 * PX_TO_MM);
}

#[test]
fn request_without_images_reports_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = setup(tmp.path(), None);
    let reports = Arc::new(Reports::default());
    let handler = ImageRequestHandler::new(config.clone(), Arc::new(JoinLock::new()), reports.clone());

    let request = write_request(&config, "lonely.txt", "nothing");
    handler.on_created(&request);

    let report = reports.single();
    assert!(!report.is_success());
    assert!(!config.output_pdfs_dir.join("nothing_max.pdf").exists());
    assert!(!request.exists());
}
