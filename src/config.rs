//! Configuration types for the conversion daemon.
//!
//! All daemon behaviour is controlled through [`DaemonConfig`], built via its
//! [`DaemonConfigBuilder`] once at startup and then shared read-only (usually
//! behind an `Arc`) by every watcher, handler and pipeline stage. Nothing is
//! reloaded while the process runs.

use crate::error::PdfImgError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the conversion daemon.
///
/// # Example
/// ```rust
/// use edgequake_pdfimg::DaemonConfig;
///
/// let config = DaemonConfig::builder()
///     .input_pdfs_dir("/srv/inbox/pdfs")
///     .render_dpi(150)
///     .build()
///     .unwrap();
/// assert_eq!(config.render_dpi, 150);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Inbound documents. A `.pdf` written here is split into page images.
    pub input_pdfs_dir: PathBuf,

    /// Inbound page images and `.txt` join requests.
    pub input_images_dir: PathBuf,

    /// Where `<name>_max.pdf` and `<name>_min.pdf` are written.
    pub output_pdfs_dir: PathBuf,

    /// Where split jobs write `<job>/page-NNNN.jpg`.
    pub output_images_dir: PathBuf,

    /// Rasterisation resolution for split jobs. Range: 72–600. Default: 200.
    pub render_dpi: u32,

    /// JPEG quality for split page images. Range: 1–100. Default: 90.
    pub split_jpeg_quality: u8,

    /// Size-budget compression knobs for the `_min` artifact.
    pub compression: CompressionSettings,

    /// How the watchers resubscribe after an interrupted OS watch.
    pub watch_retry: RetryPolicy,

    /// Supervisor liveness poll interval in milliseconds. Default: 1000.
    pub supervisor_poll_ms: u64,

    /// Explicit path to the pdfium shared library.
    ///
    /// If None, `PDFIUM_LIB_PATH`, the working directory and the system
    /// library path are tried in that order.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            input_pdfs_dir: PathBuf::from("pdfs"),
            input_images_dir: PathBuf::from("images"),
            output_pdfs_dir: PathBuf::from("output/pdfs"),
            output_images_dir: PathBuf::from("output/images"),
            render_dpi: 200,
            split_jpeg_quality: 90,
            compression: CompressionSettings::default(),
            watch_retry: RetryPolicy::default(),
            supervisor_poll_ms: 1000,
            pdfium_lib_path: None,
        }
    }
}

impl DaemonConfig {
    /// Create a new builder for `DaemonConfig`.
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder {
            config: Self::default(),
        }
    }

    /// Create all four working directories. Existing directories are fine.
    pub fn ensure_directories(&self) -> Result<(), PdfImgError> {
        for dir in self.directories() {
            std::fs::create_dir_all(dir).map_err(|e| PdfImgError::io(dir, e))?;
        }
        Ok(())
    }

    /// The four configured directories, inbound first.
    pub fn directories(&self) -> [&Path; 4] {
        [
            &self.input_pdfs_dir,
            &self.input_images_dir,
            &self.output_pdfs_dir,
            &self.output_images_dir,
        ]
    }

    /// Supervisor poll interval as a `Duration`.
    pub fn supervisor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor_poll_ms)
    }
}

/// Builder for [`DaemonConfig`].
#[derive(Debug)]
pub struct DaemonConfigBuilder {
    config: DaemonConfig,
}

impl DaemonConfigBuilder {
    pub fn input_pdfs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_pdfs_dir = dir.into();
        self
    }

    pub fn input_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_images_dir = dir.into();
        self
    }

    pub fn output_pdfs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_pdfs_dir = dir.into();
        self
    }

    pub fn output_images_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_images_dir = dir.into();
        self
    }

    /// Root all four directories under `base` using the default layout.
    pub fn base_dir(self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        self.input_pdfs_dir(base.join("pdfs"))
            .input_images_dir(base.join("images"))
            .output_pdfs_dir(base.join("output").join("pdfs"))
            .output_images_dir(base.join("output").join("images"))
    }

    pub fn render_dpi(mut self, dpi: u32) -> Self {
        self.config.render_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn split_jpeg_quality(mut self, quality: u8) -> Self {
        self.config.split_jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn initial_quality(mut self, quality: u8) -> Self {
        self.config.compression.initial_quality = quality.clamp(1, 100);
        self
    }

    pub fn quality_decay(mut self, decay: f32) -> Self {
        self.config.compression.quality_decay = decay;
        self
    }

    pub fn size_ratio(mut self, ratio: f32) -> Self {
        self.config.compression.size_ratio = ratio;
        self
    }

    /// Set both the aggregate-source and the final-artifact budget.
    pub fn budget_bytes(mut self, bytes: u64) -> Self {
        self.config.compression.source_budget_bytes = bytes;
        self.config.compression.artifact_budget_bytes = bytes;
        self
    }

    pub fn compression(mut self, settings: CompressionSettings) -> Self {
        self.config.compression = settings;
        self
    }

    pub fn watch_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.watch_retry = policy;
        self
    }

    pub fn supervisor_poll_ms(mut self, ms: u64) -> Self {
        self.config.supervisor_poll_ms = ms.max(10);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DaemonConfig, PdfImgError> {
        self.config.compression.validate()?;
        Ok(self.config)
    }
}

// ── Compression ──────────────────────────────────────────────────────────

/// Knobs for the adaptive compression loop that produces `<name>_min.pdf`.
///
/// Each pass resamples every source image by `size_ratio` and re-encodes it
/// at the current quality, then multiplies the quality by `quality_decay`
/// (truncating). Passes stop once the relevant budget is met or the quality
/// has reached `quality_floor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// Encoder quality used by the first pass. Default: 75.
    pub initial_quality: u8,
    /// Multiplicative quality decay per pass, in (0, 1). Default: 0.75.
    pub quality_decay: f32,
    /// No pass runs once the quality is at or below this value. Default: 1.
    pub quality_floor: u8,
    /// Per-pass pixel dimension factor, in (0, 1). Default: 0.9.
    pub size_ratio: f32,
    /// Budget for the summed size of all source images. Default: 1 MiB.
    pub source_budget_bytes: u64,
    /// Budget for the composed `_min` document. Default: 1 MiB.
    pub artifact_budget_bytes: u64,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            initial_quality: 75,
            quality_decay: 0.75,
            quality_floor: 1,
            size_ratio: 0.9,
            source_budget_bytes: 1024 * 1024,
            artifact_budget_bytes: 1024 * 1024,
        }
    }
}

impl CompressionSettings {
    /// Reject settings under which the loop would not make progress.
    pub fn validate(&self) -> Result<(), PdfImgError> {
        if !(self.quality_decay > 0.0 && self.quality_decay < 1.0) {
            return Err(PdfImgError::InvalidConfig(format!(
                "quality decay must be in (0, 1), got {}",
                self.quality_decay
            )));
        }
        if !(self.size_ratio > 0.0 && self.size_ratio < 1.0) {
            return Err(PdfImgError::InvalidConfig(format!(
                "size ratio must be in (0, 1), got {}",
                self.size_ratio
            )));
        }
        if self.quality_floor == 0 || self.quality_floor >= self.initial_quality {
            return Err(PdfImgError::InvalidConfig(format!(
                "quality floor must be in [1, {}), got {}",
                self.initial_quality, self.quality_floor
            )));
        }
        if self.source_budget_bytes == 0 || self.artifact_budget_bytes == 0 {
            return Err(PdfImgError::InvalidConfig(
                "size budgets must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ── Watch retry ──────────────────────────────────────────────────────────

/// Resubscription policy for a [`crate::watcher::DirectoryWatcher`].
///
/// `max_retries = None` restarts forever. A bounded policy makes the watcher
/// return an error once exhausted, which ends the worker and, through the
/// supervisor, the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum consecutive restarts. None = unbounded.
    pub max_retries: Option<u32>,
    /// Fixed pause before each restart, in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::ZERO)
    }
}

impl RetryPolicy {
    /// Retry forever with a fixed pause.
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_retries: None,
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    /// Give up after `max_retries` consecutive restarts.
    pub fn bounded(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            backoff_ms: backoff.as_millis() as u64,
        }
    }

    /// Whether another restart is allowed after `attempts` restarts.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_retries.map_or(true, |max| attempts < max)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_directory_layout() {
        let c = DaemonConfig::default();
        assert_eq!(c.input_pdfs_dir, PathBuf::from("pdfs"));
        assert_eq!(c.input_images_dir, PathBuf::from("images"));
        assert_eq!(c.output_pdfs_dir, PathBuf::from("output/pdfs"));
        assert_eq!(c.output_images_dir, PathBuf::from("output/images"));
        assert_eq!(c.compression.initial_quality, 75);
        assert_eq!(c.compression.artifact_budget_bytes, 1024 * 1024);
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = DaemonConfig::builder().render_dpi(10).build().unwrap();
        assert_eq!(c.render_dpi, 72);
        let c = DaemonConfig::builder().render_dpi(5000).build().unwrap();
        assert_eq!(c.render_dpi, 600);
    }

    #[test]
    fn base_dir_roots_every_path() {
        let c = DaemonConfig::builder().base_dir("/srv/x").build().unwrap();
        assert_eq!(c.input_pdfs_dir, PathBuf::from("/srv/x/pdfs"));
        assert_eq!(c.output_images_dir, PathBuf::from("/srv/x/output/images"));
    }

    #[test]
    fn rejects_non_decaying_quality() {
        let err = DaemonConfig::builder().quality_decay(1.0).build().unwrap_err();
        assert!(matches!(err, PdfImgError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_shrinking_size_ratio() {
        assert!(DaemonConfig::builder().size_ratio(1.5).build().is_err());
        // Every pass must shrink dimensions, so 1.0 is out too.
        assert!(DaemonConfig::builder().size_ratio(1.0).build().is_err());
        assert!(DaemonConfig::builder().size_ratio(0.99).build().is_ok());
    }

    #[test]
    fn rejects_zero_budget() {
        assert!(DaemonConfig::builder().budget_bytes(0).build().is_err());
    }

    #[test]
    fn ensure_directories_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let c = DaemonConfig::builder().base_dir(tmp.path()).build().unwrap();
        c.ensure_directories().unwrap();
        c.ensure_directories().unwrap();
        for dir in c.directories() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
    }

    #[test]
    fn retry_policy_bounds() {
        let unbounded = RetryPolicy::unbounded(Duration::ZERO);
        assert!(unbounded.allows(u32::MAX - 1));
        let bounded = RetryPolicy::bounded(2, Duration::ZERO);
        assert!(bounded.allows(0));
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
    }

    #[test]
    fn default_retry_resubscribes_immediately_forever() {
        let policy = DaemonConfig::default().watch_retry;
        assert_eq!(policy.backoff(), Duration::ZERO);
        assert_eq!(policy.max_retries, None);
    }
}
