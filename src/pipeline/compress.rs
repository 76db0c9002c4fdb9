//! Adaptive compression: shrink a set of page images toward a byte budget.
//!
//! A *pass* resamples every image by `size_ratio` and re-encodes it in place
//! at the current quality, then decays the quality
//! (`q ← trunc(q × quality_decay)`). Both quality and cumulative scale
//! therefore strictly decrease with every pass, and no pass starts once the
//! quality has reached the floor. With the defaults (75, ×0.75, floor 1) the
//! quality sequence is 75, 56, 42, 31, 23, 17, 12, 9, 6, 4, 3, 2 → 1: at most
//! twelve passes, whatever the images contain.
//!
//! Meeting the budget is *not* guaranteed, only termination.

use crate::config::CompressionSettings;
use crate::error::PdfImgError;
use crate::pipeline::encode::recompress_in_place;
use crate::pipeline::pages::total_size;
use std::path::PathBuf;
use tracing::{debug, info};

/// Quality that follows `quality` after one pass.
pub fn next_quality(quality: u8, settings: &CompressionSettings) -> u8 {
    let decayed = (quality as f32 * settings.quality_decay) as u8;
    decayed.max(settings.quality_floor)
}

/// Upper bound on passes for `settings`, independent of image content.
pub fn max_passes(settings: &CompressionSettings) -> u32 {
    let mut quality = settings.initial_quality;
    let mut passes = 0;
    while quality > settings.quality_floor {
        quality = next_quality(quality, settings);
        passes += 1;
    }
    passes
}

/// Where the compressor stands between passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionState {
    /// Quality the next pass will encode with.
    pub quality: u8,
    /// Cumulative dimension factor applied so far (1.0 = untouched).
    pub scale: f32,
    /// Passes run so far.
    pub passes: u32,
}

/// Drives passes over one join's working set.
///
/// The same instance serves both loops of a join, so quality keeps decaying
/// from where the source-size loop stopped when the artifact loop takes over.
#[derive(Debug)]
pub struct AdaptiveCompressor<'a> {
    settings: CompressionSettings,
    images: &'a [PathBuf],
    state: CompressionState,
}

impl<'a> AdaptiveCompressor<'a> {
    pub fn new(settings: CompressionSettings, images: &'a [PathBuf]) -> Self {
        Self {
            state: CompressionState {
                quality: settings.initial_quality,
                scale: 1.0,
                passes: 0,
            },
            settings,
            images,
        }
    }

    pub fn state(&self) -> CompressionState {
        self.state
    }

    /// False once quality has reached the floor.
    pub fn can_compress(&self) -> bool {
        self.state.quality > self.settings.quality_floor
    }

    /// Run one pass over every image. Returns the new aggregate size.
    pub fn run_pass(&mut self) -> Result<u64, PdfImgError> {
        let quality = self.state.quality;
        let mut total = 0u64;
        for image in self.images {
            total += recompress_in_place(image, self.settings.size_ratio, quality)?;
        }

        self.state.passes += 1;
        self.state.scale *= self.settings.size_ratio;
        self.state.quality = next_quality(quality, &self.settings);
        debug!(
            "Pass {} at q{} → {:.2} KB (next q{})",
            self.state.passes,
            quality,
            total as f64 / 1024.0,
            self.state.quality
        );
        Ok(total)
    }

    /// Compress until the summed source size fits the source budget or the
    /// quality floor is reached. Returns the final aggregate size.
    pub fn shrink_sources(&mut self) -> Result<u64, PdfImgError> {
        let mut total = total_size(self.images)?;
        while total > self.settings.source_budget_bytes && self.can_compress() {
            info!("{:.2} KB of page images, compressing", total as f64 / 1024.0);
            total = self.run_pass()?;
        }
        Ok(total)
    }

    /// Compress and rebuild the artifact until it fits the artifact budget
    /// or the quality floor is reached.
    ///
    /// `artifact_bytes` is the size of the artifact composed from the current
    /// images; `recompose` rebuilds it after each pass and returns its new
    /// size. Returns the final artifact size.
    pub fn converge<F>(&mut self, mut artifact_bytes: u64, mut recompose: F) -> Result<u64, PdfImgError>
    where
        F: FnMut(&[PathBuf]) -> Result<u64, PdfImgError>,
    {
        while artifact_bytes > self.settings.artifact_budget_bytes && self.can_compress() {
            info!(
                "Artifact is {:.2} KB, over budget; compressing",
                artifact_bytes as f64 / 1024.0
            );
            self.run_pass()?;
            artifact_bytes = recompose(self.images)?;
        }
        Ok(artifact_bytes)
    }
}
