//! # edgequake-pdfimg
//!
//! A folder-watching daemon that converts PDFs to page images and page images
//! back to size-budgeted PDFs.
//!
//! ## How it works
//!
//! Four directories form the whole interface. Dropping a file into an inbox
//! is the request; deleting it is the acknowledgement.
//!
//! ```text
//! pdfs/report.pdf           ──split──▶  output/images/report/page-0001.jpg …
//!                                        (report.pdf is deleted)
//!
//! images/**/*.{jpg,png,…}
//! images/go.txt ("report")  ──join───▶  output/pdfs/report_max.pdf
//!                                        output/pdfs/report_min.pdf
//!                                        (images/ is emptied)
//! ```
//!
//! `_max` embeds every page at full fidelity. `_min` is rebuilt after
//! adaptive compression passes (lower JPEG quality, smaller pixels) until it
//! fits the byte budget or the quality floor is reached.
//!
//! ## Pieces
//!
//! ```text
//! Supervisor
//!  ├─ DirectoryWatcher(pdfs/)   ─▶ PdfInboxHandler     ─▶ convert::split_pdf
//!  └─ DirectoryWatcher(images/) ─▶ ImageRequestHandler ─▶ convert::join_images
//! ```
//!
//! Watchers resubscribe after transient failures; the supervisor exits the
//! process when a watcher dies for good.
//!
//! ## Library use
//!
//! ```rust,no_run
//! use edgequake_pdfimg::{join_images, DaemonConfig, JoinLock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DaemonConfig::builder().base_dir("/srv/scans").build()?;
//!     config.ensure_directories()?;
//!     let report = join_images("report.pdf", &config, &JoinLock::new())?;
//!     eprintln!("{} pages, _min is {} bytes", report.pages, report.min_bytes);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfimgd` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod supervisor;
pub mod watcher;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CompressionSettings, DaemonConfig, DaemonConfigBuilder, RetryPolicy};
pub use convert::{cleanup_join_tree, join_images, split_pdf, JoinLock};
pub use dispatch::{ImageRequestHandler, LogSink, PdfInboxHandler, ReportSink};
pub use error::{PdfImgError, WatchError};
pub use output::{JobKind, JobReport, JobStatus, JoinReport, SplitReport};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer, RenderedPage};
pub use supervisor::{Supervisor, SupervisorExit};
pub use watcher::{DirectoryWatcher, EventHandler, NotifySubscriber, Subscriber, WatcherState};
