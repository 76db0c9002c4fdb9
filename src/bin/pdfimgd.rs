//! Daemon binary for edgequake-pdfimg.
//!
//! Maps CLI flags to `DaemonConfig`, starts both watchers under the
//! supervisor and exits non-zero if either of them dies.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfimg::{
    DaemonConfig, DirectoryWatcher, ImageRequestHandler, JoinLock, LogSink, NotifySubscriber,
    PdfInboxHandler, PdfiumRasterizer, RetryPolicy, Supervisor, SupervisorExit,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"DIRECTORIES:
  Drop a PDF into the PDF inbox to split it into
  <output-images>/<name>/page-0001.jpg, page-0002.jpg, … The PDF is deleted
  once processed.

  Put page images (jpg, jpeg, png, tiff, bmp, jfif) anywhere under the image
  inbox, then create a .txt file in the inbox root containing the document
  name. The daemon writes <output-pdfs>/<name>_max.pdf and the size-budgeted
  <name>_min.pdf, then empties the image inbox.

EXAMPLES:
  pdfimgd
  pdfimgd --budget-kb 512 --quality 80
  pdfimgd --input-pdfs /srv/in/pdfs --input-images /srv/in/images \
          --output-pdfs /srv/out/pdfs --output-images /srv/out/images
  RUST_LOG=edgequake_pdfimg=debug pdfimgd

PDFIUM:
  Splitting needs the pdfium shared library. It is looked up in
  --pdfium-lib / PDFIUM_LIB_PATH, then the working directory, then the
  system library path.
"#;

/// Watch folders and convert PDFs to page images and back.
#[derive(Parser, Debug)]
#[command(
    name = "pdfimgd",
    version,
    about = "Watch folders and convert PDFs to page images and page images back to PDFs",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF inbox: PDFs closed here are split into page images.
    #[arg(long, env = "PDFIMG_INPUT_PDFS", default_value = "pdfs")]
    input_pdfs: PathBuf,

    /// Image inbox: a .txt request here joins every image below it.
    #[arg(long, env = "PDFIMG_INPUT_IMAGES", default_value = "images")]
    input_images: PathBuf,

    /// Where joined documents are written.
    #[arg(long, env = "PDFIMG_OUTPUT_PDFS", default_value = "output/pdfs")]
    output_pdfs: PathBuf,

    /// Where split page images are written.
    #[arg(long, env = "PDFIMG_OUTPUT_IMAGES", default_value = "output/images")]
    output_images: PathBuf,

    /// Rendering resolution for split pages.
    #[arg(long, env = "PDFIMG_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Starting JPEG quality of the compression loop.
    #[arg(long, env = "PDFIMG_QUALITY", default_value_t = 75,
          value_parser = clap::value_parser!(u8).range(2..=100))]
    quality: u8,

    /// Size budget for page images and the _min document, in KiB.
    #[arg(long, env = "PDFIMG_BUDGET_KB", default_value_t = 1024)]
    budget_kb: u64,

    /// How often the supervisor checks its watchers, in milliseconds.
    #[arg(long, env = "PDFIMG_POLL_MS", default_value_t = 1000)]
    poll_ms: u64,

    /// Pause before a broken watcher resubscribes, in milliseconds.
    #[arg(long, env = "PDFIMG_RETRY_BACKOFF_MS", default_value_t = 0)]
    retry_backoff_ms: u64,

    /// Give up after this many consecutive resubscriptions (default: never).
    #[arg(long, env = "PDFIMG_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Path to the pdfium library or the directory containing it.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Print one JSON job report per line on stdout.
    #[arg(long, env = "PDFIMG_JSON")]
    json: bool,

    /// Debug logging.
    #[arg(short, long, env = "PDFIMG_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, env = "PDFIMG_QUIET")]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> Result<DaemonConfig> {
        let backoff = Duration::from_millis(self.retry_backoff_ms);
        let retry = match self.max_retries {
            Some(n) => RetryPolicy::bounded(n, backoff),
            None => RetryPolicy::unbounded(backoff),
        };

        let mut builder = DaemonConfig::builder()
            .input_pdfs_dir(&self.input_pdfs)
            .input_images_dir(&self.input_images)
            .output_pdfs_dir(&self.output_pdfs)
            .output_images_dir(&self.output_images)
            .render_dpi(self.dpi)
            .initial_quality(self.quality)
            .budget_bytes(self.budget_kb.saturating_mul(1024))
            .supervisor_poll_ms(self.poll_ms)
            .watch_retry(retry);
        if let Some(lib) = &self.pdfium_lib {
            builder = builder.pdfium_lib_path(lib);
        }
        builder.build().context("Invalid configuration")
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run(cli: Cli) -> Result<SupervisorExit> {
    let config = Arc::new(cli.to_config()?);
    config
        .ensure_directories()
        .context("Failed to create working directories")?;
    for dir in config.directories() {
        info!("Using {}", dir.display());
    }

    let rasterizer = tokio::task::spawn_blocking({
        let lib = config.pdfium_lib_path.clone();
        move || PdfiumRasterizer::spawn(lib)
    })
    .await
    .context("pdfium startup task failed")?
    .context("Failed to load the pdfium library")?;

    let sink = Arc::new(LogSink { json: cli.json });
    let subscriber = Arc::new(NotifySubscriber);
    let join_lock = Arc::new(JoinLock::new());

    let mut supervisor = Supervisor::new(config.supervisor_poll_interval());
    supervisor.spawn_watcher(
        DirectoryWatcher::new("pdfs", &config.input_pdfs_dir, subscriber.clone(), config.watch_retry),
        Arc::new(PdfInboxHandler::new(config.clone(), Arc::new(rasterizer), sink.clone())),
    );
    supervisor.spawn_watcher(
        DirectoryWatcher::new("images", &config.input_images_dir, subscriber, config.watch_retry),
        Arc::new(ImageRequestHandler::new(config.clone(), join_lock, sink)),
    );

    Ok(supervisor.run(shutdown_signal()).await)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let exit = run(cli).await?;
    if let SupervisorExit::WorkerDied { worker, reason } = &exit {
        error!("{} watcher died: {}", worker, reason);
    }
    // Do not wait for in-flight blocking jobs on the way out.
    std::process::exit(exit.exit_code());
}
