//! HTTP server binary for parsekit-converter.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConverterConfig`, checks the engines, and serves the router.

use anyhow::{Context, Result};
use clap::Parser;
use parsekit_converter::{http, spawn_sweeper, Converter, ConverterConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port
  parsekit-converter

  # Check that LibreOffice and pdftoppm are installed, then exit
  parsekit-converter --check-engines

  # Custom engine binaries and a longer document deadline
  parsekit-converter --office-program /opt/libreoffice/program/soffice \
      --document-timeout 300

  # Convert a file against a running server
  curl -F file=@report.docx http://localhost:8000/convert
  curl -F file=@slides.pptx 'http://localhost:8000/convert/images?format=webp&dpi=200'

ERROR CODES (the `code` field of every JSON response):
  0    success
  101  empty file            102  unsupported format     103  invalid request
  201  conversion failed     202  output not found       203  conversion timeout
  204  LibreOffice missing
  301  image render failed   302  pdftoppm missing
  501  internal error

ENVIRONMENT VARIABLES:
  Every flag has a PARSEKIT_* equivalent (see --help). RUST_LOG overrides
  the log filter entirely.
"#;

/// Convert office, Hangul and OpenDocument files to PDF over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "parsekit-converter",
    version,
    about = "Convert office, Hangul and OpenDocument files to PDF over HTTP",
    long_about = "HTTP service that converts office (doc, docx, ppt, pptx, xls, xlsx), Hangul \
(hwp, hwpx) and OpenDocument (odt, odp, ods) uploads to PDF with headless LibreOffice, and \
renders PDF pages to images with Poppler's pdftoppm. PDFs and images pass through unchanged.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "PARSEKIT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PARSEKIT_PORT", default_value_t = 8000)]
    port: u16,

    /// LibreOffice executable (name on PATH or absolute path).
    #[arg(long, env = "PARSEKIT_OFFICE_PROGRAM", default_value = "libreoffice")]
    office_program: String,

    /// pdftoppm executable (name on PATH or absolute path).
    #[arg(long, env = "PARSEKIT_RENDERER_PROGRAM", default_value = "pdftoppm")]
    renderer_program: String,

    /// Document conversion deadline in seconds.
    #[arg(long, env = "PARSEKIT_DOCUMENT_TIMEOUT", default_value_t = 120)]
    document_timeout: u64,

    /// Page rendering deadline in seconds.
    #[arg(long, env = "PARSEKIT_IMAGE_TIMEOUT", default_value_t = 120)]
    image_timeout: u64,

    /// Maximum engine processes running at once.
    #[arg(short, long, env = "PARSEKIT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Root directory for per-request workspaces (default: system temp dir).
    #[arg(long, env = "PARSEKIT_WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// Workspaces older than this many seconds are swept as orphans.
    #[arg(long, env = "PARSEKIT_ORPHAN_MAX_AGE", default_value_t = 3600)]
    orphan_max_age: u64,

    /// Seconds between orphan sweeps.
    #[arg(long, env = "PARSEKIT_SWEEP_INTERVAL", default_value_t = 600)]
    sweep_interval: u64,

    /// Maximum upload size in MiB.
    #[arg(long, env = "PARSEKIT_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: usize,

    /// Default DPI for /convert/images (72–400).
    #[arg(long, env = "PARSEKIT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Print engine availability and exit (non-zero if one is missing).
    #[arg(long)]
    check_engines: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PARSEKIT_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug,tower_http=debug"
    } else {
        "info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    if cli.check_engines {
        let ok = print_engine_report(&config);
        std::process::exit(if ok { 0 } else { 1 });
    }

    for program in [&config.office_program, &config.renderer_program] {
        let status = engine_probe::probe(program);
        if status.is_available() {
            info!("{}", status);
        } else {
            warn!("{} (requests needing it will fail)", status);
        }
    }

    let sweeper = spawn_sweeper(
        config.workspace_root.clone(),
        config.workspace_prefix.clone(),
        config.sweep_interval,
        config.orphan_max_age,
    );

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        "parsekit-converter {} listening on {} (workspaces in {})",
        env!("CARGO_PKG_VERSION"),
        addr,
        config.workspace_root.display()
    );

    let app = http::router(Converter::new(config));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("Shut down cleanly");
    Ok(())
}

/// Map CLI args to `ConverterConfig`.
fn build_config(cli: &Cli) -> Result<ConverterConfig> {
    let mut builder = ConverterConfig::builder()
        .office_program(&cli.office_program)
        .renderer_program(&cli.renderer_program)
        .document_timeout(Duration::from_secs(cli.document_timeout))
        .image_timeout(Duration::from_secs(cli.image_timeout))
        .max_concurrent_conversions(cli.concurrency)
        .orphan_max_age(Duration::from_secs(cli.orphan_max_age))
        .sweep_interval(Duration::from_secs(cli.sweep_interval))
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .default_dpi(cli.dpi);

    if let Some(ref dir) = cli.workspace_dir {
        builder = builder.workspace_root(dir);
    }

    builder.build().context("Invalid configuration")
}

/// Print one line per engine; returns `true` when all are available.
fn print_engine_report(config: &ConverterConfig) -> bool {
    let mut all_ok = true;
    for (role, program) in [
        ("document engine", &config.office_program),
        ("image engine", &config.renderer_program),
    ] {
        let status = engine_probe::probe(program);
        match &status.path {
            Some(path) => println!("  {} {:<16} {}", green("✓"), bold(role), dim(&path.display().to_string())),
            None => {
                all_ok = false;
                println!(
                    "  {} {:<16} {}",
                    red("✗"),
                    bold(role),
                    status.reason.as_deref().unwrap_or("not found")
                );
            }
        }
    }
    all_ok
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received; draining in-flight requests");
}
