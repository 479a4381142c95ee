//! RFS Server Binary
//!
//! NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
//! STIG: V-222648 (Audit Records)
//!
//! Run with: cargo run --bin rfs-server -- --root ./DATA

use anyhow::{Context, Result};
use clap::Parser;
use rfs::config::{LogFormat, LoggingConfig};
use rfs::{Config, Server};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Data root holding one home directory per user
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Create the data root if it does not exist
    #[arg(long)]
    create_root: bool,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path (daily rotation)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    /// Configuration file values with command-line overrides applied
    fn into_config(self) -> Result<(Config, bool)> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.root_dir = root;
        }
        if let Some(log_format) = self.log_format {
            config.logging.format = log_format;
        }
        if let Some(log_file) = self.log_file {
            config.logging.file = Some(log_file);
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }

        Ok((config, self.create_root))
    }
}

fn init_subscriber<W>(logging: &LoggingConfig, writer: W)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .init();
        }
    }
}

/// Initialize logging; the returned guard must live as long as the process
///
/// NIST 800-53: AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let file_target = logging.file.as_deref().and_then(|path| {
        let directory = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name()?;
        if let Err(e) = std::fs::create_dir_all(directory) {
            eprintln!("Warning: Failed to create log directory: {e}");
            eprintln!("Falling back to stderr logging");
            return None;
        }
        Some((directory.to_path_buf(), file_name.to_owned()))
    });

    match file_target {
        Some((directory, file_name)) => {
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            init_subscriber(logging, non_blocking);
            Some(guard)
        }
        None => {
            init_subscriber(logging, std::io::stderr);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, create_root) = Args::parse().into_config()?;
    let _log_guard = init_logging(&config.logging);

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting RFS server"
    );

    if create_root && !config.root_dir.exists() {
        info!(
            event = "creating_root_directory",
            directory = %config.root_dir.display(),
            "Creating root directory"
        );
        std::fs::create_dir_all(&config.root_dir).with_context(|| {
            format!("Failed to create root directory {}", config.root_dir.display())
        })?;
    }

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = %config.root_dir.display(),
        credential_entries = config.users.len(),
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        audit_enabled = config.logging.audit_enabled,
        "RFS server configuration"
    );

    let server = Server::new(config).map_err(|e| {
        error!(event = "server_creation_failed", error = %e, "Failed to create server");
        e
    })?;

    if let Err(e) = server.run().await {
        error!(event = "server_error", error = %e, "Server encountered an error");
        return Err(e.into());
    }

    info!(event = "server_shutdown", "RFS server shutdown complete");
    Ok(())
}
