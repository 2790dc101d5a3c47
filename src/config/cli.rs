use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the designmypdf binary.
#[derive(Debug, Parser)]
#[command(name = "designmypdf", version, about = "PDF generation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DESIGNMYPDF_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Apply database migrations and exit.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the template rendering timeout.
    #[arg(long = "render-timeout-ms", value_name = "MILLIS")]
    pub render_timeout_ms: Option<u64>,

    /// Override the PDF export timeout.
    #[arg(long = "export-timeout-ms", value_name = "MILLIS")]
    pub export_timeout_ms: Option<u64>,

    /// Override the overall request deadline.
    #[arg(long = "request-deadline-ms", value_name = "MILLIS")]
    pub request_deadline_ms: Option<u64>,

    /// Override the directory where PDFs are written before upload.
    #[arg(long = "work-dir", value_name = "PATH")]
    pub work_dir: Option<PathBuf>,

    /// Override the fingerprint cache capacity.
    #[arg(long = "cache-max-items", value_name = "COUNT")]
    pub cache_max_items: Option<u64>,

    /// Override the cache eviction policy (arbitrary|lru|fifo).
    #[arg(long = "cache-eviction", value_name = "POLICY")]
    pub cache_eviction: Option<String>,

    /// Override the Chromium executable used for rasterization.
    #[arg(long = "chromium-path", value_name = "PATH")]
    pub chromium_path: Option<PathBuf>,
}
