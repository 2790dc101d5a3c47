//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::EvictionKind;

pub use cli::{CliArgs, Command, DatabaseOverride, MigrateArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "designmypdf";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_REQUEST_DEADLINE_MS: u64 = 30_000;
const DEFAULT_CLEANUP_DELAY_MS: u64 = 500;
const DEFAULT_WORK_DIR: &str = "uploads/template";
const DEFAULT_MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_CACHE_MAX_ITEMS: u64 = 100;
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_CHROMIUM_PATH: &str = "chromium";

/// Path prefix under which the filesystem storage backend serves artifacts.
pub const FILES_ROUTE_PREFIX: &str = "/files/";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub pipeline: PipelineSettings,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
    pub rasterizer: RasterizerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub render_timeout: Duration,
    pub export_timeout: Duration,
    pub request_deadline: Duration,
    pub cleanup_delay: Duration,
    pub work_dir: PathBuf,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_items: NonZeroUsize,
    pub eviction: EvictionKind,
}

#[derive(Debug, Clone)]
pub enum StorageSettings {
    /// Artifacts live under `root` and are served by this process at `/files/`.
    Filesystem { root: PathBuf, public_base_url: Url },
    /// Artifacts are `PUT` to `{endpoint}/{bucket}/{object}`.
    Http {
        endpoint: Url,
        bucket: String,
        token: Option<String>,
        public_base_url: Option<Url>,
    },
}

#[derive(Debug, Clone)]
pub struct RasterizerSettings {
    pub chromium_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("DESIGNMYPDF").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    pipeline: RawPipelineSettings,
    cache: RawCacheSettings,
    storage: RawStorageSettings,
    rasterizer: RawRasterizerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_database_override(&overrides.database);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(ms) = overrides.render_timeout_ms {
            self.pipeline.render_timeout_ms = Some(ms);
        }
        if let Some(ms) = overrides.export_timeout_ms {
            self.pipeline.export_timeout_ms = Some(ms);
        }
        if let Some(ms) = overrides.request_deadline_ms {
            self.pipeline.request_deadline_ms = Some(ms);
        }
        if let Some(dir) = overrides.work_dir.as_ref() {
            self.pipeline.work_dir = Some(dir.clone());
        }
        if let Some(max) = overrides.cache_max_items {
            self.cache.max_items = Some(max);
        }
        if let Some(policy) = overrides.cache_eviction.as_ref() {
            self.cache.eviction = Some(policy.clone());
        }
        if let Some(path) = overrides.chromium_path.as_ref() {
            self.rasterizer.chromium_path = Some(path.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            pipeline,
            cache,
            storage,
            rasterizer,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let pipeline = build_pipeline_settings(pipeline)?;
        let cache = build_cache_settings(cache)?;
        let storage = build_storage_settings(storage, &server)?;
        let rasterizer = build_rasterizer_settings(rasterizer)?;

        Ok(Self {
            server,
            logging,
            database,
            pipeline,
            cache,
            storage,
            rasterizer,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    let render_timeout = positive_millis(
        pipeline.render_timeout_ms.unwrap_or(DEFAULT_RENDER_TIMEOUT_MS),
        "pipeline.render_timeout_ms",
    )?;
    let export_timeout = positive_millis(
        pipeline.export_timeout_ms.unwrap_or(DEFAULT_EXPORT_TIMEOUT_MS),
        "pipeline.export_timeout_ms",
    )?;
    let request_deadline = positive_millis(
        pipeline
            .request_deadline_ms
            .unwrap_or(DEFAULT_REQUEST_DEADLINE_MS),
        "pipeline.request_deadline_ms",
    )?;
    let cleanup_delay = Duration::from_millis(
        pipeline.cleanup_delay_ms.unwrap_or(DEFAULT_CLEANUP_DELAY_MS),
    );

    let work_dir = pipeline
        .work_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));
    if work_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "pipeline.work_dir",
            "path must not be empty",
        ));
    }

    let max_body_bytes_value = pipeline.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes_value == 0 {
        return Err(LoadError::invalid(
            "pipeline.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(max_body_bytes_value).map_err(|_| {
        LoadError::invalid(
            "pipeline.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(PipelineSettings {
        render_timeout,
        export_timeout,
        request_deadline,
        cleanup_delay,
        work_dir,
        max_body_bytes,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_items_value = cache.max_items.unwrap_or(DEFAULT_CACHE_MAX_ITEMS);
    let max_items = usize::try_from(max_items_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.max_items", "must be greater than zero"))?;

    let eviction = match cache.eviction {
        Some(value) => {
            EvictionKind::from_str(&value).map_err(|reason| LoadError::invalid("cache.eviction", reason))?
        }
        None => EvictionKind::default(),
    };

    Ok(CacheSettings {
        max_items,
        eviction,
    })
}

fn build_storage_settings(
    storage: RawStorageSettings,
    server: &ServerSettings,
) -> Result<StorageSettings, LoadError> {
    let backend = storage
        .backend
        .as_deref()
        .map(str::trim)
        .unwrap_or("filesystem")
        .to_ascii_lowercase();

    match backend.as_str() {
        "filesystem" => {
            let root = storage
                .root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
            if root.as_os_str().is_empty() {
                return Err(LoadError::invalid("storage.root", "path must not be empty"));
            }
            let public_base_url = match storage.public_base_url {
                Some(value) => parse_base_url(&value, "storage.public_base_url")?,
                None => parse_base_url(
                    &format!("http://{}{FILES_ROUTE_PREFIX}", server.addr),
                    "storage.public_base_url",
                )?,
            };
            Ok(StorageSettings::Filesystem {
                root,
                public_base_url,
            })
        }
        "http" => {
            let endpoint = storage
                .endpoint
                .ok_or_else(|| LoadError::invalid("storage.endpoint", "required for http backend"))
                .and_then(|value| parse_base_url(&value, "storage.endpoint"))?;
            let bucket = storage
                .bucket
                .map(|value| value.trim().trim_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| LoadError::invalid("storage.bucket", "required for http backend"))?;
            let token = storage
                .token
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
            let public_base_url = storage
                .public_base_url
                .map(|value| parse_base_url(&value, "storage.public_base_url"))
                .transpose()?;
            Ok(StorageSettings::Http {
                endpoint,
                bucket,
                token,
                public_base_url,
            })
        }
        other => Err(LoadError::invalid(
            "storage.backend",
            format!("unknown backend `{other}` (expected filesystem or http)"),
        )),
    }
}

fn build_rasterizer_settings(
    rasterizer: RawRasterizerSettings,
) -> Result<RasterizerSettings, LoadError> {
    let chromium_path = rasterizer
        .chromium_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROMIUM_PATH));
    if chromium_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "rasterizer.chromium_path",
            "path must not be empty",
        ));
    }
    Ok(RasterizerSettings { chromium_path })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    render_timeout_ms: Option<u64>,
    export_timeout_ms: Option<u64>,
    request_deadline_ms: Option<u64>,
    cleanup_delay_ms: Option<u64>,
    work_dir: Option<PathBuf>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    max_items: Option<u64>,
    eviction: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    backend: Option<String>,
    root: Option<PathBuf>,
    public_base_url: Option<String>,
    endpoint: Option<String>,
    bucket: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRasterizerSettings {
    chromium_path: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Parse a base URL and make sure relative joins land beneath it.
fn parse_base_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let trimmed = value.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalized).map_err(|err| LoadError::invalid(key, format!("invalid URL: {err}")))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }

    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;

    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
