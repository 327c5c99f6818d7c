//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{ArgAction, Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{
    CloudflareConfig, DEFAULT_BODY_LIMIT_BYTES, DEFAULT_BYPASS_PREFIXES, DEFAULT_SESSION_COOKIE,
    cdn::DEFAULT_PURGE_TIMEOUT,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "roamcache";
const ENV_PREFIX: &str = "ROAMCACHE";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_INTERNAL_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_INTERNAL_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_UPSTREAM_ORIGIN: &str = "http://127.0.0.1:8000";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CDN_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Command-line arguments for the roamcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "roamcache",
    version,
    about = "Full-page cache for the travel site"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ROAMCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Disable the page cache; every request is rendered fresh.
    #[arg(
        long = "no-cache",
        env = "NO_CACHE",
        global = true,
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public cache listener and the internal invalidation listener.
    Serve(Box<ServeArgs>),
    /// Drop every cached page (and purge the CDN zone in production).
    Clear(MaintenanceArgs),
    /// Drop cached pages whose path starts with a prefix.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MaintenanceArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Path prefix to drop, e.g. `/tour/`.
    #[arg(long, value_name = "PREFIX")]
    pub prefix: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the internal listener host.
    #[arg(long = "server-internal-host", value_name = "HOST")]
    pub server_internal_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the internal listener port.
    #[arg(long = "server-internal-port", value_name = "PORT")]
    pub internal_port: Option<u16>,

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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the page store backend (postgres|memory).
    #[arg(long = "cache-store", value_name = "BACKEND")]
    pub cache_store: Option<String>,

    /// Override the origin the renderer requests are proxied to.
    #[arg(long = "upstream-origin", value_name = "URL")]
    pub upstream_origin: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub upstream: UpstreamSettings,
    pub cdn: CdnSettings,
    pub deployment: DeploymentSettings,
    pub internal: InternalSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub internal_addr: SocketAddr,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub store: StoreBackend,
    pub bypass_prefixes: Vec<String>,
    pub session_cookie: String,
    pub minify_html: bool,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub origin: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    pub api_base: Url,
    pub zone_id: Option<String>,
    pub api_token: Option<String>,
    /// Public origin of the site, used to turn cached paths into absolute URLs.
    pub site: Option<Url>,
    pub timeout: Duration,
}

impl CdnSettings {
    /// Purge configuration, present only when every required value is set.
    pub fn cloudflare(&self) -> Option<CloudflareConfig> {
        Some(CloudflareConfig {
            api_base: self.api_base.clone(),
            zone_id: self.zone_id.clone()?,
            api_token: self.api_token.clone()?,
            site: self.site.clone()?,
            timeout: self.timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    /// CDN purges are only issued in production.
    pub production: bool,
}

#[derive(Debug, Clone)]
pub struct InternalSettings {
    /// Bearer token for the internal listener; unset means unauthenticated.
    pub webhook_token: Option<String>,
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

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.bypass_prefixes")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Clear(args)) => raw.apply_database_override(&args.database),
        Some(Command::Purge(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }
    raw.apply_no_cache(cli.no_cache);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    upstream: RawUpstreamSettings,
    cdn: RawCdnSettings,
    deployment: RawDeploymentSettings,
    internal: RawInternalSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_internal_host.as_ref() {
            self.server.internal_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.internal_port {
            self.server.internal_port = Some(port);
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
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(store) = overrides.cache_store.as_ref() {
            self.cache.store = Some(store.clone());
        }
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_no_cache(&mut self, no_cache: bool) {
        if no_cache {
            self.cache.enabled = Some(false);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            upstream,
            cdn,
            deployment,
            internal,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache, &database)?;
        let upstream = build_upstream_settings(upstream)?;
        let cdn = build_cdn_settings(cdn)?;
        let deployment = DeploymentSettings {
            production: deployment.production.unwrap_or(false),
        };
        let internal = InternalSettings {
            webhook_token: non_empty(internal.webhook_token),
        };

        Ok(Self {
            server,
            logging,
            database,
            cache,
            upstream,
            cdn,
            deployment,
            internal,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let internal_host = server
        .internal_host
        .unwrap_or_else(|| DEFAULT_INTERNAL_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let internal_port = server.internal_port.unwrap_or(DEFAULT_INTERNAL_PORT);
    if internal_port == 0 {
        return Err(LoadError::invalid(
            "server.internal_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let internal_addr = parse_socket_addr(&internal_host, internal_port)
        .map_err(|reason| LoadError::invalid("server.internal_addr", reason))?;
    if public_addr == internal_addr {
        return Err(LoadError::invalid(
            "server.internal_addr",
            "must differ from the public listener address",
        ));
    }

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
        public_addr,
        internal_addr,
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
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url: non_empty(database.url),
        max_connections,
    })
}

fn build_cache_settings(
    cache: RawCacheSettings,
    database: &DatabaseSettings,
) -> Result<CacheSettings, LoadError> {
    let store = match cache.store {
        Some(value) => StoreBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.store", reason))?,
        None if database.url.is_some() => StoreBackend::Postgres,
        None => StoreBackend::Memory,
    };
    if store == StoreBackend::Postgres && database.url.is_none() {
        return Err(LoadError::invalid(
            "cache.store",
            "postgres store requires database.url",
        ));
    }

    let bypass_prefixes = match cache.bypass_prefixes {
        Some(prefixes) => prefixes
            .into_iter()
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .collect::<Vec<_>>(),
        None => DEFAULT_BYPASS_PREFIXES
            .iter()
            .map(|prefix| prefix.to_string())
            .collect(),
    };
    if let Some(bad) = bypass_prefixes.iter().find(|prefix| !prefix.starts_with('/')) {
        return Err(LoadError::invalid(
            "cache.bypass_prefixes",
            format!("prefix `{bad}` must start with `/`"),
        ));
    }

    let session_cookie = cache
        .session_cookie
        .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());
    if session_cookie.trim().is_empty() {
        return Err(LoadError::invalid(
            "cache.session_cookie",
            "must not be empty",
        ));
    }

    let body_limit = cache
        .body_limit_bytes
        .unwrap_or(DEFAULT_BODY_LIMIT_BYTES as u64);
    if body_limit == 0 {
        return Err(LoadError::invalid(
            "cache.body_limit_bytes",
            "must be greater than zero",
        ));
    }
    let body_limit_bytes = usize::try_from(body_limit).map_err(|_| {
        LoadError::invalid(
            "cache.body_limit_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        store,
        bypass_prefixes,
        session_cookie,
        minify_html: cache.minify_html.unwrap_or(true),
        body_limit_bytes,
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let origin = upstream
        .origin
        .as_deref()
        .unwrap_or(DEFAULT_UPSTREAM_ORIGIN);
    let origin = parse_http_url(origin, "upstream.origin")?;

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UpstreamSettings {
        origin,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cdn_settings(cdn: RawCdnSettings) -> Result<CdnSettings, LoadError> {
    let api_base = parse_http_url(
        cdn.api_base.as_deref().unwrap_or(DEFAULT_CDN_API_BASE),
        "cdn.api_base",
    )?;

    // A bare domain is accepted and served over https.
    let site = non_empty(cdn.site_domain)
        .map(|domain| {
            let candidate = if domain.contains("://") {
                domain
            } else {
                format!("https://{domain}")
            };
            parse_http_url(&candidate, "cdn.site_domain")
        })
        .transpose()?;

    let timeout = match cdn.timeout_ms {
        Some(0) => {
            return Err(LoadError::invalid(
                "cdn.timeout_ms",
                "must be greater than zero",
            ));
        }
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_PURGE_TIMEOUT,
    };

    Ok(CdnSettings {
        api_base,
        zone_id: non_empty(cdn.zone_id),
        api_token: non_empty(cdn.api_token),
        site,
        timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    internal_host: Option<String>,
    public_port: Option<u16>,
    internal_port: Option<u16>,
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
struct RawCacheSettings {
    enabled: Option<bool>,
    store: Option<String>,
    bypass_prefixes: Option<Vec<String>>,
    session_cookie: Option<String>,
    minify_html: Option<bool>,
    body_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    origin: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCdnSettings {
    api_base: Option<String>,
    zone_id: Option<String>,
    api_token: Option<String>,
    site_domain: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDeploymentSettings {
    production: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInternalSettings {
    webhook_token: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "url must use http or https"));
    }
    Ok(url)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
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

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
