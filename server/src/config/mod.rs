use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/theatre";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_TOKEN_TTL_HOURS: u32 = 30 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Credentials of a staff account created at startup when missing.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub store: StoreBackend,
    pub host: IpAddr,
    pub port: u16,
    pub max_connections: u32,
    pub media_root: PathBuf,
    pub max_upload_bytes: usize,
    /// Lifetime of issued bearer tokens.
    pub token_ttl_hours: u32,
    pub admin: Option<AdminBootstrap>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            store: StoreBackend::Postgres,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
            admin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) if !email.trim().is_empty() => {
                Some(AdminBootstrap { email, password })
            }
            (Ok(_), Err(_)) => {
                tracing::warn!("Config: ADMIN_EMAIL set without ADMIN_PASSWORD, skipping bootstrap");
                None
            }
            _ => None,
        };

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            store: env_or("THEATRE_STORE", defaults.store),
            host: env_or("HOST", defaults.host),
            port: env_or("PORT", defaults.port),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", defaults.max_connections),
            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_root),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            token_ttl_hours: env_or("TOKEN_TTL_HOURS", defaults.token_ttl_hours),
            admin,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.token_ttl_hours))
    }
}

/// Reads and parses `key`, falling back to `default` when unset or invalid.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Config: invalid value '{}' for {}: {}, using default", raw, key, e);
            default
        }
    }
}
