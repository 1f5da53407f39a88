//! Configuration schema, validation and service defaults.
//!
//! A configuration file is read as a raw `toml::Table`, checked by
//! [`validate`] against the fixed schema, and only then deserialized into
//! the typed [`Config`]. Validation failures name the offending field.

use regex::Regex;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use toml::{Table, Value};

use crate::error::ConfigError;

pub const AUTH_ENV_VAR: &str = "PELIT_AUTH";
pub const DEFAULT_VERBOSITY: u8 = 1;
pub const NAME_BYTES: usize = 10;
pub const ARCHIVE_DIR: &str = "archives";
pub const ARCHIVE_EXTENSION: &str = ".tar.zst";
pub const ARCHIVE_ZSTD_LEVEL: i32 = 3;
pub const MAX_CONCURRENT_BACKUPS: usize = 2;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;
/// Directory names that would be shadowed by a route or by the archive area.
pub const RESERVED_DIRECTORIES: [&str; 5] = ["upload", "delete", "list", "backup", ARCHIVE_DIR];

const TOP_LEVEL_KEYS: [&str; 4] = ["version", "network", "storage", "auth"];
const NETWORK_KEYS: [&str; 7] = [
    "addr",
    "port",
    "api_addr",
    "api_port",
    "base_url",
    "hotlink_block",
    "hotlink_whitelist",
];
const STORAGE_KEYS: [&str; 3] = ["path", "warn", "max"];
const AUTH_KEYS: [&str; 2] = ["from_env", "hashed"];

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version pattern is valid"));

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: String,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub addr: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub api_addr: Option<IpAddr>,
    #[serde(default)]
    pub api_port: Option<u16>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub hotlink_block: bool,
    #[serde(default)]
    pub hotlink_whitelist: Vec<String>,
}

impl NetworkConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    /// Optional second listener serving the same routes.
    pub fn api_listen_addr(&self) -> Option<SocketAddr> {
        match (self.api_addr, self.api_port) {
            (Some(addr), Some(port)) => Some(SocketAddr::new(addr, port)),
            _ => None,
        }
    }
}

/// Storage root and quota thresholds in mebibytes; `0` disables a threshold.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub warn: f64,
    #[serde(default)]
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub from_env: Option<bool>,
    #[serde(default)]
    pub hashed: Option<String>,
}

/// Reads, validates and deserializes a configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let table: Table = content.parse()?;
    validate(&table)?;
    Ok(Value::Table(table).try_into()?)
}

/// Checks a parsed configuration table against the schema. Pure.
pub fn validate(table: &Table) -> Result<(), ConfigError> {
    for key in TOP_LEVEL_KEYS {
        if !table.contains_key(key) {
            return Err(ConfigError::Missing(key.to_string()));
        }
    }
    reject_unknown(table, "", &TOP_LEVEL_KEYS)?;

    let version = require_str(table, "", "version")?;
    if !VERSION_PATTERN.is_match(version) {
        return Err(ConfigError::Invalid {
            field: "version".into(),
            reason: "expected MAJOR.MINOR.PATCH".into(),
        });
    }

    validate_network(require_table(table, "", "network")?)?;
    validate_storage(require_table(table, "", "storage")?)?;
    validate_auth(require_table(table, "", "auth")?)
}

fn validate_network(network: &Table) -> Result<(), ConfigError> {
    reject_unknown(network, "network", &NETWORK_KEYS)?;

    require_ip(network, "addr")?;
    require_port(network, "port")?;

    match (network.contains_key("api_addr"), network.contains_key("api_port")) {
        (true, true) => {
            require_ip(network, "api_addr")?;
            require_port(network, "api_port")?;
        }
        (true, false) => return Err(ConfigError::Missing("network.api_port".into())),
        (false, true) => return Err(ConfigError::Missing("network.api_addr".into())),
        (false, false) => {}
    }

    if network.contains_key("base_url") {
        require_str(network, "network", "base_url")?;
    }
    if let Some(value) = network.get("hotlink_block")
        && !value.is_bool()
    {
        return Err(type_error("network", "hotlink_block", "a boolean"));
    }
    if let Some(value) = network.get("hotlink_whitelist") {
        let entries = value
            .as_array()
            .ok_or_else(|| type_error("network", "hotlink_whitelist", "an array of strings"))?;
        if entries.iter().any(|entry| !entry.is_str()) {
            return Err(type_error(
                "network",
                "hotlink_whitelist",
                "an array of strings",
            ));
        }
    }
    Ok(())
}

fn validate_storage(storage: &Table) -> Result<(), ConfigError> {
    if !storage.contains_key("path") {
        return Err(ConfigError::Missing("storage.path".into()));
    }
    reject_unknown(storage, "storage", &STORAGE_KEYS)?;
    require_str(storage, "storage", "path")?;

    for key in ["warn", "max"] {
        let Some(value) = storage.get(key) else {
            continue;
        };
        let amount = match value {
            Value::Integer(n) => *n as f64,
            Value::Float(n) => *n,
            _ => return Err(type_error("storage", key, "a number")),
        };
        if !(amount >= 0.0) {
            return Err(ConfigError::Invalid {
                field: format!("storage.{key}"),
                reason: "must be a non-negative number".into(),
            });
        }
    }
    Ok(())
}

fn validate_auth(auth: &Table) -> Result<(), ConfigError> {
    reject_unknown(auth, "auth", &AUTH_KEYS)?;

    let from_env = match auth.get("from_env") {
        Some(value) if !value.is_bool() => {
            return Err(type_error("auth", "from_env", "a boolean"));
        }
        other => other.is_some(),
    };
    let hashed = match auth.get("hashed") {
        Some(_) => Some(require_str(auth, "auth", "hashed")?),
        None => None,
    };

    match (from_env, hashed) {
        (true, Some(_)) => Err(ConfigError::Invalid {
            field: "auth".into(),
            reason: "`from_env` and `hashed` are mutually exclusive".into(),
        }),
        (false, None) => Err(ConfigError::Invalid {
            field: "auth".into(),
            reason: "exactly one of `from_env` or `hashed` is required".into(),
        }),
        (false, Some(digest)) if !is_sha256_hex(digest) => Err(ConfigError::Invalid {
            field: "auth.hashed".into(),
            reason: "expected a 64-character hex SHA-256 digest".into(),
        }),
        _ => Ok(()),
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn field_path(section: &str, key: &str) -> String {
    if section.is_empty() {
        key.to_string()
    } else {
        format!("{section}.{key}")
    }
}

fn type_error(section: &str, key: &str, expected: &'static str) -> ConfigError {
    ConfigError::Type {
        field: field_path(section, key),
        expected,
    }
}

fn reject_unknown(table: &Table, section: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    match table.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(ConfigError::Unknown(field_path(section, key))),
        None => Ok(()),
    }
}

fn require_table<'a>(table: &'a Table, section: &str, key: &str) -> Result<&'a Table, ConfigError> {
    table
        .get(key)
        .ok_or_else(|| ConfigError::Missing(field_path(section, key)))?
        .as_table()
        .ok_or_else(|| type_error(section, key, "a table"))
}

fn require_str<'a>(table: &'a Table, section: &str, key: &str) -> Result<&'a str, ConfigError> {
    table
        .get(key)
        .ok_or_else(|| ConfigError::Missing(field_path(section, key)))?
        .as_str()
        .ok_or_else(|| type_error(section, key, "a string"))
}

fn require_ip(network: &Table, key: &str) -> Result<(), ConfigError> {
    let value = require_str(network, "network", key)?;
    value
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ConfigError::Invalid {
            field: field_path("network", key),
            reason: format!("`{value}` is not an IPv4 or IPv6 address"),
        })
}

fn require_port(network: &Table, key: &str) -> Result<(), ConfigError> {
    let port = network
        .get(key)
        .ok_or_else(|| ConfigError::Missing(field_path("network", key)))?
        .as_integer()
        .ok_or_else(|| type_error("network", key, "an integer"))?;
    if !(1..=65535).contains(&port) {
        return Err(ConfigError::Invalid {
            field: field_path("network", key),
            reason: format!("port {port} is outside 1-65535"),
        });
    }
    Ok(())
}
