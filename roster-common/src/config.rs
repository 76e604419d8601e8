//! Bootstrap configuration
//!
//! Settings are resolved in priority order:
//! 1. Command-line arguments (highest priority)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is not an error: a warning is logged and the
//! defaults apply. The encryption key has no default; [`RosterConfig::cipher`]
//! fails with [`Error::Config`] when it is absent or malformed.

use crate::cipher::{CipherMode, FieldCipher};
use crate::reconcile::{IdentityFields, ReconcileOptions};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5780;

/// Default listen address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default session lifetime
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Config file env var
pub const ENV_CONFIG: &str = "ROSTER_CONFIG";
pub const ENV_PORT: &str = "ROSTER_PORT";
pub const ENV_BIND_ADDRESS: &str = "ROSTER_BIND_ADDRESS";
pub const ENV_DATABASE: &str = "ROSTER_DATABASE";
pub const ENV_ENCRYPTION_KEY: &str = "ROSTER_ENCRYPTION_KEY";
/// Variable name used by earlier deployments; consulted after [`ENV_ENCRYPTION_KEY`]
pub const ENV_LEGACY_ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";
pub const ENV_CIPHER_MODE: &str = "ROSTER_CIPHER_MODE";
pub const ENV_REGISTER_TOKEN: &str = "ROSTER_REGISTER_TOKEN";
pub const ENV_REQUIRE_AUTH: &str = "ROSTER_REQUIRE_AUTH";
pub const ENV_STRICT_VALIDATION: &str = "ROSTER_STRICT_VALIDATION";

/// Service configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    /// HTTP server port
    pub port: u16,

    /// Listen address
    pub bind_address: String,

    /// SQLite database file
    pub database_path: PathBuf,

    /// 64 hex chars (32-byte AES key)
    pub encryption_key: Option<String>,

    /// IV strategy for newly written values
    pub cipher_mode: CipherMode,

    /// Shared token required to register an account; registration is
    /// closed when unset
    pub register_token: Option<String>,

    /// Require a bearer session on `/api/*`
    pub require_auth: bool,

    pub session_ttl_hours: i64,

    /// Reject degenerate identities and undeclared columns on write
    pub strict_validation: bool,

    /// Identity columns used for upsert matching and combined views
    pub identity: IdentityFields,

    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error);
    /// `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            database_path: default_database_path(),
            encryption_key: None,
            cipher_mode: CipherMode::default(),
            register_token: None,
            require_auth: true,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            strict_validation: false,
            identity: IdentityFields::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl std::fmt::Debug for RosterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("RosterConfig")
            .field("port", &self.port)
            .field("bind_address", &self.bind_address)
            .field("database_path", &self.database_path)
            .field("encryption_key", &redact(&self.encryption_key))
            .field("cipher_mode", &self.cipher_mode)
            .field("register_token", &redact(&self.register_token))
            .field("require_auth", &self.require_auth)
            .field("session_ttl_hours", &self.session_ttl_hours)
            .field("strict_validation", &self.strict_validation)
            .field("identity", &self.identity)
            .field("logging", &self.logging)
            .finish()
    }
}

/// Command-line values that override everything else
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub database_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl RosterConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load a TOML file, falling back to defaults when it does not exist
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                info!("Loaded config file: {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file not found: {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full resolution: file, then process environment, then `overrides`
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let path = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                warn!("No config directory available, using defaults");
                Self::default()
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", ENV_PORT, e)))?;
        }
        if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
            self.bind_address = addr;
        }
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(key) = lookup(ENV_ENCRYPTION_KEY).or_else(|| lookup(ENV_LEGACY_ENCRYPTION_KEY)) {
            self.encryption_key = Some(key);
        }
        if let Some(mode) = lookup(ENV_CIPHER_MODE) {
            self.cipher_mode = parse_cipher_mode(&mode)?;
        }
        if let Some(token) = lookup(ENV_REGISTER_TOKEN) {
            self.register_token = Some(token);
        }
        if let Some(flag) = lookup(ENV_REQUIRE_AUTH) {
            self.require_auth = parse_bool(ENV_REQUIRE_AUTH, &flag)?;
        }
        if let Some(flag) = lookup(ENV_STRICT_VALIDATION) {
            self.strict_validation = parse_bool(ENV_STRICT_VALIDATION, &flag)?;
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(addr) = &overrides.bind_address {
            self.bind_address = addr.clone();
        }
        if let Some(path) = &overrides.database_path {
            self.database_path = path.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Build the process-wide cipher. Missing or malformed key is fatal.
    pub fn cipher(&self) -> Result<FieldCipher> {
        let key = self
            .encryption_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "encryption key not configured (set {} or encryption_key)",
                    ENV_ENCRYPTION_KEY
                ))
            })?;
        FieldCipher::from_hex(key, self.cipher_mode).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            identity: self.identity.clone(),
            strict_validation: self.strict_validation,
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours.max(1))
    }
}

fn parse_cipher_mode(value: &str) -> Result<CipherMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fixed-iv" => Ok(CipherMode::FixedIv),
        "random-iv" => Ok(CipherMode::RandomIv),
        other => Err(Error::Config(format!(
            "{}: expected fixed-iv or random-iv, got '{}'",
            ENV_CIPHER_MODE, other
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{}: not a boolean: '{}'", name, other))),
    }
}

/// `<config_dir>/roster/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("roster").join("config.toml"))
}

/// `<data_local_dir>/roster/roster.db`, or `./roster_data/roster.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("roster"))
        .unwrap_or_else(|| PathBuf::from("./roster_data"))
        .join("roster.db")
}
