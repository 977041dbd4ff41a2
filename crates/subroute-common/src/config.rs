//! Configuration for subroute
//!
//! Configuration is layered: an optional TOML file, overridden by
//! environment variables prefixed with `SUBROUTE_` (sections separated by
//! `__`, e.g. `SUBROUTE_ROUTING__DESTINATION`). A fresh [`Config`] is loaded
//! for every routed message and never mutated afterwards.

use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SUBROUTE";

/// Allowed users when neither the store nor the environment sets any
pub const DEFAULT_USERS: &str = "";

/// Allowed subaddresses when neither the store nor the environment sets any
pub const DEFAULT_SUBADDRESSES: &str = "*";

/// Destination when neither the store nor the environment sets one
pub const DEFAULT_DESTINATION: &str = "";

/// Reject treatment when neither the store nor the environment sets one
pub const DEFAULT_REJECT_TREATMENT: &str = "Address does not exist";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Routing configuration
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Key-value store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Outbound transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Routing configuration.
///
/// The four address-level fields are optional so that "not set in the
/// environment" stays distinguishable from "set to an empty string". Hard
/// defaults for them live in the `DEFAULT_*` constants and are applied by the
/// resolver, after the stored layers have been consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Read `@USERS`, `@SUBADDRESSES`, `@DESTINATION` and `@REJECT_TREATMENT`
    /// from the store
    #[serde(default)]
    pub use_stored_address_config: bool,

    /// Read per-user `{user}` and `{user}+` entries from the store
    #[serde(default)]
    pub use_stored_user_config: bool,

    /// Comma-separated allowed users, or `*`
    #[serde(default)]
    pub users: Option<String>,

    /// Comma-separated allowed subaddresses, or `*`
    #[serde(default)]
    pub subaddresses: Option<String>,

    /// Destination specification for accepted messages
    #[serde(default)]
    pub destination: Option<String>,

    /// Reject-forward destination specification or literal reject reason
    #[serde(default)]
    pub reject_treatment: Option<String>,

    /// Separates primary destinations
    #[serde(default = "default_primary_separator")]
    pub primary_separator: String,

    /// Separates backup destinations within a primary destination
    #[serde(default = "default_backup_separator")]
    pub backup_separator: String,

    /// Separates user and subaddress in a local part
    #[serde(default = "default_local_part_separator")]
    pub local_part_separator: String,

    /// Separates destination and reject treatment in a per-user entry
    #[serde(default = "default_reject_separator")]
    pub reject_separator: String,

    /// Pattern a destination address must match
    #[serde(default = "default_email_pattern")]
    pub email_pattern: String,

    /// Pattern the custom header name must match
    #[serde(default = "default_header_name_pattern")]
    pub header_name_pattern: String,

    /// Custom header added to forwarded messages
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Header value for accepted messages
    #[serde(default = "default_header_pass_value")]
    pub header_pass_value: String,

    /// Header value for reject-forwarded messages
    #[serde(default = "default_header_fail_value")]
    pub header_fail_value: String,

    /// Delivery errors whose message matches are recoverable
    #[serde(default = "default_recoverable_error_pattern")]
    pub recoverable_error_pattern: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            use_stored_address_config: false,
            use_stored_user_config: false,
            users: None,
            subaddresses: None,
            destination: None,
            reject_treatment: None,
            primary_separator: default_primary_separator(),
            backup_separator: default_backup_separator(),
            local_part_separator: default_local_part_separator(),
            reject_separator: default_reject_separator(),
            email_pattern: default_email_pattern(),
            header_name_pattern: default_header_name_pattern(),
            header_name: default_header_name(),
            header_pass_value: default_header_pass_value(),
            header_fail_value: default_header_fail_value(),
            recoverable_error_pattern: default_recoverable_error_pattern(),
        }
    }
}

fn default_primary_separator() -> String {
    ",".to_string()
}

fn default_backup_separator() -> String {
    ":".to_string()
}

fn default_local_part_separator() -> String {
    "+".to_string()
}

fn default_reject_separator() -> String {
    ";".to_string()
}

fn default_email_pattern() -> String {
    r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
        .to_string()
}

fn default_header_name_pattern() -> String {
    r"^X-[A-Za-z0-9-]+$".to_string()
}

fn default_header_name() -> String {
    "X-Subroute".to_string()
}

fn default_header_pass_value() -> String {
    "PASS".to_string()
}

fn default_header_fail_value() -> String {
    "FAIL".to_string()
}

fn default_recoverable_error_pattern() -> String {
    ".*".to_string()
}

impl RoutingConfig {
    /// Check the format separators.
    ///
    /// Each separator must be non-empty, must not contain `@` or `*`, and
    /// all four must be mutually distinct.
    pub fn validate(&self) -> crate::Result<()> {
        let separators = [
            ("primary_separator", &self.primary_separator),
            ("backup_separator", &self.backup_separator),
            ("local_part_separator", &self.local_part_separator),
            ("reject_separator", &self.reject_separator),
        ];

        for (name, value) in &separators {
            if value.is_empty() {
                return Err(crate::Error::Config(format!("{} must not be empty", name)));
            }
            if value.contains('@') || value.contains('*') {
                return Err(crate::Error::Config(format!(
                    "{} '{}' must not contain '@' or '*'",
                    name, value
                )));
            }
        }

        for (i, (name, value)) in separators.iter().enumerate() {
            for (other_name, other) in &separators[i + 1..] {
                if value == other {
                    return Err(crate::Error::Config(format!(
                        "{} and {} must differ (both '{}')",
                        name, other_name, value
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Key-value store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map, empty at startup
    Memory,
    /// SQLite database file
    Sqlite,
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend: "memory" or "sqlite"
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Database path (for sqlite)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/subroute/subroute.db")
}

/// Connection security towards the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    /// Plain SMTP
    None,
    /// Upgrade with STARTTLS
    Starttls,
    /// Implicit TLS
    Tls,
}

/// Outbound SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Relay host
    #[serde(default = "default_transport_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_transport_port")]
    pub port: u16,

    /// Connection security
    #[serde(default = "default_transport_security")]
    pub security: TransportSecurity,

    /// Relay username
    pub username: Option<String>,

    /// Relay password
    pub password: Option<String>,

    /// Envelope sender for forwarded messages; defaults to the original sender
    pub envelope_from: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_transport_host(),
            port: default_transport_port(),
            security: default_transport_security(),
            username: None,
            password: None,
            envelope_from: None,
        }
    }
}

fn default_transport_host() -> String {
    "localhost".to_string()
}

fn default_transport_port() -> u16 {
    25
}

fn default_transport_security() -> TransportSecurity {
    TransportSecurity::None
}

impl Config {
    /// Load configuration from a file (or the default locations) and the
    /// process environment
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, taking environment variables from `env` instead
    /// of the process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                let paths = [
                    PathBuf::from("./subroute.toml"),
                    PathBuf::from("/etc/subroute/subroute.toml"),
                ];
                for path in paths {
                    if path.exists() {
                        builder = builder.add_source(File::from(path).format(FileFormat::Toml));
                        break;
                    }
                }
            }
        }

        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__");
        if let Some(vars) = env {
            environment = environment.source(Some(vars.into_iter().collect()));
        }

        let config: Config = builder.add_source(environment).build()?.try_deserialize()?;
        config.routing.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.routing.validate()?;

        Ok(config)
    }
}
