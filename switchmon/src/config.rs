//! Configuration for the collector and the chart tools. Everything that can
//! be wrong about user input should fail here, at startup, rather than in the
//! middle of a polling loop.
//!
//! Configuration is YAML. The whole document may instead be supplied through
//! the `SWITCHMON_CONFIG` environment variable, and credentials and database
//! parameters may be overridden one by one from the environment, see
//! [`Config::apply_env`].
use std::{env, fmt, fs, net::SocketAddr, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::debug;

/// Environment variable that, when set, holds the full configuration.
pub const CONFIG_ENV: &str = "SWITCHMON_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// An override environment variable held an unusable value.
    #[error("Environment variable {name} has invalid value '{value}'")]
    EnvVar {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
    /// A setting failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    4
}

fn default_interval_seconds() -> u64 {
    300
}

fn default_retry_seconds() -> u64 {
    60
}

fn default_max_retry_seconds() -> u64 {
    900
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The switch to poll
    pub switch: Switch,
    /// The database holding the counter table
    pub database: Database,
    /// Polling schedule
    #[serde(default)]
    pub poll: Poll,
    /// Exposition of this program's own metrics
    #[serde(default)]
    pub telemetry: Telemetry,
}

/// Connection details for the switch management API.
#[derive(Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Switch {
    /// Host, optionally with `:port`, of the management interface
    pub address: String,
    /// URL scheme, `https` unless the switch exposes plain HTTP
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Management user
    #[serde(default)]
    pub username: String,
    /// Management password
    #[serde(default)]
    pub password: String,
    /// Accept self-signed or otherwise invalid TLS certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Per-request timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Switch {
    /// Base URL of the management API, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.address.trim_end_matches('/'))
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl fmt::Debug for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Switch")
            .field("address", &self.address)
            .field("scheme", &self.scheme)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// PostgreSQL connection parameters.
#[derive(Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Database {
    /// Server host
    #[serde(default = "default_db_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Role to connect as
    pub user: String,
    /// Role password
    #[serde(default)]
    pub password: String,
    /// Upper bound on pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Polling schedule.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Poll {
    /// Time between successful polls
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Cooldown after the first failed poll
    #[serde(default = "default_retry_seconds")]
    pub retry_seconds: u64,
    /// Ceiling for the cooldown as failures repeat
    #[serde(default = "default_max_retry_seconds")]
    pub max_retry_seconds: u64,
    /// Where to write the latest set of readings as JSON, if anywhere
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Poll {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            retry_seconds: default_retry_seconds(),
            max_retry_seconds: default_max_retry_seconds(),
            snapshot_path: None,
        }
    }
}

impl Poll {
    /// Time between successful polls.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Exposition of internal metrics.
#[derive(Debug, Default, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct Telemetry {
    /// Address to bind a Prometheus exporter to. Unset disables the exporter.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Config {
    /// Parse a YAML document and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid configuration or an
    /// override variable holds an invalid value.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override credentials and database parameters from the environment.
    ///
    /// Recognized variables are `SWITCH_USERNAME`, `SWITCH_PASSWORD`,
    /// `DB_NAME`, `DB_USER`, `DB_PASSWORD`, `DB_HOST` and `DB_PORT`. The lookup
    /// is injected so callers control where values come from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvVar`] if `DB_PORT` is not a port number.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SWITCH_USERNAME") {
            self.switch.username = v;
        }
        if let Some(v) = lookup("SWITCH_PASSWORD") {
            self.switch.password = v;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.database.dbname = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.database.port = v.parse().map_err(|_| Error::EnvVar {
                name: "DB_PORT",
                value: v,
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        if self.switch.address.is_empty() {
            return Err(Error::Invalid("switch.address must not be empty"));
        }
        if self.poll.interval_seconds == 0 {
            return Err(Error::Invalid("poll.interval_seconds must be positive"));
        }
        if self.poll.retry_seconds == 0 {
            return Err(Error::Invalid("poll.retry_seconds must be positive"));
        }
        if self.poll.max_retry_seconds < self.poll.retry_seconds {
            return Err(Error::Invalid(
                "poll.max_retry_seconds must not be less than poll.retry_seconds",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(Error::Invalid("database.max_connections must be positive"));
        }
        Ok(())
    }
}

/// Load configuration from `SWITCHMON_CONFIG` if set, otherwise from `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents are not valid
/// configuration.
pub fn load(path: &Path) -> Result<Config, Error> {
    let contents = if let Ok(contents) = env::var(CONFIG_ENV) {
        debug!("Using config from env var '{CONFIG_ENV}'");
        contents
    } else {
        debug!("Attempting to open configuration file at: {}", path.display());
        fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?
    };
    Config::from_yaml(&contents)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rustc_hash::FxHashMap;

    use super::*;

    const FULL: &str = r#"
switch:
  address: "10.255.226.163"
  username: admin
  password: switch
  accept_invalid_certs: true
database:
  dbname: SwitchData
  user: postgres
  password: admin
poll:
  interval_seconds: 120
  snapshot_path: /tmp/transformed_data.json
telemetry:
  prometheus_addr: "127.0.0.1:9000"
"#;

    fn parse(contents: &str) -> Result<Config, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn config_deserializes() -> Result<(), Error> {
        let config = parse(FULL)?;
        assert_eq!(
            config,
            Config {
                switch: Switch {
                    address: "10.255.226.163".to_string(),
                    scheme: "https".to_string(),
                    username: "admin".to_string(),
                    password: "switch".to_string(),
                    accept_invalid_certs: true,
                    timeout_seconds: 30,
                },
                database: Database {
                    host: "127.0.0.1".to_string(),
                    port: 5432,
                    dbname: "SwitchData".to_string(),
                    user: "postgres".to_string(),
                    password: "admin".to_string(),
                    max_connections: 4,
                },
                poll: Poll {
                    interval_seconds: 120,
                    retry_seconds: 60,
                    max_retry_seconds: 900,
                    snapshot_path: Some(PathBuf::from("/tmp/transformed_data.json")),
                },
                telemetry: Telemetry {
                    prometheus_addr: Some("127.0.0.1:9000".parse().expect("valid addr")),
                },
            }
        );
        assert_eq!(config.switch.base_url(), "https://10.255.226.163");
        Ok(())
    }

    #[test]
    fn poll_defaults_to_five_minutes() -> Result<(), Error> {
        let config = parse(
            r#"
switch:
  address: switch.local
database:
  dbname: SwitchData
  user: postgres
"#,
        )?;
        assert_eq!(config.poll, Poll::default());
        assert_eq!(config.poll.interval(), Duration::from_secs(300));
        assert_eq!(config.telemetry.prometheus_addr, None);
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = parse(
            r#"
switch:
  address: switch.local
  colour: blue
database:
  dbname: SwitchData
  user: postgres
"#,
        );
        assert!(matches!(result, Err(Error::SerdeYaml(_))));
    }

    #[test]
    fn zero_interval_is_invalid() {
        let result = parse(
            r#"
switch:
  address: switch.local
database:
  dbname: SwitchData
  user: postgres
poll:
  interval_seconds: 0
"#,
        );
        assert!(matches!(result, Err(Error::Invalid(_))));
    }

    #[test]
    fn environment_overrides_credentials() -> Result<(), Error> {
        let mut config = parse(FULL)?;
        let vars: FxHashMap<&str, &str> = [
            ("SWITCH_USERNAME", "operator"),
            ("SWITCH_PASSWORD", "hunter2"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
        ]
        .into_iter()
        .collect();

        config.apply_env(|name| vars.get(name).map(|v| (*v).to_string()))?;

        assert_eq!(config.switch.username, "operator");
        assert_eq!(config.switch.password, "hunter2");
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.dbname, "SwitchData");
        Ok(())
    }

    #[test]
    fn bad_port_override_is_an_error() -> Result<(), Error> {
        let mut config = parse(FULL)?;
        let result = config.apply_env(|name| (name == "DB_PORT").then(|| "five".to_string()));
        assert!(matches!(result, Err(Error::EnvVar { name: "DB_PORT", .. })));
        Ok(())
    }

    #[test]
    fn debug_output_redacts_passwords() -> Result<(), Error> {
        let mut config = parse(FULL)?;
        config.switch.password = "s3cret-switch".to_string();
        config.database.password = "s3cret-db".to_string();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
        Ok(())
    }

    #[test]
    fn load_reads_file() -> Result<(), Box<dyn std::error::Error>> {
        if env::var(CONFIG_ENV).is_ok() {
            return Ok(());
        }
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(FULL.as_bytes())?;
        let config = load(file.path())?;
        assert_eq!(config.switch.address, "10.255.226.163");
        Ok(())
    }

    #[test]
    fn load_missing_file_is_an_error() {
        if env::var(CONFIG_ENV).is_ok() {
            return;
        }
        let result = load(Path::new("/nonexistent/switchmon.yaml"));
        assert!(matches!(result, Err(Error::ReadFile { .. })));
    }
}
