//! Connection settings.
//!
//! Settings can be built in code, parsed from a connection string
//! (`Host=localhost;Port=8123;Compression=true;set_max_threads=4`) or read
//! from the `[connection]` table of a TOML file:
//!
//! ```toml
//! [connection]
//! host = "localhost"
//! port = 8123
//! username = "default"
//! compression = true
//! timeout = 30
//!
//! [connection.settings]
//! max_threads = 4
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::{ChError, ChResult};

/// Connection-string keys with this prefix are server settings.
pub const CUSTOM_SETTING_PREFIX: &str = "set_";

/// URL scheme used to reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ChError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(ChError::Config(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Everything needed to reach and talk to one server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Ask for compressed responses and gzip request bodies.
    pub compression: bool,
    /// Keep server-side session state between queries.
    pub use_session: bool,
    /// Explicit session id; generated when sessions are on and this is unset.
    pub session_id: Option<String>,
    #[serde(deserialize_with = "de_seconds")]
    pub timeout: Duration,
    /// Server settings sent with every request.
    #[serde(rename = "settings", deserialize_with = "de_settings")]
    pub custom_settings: BTreeMap<String, String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8123,
            protocol: Protocol::Http,
            database: "default".to_string(),
            username: "default".to_string(),
            password: String::new(),
            compression: true,
            use_session: false,
            session_id: None,
            timeout: Duration::from_secs(120),
            custom_settings: BTreeMap::new(),
        }
    }
}

fn de_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn de_settings<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    connection: ConnectionSettings,
}

impl ConnectionSettings {
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::default()
    }

    /// Base server URL, validated.
    pub fn base_url(&self) -> ChResult<Url> {
        if self.host.trim().is_empty() {
            return Err(ChError::Config("host is not set".into()));
        }
        let url = Url::parse(&format!("{}://{}:{}/", self.protocol, self.host, self.port))
            .map_err(|e| ChError::Config(format!("invalid server address: {}", e)))?;
        Ok(url)
    }

    /// Read the `[connection]` table of a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> ChResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ChResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ChError::Config(e.to_string()))?;
        Ok(file.connection)
    }

    /// `<config dir>/chq/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chq").join("config.toml"))
    }
}

fn parse_bool(key: &str, value: &str) -> ChResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ChError::Config(format!("invalid boolean for {}: '{}'", key, value))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> ChResult<T> {
    value
        .parse()
        .map_err(|_| ChError::Config(format!("invalid number for {}: '{}'", key, value)))
}

impl FromStr for ConnectionSettings {
    type Err = ChError;

    /// Parse `Key=Value` pairs separated by `;`. Keys are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut settings = Self::default();

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ChError::Config(format!("expected Key=Value, got '{}'", part)))?;
            let raw_key = key.trim();
            let value = value.trim();

            // Server setting names are case-sensitive; only the prefix is not.
            let prefix_len = CUSTOM_SETTING_PREFIX.len();
            if raw_key
                .get(..prefix_len)
                .is_some_and(|p| p.eq_ignore_ascii_case(CUSTOM_SETTING_PREFIX))
            {
                settings
                    .custom_settings
                    .insert(raw_key[prefix_len..].to_string(), value.to_string());
                continue;
            }

            let key = raw_key.to_ascii_lowercase();

            match key.as_str() {
                "host" => settings.host = value.to_string(),
                "port" => settings.port = parse_number(&key, value)?,
                "protocol" => settings.protocol = value.parse()?,
                "database" => settings.database = value.to_string(),
                "username" | "user" => settings.username = value.to_string(),
                "password" => settings.password = value.to_string(),
                "compression" => settings.compression = parse_bool(&key, value)?,
                "usesession" => settings.use_session = parse_bool(&key, value)?,
                "sessionid" => settings.session_id = Some(value.to_string()),
                "timeout" => settings.timeout = Duration::from_secs(parse_number(&key, value)?),
                other => {
                    return Err(ChError::Config(format!(
                        "unknown connection string key '{}'",
                        other
                    )));
                }
            }
        }

        Ok(settings)
    }
}

impl fmt::Display for ConnectionSettings {
    /// Connection-string form, readable back with `parse`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Host={};Port={};Protocol={};Database={};Username={};Password={};Compression={};UseSession={}",
            self.host,
            self.port,
            self.protocol,
            self.database,
            self.username,
            self.password,
            self.compression,
            self.use_session
        )?;
        if let Some(id) = &self.session_id {
            write!(f, ";SessionId={}", id)?;
        }
        write!(f, ";Timeout={}", self.timeout.as_secs())?;
        for (name, value) in &self.custom_settings {
            write!(f, ";{}{}={}", CUSTOM_SETTING_PREFIX, name, value)?;
        }
        Ok(())
    }
}

/// Builder for [`ConnectionSettings`].
#[derive(Debug, Default)]
pub struct ConnectionSettingsBuilder {
    settings: ConnectionSettings,
}

impl ConnectionSettingsBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.settings.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.settings.port = port;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.settings.protocol = protocol;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.settings.database = database.into();
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.settings.username = username.into();
        self.settings.password = password.into();
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.settings.compression = enabled;
        self
    }

    /// Enable sessions, optionally with a fixed id.
    pub fn session(mut self, session_id: Option<String>) -> Self {
        self.settings.use_session = true;
        self.settings.session_id = session_id;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.custom_settings.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> ConnectionSettings {
        self.settings
    }
}
