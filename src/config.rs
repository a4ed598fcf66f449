//! Connection and stream settings. Mirrors the shape of a driver's
//! `MongoClientSettings`/`SslSettings`, scoped to what the connection core
//! actually consumes: timeouts, TLS material, and the compressor preference
//! list.

use std::fs;
use std::time::Duration;

use serde::Deserialize;

/// Config loading/validation is not part of the wire-error taxonomy (§7) —
/// it never involves a server address or connection id — so it gets its own
/// small error type rather than forcing a placeholder address through
/// `crate::error::Error`.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub application_name: Option<String>,
    #[serde(default)]
    pub compressors: Vec<String>,
    #[serde(default)]
    pub tls: TlsSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            application_name: None,
            compressors: Vec::new(),
            tls: TlsSettings::default(),
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be greater than zero".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be greater than zero".to_string()));
        }
        self.tls.validate()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub ca_file: Option<String>,
    pub client_cert_file: Option<String>,
    pub client_key_file: Option<String>,
    /// Disables hostname/chain validation. Development-only; a warning is
    /// logged whenever this is set, matching the teacher's TLS module.
    pub allow_invalid_certs: bool,
    /// SNI is skipped automatically for IP-literal hosts regardless of this
    /// flag (SNI rejects IP literals); this only controls non-literal hosts.
    pub server_name_override: Option<String>,
}

impl TlsSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match (&self.client_cert_file, &self.client_key_file) {
            (Some(_), None) | (None, Some(_)) => {
                Err(ConfigError::Invalid("client_cert_file and client_key_file must be set together".to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ConnectionSettings::default().validate().unwrap();
    }

    #[test]
    fn zero_connect_timeout_is_rejected() {
        let mut settings = ConnectionSettings::default();
        settings.connect_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn lone_client_cert_is_rejected() {
        let mut settings = ConnectionSettings::default();
        settings.tls.enabled = true;
        settings.tls.client_cert_file = Some("cert.pem".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn deserializes_from_toml() {
        let toml_str = r#"
            connect_timeout_ms = 5000
            read_timeout_ms = 15000
            compressors = ["zstd", "snappy"]

            [tls]
            enabled = true
            ca_file = "/etc/ssl/ca.pem"
        "#;
        let settings: ConnectionSettings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.connect_timeout_ms, 5000);
        assert_eq!(settings.compressors, vec!["zstd", "snappy"]);
        assert!(settings.tls.enabled);
    }
}
