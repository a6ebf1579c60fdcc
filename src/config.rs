use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::MAX_TTL_DAYS;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// Base64-encoded HMAC key for session tokens. Generated per process when absent.
    pub token_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub max_content_len: usize,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 2052)),
            data_dir: PathBuf::from("data"),
            token_secret: None,
            token_ttl_secs: 3600,
            max_content_len: 4096,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    /// Reads `CHAT_CONFIG` (or `config.json`) if present, then applies
    /// `CHAT_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CHAT_CONFIG").map_or_else(|_| PathBuf::from("config.json"), PathBuf::from);
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("CHAT_BIND") {
            self.bind = bind.parse().map_err(|e| invalid("CHAT_BIND", e))?;
        }
        if let Some(dir) = lookup("CHAT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secret) = lookup("CHAT_TOKEN_SECRET") {
            self.token_secret = Some(secret);
        }
        if let Some(ttl) = lookup("CHAT_TOKEN_TTL_SECS") {
            self.token_ttl_secs = ttl.parse().map_err(|e| invalid("CHAT_TOKEN_TTL_SECS", e))?;
        }
        if let Some(len) = lookup("CHAT_MAX_CONTENT_LEN") {
            self.max_content_len = len.parse().map_err(|e| invalid("CHAT_MAX_CONTENT_LEN", e))?;
        }
        if let Some(cert) = lookup("CHAT_TLS_CERT") {
            self.tls_cert = Some(PathBuf::from(cert));
        }
        if let Some(key) = lookup("CHAT_TLS_KEY") {
            self.tls_key = Some(PathBuf::from(key));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ttl_secs == 0 {
            return Err(invalid("token_ttl_secs", "must be greater than zero"));
        }
        if self.token_ttl_secs > MAX_TTL_DAYS.unsigned_abs() * 24 * 60 * 60 {
            return Err(invalid(
                "token_ttl_secs",
                format!("must be at most {MAX_TTL_DAYS} days"),
            ));
        }
        if self.max_content_len == 0 {
            return Err(invalid("max_content_len", "must be greater than zero"));
        }
        if self.token_secret.is_some() {
            self.secret_bytes()?;
        }
        Ok(())
    }

    /// Returns the configured token secret, or `None` when one must be generated.
    pub fn secret_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(secret) = &self.token_secret else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(secret)
            .map_err(|e| invalid("token_secret", e))?;
        if bytes.len() < MIN_SECRET_LEN {
            return Err(invalid(
                "token_secret",
                format!("must decode to at least {MIN_SECRET_LEN} bytes"),
            ));
        }
        Ok(Some(bytes))
    }

    pub fn generate_secret() -> Vec<u8> {
        let mut bytes = vec![0u8; MIN_SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }
}

fn invalid(key: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
