//! Process configuration read from `TABLEGATE_*` environment variables.
//!
//! Everything here is resolved once at startup; the resulting matrix and signing key are
//! handed to the server as explicit objects.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::access::{MatrixError, PermissionMatrix};
use crate::error::AppError;
use crate::identity::{SigningKey, TokenError, DEFAULT_ISSUER};

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:7878";
pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_PROVENANCE_TABLE: &str = "audit_log";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("reading {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("signing key: {0}")]
    Token(#[from] TokenError),
    #[error("TABLEGATE_SIGNING_KEY or TABLEGATE_SIGNING_KEY_FILE is required with a database")]
    MissingSigningKey,
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::internal("config_error".to_string(), err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Inline(String),
    File(PathBuf),
    None,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub http_addr: SocketAddr,
    pub signing_key: KeySource,
    pub token_issuer: String,
    pub matrix_file: Option<PathBuf>,
    pub database_url: Option<String>,
    pub pool_size: usize,
    pub store_timeout: Duration,
    pub provenance_table: String,
    pub secure_cookie: bool,
}

impl GateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let addr_text = get("TABLEGATE_HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
        let http_addr = addr_text
            .parse()
            .map_err(|e| ConfigError::Invalid { var: "TABLEGATE_HTTP_ADDR", reason: format!("{addr_text}: {e}") })?;

        let signing_key = match (get("TABLEGATE_SIGNING_KEY"), get("TABLEGATE_SIGNING_KEY_FILE")) {
            (Some(k), _) => KeySource::Inline(k),
            (None, Some(p)) => KeySource::File(PathBuf::from(p)),
            (None, None) => KeySource::None,
        };

        let pool_size = match get("TABLEGATE_POOL_SIZE") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::Invalid { var: "TABLEGATE_POOL_SIZE", reason: format!("'{v}' is not a positive integer") }),
            },
            None => DEFAULT_POOL_SIZE,
        };

        let timeout_ms = match get("TABLEGATE_STORE_TIMEOUT_MS") {
            Some(v) => match v.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "TABLEGATE_STORE_TIMEOUT_MS",
                        reason: format!("'{v}' is not a positive number of milliseconds"),
                    })
                }
            },
            None => DEFAULT_STORE_TIMEOUT_MS,
        };

        let secure_cookie = match get("TABLEGATE_SECURE_COOKIE").map(|v| v.to_ascii_lowercase()) {
            None => false,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            Some(v) => return Err(ConfigError::Invalid { var: "TABLEGATE_SECURE_COOKIE", reason: format!("'{v}' is not a boolean") }),
        };

        Ok(Self {
            http_addr,
            signing_key,
            token_issuer: get("TABLEGATE_TOKEN_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            matrix_file: get("TABLEGATE_MATRIX_FILE").map(PathBuf::from),
            database_url: get("TABLEGATE_DATABASE_URL"),
            pool_size,
            store_timeout: Duration::from_millis(timeout_ms),
            provenance_table: get("TABLEGATE_PROVENANCE_TABLE").unwrap_or_else(|| DEFAULT_PROVENANCE_TABLE.to_string()),
            secure_cookie,
        })
    }

    /// The configured matrix file, or the built-in reference matrix.
    pub fn load_matrix(&self) -> Result<PermissionMatrix, ConfigError> {
        match &self.matrix_file {
            Some(path) => Ok(PermissionMatrix::load(path)?),
            None => Ok(PermissionMatrix::reference()),
        }
    }

    /// A database deployment must bring its own key; the in-memory demo gets a throwaway one.
    pub fn resolve_signing_key(&self) -> Result<SigningKey, ConfigError> {
        match &self.signing_key {
            KeySource::Inline(text) => Ok(SigningKey::from_base64(text)?),
            KeySource::File(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
                Ok(SigningKey::from_base64(text.trim())?)
            }
            KeySource::None if self.database_url.is_some() => Err(ConfigError::MissingSigningKey),
            KeySource::None => {
                warn!(target: "tablegate::config", "no signing key configured; using an ephemeral key, sessions end with the process");
                Ok(SigningKey::generate()?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(vars: &[(&str, &str)]) -> Result<GateConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        GateConfig::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.http_addr.port(), 7878);
        assert_eq!(c.pool_size, 8);
        assert_eq!(c.store_timeout, Duration::from_secs(5));
        assert_eq!(c.provenance_table, "audit_log");
        assert_eq!(c.token_issuer, "tablegate");
        assert_eq!(c.signing_key, KeySource::None);
        assert!(!c.secure_cookie);
        assert!(c.database_url.is_none());
    }

    #[test]
    fn rejects_bad_numbers_and_flags() {
        assert!(matches!(cfg(&[("TABLEGATE_POOL_SIZE", "0")]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(cfg(&[("TABLEGATE_STORE_TIMEOUT_MS", "soon")]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(cfg(&[("TABLEGATE_SECURE_COOKIE", "maybe")]), Err(ConfigError::Invalid { .. })));
        assert!(matches!(cfg(&[("TABLEGATE_HTTP_ADDR", "localhost")]), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn database_without_key_is_refused() {
        let c = cfg(&[("TABLEGATE_DATABASE_URL", "postgres://svc@db/service_centre")]).unwrap();
        assert!(matches!(c.resolve_signing_key(), Err(ConfigError::MissingSigningKey)));
        let demo = cfg(&[]).unwrap();
        assert!(demo.resolve_signing_key().is_ok());
    }

    #[test]
    fn short_inline_key_is_rejected() {
        let c = cfg(&[("TABLEGATE_SIGNING_KEY", "c2hvcnQ=")]).unwrap();
        assert!(matches!(c.resolve_signing_key(), Err(ConfigError::Token(TokenError::WeakKey(_)))));
    }

    #[test]
    fn key_file_is_read_and_trimmed() {
        use base64::Engine;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        std::fs::write(&path, format!("{}\n", base64::engine::general_purpose::STANDARD.encode([7u8; 48]))).unwrap();
        let c = cfg(&[("TABLEGATE_SIGNING_KEY_FILE", path.to_str().unwrap())]).unwrap();
        assert!(c.resolve_signing_key().is_ok());
    }
}
