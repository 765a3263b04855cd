use anyhow::{Context, Result, bail};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::intake::MAX_UPLOAD_BYTES;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/highlight-reel-env";
pub const DEFAULT_STORAGE_ROOT: &str = "static/uploads";
pub const DEFAULT_DATABASE_PATH: &str = "database.db";
pub const DEFAULT_REEL_HOST: &str = "0.0.0.0";
pub const DEFAULT_REEL_PORT: u16 = 5000;
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;

/// Values found in one source (config file or process environment). Unset
/// keys stay `None` so sources can be layered.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub storage_root: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub reel_host: Option<String>,
    pub reel_port: Option<u16>,
    pub max_upload_bytes: Option<u64>,
    pub session_ttl_hours: Option<i64>,
}

impl EnvConfig {
    /// Keys set in `other` win.
    fn overlay(self, other: EnvConfig) -> Self {
        Self {
            storage_root: other.storage_root.or(self.storage_root),
            database_path: other.database_path.or(self.database_path),
            reel_host: other.reel_host.or(self.reel_host),
            reel_port: other.reel_port.or(self.reel_port),
            max_upload_bytes: other.max_upload_bytes.or(self.max_upload_bytes),
            session_ttl_hours: other.session_ttl_hours.or(self.session_ttl_hours),
        }
    }

    fn apply(&mut self, key: &str, value: &str, source: &str) -> Result<()> {
        match key {
            "STORAGE_ROOT" if !value.is_empty() => self.storage_root = Some(PathBuf::from(value)),
            "DATABASE_PATH" if !value.is_empty() => {
                self.database_path = Some(PathBuf::from(value))
            }
            "REEL_HOST" if !value.is_empty() => self.reel_host = Some(value.to_string()),
            "REEL_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing REEL_PORT from {source}"))?;
                self.reel_port = Some(port);
            }
            "MAX_UPLOAD_BYTES" => {
                let bytes: u64 = value
                    .parse()
                    .with_context(|| format!("Parsing MAX_UPLOAD_BYTES from {source}"))?;
                if bytes == 0 {
                    bail!("MAX_UPLOAD_BYTES from {source} must be greater than zero");
                }
                self.max_upload_bytes = Some(bytes);
            }
            "SESSION_TTL_HOURS" => {
                let hours: i64 = value
                    .parse()
                    .with_context(|| format!("Parsing SESSION_TTL_HOURS from {source}"))?;
                if !(1..=24 * 365).contains(&hours) {
                    bail!("SESSION_TTL_HOURS from {source} must be between 1 and 8760");
                }
                self.session_ttl_hours = Some(hours);
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: u64,
    pub session_ttl_hours: i64,
}

impl RuntimeConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn max_upload_bytes_usize(&self) -> usize {
        usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX)
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let source = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            cfg.apply(key.trim(), value, &source)?;
        }
    }
    Ok(Some(cfg))
}

/// Collects the recognised keys from environment-style pairs.
pub fn env_overrides<I>(vars: I) -> Result<EnvConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut cfg = EnvConfig::default();
    for (key, value) in vars {
        cfg.apply(&key, value.trim(), "the environment")?;
    }
    Ok(cfg)
}

/// Layers built-in defaults, then the config file (if present), then the
/// given environment pairs.
pub fn load_runtime_config_from<I>(path: impl AsRef<Path>, vars: I) -> Result<RuntimeConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let file = read_env_config(path.as_ref())?.unwrap_or_default();
    let cfg = file.overlay(env_overrides(vars)?);
    Ok(RuntimeConfig {
        storage_root: cfg
            .storage_root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
        database_path: cfg
            .database_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
        host: cfg
            .reel_host
            .unwrap_or_else(|| DEFAULT_REEL_HOST.to_string()),
        port: cfg.reel_port.unwrap_or(DEFAULT_REEL_PORT),
        max_upload_bytes: cfg.max_upload_bytes.unwrap_or(MAX_UPLOAD_BYTES),
        session_ttl_hours: cfg.session_ttl_hours.unwrap_or(DEFAULT_SESSION_TTL_HOURS),
    })
}
