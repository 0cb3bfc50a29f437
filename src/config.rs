use anyhow::{Context, Result, bail};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tiktok-downloader-env";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_YTDLP: &str = "yt-dlp";

/// Values read from the env-style config file. Every key is optional.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub downloads_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_path: Option<PathBuf>,
    pub delete_after_serve: Option<bool>,
}

/// Fully resolved settings the backend runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub downloads_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub ytdlp_path: PathBuf,
    pub delete_after_serve: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from(DEFAULT_DOWNLOADS_DIR),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ytdlp_path: PathBuf::from(DEFAULT_YTDLP),
            delete_after_serve: false,
        }
    }
}

impl Settings {
    /// Applies the file values on top of the defaults.
    pub fn from_env_config(cfg: EnvConfig) -> Self {
        let defaults = Self::default();
        Self {
            downloads_dir: cfg.downloads_dir.unwrap_or(defaults.downloads_dir),
            host: cfg.host.unwrap_or(defaults.host),
            port: cfg.port.unwrap_or(defaults.port),
            ytdlp_path: cfg.ytdlp_path.unwrap_or(defaults.ytdlp_path),
            delete_after_serve: cfg.delete_after_serve.unwrap_or(defaults.delete_after_serve),
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "DOWNLOADS_DIR" => cfg.downloads_dir = Some(PathBuf::from(value)),
            "TIKTOK_HOST" => cfg.host = Some(value.to_string()),
            "TIKTOK_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing TIKTOK_PORT from {}", path.display()))?;
                cfg.port = Some(port);
            }
            "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
            "DELETE_AFTER_SERVE" => {
                let flag = parse_bool(value).with_context(|| {
                    format!("Parsing DELETE_AFTER_SERVE from {}", path.display())
                })?;
                cfg.delete_after_serve = Some(flag);
            }
            _ => {}
        }
    }
    Ok(Some(cfg))
}

/// Loads settings from `path`, falling back to defaults when the file is
/// missing.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    Ok(Settings::from_env_config(cfg))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
