mod config;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};
use vidgrab_core::{MediaFormat, Quality, VidgrabError, VidgrabResult};

pub use config::{
    ApiConfig, DefaultConfig, LogConfig, OutputConfig, PollConfig, VidgrabConfig,
};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_LOG_LEVEL: &str = "warn";

pub const ENV_API_URL: &str = "VIDGRAB_API_URL";
pub const ENV_DEFAULT_FORMAT: &str = "VIDGRAB_DEFAULT_FORMAT";
pub const ENV_DEFAULT_QUALITY: &str = "VIDGRAB_DEFAULT_QUALITY";
pub const ENV_OUTPUT_DIR: &str = "VIDGRAB_OUTPUT_DIR";
pub const ENV_OUTPUT_SIMPLE: &str = "VIDGRAB_OUTPUT_SIMPLE";
pub const ENV_POLL_INTERVAL: &str = "VIDGRAB_POLL_INTERVAL";
pub const ENV_LOG: &str = "VIDGRAB_LOG";

/// Keys accepted by `config get` / `config set`.
pub const CONFIG_KEYS: &[&str] = &[
    "api.base_url",
    "api.connect_timeout_secs",
    "default.format",
    "default.quality",
    "output.dir",
    "output.simple",
    "poll.interval_secs",
    "log.level",
];

pub fn config_path() -> VidgrabResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VidgrabError::Config("home directory not found".to_string()))?;
    Ok(home.join(".vidgrab").join("config.toml"))
}

pub fn load_config() -> VidgrabResult<VidgrabConfig> {
    let path = config_path()?;
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(VidgrabConfig::default());
    }
    let content = fs::read_to_string(&path)
        .map_err(|err| VidgrabError::Config(format!("failed to read config: {err}")))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> VidgrabResult<VidgrabConfig> {
    toml::from_str(content)
        .map_err(|err| VidgrabError::Config(format!("failed to parse config: {err}")))
}

pub fn save_config(config: &VidgrabConfig) -> VidgrabResult<()> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| VidgrabError::Config(format!("failed to create config dir: {err}")))?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|err| VidgrabError::Config(format!("failed to serialize config: {err}")))?;
    fs::write(&path, content)
        .map_err(|err| VidgrabError::Config(format!("failed to write config: {err}")))?;
    Ok(())
}

pub fn config_exists() -> VidgrabResult<bool> {
    let path = config_path()?;
    Ok(path.exists())
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn resolve_api_url(config: &VidgrabConfig) -> VidgrabResult<String> {
    api_url_from(env_value(ENV_API_URL), config)
}

fn api_url_from(env: Option<String>, config: &VidgrabConfig) -> VidgrabResult<String> {
    let raw = env
        .or_else(|| config.api.base_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let trimmed = raw.trim().trim_end_matches('/');
    url::Url::parse(trimmed)
        .map_err(|err| VidgrabError::Config(format!("invalid api.base_url '{raw}': {err}")))?;
    Ok(trimmed.to_string())
}

pub fn resolve_connect_timeout(config: &VidgrabConfig) -> Duration {
    Duration::from_secs(
        config
            .api
            .connect_timeout_secs
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
    )
}

pub fn resolve_default_format(config: &VidgrabConfig) -> VidgrabResult<MediaFormat> {
    env_value(ENV_DEFAULT_FORMAT)
        .or_else(|| config.default.format.clone())
        .map(|value| value.parse::<MediaFormat>())
        .transpose()
        .map(Option::unwrap_or_default)
}

pub fn resolve_default_quality(config: &VidgrabConfig) -> VidgrabResult<Quality> {
    env_value(ENV_DEFAULT_QUALITY)
        .or_else(|| config.default.quality.clone())
        .map(|value| value.parse::<Quality>())
        .transpose()
        .map(Option::unwrap_or_default)
}

pub fn resolve_output_dir(config: &VidgrabConfig) -> PathBuf {
    let raw = env_value(ENV_OUTPUT_DIR)
        .or_else(|| config.output.dir.clone())
        .unwrap_or_else(|| ".".to_string());
    expand_home(&raw)
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

pub fn resolve_simple_output(config: &VidgrabConfig) -> Option<bool> {
    if let Some(value) = env_value(ENV_OUTPUT_SIMPLE) {
        return Some(parse_flag(&value));
    }
    config.output.simple
}

fn parse_flag(value: &str) -> bool {
    let normalized = value.to_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes"
}

pub fn resolve_poll_interval(config: &VidgrabConfig) -> Duration {
    poll_interval_from(env_value(ENV_POLL_INTERVAL), config)
}

fn poll_interval_from(env: Option<String>, config: &VidgrabConfig) -> Duration {
    let from_env = env.and_then(|value| match value.parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(err) => {
            warn!(value = %value, error = %err, "ignoring invalid {ENV_POLL_INTERVAL}");
            None
        }
    });
    let secs = from_env
        .or(config.poll.interval_secs)
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    Duration::from_secs(secs)
}

pub fn resolve_log_level(config: &VidgrabConfig) -> String {
    env_value(ENV_LOG)
        .or_else(|| config.log.level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

pub fn get_config_value(config: &VidgrabConfig, key_path: &str) -> Option<String> {
    let parts: Vec<&str> = key_path.split('.').collect();

    match parts.as_slice() {
        ["api", "base_url"] => config.api.base_url.clone(),
        ["api", "connect_timeout_secs"] => config.api.connect_timeout_secs.map(|v| v.to_string()),
        ["default", "format"] => config.default.format.clone(),
        ["default", "quality"] => config.default.quality.clone(),
        ["output", "dir"] => config.output.dir.clone(),
        ["output", "simple"] => config.output.simple.map(|b| b.to_string()),
        ["poll", "interval_secs"] => config.poll.interval_secs.map(|v| v.to_string()),
        ["log", "level"] => config.log.level.clone(),
        _ => None,
    }
}

/// Converts a raw `config set` argument into the TOML value the key expects.
fn typed_value(key_path: &str, value: &str) -> VidgrabResult<toml_edit::Item> {
    match key_path {
        "api.connect_timeout_secs" | "poll.interval_secs" => {
            let number = value.trim().parse::<u64>().map_err(|_| {
                VidgrabError::Config(format!(
                    "'{key_path}' expects a non-negative whole number, got '{value}'"
                ))
            })?;
            let number = i64::try_from(number).map_err(|_| {
                VidgrabError::Config(format!("'{key_path}' is out of range: {value}"))
            })?;
            Ok(toml_edit::value(number))
        }
        "output.simple" => Ok(toml_edit::value(parse_flag(value))),
        "default.format" => {
            let format: MediaFormat = value.parse()?;
            Ok(toml_edit::value(format.as_str()))
        }
        "default.quality" => {
            let quality: Quality = value.parse()?;
            Ok(toml_edit::value(quality.as_str()))
        }
        "api.base_url" => {
            url::Url::parse(value)
                .map_err(|err| VidgrabError::Config(format!("invalid url '{value}': {err}")))?;
            Ok(toml_edit::value(value))
        }
        _ => Ok(toml_edit::value(value)),
    }
}

pub fn set_config_value(key_path: &str, value: &str) -> VidgrabResult<()> {
    let path = config_path()?;
    let content = if path.exists() {
        fs::read_to_string(&path)
            .map_err(|err| VidgrabError::Config(format!("failed to read config: {err}")))?
    } else {
        String::new()
    };

    let updated = apply_config_value(&content, key_path, value)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| VidgrabError::Config(format!("failed to create config dir: {err}")))?;
    }
    fs::write(&path, updated)
        .map_err(|err| VidgrabError::Config(format!("failed to write config: {err}")))?;

    Ok(())
}

fn apply_config_value(content: &str, key_path: &str, value: &str) -> VidgrabResult<String> {
    if !CONFIG_KEYS.contains(&key_path) {
        return Err(VidgrabError::Config(format!(
            "unknown key '{key_path}' (known keys: {})",
            CONFIG_KEYS.join(", ")
        )));
    }

    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|err| VidgrabError::Config(format!("failed to parse config: {err}")))?;

    let Some((section, leaf)) = key_path.split_once('.') else {
        return Err(VidgrabError::Config(
            "key path must have 2 parts (e.g., 'api.base_url')".to_string(),
        ));
    };

    let table = doc
        .as_table_mut()
        .entry(section)
        .or_insert(toml_edit::Item::Table(Default::default()))
        .as_table_mut()
        .ok_or_else(|| VidgrabError::Config(format!("cannot set nested value in '{key_path}'")))?;
    table[leaf] = typed_value(key_path, value)?;

    Ok(doc.to_string())
}

pub fn open_in_editor() -> VidgrabResult<()> {
    let path = config_path()?;
    if !path.exists() {
        save_config(&VidgrabConfig::default())?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| {
        if cfg!(target_os = "macos") {
            "vim".to_string()
        } else if cfg!(target_os = "windows") {
            "notepad".to_string()
        } else {
            "nano".to_string()
        }
    });

    let status = Command::new(&editor).arg(&path).status().map_err(|err| {
        VidgrabError::Config(format!("failed to open editor '{editor}': {err}"))
    })?;

    if !status.success() {
        return Err(VidgrabError::Config(format!(
            "editor exited with status: {status}"
        )));
    }

    Ok(())
}
