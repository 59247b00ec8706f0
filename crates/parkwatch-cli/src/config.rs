//! CLI-owned configuration: TOML file + environment + flag overrides,
//! translated into the runtime config structs the library crates take.
//!
//! The library crates never read config files -- they receive a
//! pre-built [`StreamConfig`] / [`ProbeConfig`] from here.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use parkwatch_api::{ProbeConfig, StreamConfig};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::error::CliError;

// ── TOML config structs ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamSettings,

    #[serde(default)]
    pub probe: ProbeSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StreamSettings {
    /// Detection stream endpoint (`ws://` or `wss://`).
    pub url: Option<String>,

    /// Reconnect backoff unit in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Reconnect attempt budget.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: None,
            base_delay_secs: default_base_delay(),
            max_reconnect_attempts: default_max_reconnects(),
        }
    }
}

fn default_base_delay() -> u64 {
    2
}
fn default_max_reconnects() -> u32 {
    3
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProbeSettings {
    /// Backend health endpoint (`http://` or `https://`).
    pub health_url: Option<String>,

    /// Probe period in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            health_url: None,
            interval_secs: default_interval(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_interval() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    5
}

// ── Config file path ─────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "parkwatch", "parkwatch")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("parkwatch");
            p.push("config.toml");
            p
        })
}

// ── Config loading ───────────────────────────────────────────────────

/// Load the full config from defaults + file + environment.
///
/// Environment variables use a `PARKWATCH_` prefix with `__` as the
/// section separator, e.g. `PARKWATCH_STREAM__URL`.
pub fn load_config() -> Result<Config, CliError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(config_path()))
        .merge(Env::prefixed("PARKWATCH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Resolution into runtime configs ──────────────────────────────────

/// Translate config + flags into a [`StreamConfig`] (flag > env > file).
pub fn resolve_stream(
    config: &Config,
    global: &GlobalOpts,
    args: &WatchArgs,
) -> Result<StreamConfig, CliError> {
    let url = parse_url(
        global.stream_url.as_deref().or(config.stream.url.as_deref()),
        "stream.url",
        "--stream-url",
        "PARKWATCH_STREAM_URL",
    )?;

    let mut stream = StreamConfig::new(url);
    stream.base_delay =
        Duration::from_secs(args.base_delay.unwrap_or(config.stream.base_delay_secs));
    stream.max_reconnect_attempts = args
        .max_reconnects
        .unwrap_or(config.stream.max_reconnect_attempts);
    Ok(stream)
}

/// Translate config + flags into a [`ProbeConfig`] (flag > env > file).
pub fn resolve_probe(config: &Config, global: &GlobalOpts) -> Result<ProbeConfig, CliError> {
    let url = parse_url(
        global
            .health_url
            .as_deref()
            .or(config.probe.health_url.as_deref()),
        "probe.health_url",
        "--health-url",
        "PARKWATCH_HEALTH_URL",
    )?;

    let mut probe = ProbeConfig::new(url);
    probe.interval = Duration::from_secs(config.probe.interval_secs);
    probe.timeout = Duration::from_secs(config.probe.timeout_secs);
    Ok(probe)
}

fn parse_url(
    value: Option<&str>,
    field: &str,
    flag: &str,
    env: &str,
) -> Result<Url, CliError> {
    let raw = value.ok_or_else(|| CliError::MissingSetting {
        field: field.into(),
        flag: flag.into(),
        env: env.into(),
    })?;
    raw.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::WatchArgs;

    fn global(stream_url: Option<&str>, health_url: Option<&str>) -> GlobalOpts {
        GlobalOpts {
            stream_url: stream_url.map(str::to_owned),
            health_url: health_url.map(str::to_owned),
            verbose: 0,
        }
    }

    #[test]
    fn flags_override_file_settings() {
        let mut config = Config::default();
        config.stream.url = Some("ws://file.example/stream".into());

        let args = WatchArgs {
            base_delay: Some(1),
            max_reconnects: Some(9),
            limit: None,
        };
        let stream = resolve_stream(
            &config,
            &global(Some("ws://flag.example/stream"), None),
            &args,
        )
        .unwrap();

        assert_eq!(stream.url.as_str(), "ws://flag.example/stream");
        assert_eq!(stream.base_delay, Duration::from_secs(1));
        assert_eq!(stream.max_reconnect_attempts, 9);
    }

    #[test]
    fn file_defaults_apply_when_no_flags() {
        let mut config = Config::default();
        config.stream.url = Some("ws://file.example/stream".into());

        let args = WatchArgs {
            base_delay: None,
            max_reconnects: None,
            limit: None,
        };
        let stream = resolve_stream(&config, &global(None, None), &args).unwrap();

        assert_eq!(stream.base_delay, Duration::from_secs(2));
        assert_eq!(stream.max_reconnect_attempts, 3);
    }

    #[test]
    fn missing_url_is_a_usage_error() {
        let config = Config::default();
        let err = resolve_probe(&config, &global(None, None)).unwrap_err();
        assert!(matches!(err, CliError::MissingSetting { .. }));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let config = Config::default();
        let err = resolve_probe(&config, &global(None, Some("not a url"))).unwrap_err();
        assert!(matches!(err, CliError::Validation { .. }));
    }
}
