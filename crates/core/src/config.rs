use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaterfallError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub endpoint: String,
    pub datasource_uid: Option<String>,
    pub api_token: Option<String>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub supports_child_count: bool,
    pub lookback: Duration,
    pub stale_time: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3200".to_string(),
            datasource_uid: None,
            api_token: None,
            headers: Vec::new(),
            timeout: Duration::from_secs(30),
            supports_child_count: false,
            lookback: Duration::from_secs(60 * 60 * 24 * 7),
            stale_time: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    /// Base URL of the search API, routed through the Grafana datasource
    /// proxy when a datasource uid is configured.
    pub fn api_base(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        match &self.datasource_uid {
            Some(uid) => format!("{endpoint}/api/datasources/proxy/uid/{uid}"),
            None => endpoint.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    endpoint: Option<String>,
    datasource_uid: Option<String>,
    api_token: Option<String>,
    headers: Option<String>,
    timeout: Option<String>,
    supports_child_count: Option<bool>,
    lookback: Option<String>,
    stale_time: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("WATERFALL_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("waterfall/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| WaterfallError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| WaterfallError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let supports_child_count = match env::var("WATERFALL_SUPPORTS_CHILD_COUNT") {
        Ok(v) => Some(parse_bool(&v).ok_or_else(|| {
            WaterfallError::Config(format!(
                "bad WATERFALL_SUPPORTS_CHILD_COUNT in environment: {v}"
            ))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        endpoint: env::var("WATERFALL_ENDPOINT").ok(),
        datasource_uid: env::var("WATERFALL_DATASOURCE_UID").ok(),
        api_token: env::var("WATERFALL_API_TOKEN").ok(),
        headers: env::var("WATERFALL_HEADERS").ok(),
        timeout: env::var("WATERFALL_TIMEOUT").ok(),
        supports_child_count,
        lookback: env::var("WATERFALL_LOOKBACK").ok(),
        stale_time: env::var("WATERFALL_STALE_TIME").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.endpoint {
        cfg.endpoint = v;
    }
    if let Some(v) = overrides.datasource_uid {
        cfg.datasource_uid = Some(v).filter(|uid| !uid.is_empty());
    }
    if let Some(v) = overrides.api_token {
        cfg.api_token = Some(v).filter(|token| !token.is_empty());
    }
    if let Some(v) = overrides.headers {
        cfg.headers = parse_headers(&v).map_err(|e| {
            WaterfallError::Config(format!("bad headers in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.timeout {
        cfg.timeout = humantime::parse_duration(&v).map_err(|e| {
            WaterfallError::Config(format!("bad timeout in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.supports_child_count {
        cfg.supports_child_count = v;
    }
    if let Some(v) = overrides.lookback {
        cfg.lookback = humantime::parse_duration(&v).map_err(|e| {
            WaterfallError::Config(format!("bad lookback in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.stale_time {
        cfg.stale_time = humantime::parse_duration(&v).map_err(|e| {
            WaterfallError::Config(format!("bad stale_time in {source}: {e} (value={v})"))
        })?;
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_headers(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(WaterfallError::Config(
                "header entries must use key=value syntax".to_string(),
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(WaterfallError::Config(
                "header key cannot be empty".to_string(),
            ));
        }
        out.push((key.to_string(), value.trim().to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    #[test]
    fn default_points_at_local_backend() {
        let cfg = Config::default();
        assert_eq!(cfg.endpoint, "http://127.0.0.1:3200");
        assert_eq!(cfg.api_base(), "http://127.0.0.1:3200");
        assert!(!cfg.supports_child_count);
    }

    #[test]
    fn default_windows() {
        let cfg = Config::default();
        assert_eq!(cfg.lookback, Duration::from_secs(604_800));
        assert_eq!(cfg.stale_time, Duration::from_secs(5));
    }

    #[test]
    fn api_base_uses_datasource_proxy() {
        let cfg = Config {
            endpoint: "http://grafana:3000/".to_string(),
            datasource_uid: Some("tempo-uid".to_string()),
            ..Config::default()
        };
        assert_eq!(
            cfg.api_base(),
            "http://grafana:3000/api/datasources/proxy/uid/tempo-uid"
        );
    }

    #[test]
    fn parse_headers_accepts_list() {
        let headers = parse_headers("x-scope-orgid=dev,authorization=Bearer token").unwrap();
        assert_eq!(
            headers,
            vec![
                ("x-scope-orgid".to_string(), "dev".to_string()),
                ("authorization".to_string(), "Bearer token".to_string())
            ]
        );
    }

    #[test]
    fn parse_headers_rejects_bad_entries() {
        assert!(parse_headers("x-scope-orgid").is_err());
        assert!(parse_headers("=dev").is_err());
    }

    #[test]
    fn apply_overrides_updates_fields() {
        let mut cfg = Config::default();
        let file = ConfigOverrides {
            endpoint: Some("http://tempo:3200".to_string()),
            datasource_uid: Some(String::new()),
            timeout: Some("3s".to_string()),
            supports_child_count: Some(true),
            lookback: Some("1h".to_string()),
            ..ConfigOverrides::default()
        };

        apply_overrides(&mut cfg, file, "config file").unwrap();

        assert_eq!(cfg.endpoint, "http://tempo:3200");
        assert_eq!(cfg.datasource_uid, None);
        assert_eq!(cfg.timeout, Duration::from_secs(3));
        assert!(cfg.supports_child_count);
        assert_eq!(cfg.lookback, Duration::from_secs(3600));
    }

    #[test]
    fn apply_overrides_rejects_bad_durations() {
        let mut cfg = Config::default();
        let bad = ConfigOverrides {
            stale_time: Some("soon".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(apply_overrides(&mut cfg, bad, "environment").is_err());
    }

    #[test]
    #[serial]
    fn load_reads_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "endpoint = \"http://from-file:3200\"\nsupports_child_count = true\nheaders = \"x-scope-orgid=team\""
        )
        .unwrap();

        // SAFETY: serialized with other environment-touching tests.
        unsafe {
            env::set_var("WATERFALL_CONFIG", &path);
            env::set_var("WATERFALL_ENDPOINT", "http://from-env:3200");
        }
        let cfg = Config::load();
        unsafe {
            env::remove_var("WATERFALL_CONFIG");
            env::remove_var("WATERFALL_ENDPOINT");
        }

        let cfg = cfg.unwrap();
        assert_eq!(cfg.endpoint, "http://from-env:3200");
        assert!(cfg.supports_child_count);
        assert_eq!(
            cfg.headers,
            vec![("x-scope-orgid".to_string(), "team".to_string())]
        );
    }
}
