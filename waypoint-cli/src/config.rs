//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use waypoint_core::CloudSource;

/// Resolver configuration. File: ~/.config/waypoint/config.toml or /etc/waypoint/config.toml.
/// Env overrides: WAYPOINT_STATE_PATH, WAYPOINT_TIMEOUT_MS, WAYPOINT_REPORT_HOST,
/// WAYPOINT_IMAGE_HOST, WAYPOINT_REGION, WAYPOINT_CLIENT_TAG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Persisted state file.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Per-request timeout (default 5000 ms).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Hydration barrier bound (default 3000 ms).
    #[serde(default = "default_hydration_timeout_ms")]
    pub hydration_timeout_ms: u64,
    /// Upper bound on re-probes triggered by cloud sources in one cycle.
    #[serde(default = "default_max_fallback_probes")]
    pub max_fallback_probes: usize,
    /// Client identifier carried in request envelopes.
    #[serde(default = "default_client_tag")]
    pub client_tag: String,
    /// Region sent with domain failure reports.
    #[serde(default = "default_region")]
    pub region: String,
    /// Host receiving domain failure reports; reports are skipped when unset.
    #[serde(default)]
    pub report_host: Option<String>,
    /// Prefix for relative advert image paths.
    #[serde(default)]
    pub image_host: Option<String>,
    /// API hosts used when no state has been persisted yet.
    #[serde(default = "default_api_hosts")]
    pub api_hosts: Vec<String>,
    /// Cloud fallback registries, tried in order.
    #[serde(default = "default_clouds")]
    pub clouds: Vec<CloudSource>,
}

fn default_state_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("waypoint/state.json")
}
fn default_timeout_ms() -> u64 {
    crate::transport::DEFAULT_TIMEOUT.as_millis() as u64
}
fn default_hydration_timeout_ms() -> u64 {
    3000
}
fn default_max_fallback_probes() -> usize {
    8
}
fn default_client_tag() -> String {
    std::env::consts::OS.to_string()
}
fn default_region() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| region_from_locale(&lang))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}
fn default_api_hosts() -> Vec<String> {
    vec![
        "https://api1.waypoint.example".to_string(),
        "https://api2.waypoint.example".to_string(),
        "https://api3.waypoint.example".to_string(),
    ]
}
fn default_clouds() -> Vec<CloudSource> {
    vec![
        CloudSource::new("worker", "https://registry.waypoint.example/hosts.json"),
        CloudSource::new("gitlab", "https://gitlab.com/waypoint/registry/-/raw/main/hosts.json"),
        CloudSource::new("bitbucket", "https://bitbucket.org/waypoint/registry/raw/main/hosts.json"),
    ]
}

/// Country code from a POSIX locale such as `en_US.UTF-8`.
fn region_from_locale(lang: &str) -> Option<String> {
    let base = lang.split(['.', '@']).next()?;
    let (_, country) = base.split_once('_')?;
    if country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(country.to_ascii_uppercase())
    } else {
        None
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            timeout_ms: default_timeout_ms(),
            hydration_timeout_ms: default_hydration_timeout_ms(),
            max_fallback_probes: default_max_fallback_probes(),
            client_tag: default_client_tag(),
            region: default_region(),
            report_host: None,
            image_host: None,
            api_hosts: default_api_hosts(),
            clouds: default_clouds(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn hydration_timeout(&self) -> Duration {
        Duration::from_millis(self.hydration_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: explicit file if given (errors surface), else default, then first config file found, then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(path) => read_file(path)?,
        None => load_file().unwrap_or_default(),
    };
    apply_env(&mut c, |key| std::env::var(key).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("WAYPOINT_STATE_PATH") {
        c.state_path = PathBuf::from(s);
    }
    if let Some(s) = var("WAYPOINT_TIMEOUT_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.timeout_ms = ms;
        }
    }
    if let Some(s) = var("WAYPOINT_REPORT_HOST") {
        c.report_host = Some(s).filter(|s| !s.is_empty());
    }
    if let Some(s) = var("WAYPOINT_IMAGE_HOST") {
        c.image_host = Some(s).filter(|s| !s.is_empty());
    }
    if let Some(s) = var("WAYPOINT_REGION") {
        c.region = s;
    }
    if let Some(s) = var("WAYPOINT_CLIENT_TAG") {
        c.client_tag = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        out.push(dir.join("waypoint/config.toml"));
    }
    out.push(PathBuf::from("/etc/waypoint/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<Config>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match read_file(&p) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(error = %e, "ignoring config file"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.timeout(), Duration::from_millis(5000));
        assert_eq!(c.hydration_timeout(), Duration::from_millis(3000));
        assert_eq!(c.max_fallback_probes, 8);
        assert!(!c.api_hosts.is_empty());
        assert!(!c.clouds.is_empty());
    }

    #[test]
    fn parses_partial_toml() {
        let c: Config = toml::from_str(
            r#"
            timeout_ms = 1500
            report_host = "https://report.example"
            api_hosts = ["https://a.example"]

            [[clouds]]
            name = "gitee"
            value = "https://gitee.example/hosts.json"
            "#,
        )
        .unwrap();
        assert_eq!(c.timeout_ms, 1500);
        assert_eq!(c.hydration_timeout_ms, 3000);
        assert_eq!(c.report_host.as_deref(), Some("https://report.example"));
        assert_eq!(c.api_hosts, vec!["https://a.example".to_string()]);
        assert_eq!(c.clouds[0].url, "https://gitee.example/hosts.json");
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<Config>("proxy_port = 1").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WAYPOINT_TIMEOUT_MS", "250"),
            ("WAYPOINT_REPORT_HOST", "https://r.example"),
            ("WAYPOINT_IMAGE_HOST", ""),
            ("WAYPOINT_REGION", "KH"),
        ]
        .into_iter()
        .collect();
        let mut c = Config {
            image_host: Some("https://img.example".into()),
            ..Config::default()
        };
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.timeout_ms, 250);
        assert_eq!(c.report_host.as_deref(), Some("https://r.example"));
        assert_eq!(c.image_host, None);
        assert_eq!(c.region, "KH");
    }

    #[test]
    fn bad_timeout_env_is_ignored() {
        let mut c = Config::default();
        apply_env(&mut c, |k| (k == "WAYPOINT_TIMEOUT_MS").then(|| "soon".to_string()));
        assert_eq!(c.timeout_ms, 5000);
    }

    #[test]
    fn region_parsing() {
        assert_eq!(region_from_locale("en_US.UTF-8").as_deref(), Some("US"));
        assert_eq!(region_from_locale("zh_cn").as_deref(), Some("CN"));
        assert_eq!(region_from_locale("C"), None);
        assert_eq!(region_from_locale("POSIX"), None);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/waypoint.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
