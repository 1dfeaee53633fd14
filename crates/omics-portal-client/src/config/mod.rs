use crate::retry::RetryPolicy;
use omics_portal_model::DEFAULT_RESOLUTION_FACTOR;
use std::env;
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: &str = "1";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportConfig {
    pub debounce: Duration,
    pub resolution_factor: f64,
    /// Cell types present in the roster that never get a signal track.
    pub excluded_cell_types: Vec<String>,
    pub fetch_companion_tracks: bool,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            resolution_factor: DEFAULT_RESOLUTION_FACTOR,
            excluded_cell_types: vec!["Astrocytes".to_string(), "Oligodendrocytes".to_string()],
            fetch_companion_tracks: true,
        }
    }
}

impl ViewportConfig {
    #[must_use]
    pub fn is_excluded(&self, celltype: &str) -> bool {
        self.excluded_cell_types.iter().any(|c| c == celltype)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub viewport: ViewportConfig,
    pub event_capacity: usize,
    pub apply_dataset_defaults: bool,
    pub log_json: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(15_000),
            retry: RetryPolicy::default(),
            viewport: ViewportConfig::default(),
            event_capacity: 256,
            apply_dataset_defaults: true,
            log_json: false,
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

/// Comma separated list; unset keeps the default, an empty value means "none".
fn env_list(name: &str, default: &[String]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default.to_vec(),
    }
}

impl PortalConfig {
    /// Defaults overlaid with `PORTAL_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let viewport = ViewportConfig {
            debounce: env_duration_ms(
                "PORTAL_VIEWPORT_DEBOUNCE_MS",
                defaults.viewport.debounce.as_millis() as u64,
            ),
            resolution_factor: env_f64(
                "PORTAL_VIEWPORT_RESOLUTION_FACTOR",
                defaults.viewport.resolution_factor,
            ),
            excluded_cell_types: env_list(
                "PORTAL_SIGNAL_EXCLUDED_CELL_TYPES",
                &defaults.viewport.excluded_cell_types,
            ),
            fetch_companion_tracks: env_bool(
                "PORTAL_FETCH_COMPANION_TRACKS",
                defaults.viewport.fetch_companion_tracks,
            ),
        };
        Self {
            api_base_url: env::var("PORTAL_API_BASE_URL").unwrap_or(defaults.api_base_url),
            request_timeout: env_duration_ms(
                "PORTAL_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            ),
            retry: RetryPolicy {
                max_attempts: env_usize("PORTAL_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
                base_backoff_ms: env_u64(
                    "PORTAL_RETRY_BASE_BACKOFF_MS",
                    defaults.retry.base_backoff_ms,
                ),
            },
            viewport,
            event_capacity: env_usize("PORTAL_EVENT_CAPACITY", defaults.event_capacity),
            apply_dataset_defaults: env_bool(
                "PORTAL_APPLY_DATASET_DEFAULTS",
                defaults.apply_dataset_defaults,
            ),
            log_json: env_bool("PORTAL_LOG_JSON", defaults.log_json),
        }
    }
}

pub fn validate_config_contract(cfg: &PortalConfig) -> Result<(), String> {
    let base = cfg.api_base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(format!(
            "api base url must start with http:// or https://: {base}"
        ));
    }
    let parsed =
        reqwest::Url::parse(base).map_err(|e| format!("api base url does not parse: {e}"))?;
    if parsed.host_str().is_none() {
        return Err(format!("api base url has no host: {base}"));
    }
    if cfg.request_timeout.is_zero() {
        return Err("request timeout must be > 0".to_string());
    }
    if cfg.retry.max_attempts == 0 {
        return Err("retry max attempts must be >= 1".to_string());
    }
    let factor = cfg.viewport.resolution_factor;
    if !factor.is_finite() || factor <= 0.0 || factor > 1.0 {
        return Err(format!("resolution factor must be in (0, 1]: {factor}"));
    }
    if cfg.event_capacity == 0 {
        return Err("event capacity must be > 0".to_string());
    }
    Ok(())
}
