//! Usage: Persisted gateway settings (schema + read/write helpers).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SCHEMA_VERSION: u32 = 2;
const SCHEMA_VERSION_ADD_DRAIN_TIMEOUT: u32 = 2;
pub const DEFAULT_INITIAL_MAX_CONCURRENT_REQUESTS: usize = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u32 = 0;
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: u32 = 30;
const DEFAULT_RESPONSE_CHANNEL_CAPACITY: usize = 64;
const DEFAULT_LOG_FILTER: &str = "info";
const MAX_INITIAL_MAX_CONCURRENT_REQUESTS: usize = 4096;
const MAX_IDLE_TIMEOUT_SECONDS: u32 = 24 * 60 * 60;
const MAX_DRAIN_TIMEOUT_SECONDS: u32 = 60 * 60;
const MAX_RESPONSE_CHANNEL_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` overrides it when set.
    pub filter: String,
    /// Daily-rolling log files are written here when set.
    pub log_dir: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub schema_version: u32,
    /// Proxy gateways accept find-worker requests and worker dial-backs.
    pub proxy_mode: bool,
    pub enforce_request_bypass: bool,
    pub enforce_concurrent_request_limit: bool,
    pub initial_max_concurrent_requests: usize,
    /// 0 = disabled.
    pub idle_timeout_seconds: u32,
    /// 0 = unlimited. Hot-reloadable.
    pub max_cumulative_request_bytes: u64,
    /// Hot-reloadable.
    pub propagate_helper_failures: bool,
    pub drain_timeout_seconds: u32,
    pub response_channel_capacity: usize,
    pub logging: LoggingSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            proxy_mode: false,
            enforce_request_bypass: false,
            enforce_concurrent_request_limit: true,
            initial_max_concurrent_requests: DEFAULT_INITIAL_MAX_CONCURRENT_REQUESTS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
            max_cumulative_request_bytes: 0,
            propagate_helper_failures: false,
            drain_timeout_seconds: DEFAULT_DRAIN_TIMEOUT_SECONDS,
            response_channel_capacity: DEFAULT_RESPONSE_CHANNEL_CAPACITY,
            logging: LoggingSettings::default(),
        }
    }
}

impl GatewaySettings {
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.drain_timeout_seconds))
    }
}

fn sanitize_concurrency_settings(settings: &mut GatewaySettings) -> bool {
    let mut changed = false;

    if settings.initial_max_concurrent_requests > MAX_INITIAL_MAX_CONCURRENT_REQUESTS {
        settings.initial_max_concurrent_requests = MAX_INITIAL_MAX_CONCURRENT_REQUESTS;
        changed = true;
    }
    if settings.response_channel_capacity == 0 {
        settings.response_channel_capacity = DEFAULT_RESPONSE_CHANNEL_CAPACITY;
        changed = true;
    }
    if settings.response_channel_capacity > MAX_RESPONSE_CHANNEL_CAPACITY {
        settings.response_channel_capacity = MAX_RESPONSE_CHANNEL_CAPACITY;
        changed = true;
    }

    changed
}

fn sanitize_timeouts(settings: &mut GatewaySettings) -> bool {
    let mut changed = false;

    if settings.idle_timeout_seconds > MAX_IDLE_TIMEOUT_SECONDS {
        settings.idle_timeout_seconds = MAX_IDLE_TIMEOUT_SECONDS;
        changed = true;
    }
    if settings.drain_timeout_seconds > MAX_DRAIN_TIMEOUT_SECONDS {
        settings.drain_timeout_seconds = MAX_DRAIN_TIMEOUT_SECONDS;
        changed = true;
    }

    changed
}

fn sanitize_logging(settings: &mut GatewaySettings) -> bool {
    let mut changed = false;

    if settings.logging.filter.trim().is_empty() {
        settings.logging.filter = DEFAULT_LOG_FILTER.to_string();
        changed = true;
    }
    if settings
        .logging
        .log_dir
        .as_deref()
        .is_some_and(|dir| dir.trim().is_empty())
    {
        settings.logging.log_dir = None;
        changed = true;
    }

    changed
}

fn migrate_add_drain_timeout(settings: &mut GatewaySettings, schema_version_present: bool) -> bool {
    // v2: drain_timeout_seconds introduced; v1 files relied on an unbounded drain.
    if schema_version_present && settings.schema_version >= SCHEMA_VERSION_ADD_DRAIN_TIMEOUT {
        return false;
    }

    let mut changed = false;

    // Persist schema_version so the migration doesn't re-run on every startup.
    if !schema_version_present {
        changed = true;
    }

    if settings.schema_version != SCHEMA_VERSION_ADD_DRAIN_TIMEOUT {
        settings.schema_version = SCHEMA_VERSION_ADD_DRAIN_TIMEOUT;
        changed = true;
    }
    if settings.drain_timeout_seconds == 0 {
        settings.drain_timeout_seconds = DEFAULT_DRAIN_TIMEOUT_SECONDS;
        changed = true;
    }

    changed
}

fn parse_settings_json(content: &str) -> Result<(GatewaySettings, bool), String> {
    let raw: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| format!("SETTINGS_PARSE: failed to parse settings file: {e}"))?;
    let schema_version_present = raw.get("schema_version").is_some();
    let settings: GatewaySettings = serde_json::from_value(raw)
        .map_err(|e| format!("SETTINGS_PARSE: failed to parse settings file: {e}"))?;
    Ok((settings, schema_version_present))
}

fn validate(settings: &GatewaySettings) -> Result<(), String> {
    if settings.initial_max_concurrent_requests > MAX_INITIAL_MAX_CONCURRENT_REQUESTS {
        return Err(format!(
            "SETTINGS_INVALID: initial_max_concurrent_requests must be <= {MAX_INITIAL_MAX_CONCURRENT_REQUESTS}"
        ));
    }
    if settings.idle_timeout_seconds > MAX_IDLE_TIMEOUT_SECONDS {
        return Err(format!(
            "SETTINGS_INVALID: idle_timeout_seconds must be <= {MAX_IDLE_TIMEOUT_SECONDS}"
        ));
    }
    if settings.drain_timeout_seconds > MAX_DRAIN_TIMEOUT_SECONDS {
        return Err(format!(
            "SETTINGS_INVALID: drain_timeout_seconds must be <= {MAX_DRAIN_TIMEOUT_SECONDS}"
        ));
    }
    if settings.response_channel_capacity == 0 {
        return Err("SETTINGS_INVALID: response_channel_capacity must be >= 1".to_string());
    }
    if settings.response_channel_capacity > MAX_RESPONSE_CHANNEL_CAPACITY {
        return Err(format!(
            "SETTINGS_INVALID: response_channel_capacity must be <= {MAX_RESPONSE_CHANNEL_CAPACITY}"
        ));
    }
    if settings.enforce_request_bypass && !settings.proxy_mode {
        return Err("SETTINGS_INVALID: enforce_request_bypass requires proxy_mode".to_string());
    }
    if settings.logging.filter.trim().is_empty() {
        return Err("SETTINGS_INVALID: logging.filter must not be empty".to_string());
    }
    Ok(())
}

/// Reads settings, creating a default file when missing and persisting repairs best-effort.
pub fn read(path: &Path) -> Result<GatewaySettings, String> {
    if !path.exists() {
        let settings = GatewaySettings::default();
        // Best-effort: create the file on first read so the config is discoverable/editable.
        if let Err(err) = write(path, &settings) {
            tracing::warn!(path = %path.display(), "failed to create default settings: {err}");
        }
        return Ok(settings);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("SETTINGS_IO: failed to read settings: {e}"))?;
    let (mut settings, schema_version_present) = parse_settings_json(&content)?;

    let mut repaired = false;
    repaired |= migrate_add_drain_timeout(&mut settings, schema_version_present);
    repaired |= sanitize_concurrency_settings(&mut settings);
    repaired |= sanitize_timeouts(&mut settings);
    repaired |= sanitize_logging(&mut settings);

    // Not repairable: the two flags disagree about what this gateway is.
    validate(&settings)?;

    if repaired {
        // Best-effort: persist repaired values while keeping read semantics.
        let _ = write(path, &settings);
    }

    Ok(settings)
}

pub fn write(path: &Path, settings: &GatewaySettings) -> Result<GatewaySettings, String> {
    validate(settings)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("SETTINGS_IO: invalid settings path: {}", path.display()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    let backup_path = path.with_file_name(format!("{file_name}.bak"));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("SETTINGS_IO: failed to create settings dir: {e}"))?;
    }

    let content = serde_json::to_vec_pretty(settings)
        .map_err(|e| format!("SETTINGS_IO: failed to serialize settings: {e}"))?;

    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("SETTINGS_IO: failed to write temp settings file: {e}"))?;

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }

    if path.exists() {
        std::fs::rename(path, &backup_path)
            .map_err(|e| format!("SETTINGS_IO: failed to create settings backup: {e}"))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::rename(&backup_path, path);
        return Err(format!("SETTINGS_IO: failed to finalize settings: {e}"));
    }

    if backup_path.exists() {
        let _ = std::fs::remove_file(&backup_path);
    }

    Ok(settings.clone())
}
