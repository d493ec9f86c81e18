//! TOML configuration for the fleet's four processes (Supervisor, Hub,
//! Monitor, Worker). A single file is shared across all of them; each binary
//! reads the options it cares about and ignores the rest.
//!
//! No environment-variable overrides: TOML is the sole source, matching the
//! closed option set this fleet recognizes.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub channels: Vec<String>,
    pub stale_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub max_crash_count: u32,
    pub data_retention_days: i64,
    pub eventsub_reconcile_interval_secs: u64,
    pub eventsub_req_rate_per_s: f64,
    pub eventsub_req_jitter_ms: u64,
    pub ws_backoff_base_secs: u64,
    pub ws_backoff_max_secs: u64,
    pub max_cost_retry_attempts: u32,
    pub session_handshake_timeout_secs: u64,
    pub socket_paths: SocketPaths,
    pub credential_store_endpoint: Option<String>,
    /// WebSocket URL for the abstracted upstream EventSub session (§6.2).
    pub eventsub_ws_url: String,
    /// HTTP base URL for the abstracted upstream's CREATE/DELETE/LIST calls.
    pub eventsub_http_base_url: String,
    pub supervisor: SupervisorConfig,
}

/// Supervisor-only options (§4.4). Not in the literal §6.5 schema list, which
/// abstracts process lifecycle away, but the Supervisor cannot spawn or
/// restart anything without knowing these.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub monitor_bin: String,
    pub hub_bin: String,
    pub worker_bin: String,
    pub command_inbox_path: String,
    pub worker_inter_start_delay_ms: u64,
    pub graceful_stop_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SocketPaths {
    pub hub: String,
    pub monitor: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (all-Option so defaults vs. absence stay
// distinguishable during validation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    channels: Option<Vec<String>>,
    stale_timeout: Option<u64>,
    heartbeat_interval: Option<u64>,
    health_check_interval: Option<u64>,
    max_crash_count: Option<u32>,
    data_retention_days: Option<i64>,
    eventsub_reconcile_interval: Option<u64>,
    eventsub_req_rate_per_s: Option<f64>,
    eventsub_req_jitter_ms: Option<u64>,
    ws_backoff_base: Option<u64>,
    ws_backoff_max: Option<u64>,
    max_cost_retry_attempts: Option<u32>,
    session_handshake_timeout: Option<u64>,
    socket_paths: Option<RawSocketPaths>,
    credential_store_endpoint: Option<String>,
    eventsub_ws_url: Option<String>,
    eventsub_http_base_url: Option<String>,
    supervisor: Option<RawSupervisorConfig>,
}

#[derive(Debug, Deserialize)]
struct RawSupervisorConfig {
    monitor_bin: Option<String>,
    hub_bin: Option<String>,
    worker_bin: Option<String>,
    command_inbox_path: Option<String>,
    worker_inter_start_delay_ms: Option<u64>,
    graceful_stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSocketPaths {
    hub: Option<String>,
    monitor: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<FleetConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load from the default path `/etc/fleet/fleet.toml`.
pub fn load_config() -> Result<FleetConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/fleet/fleet.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<FleetConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let channels = raw
        .channels
        .ok_or_else(|| ConfigError::MissingField("channels".to_owned()))?;
    if channels.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one entry in channels is required".to_owned(),
        ));
    }

    let socket_paths = match raw.socket_paths {
        Some(s) => SocketPaths {
            hub: s.hub.unwrap_or_else(|| "/var/run/fleet/hub.sock".to_owned()),
            monitor: s
                .monitor
                .unwrap_or_else(|| "/var/run/fleet/monitor.sock".to_owned()),
        },
        None => SocketPaths {
            hub: "/var/run/fleet/hub.sock".to_owned(),
            monitor: "/var/run/fleet/monitor.sock".to_owned(),
        },
    };

    let rate = raw.eventsub_req_rate_per_s.unwrap_or(1.0);
    if rate <= 0.0 {
        return Err(ConfigError::InvalidValue(
            "eventsub_req_rate_per_s must be positive".to_owned(),
        ));
    }

    let supervisor = raw.supervisor.unwrap_or(RawSupervisorConfig {
        monitor_bin: None,
        hub_bin: None,
        worker_bin: None,
        command_inbox_path: None,
        worker_inter_start_delay_ms: None,
        graceful_stop_timeout_secs: None,
    });
    let supervisor = SupervisorConfig {
        monitor_bin: supervisor.monitor_bin.unwrap_or_else(|| "monitor".to_owned()),
        hub_bin: supervisor.hub_bin.unwrap_or_else(|| "hub".to_owned()),
        worker_bin: supervisor.worker_bin.unwrap_or_else(|| "worker".to_owned()),
        command_inbox_path: supervisor
            .command_inbox_path
            .unwrap_or_else(|| "/var/run/fleet/supervisor.cmd".to_owned()),
        worker_inter_start_delay_ms: supervisor.worker_inter_start_delay_ms.unwrap_or(500),
        graceful_stop_timeout_secs: supervisor.graceful_stop_timeout_secs.unwrap_or(10),
    };

    Ok(FleetConfig {
        channels,
        stale_timeout_secs: raw.stale_timeout.unwrap_or(60),
        heartbeat_interval_secs: raw.heartbeat_interval.unwrap_or(15),
        health_check_interval_secs: raw.health_check_interval.unwrap_or(10),
        max_crash_count: raw.max_crash_count.unwrap_or(3),
        data_retention_days: raw.data_retention_days.unwrap_or(7),
        eventsub_reconcile_interval_secs: raw.eventsub_reconcile_interval.unwrap_or(30),
        eventsub_req_rate_per_s: rate,
        eventsub_req_jitter_ms: raw.eventsub_req_jitter_ms.unwrap_or(250),
        ws_backoff_base_secs: raw.ws_backoff_base.unwrap_or(2),
        ws_backoff_max_secs: raw.ws_backoff_max.unwrap_or(60),
        max_cost_retry_attempts: raw.max_cost_retry_attempts.unwrap_or(3),
        session_handshake_timeout_secs: raw.session_handshake_timeout.unwrap_or(10),
        socket_paths,
        credential_store_endpoint: raw.credential_store_endpoint,
        eventsub_ws_url: raw
            .eventsub_ws_url
            .unwrap_or_else(|| "wss://eventsub.example.invalid/ws".to_owned()),
        eventsub_http_base_url: raw
            .eventsub_http_base_url
            .unwrap_or_else(|| "https://eventsub.example.invalid".to_owned()),
        supervisor,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {}", s),
            ConfigError::Parse(s) => write!(f, "parse error: {}", s),
            ConfigError::MissingField(s) => write!(f, "missing required field: {}", s),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let cfg = load_config_from_str(
            r#"
            channels = ["100", "200"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.channels, vec!["100", "200"]);
        assert_eq!(cfg.stale_timeout_secs, 60);
        assert_eq!(cfg.socket_paths.hub, "/var/run/fleet/hub.sock");
        assert_eq!(cfg.max_cost_retry_attempts, 3);
        assert_eq!(cfg.max_crash_count, 3);
        assert!(cfg.credential_store_endpoint.is_none());
    }

    #[test]
    fn missing_channels_is_an_error() {
        let err = load_config_from_str("stale_timeout = 60").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "channels"));
    }

    #[test]
    fn empty_channels_list_is_rejected() {
        let err = load_config_from_str("channels = []").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn overrides_are_honored() {
        let cfg = load_config_from_str(
            r#"
            channels = ["100"]
            eventsub_req_rate_per_s = 2.5
            max_crash_count = 3

            [socket_paths]
            hub = "/tmp/hub.sock"
            monitor = "/tmp/monitor.sock"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.eventsub_req_rate_per_s, 2.5);
        assert_eq!(cfg.max_crash_count, 3);
        assert_eq!(cfg.socket_paths.hub, "/tmp/hub.sock");
    }

    #[test]
    fn supervisor_section_is_optional_with_sane_defaults() {
        let cfg = load_config_from_str(r#"channels = ["100"]"#).unwrap();
        assert_eq!(cfg.supervisor.monitor_bin, "monitor");
        assert_eq!(cfg.supervisor.worker_inter_start_delay_ms, 500);
        assert_eq!(cfg.supervisor.graceful_stop_timeout_secs, 10);
    }

    #[test]
    fn supervisor_section_overrides_are_honored() {
        let cfg = load_config_from_str(
            r#"
            channels = ["100"]

            [supervisor]
            worker_bin = "/opt/fleet/bin/worker"
            worker_inter_start_delay_ms = 1000
            command_inbox_path = "/tmp/cmd"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.supervisor.worker_bin, "/opt/fleet/bin/worker");
        assert_eq!(cfg.supervisor.worker_inter_start_delay_ms, 1000);
        assert_eq!(cfg.supervisor.command_inbox_path, "/tmp/cmd");
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        let err = load_config_from_str(
            r#"
            channels = ["100"]
            eventsub_req_rate_per_s = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
