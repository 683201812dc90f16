//! Config schema types (client identity, discovery, session channel, watchdog).

use serde::{Deserialize, Serialize};

use nexus_protocol as proto;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub client: ClientConfig,
    pub discovery: DiscoveryConfig,
    pub channel: ChannelConfig,
    pub watchdog: WatchdogConfig,
}

/// Who this client is and which server it last talked to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Stable client id sent with every session. Derived from the hostname
    /// when unset.
    pub client_id: Option<String>,

    /// Last selected server base URL. Skips discovery when set.
    pub server_address: Option<String>,
}

impl ClientConfig {
    pub fn resolved_client_id(&self) -> String {
        if let Some(id) = self.client_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return id.trim().to_string();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .map(|h| format!("host-{}", h.to_lowercase()))
            .unwrap_or_else(|| "host-unknown".into())
    }
}

/// LAN discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Port servers listen on for probes.
    pub server_port: u16,

    /// First local probe port; interface `n` binds `probe_base_port + n`.
    /// `0` lets the OS pick.
    pub probe_base_port: u16,

    /// Identification token sent in each probe.
    pub token: String,

    /// Countdown started by the first reply of a scan.
    pub settle_ms: u64,

    /// Scan ceiling when nothing answers.
    pub ceiling_ms: u64,

    /// Probe re-send interval while a scan is open.
    pub resend_ms: u64,

    /// Missed scans before a candidate is dropped.
    pub max_misses: u32,

    /// Pause between scans in watch mode.
    pub watch_interval_ms: u64,

    /// Localhost ports probed over HTTP for same-machine setups.
    pub localhost_ports: Vec<u16>,

    /// Extra interface-name fragments treated as virtual adapters.
    pub virtual_patterns: Vec<String>,

    /// Timeout for health and server-name requests.
    pub http_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            server_port: proto::DISCOVERY_PORT,
            probe_base_port: proto::PROBE_BASE_PORT,
            token: proto::DISCOVERY_TOKEN.into(),
            settle_ms: proto::SCAN_SETTLE_MS,
            ceiling_ms: proto::SCAN_CEILING_MS,
            resend_ms: proto::PROBE_RESEND_MS,
            max_misses: proto::CANDIDATE_MAX_MISSES,
            watch_interval_ms: 10_000,
            localhost_ports: vec![3000, 8080],
            virtual_patterns: Vec::new(),
            http_timeout_ms: 2_000,
        }
    }
}

/// Session channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// WebSocket path appended to the server base URL.
    pub ws_path: String,
    pub connect_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_attempts: u32,
    pub reconnect_cooldown_ms: u64,
    pub status_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_path: "/ws".into(),
            connect_timeout_ms: 5_000,
            reconnect_base_ms: proto::RECONNECT_BASE_MS,
            reconnect_max_ms: proto::RECONNECT_MAX_MS,
            reconnect_max_attempts: proto::RECONNECT_MAX_ATTEMPTS,
            reconnect_cooldown_ms: proto::RECONNECT_COOLDOWN_MS,
            status_timeout_ms: proto::STATUS_QUERY_TIMEOUT_MS,
        }
    }
}

/// Process watchdog and reconciler cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub tick_ms: u64,
    pub cross_check_ms: u64,
    /// Probe the store client for a running app id.
    pub store_app_probe: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_ms: proto::WATCHDOG_TICK_MS,
            cross_check_ms: proto::CROSS_CHECK_INTERVAL_MS,
            store_app_probe: true,
        }
    }
}
