//! Shared vocabulary for the launcher core: discovery datagrams, session
//! channel events, session and game records, and the timing constants every
//! component agrees on.

pub mod discovery;
pub mod events;
pub mod session;
pub mod state;

pub use {
    discovery::DiscoveryReply,
    events::{ClientEvent, ServerEvent, SessionQuery, SessionStatus},
    session::{GameKind, GameRecord, GameSession},
    state::{ConnectionState, ReconcileVerdict},
};

// ── Discovery ────────────────────────────────────────────────────────────────

/// Opaque token broadcast to identify the launcher protocol.
pub const DISCOVERY_TOKEN: &str = "lanLauncher://get_ip";
/// Port the server listens on for discovery probes.
pub const DISCOVERY_PORT: u16 = 50000;
/// First local port used for per-interface probe sockets (`50001 + index`).
pub const PROBE_BASE_PORT: u16 = 50001;
/// Countdown started by the first reply of a scan.
pub const SCAN_SETTLE_MS: u64 = 2_000;
/// Hard ceiling for a scan that never receives a reply.
pub const SCAN_CEILING_MS: u64 = 5_000;
/// Probe re-send interval while a scan is open.
pub const PROBE_RESEND_MS: u64 = 1_000;
/// Consecutive missed scans after which a candidate is evicted.
pub const CANDIDATE_MAX_MISSES: u32 = 5;
/// Room joined on every successful channel connect.
pub const SESSION_ROOM: &str = "game-sessions";

// ── Session channel ──────────────────────────────────────────────────────────

pub const RECONNECT_BASE_MS: u64 = 1_000;
pub const RECONNECT_MAX_MS: u64 = 30_000;
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;
pub const RECONNECT_COOLDOWN_MS: u64 = 60_000;
/// Client-side timeout for `check_my_session`.
pub const STATUS_QUERY_TIMEOUT_MS: u64 = 5_000;

// ── Watchdog / reconciler ────────────────────────────────────────────────────

pub const WATCHDOG_TICK_MS: u64 = 1_000;
pub const CROSS_CHECK_INTERVAL_MS: u64 = 60_000;

/// Game id reserved for store-app sessions the server resolves by external id.
pub const UNRESOLVED_GAME_ID: i64 = 0;
